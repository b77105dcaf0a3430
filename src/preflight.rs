//! Static preflight analyzer (spec §4.7).
//!
//! Parses an entry file without executing it and predicts which
//! registrations it will make, which capabilities it transitively implies,
//! and a handful of obvious failure modes. Advisory only: a missed
//! registration degrades to a runtime registration; a predicted-but-never-
//! observed registration is reported as `PreflightDrift` by the conformance
//! harness, never treated as fatal here.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use swc_common::{sync::Lrc, FileName, SourceMap};
use swc_ecma_ast::{CallExpr, Callee, EsVersion, Expr, Lit, MemberProp};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax};
use swc_ecma_visit::{Visit, VisitWith};

/// A single predicted registration: the kind-token used by `pi.register*`
/// (e.g. `"command"`, `"tool"`) and the literal name, when it could be
/// resolved from a string literal argument.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PredictedRegistration {
    pub kind: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreflightFailureMode {
    /// `eval(...)` called directly — cannot be statically followed.
    DynamicEval,
    /// A tight loop around a blocking sleep primitive.
    SynchronousSleepLoop,
    /// A reference to an npm-style module with no known stub (spec §4.2's
    /// "missing npm stubs" failure mode).
    MissingNpmStub(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreflightReport {
    pub registrations: Vec<PredictedRegistration>,
    pub capabilities: BTreeSet<String>,
    pub failure_modes: Vec<PreflightFailureMode>,
}

const REGISTER_KINDS: &[(&str, &str)] = &[
    ("registerCommand", "command"),
    ("registerTool", "tool"),
    ("registerProvider", "provider"),
    ("registerMessageRenderer", "message_renderer"),
    ("registerShortcut", "shortcut"),
    ("registerFlag", "flag"),
];

/// Modules whose mere mention implies a capability, and the capability token
/// it implies (spec §4.7: "any reference to `child_process.spawn` implies
/// `process.spawn`").
const IMPLIED_CAPABILITIES: &[(&str, &str)] = &[
    ("child_process", "process.spawn"),
    ("fs", "fs.read"),
    ("fetch", "net.fetch"),
    ("http", "net.fetch"),
    ("https", "net.fetch"),
];

const KNOWN_NPM_STUBS: &[&str] = &[
    "fs", "path", "url", "querystring", "os", "process", "events", "buffer", "child_process",
    "crypto", "http", "https",
];

/// Run the preflight analysis over an entry file's raw source.
pub fn analyze(source: &str) -> Result<PreflightReport> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(Lrc::new(FileName::Anon), source.to_string());

    let lexer = Lexer::new(
        Syntax::Es(EsSyntax {
            jsx: false,
            ..Default::default()
        }),
        EsVersion::Es2022,
        StringInput::from(&*fm),
        None,
    );
    let mut parser = Parser::new_from(lexer);
    let module = parser
        .parse_module()
        .map_err(|e| Error::ScriptError {
            message: format!("preflight parse failed: {:?}", e.kind()),
            stack: None,
        })?;

    let mut visitor = PreflightVisitor::default();
    module.visit_with(&mut visitor);

    let mut report = PreflightReport {
        registrations: visitor.registrations.into_iter().collect(),
        capabilities: visitor.capabilities,
        failure_modes: visitor.failure_modes,
    };
    report.registrations.sort();
    report.registrations.dedup();
    Ok(report)
}

#[derive(Default)]
struct PreflightVisitor {
    registrations: BTreeSet<PredictedRegistration>,
    capabilities: BTreeSet<String>,
    failure_modes: Vec<PreflightFailureMode>,
    seen_identifiers: BTreeSet<String>,
}

impl PreflightVisitor {
    fn note_identifier(&mut self, name: &str) {
        if self.seen_identifiers.contains(name) {
            return;
        }
        self.seen_identifiers.insert(name.to_string());
        for (module, capability) in IMPLIED_CAPABILITIES {
            if name == *module {
                self.capabilities.insert((*capability).to_string());
            }
        }
        if !KNOWN_NPM_STUBS.contains(&name) && is_bare_module_like(name) {
            self.failure_modes
                .push(PreflightFailureMode::MissingNpmStub(name.to_string()));
        }
    }
}

/// Heuristic: a lowercase dotted-free identifier that looks like it was
/// meant as a `require()`/import specifier rather than a local variable.
/// Used only to flag candidate missing npm stubs, never to block loading.
fn is_bare_module_like(name: &str) -> bool {
    name.len() > 2
        && name.chars().all(|c| c.is_ascii_lowercase() || c == '-')
        && name != "pi"
}

impl Visit for PreflightVisitor {
    fn visit_call_expr(&mut self, call: &CallExpr) {
        if let Callee::Expr(callee) = &call.callee {
            if let Expr::Ident(ident) = callee.as_ref() {
                let sym = ident.sym.as_str();
                if sym == "eval" {
                    self.failure_modes.push(PreflightFailureMode::DynamicEval);
                }
                if sym == "require" {
                    if let Some(name) = call.args.first().and_then(|a| string_literal(&a.expr)) {
                        self.note_identifier(&name);
                    }
                }
            }

            if let Expr::Member(member) = callee.as_ref() {
                if let Expr::Ident(obj) = member.obj.as_ref() {
                    if obj.sym.as_str() == "pi" {
                        if let MemberProp::Ident(method) = &member.prop {
                            let method_name = method.sym.as_str();
                            for (js_name, kind) in REGISTER_KINDS {
                                if method_name == *js_name {
                                    let name = call
                                        .args
                                        .first()
                                        .and_then(|a| string_literal(&a.expr));
                                    self.registrations.insert(PredictedRegistration {
                                        kind: (*kind).to_string(),
                                        name,
                                    });
                                }
                            }
                            if method_name == "on" {
                                self.registrations.insert(PredictedRegistration {
                                    kind: "event_handler".to_string(),
                                    name: call.args.first().and_then(|a| string_literal(&a.expr)),
                                });
                            }
                            if method_name == "exec" {
                                self.capabilities.insert("process.spawn".to_string());
                            }
                            if method_name == "fetch" {
                                self.capabilities.insert("net.fetch".to_string());
                            }
                        }
                    }
                }

                if let Expr::Ident(obj) = member.obj.as_ref() {
                    self.note_identifier(obj.sym.as_str());
                    if let MemberProp::Ident(prop) = &member.prop {
                        if obj.sym.as_str() == "child_process" && prop.sym.as_str() == "spawn" {
                            self.capabilities.insert("process.spawn".to_string());
                        }
                    }
                }
            }
        }

        call.visit_children_with(self);
    }
}

fn string_literal(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Lit(Lit::Str(s)) => Some(s.value.as_str().to_string()),
        _ => None,
    }
}
