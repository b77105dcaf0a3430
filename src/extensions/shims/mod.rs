//! Node-compatible capability-gated shim surface (spec §4.2).
//!
//! Every row of the shim table gets one submodule here. Each submodule
//! exposes an `install(ctx, globals, grant)` function binding its native
//! host functions, plus a `PRELUDE_JS` constant that wires those natives up
//! behind the Node-shaped namespace object and registers it with
//! `require()`. `install()` in this file runs every submodule's installer
//! and then evaluates every prelude in dependency order (pure-JS modules
//! first, since later preludes may reference `Buffer`/`EventEmitter`).
//!
//! All I/O goes through these shims; nothing else in an isolate has ambient
//! authority over the filesystem, network, processes, or environment.

pub mod buffer;
pub mod child_process;
pub mod crypto;
pub mod events;
pub mod fs;
pub mod http;
pub mod os;
pub mod path_url;
pub mod process;

use crate::capability::CapabilityGrant;
use crate::error::Result;
use crate::runtime::IsolateHandle;

/// Host functions every shim needs to throw a Node-shaped `Error` (one with
/// a `.code` string) rather than a bare message string, since Node callers
/// branch on `err.code`.
pub(crate) fn throw_node_error(ctx: &rquickjs::Ctx<'_>, code: &str, message: &str) -> rquickjs::Error {
    let escaped_message = serde_json::to_string(message).unwrap_or_else(|_| "\"error\"".to_string());
    let escaped_code = serde_json::to_string(code).unwrap_or_else(|_| "\"EIO\"".to_string());
    let script = format!(
        "(function(){{ const e = new Error({escaped_message}); e.code = {escaped_code}; return e; }})()"
    );
    match ctx.eval::<rquickjs::Value, _>(script) {
        Ok(value) => ctx.throw(value),
        Err(err) => err,
    }
}

/// Map a capability-denied error into the shared `CapabilityDenied` JS
/// exception shape every shim throws on a scope miss.
pub(crate) fn throw_capability_denied(ctx: &rquickjs::Ctx<'_>, err: &crate::error::Error) -> rquickjs::Error {
    throw_node_error(ctx, "CAPABILITY_DENIED", &err.to_string())
}

/// Best-effort mapping from `std::io::ErrorKind` to the Node error codes
/// spec §4.2 names. Unmapped kinds fall back to the generic `EIO`; this is a
/// deliberate simplification, not every Node errno has a stable
/// `std::io::ErrorKind` counterpart.
pub(crate) fn node_io_code(err: &std::io::Error) -> &'static str {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => "ENOENT",
        ErrorKind::PermissionDenied => "EACCES",
        ErrorKind::AlreadyExists => "EEXIST",
        _ => "EIO",
    }
}

/// Install every shim namespace into `isolate`, gated by `grant`.
pub fn install(isolate: &IsolateHandle, grant: &CapabilityGrant) -> Result<()> {
    let grant = grant.clone();
    isolate.inject_global(|ctx| {
        let globals = ctx.globals();
        bind_require(ctx, &globals)?;
        fs::install(ctx, &globals, &grant)?;
        child_process::install(ctx, &globals, &grant)?;
        http::install(ctx, &globals, &grant)?;
        crypto::install(ctx, &globals, &grant)?;
        os::install(ctx, &globals, &grant)?;
        process::install(ctx, &globals, &grant)?;
        Ok(())
    })?;

    isolate.eval_module(events::PRELUDE_JS, "shim:events.js")?;
    isolate.eval_module(buffer::PRELUDE_JS, "shim:buffer.js")?;
    isolate.eval_module(path_url::PRELUDE_JS, "shim:path_url.js")?;
    isolate.eval_module(fs::PRELUDE_JS, "shim:fs.js")?;
    isolate.eval_module(child_process::PRELUDE_JS, "shim:child_process.js")?;
    isolate.eval_module(http::PRELUDE_JS, "shim:http.js")?;
    isolate.eval_module(crypto::PRELUDE_JS, "shim:crypto.js")?;
    isolate.eval_module(os::PRELUDE_JS, "shim:os.js")?;
    isolate.eval_module(process::PRELUDE_JS, "shim:process.js")?;
    Ok(())
}

/// `require(name)` resolves against a flat module registry each shim
/// prelude populates (`globalThis.__moduleRegistry[name] = ...`). A name
/// with no entry raises `UnresolvedModule` (spec §4.2's vendored-stub row).
fn bind_require(ctx: &rquickjs::Ctx<'_>, globals: &rquickjs::Object<'_>) -> rquickjs::Result<()> {
    globals.set("__moduleRegistry", rquickjs::Object::new(ctx.clone())?)?;
    globals.set(
        "require",
        rquickjs::Function::new(ctx.clone(), move |ctx: rquickjs::Ctx<'_>, name: String| -> rquickjs::Result<rquickjs::Value> {
            let registry: rquickjs::Object = ctx.globals().get("__moduleRegistry")?;
            if let Ok(module) = registry.get::<_, rquickjs::Value>(name.as_str()) {
                if !module.is_undefined() {
                    return Ok(module);
                }
            }
            Err(throw_node_error(
                &ctx,
                "MODULE_NOT_FOUND",
                &format!("unresolved module: {name}"),
            ))
        }),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::IsolateOpts;

    fn isolate() -> IsolateHandle {
        IsolateHandle::new(&IsolateOpts {
            heap_ceiling_bytes: 64 * 1024 * 1024,
        })
        .expect("isolate")
    }

    #[test]
    fn require_of_unknown_module_raises_unresolved_module() {
        let isolate = isolate();
        install(&isolate, &CapabilityGrant::minimum()).expect("install shims");
        let err = isolate.eval_module("require('left-pad');", "test.js").unwrap_err();
        assert_eq!(err.code(), "script_error");
    }

    #[test]
    fn require_of_fs_resolves() {
        let isolate = isolate();
        install(&isolate, &CapabilityGrant::minimum()).expect("install shims");
        isolate
            .eval_module("const fs = require('fs'); if (typeof fs.readFileSync !== 'function') throw new Error('no fs');", "test.js")
            .expect("eval");
    }
}
