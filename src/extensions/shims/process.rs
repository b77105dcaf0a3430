//! `process` module: per-isolate process facade. `env` is a sealed snapshot
//! filtered by the `env.read` scope, never a live view; `exit` never touches
//! the host process, it only rejects the current call.

use crate::capability::{Capability, CapabilityGrant};
use rquickjs::{Ctx, Function, Object};

pub const PRELUDE_JS: &str = r#"
(function () {
  const listeners = {};
  const nextTickQueue = [];

  function flushNextTick() {
    while (nextTickQueue.length > 0) {
      const fn = nextTickQueue.shift();
      fn();
    }
  }

  const process = {
    platform: __osPlatform(),
    argv: ['node', 'extension.js'],
    version: 'v20.0.0-ext-host',
    env: JSON.parse(__processEnvSnapshot()),
    cwd: () => __processCwd(),
    exit: (code) => { __processExit(code || 0); },
    on: (event, fn) => {
      (listeners[event] = listeners[event] || []).push(fn);
      return process;
    },
    nextTick: (fn, ...args) => {
      nextTickQueue.push(() => fn(...args));
      Promise.resolve().then(flushNextTick);
    },
    hrtime: (previous) => {
      const now = Date.now() * 1e6;
      if (!previous) return [Math.floor(now / 1e9), now % 1e9];
      const prevNs = previous[0] * 1e9 + previous[1];
      const diff = now - prevNs;
      return [Math.floor(diff / 1e9), diff % 1e9];
    },
    stdout: { write: (chunk) => { __processStdoutWrite(chunk); return true; } },
    stderr: { write: (chunk) => { __processStderrWrite(chunk); return true; } },
  };

  globalThis.__moduleRegistry.process = process;
  globalThis.process = process;
})();
"#;

pub fn install(ctx: &Ctx<'_>, globals: &Object<'_>, grant: &CapabilityGrant) -> rquickjs::Result<()> {
    let env_grant = grant.clone();
    globals.set(
        "__processEnvSnapshot",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<String> {
            let mut allowed = serde_json::Map::new();
            if env_grant.has(Capability::EnvRead) {
                for (key, value) in std::env::vars() {
                    if env_grant.check_env_var(Capability::EnvRead, &key).is_ok() {
                        allowed.insert(key, serde_json::Value::String(value));
                    }
                }
            }
            serde_json::to_string(&allowed).map_err(|err| super::throw_node_error(&ctx, "EIO", &err.to_string()))
        }),
    )?;

    globals.set(
        "__processCwd",
        Function::new(ctx.clone(), |ctx: Ctx<'_>| -> rquickjs::Result<String> {
            std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .map_err(|err| super::throw_node_error(&ctx, super::node_io_code(&err), &err.to_string()))
        }),
    )?;

    globals.set(
        "__processExit",
        Function::new(ctx.clone(), |ctx: Ctx<'_>, code: i32| -> rquickjs::Result<()> {
            Err(super::throw_node_error(
                &ctx,
                "EXTENSION_REQUESTED_EXIT",
                &crate::error::Error::ExtensionRequestedExit(code).to_string(),
            ))
        }),
    )?;

    globals.set(
        "__processStdoutWrite",
        Function::new(ctx.clone(), |chunk: String| {
            tracing::info!(target: "extension_stdout", "{chunk}");
        }),
    )?;
    globals.set(
        "__processStderrWrite",
        Function::new(ctx.clone(), |chunk: String| {
            tracing::warn!(target: "extension_stderr", "{chunk}");
        }),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::capability::{Capability, CapabilityGrant, Scope};
    use crate::extensions::shims;
    use crate::runtime::{IsolateHandle, IsolateOpts};
    use std::collections::BTreeMap;

    #[test]
    fn env_snapshot_is_filtered_by_scope() {
        let (allowed_key, allowed_value) = std::env::vars()
            .next()
            .expect("test process should have at least one env var");
        let mut scopes = BTreeMap::new();
        scopes.insert(Capability::EnvRead, Scope::EnvVars(vec![allowed_key.clone()]));
        let grant = CapabilityGrant::new(scopes);

        let isolate = IsolateHandle::new(&IsolateOpts { heap_ceiling_bytes: 16 * 1024 * 1024 }).expect("isolate");
        shims::install(&isolate, &grant).expect("install");
        isolate
            .eval_module(
                &format!(
                    r#"
                    if (process.env['{allowed_key}'] !== {allowed_value:?}) throw new Error('missing visible var');
                    if ('EXT_HOST_DEFINITELY_UNSCOPED_VAR' in process.env) throw new Error('leaked unscoped var');
                    "#,
                ),
                "test.js",
            )
            .expect("eval");
    }

    #[test]
    fn exit_rejects_with_extension_requested_exit_code() {
        let isolate = IsolateHandle::new(&IsolateOpts { heap_ceiling_bytes: 16 * 1024 * 1024 }).expect("isolate");
        shims::install(&isolate, &CapabilityGrant::minimum()).expect("install");
        isolate
            .eval_module(
                r#"
                try {
                  process.exit(1);
                  throw new Error('should have thrown');
                } catch (err) {
                  if (err.code !== 'EXTENSION_REQUESTED_EXIT') throw err;
                }
                "#,
                "test.js",
            )
            .expect("eval");
    }
}
