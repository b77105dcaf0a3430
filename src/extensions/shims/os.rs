//! `os` module: read-only host info, gated by `env.read` (spec §4.2's `os`
//! row carries no argument to scope, so a bare-capability check suffices).

use crate::capability::{Capability, CapabilityGrant};
use rquickjs::{Ctx, Function, Object};

pub const PRELUDE_JS: &str = r#"
(function () {
  const os = {
    EOL: '\n',
    homedir: () => __osHomedir(),
    tmpdir: () => __osTmpdir(),
    platform: () => __osPlatform(),
    arch: () => __osArch(),
    hostname: () => __osHostname(),
    cpus: () => JSON.parse(__osCpus()),
    userInfo: () => JSON.parse(__osUserInfo()),
    totalmem: () => __osTotalMem(),
    freemem: () => __osFreeMem(),
  };

  globalThis.__moduleRegistry.os = os;
})();
"#;

pub fn install(ctx: &Ctx<'_>, globals: &Object<'_>, grant: &CapabilityGrant) -> rquickjs::Result<()> {
    macro_rules! bare_checked {
        ($name:expr, $grant:ident, $body:expr) => {{
            let grant = $grant.clone();
            Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<String> {
                grant
                    .check_bare(Capability::EnvRead)
                    .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
                Ok($body())
            })
        }};
    }

    globals.set("__osHomedir", bare_checked!("homedir", grant, || dirs::home_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()))?;
    globals.set("__osTmpdir", bare_checked!("tmpdir", grant, || std::env::temp_dir()
        .to_string_lossy()
        .into_owned()))?;
    globals.set("__osPlatform", bare_checked!("platform", grant, || std::env::consts::OS.to_string()))?;
    globals.set("__osArch", bare_checked!("arch", grant, || std::env::consts::ARCH.to_string()))?;
    globals.set("__osHostname", bare_checked!("hostname", grant, || {
        sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string())
    }))?;

    let cpus_grant = grant.clone();
    globals.set(
        "__osCpus",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<String> {
            cpus_grant
                .check_bare(Capability::EnvRead)
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let mut sys = sysinfo::System::new();
            sys.refresh_cpu_all();
            let cpus: Vec<_> = sys
                .cpus()
                .iter()
                .map(|cpu| serde_json::json!({ "model": cpu.brand(), "speed": cpu.frequency() }))
                .collect();
            serde_json::to_string(&cpus).map_err(|err| super::throw_node_error(&ctx, "EIO", &err.to_string()))
        }),
    )?;

    let user_grant = grant.clone();
    globals.set(
        "__osUserInfo",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<String> {
            user_grant
                .check_bare(Capability::EnvRead)
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let username = std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_default();
            let home = dirs::home_dir().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
            let payload = serde_json::json!({ "username": username, "homedir": home, "shell": std::env::var("SHELL").ok() });
            serde_json::to_string(&payload).map_err(|err| super::throw_node_error(&ctx, "EIO", &err.to_string()))
        }),
    )?;

    let totalmem_grant = grant.clone();
    globals.set(
        "__osTotalMem",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<f64> {
            totalmem_grant
                .check_bare(Capability::EnvRead)
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let mut sys = sysinfo::System::new();
            sys.refresh_memory();
            Ok(sys.total_memory() as f64)
        }),
    )?;

    let freemem_grant = grant.clone();
    globals.set(
        "__osFreeMem",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<f64> {
            freemem_grant
                .check_bare(Capability::EnvRead)
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let mut sys = sysinfo::System::new();
            sys.refresh_memory();
            Ok(sys.free_memory() as f64)
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

    fn grant_with_env_read() -> CapabilityGrant {
        let mut scopes = BTreeMap::new();
        scopes.insert(Capability::EnvRead, Scope::Unrestricted);
        CapabilityGrant::new(scopes)
    }

    #[test]
    fn platform_and_arch_are_nonempty() {
        let isolate = IsolateHandle::new(&IsolateOpts { heap_ceiling_bytes: 16 * 1024 * 1024 }).expect("isolate");
        shims::install(&isolate, &grant_with_env_read()).expect("install");
        isolate
            .eval_module(
                r#"
                const os = require('os');
                if (!os.platform()) throw new Error('empty platform');
                if (!os.arch()) throw new Error('empty arch');
                "#,
                "test.js",
            )
            .expect("eval");
    }

    #[test]
    fn os_without_env_read_is_denied() {
        let isolate = IsolateHandle::new(&IsolateOpts { heap_ceiling_bytes: 16 * 1024 * 1024 }).expect("isolate");
        shims::install(&isolate, &CapabilityGrant::minimum()).expect("install");
        isolate
            .eval_module(
                r#"
                const os = require('os');
                try {
                  os.homedir();
                  throw new Error('should have thrown');
                } catch (err) {
                  if (err.code !== 'CAPABILITY_DENIED') throw err;
                }
                "#,
                "test.js",
            )
            .expect("eval");
    }
}
