//! `child_process` module: synchronous process spawning, gated by
//! `process.spawn` against the manifest's command allow-list. The `*Sync`
//! surface is native and blocks the isolate for the duration of the call;
//! `spawn` instead routes through the same `exec` hostcall queue `pi.exec`
//! uses, so the actual `tokio::process::Command` run happens off the
//! isolate thread and the extension observes it as an `EventEmitter` (spec
//! §4.3's async surface), not a blocking return.

use crate::capability::{Capability, CapabilityGrant};
use rquickjs::{Ctx, Function, Object};
use std::process::Command;

pub const PRELUDE_JS: &str = r#"
(function () {
  function splitCommand(command) {
    return command.trim().split(/\s+/);
  }

  function spawnSync(command, args, options) {
    const parts = Array.isArray(args) ? [command, ...args] : splitCommand(command);
    const raw = JSON.parse(__childProcessSpawnSync(parts[0], JSON.stringify(parts.slice(1))));
    return {
      status: raw.status,
      stdout: raw.stdout,
      stderr: raw.stderr,
      error: raw.status === null ? new Error(raw.stderr || 'spawn failed') : undefined,
    };
  }

  function execSync(command, options) {
    const result = spawnSync(command, undefined, options);
    if (result.status !== 0) {
      const err = new Error(`Command failed: ${command}\n${result.stderr}`);
      err.status = result.status;
      err.stdout = result.stdout;
      err.stderr = result.stderr;
      throw err;
    }
    return result.stdout;
  }

  function exec(command, options, callback) {
    const cb = typeof options === 'function' ? options : callback;
    Promise.resolve().then(() => {
      try {
        const stdout = execSync(command, typeof options === 'object' ? options : undefined);
        if (cb) cb(null, stdout, '');
      } catch (err) {
        if (cb) cb(err, err.stdout || '', err.stderr || '');
      }
    });
  }

  function spawn(command, args, options) {
    const opts = options || {};
    const argv = Array.isArray(args) ? args : [];
    const EventEmitter = require('events').EventEmitter;
    const child = new EventEmitter();
    child.stdout = new EventEmitter();
    child.stderr = new EventEmitter();
    child.killed = false;
    __makeHostcall({ type: 'exec' }, {
      cmd: command,
      argv,
      opts: { cwd: opts.cwd || null, env: opts.env || null },
    }).then((result) => {
      if (result.stdout) child.stdout.emit('data', result.stdout);
      if (result.stderr) child.stderr.emit('data', result.stderr);
      child.emit('exit', result.status, null);
      child.emit('close', result.status, null);
    }).catch((err) => {
      child.emit('error', err);
      child.emit('exit', null, null);
    });
    return child;
  }

  function execFileSync(file, args, options) {
    const result = spawnSync(file, Array.isArray(args) ? args : [], options);
    if (result.status !== 0) {
      const err = new Error(`Command failed: ${file}`);
      err.status = result.status;
      err.stdout = result.stdout;
      err.stderr = result.stderr;
      throw err;
    }
    return result.stdout;
  }

  function execFile(file, args, options, callback) {
    const hasArgs = Array.isArray(args);
    const cb = typeof options === 'function' ? options : (hasArgs ? callback : options);
    const opts = hasArgs && typeof options === 'object' ? options : undefined;
    Promise.resolve().then(() => {
      try {
        const stdout = execFileSync(file, hasArgs ? args : [], opts);
        if (cb) cb(null, stdout, '');
      } catch (err) {
        if (cb) cb(err, err.stdout || '', err.stderr || '');
      }
    });
  }

  globalThis.__moduleRegistry.child_process = { spawnSync, execSync, exec, spawn, execFileSync, execFile };
})();
"#;

pub fn install(ctx: &Ctx<'_>, globals: &Object<'_>, grant: &CapabilityGrant) -> rquickjs::Result<()> {
    let grant = grant.clone();
    globals.set(
        "__childProcessSpawnSync",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'_>, command: String, args_json: String| -> rquickjs::Result<String> {
                grant
                    .check_command(Capability::ProcessSpawn, &command)
                    .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
                let args: Vec<String> = serde_json::from_str(&args_json).unwrap_or_default();
                let output = Command::new(&command).args(&args).output();
                let payload = match output {
                    Ok(output) => serde_json::json!({
                        "status": output.status.code(),
                        "stdout": String::from_utf8_lossy(&output.stdout),
                        "stderr": String::from_utf8_lossy(&output.stderr),
                    }),
                    Err(err) => serde_json::json!({
                        "status": serde_json::Value::Null,
                        "stdout": "",
                        "stderr": err.to_string(),
                    }),
                };
                serde_json::to_string(&payload).map_err(|err| super::throw_node_error(&ctx, "EIO", &err.to_string()))
            },
        ),
    )?;
    Ok(())
}
