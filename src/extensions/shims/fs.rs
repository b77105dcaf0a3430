//! `fs` module: synchronous, capability-gated filesystem access.
//!
//! Every native function resolves its path through the same
//! `safe_canonicalize`/`strip_unc_prefix` primitive the host itself uses for
//! scope checks, then consults the grant before touching disk. Node's async
//! variants (`fs.readFile`, ...) are JS-side wrappers around the sync
//! natives that resolve/reject a `Promise` on the next microtask — this
//! isolate has no thread pool to overlap real I/O on, so "async" here means
//! "same call, Promise-shaped".

use crate::capability::{Capability, CapabilityGrant};
use crate::extensions::path::safe_canonicalize;
use rquickjs::{Ctx, Function, Object};
use std::path::PathBuf;

pub const PRELUDE_JS: &str = r#"
(function () {
  function promisify(fn) {
    return function (...args) {
      return new Promise((resolve, reject) => {
        try {
          resolve(fn(...args));
        } catch (err) {
          reject(err);
        }
      });
    };
  }

  function readFileSync(path, options) {
    const encoding = typeof options === 'string' ? options : options && options.encoding;
    const raw = __fsReadFileSync(path, encoding || null);
    if (encoding) return raw;
    return Buffer.from(raw, 'base64');
  }

  function writeFileSync(path, data, options) {
    const encoding = typeof options === 'string' ? options : options && options.encoding;
    if (data instanceof Buffer) {
      __fsWriteFileSync(path, data.toString('base64'), 'base64');
      return;
    }
    __fsWriteFileSync(path, data, encoding || 'utf-8');
  }

  function appendFileSync(path, data, options) {
    const encoding = typeof options === 'string' ? options : options && options.encoding;
    if (data instanceof Buffer) {
      __fsAppendFileSync(path, data.toString('base64'), 'base64');
      return;
    }
    __fsAppendFileSync(path, data, encoding || 'utf-8');
  }

  function readdirSync(path) {
    return JSON.parse(__fsReaddirSync(path));
  }

  function statSync(path) {
    const raw = JSON.parse(__fsStatSync(path));
    return {
      ...raw,
      isFile: () => raw.isFile,
      isDirectory: () => raw.isDirectory,
    };
  }

  function lstatSync(path) {
    const raw = JSON.parse(__fsLstatSync(path));
    return {
      ...raw,
      isFile: () => raw.isFile,
      isDirectory: () => raw.isDirectory,
      isSymbolicLink: () => raw.isSymbolicLink,
    };
  }

  function rmSync(path, options) {
    const opts = options || {};
    __fsRmSync(path, Boolean(opts.recursive), Boolean(opts.force));
  }

  function realpathSync(path) {
    return __fsRealpathSync(path);
  }

  function accessSync(path, mode) {
    __fsAccessSync(path, mode || 0);
  }

  function renameSync(oldPath, newPath) {
    __fsRenameSync(oldPath, newPath);
  }

  const fs = {
    readFileSync,
    writeFileSync,
    appendFileSync,
    existsSync: __fsExistsSync,
    mkdirSync: (path, options) => __fsMkdirSync(path, Boolean(options && options.recursive)),
    readdirSync,
    statSync,
    lstatSync,
    realpathSync,
    accessSync,
    renameSync,
    rmSync,
    // Node renamed `unlinkSync` to `rmSync`; kept as an alias for callers
    // still importing the old name.
    unlinkSync: rmSync,
    readFile: promisify(readFileSync),
    writeFile: promisify(writeFileSync),
    appendFile: promisify(appendFileSync),
    readdir: promisify(readdirSync),
    stat: promisify(statSync),
    lstat: promisify(lstatSync),
    realpath: promisify(realpathSync),
    access: promisify(accessSync),
    rename: promisify(renameSync),
    rm: promisify(rmSync),
    unlink: promisify(rmSync),
    promises: {
      readFile: promisify(readFileSync),
      writeFile: promisify(writeFileSync),
      appendFile: promisify(appendFileSync),
      readdir: promisify(readdirSync),
      stat: promisify(statSync),
      lstat: promisify(lstatSync),
      realpath: promisify(realpathSync),
      access: promisify(accessSync),
      rename: promisify(renameSync),
      rm: promisify(rmSync),
      unlink: promisify(rmSync),
    },
  };

  globalThis.__moduleRegistry.fs = fs;
})();
"#;

fn resolve(path: &str) -> PathBuf {
    safe_canonicalize(&PathBuf::from(path))
}

fn is_utf8_encoding(encoding: Option<&str>) -> bool {
    matches!(encoding, Some("utf-8" | "utf8"))
}

pub fn install(ctx: &Ctx<'_>, globals: &Object<'_>, grant: &CapabilityGrant) -> rquickjs::Result<()> {
    let read_grant = grant.clone();
    globals.set(
        "__fsReadFileSync",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, path: String, encoding: Option<String>| -> rquickjs::Result<String> {
            let canonical = resolve(&path);
            let scoped = canonical.to_string_lossy().into_owned();
            read_grant
                .check_path(Capability::FsRead, &scoped)
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let bytes = std::fs::read(&canonical).map_err(|err| {
                super::throw_node_error(&ctx, super::node_io_code(&err), &format!("{path}: {err}"))
            })?;
            if is_utf8_encoding(encoding.as_deref()) {
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            } else {
                use base64::Engine;
                Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        }),
    )?;

    let write_grant = grant.clone();
    globals.set(
        "__fsWriteFileSync",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, path: String, data: String, encoding: Option<String>| -> rquickjs::Result<()> {
            let canonical = resolve(&path);
            let scoped = canonical.to_string_lossy().into_owned();
            write_grant
                .check_path(Capability::FsWrite, &scoped)
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let bytes = if encoding.as_deref() == Some("base64") {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(&data)
                    .map_err(|err| super::throw_node_error(&ctx, "EINVAL", &err.to_string()))?
            } else {
                data.into_bytes()
            };
            std::fs::write(&canonical, bytes).map_err(|err| {
                super::throw_node_error(&ctx, super::node_io_code(&err), &format!("{path}: {err}"))
            })
        }),
    )?;

    let exists_grant = grant.clone();
    globals.set(
        "__fsExistsSync",
        Function::new(ctx.clone(), move |path: String| -> bool {
            let canonical = resolve(&path);
            exists_grant
                .check_path(Capability::FsRead, &canonical.to_string_lossy())
                .is_ok()
                && canonical.exists()
        }),
    )?;

    let mkdir_grant = grant.clone();
    globals.set(
        "__fsMkdirSync",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, path: String, recursive: bool| -> rquickjs::Result<()> {
            let canonical = resolve(&path);
            mkdir_grant
                .check_path(Capability::FsWrite, &canonical.to_string_lossy())
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let result = if recursive {
                std::fs::create_dir_all(&canonical)
            } else {
                std::fs::create_dir(&canonical)
            };
            result.map_err(|err| super::throw_node_error(&ctx, super::node_io_code(&err), &format!("{path}: {err}")))
        }),
    )?;

    let readdir_grant = grant.clone();
    globals.set(
        "__fsReaddirSync",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, path: String| -> rquickjs::Result<String> {
            let canonical = resolve(&path);
            readdir_grant
                .check_path(Capability::FsRead, &canonical.to_string_lossy())
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let entries = std::fs::read_dir(&canonical)
                .map_err(|err| super::throw_node_error(&ctx, super::node_io_code(&err), &format!("{path}: {err}")))?;
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|err| super::throw_node_error(&ctx, "EIO", &err.to_string()))?;
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            serde_json::to_string(&names).map_err(|err| super::throw_node_error(&ctx, "EIO", &err.to_string()))
        }),
    )?;

    let stat_grant = grant.clone();
    globals.set(
        "__fsStatSync",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, path: String| -> rquickjs::Result<String> {
            let canonical = resolve(&path);
            stat_grant
                .check_path(Capability::FsRead, &canonical.to_string_lossy())
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let meta = std::fs::metadata(&canonical)
                .map_err(|err| super::throw_node_error(&ctx, super::node_io_code(&err), &format!("{path}: {err}")))?;
            let mtime_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0.0, |d| d.as_secs_f64() * 1000.0);
            let payload = serde_json::json!({
                "isFile": meta.is_file(),
                "isDirectory": meta.is_dir(),
                "size": meta.len(),
                "mtimeMs": mtime_ms,
            });
            serde_json::to_string(&payload).map_err(|err| super::throw_node_error(&ctx, "EIO", &err.to_string()))
        }),
    )?;

    let append_grant = grant.clone();
    globals.set(
        "__fsAppendFileSync",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, path: String, data: String, encoding: Option<String>| -> rquickjs::Result<()> {
            let canonical = resolve(&path);
            let scoped = canonical.to_string_lossy().into_owned();
            append_grant
                .check_path(Capability::FsWrite, &scoped)
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let bytes = if encoding.as_deref() == Some("base64") {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(&data)
                    .map_err(|err| super::throw_node_error(&ctx, "EINVAL", &err.to_string()))?
            } else {
                data.into_bytes()
            };
            use std::io::Write;
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&canonical)
                .and_then(|mut file| file.write_all(&bytes))
                .map_err(|err| super::throw_node_error(&ctx, super::node_io_code(&err), &format!("{path}: {err}")))
        }),
    )?;

    let rm_grant = grant.clone();
    globals.set(
        "__fsRmSync",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, path: String, recursive: bool, force: bool| -> rquickjs::Result<()> {
            let canonical = resolve(&path);
            rm_grant
                .check_path(Capability::FsWrite, &canonical.to_string_lossy())
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let result = if recursive {
                std::fs::remove_dir_all(&canonical)
            } else if canonical.is_dir() {
                std::fs::remove_dir(&canonical)
            } else {
                std::fs::remove_file(&canonical)
            };
            match result {
                Ok(()) => Ok(()),
                Err(err) if force && err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(super::throw_node_error(&ctx, super::node_io_code(&err), &format!("{path}: {err}"))),
            }
        }),
    )?;

    let lstat_grant = grant.clone();
    globals.set(
        "__fsLstatSync",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, path: String| -> rquickjs::Result<String> {
            let canonical = resolve(&path);
            lstat_grant
                .check_path(Capability::FsRead, &canonical.to_string_lossy())
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let meta = std::fs::symlink_metadata(&canonical)
                .map_err(|err| super::throw_node_error(&ctx, super::node_io_code(&err), &format!("{path}: {err}")))?;
            let mtime_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0.0, |d| d.as_secs_f64() * 1000.0);
            let payload = serde_json::json!({
                "isFile": meta.is_file(),
                "isDirectory": meta.is_dir(),
                "isSymbolicLink": meta.file_type().is_symlink(),
                "size": meta.len(),
                "mtimeMs": mtime_ms,
            });
            serde_json::to_string(&payload).map_err(|err| super::throw_node_error(&ctx, "EIO", &err.to_string()))
        }),
    )?;

    let realpath_grant = grant.clone();
    globals.set(
        "__fsRealpathSync",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, path: String| -> rquickjs::Result<String> {
            let canonical = resolve(&path);
            realpath_grant
                .check_path(Capability::FsRead, &canonical.to_string_lossy())
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            std::fs::canonicalize(&canonical)
                .map(|p| p.to_string_lossy().into_owned())
                .map_err(|err| super::throw_node_error(&ctx, super::node_io_code(&err), &format!("{path}: {err}")))
        }),
    )?;

    let access_grant = grant.clone();
    globals.set(
        "__fsAccessSync",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, path: String, mode: i32| -> rquickjs::Result<()> {
            let canonical = resolve(&path);
            let capability = if mode & 2 != 0 { Capability::FsWrite } else { Capability::FsRead };
            access_grant
                .check_path(capability, &canonical.to_string_lossy())
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            if canonical.exists() {
                Ok(())
            } else {
                Err(super::throw_node_error(&ctx, "ENOENT", &format!("{path}: not found")))
            }
        }),
    )?;

    let rename_grant = grant.clone();
    globals.set(
        "__fsRenameSync",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, old_path: String, new_path: String| -> rquickjs::Result<()> {
            let canonical_old = resolve(&old_path);
            let canonical_new = resolve(&new_path);
            rename_grant
                .check_path(Capability::FsWrite, &canonical_old.to_string_lossy())
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            rename_grant
                .check_path(Capability::FsWrite, &canonical_new.to_string_lossy())
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            std::fs::rename(&canonical_old, &canonical_new).map_err(|err| {
                super::throw_node_error(&ctx, super::node_io_code(&err), &format!("{old_path} -> {new_path}: {err}"))
            })
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

    fn grant_for(dir: &std::path::Path) -> CapabilityGrant {
        let mut scopes = BTreeMap::new();
        let prefix = format!("{}/**", dir.to_string_lossy());
        scopes.insert(Capability::FsRead, Scope::PathPrefixes(vec![prefix.clone()]));
        scopes.insert(Capability::FsWrite, Scope::PathPrefixes(vec![prefix]));
        CapabilityGrant::new(scopes)
    }

    #[test]
    fn write_then_read_round_trips_utf8() {
        let dir = tempfile::tempdir().expect("tempdir");
        let canonical_dir = std::fs::canonicalize(dir.path()).expect("canonicalize");
        let file = canonical_dir.join("note.txt");

        let isolate = IsolateHandle::new(&IsolateOpts { heap_ceiling_bytes: 16 * 1024 * 1024 }).expect("isolate");
        shims::install(&isolate, &grant_for(&canonical_dir)).expect("install");
        isolate
            .eval_module(
                &format!(
                    r#"
                    const fs = require('fs');
                    fs.writeFileSync('{path}', 'hello world');
                    const back = fs.readFileSync('{path}', 'utf-8');
                    if (back !== 'hello world') throw new Error('bad read: ' + back);
                    if (!fs.existsSync('{path}')) throw new Error('should exist');
                    "#,
                    path = file.to_string_lossy()
                ),
                "test.js",
            )
            .expect("eval");
    }

    #[test]
    fn append_rm_rename_and_realpath_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let canonical_dir = std::fs::canonicalize(dir.path()).expect("canonicalize");
        let file = canonical_dir.join("note.txt");
        let renamed = canonical_dir.join("renamed.txt");

        let isolate = IsolateHandle::new(&IsolateOpts { heap_ceiling_bytes: 16 * 1024 * 1024 }).expect("isolate");
        shims::install(&isolate, &grant_for(&canonical_dir)).expect("install");
        isolate
            .eval_module(
                &format!(
                    r#"
                    const fs = require('fs');
                    fs.writeFileSync('{file}', 'hello');
                    fs.appendFileSync('{file}', ' world');
                    if (fs.readFileSync('{file}', 'utf-8') !== 'hello world') throw new Error('append failed');
                    if (!fs.lstatSync('{file}').isFile()) throw new Error('lstat failed');
                    const real = fs.realpathSync('{file}');
                    if (!real.endsWith('note.txt')) throw new Error('bad realpath: ' + real);
                    fs.accessSync('{file}');
                    fs.renameSync('{file}', '{renamed}');
                    if (!fs.existsSync('{renamed}')) throw new Error('rename failed');
                    fs.rmSync('{renamed}');
                    if (fs.existsSync('{renamed}')) throw new Error('rm failed');
                    "#,
                    file = file.to_string_lossy(),
                    renamed = renamed.to_string_lossy(),
                ),
                "test.js",
            )
            .expect("eval");
    }

    #[test]
    fn read_outside_scope_throws_capability_denied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let canonical_dir = std::fs::canonicalize(dir.path()).expect("canonicalize");

        let isolate = IsolateHandle::new(&IsolateOpts { heap_ceiling_bytes: 16 * 1024 * 1024 }).expect("isolate");
        shims::install(&isolate, &grant_for(&canonical_dir)).expect("install");
        let err = isolate
            .eval_module(
                r#"
                const fs = require('fs');
                try {
                  fs.readFileSync('/etc/passwd', 'utf-8');
                  throw new Error('should have thrown');
                } catch (err) {
                  if (err.code !== 'CAPABILITY_DENIED') throw err;
                }
                "#,
                "test.js",
            );
        err.expect("eval should not raise to rust side");
    }
}
