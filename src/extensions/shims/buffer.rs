//! `buffer` module: `Buffer`/`Blob`, backed by a plain array of byte values
//! and four native helpers for the base64/UTF-8 conversions JS can't do on
//! its own. No capability check — these are pure data containers.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rquickjs::{Ctx, Function, Object};

pub const PRELUDE_JS: &str = r#"
(function () {
  class Buffer {
    constructor(bytes) {
      this._bytes = bytes;
    }
    static from(data, encoding) {
      if (Array.isArray(data)) return new Buffer(data.slice());
      if (data instanceof Buffer) return new Buffer(data._bytes.slice());
      const enc = encoding || 'utf-8';
      if (enc === 'base64') {
        return new Buffer(JSON.parse(__bufferBase64ToBytes(data)));
      }
      return new Buffer(__bufferUtf8ToBytes(data));
    }
    static alloc(size, fill) {
      return new Buffer(new Array(size).fill(fill || 0));
    }
    static isBuffer(value) {
      return value instanceof Buffer;
    }
    get length() {
      return this._bytes.length;
    }
    toString(encoding) {
      const enc = encoding || 'utf-8';
      if (enc === 'base64') return __bufferBytesToBase64(JSON.stringify(this._bytes));
      return __bufferBase64ToUtf8Lossy(__bufferBytesToBase64(JSON.stringify(this._bytes)));
    }
    toJSON() {
      return { type: 'Buffer', data: this._bytes.slice() };
    }
  }

  globalThis.__bufferUtf8ToBytes = function (s) {
    return JSON.parse(__bufferBase64ToBytes(__bufferUtf8ToBase64(s)));
  };

  class Blob {
    constructor(parts, options) {
      this._parts = parts || [];
      this.type = (options && options.type) || '';
    }
    get size() {
      return this._parts.reduce((n, p) => n + (p.length || 0), 0);
    }
    async text() {
      return this._parts.map((p) => (typeof p === 'string' ? p : p.toString())).join('');
    }
  }

  globalThis.__moduleRegistry.buffer = { Buffer, Blob };
  globalThis.Buffer = Buffer;
})();
"#;

/// Bind the base64/UTF-8 conversion natives the prelude calls by name.
pub fn install(ctx: &Ctx<'_>, globals: &Object<'_>, _grant: &crate::capability::CapabilityGrant) -> rquickjs::Result<()> {
    globals.set(
        "__bufferUtf8ToBase64",
        Function::new(ctx.clone(), |s: String| -> String { BASE64.encode(s.as_bytes()) }),
    )?;
    globals.set(
        "__bufferBase64ToUtf8Lossy",
        Function::new(ctx.clone(), |b64: String| -> String {
            let bytes = BASE64.decode(b64).unwrap_or_default();
            String::from_utf8_lossy(&bytes).into_owned()
        }),
    )?;
    globals.set(
        "__bufferBytesToBase64",
        Function::new(ctx.clone(), |bytes_json: String| -> String {
            let bytes: Vec<u8> = serde_json::from_str(&bytes_json).unwrap_or_default();
            BASE64.encode(bytes)
        }),
    )?;
    globals.set(
        "__bufferBase64ToBytes",
        Function::new(ctx.clone(), |b64: String| -> String {
            let bytes = BASE64.decode(b64).unwrap_or_default();
            serde_json::to_string(&bytes).unwrap_or_else(|_| "[]".to_string())
        }),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::extensions::shims;
    use crate::runtime::{IsolateHandle, IsolateOpts};

    #[test]
    fn buffer_round_trips_utf8_through_base64() {
        let isolate = IsolateHandle::new(&IsolateOpts {
            heap_ceiling_bytes: 16 * 1024 * 1024,
        })
        .expect("isolate");
        shims::install(&isolate, &crate::capability::CapabilityGrant::minimum()).expect("install");
        isolate
            .eval_module(
                r#"
                const b = Buffer.from('hello', 'utf-8');
                const encoded = b.toString('base64');
                const back = Buffer.from(encoded, 'base64').toString('utf-8');
                if (back !== 'hello') throw new Error('round trip failed: ' + back);
                "#,
                "test.js",
            )
            .expect("eval");
    }
}
