//! `http`/`https` modules and the global `fetch`: the only async shim
//! surface, routed through the existing `net.fetch` hostcall queue rather
//! than a native binding, so it shares the dispatcher's capability check and
//! single-flight bridging with the rest of the async `pi` API.

use rquickjs::{Ctx, Object};

pub const PRELUDE_JS: &str = r#"
(function () {
  function fetch(input, init) {
    const opts = init || {};
    const headers = opts.headers
      ? Object.entries(opts.headers instanceof Array ? Object.fromEntries(opts.headers) : opts.headers)
      : [];
    const body = opts.body instanceof Buffer ? opts.body.toString('utf-8') : opts.body;
    return __makeHostcall({ type: 'fetch' }, {
      url: typeof input === 'string' ? input : input.url,
      method: opts.method || 'GET',
      headers,
      body: body === undefined ? null : body,
    }).then((result) => ({
      ok: result.status >= 200 && result.status < 300,
      status: result.status,
      headers: new Map(result.headers),
      text: async () => result.body,
      json: async () => JSON.parse(result.body),
    }));
  }

  function request(urlOrOptions, optionsOrCallback, maybeCallback) {
    const hasOptions = typeof optionsOrCallback === 'object';
    const options = hasOptions ? optionsOrCallback : {};
    const callback = hasOptions ? maybeCallback : optionsOrCallback;
    const url = typeof urlOrOptions === 'string' ? urlOrOptions : urlOrOptions.url;
    const emitter = new (require('events').EventEmitter)();
    const reqBody = [];
    emitter.write = (chunk) => reqBody.push(chunk);
    emitter.end = (chunk) => {
      if (chunk) reqBody.push(chunk);
      fetch(url, { method: options.method || 'GET', headers: options.headers, body: reqBody.join('') })
        .then(async (res) => {
          const text = await res.text();
          const response = new (require('events').EventEmitter)();
          response.statusCode = res.status;
          response.headers = Object.fromEntries(res.headers);
          Promise.resolve().then(() => {
            response.emit('data', text);
            response.emit('end');
          });
          if (callback) callback(response);
          emitter.emit('response', response);
        })
        .catch((err) => emitter.emit('error', err));
    };
    return emitter;
  }

  const http = { request, get: (url, options, cb) => { const r = request(url, options, cb); r.end(); return r; } };

  globalThis.__moduleRegistry.http = http;
  globalThis.__moduleRegistry.https = http;
  globalThis.fetch = fetch;
})();
"#;

/// No native bindings of its own; the module relies entirely on
/// `__makeHostcall` and `require('events')`, both installed by other shims.
pub fn install(_ctx: &Ctx<'_>, _globals: &Object<'_>, _grant: &crate::capability::CapabilityGrant) -> rquickjs::Result<()> {
    Ok(())
}
