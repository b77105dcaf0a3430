//! `path`, `url`, and `querystring` modules: pure-JS, POSIX-style path math
//! and URL/query parsing built on the engine's native `URL`-less primitives.
//! No capability check, no host access.

pub const PRELUDE_JS: &str = r#"
(function () {
  const sep = '/';

  function normalizeParts(path) {
    const absolute = path.startsWith(sep);
    const parts = path.split(sep).filter((p) => p.length > 0 && p !== '.');
    const stack = [];
    for (const part of parts) {
      if (part === '..') {
        if (stack.length > 0 && stack[stack.length - 1] !== '..') stack.pop();
        else if (!absolute) stack.push('..');
      } else {
        stack.push(part);
      }
    }
    const joined = stack.join(sep);
    return (absolute ? sep : '') + joined;
  }

  const path = {
    sep,
    join(...parts) {
      const joined = parts.filter((p) => p.length > 0).join(sep);
      return joined.length > 0 ? normalizeParts(joined) : '.';
    },
    normalize(p) {
      const trailingSlash = p.endsWith(sep) && p !== sep;
      const normalized = normalizeParts(p) || '.';
      return trailingSlash && !normalized.endsWith(sep) ? normalized + sep : normalized;
    },
    resolve(...parts) {
      let resolved = '';
      for (let i = parts.length - 1; i >= 0 && !resolved.startsWith(sep); i--) {
        resolved = parts[i] + sep + resolved;
      }
      if (!resolved.startsWith(sep)) resolved = sep + resolved;
      return normalizeParts(resolved) || sep;
    },
    dirname(p) {
      const idx = p.lastIndexOf(sep);
      if (idx < 0) return '.';
      if (idx === 0) return sep;
      return p.slice(0, idx);
    },
    basename(p, ext) {
      const idx = p.lastIndexOf(sep);
      let base = idx < 0 ? p : p.slice(idx + 1);
      if (ext && base.endsWith(ext) && base !== ext) base = base.slice(0, base.length - ext.length);
      return base;
    },
    extname(p) {
      const base = path.basename(p);
      const idx = base.lastIndexOf('.');
      if (idx <= 0) return '';
      return base.slice(idx);
    },
    isAbsolute(p) {
      return p.startsWith(sep);
    },
    relative(from, to) {
      const fromParts = normalizeParts(from).split(sep).filter(Boolean);
      const toParts = normalizeParts(to).split(sep).filter(Boolean);
      let common = 0;
      while (common < fromParts.length && common < toParts.length && fromParts[common] === toParts[common]) {
        common++;
      }
      const ups = fromParts.length - common;
      const down = toParts.slice(common);
      return new Array(ups).fill('..').concat(down).join(sep) || '.';
    },
    parse(p) {
      return {
        root: p.startsWith(sep) ? sep : '',
        dir: path.dirname(p),
        base: path.basename(p),
        ext: path.extname(p),
        name: path.basename(p, path.extname(p)),
      };
    },
  };

  function parseQuery(qs) {
    const out = {};
    if (!qs) return out;
    for (const pair of qs.split('&')) {
      if (!pair) continue;
      const eq = pair.indexOf('=');
      const key = decodeURIComponent(eq < 0 ? pair : pair.slice(0, eq));
      const value = eq < 0 ? '' : decodeURIComponent(pair.slice(eq + 1));
      if (Object.prototype.hasOwnProperty.call(out, key)) {
        out[key] = Array.isArray(out[key]) ? out[key].concat(value) : [out[key], value];
      } else {
        out[key] = value;
      }
    }
    return out;
  }

  function stringifyQuery(obj) {
    const parts = [];
    for (const key of Object.keys(obj || {})) {
      const value = obj[key];
      const values = Array.isArray(value) ? value : [value];
      for (const v of values) parts.push(`${encodeURIComponent(key)}=${encodeURIComponent(v)}`);
    }
    return parts.join('&');
  }

  const querystring = { parse: parseQuery, stringify: stringifyQuery };

  const URL_RE = /^([a-zA-Z][a-zA-Z0-9+.-]*:)\/\/([^/?#]*)([^?#]*)(\?[^#]*)?(#.*)?$/;

  function splitHost(authority) {
    const at = authority.lastIndexOf('@');
    const hostport = at >= 0 ? authority.slice(at + 1) : authority;
    const colon = hostport.lastIndexOf(':');
    if (colon >= 0 && /^\d+$/.test(hostport.slice(colon + 1))) {
      return { hostname: hostport.slice(0, colon), port: hostport.slice(colon + 1) };
    }
    return { hostname: hostport, port: '' };
  }

  const url = {
    parse(input) {
      const match = URL_RE.exec(input);
      if (!match) throw new Error('invalid url: ' + input);
      const [, protocol, authority, pathname, search, hash] = match;
      const { hostname, port } = splitHost(authority);
      return {
        href: input,
        protocol,
        host: authority,
        hostname,
        port,
        pathname: pathname || '/',
        search: search || '',
        hash: hash || '',
        query: parseQuery((search || '').replace(/^\?/, '')),
      };
    },
    format(components) {
      const search = components.search || (components.query ? `?${stringifyQuery(components.query)}` : '');
      return `${components.protocol}//${components.host}${components.pathname || ''}${search}${components.hash || ''}`;
    },
  };

  globalThis.__moduleRegistry.path = path;
  globalThis.__moduleRegistry.url = url;
  globalThis.__moduleRegistry.querystring = querystring;
})();
"#;
