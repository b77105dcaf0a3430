//! `crypto` module: hashing, HMAC, random bytes, and UUIDs, gated by the
//! `crypto` capability (spec §4.2's "bare" row — no scope, only presence).

use crate::capability::{Capability, CapabilityGrant};
use base64::Engine;
use hmac::{Hmac, Mac};
use rquickjs::{Ctx, Function, Object};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

pub const PRELUDE_JS: &str = r#"
(function () {
  class Hash {
    constructor(algorithm) {
      this._algorithm = algorithm;
      this._chunks = [];
    }
    update(data) {
      this._chunks.push(data instanceof Buffer ? data.toString('base64') : __bufferUtf8ToBase64(data));
      return this;
    }
    digest(encoding) {
      const joined = this._chunks.join('');
      const hex = __cryptoDigest(this._algorithm, joined);
      if (encoding === 'hex' || encoding === undefined) return hex;
      return Buffer.from(hex.match(/.{2}/g).map((b) => parseInt(b, 16)));
    }
  }

  class Hmac {
    constructor(algorithm, key) {
      this._algorithm = algorithm;
      this._key = key instanceof Buffer ? key.toString('base64') : __bufferUtf8ToBase64(key);
      this._chunks = [];
    }
    update(data) {
      this._chunks.push(data instanceof Buffer ? data.toString('base64') : __bufferUtf8ToBase64(data));
      return this;
    }
    digest(encoding) {
      const joined = this._chunks.join('');
      const hex = __cryptoHmac(this._algorithm, this._key, joined);
      if (encoding === 'hex' || encoding === undefined) return hex;
      return Buffer.from(hex.match(/.{2}/g).map((b) => parseInt(b, 16)));
    }
  }

  const crypto = {
    createHash: (algorithm) => new Hash(algorithm),
    createHmac: (algorithm, key) => new Hmac(algorithm, key),
    randomBytes: (size) => Buffer.from(__cryptoRandomBytesBase64(size), 'base64'),
    randomUUID: () => __cryptoRandomUuid(),
  };

  globalThis.__moduleRegistry.crypto = crypto;
})();
"#;

fn digest_hex(algorithm: &str, input_b64: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(input_b64).ok()?;
    let hex = match algorithm {
        "sha256" => hex_encode(Sha256::digest(&bytes)),
        "sha512" => hex_encode(Sha512::digest(&bytes)),
        "sha1" => hex_encode(Sha1::digest(&bytes)),
        "md5" => hex_encode(md5::Md5::digest(&bytes)),
        _ => return None,
    };
    Some(hex)
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

pub fn install(ctx: &Ctx<'_>, globals: &Object<'_>, grant: &CapabilityGrant) -> rquickjs::Result<()> {
    let digest_grant = grant.clone();
    globals.set(
        "__cryptoDigest",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, algorithm: String, input_b64: String| -> rquickjs::Result<String> {
            digest_grant
                .check_bare(Capability::Crypto)
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            digest_hex(&algorithm, &input_b64)
                .ok_or_else(|| super::throw_node_error(&ctx, "ERR_CRYPTO_UNSUPPORTED", &format!("unsupported digest: {algorithm}")))
        }),
    )?;

    let hmac_grant = grant.clone();
    globals.set(
        "__cryptoHmac",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'_>, algorithm: String, key_b64: String, input_b64: String| -> rquickjs::Result<String> {
                hmac_grant
                    .check_bare(Capability::Crypto)
                    .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
                let key = base64::engine::general_purpose::STANDARD
                    .decode(&key_b64)
                    .map_err(|err| super::throw_node_error(&ctx, "ERR_CRYPTO", &err.to_string()))?;
                let input = base64::engine::general_purpose::STANDARD
                    .decode(&input_b64)
                    .map_err(|err| super::throw_node_error(&ctx, "ERR_CRYPTO", &err.to_string()))?;
                match algorithm.as_str() {
                    "sha256" => {
                        let mut mac = Hmac::<Sha256>::new_from_slice(&key)
                            .map_err(|err| super::throw_node_error(&ctx, "ERR_CRYPTO", &err.to_string()))?;
                        mac.update(&input);
                        Ok(hex_encode(mac.finalize().into_bytes()))
                    }
                    "sha512" => {
                        let mut mac = Hmac::<Sha512>::new_from_slice(&key)
                            .map_err(|err| super::throw_node_error(&ctx, "ERR_CRYPTO", &err.to_string()))?;
                        mac.update(&input);
                        Ok(hex_encode(mac.finalize().into_bytes()))
                    }
                    other => Err(super::throw_node_error(&ctx, "ERR_CRYPTO_UNSUPPORTED", &format!("unsupported hmac: {other}"))),
                }
            },
        ),
    )?;

    let random_grant = grant.clone();
    globals.set(
        "__cryptoRandomBytesBase64",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, size: usize| -> rquickjs::Result<String> {
            random_grant
                .check_bare(Capability::Crypto)
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            let mut buf = vec![0u8; size];
            getrandom::fill(&mut buf).map_err(|err| super::throw_node_error(&ctx, "ERR_CRYPTO", &err.to_string()))?;
            Ok(base64::engine::general_purpose::STANDARD.encode(buf))
        }),
    )?;

    let uuid_grant = grant.clone();
    globals.set(
        "__cryptoRandomUuid",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<String> {
            uuid_grant
                .check_bare(Capability::Crypto)
                .map_err(|err| super::throw_capability_denied(&ctx, &err))?;
            Ok(uuid::Uuid::new_v4().to_string())
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

    fn grant_with_crypto() -> CapabilityGrant {
        let mut scopes = BTreeMap::new();
        scopes.insert(Capability::Crypto, Scope::Unrestricted);
        CapabilityGrant::new(scopes)
    }

    #[test]
    fn sha256_digest_matches_known_vector() {
        let isolate = IsolateHandle::new(&IsolateOpts { heap_ceiling_bytes: 16 * 1024 * 1024 }).expect("isolate");
        shims::install(&isolate, &grant_with_crypto()).expect("install");
        isolate
            .eval_module(
                r#"
                const crypto = require('crypto');
                const hash = crypto.createHash('sha256').update('abc').digest('hex');
                if (hash !== 'ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad') throw new Error('bad hash: ' + hash);
                "#,
                "test.js",
            )
            .expect("eval");
    }

    #[test]
    fn crypto_denied_without_capability() {
        let isolate = IsolateHandle::new(&IsolateOpts { heap_ceiling_bytes: 16 * 1024 * 1024 }).expect("isolate");
        shims::install(&isolate, &CapabilityGrant::minimum()).expect("install");
        isolate
            .eval_module(
                r#"
                const crypto = require('crypto');
                try {
                  crypto.randomUUID();
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
