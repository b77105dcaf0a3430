//! `net.fetch` connector: the host side of the `fetch`/`http`/`https` shim
//! (spec §4.2). Gated by `net.fetch` host allow-lists, follows redirects up
//! to a configurable ceiling, and buffers the response body into a single
//! chunk mimicking the web `Response` the JS side constructs from it.
//!
//! Grounded on the teacher's reqwest-based streaming client in spirit (a
//! single shared `reqwest::Client`, explicit user agent) but scoped down:
//! this host has no provider-streaming or VCR-replay concerns, only a
//! capability-gated proxy for extension code.

use crate::capability::{Capability, CapabilityGrant};
use crate::connectors::{
    Connector, HostCallErrorCode, HostCallPayload, HostResultPayload, host_result_err,
    host_result_err_with_details, host_result_ok,
};
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_USER_AGENT: &str = concat!("ext-hostd/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchParams {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: Vec<(String, String)>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    max_redirects: usize,
}

impl HttpConnector {
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(20)
    }

    #[must_use]
    pub fn new(max_redirects: usize) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .build()
            .expect("build reqwest client");
        Self { client, max_redirects }
    }

    #[must_use]
    pub const fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    /// Perform a capability-checked fetch, returning a `Response`-shaped
    /// JSON value: `{status, headers, body}` with `body` as a UTF-8 string
    /// (spec §4.2: "streams are chunk-buffered into JS `Response`").
    pub async fn fetch(&self, grant: &CapabilityGrant, params: &FetchParamsIn<'_>) -> Result<serde_json::Value> {
        let url = reqwest::Url::parse(params.url)
            .map_err(|e| crate::error::Error::InvalidRequest(format!("invalid URL: {e}")))?;
        let host = url.host_str().unwrap_or_default();
        grant.check_host(Capability::NetFetch, host)?;

        let method = reqwest::Method::from_bytes(params.method.unwrap_or("GET").as_bytes())
            .map_err(|e| crate::error::Error::InvalidRequest(format!("invalid method: {e}")))?;
        let mut request = self.client.request(method, url);
        for (key, value) in params.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = params.body {
            request = request.body(body.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| crate::error::Error::Internal(format!("fetch failed: {e}")))?;
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| crate::error::Error::Internal(format!("read body failed: {e}")))?;

        Ok(json!({ "status": status, "headers": headers, "body": body }))
    }
}

pub struct FetchParamsIn<'a> {
    pub url: &'a str,
    pub method: Option<&'a str>,
    pub headers: &'a [(String, String)],
    pub body: Option<&'a String>,
}

#[async_trait]
impl Connector for HttpConnector {
    fn capability(&self) -> &'static str {
        "net.fetch"
    }

    async fn dispatch(&self, call: &HostCallPayload) -> Result<HostResultPayload> {
        let params: FetchParams = match serde_json::from_value(call.params.clone()) {
            Ok(p) => p,
            Err(e) => {
                return Ok(host_result_err(
                    &call.call_id,
                    HostCallErrorCode::InvalidRequest,
                    format!("bad fetch params: {e}"),
                    Some(false),
                ));
            }
        };

        // The dispatcher supplies the grant via `call.context`; absence means
        // the caller never attached one, which is a host bug, not a denial.
        let grant: CapabilityGrant = match call
            .context
            .as_ref()
            .and_then(|c| c.get("grant"))
            .cloned()
            .map(serde_json::from_value)
        {
            Some(Ok(grant)) => grant,
            _ => {
                return Ok(host_result_err(
                    &call.call_id,
                    HostCallErrorCode::Internal,
                    "missing capability grant in hostcall context",
                    None,
                ));
            }
        };

        let fetch_params = FetchParamsIn {
            url: &params.url,
            method: params.method.as_deref(),
            headers: &params.headers,
            body: params.body.as_ref(),
        };

        match self.fetch(&grant, &fetch_params).await {
            Ok(value) => Ok(host_result_ok(&call.call_id, value)),
            Err(err @ crate::error::Error::CapabilityDenied { .. }) => Ok(host_result_err_with_details(
                &call.call_id,
                HostCallErrorCode::Denied,
                err.to_string(),
                json!({ "code": err.code() }),
                Some(false),
            )),
            Err(err) => Ok(host_result_err(
                &call.call_id,
                HostCallErrorCode::Io,
                err.to_string(),
                Some(true),
            )),
        }
    }
}
