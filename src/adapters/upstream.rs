//! Upstream seams: the yields API pool listing and protocol logo lookup.
//!
//! Both are traits so adapters can be exercised against in-memory data.
//! The HTTP implementations treat the yields API as an opaque,
//! best-effort JSON source.
//!
//! API docs: https://defillama.com/docs/api
//! Pools:    GET {base_url}/pools  → `{ "status": "success", "data": [...] }`
//! Logos:    GET {logo_base_url}/protocol/{slug} → `{ "logo": "...", ... }`

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::types::{EnrichmentError, YieldError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const USER_AGENT: &str = "yieldguard/0.1.0 (yield-aggregator)";
const API_KEY_HEADER: &str = "x-api-key";

/// Transport-level ceiling; the retry policy enforces the real deadline.
const CLIENT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Source of raw, untyped pool records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PoolSource: Send + Sync {
    async fn fetch_pools(&self) -> Result<Vec<Value>, YieldError>;
}

/// Best-effort logo lookup for a protocol slug.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogoResolver: Send + Sync {
    async fn resolve(&self, project: &str) -> Result<String, EnrichmentError>;
}

/// Static fallback logo for a protocol slug.
pub fn default_logo(project: &str) -> String {
    let slug = project.to_lowercase();
    let name = ["blend", "aquarius", "soroswap", "phoenix", "fxdao"]
        .into_iter()
        .find(|known| slug.starts_with(known))
        .unwrap_or("default");
    format!("/logos/{name}.svg")
}

fn http_client() -> Result<Client, YieldError> {
    Client::builder()
        .timeout(std::time::Duration::from_secs(CLIENT_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| YieldError::Configuration(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// HTTP pool source
// ---------------------------------------------------------------------------

/// Pool listing over HTTP.
pub struct HttpPoolSource {
    http: Client,
    url: String,
    api_key: Option<SecretString>,
}

impl HttpPoolSource {
    pub fn new(
        base_url: &str,
        pools_path: &str,
        api_key: Option<SecretString>,
    ) -> Result<Self, YieldError> {
        if base_url.trim().is_empty() {
            return Err(YieldError::Configuration("upstream base_url is empty".into()));
        }
        Ok(Self {
            http: http_client()?,
            url: format!("{}{}", base_url.trim_end_matches('/'), pools_path),
            api_key,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Accept either a bare array or a `{ "data": [...] }` envelope.
fn extract_records(body: Value) -> Result<Vec<Value>, YieldError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(YieldError::Network(
                "response object has no `data` array".to_string(),
            )),
        },
        other => Err(YieldError::Network(format!(
            "unexpected response shape: {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl PoolSource for HttpPoolSource {
    async fn fetch_pools(&self) -> Result<Vec<Value>, YieldError> {
        debug!(url = %self.url, "Fetching yield pools");

        let mut request = self.http.get(&self.url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key.expose_secret().as_str());
        }

        let resp = request
            .send()
            .await
            .map_err(|e| YieldError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(YieldError::Http { status, body });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| YieldError::Network(format!("invalid response body: {e}")))?;

        let records = extract_records(body)?;
        debug!(count = records.len(), "Yield pools received");
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Logo resolvers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProtocolMeta {
    #[serde(default)]
    logo: Option<String>,
}

/// Reads the `logo` field of the protocol metadata endpoint.
pub struct HttpLogoResolver {
    http: Client,
    base_url: String,
}

impl HttpLogoResolver {
    pub fn new(base_url: &str) -> Result<Self, YieldError> {
        Ok(Self {
            http: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LogoResolver for HttpLogoResolver {
    async fn resolve(&self, project: &str) -> Result<String, EnrichmentError> {
        let url = format!("{}/protocol/{}", self.base_url, urlencoding::encode(project));

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EnrichmentError::Lookup(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EnrichmentError::Lookup(format!(
                "HTTP {} for {url}",
                resp.status()
            )));
        }

        let meta: ProtocolMeta = resp
            .json()
            .await
            .map_err(|e| EnrichmentError::Lookup(e.to_string()))?;

        meta.logo
            .filter(|logo| !logo.trim().is_empty())
            .ok_or_else(|| EnrichmentError::Missing(project.to_string()))
    }
}

/// Never touches the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticLogoResolver;

#[async_trait]
impl LogoResolver for StaticLogoResolver {
    async fn resolve(&self, project: &str) -> Result<String, EnrichmentError> {
        Ok(default_logo(project))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
