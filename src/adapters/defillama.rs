//! DefiLlama yields adapter.
//!
//! Pulls the full pool list from the yields API, keeps allow-listed
//! protocols on the adapter's chain above the TVL floor, normalizes each
//! record into an `Opportunity`, and sorts by TVL. Records that cannot be
//! normalized are reported and dropped without failing the batch. Logos
//! are looked up once per distinct project.
//!
//! Rate limit: 300 requests/minute (public tier)
//! Auth: none for reads; optional `x-api-key` for the pro tier.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::retry::{LastError, RateLimiter, RetryPolicy};
use super::upstream::{default_logo, LogoResolver, PoolSource};
use super::{ListReport, ProtocolAdapter, RecordFailure};
use crate::risk;
use crate::types::{
    Chain, EnrichmentError, MappingError, Opportunity, ProtocolInfo, RateLimit, Source,
    YieldError,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const ADAPTER_NAME: &str = "defillama-stellar";
pub const DEFAULT_BASE_URL: &str = "https://yields.llama.fi";

/// Pools at or below this TVL are ignored.
pub const DEFAULT_MIN_TVL_USD: f64 = 1000.0;

pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 300;

/// Logo lookups in flight at once during one `list`.
const LOGO_LOOKUP_CONCURRENCY: usize = 4;

/// Static settings for one adapter instance.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub name: String,
    pub chain: Chain,
    pub base_url: String,
    /// Project slugs to keep. Empty keeps everything.
    pub protocols: Vec<String>,
    pub min_tvl_usd: f64,
    pub requests_per_minute: u32,
    pub retry: RetryPolicy,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            name: ADAPTER_NAME.to_string(),
            chain: Chain::Stellar,
            base_url: DEFAULT_BASE_URL.to_string(),
            protocols: Vec::new(),
            min_tvl_usd: DEFAULT_MIN_TVL_USD,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            retry: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// API response types (yields JSON → Rust)
// ---------------------------------------------------------------------------

/// One pool record. Everything is optional; absent numbers read as 0.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPool {
    #[serde(default)]
    chain: Option<String>,
    #[serde(default)]
    project: Option<String>,
    /// Token symbols joined by `-`, e.g. "USDC-XLM".
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    tvl_usd: Option<f64>,
    #[serde(default)]
    apy: Option<f64>,
    #[serde(default)]
    apy_base: Option<f64>,
    #[serde(default)]
    apy_reward: Option<f64>,
    #[serde(default)]
    underlying_tokens: Option<Vec<String>>,
    /// Upstream pool identifier (uuid).
    #[serde(default)]
    pool: Option<String>,
    #[serde(default)]
    volume_usd1d: Option<f64>,
}

fn project_of(record: &Value) -> Option<&str> {
    record.get("project").and_then(Value::as_str)
}

fn chain_of(record: &Value) -> Option<&str> {
    record
        .get("chain")
        .and_then(Value::as_str)
        .filter(|c| !c.trim().is_empty())
}

fn tvl_of(record: &Value) -> f64 {
    record.get("tvlUsd").and_then(Value::as_f64).unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Simple annual rate implied by a daily-compounded APY (both in percent).
pub fn apr_from_apy(apy: f64) -> f64 {
    if apy <= 0.0 {
        return 0.0;
    }
    ((1.0 + apy / 100.0).powf(1.0 / 365.0) - 1.0) * 365.0 * 100.0
}

/// Token symbols: the `symbol` field split on `-`, falling back to
/// `underlyingTokens`.
fn token_symbols(raw: &RawPool) -> Vec<String> {
    let clean = |s: &str| {
        let t = s.trim().to_uppercase();
        (!t.is_empty()).then_some(t)
    };

    let from_symbol: Vec<String> = raw
        .symbol
        .as_deref()
        .unwrap_or_default()
        .split('-')
        .filter_map(clean)
        .collect();
    if !from_symbol.is_empty() {
        return from_symbol;
    }

    raw.underlying_tokens
        .iter()
        .flatten()
        .filter_map(|t| clean(t.as_str()))
        .collect()
}

fn opportunity_id(project: &str, primary_token: &str) -> String {
    format!("{project}-{primary_token}")
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn decode(record: Value) -> Result<RawPool, MappingError> {
    serde_json::from_value(record).map_err(|e| MappingError::Malformed(e.to_string()))
}

/// Decode and map one record. Returns the project slug for logo lookup.
fn normalize(
    record: Value,
    fetched_at: DateTime<Utc>,
) -> Result<(String, Opportunity), RecordFailure> {
    let project = project_of(&record).map(str::to_string);
    let fail = |error: MappingError| RecordFailure {
        project: project.clone(),
        error,
    };

    let raw = decode(record).map_err(&fail)?;
    let opportunity = to_opportunity(&raw, fetched_at).map_err(&fail)?;

    // to_opportunity already rejected records without a project
    let slug = raw.project.as_deref().unwrap_or_default().trim().to_string();
    Ok((slug, opportunity))
}

/// Build the normalized record. Logo is attached by the caller.
fn to_opportunity(raw: &RawPool, fetched_at: DateTime<Utc>) -> Result<Opportunity, MappingError> {
    let chain: Chain = raw
        .chain
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .ok_or(MappingError::MissingChain)?
        .parse()?;

    let project = raw
        .project
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| MappingError::Malformed("record has no project".to_string()))?;

    let tokens = token_symbols(raw);
    let primary = tokens.first().ok_or(MappingError::NoTokens)?;

    let apy = raw
        .apy
        .or_else(|| match (raw.apy_base, raw.apy_reward) {
            (None, None) => None,
            (base, reward) => Some(base.unwrap_or(0.0) + reward.unwrap_or(0.0)),
        })
        .unwrap_or(0.0)
        .max(0.0);
    let tvl_usd = raw.tvl_usd.unwrap_or(0.0).max(0.0);
    let stablecoin = risk::is_stablecoin_pair(&tokens);

    Ok(Opportunity {
        id: opportunity_id(project, primary),
        chain,
        protocol: project.to_uppercase(),
        pool: tokens.join("-"),
        apr: apr_from_apy(apy),
        apy,
        apy_base: raw.apy_base,
        apy_reward: raw.apy_reward,
        tvl_usd,
        risk: risk::calculate_risk(apy, tvl_usd, stablecoin),
        source: Source::Api,
        last_updated: fetched_at,
        pool_id: raw.pool.clone(),
        underlying_tokens: raw.underlying_tokens.clone(),
        volume_24h: raw.volume_usd1d,
        fees_24h: None,
        logo_url: None,
        exposure: Some(risk::classify_exposure(&tokens)),
        il_risk: Some(risk::classify_il_risk(&tokens)),
        stablecoin: Some(stablecoin),
        tokens,
    })
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Yields API adapter for one allow-list of protocols.
pub struct DefiLlamaAdapter {
    settings: AdapterSettings,
    source: Arc<dyn PoolSource>,
    logos: Arc<dyn LogoResolver>,
    limiter: RateLimiter,
    last_error: LastError,
    last_fetch: Mutex<Option<DateTime<Utc>>>,
}

impl DefiLlamaAdapter {
    pub fn new(
        settings: AdapterSettings,
        source: Arc<dyn PoolSource>,
        logos: Arc<dyn LogoResolver>,
    ) -> Self {
        let limiter = RateLimiter::per_minute(settings.requests_per_minute);
        Self {
            settings,
            source,
            logos,
            limiter,
            last_error: LastError::default(),
            last_fetch: Mutex::new(None),
        }
    }

    /// Same upstream and settings, different allow-list.
    pub fn for_protocols(&self, protocols: Vec<String>) -> Self {
        let settings = AdapterSettings {
            protocols,
            ..self.settings.clone()
        };
        Self::new(settings, Arc::clone(&self.source), Arc::clone(&self.logos))
    }

    /// Run the full pipeline and keep failed records visible.
    pub async fn list_with_report(&self) -> Result<ListReport, YieldError> {
        let records = self.fetch_records().await?;
        let received = records.len();

        let (on_chain, off_chain): (Vec<Value>, Vec<Value>) =
            records.into_iter().partition(|r| self.on_chain(r));
        let candidates: Vec<Value> = on_chain
            .into_iter()
            .filter(|r| self.allows(r))
            .filter(|r| tvl_of(r) > self.settings.min_tvl_usd)
            .collect();

        debug!(
            adapter = %self.settings.name,
            received,
            other_chains = off_chain.len(),
            kept = candidates.len(),
            "Pool records filtered"
        );

        let fetched_at = self.stamp();
        let mut report = ListReport::default();
        let mut slugs = Vec::new();
        for record in candidates {
            match normalize(record, fetched_at) {
                Ok((slug, opportunity)) => {
                    slugs.push(slug);
                    report.opportunities.push(opportunity);
                }
                Err(failure) => {
                    warn!(
                        adapter = %self.settings.name,
                        project = ?failure.project,
                        error = %failure.error,
                        "Dropping pool record"
                    );
                    report.failures.push(failure);
                }
            }
        }

        let logos = self.resolve_logos(&slugs).await;
        for (opportunity, slug) in report.opportunities.iter_mut().zip(&slugs) {
            opportunity.logo_url = logos.get(slug).cloned();
        }

        report
            .opportunities
            .sort_by(|a, b| b.tvl_usd.total_cmp(&a.tvl_usd));

        info!(
            adapter = %self.settings.name,
            opportunities = report.opportunities.len(),
            dropped = report.failures.len(),
            "Opportunities listed"
        );

        Ok(report)
    }

    // -- Internal helpers ------------------------------------------------

    async fn fetch_records(&self) -> Result<Vec<Value>, YieldError> {
        self.settings
            .retry
            .run_tracked(Some(&self.limiter), &self.last_error, || {
                self.source.fetch_pools()
            })
            .await
    }

    /// Records naming another chain are skipped. Chainless records go on
    /// to normalization and are reported there.
    fn on_chain(&self, record: &Value) -> bool {
        match chain_of(record) {
            Some(name) => name
                .parse::<Chain>()
                .map_or(false, |chain| chain == self.settings.chain),
            None => true,
        }
    }

    fn allows(&self, record: &Value) -> bool {
        if self.settings.protocols.is_empty() {
            return true;
        }
        match project_of(record) {
            Some(project) => self
                .settings
                .protocols
                .iter()
                .any(|p| p.eq_ignore_ascii_case(project)),
            None => false,
        }
    }

    /// Fetch timestamp that never moves backwards for this instance.
    fn stamp(&self) -> DateTime<Utc> {
        let mut last = self.last_fetch.lock().unwrap_or_else(|p| p.into_inner());
        let now = Utc::now();
        let stamp = match *last {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }

    /// One lookup per distinct project, bounded in flight.
    async fn resolve_logos(&self, slugs: &[String]) -> HashMap<String, String> {
        let distinct: HashSet<&str> = slugs.iter().map(String::as_str).collect();
        let distinct: Vec<String> = distinct.into_iter().map(str::to_string).collect();
        stream::iter(distinct)
            .map(|slug| async move {
                let logo = self.logo_for(&slug).await;
                (slug, logo)
            })
            .buffer_unordered(LOGO_LOOKUP_CONCURRENCY)
            .collect()
            .await
    }

    async fn logo_for(&self, slug: &str) -> String {
        let deadline = self.settings.retry.timeout;
        let lookup = match tokio::time::timeout(deadline, self.logos.resolve(slug)).await {
            Ok(result) => result,
            Err(_) => Err(EnrichmentError::Lookup(format!(
                "timed out after {}ms",
                deadline.as_millis()
            ))),
        };

        match lookup {
            Ok(url) => url,
            Err(e) => {
                debug!(project = slug, error = %e, "Logo lookup failed, using default");
                default_logo(slug)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProtocolAdapter trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProtocolAdapter for DefiLlamaAdapter {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn protocol_info(&self) -> ProtocolInfo {
        ProtocolInfo {
            name: self.settings.name.clone(),
            chain: self.settings.chain,
            base_url: self.settings.base_url.clone(),
            protocols: self.settings.protocols.clone(),
            min_tvl_usd: self.settings.min_tvl_usd,
            rate_limit: RateLimit {
                requests_per_minute: self.settings.requests_per_minute,
                retry_attempts: self.settings.retry.retries,
                timeout_ms: u64::try_from(self.settings.retry.timeout.as_millis())
                    .unwrap_or(u64::MAX),
            },
        }
    }

    async fn list(&self) -> Result<Vec<Opportunity>, YieldError> {
        self.list_with_report()
            .await
            .map(|report| report.opportunities)
            .map_err(|e| e.in_adapter(&self.settings.name, "list"))
    }

    async fn detail(&self, id: &str) -> Result<Opportunity, YieldError> {
        let report = self
            .list_with_report()
            .await
            .map_err(|e| e.in_adapter(&self.settings.name, "detail"))?;

        report
            .opportunities
            .into_iter()
            .find(|o| o.id == id)
            .ok_or_else(|| YieldError::NotFound(id.to_string()))
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.get()
    }

    fn clear_error(&self) {
        self.last_error.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
