//! Shared types for YieldGuard.
//!
//! These types form the data model used across all modules: the
//! normalized `Opportunity` record, the enums that classify it, the
//! static adapter description, sync statistics, and the error taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// A normalized yield-bearing position.
///
/// Built fresh on every successful adapter fetch and never mutated
/// afterwards; callers replace whole collections of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    /// `{project}-{primary token}`, lowercased.
    pub id: String,
    pub chain: Chain,
    /// Upstream project slug, uppercased ("blend" → "BLEND").
    pub protocol: String,
    /// Display name, tokens joined by `-`.
    pub pool: String,
    pub tokens: Vec<String>,
    /// Simple annual rate (percent), derived from `apy`.
    pub apr: f64,
    /// Compounded annual yield (percent).
    pub apy: f64,
    pub apy_base: Option<f64>,
    pub apy_reward: Option<f64>,
    pub tvl_usd: f64,
    pub risk: RiskLevel,
    pub source: Source,
    pub last_updated: DateTime<Utc>,

    pub pool_id: Option<String>,
    pub underlying_tokens: Option<Vec<String>>,
    pub volume_24h: Option<f64>,
    pub fees_24h: Option<f64>,
    pub logo_url: Option<String>,
    pub exposure: Option<Exposure>,
    pub il_risk: Option<IlRisk>,
    pub stablecoin: Option<bool>,
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} (APY: {:.2}% | TVL: ${:.0} | risk: {})",
            self.chain, self.protocol, self.pool, self.apy, self.tvl_usd, self.risk,
        )
    }
}

impl Opportunity {
    /// Helper to build a test/sample opportunity with sensible defaults.
    #[cfg(test)]
    pub fn sample(id: &str, tvl_usd: f64) -> Self {
        Opportunity {
            id: id.to_string(),
            chain: Chain::Stellar,
            protocol: "BLEND".to_string(),
            pool: "USDC".to_string(),
            tokens: vec!["USDC".to_string()],
            apr: 5.0,
            apy: 5.13,
            apy_base: Some(5.13),
            apy_reward: None,
            tvl_usd,
            risk: RiskLevel::Low,
            source: Source::Api,
            last_updated: Utc::now(),
            pool_id: None,
            underlying_tokens: None,
            volume_24h: None,
            fees_24h: None,
            logo_url: None,
            exposure: Some(Exposure::Single),
            il_risk: Some(IlRisk::None),
            stablecoin: Some(true),
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Chains an opportunity can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Algorand,
    Ethereum,
    Solana,
    Stellar,
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::Algorand => write!(f, "algorand"),
            Chain::Ethereum => write!(f, "ethereum"),
            Chain::Solana => write!(f, "solana"),
            Chain::Stellar => write!(f, "stellar"),
        }
    }
}

/// Parse an upstream chain name (case-insensitive).
impl std::str::FromStr for Chain {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "algorand" => Ok(Chain::Algorand),
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            "solana" | "sol" => Ok(Chain::Solana),
            "stellar" | "xlm" => Ok(Chain::Stellar),
            _ => Err(MappingError::UnsupportedChain(s.to_string())),
        }
    }
}

/// Coarse risk bucket. Always derived by `risk::calculate_risk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "med")]
    Medium,
    #[serde(rename = "high")]
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "med"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Where an opportunity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Api,
    Mock,
}

/// Asset exposure of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exposure {
    Single,
    Stablecoin,
    Btc,
    Eth,
    Xlm,
    Multi,
}

/// Impermanent-loss risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IlRisk {
    None,
    Low,
    Medium,
    High,
}

// ---------------------------------------------------------------------------
// Adapter description
// ---------------------------------------------------------------------------

/// Per-adapter request limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub requests_per_minute: u32,
    pub retry_attempts: u32,
    pub timeout_ms: u64,
}

/// Static configuration of one adapter instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolInfo {
    pub name: String,
    pub chain: Chain,
    pub base_url: String,
    pub protocols: Vec<String>,
    pub min_tvl_usd: f64,
    pub rate_limit: RateLimit,
}

// ---------------------------------------------------------------------------
// Sync bookkeeping
// ---------------------------------------------------------------------------

/// Health counters for the background sync scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    /// Unix millis of the last completed cycle; 0 before the first one.
    pub last_sync: i64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    /// Completed cycles where some, but not all, work failed.
    pub partial_syncs: u64,
    /// Protocols refreshed by the most recent cycle.
    pub protocols_updated: usize,
    /// Exponential moving average of cycle duration, in milliseconds.
    pub avg_sync_time: f64,
    /// Errors from the most recent cycle only.
    pub errors: Vec<String>,
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok={} partial={} failed={} updated={} avg={:.0}ms errors={}",
            self.successful_syncs,
            self.partial_syncs,
            self.failed_syncs,
            self.protocols_updated,
            self.avg_sync_time,
            self.errors.len(),
        )
    }
}

/// Cross-protocol totals computed from the latest snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedMetrics {
    pub protocol_count: usize,
    pub opportunity_count: usize,
    pub total_tvl_usd: f64,
    /// APY weighted by TVL across every stored opportunity.
    pub tvl_weighted_apy: f64,
    pub computed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum YieldError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Opportunity not found: {0}")]
    NotFound(String),

    #[error("{adapter}.{method} failed: {source}")]
    Adapter {
        adapter: String,
        method: &'static str,
        #[source]
        source: Box<YieldError>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl YieldError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            YieldError::Network(_) | YieldError::Http { .. } | YieldError::Timeout { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            YieldError::NotFound(_) => true,
            YieldError::Adapter { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Wrap with adapter name and calling method.
    pub fn in_adapter(self, adapter: &str, method: &'static str) -> Self {
        YieldError::Adapter {
            adapter: adapter.to_string(),
            method,
            source: Box::new(self),
        }
    }
}

/// Why a single upstream record could not be normalized.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    #[error("record has no chain")]
    MissingChain,

    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("record has no token symbols")]
    NoTokens,

    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Failure of a best-effort enrichment lookup.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("logo lookup failed: {0}")]
    Lookup(String),

    #[error("no logo published for {0}")]
    Missing(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_from_str() {
        assert_eq!("Stellar".parse::<Chain>().unwrap(), Chain::Stellar);
        assert_eq!("ETHEREUM".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert_eq!("algorand".parse::<Chain>().unwrap(), Chain::Algorand);
        assert_eq!(
            "Polygon".parse::<Chain>().unwrap_err(),
            MappingError::UnsupportedChain("Polygon".to_string())
        );
    }

    #[test]
    fn test_risk_level_serializes_short_names() {
        assert_eq!(serde_json::to_string(&RiskLevel::Medium).unwrap(), "\"med\"");
        assert_eq!(serde_json::to_string(&RiskLevel::High).unwrap(), "\"high\"");
        assert_eq!(format!("{}", RiskLevel::Low), "low");
    }

    #[test]
    fn test_opportunity_serializes_camel_case() {
        let o = Opportunity::sample("blend-usdc", 50_000.0);
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["tvlUsd"], 50_000.0);
        assert_eq!(json["chain"], "stellar");
        assert_eq!(json["source"], "api");
        assert!(json.get("lastUpdated").is_some());
        assert!(json.get("ilRisk").is_some());
    }

    #[test]
    fn test_opportunity_display() {
        let o = Opportunity::sample("blend-usdc", 50_000.0);
        let s = format!("{o}");
        assert!(s.contains("BLEND"));
        assert!(s.contains("stellar"));
    }

    #[test]
    fn test_sync_stats_default_is_zeroed() {
        let s = SyncStats::default();
        assert_eq!(s.last_sync, 0);
        assert_eq!(s.successful_syncs, 0);
        assert!(s.errors.is_empty());
    }

    #[test]
    fn test_adapter_error_message_carries_context() {
        let e = YieldError::Timeout { timeout_ms: 10_000 }.in_adapter("defillama-stellar", "list");
        assert_eq!(
            format!("{e}"),
            "defillama-stellar.list failed: Request timed out after 10000 ms"
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(YieldError::Network("reset".into()).is_transient());
        assert!(YieldError::Http { status: 503, body: String::new() }.is_transient());
        assert!(YieldError::Timeout { timeout_ms: 1 }.is_transient());
        assert!(!YieldError::NotFound("x".into()).is_transient());
        assert!(!YieldError::Mapping(MappingError::MissingChain).is_transient());
    }

    #[test]
    fn test_is_not_found_through_wrapper() {
        let e = YieldError::NotFound("x".into()).in_adapter("a", "detail");
        assert!(e.is_not_found());
        assert!(!YieldError::Network("x".into()).is_not_found());
    }
}
