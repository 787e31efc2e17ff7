//! Protocol adapters.
//!
//! Defines the `ProtocolAdapter` trait and provides:
//! - DefiLlama yields adapter (filtering, normalization, risk scoring)
//! - Upstream seams (pool listing, logo lookup) with HTTP implementations
//! - Retry / timeout / rate-limit plumbing shared by adapters
//! - Demo data served when the upstream is unavailable

pub mod defillama;
pub mod mock;
pub mod retry;
pub mod upstream;

use async_trait::async_trait;

use crate::types::{MappingError, Opportunity, ProtocolInfo, YieldError};

/// Abstraction over yield data sources.
///
/// Every call builds a fresh snapshot; nothing is cached between calls.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Adapter name for logging and error context.
    fn name(&self) -> &str;

    /// Copy of the adapter's static configuration.
    fn protocol_info(&self) -> ProtocolInfo;

    /// Filtered, normalized opportunities sorted by TVL (descending).
    async fn list(&self) -> Result<Vec<Opportunity>, YieldError>;

    /// A single opportunity by id.
    ///
    /// There is no single-item upstream endpoint, so this runs a full
    /// `list` and picks the match.
    async fn detail(&self, id: &str) -> Result<Opportunity, YieldError>;

    /// Message of the most recent exhausted upstream call, if any.
    fn last_error(&self) -> Option<String>;

    fn clear_error(&self);
}

/// A record dropped during normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFailure {
    pub project: Option<String>,
    pub error: MappingError,
}

/// One `list` pass with the per-record failures kept apart.
#[derive(Debug, Clone, Default)]
pub struct ListReport {
    pub opportunities: Vec<Opportunity>,
    pub failures: Vec<RecordFailure>,
}
