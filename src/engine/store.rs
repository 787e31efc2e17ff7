//! In-memory snapshot store and the adapter-backed sync target.
//!
//! Each protocol owns one snapshot that a sync replaces wholesale. Nothing
//! is persisted; a restart begins empty until the first cycle completes.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::scheduler::SyncTarget;
use crate::adapters::ProtocolAdapter;
use crate::types::{AggregatedMetrics, Opportunity};

// ---------------------------------------------------------------------------
// Snapshot store
// ---------------------------------------------------------------------------

/// The latest opportunities produced for one protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub protocol: String,
    pub opportunities: Vec<Opportunity>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct OpportunityStore {
    snapshots: RwLock<HashMap<String, Snapshot>>,
    metrics: RwLock<Option<AggregatedMetrics>>,
}

impl OpportunityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a fresh snapshot for `protocol`.
    pub async fn replace(&self, protocol: &str, opportunities: Vec<Opportunity>) {
        let snapshot = Snapshot {
            protocol: protocol.to_string(),
            opportunities,
            synced_at: Utc::now(),
        };
        self.snapshots
            .write()
            .await
            .insert(protocol.to_string(), snapshot);
    }

    pub async fn snapshot(&self, protocol: &str) -> Option<Snapshot> {
        self.snapshots.read().await.get(protocol).cloned()
    }

    pub async fn protocols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshots.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every stored opportunity, highest TVL first.
    pub async fn all(&self) -> Vec<Opportunity> {
        let snapshots = self.snapshots.read().await;
        let mut out: Vec<Opportunity> = snapshots
            .values()
            .flat_map(|s| s.opportunities.iter().cloned())
            .collect();
        out.sort_by(|a, b| b.tvl_usd.total_cmp(&a.tvl_usd));
        out
    }

    /// Recompute totals from the current snapshots and keep the result.
    pub async fn refresh_metrics(&self) -> AggregatedMetrics {
        let metrics = {
            let snapshots = self.snapshots.read().await;
            aggregate(snapshots.values())
        };
        *self.metrics.write().await = Some(metrics.clone());
        metrics
    }

    /// Totals from the last `refresh_metrics`, if any.
    pub async fn metrics(&self) -> Option<AggregatedMetrics> {
        self.metrics.read().await.clone()
    }
}

/// Cross-protocol totals. The weighted APY is 0 when nothing holds TVL.
pub fn aggregate<'a>(snapshots: impl IntoIterator<Item = &'a Snapshot>) -> AggregatedMetrics {
    let mut protocol_count = 0;
    let mut opportunity_count = 0;
    let mut total_tvl_usd = 0.0;
    let mut weighted = 0.0;

    for snapshot in snapshots {
        protocol_count += 1;
        opportunity_count += snapshot.opportunities.len();
        for o in &snapshot.opportunities {
            total_tvl_usd += o.tvl_usd;
            weighted += o.apy * o.tvl_usd;
        }
    }

    let tvl_weighted_apy = if total_tvl_usd > 0.0 {
        weighted / total_tvl_usd
    } else {
        0.0
    };

    AggregatedMetrics {
        protocol_count,
        opportunity_count,
        total_tvl_usd,
        tvl_weighted_apy,
        computed_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Sync target
// ---------------------------------------------------------------------------

/// Routes protocol syncs to registered adapters and writes into the store.
pub struct AdapterSyncTarget {
    adapters: HashMap<String, Arc<dyn ProtocolAdapter>>,
    store: Arc<OpportunityStore>,
}

impl AdapterSyncTarget {
    pub fn new(store: Arc<OpportunityStore>) -> Self {
        Self {
            adapters: HashMap::new(),
            store,
        }
    }

    /// Register `adapter` under `protocol`, replacing any previous one.
    pub fn with_adapter(mut self, protocol: &str, adapter: Arc<dyn ProtocolAdapter>) -> Self {
        self.adapters.insert(protocol.to_string(), adapter);
        self
    }

    pub fn adapter(&self, protocol: &str) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.get(protocol).cloned()
    }
}

#[async_trait]
impl SyncTarget for AdapterSyncTarget {
    async fn sync_protocol(&self, protocol: &str) -> Result<usize> {
        let adapter = self
            .adapters
            .get(protocol)
            .ok_or_else(|| anyhow!("no adapter registered"))?;

        let opportunities = adapter.list().await?;
        let count = opportunities.len();
        self.store.replace(protocol, opportunities).await;

        debug!(protocol, count, "Snapshot replaced");
        Ok(count)
    }

    async fn sync_aggregated(&self) -> Result<()> {
        let metrics = self.store.refresh_metrics().await;
        info!(
            protocols = metrics.protocol_count,
            opportunities = metrics.opportunity_count,
            total_tvl_usd = metrics.total_tvl_usd,
            weighted_apy = %format!("{:.2}", metrics.tvl_weighted_apy),
            "Aggregated metrics refreshed"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
