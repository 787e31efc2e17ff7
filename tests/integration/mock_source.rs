//! Mock pool source for integration testing.
//!
//! Serves a controllable list of raw pool records, counts fetches, and
//! can be switched into a failing mode. No network access.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use yieldguard::adapters::upstream::PoolSource;
use yieldguard::types::YieldError;

pub struct MockPoolSource {
    records: Mutex<Vec<Value>>,
    /// If set, every fetch fails with this HTTP status.
    force_status: Mutex<Option<u16>>,
    fetches: AtomicU32,
}

impl MockPoolSource {
    /// A source with a realistic mix of Stellar and non-Stellar pools.
    pub fn new() -> Self {
        Self::with_records(default_records())
    }

    pub fn with_records(records: Vec<Value>) -> Self {
        Self {
            records: Mutex::new(records),
            force_status: Mutex::new(None),
            fetches: AtomicU32::new(0),
        }
    }

    /// Fail all subsequent fetches with `status`.
    pub fn set_error(&self, status: u16) {
        *self.force_status.lock().unwrap() = Some(status);
    }

    pub fn clear_error(&self) {
        *self.force_status.lock().unwrap() = None;
    }

    pub fn set_records(&self, records: Vec<Value>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolSource for MockPoolSource {
    async fn fetch_pools(&self) -> Result<Vec<Value>, YieldError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.force_status.lock().unwrap() {
            return Err(YieldError::Http {
                status,
                body: "mock upstream failure".to_string(),
            });
        }
        Ok(self.records.lock().unwrap().clone())
    }
}

pub fn pool(project: &str, symbol: &str, tvl: f64, apy: f64) -> Value {
    json!({
        "chain": "Stellar",
        "project": project,
        "symbol": symbol,
        "tvlUsd": tvl,
        "apy": apy,
        "apyBase": apy,
        "apyReward": null,
        "pool": format!("{}-{}", project, symbol.to_lowercase()),
        "underlyingTokens": null,
        "rewardTokens": null,
        "stablecoin": false,
        "ilRisk": "no",
        "exposure": "single",
        "volumeUsd1d": null
    })
}

fn default_records() -> Vec<Value> {
    vec![
        pool("blend", "USDC", 4_100_000.0, 7.2),
        pool("blend", "XLM", 2_300_000.0, 2.4),
        pool("blend", "EURC", 800.0, 9.0),
        pool("aquarius", "XLM-AQUA", 95_000.0, 23.5),
        pool("aquarius", "XLM-USDC", 610_000.0, 12.1),
        pool("soroswap", "XLM-USDC", 450_000.0, 8.0),
        json!({
            "chain": "Ethereum",
            "project": "aave-v3",
            "symbol": "USDC",
            "tvlUsd": 1_500_000_000.0,
            "apy": 4.1
        }),
        // No chain: dropped during normalization
        json!({"project": "aquarius", "symbol": "SHX-XLM", "tvlUsd": 20_000.0, "apy": 40.0}),
    ]
}
