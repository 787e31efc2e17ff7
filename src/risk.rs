//! Risk scoring and exposure classification.
//!
//! Pure functions only: no I/O, no shared state. The scoring thresholds
//! are part of the public contract and must not drift.

use crate::types::{Exposure, IlRisk, RiskLevel};

/// Symbols treated as stablecoins (compared case-insensitively).
pub const STABLECOINS: &[&str] = &["USDC", "USDT", "DAI", "BUSD", "EURC", "GUSC"];

const TVL_TINY: f64 = 10_000.0;
const TVL_SMALL: f64 = 100_000.0;
const APY_EXTREME: f64 = 20.0;
const APY_ELEVATED: f64 = 10.0;

/// Classify a position into a risk bucket.
///
/// Score: +2 for TVL under 10k, +1 under 100k; +2 for APY over 20%,
/// +1 over 10%; stablecoins take one point off (floored at zero).
/// 3+ is high, 2 is medium, anything lower is low.
pub fn calculate_risk(apy: f64, tvl_usd: f64, is_stablecoin: bool) -> RiskLevel {
    let mut score: u32 = 0;

    if tvl_usd < TVL_TINY {
        score += 2;
    } else if tvl_usd < TVL_SMALL {
        score += 1;
    }

    if apy > APY_EXTREME {
        score += 2;
    } else if apy > APY_ELEVATED {
        score += 1;
    }

    if is_stablecoin {
        score = score.saturating_sub(1);
    }

    match score {
        s if s >= 3 => RiskLevel::High,
        2 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

pub fn is_stablecoin(symbol: &str) -> bool {
    STABLECOINS.iter().any(|s| s.eq_ignore_ascii_case(symbol.trim()))
}

/// True if any token in the pool is a stablecoin.
pub fn is_stablecoin_pair<S: AsRef<str>>(tokens: &[S]) -> bool {
    tokens.iter().any(|t| is_stablecoin(t.as_ref()))
}

/// Classify what a pool is exposed to.
///
/// Single-token pools are `Single`; anything containing a stablecoin is
/// `Stablecoin`; otherwise the first of BTC, ETH, XLM found in a token
/// name wins, falling back to `Multi`.
pub fn classify_exposure<S: AsRef<str>>(tokens: &[S]) -> Exposure {
    if tokens.len() == 1 {
        return Exposure::Single;
    }
    if is_stablecoin_pair(tokens) {
        return Exposure::Stablecoin;
    }

    let upper: Vec<String> = tokens.iter().map(|t| t.as_ref().to_uppercase()).collect();
    let has = |needle: &str| upper.iter().any(|t| t.contains(needle));

    if has("BTC") {
        Exposure::Btc
    } else if has("ETH") {
        Exposure::Eth
    } else if has("XLM") {
        Exposure::Xlm
    } else {
        Exposure::Multi
    }
}

/// Impermanent-loss risk: none for single-token pools, low when every
/// token is a stablecoin, high as soon as one is not.
pub fn classify_il_risk<S: AsRef<str>>(tokens: &[S]) -> IlRisk {
    if tokens.len() == 1 {
        return IlRisk::None;
    }
    if tokens.iter().all(|t| is_stablecoin(t.as_ref())) {
        IlRisk::Low
    } else {
        IlRisk::High
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
