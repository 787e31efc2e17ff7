//! Demo opportunities served when the upstream cannot be reached.
//!
//! Built through the same risk and exposure rules as live data so the
//! fallback never disagrees with what a real fetch would produce.

use chrono::Utc;

use crate::risk;
use crate::types::{Chain, Opportunity, Source};

struct DemoPool {
    project: &'static str,
    tokens: &'static [&'static str],
    apy: f64,
    tvl_usd: f64,
}

const DEMO_POOLS: &[DemoPool] = &[
    DemoPool { project: "blend", tokens: &["USDC"], apy: 8.4, tvl_usd: 4_200_000.0 },
    DemoPool { project: "blend", tokens: &["XLM"], apy: 3.1, tvl_usd: 2_750_000.0 },
    DemoPool { project: "aquarius", tokens: &["XLM", "AQUA"], apy: 24.0, tvl_usd: 85_000.0 },
    DemoPool { project: "soroswap", tokens: &["XLM", "USDC"], apy: 11.6, tvl_usd: 640_000.0 },
    DemoPool { project: "phoenix", tokens: &["PHO", "XLM"], apy: 42.0, tvl_usd: 7_500.0 },
];

/// Fixed demo set, tagged `Source::Mock`, sorted by TVL descending.
pub fn demo_opportunities() -> Vec<Opportunity> {
    let now = Utc::now();
    let mut out: Vec<Opportunity> = DEMO_POOLS
        .iter()
        .map(|p| {
            let tokens: Vec<String> = p.tokens.iter().map(|t| t.to_string()).collect();
            let stablecoin = risk::is_stablecoin_pair(&tokens);
            Opportunity {
                id: format!("{}-{}", p.project, p.tokens[0]).to_lowercase(),
                chain: Chain::Stellar,
                protocol: p.project.to_uppercase(),
                pool: tokens.join("-"),
                apr: super::defillama::apr_from_apy(p.apy),
                apy: p.apy,
                apy_base: Some(p.apy),
                apy_reward: None,
                tvl_usd: p.tvl_usd,
                risk: risk::calculate_risk(p.apy, p.tvl_usd, stablecoin),
                source: Source::Mock,
                last_updated: now,
                pool_id: None,
                underlying_tokens: None,
                volume_24h: None,
                fees_24h: None,
                logo_url: Some(super::upstream::default_logo(p.project)),
                exposure: Some(risk::classify_exposure(&tokens)),
                il_risk: Some(risk::classify_il_risk(&tokens)),
                stablecoin: Some(stablecoin),
                tokens,
            }
        })
        .collect();
    out.sort_by(|a, b| b.tvl_usd.total_cmp(&a.tvl_usd));
    out
}
