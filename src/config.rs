//! Process-wide configuration (spec.md §6), loaded once at startup.
//!
//! Follows the teacher's `Config::from_env` idiom: every knob has a sane
//! default, env vars override it, and a malformed (not merely absent) value
//! is a startup-fatal error.

use crate::models::{default_category_edge_thresholds, default_impact_caps, Category, SignalType};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub min_liquidity: f64,
    pub max_belief_width: f64,
    pub min_confidence: f64,
    /// Minimum fractional edge required for gate 7, per market category
    /// (spec.md §4.2). Operator-overridable via `EDGE_THRESHOLD_<CATEGORY>`.
    pub category_edge_thresholds: HashMap<Category, f64>,
    /// Maximum belief-range shift a single signal may cause, per signal type
    /// (spec.md §4.1). Operator-overridable via `IMPACT_CAP_<SIGNAL_TYPE>`.
    pub impact_caps: HashMap<SignalType, f64>,

    pub max_markets: usize,
    pub max_signal_history: usize,
    pub aggressive_signal_limit: usize,
    pub memory_critical_mb: u64,

    /// When `true`, `Orchestrator::tick` always routes through the batch
    /// evaluator (C8) instead of the straight-line per-market loop,
    /// regardless of how many markets are in play.
    pub batch_mode: bool,
    pub batch_max_concurrency: usize,
    pub batch_tick_interval_secs: u64,

    pub kelly_fraction: f64,
    pub max_risk_per_trade: f64,
    pub max_positions_per_category: usize,
    pub drawdown_halt_fraction: f64,

    /// Minimum accumulated calibration records before `halt_check` evaluates
    /// at all (spec.md §4.4).
    pub calibration_min_sample: usize,
    /// Tolerance band around the 0.85 expected range-coverage in
    /// `halt_check`'s coverage-deviation trigger.
    pub calibration_coverage_tolerance: f64,
    /// Minimum samples a confidence bucket needs before it participates in
    /// the bucket-inversion halt trigger.
    pub calibration_bucket_min_samples: usize,
    /// Epsilon for the unknown-density upward-trend halt trigger.
    pub calibration_unknown_density_epsilon: f64,
    /// Minimum accumulated records before `adjustment_recommendation` emits
    /// anything at all.
    pub calibration_adjustment_min_sample: usize,
    /// Record count at which a consistently high range coverage also
    /// recommends narrowing belief ranges.
    pub calibration_adjustment_wide_sample: usize,

    pub paper_trading_enabled: bool,
    pub paper_resolution_check_interval_secs: u64,
    pub max_open_positions: usize,
    pub max_position_size: f64,
    pub daily_loss_limit: f64,
    pub correlation_threshold: f64,

    pub batch_size: usize,
    pub batch_min_edge: f64,
    pub batch_max_portfolio_risk: f64,
    pub batch_require_diversification: bool,
    pub batch_stop_loss_percent: f64,
    pub batch_profit_target_percent: f64,
    pub batch_timeout_ms: u64,
    pub batch_retry_attempts: u32,

    /// Global emergency stop. `false` (default): trading proceeds normally.
    /// `true`: the switch is engaged and the orchestrator blocks every new
    /// decision before it reaches execution, until an operator flips it
    /// back off.
    pub kill_switch_enabled: bool,

    pub jwt_secret: String,
    pub database_path: String,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            min_liquidity: parse_env("MIN_LIQUIDITY", 15_000.0)?,
            max_belief_width: parse_env("MAX_BELIEF_WIDTH", 25.0)?,
            min_confidence: parse_env("MIN_CONFIDENCE", 65.0)?,
            category_edge_thresholds: parse_category_edge_thresholds()?,
            impact_caps: parse_impact_caps()?,

            max_markets: parse_env("MAX_MARKETS", 200)?,
            max_signal_history: parse_env("MAX_SIGNAL_HISTORY", 50)?,
            aggressive_signal_limit: parse_env("AGGRESSIVE_SIGNAL_LIMIT", 25)?,
            memory_critical_mb: parse_env("MEMORY_CRITICAL_MB", 180)?,

            batch_mode: parse_env("BATCH_MODE", false)?,
            batch_max_concurrency: parse_env("BATCH_MAX_CONCURRENCY", 50)?,
            batch_tick_interval_secs: parse_env("BATCH_TICK_INTERVAL_SECS", 60)?,

            kelly_fraction: parse_env("KELLY_FRACTION", 0.25)?,
            max_risk_per_trade: parse_env("MAX_RISK_PER_TRADE", 0.02)?,
            max_positions_per_category: parse_env("MAX_POSITIONS_PER_CATEGORY", 5)?,
            drawdown_halt_fraction: parse_env("MAX_DRAWDOWN_PERCENT", 0.10)?,

            calibration_min_sample: parse_env("CALIBRATION_MIN_SAMPLE", 20)?,
            calibration_coverage_tolerance: parse_env("CALIBRATION_COVERAGE_TOLERANCE", 0.15)?,
            calibration_bucket_min_samples: parse_env("CALIBRATION_BUCKET_MIN_SAMPLES", 5)?,
            calibration_unknown_density_epsilon: parse_env(
                "CALIBRATION_UNKNOWN_DENSITY_EPSILON",
                0.5,
            )?,
            calibration_adjustment_min_sample: parse_env("CALIBRATION_ADJUSTMENT_MIN_SAMPLE", 10)?,
            calibration_adjustment_wide_sample: parse_env(
                "CALIBRATION_ADJUSTMENT_WIDE_SAMPLE",
                50,
            )?,

            paper_trading_enabled: parse_env("PAPER_TRADING_ENABLED", true)?,
            paper_resolution_check_interval_secs: parse_env(
                "PAPER_RESOLUTION_CHECK_INTERVAL_SECS",
                300,
            )?,
            max_open_positions: parse_env("MAX_OPEN_POSITIONS", 20)?,
            max_position_size: parse_env("MAX_POSITION_SIZE", 500.0)?,
            daily_loss_limit: parse_env("DAILY_LOSS_LIMIT", 200.0)?,
            correlation_threshold: parse_env("CORRELATION_THRESHOLD", 0.7)?,

            batch_size: parse_env("BATCH_SIZE", 100)?,
            batch_min_edge: parse_env("BATCH_MIN_EDGE", 15.0)?,
            batch_max_portfolio_risk: parse_env("BATCH_MAX_PORTFOLIO_RISK", 0.20)?,
            batch_require_diversification: parse_env("BATCH_REQUIRE_DIVERSIFICATION", true)?,
            batch_stop_loss_percent: parse_env("BATCH_STOP_LOSS_PERCENT", 5.0)?,
            batch_profit_target_percent: parse_env("BATCH_PROFIT_TARGET_PERCENT", 10.0)?,
            batch_timeout_ms: parse_env("BATCH_TIMEOUT_MS", 5000)?,
            batch_retry_attempts: parse_env("BATCH_RETRY_ATTEMPTS", 1)?,

            kill_switch_enabled: parse_env("KILL_SWITCH_ENABLED", false)?,

            jwt_secret: env::var("JWT_SECRET")
                .context("JWT_SECRET must be set (no insecure default in production)")
                .unwrap_or_else(|_| "dev-only-insecure-secret-change-me".to_string()),
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/users.db".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            min_liquidity: 15_000.0,
            max_belief_width: 25.0,
            min_confidence: 65.0,
            category_edge_thresholds: default_category_edge_thresholds(),
            impact_caps: default_impact_caps(),
            max_markets: 200,
            max_signal_history: 50,
            aggressive_signal_limit: 25,
            memory_critical_mb: 180,
            batch_mode: false,
            batch_max_concurrency: 50,
            batch_tick_interval_secs: 60,
            kelly_fraction: 0.25,
            max_risk_per_trade: 0.02,
            max_positions_per_category: 5,
            drawdown_halt_fraction: 0.10,
            calibration_min_sample: 20,
            calibration_coverage_tolerance: 0.15,
            calibration_bucket_min_samples: 5,
            calibration_unknown_density_epsilon: 0.5,
            calibration_adjustment_min_sample: 10,
            calibration_adjustment_wide_sample: 50,
            paper_trading_enabled: true,
            paper_resolution_check_interval_secs: 300,
            max_open_positions: 20,
            max_position_size: 500.0,
            daily_loss_limit: 200.0,
            correlation_threshold: 0.7,
            batch_size: 100,
            batch_min_edge: 15.0,
            batch_max_portfolio_risk: 0.20,
            batch_require_diversification: true,
            batch_stop_loss_percent: 5.0,
            batch_profit_target_percent: 10.0,
            batch_timeout_ms: 5000,
            batch_retry_attempts: 1,
            kill_switch_enabled: false,
            jwt_secret: "test-secret".to_string(),
            database_path: ":memory:".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} is set to an invalid value {raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_category_edge_thresholds() -> Result<HashMap<Category, f64>> {
    let mut map = HashMap::new();
    for category in Category::ALL {
        let key = format!("EDGE_THRESHOLD_{category:?}").to_uppercase();
        map.insert(category, parse_env(&key, category.min_edge())?);
    }
    Ok(map)
}

fn parse_impact_caps() -> Result<HashMap<SignalType, f64>> {
    let mut map = HashMap::new();
    for signal_type in SignalType::ALL {
        let key = format!("IMPACT_CAP_{signal_type:?}").to_uppercase();
        map.insert(signal_type, parse_env(&key, signal_type.impact_cap())?);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_knobs() {
        let config = Config::for_tests();
        assert_eq!(config.min_liquidity, 15_000.0);
        assert_eq!(config.max_belief_width, 25.0);
        assert_eq!(config.min_confidence, 65.0);
        assert_eq!(config.kelly_fraction, 0.25);
    }

    #[test]
    fn category_edge_thresholds_default_to_spec_literals() {
        let config = Config::for_tests();
        assert_eq!(config.category_edge_thresholds[&Category::Crypto], 0.15);
        assert_eq!(config.category_edge_thresholds[&Category::Other], 0.25);
        assert_eq!(config.category_edge_thresholds.len(), Category::ALL.len());
    }

    #[test]
    fn impact_caps_default_to_spec_literals() {
        let config = Config::for_tests();
        assert_eq!(config.impact_caps[&SignalType::Authoritative], 20.0);
        assert_eq!(config.impact_caps[&SignalType::Speculative], 3.0);
        assert_eq!(config.impact_caps.len(), SignalType::ALL.len());
    }

    #[test]
    fn edge_threshold_env_override_replaces_single_category() {
        env::set_var("EDGE_THRESHOLD_CRYPTO", "0.30");
        let map = parse_category_edge_thresholds().unwrap();
        assert_eq!(map[&Category::Crypto], 0.30);
        assert_eq!(map[&Category::Weather], 0.08);
        env::remove_var("EDGE_THRESHOLD_CRYPTO");
    }
}
