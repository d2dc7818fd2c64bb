//! Batch Evaluator (C8)
//!
//! Evaluates large market sets under a concurrency cap with deterministic
//! positive-outcome selection. An alternate fan-out path to the
//! orchestrator's per-tick loop, used when the market set is too large for
//! straight-line per-market evaluation.

use crate::belief;
use crate::models::{BeliefState, ExitKind, Market, Side, Signal, TradeDecision};
use crate::trade::{self, Rejection};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub max_concurrency: usize,
    #[serde(skip)]
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub min_edge_required: f64, // percentage points, matches trade::side_and_edge's units
    pub max_portfolio_risk: f64,
    pub require_diversification: bool,
    pub max_positions_per_category: usize,
    /// Percent-of-entry-price stop-loss applied to every batch-selected
    /// decision's invalidation exit (spec.md §6 `batchStopLossPercent`).
    pub stop_loss_percent: f64,
    /// Percent-of-entry-price profit target applied to every batch-selected
    /// decision's profit exit (spec.md §6 `batchProfitTargetPercent`).
    pub profit_target_percent: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrency: 50,
            timeout: Duration::from_secs(5),
            retry_attempts: 1,
            min_edge_required: 15.0,
            max_portfolio_risk: 0.20,
            require_diversification: true,
            max_positions_per_category: 5,
            stop_loss_percent: 5.0,
            profit_target_percent: 10.0,
        }
    }
}

impl BatchConfig {
    /// Builds the batch evaluator's own config from the process-wide
    /// `Config` knobs (spec.md §6's `batch*` keys), rather than hand-wiring
    /// each field at every call site.
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self {
            batch_size: cfg.batch_size,
            max_concurrency: cfg.batch_max_concurrency,
            timeout: Duration::from_millis(cfg.batch_timeout_ms),
            retry_attempts: cfg.batch_retry_attempts,
            min_edge_required: cfg.batch_min_edge,
            max_portfolio_risk: cfg.batch_max_portfolio_risk,
            require_diversification: cfg.batch_require_diversification,
            max_positions_per_category: cfg.max_positions_per_category,
            stop_loss_percent: cfg.batch_stop_loss_percent,
            profit_target_percent: cfg.batch_profit_target_percent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationInput {
    pub market: Market,
    pub belief: BeliefState,
    pub signals: Vec<Signal>,
}

#[derive(Debug, Clone)]
pub enum EvaluationOutcome {
    Approved(TradeDecision),
    Rejected(Rejection),
    Errored(String),
}

#[derive(Debug, Clone, Default)]
pub struct CycleMetrics {
    pub markets_processed: usize,
    pub processing_time_ms: u128,
    pub throughput_per_sec: f64,
    /// RSS at cycle end minus RSS at cycle start, in bytes. Positive means
    /// the cycle grew resident memory; negative means it shrank it (or,
    /// off Linux where RSS can't be read, is always `0`).
    pub memory_delta: i64,
    pub success_rate: f64,
    pub opportunities_found: usize,
    pub error_count: usize,
}

/// Resident set size of this process, in bytes. `None` off Linux or if
/// `/proc/self/statm` can't be parsed.
fn rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(rss_pages * 4096)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Runs one batch with a bounded fan-out, each task under `config.timeout`
/// with up to `config.retry_attempts` retries on error. Batches are chunked
/// to `config.batch_size` but concurrency across the whole cycle is capped
/// at `config.max_concurrency` regardless of chunk boundaries.
pub async fn evaluate_cycle(
    inputs: Vec<EvaluationInput>,
    config: &BatchConfig,
    cfg: &crate::config::Config,
) -> (Vec<(String, EvaluationOutcome)>, CycleMetrics) {
    let started = std::time::Instant::now();
    let rss_before = rss_bytes();
    let mut results = Vec::with_capacity(inputs.len());
    let mut in_flight = FuturesUnordered::new();
    let mut queue = inputs.into_iter();
    let mut error_count = 0usize;
    let mut opportunities_found = 0usize;

    for input in queue.by_ref().take(config.max_concurrency) {
        in_flight.push(evaluate_one(input, config, cfg));
    }

    let mut pending = queue.peekable();

    while let Some((market_id, outcome)) = in_flight.next().await {
        if let EvaluationOutcome::Errored(_) = &outcome {
            error_count += 1;
        }
        if let EvaluationOutcome::Approved(_) = &outcome {
            opportunities_found += 1;
        }
        results.push((market_id, outcome));

        if let Some(next_input) = pending.next() {
            in_flight.push(evaluate_one(next_input, config, cfg));
        }
    }

    let elapsed = started.elapsed();
    let markets_processed = results.len();
    let memory_delta = match (rss_before, rss_bytes()) {
        (Some(before), Some(after)) => after as i64 - before as i64,
        _ => 0,
    };
    let metrics = CycleMetrics {
        markets_processed,
        processing_time_ms: elapsed.as_millis(),
        throughput_per_sec: if elapsed.as_secs_f64() > 0.0 {
            markets_processed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        },
        memory_delta,
        success_rate: if markets_processed > 0 {
            (markets_processed - error_count) as f64 / markets_processed as f64
        } else {
            0.0
        },
        opportunities_found,
        error_count,
    };

    (results, metrics)
}

async fn evaluate_one(
    input: EvaluationInput,
    config: &BatchConfig,
    cfg: &crate::config::Config,
) -> (String, EvaluationOutcome) {
    let market_id = input.market.id.clone();
    let mut attempt = 0;

    loop {
        let belief_after = belief::apply_signal_batch(
            &input.belief,
            &input.signals,
            chrono::Utc::now(),
            &cfg.impact_caps,
        );
        let outcome = tokio::time::timeout(config.timeout, async {
            trade::evaluate(&belief_after, &input.market, &input.market.resolution_criteria, cfg)
        })
        .await;

        match outcome {
            Ok(Ok(decision)) => return (market_id, EvaluationOutcome::Approved(decision)),
            Ok(Err(rejection)) => return (market_id, EvaluationOutcome::Rejected(rejection)),
            Err(_elapsed) => {
                attempt += 1;
                if attempt > config.retry_attempts {
                    return (market_id, EvaluationOutcome::Errored("evaluation timed out".to_string()));
                }
            }
        }
    }
}

/// (1) drop `side=none` or `edge < minEdgeRequired`; (2) sort by edge
/// descending; (3) greedily select under the portfolio-risk cap and,
/// when required, the per-category cap.
pub fn select_positive_outcomes(
    decisions: Vec<TradeDecision>,
    existing_category_counts: &HashMap<String, usize>,
    decision_categories: &HashMap<String, String>, // market_id -> category key
    config: &BatchConfig,
    portfolio_value: f64,
    existing_risk: f64,
) -> Vec<TradeDecision> {
    let mut eligible: Vec<TradeDecision> = decisions
        .into_iter()
        .filter(|d| d.side != crate::models::Side::None)
        .filter(|d| d.edge * 100.0 >= config.min_edge_required)
        .collect();

    eligible.sort_by(|a, b| b.edge.partial_cmp(&a.edge).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected = Vec::new();
    let mut current_risk = existing_risk;
    let mut category_counts = existing_category_counts.clone();
    let max_risk = config.max_portfolio_risk * portfolio_value;

    for decision in eligible {
        if current_risk + decision.size_usd > max_risk {
            continue;
        }
        if config.require_diversification {
            let category = decision_categories
                .get(&decision.market_id)
                .cloned()
                .unwrap_or_default();
            let count = category_counts.get(&category).copied().unwrap_or(0);
            if count >= config.max_positions_per_category {
                continue;
            }
            category_counts.insert(category, count + 1);
        }
        current_risk += decision.size_usd;
        let mut decision = decision;
        apply_batch_exit_overrides(&mut decision, config);
        selected.push(decision);
    }

    selected
}

/// Overrides a batch-selected decision's invalidation/profit exit trigger
/// prices with the flat stop-loss/profit-target percentages configured for
/// batch mode, in place of the belief-derived thresholds `trade::evaluate`
/// builds by default.
fn apply_batch_exit_overrides(decision: &mut TradeDecision, config: &BatchConfig) {
    let (stop_price, profit_price) = match decision.side {
        Side::Yes => (
            decision.entry_price * (1.0 - config.stop_loss_percent / 100.0),
            decision.entry_price * (1.0 + config.profit_target_percent / 100.0),
        ),
        Side::No => (
            decision.entry_price * (1.0 + config.stop_loss_percent / 100.0),
            decision.entry_price * (1.0 - config.profit_target_percent / 100.0),
        ),
        Side::None => return,
    };

    for exit in decision.exit_conditions.iter_mut() {
        match exit.kind {
            ExitKind::Invalidation => {
                exit.trigger_price = Some(stop_price);
                exit.description = format!(
                    "batch stop-loss: {:.1}% against entry (trigger {:.2})",
                    config.stop_loss_percent, stop_price
                );
            }
            ExitKind::Profit => {
                exit.trigger_price = Some(profit_price);
                exit.description = format!(
                    "batch profit target: {:.1}% in favor of entry (trigger {:.2})",
                    config.profit_target_percent, profit_price
                );
            }
            ExitKind::Emergency => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, ExitCondition, ExitKind, ResolutionCriteria, Side};
    use chrono::Utc;

    fn decision(market_id: &str, edge: f64, size_usd: f64) -> TradeDecision {
        TradeDecision {
            market_id: market_id.to_string(),
            side: Side::Yes,
            entry_price: 40.0,
            edge,
            size_usd,
            exit_conditions: vec![
                ExitCondition { kind: ExitKind::Invalidation, description: "x".into(), trigger_price: None },
                ExitCondition { kind: ExitKind::Profit, description: "x".into(), trigger_price: None },
            ],
            rationale: "x".into(),
            rationale_hash: "x".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn from_config_mirrors_the_process_wide_batch_knobs() {
        let cfg = crate::config::Config::for_tests();
        let batch_config = BatchConfig::from_config(&cfg);
        assert_eq!(batch_config.batch_size, cfg.batch_size);
        assert_eq!(batch_config.max_concurrency, cfg.batch_max_concurrency);
        assert_eq!(batch_config.min_edge_required, cfg.batch_min_edge);
    }

    #[test]
    fn selector_drops_decisions_below_min_edge() {
        let config = BatchConfig::default();
        let decisions = vec![decision("m1", 0.10, 100.0), decision("m2", 0.20, 100.0)];
        let selected = select_positive_outcomes(decisions, &HashMap::new(), &HashMap::new(), &config, 10_000.0, 0.0);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].market_id, "m2");
    }

    #[test]
    fn selector_enforces_portfolio_risk_cap() {
        let config = BatchConfig {
            max_portfolio_risk: 0.01,
            ..BatchConfig::default()
        };
        let decisions = vec![decision("m1", 0.5, 50.0), decision("m2", 0.4, 50.0)];
        // portfolio_value 1000 -> max_risk = 10, first decision (50) already exceeds it.
        let selected = select_positive_outcomes(decisions, &HashMap::new(), &HashMap::new(), &config, 1000.0, 0.0);
        assert!(selected.is_empty());
    }

    #[test]
    fn selector_overrides_exit_prices_with_batch_percentages() {
        let config = BatchConfig { stop_loss_percent: 5.0, profit_target_percent: 10.0, ..BatchConfig::default() };
        let decisions = vec![decision("m1", 0.25, 100.0)];
        let selected = select_positive_outcomes(decisions, &HashMap::new(), &HashMap::new(), &config, 10_000.0, 0.0);
        assert_eq!(selected.len(), 1);
        let invalidation = selected[0].exit_conditions.iter().find(|e| e.kind == ExitKind::Invalidation).unwrap();
        let profit = selected[0].exit_conditions.iter().find(|e| e.kind == ExitKind::Profit).unwrap();
        assert_eq!(invalidation.trigger_price, Some(40.0 * 0.95));
        assert_eq!(profit.trigger_price, Some(40.0 * 1.10));
    }

    /// R3: concurrency level does not change the selected *set*.
    #[tokio::test]
    async fn evaluate_cycle_selects_same_set_regardless_of_concurrency() {
        let cfg = crate::config::Config::for_tests();
        let market = |id: &str, price: f64| Market {
            id: id.to_string(),
            question: "q".into(),
            resolution_criteria: ResolutionCriteria { authority_is_clear: true, outcome_is_objective: true },
            category: Category::Weather,
            current_price: price,
            liquidity: 50_000.0,
            volume_24h: 10_000.0,
            created_at: Utc::now() - chrono::Duration::days(1),
            closes_at: Utc::now() + chrono::Duration::days(1),
            resolved_at: None,
            resolution_outcome: None,
            closed: false,
        };
        let belief = BeliefState { belief_low: 40.0, belief_high: 50.0, confidence: 80.0, unknowns: vec![], last_updated: Utc::now() };

        let inputs = vec![
            EvaluationInput { market: market("m1", 20.0), belief: belief.clone(), signals: vec![] },
            EvaluationInput { market: market("m2", 25.0), belief: belief.clone(), signals: vec![] },
        ];

        let config_low = BatchConfig { max_concurrency: 1, ..BatchConfig::default() };
        let config_high = BatchConfig { max_concurrency: 50, ..BatchConfig::default() };

        let (results_low, _) = evaluate_cycle(inputs.clone(), &config_low, &cfg).await;
        let (results_high, _) = evaluate_cycle(inputs, &config_high, &cfg).await;

        let approved_low: std::collections::HashSet<String> = results_low
            .iter()
            .filter(|(_, o)| matches!(o, EvaluationOutcome::Approved(_)))
            .map(|(id, _)| id.clone())
            .collect();
        let approved_high: std::collections::HashSet<String> = results_high
            .iter()
            .filter(|(_, o)| matches!(o, EvaluationOutcome::Approved(_)))
            .map(|(id, _)| id.clone())
            .collect();
        assert_eq!(approved_low, approved_high);
    }
}
