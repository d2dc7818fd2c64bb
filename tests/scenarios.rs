//! End-to-end seeded scenarios: belief update -> trade evaluation ->
//! execution -> paper resolution, wired together the way the orchestrator
//! wires them on a tick, not exercised piecemeal as in each module's own
//! unit tests.

use betterbot_backend::config::Config;
use betterbot_backend::execution::ExecutionAdapter;
use betterbot_backend::models::{
    default_category_edge_thresholds, default_impact_caps, BeliefState, Category, Direction,
    Market, Outcome, ResolutionCriteria, Side, Signal, SignalType,
};
use betterbot_backend::paper::{CreatePositionParams, PaperTracker};
use betterbot_backend::portfolio::{self, SizingParams};
use betterbot_backend::trade;
use chrono::{Duration, Utc};

/// `Config::for_tests` is only visible to the crate's own unit tests
/// (`#[cfg(test)]` is not active when this integration test binary links
/// against the library), so this mirrors it with public fields instead.
fn test_config() -> Config {
    Config {
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

fn objective_market(id: &str, price: f64) -> Market {
    Market {
        id: id.to_string(),
        question: "Will it rain in Austin tomorrow?".to_string(),
        resolution_criteria: ResolutionCriteria {
            authority_is_clear: true,
            outcome_is_objective: true,
        },
        category: Category::Weather,
        current_price: price,
        liquidity: 50_000.0,
        volume_24h: 10_000.0,
        created_at: Utc::now() - Duration::days(2),
        closes_at: Utc::now() + Duration::days(1),
        resolved_at: None,
        resolution_outcome: None,
        closed: false,
    }
}

/// A fresh, confident, wide-enough belief clearing price away from the
/// market such that the YES side has edge above threshold.
fn confident_belief() -> BeliefState {
    BeliefState {
        belief_low: 55.0,
        belief_high: 65.0,
        confidence: 80.0,
        unknowns: vec![],
        last_updated: Utc::now(),
    }
}

#[tokio::test]
async fn full_cycle_approves_executes_and_resolves_a_winning_paper_position() {
    let cfg = test_config();
    let market = objective_market("weather-austin-1", 40.0);

    let signal = Signal::new(SignalType::Quantitative, Direction::Up, 3, "noaa-gfs")
        .with_description("GFS ensemble leans wet");
    let belief_before = confident_belief();
    let belief_after = betterbot_backend::belief::apply_signal_batch(
        &belief_before,
        &[signal],
        Utc::now(),
        &cfg.impact_caps,
    );

    assert!(betterbot_backend::belief::validate_confidence_invariant(
        &belief_before,
        &belief_after
    ));

    let decision = trade::evaluate(
        &belief_after,
        &market,
        &market.resolution_criteria,
        &cfg,
    )
    .expect("belief/price/liquidity setup should clear every gate");

    assert_eq!(decision.side, Side::Yes);
    assert!(decision.edge > 0.0);
    assert!(!decision.exit_conditions.is_empty());

    // C7 sizes the position; the gate layer itself leaves size_usd at 0.
    let mut decision = decision;
    decision.size_usd = portfolio::size_position(decision.edge, &SizingParams::default());
    assert!(decision.size_usd > 0.0);

    let mut execution = ExecutionAdapter::simulation();
    let order = execution
        .place(&decision, &market.id, Some(market.id.as_str()))
        .await
        .expect("simulated placement should not be rejected");
    execution.record_simulated_fill(&market.id);
    assert!(execution.active_position(&market.id).is_some());
    let _ = order;

    let mut tracker = PaperTracker::new();
    let position = tracker.create_position(CreatePositionParams {
        market_id: market.id.clone(),
        side: decision.side,
        size_usd: decision.size_usd,
        limit_price: decision.entry_price,
        belief_low: belief_after.belief_low,
        belief_high: belief_after.belief_high,
        edge: decision.edge,
        category: market.category,
    });

    tracker.resolve(position.id, Outcome::Yes, 100.0);

    let resolved = tracker.resolved();
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].pnl.unwrap() > 0.0);

    let metrics = tracker.metrics();
    assert_eq!(metrics.win_rate, 1.0);
}

#[test]
fn a_rejected_market_never_reaches_execution_or_paper_tracking() {
    let cfg = test_config();
    // Priced right at the belief midpoint: no edge, so the trade engine
    // should reject before any downstream component sees this market.
    let market = objective_market("weather-austin-2", 60.0);
    let belief = confident_belief();

    let result = trade::evaluate(&belief, &market, &market.resolution_criteria, &cfg);
    assert!(result.is_err());

    // No execution or paper-tracking call is even reachable from a
    // rejection in the orchestrator's own per-market loop; this assertion
    // just documents that the short-circuit happens at the gate layer.
    let tracker = PaperTracker::new();
    assert!(tracker.all().is_empty());
}

#[test]
fn subjective_resolution_criteria_rejects_before_any_other_gate() {
    let cfg = test_config();
    let mut market = objective_market("politics-1", 40.0);
    market.resolution_criteria.authority_is_clear = false;
    market.category = Category::Politics;

    let belief = confident_belief();
    let rejection = trade::evaluate(&belief, &market, &market.resolution_criteria, &cfg)
        .expect_err("unclear authority must reject at the first gate");

    assert_eq!(rejection.gate.name(), "authority_is_clear");
}
