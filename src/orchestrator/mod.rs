//! Orchestrator (C9)
//!
//! Owns the single tick loop: fetch markets, gather signals, revise belief,
//! evaluate trades, size and route approved decisions, and sweep stale
//! state. The sole mutator of `MarketState`s; per-market evaluation inside
//! a tick may fan out through the batch evaluator (C8) when the market set
//! is large, but the orchestrator itself remains single-writer.

use crate::batch;
use crate::belief;
use crate::calibration::{AdjustmentRecommendation, CalibrationTracker};
use crate::config::Config;
use crate::exchange::ExchangeAdapter;
use crate::execution::ExecutionAdapter;
use crate::models::{BeliefState, CalibrationRecord, Market, Signal};
use crate::notifier::Notifier;
use crate::paper::PaperTracker;
use crate::portfolio::{self, DrawdownGuard, SizingParams};
use crate::signals::SignalSource;
use crate::state_machine::{State, StateMachine};
use crate::trade;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Snapshot of belief-at-entry data a paper position doesn't itself carry
/// (spec.md's `PaperPosition` has no `confidence`/`unknowns` fields) but
/// that `CalibrationRecord` needs once the position resolves.
#[derive(Debug, Clone, Copy)]
struct PendingCalibration {
    confidence_at_entry: f64,
    unknowns_at_entry: usize,
    edge_at_entry: f64,
}

#[derive(Debug, Clone)]
pub struct MarketState {
    pub market: Market,
    pub belief: BeliefState,
    pub signal_history: Vec<Signal>,
    pub last_checked: DateTime<Utc>,
}

pub struct Orchestrator {
    config: Config,
    exchange: Arc<dyn ExchangeAdapter>,
    signal_sources: Vec<Arc<dyn SignalSource>>,
    notifier: Arc<dyn Notifier>,

    market_states: Mutex<HashMap<String, MarketState>>,
    state_machine: Mutex<StateMachine>,
    calibration: Mutex<CalibrationTracker>,
    paper_tracker: Mutex<PaperTracker>,
    execution: Mutex<ExecutionAdapter>,
    drawdown_guard: Mutex<DrawdownGuard>,

    starting_capital: f64,
    tick_count: Mutex<u64>,
    consecutive_invalidations: Mutex<u32>,
    pending_calibration: Mutex<HashMap<Uuid, PendingCalibration>>,
    daily_pnl: Mutex<(chrono::NaiveDate, f64)>,
    /// Most recent non-empty recommendation from
    /// `CalibrationTracker::adjustment_recommendation`. Applied to belief
    /// updates and trade evaluation via [`Orchestrator::effective_config`]
    /// and [`Orchestrator::update_belief`]; also exposed read-only through
    /// [`Orchestrator::adjustment_snapshot`] for the query surface.
    adjustment: Mutex<AdjustmentRecommendation>,
    max_markets_logged: Mutex<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct TickSummary {
    pub markets_observed: usize,
    pub decisions_approved: usize,
    pub errors: usize,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        exchange: Arc<dyn ExchangeAdapter>,
        signal_sources: Vec<Arc<dyn SignalSource>>,
        notifier: Arc<dyn Notifier>,
        starting_capital: f64,
    ) -> Self {
        Self {
            config,
            exchange,
            signal_sources,
            notifier,
            market_states: Mutex::new(HashMap::new()),
            state_machine: Mutex::new(StateMachine::new()),
            calibration: Mutex::new(CalibrationTracker::new()),
            paper_tracker: Mutex::new(PaperTracker::new()),
            execution: Mutex::new(ExecutionAdapter::simulation()),
            drawdown_guard: Mutex::new(DrawdownGuard::new(starting_capital)),
            starting_capital,
            tick_count: Mutex::new(0),
            consecutive_invalidations: Mutex::new(0),
            pending_calibration: Mutex::new(HashMap::new()),
            daily_pnl: Mutex::new((Utc::now().date_naive(), 0.0)),
            adjustment: Mutex::new(AdjustmentRecommendation::default()),
            max_markets_logged: Mutex::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn state(&self) -> State {
        self.state_machine.lock().await.state()
    }

    pub async fn is_halted(&self) -> bool {
        self.state_machine.lock().await.is_halted()
    }

    pub async fn operator_reset(&self) {
        self.state_machine.lock().await.operator_reset();
    }

    pub async fn market_view(&self, market_id: &str) -> Option<(Market, BeliefState, usize, DateTime<Utc>)> {
        let states = self.market_states.lock().await;
        states
            .get(market_id)
            .map(|s| (s.market.clone(), s.belief.clone(), s.signal_history.len(), s.last_checked))
    }

    /// Step 1-6 of the main loop (spec.md §4.9). A HALT short-circuits
    /// everything except the read-only query surface, per §7's
    /// user-visible behavior.
    pub async fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        if self.is_halted().await {
            debug!("orchestrator tick skipped: state machine is halted");
            return summary;
        }

        let markets = match self.exchange.list_active_markets().await {
            Ok(markets) => markets,
            Err(e) => {
                error!(error = %e, "exchange adapter failed to list active markets");
                self.notifier.on_error(&e.to_string(), "list_active_markets").await;
                return summary;
            }
        };

        let now = Utc::now();
        {
            let mut states = self.market_states.lock().await;
            let mut at_cap_logged = self.max_markets_logged.lock().await;
            for market in &markets {
                if market.is_expired(now) {
                    continue;
                }
                if !states.contains_key(&market.id) && states.len() >= self.config.max_markets {
                    if !*at_cap_logged {
                        warn!(
                            max_markets = self.config.max_markets,
                            "market set at configured cap; newly observed markets are skipped until room frees up"
                        );
                        *at_cap_logged = true;
                    }
                    continue;
                }
                states.entry(market.id.clone()).or_insert_with(|| MarketState {
                    market: market.clone(),
                    belief: BeliefState::default(),
                    signal_history: Vec::new(),
                    last_checked: now,
                });
            }
            if states.len() < self.config.max_markets {
                *at_cap_logged = false;
            }
        }

        let market_ids: Vec<String> = {
            let states = self.market_states.lock().await;
            states.keys().cloned().collect()
        };

        if self.config.batch_mode || market_ids.len() > self.config.batch_size {
            self.run_batch_cycle(&market_ids, now, &mut summary).await;
        } else {
            for market_id in market_ids {
                summary.markets_observed += 1;
                if let Err(e) = self.evaluate_market(&market_id, now).await {
                    summary.errors += 1;
                    warn!(market_id = %market_id, error = %e, "per-market evaluation failed; continuing");
                    self.notifier.on_error(&e.to_string(), &market_id).await;
                    continue;
                }
            }
        }

        let mut tick_count = self.tick_count.lock().await;
        *tick_count += 1;
        if *tick_count % 10 == 0 {
            self.sweep_stale_markets(now).await;
        }

        info!(
            markets_observed = summary.markets_observed,
            errors = summary.errors,
            "tick complete"
        );
        summary
    }

    async fn evaluate_market(&self, market_id: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        {
            let mut sm = self.state_machine.lock().await;
            sm.transition(State::IngestSignal)
                .map_err(|e| anyhow::anyhow!("illegal transition during ingest: {e:?}"))?;
        }

        let market = {
            let states = self.market_states.lock().await;
            states.get(market_id).map(|s| s.market.clone())
        };
        let Some(market) = market else {
            return Ok(());
        };

        let fresh_signals = self.gather_signals(&market).await;

        {
            let mut sm = self.state_machine.lock().await;
            sm.transition(State::UpdateBelief)
                .map_err(|e| anyhow::anyhow!("illegal transition during update belief: {e:?}"))?;
        }

        let after_belief = self.update_belief(market_id, fresh_signals, now).await?;

        {
            let mut sm = self.state_machine.lock().await;
            sm.transition(State::EvaluateTrade)
                .map_err(|e| anyhow::anyhow!("illegal transition during evaluate: {e:?}"))?;
        }

        let config = self.effective_config().await;

        match trade::evaluate(&after_belief, &market, &market.resolution_criteria, &config) {
            Ok(mut decision) => {
                self.notifier.on_trade_opportunity(&decision).await;

                let total_value = self.portfolio_total_value().await;
                {
                    let mut guard = self.drawdown_guard.lock().await;
                    guard.observe(total_value);
                }

                let params = SizingParams {
                    kelly_fraction: config.kelly_fraction,
                    max_risk_per_trade: config.max_risk_per_trade,
                    total_capital: total_value,
                };
                decision.size_usd =
                    portfolio::size_position(decision.edge, &params).min(config.max_position_size);

                let blocked_reason = self.blocked_reason(market_id, total_value).await;

                if decision.size_usd > 0.0 && blocked_reason.is_none() {
                    let mut sm = self.state_machine.lock().await;
                    sm.transition(State::ExecuteTrade)
                        .map_err(|e| anyhow::anyhow!("illegal transition during execute: {e:?}"))?;
                    drop(sm);

                    if config.paper_trading_enabled {
                        self.open_paper_position(&decision, &market, &after_belief).await;
                    } else {
                        let mut execution = self.execution.lock().await;
                        match execution.place(&decision, market_id, None).await {
                            Ok(order) => {
                                self.notifier.on_trade_executed(&order, market_id).await;
                            }
                            Err(e) => {
                                debug!(market_id = %market_id, reason = %e, "execution rejected");
                            }
                        }
                        drop(execution);
                    }

                    let mut sm = self.state_machine.lock().await;
                    sm.transition(State::Monitor)
                        .map_err(|e| anyhow::anyhow!("illegal transition to monitor: {e:?}"))?;
                    sm.transition(State::Observe)
                        .map_err(|e| anyhow::anyhow!("illegal transition back to observe: {e:?}"))?;
                } else {
                    if let Some(reason) = blocked_reason {
                        debug!(market_id = %market_id, reason = %reason, "approved decision blocked before execution");
                    }
                    let mut sm = self.state_machine.lock().await;
                    sm.transition(State::Observe)
                        .map_err(|e| anyhow::anyhow!("illegal transition back to observe: {e:?}"))?;
                }
            }
            Err(rejection) => {
                debug!(market_id = %market_id, gate = rejection.gate.name(), detail = %rejection.detail, "trade rejected");
                let mut sm = self.state_machine.lock().await;
                sm.transition(State::Observe)
                    .map_err(|e| anyhow::anyhow!("illegal transition back to observe: {e:?}"))?;
            }
        }

        Ok(())
    }

    /// Gathers signals for one market across every source, tolerating
    /// per-source timeouts and errors as an empty contribution (same policy
    /// whether called from the per-market loop or a batch cycle).
    async fn gather_signals(&self, market: &Market) -> Vec<Signal> {
        let mut fresh_signals = Vec::new();
        for source in &self.signal_sources {
            let result = tokio::time::timeout(source.timeout(), source.signals_for(market)).await;
            match result {
                Ok(Ok(signals)) => fresh_signals.extend(signals),
                Ok(Err(e)) => {
                    warn!(source = source.name(), error = %e, "signal source errored; treated as empty");
                }
                Err(_) => {
                    warn!(source = source.name(), "signal source timed out; treated as empty");
                }
            }
        }
        fresh_signals
    }

    /// Folds `fresh_signals` into `market_id`'s belief, applies the current
    /// calibration adjustment recommendation's confidence offset / range
    /// narrowing (comment 3's consumption path), checks I3, and writes the
    /// result back. Shared by both the per-market loop and batch mode's
    /// macro `UpdateBelief` step.
    async fn update_belief(
        &self,
        market_id: &str,
        fresh_signals: Vec<Signal>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<BeliefState> {
        let before_belief = {
            let mut states = self.market_states.lock().await;
            let state = states.get_mut(market_id).expect("market state exists");
            state.signal_history.extend(fresh_signals.clone());
            let max_history = self.config.max_signal_history;
            if state.signal_history.len() > max_history {
                let excess = state.signal_history.len() - max_history;
                state.signal_history.drain(0..excess);
            }
            state.last_checked = now;
            state.belief.clone()
        };

        let mut after_belief = if fresh_signals.is_empty() {
            // No signal-driven update this tick: decay confidence from the
            // passage of time and the standing unknowns ledger instead of
            // leaving it (and last_updated) untouched (spec §4.1/§9: fresh
            // immediately after a signal-driven update, decay otherwise).
            let days_since_last_signal =
                (now - before_belief.last_updated).num_seconds() as f64 / 86_400.0;
            let mut decayed = before_belief.clone();
            decayed.confidence = belief::decay_confidence(
                &before_belief,
                days_since_last_signal.max(0.0),
                before_belief.unknowns.len(),
            );
            decayed.last_updated = now;
            decayed
        } else {
            belief::apply_signal_batch(&before_belief, &fresh_signals, now, &self.config.impact_caps)
        };

        let adjustment = self.adjustment.lock().await.clone();
        if adjustment.confidence_offset_delta != 0.0 {
            after_belief.confidence = (after_belief.confidence + adjustment.confidence_offset_delta).clamp(30.0, 95.0);
        }
        if adjustment.narrow_belief_ranges_by > 0.0 {
            let midpoint = (after_belief.belief_low + after_belief.belief_high) / 2.0;
            let half_width = (after_belief.width() / 2.0 - adjustment.narrow_belief_ranges_by).max(0.0);
            after_belief.belief_low = (midpoint - half_width).max(0.0);
            after_belief.belief_high = (midpoint + half_width).min(100.0);
        }

        if !belief::validate_confidence_invariant(&before_belief, &after_belief) {
            self.force_halt("invariant I3 breach: confidence rose despite more unknowns").await;
            anyhow::bail!("I3 invariant breach");
        }

        {
            let mut states = self.market_states.lock().await;
            if let Some(state) = states.get_mut(market_id) {
                state.belief = after_belief.clone();
            }
        }

        Ok(after_belief)
    }

    /// `self.config` with the current calibration adjustment recommendation's
    /// `widen_category_thresholds_by` folded into every category edge
    /// threshold. Avoids changing `trade::evaluate`'s signature to thread the
    /// recommendation through directly.
    async fn effective_config(&self) -> Config {
        let mut config = self.config.clone();
        let adjustment = self.adjustment.lock().await.clone();
        if adjustment.widen_category_thresholds_by != 0.0 {
            for threshold in config.category_edge_thresholds.values_mut() {
                *threshold += adjustment.widen_category_thresholds_by;
            }
        }
        config
    }

    /// Current open-position count per category, keyed the way
    /// `batch::select_positive_outcomes`'s diversification cap expects.
    async fn category_counts(&self) -> HashMap<String, usize> {
        let tracker = self.paper_tracker.lock().await;
        let mut counts = HashMap::new();
        for position in tracker.open() {
            *counts.entry(format!("{:?}", position.category)).or_insert(0) += 1;
        }
        counts
    }

    /// Sum of `size_usd` across every currently open paper position — the
    /// `existing_risk` baseline `batch::select_positive_outcomes`'s portfolio
    /// cap accumulates on top of.
    async fn open_paper_risk(&self) -> f64 {
        self.paper_tracker.lock().await.open().iter().map(|p| p.size_usd).sum()
    }

    /// Snapshot of a market's current belief, for the batch evaluator. The
    /// returned input's `signals` is always empty: `run_batch_cycle` already
    /// folded this tick's fresh signals into the belief via
    /// [`Orchestrator::update_belief`] before calling this, and
    /// `apply_signal_batch` is a no-op on an empty slice.
    async fn prepare_batch_input(&self, market_id: &str) -> Option<batch::EvaluationInput> {
        let states = self.market_states.lock().await;
        states.get(market_id).map(|s| batch::EvaluationInput {
            market: s.market.clone(),
            belief: s.belief.clone(),
            signals: Vec::new(),
        })
    }

    /// Batch-mode tick path (C8): one macro
    /// IngestSignal->UpdateBelief->EvaluateTrade transition covers the whole
    /// market set's belief-prep phase (per-market transitions would illegally
    /// re-enter IngestSignal from EvaluateTrade on the second market), then
    /// the fan-out evaluator and greedy selector choose which approved
    /// decisions actually get sized and routed this tick.
    async fn run_batch_cycle(&self, market_ids: &[String], now: DateTime<Utc>, summary: &mut TickSummary) {
        {
            let mut sm = self.state_machine.lock().await;
            if let Err(e) = sm.transition(State::IngestSignal) {
                error!(error = ?e, "illegal transition entering batch ingest");
                return;
            }
        }

        for market_id in market_ids {
            let market = {
                let states = self.market_states.lock().await;
                states.get(market_id).map(|s| s.market.clone())
            };
            let Some(market) = market else { continue };
            let fresh_signals = self.gather_signals(&market).await;
            if let Err(e) = self.update_belief(market_id, fresh_signals, now).await {
                summary.errors += 1;
                warn!(market_id = %market_id, error = %e, "batch belief update failed");
                self.notifier.on_error(&e.to_string(), market_id).await;
            }
        }

        {
            let mut sm = self.state_machine.lock().await;
            if sm.transition(State::UpdateBelief).is_err() {
                return;
            }
            if sm.transition(State::EvaluateTrade).is_err() {
                return;
            }
        }

        let config = self.effective_config().await;
        let batch_config = batch::BatchConfig::from_config(&config);

        let mut inputs = Vec::with_capacity(market_ids.len());
        for market_id in market_ids {
            if let Some(input) = self.prepare_batch_input(market_id).await {
                inputs.push(input);
            }
        }

        let (results, metrics) = batch::evaluate_cycle(inputs, &batch_config, &config).await;
        debug!(
            processed = metrics.markets_processed,
            approved = metrics.opportunities_found,
            errors = metrics.error_count,
            throughput_per_sec = metrics.throughput_per_sec,
            "batch cycle complete"
        );

        let total_value = self.portfolio_total_value().await;
        {
            let mut guard = self.drawdown_guard.lock().await;
            guard.observe(total_value);
        }
        let params = SizingParams {
            kelly_fraction: config.kelly_fraction,
            max_risk_per_trade: config.max_risk_per_trade,
            total_capital: total_value,
        };

        let market_categories: HashMap<String, String> = {
            let states = self.market_states.lock().await;
            market_ids
                .iter()
                .filter_map(|id| states.get(id).map(|s| (id.clone(), format!("{:?}", s.market.category))))
                .collect()
        };

        let mut decisions = Vec::new();
        for (market_id, outcome) in results {
            summary.markets_observed += 1;
            match outcome {
                batch::EvaluationOutcome::Approved(mut decision) => {
                    decision.size_usd =
                        portfolio::size_position(decision.edge, &params).min(config.max_position_size);
                    self.notifier.on_trade_opportunity(&decision).await;
                    decisions.push(decision);
                }
                batch::EvaluationOutcome::Rejected(rejection) => {
                    debug!(market_id = %market_id, gate = rejection.gate.name(), detail = %rejection.detail, "batch trade rejected");
                }
                batch::EvaluationOutcome::Errored(e) => {
                    summary.errors += 1;
                    warn!(market_id = %market_id, error = %e, "batch evaluation errored");
                }
            }
        }

        let category_counts = self.category_counts().await;
        let existing_risk = self.open_paper_risk().await;
        let selected = batch::select_positive_outcomes(
            decisions,
            &category_counts,
            &market_categories,
            &batch_config,
            total_value,
            existing_risk,
        );

        let blocked_reason = self.blocked_reason("batch cycle", total_value).await;

        if selected.is_empty() || blocked_reason.is_some() {
            if let Some(reason) = blocked_reason {
                debug!(reason = %reason, selected = selected.len(), "batch decisions blocked before execution");
            }
            let mut sm = self.state_machine.lock().await;
            let _ = sm.transition(State::Observe);
            return;
        }

        summary.decisions_approved += selected.len();

        {
            let mut sm = self.state_machine.lock().await;
            if sm.transition(State::ExecuteTrade).is_err() {
                return;
            }
        }

        for decision in &selected {
            let market_and_belief = {
                let states = self.market_states.lock().await;
                states.get(&decision.market_id).map(|s| (s.market.clone(), s.belief.clone()))
            };
            let Some((market, belief)) = market_and_belief else { continue };

            if config.paper_trading_enabled {
                self.open_paper_position(decision, &market, &belief).await;
            } else {
                let mut execution = self.execution.lock().await;
                match execution.place(decision, &decision.market_id, None).await {
                    Ok(order) => self.notifier.on_trade_executed(&order, &decision.market_id).await,
                    Err(e) => debug!(market_id = %decision.market_id, reason = %e, "batch execution rejected"),
                }
            }
        }

        let mut sm = self.state_machine.lock().await;
        let _ = sm.transition(State::Monitor);
        let _ = sm.transition(State::Observe);
    }

    async fn force_halt(&self, reason: &str) {
        error!(reason = %reason, "orchestrator forcing HALT");
        self.state_machine.lock().await.force_halt(reason);
        self.notifier.on_system_halt(reason).await;
    }

    /// `startingCapital + sum(realized paper P&L)`, the running approximation
    /// of portfolio value C7's sizing formula and drawdown guard both need.
    async fn portfolio_total_value(&self) -> f64 {
        let tracker = self.paper_tracker.lock().await;
        let realized: f64 = tracker.resolved().iter().filter_map(|p| p.pnl).sum();
        self.starting_capital + realized
    }

    /// Soft, non-HALT reasons an otherwise-approved decision must not reach
    /// execution this tick: the global kill switch, the drawdown guard, the
    /// daily loss limit, and the open-position cap. None of these are
    /// invariant breaches (§7) — they are ordinary risk-management no-trades.
    async fn blocked_reason(&self, market_id: &str, total_value: f64) -> Option<&'static str> {
        if self.config.kill_switch_enabled {
            return Some("kill switch engaged");
        }
        if self
            .drawdown_guard
            .lock()
            .await
            .trading_blocked(total_value, self.config.drawdown_halt_fraction)
        {
            return Some("drawdown guard tripped");
        }
        {
            let mut daily = self.daily_pnl.lock().await;
            let today = Utc::now().date_naive();
            if daily.0 != today {
                *daily = (today, 0.0);
            }
            if daily.1 <= -self.config.daily_loss_limit {
                return Some("daily loss limit reached");
            }
        }
        let open_count = self.paper_tracker.lock().await.open().len();
        if open_count >= self.config.max_open_positions {
            return Some("max open positions reached");
        }
        let _ = market_id; // reserved for future per-market blocks (e.g. cooldowns)
        None
    }

    /// Creates the paper position for an approved, sized, unblocked decision,
    /// logs a non-blocking diversification check (spec.md §4.7 — advisory,
    /// not a gate), and stashes the belief-at-entry snapshot `CalibrationRecord`
    /// needs once this position resolves.
    async fn open_paper_position(&self, decision: &crate::models::TradeDecision, market: &Market, belief: &BeliefState) {
        let open_pairs: Vec<(crate::models::Category, String)> = {
            let states = self.market_states.lock().await;
            let tracker = self.paper_tracker.lock().await;
            tracker
                .open()
                .iter()
                .map(|p| {
                    let question = states
                        .get(&p.market_id)
                        .map(|s| s.market.question.clone())
                        .unwrap_or_default();
                    (p.category, question)
                })
                .collect()
        };
        let report = portfolio::check_diversification(
            market.category,
            &market.question,
            &open_pairs,
            self.config.correlation_threshold,
        );
        if report.flagged {
            warn!(
                market_id = %market.id,
                concentration = report.concentration,
                overlap = report.max_keyword_overlap,
                "new paper position is not diversified from the open book"
            );
        }

        let position = {
            let mut tracker = self.paper_tracker.lock().await;
            tracker.create_position(crate::paper::CreatePositionParams {
                market_id: market.id.clone(),
                side: decision.side,
                size_usd: decision.size_usd,
                limit_price: decision.entry_price,
                belief_low: belief.belief_low,
                belief_high: belief.belief_high,
                edge: decision.edge,
                category: market.category,
            })
        };

        self.pending_calibration.lock().await.insert(
            position.id,
            PendingCalibration {
                confidence_at_entry: belief.confidence,
                unknowns_at_entry: belief.unknowns.len(),
                edge_at_entry: decision.edge,
            },
        );

        self.notifier.on_paper_position_opened(&position).await;
    }

    /// R2: closed/resolved/past-closesAt markets are evicted on the next
    /// sweep; sweeps run every N=10 ticks.
    async fn sweep_stale_markets(&self, now: DateTime<Utc>) {
        let mut states = self.market_states.lock().await;
        let before = states.len();
        states.retain(|_, s| !s.market.is_expired(now));
        let removed = before - states.len();
        if removed > 0 {
            debug!(removed, "swept stale market states");
        }
        drop(states);

        for source in &self.signal_sources {
            source.cleanup(now);
        }
    }

    /// Memory pressure policy: when `heapUsed > memoryCriticalMb`, shrink
    /// signal-history retention for one cycle and drop the oldest 2% of
    /// market states.
    pub async fn apply_memory_pressure(&self, heap_used_mb: u64) {
        if heap_used_mb <= self.config.memory_critical_mb {
            return;
        }
        warn!(heap_used_mb, limit = self.config.memory_critical_mb, "memory pressure: applying aggressive cleanup");

        let mut states = self.market_states.lock().await;
        let limit = self.config.aggressive_signal_limit;
        for state in states.values_mut() {
            if state.signal_history.len() > limit {
                let excess = state.signal_history.len() - limit;
                state.signal_history.drain(0..excess);
            }
        }

        let drop_count = (states.len() as f64 * 0.02).ceil() as usize;
        if drop_count > 0 {
            let mut ids: Vec<(String, DateTime<Utc>)> =
                states.iter().map(|(id, s)| (id.clone(), s.last_checked)).collect();
            ids.sort_by_key(|(_, last_checked)| *last_checked);
            for (id, _) in ids.into_iter().take(drop_count) {
                states.remove(&id);
            }
        }
    }

    /// Step 7: poll paper-tracker open positions against the exchange
    /// adapter's resolution data on an independent interval. Each
    /// resolution feeds a `CalibrationRecord` back into C4 and updates the
    /// consecutive-invalidation counter C4's halt check reads.
    pub async fn poll_paper_resolutions(&self) {
        let open_market_ids: Vec<(uuid::Uuid, String)> = {
            let tracker = self.paper_tracker.lock().await;
            tracker.open().iter().map(|p| (p.id, p.market_id.clone())).collect()
        };

        for (position_id, market_id) in open_market_ids {
            match self.exchange.get_market(&market_id).await {
                Ok(Some(market)) if market.is_resolved() => {
                    if let Some(outcome) = market.resolution_outcome {
                        let resolved = {
                            let mut tracker = self.paper_tracker.lock().await;
                            tracker.resolve(position_id, outcome, outcome.as_price());
                            tracker.resolved().iter().find(|p| p.id == position_id).cloned()
                        };
                        if let Some(position) = resolved {
                            self.on_paper_position_resolved(&position).await;
                        }
                    }
                }
                Ok(Some(market)) if market.closes_at <= Utc::now() => {
                    let expired = {
                        let mut tracker = self.paper_tracker.lock().await;
                        tracker.expire(position_id);
                        tracker.all().iter().find(|p| p.id == position_id).cloned()
                    };
                    if let Some(position) = expired {
                        self.pending_calibration.lock().await.remove(&position.id);
                        self.notifier.on_paper_position_expired(&position).await;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(market_id = %market_id, error = %e, "resolution poll failed");
                }
            }
        }
    }

    /// Builds and ingests a `CalibrationRecord` from a just-resolved paper
    /// position, advances the consecutive-invalidation counter, and fires
    /// the resolved notifier hook. A win resets the counter; a loss is
    /// treated the way an invalidation-triggered exit would be, since paper
    /// positions here don't distinguish an invalidation exit from riding a
    /// market to an adverse resolution.
    async fn on_paper_position_resolved(&self, position: &crate::models::PaperPosition) {
        let pending = self.pending_calibration.lock().await.remove(&position.id);
        if let (Some(outcome), Some(resolved_at)) = (position.actual_outcome, position.resolved_timestamp) {
            if let Some(pending) = pending {
                self.calibration_ingest(CalibrationRecord {
                    market_id: position.market_id.clone(),
                    belief_low_at_entry: position.belief_low,
                    belief_high_at_entry: position.belief_high,
                    confidence_at_entry: pending.confidence_at_entry,
                    unknowns_at_entry: pending.unknowns_at_entry,
                    outcome,
                    resolved_at,
                    edge_at_entry: pending.edge_at_entry,
                })
                .await;
            }
        }

        match position.status {
            crate::models::PaperPositionStatus::Loss => self.record_invalidation_exit().await,
            crate::models::PaperPositionStatus::Win => self.record_non_invalidation_exit().await,
            _ => {}
        }

        if let Some(pnl) = position.pnl {
            let mut daily = self.daily_pnl.lock().await;
            let today = Utc::now().date_naive();
            if daily.0 != today {
                *daily = (today, 0.0);
            }
            daily.1 += pnl;
        }

        self.notifier.on_paper_position_resolved(position).await;
    }

    pub async fn calibration_ingest(&self, record: crate::models::CalibrationRecord) {
        let mut tracker = self.calibration.lock().await;
        tracker.ingest(record);

        if let Some(recommendation) = tracker.adjustment_recommendation(
            self.config.calibration_adjustment_min_sample,
            self.config.calibration_adjustment_wide_sample,
        ) {
            info!(
                widen_category_thresholds_by = recommendation.widen_category_thresholds_by,
                confidence_offset_delta = recommendation.confidence_offset_delta,
                narrow_belief_ranges_by = recommendation.narrow_belief_ranges_by,
                "calibration adjustment recommendation updated"
            );
            *self.adjustment.lock().await = recommendation;
        }

        let halt = tracker.halt_check(
            *self.consecutive_invalidations.lock().await,
            self.config.calibration_unknown_density_epsilon,
            self.config.calibration_min_sample,
            self.config.calibration_coverage_tolerance,
            self.config.calibration_bucket_min_samples,
        );
        if let Some(halt) = halt {
            drop(tracker);
            self.force_halt(&halt.0).await;
        }
    }

    pub async fn record_invalidation_exit(&self) {
        let mut count = self.consecutive_invalidations.lock().await;
        *count += 1;
    }

    pub async fn record_non_invalidation_exit(&self) {
        let mut count = self.consecutive_invalidations.lock().await;
        *count = 0;
    }

    pub async fn paper_tracker_snapshot(&self) -> crate::paper::PaperMetrics {
        self.paper_tracker.lock().await.metrics()
    }

    pub async fn calibration_snapshot(&self) -> crate::calibration::CalibrationMetrics {
        self.calibration.lock().await.metrics()
    }

    pub async fn calibration_buckets_snapshot(&self) -> Vec<crate::paper::CalibrationBucket> {
        self.paper_tracker.lock().await.calibration_buckets()
    }

    /// Most recently computed calibration auto-adjustment recommendation
    /// (comment 3's consumption path): active application happens inside
    /// [`Orchestrator::update_belief`] / [`Orchestrator::effective_config`];
    /// this is the read-only surface the query API exposes it through.
    pub async fn adjustment_snapshot(&self) -> AdjustmentRecommendation {
        self.adjustment.lock().await.clone()
    }

    /// Aggregate read-only portfolio status (spec.md §6): current value,
    /// drawdown relative to the running peak, and open-position count
    /// against the configured cap.
    pub async fn portfolio_status(&self) -> PortfolioStatus {
        let total_value = self.portfolio_total_value().await;
        let drawdown = self.drawdown_guard.lock().await.current_drawdown(total_value);
        let open_positions = self.paper_tracker.lock().await.open().len();
        PortfolioStatus {
            starting_capital: self.starting_capital,
            total_value,
            current_drawdown: drawdown,
            open_positions,
            max_open_positions: self.config.max_open_positions,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PortfolioStatus {
    pub starting_capital: f64,
    pub total_value: f64,
    pub current_drawdown: f64,
    pub open_positions: usize,
    pub max_open_positions: usize,
}
