//! Belief Engine (C1)
//!
//! Maintains the per-market probabilistic belief range and its confidence.
//! Every public function here is pure: no I/O, no shared state, no clock
//! reads beyond the timestamps callers pass in. The orchestrator is
//! responsible for batching signals gathered within one tick and for
//! threading the resulting state back into the per-market MarketState.

use crate::models::{BeliefState, Signal, SignalType};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Widen/shrink belief bounds by applying one signal's shift and, if it
/// conflicts with the existing belief, symmetric widening. Confidence and
/// unknowns are left untouched — see [`recompute_confidence_fresh`] and
/// [`decay_confidence`]. `impact_caps` is `Config::impact_caps`; a signal
/// type missing from the map falls back to its spec-default cap.
pub fn apply_signal(state: &BeliefState, signal: &Signal, impact_caps: &HashMap<SignalType, f64>) -> BeliefState {
    let mut next = state.clone();

    let range_width = next.belief_high - next.belief_low;
    let cap = impact_caps
        .get(&signal.signal_type)
        .copied()
        .unwrap_or_else(|| signal.signal_type.impact_cap());
    let max_shift = cap * (signal.strength as f64 / 5.0);
    let shift = max_shift.min(range_width * 0.6);
    let dir = signal.direction.sign();

    next.belief_low += shift * dir;
    next.belief_high += shift * dir;

    if signal.conflicts_with_existing {
        let widen = range_width * 0.25;
        next.belief_low -= widen;
        next.belief_high += widen;
    }

    clamp_bounds(&mut next);
    next.last_updated = signal.timestamp;
    next
}

fn clamp_bounds(state: &mut BeliefState) {
    state.belief_low = state.belief_low.clamp(0.0, 100.0);
    state.belief_high = state.belief_high.clamp(0.0, 100.0);
    if state.belief_high < state.belief_low {
        state.belief_high = state.belief_low;
    }
}

/// Orchestrator-facing entry point. Applies I6 (speculative-only batches are
/// a no-op on belief bounds), then folds every signal through
/// [`apply_signal`] in source-declared order, then recomputes confidence
/// "fresh" over the whole batch (spec.md §4.1/§9: fresh immediately after a
/// signal-driven update).
pub fn apply_signal_batch(
    state: &BeliefState,
    signals: &[Signal],
    now: DateTime<Utc>,
    impact_caps: &HashMap<SignalType, f64>,
) -> BeliefState {
    if signals.is_empty() || signals.iter().all(Signal::is_speculative) {
        return state.clone();
    }

    let mut next = signals
        .iter()
        .fold(state.clone(), |acc, s| apply_signal(&acc, s, impact_caps));

    let n_authoritative = signals
        .iter()
        .filter(|s| s.signal_type == crate::models::SignalType::Authoritative)
        .count();
    let n_procedural = signals
        .iter()
        .filter(|s| s.signal_type == crate::models::SignalType::Procedural)
        .count();
    let has_conflicts = signals.iter().any(|s| s.conflicts_with_existing);
    let days_since_last_signal = (now - state.last_updated).num_seconds() as f64 / 86_400.0;

    next.confidence = recompute_confidence_fresh(
        n_authoritative,
        n_procedural,
        next.unknowns.len(),
        has_conflicts,
        days_since_last_signal.max(0.0),
    );
    next
}

/// "Fresh" confidence formula: used immediately after a signal-driven update.
pub fn recompute_confidence_fresh(
    n_authoritative: usize,
    n_procedural: usize,
    n_unknowns: usize,
    has_conflicts: bool,
    days_since_last_signal: f64,
) -> f64 {
    let conf = 50.0 + 10.0 * n_authoritative as f64 + 5.0 * n_procedural as f64
        - 7.0 * n_unknowns as f64
        - if has_conflicts { 10.0 } else { 0.0 }
        - 0.5 * days_since_last_signal;
    conf.clamp(30.0, 95.0)
}

/// "Decay" confidence formula: used when no signal-driven update occurred
/// this tick, only the passage of time and the current unknowns ledger.
pub fn decay_confidence(state: &BeliefState, days_since_last_signal: f64, unknown_count: usize) -> f64 {
    let conf = state.confidence - 7.0 * unknown_count as f64 - 0.5 * days_since_last_signal;
    conf.clamp(30.0, 95.0)
}

/// I3: if unknowns strictly grew, confidence must not have strictly grown.
pub fn validate_confidence_invariant(before: &BeliefState, after: &BeliefState) -> bool {
    if after.unknowns.len() > before.unknowns.len() {
        after.confidence <= before.confidence
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_impact_caps, Direction, SignalType};

    fn belief(low: f64, high: f64, confidence: f64) -> BeliefState {
        BeliefState {
            belief_low: low,
            belief_high: high,
            confidence,
            unknowns: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// S1: {40,60,conf:55} + authoritative/up/strength4/no-conflict -> {52,72}.
    #[test]
    fn seeded_scenario_s1_matches_within_tolerance() {
        let state = belief(40.0, 60.0, 55.0);
        let signal = Signal::new(SignalType::Authoritative, Direction::Up, 4, "test");
        let next = apply_signal(&state, &signal, &default_impact_caps());
        assert!((next.belief_low - 52.0).abs() < 0.5);
        assert!((next.belief_high - 72.0).abs() < 0.5);
    }

    /// S3: decay with prior 70, unknowns=2, days=10 -> 51.
    #[test]
    fn seeded_scenario_s3_confidence_decay() {
        let state = belief(40.0, 60.0, 70.0);
        let conf = decay_confidence(&state, 10.0, 2);
        assert!((conf - 51.0).abs() < 0.5);
    }

    /// P1: bounds stay within [0,100] and ordered, across random inputs.
    #[test]
    fn property_bounds_always_valid() {
        let caps = default_impact_caps();
        let mut rng_state: u64 = 0x1234_5678_9abc_def0;
        let mut next_rand = move || {
            rng_state ^= rng_state << 13;
            rng_state ^= rng_state >> 7;
            rng_state ^= rng_state << 17;
            rng_state
        };

        for _ in 0..2000 {
            let low = (next_rand() % 101) as f64;
            let width = (next_rand() % 60) as f64;
            let high = (low + width).min(100.0);
            let state = belief(low, high, 50.0 + (next_rand() % 40) as f64);

            let types = [
                SignalType::Authoritative,
                SignalType::Procedural,
                SignalType::Quantitative,
                SignalType::Interpretive,
                SignalType::Speculative,
            ];
            let dirs = [Direction::Up, Direction::Down, Direction::Neutral];
            let signal_type = types[(next_rand() % 5) as usize];
            let direction = dirs[(next_rand() % 3) as usize];
            let strength = 1 + (next_rand() % 5) as u8;
            let conflicts = next_rand() % 2 == 0;

            let signal = Signal::new(signal_type, direction, strength, "fuzz").conflicting(conflicts);
            let next = apply_signal(&state, &signal, &caps);

            assert!(next.belief_low >= 0.0 && next.belief_low <= 100.0);
            assert!(next.belief_high >= 0.0 && next.belief_high <= 100.0);
            assert!(next.belief_low <= next.belief_high);
        }
    }

    /// B2: shift capped at rangeWidth * 0.6 even at maximum strength.
    #[test]
    fn boundary_shift_capped_at_six_tenths_of_width() {
        let state = belief(45.0, 55.0, 50.0); // width 10, cap would be 0.6*10=6
        let signal = Signal::new(SignalType::Authoritative, Direction::Up, 5, "test"); // cap 20
        let next = apply_signal(&state, &signal, &default_impact_caps());
        assert!((next.belief_low - 51.0).abs() < 1e-9);
        assert!((next.belief_high - 61.0).abs() < 1e-9);
    }

    /// B3: conflict widening uses pre-shift width regardless of direction.
    #[test]
    fn boundary_conflict_widening_uses_pre_shift_width() {
        let state = belief(40.0, 60.0, 50.0); // width 20
        let signal = Signal::new(SignalType::Procedural, Direction::Neutral, 1, "test").conflicting(true);
        let next = apply_signal(&state, &signal, &default_impact_caps());
        // neutral -> no shift; widen by width*0.25 = 5 on each side
        assert!((next.belief_low - 35.0).abs() < 1e-9);
        assert!((next.belief_high - 65.0).abs() < 1e-9);
    }

    /// P4 / I6: speculative-only batches are identity on belief bounds.
    #[test]
    fn speculative_only_batch_is_identity() {
        let state = belief(40.0, 60.0, 50.0);
        let signal = Signal::new(SignalType::Speculative, Direction::Up, 5, "rumor");
        let next = apply_signal_batch(&state, &[signal], Utc::now(), &default_impact_caps());
        assert_eq!(next.belief_low, state.belief_low);
        assert_eq!(next.belief_high, state.belief_high);
    }

    /// A non-speculative signal accompanying a speculative one still applies.
    #[test]
    fn speculative_with_companion_signal_applies() {
        let state = belief(40.0, 60.0, 50.0);
        let speculative = Signal::new(SignalType::Speculative, Direction::Up, 5, "rumor");
        let authoritative = Signal::new(SignalType::Authoritative, Direction::Up, 1, "official");
        let next = apply_signal_batch(&state, &[authoritative, speculative], Utc::now(), &default_impact_caps());
        assert_ne!(next.belief_low, state.belief_low);
    }

    /// B1: confidence clamps exactly at 30 and 95.
    #[test]
    fn boundary_confidence_clamps() {
        assert_eq!(recompute_confidence_fresh(0, 0, 50, true, 1000.0), 30.0);
        assert_eq!(recompute_confidence_fresh(10, 10, 0, false, 0.0), 95.0);
    }

    /// P3 / I3: unknowns growing strictly forbids confidence from strictly growing.
    #[test]
    fn invariant_i3_rejects_confidence_rise_with_more_unknowns() {
        let mut before = belief(40.0, 60.0, 50.0);
        before.unknowns = vec![crate::models::Unknown::new("q1")];
        let mut after = before.clone();
        after.unknowns.push(crate::models::Unknown::new("q2"));
        after.confidence = 51.0; // rose despite more unknowns: invalid
        assert!(!validate_confidence_invariant(&before, &after));

        after.confidence = 49.0;
        assert!(validate_confidence_invariant(&before, &after));
    }
}
