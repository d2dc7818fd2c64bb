//! Trading State Machine (C3)
//!
//! Guards legal transitions and absorbs into HALT on any invariant or
//! illegal-transition event. Single-writer: callers serialize transitions
//! through one [`StateMachine`] behind a lock the orchestrator owns (see
//! `orchestrator::Orchestrator`).

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Observe,
    IngestSignal,
    UpdateBelief,
    EvaluateTrade,
    ExecuteTrade,
    Monitor,
    Halt,
}

#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: State,
    pub to: State,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    current: State,
    history: Vec<TransitionRecord>,
    halt_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub attempted_from: State,
    pub attempted_to: State,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: State::Observe,
            history: Vec::new(),
            halt_reason: None,
        }
    }

    pub fn state(&self) -> State {
        self.current
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.current, State::Halt)
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Attempt a legal transition. Any transition outside the declared
    /// legal-transition matrix is itself an invariant violation and forces
    /// HALT instead of returning the requested state.
    pub fn transition(&mut self, to: State) -> Result<State, TransitionError> {
        if is_legal(self.current, to) {
            self.record(self.current, to, None);
            self.current = to;
            Ok(to)
        } else {
            let err = TransitionError {
                attempted_from: self.current,
                attempted_to: to,
            };
            let reason = format!(
                "illegal transition {:?} -> {:?}",
                err.attempted_from, err.attempted_to
            );
            self.record(self.current, State::Halt, Some(reason.clone()));
            self.current = State::Halt;
            self.halt_reason = Some(reason);
            Err(err)
        }
    }

    /// Forced HALT from anywhere, for invariant breaches and calibration
    /// halts. Idempotent: calling again on an already-halted machine just
    /// appends to history with the new reason.
    pub fn force_halt(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.record(self.current, State::Halt, Some(reason.clone()));
        self.current = State::Halt;
        self.halt_reason = Some(reason);
    }

    /// P7: the only way out of HALT. Requires an explicit operator call;
    /// nothing internal to the machine may invoke this.
    pub fn operator_reset(&mut self) {
        self.record(self.current, State::Observe, Some("operator reset".to_string()));
        self.current = State::Observe;
        self.halt_reason = None;
    }

    fn record(&mut self, from: State, to: State, reason: Option<String>) {
        self.history.push(TransitionRecord {
            from,
            to,
            at: Utc::now(),
            reason,
        });
    }
}

fn is_legal(from: State, to: State) -> bool {
    use State::*;
    matches!(
        (from, to),
        (Observe, IngestSignal)
            | (IngestSignal, UpdateBelief)
            | (UpdateBelief, EvaluateTrade)
            | (EvaluateTrade, ExecuteTrade)
            | (EvaluateTrade, Observe)
            | (ExecuteTrade, Monitor)
            | (Monitor, Observe)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use State::*;

    #[test]
    fn legal_cycle_completes_without_halting() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.transition(IngestSignal).unwrap(), IngestSignal);
        assert_eq!(sm.transition(UpdateBelief).unwrap(), UpdateBelief);
        assert_eq!(sm.transition(EvaluateTrade).unwrap(), EvaluateTrade);
        assert_eq!(sm.transition(ExecuteTrade).unwrap(), ExecuteTrade);
        assert_eq!(sm.transition(Monitor).unwrap(), Monitor);
        assert_eq!(sm.transition(Observe).unwrap(), Observe);
        assert!(!sm.is_halted());
    }

    #[test]
    fn no_trade_path_returns_to_observe() {
        let mut sm = StateMachine::new();
        sm.transition(IngestSignal).unwrap();
        sm.transition(UpdateBelief).unwrap();
        sm.transition(EvaluateTrade).unwrap();
        assert_eq!(sm.transition(Observe).unwrap(), Observe);
    }

    /// Any illegal attempted transition forces HALT, not an error-only return.
    #[test]
    fn illegal_transition_forces_halt() {
        let mut sm = StateMachine::new();
        let err = sm.transition(ExecuteTrade).unwrap_err();
        assert_eq!(err.attempted_from, Observe);
        assert_eq!(err.attempted_to, ExecuteTrade);
        assert!(sm.is_halted());
        assert!(sm.halt_reason().unwrap().contains("illegal transition"));
    }

    /// I7 / P7: only operator_reset leaves HALT; further transition() calls fail.
    #[test]
    fn halt_is_absorbing_until_operator_reset() {
        let mut sm = StateMachine::new();
        sm.force_halt("invariant breach");
        assert!(sm.is_halted());
        assert!(sm.transition(Observe).is_err());
        assert!(sm.is_halted());

        sm.operator_reset();
        assert_eq!(sm.state(), Observe);
        assert!(sm.halt_reason().is_none());
    }

    #[test]
    fn full_history_is_retained_for_audit() {
        let mut sm = StateMachine::new();
        sm.transition(IngestSignal).unwrap();
        sm.force_halt("calibration halt");
        sm.operator_reset();
        assert_eq!(sm.history().len(), 3);
        assert_eq!(sm.history()[1].to, Halt);
        assert_eq!(sm.history()[1].reason.as_deref(), Some("calibration halt"));
    }
}
