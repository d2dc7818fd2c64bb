//! Autonomous binary-prediction-market trading bot.
//!
//! Modules map one-to-one onto the components described in DESIGN.md:
//! belief revision (C1), trade eligibility (C2), the trading state machine
//! (C3), calibration (C4), execution (C5), paper-trading (C6), portfolio
//! sizing (C7), batch evaluation (C8), and the orchestrator tick loop (C9).

pub mod api;
pub mod auth;
pub mod batch;
pub mod belief;
pub mod calibration;
pub mod config;
pub mod exchange;
pub mod execution;
pub mod middleware;
pub mod models;
pub mod notifier;
pub mod orchestrator;
pub mod paper;
pub mod portfolio;
pub mod signals;
pub mod state_machine;
pub mod trade;

use auth::AuthState;
use axum::extract::FromRef;
use orchestrator::Orchestrator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub auth: AuthState,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
