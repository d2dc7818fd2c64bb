//! Paper-Trading Tracker (C6)
//!
//! In-memory-only simulated position ledger, grounded on the shares/cash
//! bookkeeping style of a paper ledger elsewhere in this codebase's lineage,
//! adapted to the percentage-basis P&L this system's positions use (entry
//! and exit prices in `[0,100]`, not `(0,1)` share prices).

use crate::models::{Category, Outcome, PaperPosition, PaperPositionStatus, Side};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CreatePositionParams {
    pub market_id: String,
    pub side: Side,
    pub size_usd: f64,
    pub limit_price: f64,
    pub belief_low: f64,
    pub belief_high: f64,
    pub edge: f64,
    pub category: Category,
}

#[derive(Debug, Default)]
pub struct PaperTracker {
    positions: HashMap<Uuid, PaperPosition>,
}

impl PaperTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_position(&mut self, params: CreatePositionParams) -> PaperPosition {
        let position = PaperPosition {
            id: Uuid::new_v4(),
            market_id: params.market_id,
            side: params.side,
            size_usd: params.size_usd,
            limit_price: params.limit_price,
            belief_low: params.belief_low,
            belief_high: params.belief_high,
            edge: params.edge,
            entry_timestamp: Utc::now(),
            status: PaperPositionStatus::Open,
            actual_outcome: None,
            exit_price: None,
            pnl: None,
            resolved_timestamp: None,
            category: params.category,
        };
        self.positions.insert(position.id, position.clone());
        position
    }

    /// R1: idempotent by position id. A second call with the same id is a
    /// no-op once the position is already resolved.
    pub fn resolve(&mut self, position_id: Uuid, outcome: Outcome, exit_price: f64) {
        let Some(position) = self.positions.get_mut(&position_id) else {
            return;
        };
        if position.status != PaperPositionStatus::Open {
            return;
        }

        let pnl = (exit_price - position.limit_price) * position.size_usd / 100.0;
        let pnl = match position.side {
            Side::Yes => pnl,
            Side::No => -pnl,
            Side::None => 0.0,
        };

        position.actual_outcome = Some(outcome);
        position.exit_price = Some(exit_price);
        position.pnl = Some(pnl);
        position.resolved_timestamp = Some(Utc::now());
        position.status = if pnl >= 0.0 {
            PaperPositionStatus::Win
        } else {
            PaperPositionStatus::Loss
        };
    }

    pub fn expire(&mut self, position_id: Uuid) {
        let Some(position) = self.positions.get_mut(&position_id) else {
            return;
        };
        if position.status != PaperPositionStatus::Open {
            return;
        }
        position.status = PaperPositionStatus::Expired;
        position.resolved_timestamp = Some(Utc::now());
    }

    pub fn all(&self) -> Vec<&PaperPosition> {
        self.positions.values().collect()
    }

    pub fn open(&self) -> Vec<&PaperPosition> {
        self.positions
            .values()
            .filter(|p| p.status == PaperPositionStatus::Open)
            .collect()
    }

    pub fn resolved(&self) -> Vec<&PaperPosition> {
        self.positions
            .values()
            .filter(|p| matches!(p.status, PaperPositionStatus::Win | PaperPositionStatus::Loss))
            .collect()
    }

    pub fn metrics(&self) -> PaperMetrics {
        compute_metrics(&self.resolved().into_iter().cloned().collect::<Vec<_>>())
    }

    pub fn calibration_buckets(&self) -> Vec<CalibrationBucket> {
        compute_buckets(&self.resolved().into_iter().cloned().collect::<Vec<_>>())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaperMetrics {
    pub win_rate: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub profit_factor: f64,
    pub edge_accuracy: f64,
    pub belief_coverage: f64,
    pub per_category: HashMap<String, CategoryRollup>,
}

#[derive(Debug, Clone, Default)]
pub struct CategoryRollup {
    pub count: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
}

fn compute_metrics(resolved: &[PaperPosition]) -> PaperMetrics {
    if resolved.is_empty() {
        return PaperMetrics::default();
    }

    let wins: Vec<&PaperPosition> = resolved
        .iter()
        .filter(|p| p.status == PaperPositionStatus::Win)
        .collect();
    let losses: Vec<&PaperPosition> = resolved
        .iter()
        .filter(|p| p.status == PaperPositionStatus::Loss)
        .collect();

    let win_rate = wins.len() as f64 / resolved.len() as f64;

    let total_wins: f64 = wins.iter().filter_map(|p| p.pnl).sum();
    let total_losses: f64 = losses.iter().filter_map(|p| p.pnl).map(|v| v.abs()).sum();

    let average_win = if wins.is_empty() { 0.0 } else { total_wins / wins.len() as f64 };
    let average_loss = if losses.is_empty() { 0.0 } else { total_losses / losses.len() as f64 };

    let profit_factor = if total_losses == 0.0 {
        if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    } else {
        total_wins / total_losses
    };

    let edge_accuracy = win_rate;

    let belief_coverage_hits = resolved
        .iter()
        .filter(|p| match p.actual_outcome {
            Some(Outcome::Yes) => p.belief_high >= 50.0,
            Some(Outcome::No) => p.belief_low <= 50.0,
            None => false,
        })
        .count();
    let belief_coverage = belief_coverage_hits as f64 / resolved.len() as f64;

    let mut per_category: HashMap<String, CategoryRollup> = HashMap::new();
    for position in resolved {
        let key = format!("{:?}", position.category);
        let entry = per_category.entry(key).or_default();
        entry.count += 1;
        entry.total_pnl += position.pnl.unwrap_or(0.0);
        if position.status == PaperPositionStatus::Win {
            entry.win_rate += 1.0;
        }
    }
    for rollup in per_category.values_mut() {
        if rollup.count > 0 {
            rollup.win_rate /= rollup.count as f64;
        }
    }

    PaperMetrics {
        win_rate,
        average_win,
        average_loss,
        profit_factor,
        edge_accuracy,
        belief_coverage,
        per_category,
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CalibrationBucket {
    pub range: (f64, f64),
    pub predicted_probability: f64,
    pub actual_win_rate: f64,
    pub calibration_error: f64,
    pub sample_size: usize,
}

const BUCKET_RANGES: [(f64, f64); 5] = [(0.0, 60.0), (60.0, 70.0), (70.0, 80.0), (80.0, 90.0), (90.0, 100.0)];

fn compute_buckets(resolved: &[PaperPosition]) -> Vec<CalibrationBucket> {
    BUCKET_RANGES
        .iter()
        .map(|&(low, high)| {
            let in_bucket: Vec<&PaperPosition> = resolved
                .iter()
                .filter(|p| {
                    let midpoint = (p.belief_low + p.belief_high) / 2.0;
                    if high >= 100.0 {
                        midpoint >= low && midpoint <= high
                    } else {
                        midpoint >= low && midpoint < high
                    }
                })
                .collect();

            let predicted_probability = (low + high) / 2.0;
            let sample_size = in_bucket.len();
            let actual_win_rate = if sample_size == 0 {
                0.0
            } else {
                in_bucket.iter().filter(|p| p.status == PaperPositionStatus::Win).count() as f64
                    / sample_size as f64
            };
            let calibration_error = (predicted_probability / 100.0 - actual_win_rate).abs();

            CalibrationBucket {
                range: (low, high),
                predicted_probability,
                actual_win_rate,
                calibration_error,
                sample_size,
            }
        })
        .collect()
}

/// Brier score across all resolved positions, using the entry belief
/// midpoint as the predicted probability.
pub fn brier_score(resolved: &[PaperPosition]) -> f64 {
    if resolved.is_empty() {
        return 0.0;
    }
    let sum: f64 = resolved
        .iter()
        .map(|p| {
            let predicted = (p.belief_low + p.belief_high) / 2.0 / 100.0;
            let outcome_indicator = if p.status == PaperPositionStatus::Win { 1.0 } else { 0.0 };
            (predicted - outcome_indicator).powi(2)
        })
        .sum();
    sum / resolved.len() as f64
}
