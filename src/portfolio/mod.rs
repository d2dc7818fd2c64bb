//! Portfolio Manager (C7)
//!
//! Fractional-Kelly position sizing, category/keyword diversification
//! checks, and a running-peak drawdown guard. Sizing here is the simplified
//! edge-based formula; for a confidence/price-based full Kelly curve see
//! `vault::kelly` in the wider pack this crate was derived from.

use crate::models::Category;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct SizingParams {
    pub kelly_fraction: f64,
    pub max_risk_per_trade: f64,
    pub total_capital: f64,
}

impl Default for SizingParams {
    fn default() -> Self {
        Self {
            kelly_fraction: 0.25,
            max_risk_per_trade: 0.02,
            total_capital: 10_000.0,
        }
    }
}

/// `recommendedFraction = clamp(edge * kellyFraction, 0, 0.5)`, then capped
/// by `maxRiskPerTrade * totalCapital`. Negative edge yields size 0.
pub fn size_position(edge: f64, params: &SizingParams) -> f64 {
    if edge <= 0.0 {
        return 0.0;
    }
    let recommended_fraction = (edge * params.kelly_fraction).clamp(0.0, 0.5);
    let size_usd = recommended_fraction * params.total_capital;
    let cap = params.max_risk_per_trade * params.total_capital;
    size_usd.min(cap)
}

#[derive(Debug, Clone)]
pub struct DiversificationReport {
    pub concentration: f64,
    pub max_keyword_overlap: f64,
    pub flagged: bool,
}

/// Concentration = positions-in-same-category / total-positions; overlap is
/// the maximum word-token Jaccard similarity of `question` against every
/// open position's question. Flags when concentration >= 0.5 or overlap >=
/// `correlation_threshold` (default 0.7).
pub fn check_diversification(
    candidate_category: Category,
    candidate_question: &str,
    open_positions: &[(Category, String)],
    correlation_threshold: f64,
) -> DiversificationReport {
    if open_positions.is_empty() {
        return DiversificationReport {
            concentration: 0.0,
            max_keyword_overlap: 0.0,
            flagged: false,
        };
    }

    let same_category = open_positions
        .iter()
        .filter(|(cat, _)| *cat == candidate_category)
        .count();
    let concentration = same_category as f64 / open_positions.len() as f64;

    let candidate_tokens = tokenize(candidate_question);
    let max_overlap = open_positions
        .iter()
        .map(|(_, question)| jaccard(&candidate_tokens, &tokenize(question)))
        .fold(0.0_f64, f64::max);

    let flagged = concentration >= 0.5 || max_overlap >= correlation_threshold;

    DiversificationReport {
        concentration,
        max_keyword_overlap: max_overlap,
        flagged,
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[derive(Debug, Clone, Default)]
pub struct DrawdownGuard {
    peak_total_value: f64,
}

impl DrawdownGuard {
    pub fn new(initial_value: f64) -> Self {
        Self {
            peak_total_value: initial_value,
        }
    }

    pub fn observe(&mut self, total_value: f64) {
        if total_value > self.peak_total_value {
            self.peak_total_value = total_value;
        }
    }

    pub fn current_drawdown(&self, total_value: f64) -> f64 {
        if self.peak_total_value <= 0.0 {
            0.0
        } else {
            ((self.peak_total_value - total_value) / self.peak_total_value).max(0.0)
        }
    }

    /// Trading is blocked when `currentDrawdown > maxDrawdownPercent` (default 0.10).
    pub fn trading_blocked(&self, total_value: f64, max_drawdown_percent: f64) -> bool {
        self.current_drawdown(total_value) > max_drawdown_percent
    }
}
