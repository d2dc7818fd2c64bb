//! Trade Eligibility & Edge Engine (C2)
//!
//! Runs the eight ordered gates from spec.md §4.2 against a belief/market
//! pair and, if every gate passes, produces a [`TradeDecision`] carrying a
//! mandatory exit plan. The first failing gate short-circuits evaluation —
//! callers get the name of that gate, not a generic rejection.

use crate::config::Config;
use crate::models::{
    BeliefState, ExitCondition, ExitKind, Market, ResolutionCriteria, Side, TradeDecision,
};
use chrono::Utc;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    AuthorityClear,
    OutcomeObjective,
    MinLiquidity,
    MaxBeliefWidth,
    MinConfidence,
    PriceOutsideBelief,
    MinEdge,
    ExitPlan,
}

impl Gate {
    pub fn name(self) -> &'static str {
        match self {
            Gate::AuthorityClear => "authority_is_clear",
            Gate::OutcomeObjective => "outcome_is_objective",
            Gate::MinLiquidity => "min_liquidity",
            Gate::MaxBeliefWidth => "max_belief_width",
            Gate::MinConfidence => "min_confidence",
            Gate::PriceOutsideBelief => "price_outside_belief",
            Gate::MinEdge => "min_edge",
            Gate::ExitPlan => "exit_plan",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub gate: Gate,
    pub detail: String,
}

/// Run all eight gates in order; return the approved decision or the first
/// failing gate.
pub fn evaluate(
    belief: &BeliefState,
    market: &Market,
    criteria: &ResolutionCriteria,
    config: &Config,
) -> Result<TradeDecision, Rejection> {
    if !criteria.authority_is_clear {
        return Err(Rejection {
            gate: Gate::AuthorityClear,
            detail: "resolution authority is not clear".into(),
        });
    }
    if !criteria.outcome_is_objective {
        return Err(Rejection {
            gate: Gate::OutcomeObjective,
            detail: "resolution outcome is not objective".into(),
        });
    }
    if market.liquidity < config.min_liquidity {
        return Err(Rejection {
            gate: Gate::MinLiquidity,
            detail: format!(
                "liquidity {:.2} below minimum {:.2}",
                market.liquidity, config.min_liquidity
            ),
        });
    }
    let width = belief.width();
    if width > config.max_belief_width {
        return Err(Rejection {
            gate: Gate::MaxBeliefWidth,
            detail: format!("belief width {width:.2} exceeds max {:.2}", config.max_belief_width),
        });
    }
    if belief.confidence < config.min_confidence {
        return Err(Rejection {
            gate: Gate::MinConfidence,
            detail: format!(
                "confidence {:.2} below minimum {:.2}",
                belief.confidence, config.min_confidence
            ),
        });
    }

    let (side, edge_points) = match side_and_edge(belief, market) {
        Some(v) => v,
        None => {
            return Err(Rejection {
                gate: Gate::PriceOutsideBelief,
                detail: format!(
                    "price {:.2} lies within belief [{:.2}, {:.2}]",
                    market.current_price, belief.belief_low, belief.belief_high
                ),
            })
        }
    };

    let threshold = config
        .category_edge_thresholds
        .get(&market.category)
        .copied()
        .unwrap_or_else(|| market.category.min_edge());
    let edge_fraction = edge_points / 100.0;
    if edge_fraction < threshold {
        return Err(Rejection {
            gate: Gate::MinEdge,
            detail: format!(
                "edge {:.4} below category ({:?}) threshold {:.4}",
                edge_fraction, market.category, threshold
            ),
        });
    }

    let exit_conditions = build_exit_plan(belief, side);
    if exit_conditions.len() < 3
        || !exit_conditions.iter().any(|e| e.kind == ExitKind::Invalidation)
        || !exit_conditions.iter().any(|e| e.kind == ExitKind::Profit)
    {
        return Err(Rejection {
            gate: Gate::ExitPlan,
            detail: "exit plan missing a required invalidation/profit entry".into(),
        });
    }

    let rationale = format!(
        "{:?} @ {:.2} vs belief [{:.2}, {:.2}] (edge {:.2}, confidence {:.1})",
        side, market.current_price, belief.belief_low, belief.belief_high, edge_points, belief.confidence
    );
    let rationale_hash = hash_rationale(&rationale);

    Ok(TradeDecision {
        market_id: market.id.clone(),
        side,
        entry_price: market.current_price,
        edge: edge_fraction,
        size_usd: 0.0, // filled in by C7
        exit_conditions,
        rationale,
        rationale_hash,
        timestamp: Utc::now(),
    })
}

/// Gate 6 + side/edge derivation (spec.md §4.2). Returns `None` when price
/// lies within `[beliefLow, beliefHigh]` (no eligible side).
pub fn side_and_edge(belief: &BeliefState, market: &Market) -> Option<(Side, f64)> {
    if market.current_price < belief.belief_low {
        Some((Side::Yes, belief.belief_low - market.current_price))
    } else if market.current_price > belief.belief_high {
        Some((Side::No, market.current_price - belief.belief_high))
    } else {
        None
    }
}

fn build_exit_plan(belief: &BeliefState, side: Side) -> Vec<ExitCondition> {
    let width = belief.width();
    let midpoint = (belief.belief_low + belief.belief_high) / 2.0;
    vec![
        ExitCondition {
            kind: ExitKind::Invalidation,
            description: format!(
                "belief shifts against the {:?} position by >= 50% of entry width ({:.2} pts)",
                side,
                width * 0.5
            ),
            trigger_price: None,
        },
        ExitCondition {
            kind: ExitKind::Profit,
            description: format!("market price crosses entry belief midpoint {midpoint:.2}"),
            trigger_price: Some(midpoint),
        },
        ExitCondition {
            kind: ExitKind::Emergency,
            description: "invariant breach or signal-source outage".to_string(),
            trigger_price: None,
        },
    ]
}

fn hash_rationale(rationale: &str) -> String {
    let digest = Sha256::digest(rationale.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use chrono::Duration;

    fn config() -> Config {
        Config::for_tests()
    }

    fn belief(low: f64, high: f64, confidence: f64) -> BeliefState {
        BeliefState {
            belief_low: low,
            belief_high: high,
            confidence,
            unknowns: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    fn market(price: f64, liquidity: f64, category: Category) -> Market {
        Market {
            id: "m1".into(),
            question: "Will X happen?".into(),
            resolution_criteria: ResolutionCriteria {
                authority_is_clear: true,
                outcome_is_objective: true,
            },
            category,
            current_price: price,
            liquidity,
            volume_24h: 100_000.0,
            created_at: Utc::now() - Duration::days(5),
            closes_at: Utc::now() + Duration::days(5),
            resolved_at: None,
            resolution_outcome: None,
            closed: false,
        }
    }

    /// S4: belief {65,80,conf78} vs price 52, crypto -> edge 13 < threshold 15 -> rejected at gate 7.
    #[test]
    fn seeded_scenario_s4_rejects_at_min_edge() {
        let belief = belief(65.0, 80.0, 78.0);
        let market = market(52.0, 50_000.0, Category::Crypto);
        let criteria = market.resolution_criteria;
        let err = evaluate(&belief, &market, &criteria, &config()).unwrap_err();
        assert_eq!(err.gate, Gate::MinEdge);
    }

    /// S5: belief {40,75,conf85} vs price 20 -> width 35 > 25 -> rejected at gate 4.
    #[test]
    fn seeded_scenario_s5_rejects_at_max_belief_width() {
        let belief = belief(40.0, 75.0, 85.0);
        let market = market(20.0, 50_000.0, Category::Politics);
        let criteria = market.resolution_criteria;
        let err = evaluate(&belief, &market, &criteria, &config()).unwrap_err();
        assert_eq!(err.gate, Gate::MaxBeliefWidth);
    }

    /// P8: gates fail in canonical declared order, first failure wins.
    #[test]
    fn gates_fail_in_declared_order() {
        let belief = belief(65.0, 80.0, 40.0); // confidence fails too, but width also fine
        let mut market = market(52.0, 1_000.0, Category::Crypto); // liquidity fails too
        market.resolution_criteria.authority_is_clear = false; // should win over everything else
        let criteria = market.resolution_criteria;
        let err = evaluate(&belief, &market, &criteria, &config()).unwrap_err();
        assert_eq!(err.gate, Gate::AuthorityClear);
    }

    /// P5 / I4: every approved decision has entryPrice strictly outside belief on the right side.
    #[test]
    fn approved_decision_respects_i4() {
        let belief = belief(40.0, 50.0, 80.0);
        let market = market(30.0, 50_000.0, Category::Weather);
        let criteria = market.resolution_criteria;
        let decision = evaluate(&belief, &market, &criteria, &config()).unwrap();
        assert_eq!(decision.side, Side::Yes);
        assert!(decision.entry_price < belief.belief_low);
    }

    /// P6 / I5: every approved decision has >=1 invalidation and >=1 profit exit.
    #[test]
    fn approved_decision_has_required_exits() {
        let belief = belief(40.0, 50.0, 80.0);
        let market = market(30.0, 50_000.0, Category::Weather);
        let criteria = market.resolution_criteria;
        let decision = evaluate(&belief, &market, &criteria, &config()).unwrap();
        assert!(decision.exit_conditions.iter().any(|e| e.kind == ExitKind::Invalidation));
        assert!(decision.exit_conditions.iter().any(|e| e.kind == ExitKind::Profit));
        assert!(decision.exit_conditions.len() >= 3);
    }

    /// B4: unknown category routes to the conservative 0.25 threshold.
    #[test]
    fn boundary_unknown_category_uses_conservative_threshold() {
        assert_eq!(Category::Other.min_edge(), 0.25);
    }

    #[test]
    fn rationale_hash_is_stable_for_identical_rationale() {
        let a = hash_rationale("same text");
        let b = hash_rationale("same text");
        assert_eq!(a, b);
        let c = hash_rationale("different text");
        assert_ne!(a, c);
    }
}
