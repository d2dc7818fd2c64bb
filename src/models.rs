//! Core data model shared by every component (C1-C9).
//!
//! Probability units: all prices, belief bounds, and outcome indicators are
//! percentages in `[0, 100]`. Edges and fractional Kelly use fractions in
//! `[0, 1]` internally; category edge thresholds are stored as fractions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One discrete piece of evidence about a market's true outcome probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub direction: Direction,
    pub strength: u8, // 1..=5
    pub conflicts_with_existing: bool,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub description: String,
}

impl Signal {
    pub fn new(signal_type: SignalType, direction: Direction, strength: u8, source: &str) -> Self {
        Self {
            signal_type,
            direction,
            strength: strength.clamp(1, 5),
            conflicts_with_existing: false,
            timestamp: Utc::now(),
            source: source.to_string(),
            description: String::new(),
        }
    }

    pub fn conflicting(mut self, conflicts: bool) -> Self {
        self.conflicts_with_existing = conflicts;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_speculative(&self) -> bool {
        matches!(self.signal_type, SignalType::Speculative)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Authoritative,
    Procedural,
    Quantitative,
    Interpretive,
    Speculative,
}

impl SignalType {
    pub const ALL: [SignalType; 5] = [
        SignalType::Authoritative,
        SignalType::Procedural,
        SignalType::Quantitative,
        SignalType::Interpretive,
        SignalType::Speculative,
    ];

    /// Spec-default impact cap, as a percentage of outcome space (spec.md
    /// §4.1). `Config::impact_caps` is the operator-overridable value C1
    /// actually reads; this is only the seed `Config` builds its default from.
    pub fn impact_cap(self) -> f64 {
        match self {
            SignalType::Authoritative => 20.0,
            SignalType::Procedural => 15.0,
            SignalType::Quantitative => 10.0,
            SignalType::Interpretive => 7.0,
            SignalType::Speculative => 3.0,
        }
    }
}

/// Starting point for `Config::impact_caps` before env overrides (spec.md §6).
pub fn default_impact_caps() -> HashMap<SignalType, f64> {
    SignalType::ALL.iter().map(|t| (*t, t.impact_cap())).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
            Direction::Neutral => 0.0,
        }
    }
}

/// One identified open question dragging down confidence in the belief.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unknown {
    pub id: Uuid,
    pub description: String,
    pub added_at: DateTime<Utc>,
}

impl Unknown {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            added_at: Utc::now(),
        }
    }
}

/// Per-market probabilistic belief (C1's state container).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeliefState {
    pub belief_low: f64,
    pub belief_high: f64,
    pub confidence: f64,
    pub unknowns: Vec<Unknown>,
    pub last_updated: DateTime<Utc>,
}

impl Default for BeliefState {
    fn default() -> Self {
        Self {
            belief_low: 40.0,
            belief_high: 60.0,
            confidence: 50.0,
            unknowns: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

impl BeliefState {
    pub fn width(&self) -> f64 {
        self.belief_high - self.belief_low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Weather,
    Sports,
    Politics,
    Economics,
    Crypto,
    Technology,
    Entertainment,
    World,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Weather,
        Category::Sports,
        Category::Politics,
        Category::Economics,
        Category::Crypto,
        Category::Technology,
        Category::Entertainment,
        Category::World,
        Category::Other,
    ];

    /// Spec-default minimum fractional edge required for gate 7 (spec.md
    /// §4.2). `Config::category_edge_thresholds` is the operator-overridable
    /// value `trade::evaluate` actually reads; this only seeds its default.
    pub fn min_edge(self) -> f64 {
        match self {
            Category::Weather => 0.08,
            Category::Sports => 0.10,
            Category::Politics => 0.12,
            Category::Economics => 0.12,
            Category::Crypto => 0.15,
            Category::Technology => 0.15,
            Category::Entertainment => 0.18,
            Category::World => 0.20,
            Category::Other => 0.25,
        }
    }

    pub fn from_str_lenient(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "weather" => Category::Weather,
            "sports" => Category::Sports,
            "politics" => Category::Politics,
            "economics" | "economy" | "finance" => Category::Economics,
            "crypto" | "cryptocurrency" => Category::Crypto,
            "technology" | "tech" => Category::Technology,
            "entertainment" => Category::Entertainment,
            "world" => Category::World,
            _ => Category::Other,
        }
    }
}

/// Starting point for `Config::category_edge_thresholds` before env overrides
/// (spec.md §6).
pub fn default_category_edge_thresholds() -> HashMap<Category, f64> {
    Category::ALL.iter().map(|c| (*c, c.min_edge())).collect()
}

/// Resolution criteria supplied per market.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResolutionCriteria {
    pub authority_is_clear: bool,
    pub outcome_is_objective: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// Resolved outcome mapped onto the percentage price axis.
    pub fn as_price(self) -> f64 {
        match self {
            Outcome::Yes => 100.0,
            Outcome::No => 0.0,
        }
    }
}

/// Immutable identity + mutable market data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub resolution_criteria: ResolutionCriteria,
    pub category: Category,
    pub current_price: f64,
    pub liquidity: f64,
    pub volume_24h: f64,
    pub created_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_outcome: Option<Outcome>,
    pub closed: bool,
}

impl Market {
    pub fn is_resolved(&self) -> bool {
        self.resolution_outcome.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.closed || self.is_resolved() || now >= self.closes_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Yes,
    No,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    Invalidation,
    Profit,
    Emergency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitCondition {
    pub kind: ExitKind,
    pub description: String,
    pub trigger_price: Option<f64>,
}

/// Output of C2: an eligible trade, ready for sizing and routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDecision {
    pub market_id: String,
    pub side: Side,
    pub entry_price: f64,
    pub edge: f64,
    pub size_usd: f64,
    pub exit_conditions: Vec<ExitCondition>,
    pub rationale: String,
    pub rationale_hash: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
}

/// C5 state: one submitted (or synthesized) limit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub market_id: String,
    pub side: Side,
    pub size_usd: f64,
    pub limit_price: f64,
    pub status: OrderStatus,
    pub filled_size: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub external_order_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperPositionStatus {
    Open,
    Win,
    Loss,
    Expired,
}

/// C6 state: a simulated position tracked purely in-memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperPosition {
    pub id: Uuid,
    pub market_id: String,
    pub side: Side,
    pub size_usd: f64,
    pub limit_price: f64,
    pub belief_low: f64,
    pub belief_high: f64,
    pub edge: f64,
    pub entry_timestamp: DateTime<Utc>,
    pub status: PaperPositionStatus,
    pub actual_outcome: Option<Outcome>,
    pub exit_price: Option<f64>,
    pub pnl: Option<f64>,
    pub resolved_timestamp: Option<DateTime<Utc>>,
    pub category: Category,
}

/// CalibrationRecord — one resolved outcome snapshot fed to C4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub market_id: String,
    pub belief_low_at_entry: f64,
    pub belief_high_at_entry: f64,
    pub confidence_at_entry: f64,
    pub unknowns_at_entry: usize,
    pub outcome: Outcome,
    pub resolved_at: DateTime<Utc>,
    pub edge_at_entry: f64,
}
