//! Execution Adapter (C5)
//!
//! Limit orders only, one active position per market, no averaging down.
//! Simulation mode synthesizes fills in-memory; live mode delegates to an
//! injected [`OrderConnector`]. Guarded by its own lock in the orchestrator
//! (the position map here is not itself synchronized — callers serialize
//! access, matching the teacher's per-subsystem-owns-its-lock convention).

use crate::models::{Order, OrderStatus, Side, TradeDecision};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    SideNone,
    PositionAlreadyActive,
    ConnectorError(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::SideNone => write!(f, "decision has side=none"),
            RejectionReason::PositionAlreadyActive => {
                write!(f, "a position is already active for this market")
            }
            RejectionReason::ConnectorError(msg) => write!(f, "connector error: {msg}"),
        }
    }
}

impl std::error::Error for RejectionReason {}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub token_id: String,
    pub price: f64, // 0..1
    pub size: f64,
    pub side: Side,
}

#[derive(Debug, Clone)]
pub struct ConnectorOrderStatus {
    pub status: ExternalOrderState,
    pub filled_amount: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalOrderState {
    Live,
    Matched,
    Cancelled,
}

/// Injected in live mode. Network/signing errors surface as a cancelled
/// order and a rejection; they are not retried silently inside the adapter.
#[async_trait]
pub trait OrderConnector: Send + Sync {
    async fn place_order(&self, request: OrderRequest) -> anyhow::Result<String>;
    async fn get_order_status(&self, external_order_id: &str) -> anyhow::Result<ConnectorOrderStatus>;
    async fn cancel_order(&self, external_order_id: &str) -> anyhow::Result<bool>;
}

pub struct ExecutionAdapter {
    connector: Option<Box<dyn OrderConnector>>,
    positions: HashMap<String, Order>, // keyed by market_id
}

impl ExecutionAdapter {
    pub fn simulation() -> Self {
        Self {
            connector: None,
            positions: HashMap::new(),
        }
    }

    pub fn live(connector: Box<dyn OrderConnector>) -> Self {
        Self {
            connector: Some(connector),
            positions: HashMap::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.connector.is_some()
    }

    pub async fn place(
        &mut self,
        decision: &TradeDecision,
        market_id: &str,
        token_id: Option<&str>,
    ) -> Result<Order, RejectionReason> {
        if decision.side == Side::None {
            return Err(RejectionReason::SideNone);
        }
        if self.positions.contains_key(market_id) {
            return Err(RejectionReason::PositionAlreadyActive);
        }

        let now = Utc::now();
        let mut order = Order {
            id: Uuid::new_v4(),
            market_id: market_id.to_string(),
            side: decision.side,
            size_usd: decision.size_usd,
            limit_price: decision.entry_price,
            status: OrderStatus::Pending,
            filled_size: 0.0,
            created_at: now,
            updated_at: now,
            external_order_id: None,
        };

        match &self.connector {
            None => {
                // Simulation: stays pending until the orchestrator records a fill event.
            }
            Some(connector) => {
                let request = OrderRequest {
                    token_id: token_id.unwrap_or_default().to_string(),
                    price: decision.entry_price / 100.0,
                    size: decision.size_usd,
                    side: decision.side,
                };
                match connector.place_order(request).await {
                    Ok(external_id) => order.external_order_id = Some(external_id),
                    Err(e) => {
                        order.status = OrderStatus::Cancelled;
                        self.positions.insert(market_id.to_string(), order.clone());
                        return Err(RejectionReason::ConnectorError(e.to_string()));
                    }
                }
            }
        }

        self.positions.insert(market_id.to_string(), order.clone());
        Ok(order)
    }

    /// Simulation-only: the orchestrator calls this when it observes a fill
    /// event for a position created via `place` in simulation mode.
    pub fn record_simulated_fill(&mut self, market_id: &str) {
        if let Some(order) = self.positions.get_mut(market_id) {
            order.status = OrderStatus::Filled;
            order.filled_size = order.size_usd;
            order.updated_at = Utc::now();
        }
    }

    pub async fn sync_order_status(&mut self, market_id: &str) -> anyhow::Result<()> {
        let Some(connector) = &self.connector else {
            return Ok(());
        };
        let Some(order) = self.positions.get_mut(market_id) else {
            return Ok(());
        };
        let Some(external_id) = order.external_order_id.clone() else {
            return Ok(());
        };

        let status = connector.get_order_status(&external_id).await?;
        order.status = match status.status {
            ExternalOrderState::Live => OrderStatus::Pending,
            ExternalOrderState::Matched => OrderStatus::Filled,
            ExternalOrderState::Cancelled => OrderStatus::Cancelled,
        };
        if let Some(filled) = status.filled_amount {
            order.filled_size = filled;
            if filled > 0.0 && filled < order.size_usd {
                order.status = OrderStatus::Partial;
            }
        }
        order.updated_at = Utc::now();
        Ok(())
    }

    pub async fn close_position(&mut self, market_id: &str) -> anyhow::Result<()> {
        if let Some(order) = self.positions.get(market_id) {
            if let (Some(connector), Some(external_id)) = (&self.connector, &order.external_order_id) {
                connector.cancel_order(external_id).await?;
            }
        }
        self.positions.remove(market_id);
        Ok(())
    }

    pub fn active_position(&self, market_id: &str) -> Option<&Order> {
        self.positions.get(market_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitCondition;

    fn decision(side: Side) -> TradeDecision {
        TradeDecision {
            market_id: "m1".into(),
            side,
            entry_price: 42.0,
            edge: 0.2,
            size_usd: 100.0,
            exit_conditions: vec![ExitCondition {
                kind: crate::models::ExitKind::Invalidation,
                description: "test".into(),
                trigger_price: None,
            }],
            rationale: "test".into(),
            rationale_hash: "abc".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn side_none_is_rejected() {
        let mut adapter = ExecutionAdapter::simulation();
        let err = adapter.place(&decision(Side::None), "m1", None).await.unwrap_err();
        assert_eq!(err, RejectionReason::SideNone);
    }

    #[tokio::test]
    async fn second_position_on_same_market_is_rejected() {
        let mut adapter = ExecutionAdapter::simulation();
        adapter.place(&decision(Side::Yes), "m1", None).await.unwrap();
        let err = adapter.place(&decision(Side::Yes), "m1", None).await.unwrap_err();
        assert_eq!(err, RejectionReason::PositionAlreadyActive);
    }

    #[tokio::test]
    async fn simulated_order_starts_pending_until_fill_event() {
        let mut adapter = ExecutionAdapter::simulation();
        let order = adapter.place(&decision(Side::Yes), "m1", None).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        adapter.record_simulated_fill("m1");
        assert_eq!(adapter.active_position("m1").unwrap().status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn close_position_removes_active_order() {
        let mut adapter = ExecutionAdapter::simulation();
        adapter.place(&decision(Side::Yes), "m1", None).await.unwrap();
        adapter.close_position("m1").await.unwrap();
        assert!(adapter.active_position("m1").is_none());
    }
}
