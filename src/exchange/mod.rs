//! Exchange adapter (consumed capability, §6).
//!
//! `listActiveMarkets`, `getMarket`, order book/placement/status/cancel.
//! Authentication, when required, lives inside the concrete adapter. This
//! module ships the trait plus an in-memory mock adapter used by tests and
//! by paper-trading-only deployments that want deterministic markets
//! without a live venue.

use crate::models::Market;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct OrderBook {
    pub bids: Vec<(f64, f64)>, // (price, size)
    pub asks: Vec<(f64, f64)>,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub market_id: String,
    pub side: crate::models::Side,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOrderStatus {
    Live,
    Matched,
    Cancelled,
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn list_active_markets(&self) -> anyhow::Result<Vec<Market>>;
    async fn get_market(&self, id: &str) -> anyhow::Result<Option<Market>>;
    async fn get_order_book(&self, id: &str) -> anyhow::Result<OrderBook>;
    async fn place_order(&self, request: OrderRequest) -> anyhow::Result<Option<String>>;
    async fn get_order_status(
        &self,
        order_id: &str,
    ) -> anyhow::Result<Option<(RemoteOrderStatus, Option<f64>)>>;
    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<bool>;
}

/// Deterministic in-memory adapter for tests and paper-only deployments.
#[derive(Default)]
pub struct MockExchangeAdapter {
    markets: RwLock<HashMap<String, Market>>,
}

impl MockExchangeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, market: Market) {
        self.markets.write().await.insert(market.id.clone(), market);
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchangeAdapter {
    async fn list_active_markets(&self) -> anyhow::Result<Vec<Market>> {
        let now = chrono::Utc::now();
        Ok(self
            .markets
            .read()
            .await
            .values()
            .filter(|m| !m.is_expired(now))
            .cloned()
            .collect())
    }

    async fn get_market(&self, id: &str) -> anyhow::Result<Option<Market>> {
        Ok(self.markets.read().await.get(id).cloned())
    }

    async fn get_order_book(&self, _id: &str) -> anyhow::Result<OrderBook> {
        Ok(OrderBook {
            bids: Vec::new(),
            asks: Vec::new(),
        })
    }

    async fn place_order(&self, _request: OrderRequest) -> anyhow::Result<Option<String>> {
        Ok(Some(uuid::Uuid::new_v4().to_string()))
    }

    async fn get_order_status(
        &self,
        _order_id: &str,
    ) -> anyhow::Result<Option<(RemoteOrderStatus, Option<f64>)>> {
        Ok(Some((RemoteOrderStatus::Matched, Some(1.0))))
    }

    async fn cancel_order(&self, _order_id: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, ResolutionCriteria};
    use chrono::{Duration, Utc};

    fn market(id: &str, closed: bool) -> Market {
        Market {
            id: id.to_string(),
            question: "q".into(),
            resolution_criteria: ResolutionCriteria {
                authority_is_clear: true,
                outcome_is_objective: true,
            },
            category: Category::Other,
            current_price: 50.0,
            liquidity: 10_000.0,
            volume_24h: 1000.0,
            created_at: Utc::now() - Duration::days(1),
            closes_at: Utc::now() + Duration::days(1),
            resolved_at: None,
            resolution_outcome: None,
            closed,
        }
    }

    /// R2: closed markets are excluded from listActiveMarkets.
    #[tokio::test]
    async fn closed_markets_are_excluded_from_active_list() {
        let adapter = MockExchangeAdapter::new();
        adapter.seed(market("open", false)).await;
        adapter.seed(market("closed", true)).await;
        let active = adapter.list_active_markets().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "open");
    }
}
