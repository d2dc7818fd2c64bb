//! Notifier (consumed capability, §6) and a concrete CSV audit writer.
//!
//! Every hook is best-effort and non-blocking from the core's perspective:
//! a notifier error is logged and swallowed, never propagated as a HALT
//! (§7: "Notifier and audit errors are never fatal"). `CsvAuditNotifier` is
//! one example collaborator behind the trait — an append-only, one-file-
//! per-day writer in the spirit of this codebase's append-only trade-print
//! recorder, scaled down to the flat CSV schema the audit log calls for
//! (no SQLite, no replay indices: the core contract only needs append).

use crate::models::{Order, PaperPosition, TradeDecision};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn on_trade_opportunity(&self, decision: &TradeDecision);
    async fn on_trade_executed(&self, order: &Order, market_id: &str);
    async fn on_position_closed(&self, order: &Order, market_id: &str, pnl: f64, reason: &str);
    async fn on_system_start(&self, detail: &str);
    async fn on_system_halt(&self, reason: &str);
    async fn on_error(&self, error: &str, context: &str);
    async fn on_daily_summary(&self, summary: &str);

    /// Paper-position lifecycle hooks (spec.md §6). These are separate from
    /// `on_trade_executed`/`on_position_closed`, which only fire for live
    /// orders routed through the execution adapter.
    async fn on_paper_position_opened(&self, position: &PaperPosition);
    async fn on_paper_position_resolved(&self, position: &PaperPosition);
    async fn on_paper_position_expired(&self, position: &PaperPosition);
}

/// A notifier that does nothing; the default when no collaborator is wired.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn on_trade_opportunity(&self, _decision: &TradeDecision) {}
    async fn on_trade_executed(&self, _order: &Order, _market_id: &str) {}
    async fn on_position_closed(&self, _order: &Order, _market_id: &str, _pnl: f64, _reason: &str) {}
    async fn on_system_start(&self, _detail: &str) {}
    async fn on_system_halt(&self, _reason: &str) {}
    async fn on_error(&self, _error: &str, _context: &str) {}
    async fn on_daily_summary(&self, _summary: &str) {}
    async fn on_paper_position_opened(&self, _position: &PaperPosition) {}
    async fn on_paper_position_resolved(&self, _position: &PaperPosition) {}
    async fn on_paper_position_expired(&self, _position: &PaperPosition) {}
}

/// Appends `timestamp,event,marketId,marketQuestion,action,details,belief,edge,amount,pnl`
/// rows to `<dir>/audit-YYYY-MM-DD.csv`, one file per day.
pub struct CsvAuditNotifier {
    dir: PathBuf,
    current: Arc<Mutex<Option<(String, tokio::fs::File)>>>,
}

impl CsvAuditNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Arc::new(Mutex::new(None)),
        }
    }

    async fn append_row(&self, event: &str, market_id: &str, action: &str, details: &str, belief: &str, edge: &str, amount: &str, pnl: &str) {
        if let Err(e) = self.try_append_row(event, market_id, action, details, belief, edge, amount, pnl).await {
            warn!(error = %e, "csv audit notifier failed to append row");
        }
    }

    async fn try_append_row(
        &self,
        event: &str,
        market_id: &str,
        action: &str,
        details: &str,
        belief: &str,
        edge: &str,
        amount: &str,
        pnl: &str,
    ) -> anyhow::Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut guard = self.current.lock().await;

        let needs_new_file = match &*guard {
            Some((date, _)) => *date != today,
            None => true,
        };

        if needs_new_file {
            tokio::fs::create_dir_all(&self.dir).await?;
            let path = self.dir.join(format!("audit-{today}.csv"));
            let is_new = !path.exists();
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            if is_new {
                file.write_all(b"timestamp,event,marketId,marketQuestion,action,details,belief,edge,amount,pnl\n").await?;
            }
            *guard = Some((today.clone(), file));
        }

        if let Some((_, file)) = guard.as_mut() {
            let line = format!(
                "{},{},{},,{},{},{},{},{},{}\n",
                Utc::now().to_rfc3339(),
                event,
                market_id,
                action,
                details,
                belief,
                edge,
                amount,
                pnl
            );
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for CsvAuditNotifier {
    async fn on_trade_opportunity(&self, decision: &TradeDecision) {
        self.append_row(
            "trade_opportunity",
            &decision.market_id,
            "evaluated",
            &decision.rationale,
            &format!("{:.2}", decision.entry_price),
            &format!("{:.4}", decision.edge),
            &format!("{:.2}", decision.size_usd),
            "",
        )
        .await;
    }

    async fn on_trade_executed(&self, order: &Order, market_id: &str) {
        self.append_row(
            "trade_executed",
            market_id,
            "order_placed",
            &format!("{:?}", order.status),
            "",
            "",
            &format!("{:.2}", order.size_usd),
            "",
        )
        .await;
    }

    async fn on_position_closed(&self, _order: &Order, market_id: &str, pnl: f64, reason: &str) {
        self.append_row("position_closed", market_id, reason, "", "", "", "", &format!("{pnl:.2}"))
            .await;
    }

    async fn on_system_start(&self, detail: &str) {
        self.append_row("system_start", "", "startup", detail, "", "", "", "").await;
    }

    async fn on_system_halt(&self, reason: &str) {
        self.append_row("system_halt", "", "halt", reason, "", "", "", "").await;
    }

    async fn on_error(&self, error: &str, context: &str) {
        self.append_row("error", "", context, error, "", "", "", "").await;
    }

    async fn on_daily_summary(&self, summary: &str) {
        self.append_row("daily_summary", "", "summary", summary, "", "", "", "").await;
    }

    async fn on_paper_position_opened(&self, position: &PaperPosition) {
        self.append_row(
            "paper_position_opened",
            &position.market_id,
            &format!("{:?}", position.side),
            "",
            &format!("[{:.2}, {:.2}]", position.belief_low, position.belief_high),
            &format!("{:.4}", position.edge),
            &format!("{:.2}", position.size_usd),
            "",
        )
        .await;
    }

    async fn on_paper_position_resolved(&self, position: &PaperPosition) {
        self.append_row(
            "paper_position_resolved",
            &position.market_id,
            &format!("{:?}", position.status),
            "",
            "",
            "",
            "",
            &format!("{:.2}", position.pnl.unwrap_or(0.0)),
        )
        .await;
    }

    async fn on_paper_position_expired(&self, position: &PaperPosition) {
        self.append_row("paper_position_expired", &position.market_id, "expired", "", "", "", "", "")
            .await;
    }
}
