//! Trade — a round trip on one instrument, from flat back to flat.

use super::ids::TradeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

/// A round-trip trade. Notified to strategies and analyzers when it opens
/// and when it closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub instrument: String,
    pub status: TradeStatus,
    /// +1 long, -1 short.
    pub direction: f64,

    // ── Entry ──
    pub entry_step: usize,
    pub entry_at: DateTime<Utc>,
    pub entry_price: f64,
    /// Largest absolute size held during the trade.
    pub max_size: f64,

    // ── Exit ──
    pub exit_step: Option<usize>,
    pub exit_at: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,

    // ── PnL ──
    pub gross_pnl: f64,
    pub commission: f64,
    pub net_pnl: f64,
}

impl Trade {
    pub fn open(
        id: TradeId,
        instrument: impl Into<String>,
        direction: f64,
        step: usize,
        at: DateTime<Utc>,
        price: f64,
        size: f64,
    ) -> Self {
        Self {
            id,
            instrument: instrument.into(),
            status: TradeStatus::Open,
            direction,
            entry_step: step,
            entry_at: at,
            entry_price: price,
            max_size: size.abs(),
            exit_step: None,
            exit_at: None,
            exit_price: None,
            gross_pnl: 0.0,
            commission: 0.0,
            net_pnl: 0.0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Fold one execution's realized PnL and commission into the trade.
    pub fn record(&mut self, realized: f64, commission: f64, size_now: f64) {
        self.gross_pnl += realized;
        self.commission += commission;
        self.net_pnl = self.gross_pnl - self.commission;
        self.max_size = self.max_size.max(size_now.abs());
    }

    pub fn close(&mut self, step: usize, at: DateTime<Utc>, price: f64) {
        self.status = TradeStatus::Closed;
        self.exit_step = Some(step);
        self.exit_at = Some(at);
        self.exit_price = Some(price);
    }

    /// Steps between entry and exit (0 while open).
    pub fn steps_held(&self) -> usize {
        self.exit_step
            .map(|exit| exit.saturating_sub(self.entry_step))
            .unwrap_or(0)
    }

    pub fn is_winner(&self) -> bool {
        self.net_pnl > 0.0
    }
}
