use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FillAction {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// One executed order from the trade history export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub symbol: String,
    pub action: FillAction,
    pub direction: Direction,
    pub time: DateTime<Utc>,
    pub price: f64,
    pub quantity: f64,
    pub realized_pnl: Option<f64>,
    pub realized_pnl_pct: Option<f64>,
    pub fee: Option<f64>,
}

/// Quantity still open from a single OPEN fill.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenLot {
    pub time: DateTime<Utc>,
    pub price: f64,
    pub quantity: f64,
}

/// A round trip reconstructed from one CLOSE fill and the lots it consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTrade {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Option<f64>,
    pub exit_price: f64,
    pub quantity: f64,
    pub matched_quantity: f64,
    pub realized_pnl: Option<f64>,
    pub realized_pnl_pct: Option<f64>,
    pub fee: Option<f64>,
    pub open_time: Option<DateTime<Utc>>,
    pub close_time: DateTime<Utc>,
    pub hold_duration_ms: Option<i64>,
    #[serde(default)]
    pub note: Option<String>,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.realized_pnl.map(|pnl| pnl > 0.0).unwrap_or(false)
    }

    pub fn is_loss(&self) -> bool {
        self.realized_pnl.map(|pnl| pnl < 0.0).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceCandle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HindsightResult {
    #[serde(flatten)]
    pub trade: ClosedTrade,
    pub best_exit: Option<f64>,
    pub potential_pnl: Option<f64>,
    pub potential_pct: Option<f64>,
    pub fumbled: Option<f64>,
}

impl HindsightResult {
    pub fn no_data(trade: ClosedTrade) -> Self {
        Self {
            trade,
            best_exit: None,
            potential_pnl: None,
            potential_pct: None,
            fumbled: None,
        }
    }

    pub fn has_data(&self) -> bool {
        self.best_exit.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorScore {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: Option<f64>,
    pub total_pnl: Option<f64>,
    pub total_fees: Option<f64>,
    pub avg_win_hold_ms: Option<f64>,
    pub avg_loss_hold_ms: Option<f64>,
    pub paperhands_ratio: Option<f64>,
    pub fumble_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HindsightSummary {
    pub evaluated_trades: usize,
    pub trades_with_data: usize,
    pub total_realized_pnl: Option<f64>,
    pub total_potential_pnl: Option<f64>,
    pub total_fumbled: Option<f64>,
    pub worst_fumble_index: Option<usize>,
}
