use crate::models::{ClosedTrade, Direction, Fill, FillAction, OpenLot};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::{HashMap, VecDeque};

/// Remaining lot quantity below which the lot counts as fully consumed.
const QUANTITY_EPSILON: f64 = 1e-9;

pub const NO_MATCHING_LOT_NOTE: &str = "No matching open lot found";

type LotKey = (String, Direction);

/// Open lots per (symbol, direction), oldest at the front.
#[derive(Debug, Default)]
pub struct LotBook {
    queues: HashMap<LotKey, VecDeque<OpenLot>>,
}

struct LotConsumption {
    matched_quantity: f64,
    notional: f64,
    earliest_time: Option<DateTime<Utc>>,
}

impl LotBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, fill: &Fill) {
        self.queues
            .entry((fill.symbol.clone(), fill.direction))
            .or_default()
            .push_back(OpenLot {
                time: fill.time,
                price: fill.price,
                quantity: fill.quantity,
            });
    }

    pub fn close(&mut self, fill: &Fill) -> ClosedTrade {
        let consumed = self.consume(&fill.symbol, fill.direction, fill.quantity);

        let entry_price = if consumed.matched_quantity > QUANTITY_EPSILON {
            Some(consumed.notional / consumed.matched_quantity)
        } else {
            None
        };

        let hold_duration_ms = consumed
            .earliest_time
            .map(|opened| (fill.time - opened).num_milliseconds())
            .filter(|ms| *ms >= 0);

        let note = if consumed.matched_quantity <= QUANTITY_EPSILON {
            Some(NO_MATCHING_LOT_NOTE.to_string())
        } else if fill.quantity - consumed.matched_quantity > QUANTITY_EPSILON {
            Some(format!(
                "Partial match: {} of {} matched against open lots",
                format_quantity(consumed.matched_quantity),
                format_quantity(fill.quantity)
            ))
        } else {
            None
        };

        if let Some(note) = note.as_deref() {
            debug!(
                "{} {} close at {}: {}",
                fill.symbol, fill.direction, fill.time, note
            );
        }

        ClosedTrade {
            symbol: fill.symbol.clone(),
            direction: fill.direction,
            entry_price,
            exit_price: fill.price,
            quantity: fill.quantity,
            matched_quantity: consumed.matched_quantity,
            realized_pnl: fill.realized_pnl,
            realized_pnl_pct: fill.realized_pnl_pct,
            fee: fill.fee,
            open_time: consumed.earliest_time,
            close_time: fill.time,
            hold_duration_ms,
            note,
        }
    }

    fn consume(&mut self, symbol: &str, direction: Direction, requested: f64) -> LotConsumption {
        let mut consumed = LotConsumption {
            matched_quantity: 0.0,
            notional: 0.0,
            earliest_time: None,
        };

        let Some(queue) = self.queues.get_mut(&(symbol.to_string(), direction)) else {
            return consumed;
        };

        let mut remaining = requested;
        while remaining > QUANTITY_EPSILON {
            let Some(head) = queue.front_mut() else {
                break;
            };

            let take = remaining.min(head.quantity);
            consumed.matched_quantity += take;
            consumed.notional += take * head.price;
            consumed.earliest_time = Some(match consumed.earliest_time {
                Some(current) => current.min(head.time),
                None => head.time,
            });

            head.quantity -= take;
            remaining -= take;
            if head.quantity <= QUANTITY_EPSILON {
                queue.pop_front();
            }
        }

        consumed
    }
}

/// Replays fills chronologically and emits one closed trade per CLOSE fill.
pub fn match_fills(fills: &[Fill]) -> Vec<ClosedTrade> {
    let mut ordered: Vec<&Fill> = fills.iter().collect();
    // Vec::sort_by_key is stable, so equal timestamps keep input order.
    ordered.sort_by_key(|fill| fill.time);

    let mut book = LotBook::new();
    let mut trades = Vec::new();
    for fill in ordered {
        match fill.action {
            FillAction::Open => book.open(fill),
            FillAction::Close => trades.push(book.close(fill)),
        }
    }

    let unmatched = trades.iter().filter(|trade| trade.note.is_some()).count();
    info!(
        "Reconstructed {} closed trade(s) from {} fill(s) ({} with unmatched quantity)",
        trades.len(),
        fills.len(),
        unmatched
    );

    trades
}

fn format_quantity(value: f64) -> String {
    let formatted = format!("{:.8}", value);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}
