use crate::models::{ClosedTrade, PriceCandle};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};

/// Maps exchange spellings such as `btc-usdt` or `BTC/USDT` onto the price
/// source format (`BTCUSDT`).
pub fn normalize_price_symbol(value: &str) -> Option<String> {
    let normalized: String = value
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| *c != '-' && *c != '/')
        .collect();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Drops repeated open times (first occurrence wins) and sorts ascending.
pub fn dedup_and_sort(candles: Vec<PriceCandle>) -> Vec<PriceCandle> {
    let mut seen: HashSet<DateTime<Utc>> = HashSet::with_capacity(candles.len());
    let mut unique: Vec<PriceCandle> = candles
        .into_iter()
        .filter(|candle| seen.insert(candle.open_time))
        .collect();
    unique.sort_by_key(|candle| candle.open_time);
    unique
}

/// Index of the first candle opening at or after `time` in an ascending series.
pub fn first_index_at_or_after(series: &[PriceCandle], time: DateTime<Utc>) -> usize {
    series.partition_point(|candle| candle.open_time < time)
}

/// Groups trade indices by normalized price symbol, keeping trade order within
/// each group. Trades whose symbol normalizes to nothing are left out.
pub fn group_trades_by_symbol(trades: &[ClosedTrade]) -> BTreeMap<String, Vec<usize>> {
    let mut grouped: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, trade) in trades.iter().enumerate() {
        let Some(symbol) = normalize_price_symbol(&trade.symbol) else {
            continue;
        };
        grouped.entry(symbol).or_default().push(idx);
    }
    grouped
}
