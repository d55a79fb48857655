use crate::candle_utils::{first_index_at_or_after, group_trades_by_symbol};
use crate::config::CandleInterval;
use crate::error::FetchError;
use crate::models::{ClosedTrade, Direction, HindsightResult, HindsightSummary, PriceCandle};
use crate::price_fetcher::PriceSeriesFetcher;
use crate::price_source::CandleSource;
use chrono::{DateTime, Duration, Utc};
use indicatif::ProgressBar;
use log::{info, warn};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct HindsightParams {
    pub lookahead: Duration,
    /// Fraction of the theoretical edge assumed capturable, in [0, 1].
    pub realism: f64,
}

#[derive(Debug, Clone)]
pub struct HindsightReport {
    pub results: Vec<HindsightResult>,
    pub summary: HindsightSummary,
}

/// Extreme price reachable in `[start, end)`: max high for longs, min low for
/// shorts. `None` when no candle opens inside the window.
pub fn best_price_in_window(
    series: &[PriceCandle],
    direction: Direction,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<f64> {
    let first = first_index_at_or_after(series, start);
    let window = series[first..]
        .iter()
        .take_while(|candle| candle.open_time < end);

    match direction {
        Direction::Long => window.map(|c| c.high).fold(None, |best: Option<f64>, high| {
            Some(best.map_or(high, |b| b.max(high)))
        }),
        Direction::Short => window.map(|c| c.low).fold(None, |best: Option<f64>, low| {
            Some(best.map_or(low, |b| b.min(low)))
        }),
    }
}

/// End of the lookahead window, saturating at the latest representable time.
pub fn lookahead_end(close_time: DateTime<Utc>, lookahead: Duration) -> DateTime<Utc> {
    close_time
        .checked_add_signed(lookahead)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn evaluate_trade(
    trade: &ClosedTrade,
    series: &[PriceCandle],
    params: &HindsightParams,
) -> HindsightResult {
    let window_end = lookahead_end(trade.close_time, params.lookahead);
    let Some(raw_best) =
        best_price_in_window(series, trade.direction, trade.close_time, window_end)
    else {
        return HindsightResult::no_data(trade.clone());
    };

    let realism = params.realism.clamp(0.0, 1.0);
    let best_exit = trade.exit_price + (raw_best - trade.exit_price) * realism;

    let potential_pnl = trade.entry_price.map(|entry| match trade.direction {
        Direction::Long => (best_exit - entry) * trade.quantity,
        Direction::Short => (entry - best_exit) * trade.quantity,
    });

    let potential_pct = match (potential_pnl, trade.entry_price) {
        (Some(potential), Some(entry)) => {
            let notional = entry * trade.quantity;
            (notional.abs() > f64::EPSILON).then(|| potential / notional * 100.0)
        }
        _ => None,
    };

    let fumbled = match (potential_pnl, trade.realized_pnl) {
        (Some(potential), Some(realized)) => Some((potential - realized).max(0.0)),
        _ => None,
    };

    HindsightResult {
        trade: trade.clone(),
        best_exit: Some(best_exit),
        potential_pnl,
        potential_pct,
        fumbled,
    }
}

pub fn summarize(results: &[HindsightResult]) -> HindsightSummary {
    fn sum(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
        values
            .flatten()
            .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
    }

    let worst_fumble_index = results
        .iter()
        .enumerate()
        .filter_map(|(idx, r)| r.fumbled.map(|f| (idx, f)))
        .filter(|(_, fumbled)| *fumbled > 0.0)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(idx, _)| idx);

    HindsightSummary {
        evaluated_trades: results.len(),
        trades_with_data: results.iter().filter(|r| r.has_data()).count(),
        total_realized_pnl: sum(results.iter().map(|r| r.trade.realized_pnl)),
        total_potential_pnl: sum(results.iter().map(|r| r.potential_pnl)),
        total_fumbled: sum(results.iter().map(|r| r.fumbled)),
        worst_fumble_index,
    }
}

/// Fetches each symbol's series one after another and evaluates every trade.
/// A symbol whose fetch fails aborts the run; no partial report is returned.
pub async fn run_hindsight<S: CandleSource>(
    fetcher: &PriceSeriesFetcher<S>,
    trades: &[ClosedTrade],
    interval: CandleInterval,
    params: &HindsightParams,
    now: DateTime<Utc>,
    progress: &ProgressBar,
) -> Result<HindsightReport, FetchError> {
    let grouped = group_trades_by_symbol(trades);
    progress.set_length(grouped.len() as u64);

    let mut series_by_symbol: HashMap<&str, Vec<PriceCandle>> = HashMap::new();
    for (symbol, indices) in &grouped {
        progress.set_message(symbol.clone());

        let first_close = indices.iter().map(|&i| trades[i].close_time).min();
        let last_close = indices.iter().map(|&i| trades[i].close_time).max();
        let (Some(start), Some(last_close)) = (first_close, last_close) else {
            progress.inc(1);
            continue;
        };
        let end = lookahead_end(last_close, params.lookahead).min(now);

        let series = if end > start {
            fetcher.fetch_series(symbol, interval, start, end).await?
        } else {
            warn!(
                "Skipping price fetch for {}: lookahead window ends before it starts",
                symbol
            );
            Vec::new()
        };
        series_by_symbol.insert(symbol.as_str(), series);
        progress.inc(1);
    }

    let mut symbol_of_trade: HashMap<usize, &str> = HashMap::new();
    for (symbol, indices) in &grouped {
        for &idx in indices {
            symbol_of_trade.insert(idx, symbol.as_str());
        }
    }

    let results: Vec<HindsightResult> = trades
        .iter()
        .enumerate()
        .map(|(idx, trade)| {
            let series = symbol_of_trade
                .get(&idx)
                .and_then(|symbol| series_by_symbol.get(symbol))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            evaluate_trade(trade, series, params)
        })
        .collect();

    let summary = summarize(&results);
    info!(
        "Evaluated {} trade(s) across {} symbol(s); {} had price data",
        summary.evaluated_trades,
        grouped.len(),
        summary.trades_with_data
    );

    Ok(HindsightReport { results, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn candle(minute: i64, high: f64, low: f64) -> PriceCandle {
        PriceCandle {
            open_time: base() + Duration::minutes(minute),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
        }
    }

    fn trade(direction: Direction, entry: f64, exit: f64, pnl: f64) -> ClosedTrade {
        ClosedTrade {
            symbol: "BTCUSDT".to_string(),
            direction,
            entry_price: Some(entry),
            exit_price: exit,
            quantity: 2.0,
            matched_quantity: 2.0,
            realized_pnl: Some(pnl),
            realized_pnl_pct: None,
            fee: None,
            open_time: Some(base() - Duration::hours(1)),
            close_time: base(),
            hold_duration_ms: Some(3_600_000),
            note: None,
        }
    }

    fn params(realism: f64) -> HindsightParams {
        HindsightParams {
            lookahead: Duration::minutes(30),
            realism,
        }
    }

    fn series() -> Vec<PriceCandle> {
        vec![
            candle(-5, 500.0, 1.0),
            candle(0, 112.0, 108.0),
            candle(10, 125.0, 104.0),
            candle(20, 118.0, 101.0),
            candle(30, 900.0, 0.5),
        ]
    }

    #[test]
    fn window_extremes_per_direction() {
        let series = series();
        let end = base() + Duration::minutes(30);
        assert_eq!(
            best_price_in_window(&series, Direction::Long, base(), end),
            Some(125.0)
        );
        assert_eq!(
            best_price_in_window(&series, Direction::Short, base(), end),
            Some(101.0)
        );
        assert_eq!(
            best_price_in_window(&series, Direction::Long, end + Duration::minutes(1), end + Duration::hours(1)),
            None
        );
    }

    #[test]
    fn zero_realism_keeps_actual_exit() {
        let result = evaluate_trade(&trade(Direction::Long, 100.0, 110.0, 20.0), &series(), &params(0.0));
        assert_eq!(result.best_exit, Some(110.0));
        assert_eq!(result.potential_pnl, Some(20.0));
        assert_eq!(result.fumbled, Some(0.0));
    }

    #[test]
    fn full_realism_uses_raw_extreme() {
        let realism = crate::config::parse_realism("100%").unwrap();
        let result = evaluate_trade(
            &trade(Direction::Long, 100.0, 110.0, 20.0),
            &series(),
            &params(realism),
        );
        assert_eq!(result.best_exit, Some(125.0));
        assert_eq!(result.potential_pnl, Some(50.0));
        assert_eq!(result.potential_pct, Some(25.0));
        assert_eq!(result.fumbled, Some(30.0));
    }

    #[test]
    fn short_trades_use_lowest_low() {
        let result = evaluate_trade(
            &trade(Direction::Short, 120.0, 110.0, 20.0),
            &series(),
            &params(0.5),
        );
        // 110 + (101 - 110) * 0.5
        assert_eq!(result.best_exit, Some(105.5));
        assert_eq!(result.potential_pnl, Some(29.0));
        assert_eq!(result.fumbled, Some(9.0));
    }

    #[test]
    fn fumbled_is_never_negative() {
        let result = evaluate_trade(
            &trade(Direction::Long, 100.0, 110.0, 500.0),
            &series(),
            &params(1.0),
        );
        assert_eq!(result.fumbled, Some(0.0));
    }

    #[test]
    fn no_candles_in_window_means_no_data() {
        let mut late = trade(Direction::Long, 100.0, 110.0, 20.0);
        late.close_time = base() + Duration::days(2);
        let result = evaluate_trade(&late, &series(), &params(1.0));
        assert!(!result.has_data());
        assert_eq!(result.potential_pnl, None);
        assert_eq!(result.fumbled, None);
        assert_eq!(result.trade.realized_pnl, Some(20.0));
    }

    #[test]
    fn unmatched_entry_leaves_potential_undefined() {
        let mut unmatched = trade(Direction::Long, 100.0, 110.0, 20.0);
        unmatched.entry_price = None;
        let result = evaluate_trade(&unmatched, &series(), &params(1.0));
        assert_eq!(result.best_exit, Some(125.0));
        assert_eq!(result.potential_pnl, None);
        assert_eq!(result.potential_pct, None);
        assert_eq!(result.fumbled, None);
    }

    #[test]
    fn summary_totals_and_worst_fumble() {
        let series = series();
        let results = vec![
            evaluate_trade(&trade(Direction::Long, 100.0, 110.0, 20.0), &series, &params(1.0)),
            evaluate_trade(&trade(Direction::Short, 120.0, 110.0, 20.0), &series, &params(1.0)),
        ];
        let summary = summarize(&results);
        assert_eq!(summary.evaluated_trades, 2);
        assert_eq!(summary.trades_with_data, 2);
        assert_eq!(summary.total_realized_pnl, Some(40.0));
        // long: (125-100)*2 = 50, short: (120-101)*2 = 38
        assert_eq!(summary.total_potential_pnl, Some(88.0));
        assert_eq!(summary.total_fumbled, Some(48.0));
        assert_eq!(summary.worst_fumble_index, Some(0));
    }

    struct RecordingSource {
        candles: Vec<PriceCandle>,
        fail_symbol: Option<&'static str>,
        symbols: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CandleSource for RecordingSource {
        async fn fetch_chunk(
            &self,
            symbol: &str,
            _interval: CandleInterval,
            start_ms: i64,
            end_ms: i64,
        ) -> Result<Vec<PriceCandle>, FetchError> {
            self.symbols.lock().unwrap().push(symbol.to_string());
            if self.fail_symbol == Some(symbol) {
                return Err(FetchError::Status {
                    url: "stub://klines".to_string(),
                    status: 500,
                });
            }
            Ok(self
                .candles
                .iter()
                .filter(|c| {
                    let t = c.open_time.timestamp_millis();
                    t >= start_ms && t < end_ms
                })
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn runs_symbols_sequentially_and_keeps_trade_order() {
        let mut eth = trade(Direction::Short, 120.0, 110.0, 20.0);
        eth.symbol = "ETH-USDT".to_string();
        let trades = vec![trade(Direction::Long, 100.0, 110.0, 20.0), eth];

        let source = RecordingSource {
            candles: series(),
            fail_symbol: None,
            symbols: Mutex::new(Vec::new()),
        };
        let fetcher = PriceSeriesFetcher::new(source, std::time::Duration::ZERO);
        let report = run_hindsight(
            &fetcher,
            &trades,
            CandleInterval::OneMinute,
            &params(1.0),
            base() + Duration::days(1),
            &ProgressBar::hidden(),
        )
        .await
        .unwrap();

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].best_exit, Some(125.0));
        assert_eq!(report.results[1].trade.symbol, "ETH-USDT");
        assert_eq!(report.results[1].best_exit, Some(101.0));
        let mut symbols = fetcher.source().symbols.lock().unwrap().clone();
        symbols.dedup();
        assert_eq!(symbols, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
    }

    #[tokio::test]
    async fn any_failed_symbol_fails_the_run() {
        let trades = vec![trade(Direction::Long, 100.0, 110.0, 20.0)];
        let source = RecordingSource {
            candles: series(),
            fail_symbol: Some("BTCUSDT"),
            symbols: Mutex::new(Vec::new()),
        };
        let fetcher = PriceSeriesFetcher::new(source, std::time::Duration::ZERO);
        let result = run_hindsight(
            &fetcher,
            &trades,
            CandleInterval::OneMinute,
            &params(1.0),
            base() + Duration::days(1),
            &ProgressBar::hidden(),
        )
        .await;
        assert!(result.is_err());
    }

    fn recording(candles: Vec<PriceCandle>) -> RecordingSource {
        RecordingSource {
            candles,
            fail_symbol: None,
            symbols: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn oversized_lookahead_saturates_instead_of_overflowing() {
        let far = Duration::days(100_000_000);
        assert_eq!(lookahead_end(base(), far), DateTime::<Utc>::MAX_UTC);

        let result = evaluate_trade(
            &trade(Direction::Long, 100.0, 110.0, 20.0),
            &series(),
            &HindsightParams {
                lookahead: far,
                realism: 1.0,
            },
        );
        assert_eq!(result.best_exit, Some(900.0));
    }

    #[tokio::test]
    async fn oversized_lookahead_is_capped_at_now() {
        let trades = vec![trade(Direction::Long, 100.0, 110.0, 20.0)];
        let fetcher = PriceSeriesFetcher::new(recording(series()), std::time::Duration::ZERO);
        let now = base() + Duration::hours(1);
        let report = run_hindsight(
            &fetcher,
            &trades,
            CandleInterval::OneMinute,
            &HindsightParams {
                lookahead: Duration::days(100_000_000),
                realism: 1.0,
            },
            now,
            &ProgressBar::hidden(),
        )
        .await
        .unwrap();

        assert_eq!(report.results[0].best_exit, Some(900.0));
        assert_eq!(fetcher.source().symbols.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn window_ending_before_it_starts_skips_the_fetch() {
        let trades = vec![trade(Direction::Long, 100.0, 110.0, 20.0)];
        let fetcher = PriceSeriesFetcher::new(recording(series()), std::time::Duration::ZERO);
        let report = run_hindsight(
            &fetcher,
            &trades,
            CandleInterval::OneMinute,
            &params(1.0),
            base() - Duration::hours(1),
            &ProgressBar::hidden(),
        )
        .await
        .unwrap();

        assert!(fetcher.source().symbols.lock().unwrap().is_empty());
        assert_eq!(report.results.len(), 1);
        assert!(!report.results[0].has_data());
        assert_eq!(report.summary.trades_with_data, 0);
        assert_eq!(report.summary.total_realized_pnl, Some(20.0));
    }
}
