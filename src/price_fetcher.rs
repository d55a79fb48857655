use crate::candle_utils::dedup_and_sort;
use crate::config::CandleInterval;
use crate::error::FetchError;
use crate::models::PriceCandle;
use crate::price_source::{CandleSource, MAX_CANDLES_PER_REQUEST};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::time::Duration;
use tokio::time::sleep;

/// Walks a time range chunk by chunk against a [`CandleSource`].
pub struct PriceSeriesFetcher<S> {
    source: S,
    request_delay: Duration,
}

impl<S: CandleSource> PriceSeriesFetcher<S> {
    pub fn new(source: S, request_delay: Duration) -> Self {
        Self {
            source,
            request_delay,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the ascending, deduplicated candles covering `[start, end)`.
    /// Any chunk that fails on both endpoints fails the whole series.
    pub async fn fetch_series(
        &self,
        symbol: &str,
        interval: CandleInterval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceCandle>, FetchError> {
        let step_ms = interval.duration_ms();
        let chunk_span_ms = step_ms * MAX_CANDLES_PER_REQUEST;
        let end_ms = end.timestamp_millis();
        let mut cursor = start.timestamp_millis();
        let mut collected = Vec::new();
        let mut requests = 0usize;

        while cursor < end_ms {
            if requests > 0 && !self.request_delay.is_zero() {
                sleep(self.request_delay).await;
            }
            requests += 1;

            let chunk_end = (cursor + chunk_span_ms).min(end_ms);
            let chunk = self
                .source
                .fetch_chunk(symbol, interval, cursor, chunk_end)
                .await?;

            let next_cursor = match chunk.last() {
                Some(last) => last.open_time.timestamp_millis() + step_ms,
                None => chunk_end,
            };
            collected.extend(chunk);

            // A source that answers with candles behind the cursor would stall the loop.
            cursor = if next_cursor > cursor {
                next_cursor
            } else {
                chunk_end
            };
        }

        let raw_count = collected.len();
        let series = dedup_and_sort(collected);
        debug!(
            "{} {}: {} request(s), {} candle(s), {} after dedup",
            symbol,
            interval,
            requests,
            raw_count,
            series.len()
        );
        info!(
            "Fetched {} {} candle(s) for {} ({} -> {})",
            series.len(),
            interval,
            symbol,
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        );
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Mutex;

    /// Serves candles from a fixed in-memory series and records every request.
    struct StaticSource {
        candles: Vec<PriceCandle>,
        overlap: usize,
        fail_from_request: Option<usize>,
        requests: Mutex<Vec<(i64, i64)>>,
    }

    impl StaticSource {
        fn new(candles: Vec<PriceCandle>) -> Self {
            Self {
                candles,
                overlap: 0,
                fail_from_request: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(i64, i64)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CandleSource for StaticSource {
        async fn fetch_chunk(
            &self,
            symbol: &str,
            _interval: CandleInterval,
            start_ms: i64,
            end_ms: i64,
        ) -> Result<Vec<PriceCandle>, FetchError> {
            let request_no = {
                let mut requests = self.requests.lock().unwrap();
                requests.push((start_ms, end_ms));
                requests.len()
            };
            if let Some(fail_from) = self.fail_from_request {
                if request_no >= fail_from {
                    return Err(FetchError::Status {
                        url: format!("stub://{symbol}"),
                        status: 503,
                    });
                }
            }

            let mut first = self
                .candles
                .iter()
                .position(|c| c.open_time.timestamp_millis() >= start_ms)
                .unwrap_or(self.candles.len());
            // Re-send a few candles from before the cursor to exercise dedup.
            first = first.saturating_sub(self.overlap);
            Ok(self.candles[first..]
                .iter()
                .filter(|c| c.open_time.timestamp_millis() < end_ms)
                .take(MAX_CANDLES_PER_REQUEST as usize)
                .cloned()
                .collect())
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn minute_candles(count: i64) -> Vec<PriceCandle> {
        (0..count)
            .map(|i| PriceCandle {
                open_time: base() + ChronoDuration::minutes(i),
                open: i as f64,
                high: i as f64 + 1.0,
                low: i as f64 - 1.0,
                close: i as f64,
            })
            .collect()
    }

    #[tokio::test]
    async fn paginates_past_the_row_cap() {
        let source = StaticSource::new(minute_candles(2_500));
        let fetcher = PriceSeriesFetcher::new(source, Duration::ZERO);

        let series = fetcher
            .fetch_series(
                "BTCUSDT",
                CandleInterval::OneMinute,
                base(),
                base() + ChronoDuration::minutes(2_500),
            )
            .await
            .unwrap();

        assert_eq!(series.len(), 2_500);
        let requests = fetcher.source().requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].0, (base() + ChronoDuration::minutes(1_000)).timestamp_millis());
    }

    #[tokio::test]
    async fn overlapping_chunks_are_deduplicated() {
        let mut source = StaticSource::new(minute_candles(2_100));
        source.overlap = 5;
        let fetcher = PriceSeriesFetcher::new(source, Duration::ZERO);

        let series = fetcher
            .fetch_series(
                "BTCUSDT",
                CandleInterval::OneMinute,
                base(),
                base() + ChronoDuration::minutes(2_100),
            )
            .await
            .unwrap();

        assert_eq!(series.len(), 2_100);
        assert!(series
            .windows(2)
            .all(|pair| pair[0].open_time < pair[1].open_time));
    }

    #[tokio::test]
    async fn empty_chunks_jump_to_chunk_end() {
        let source = StaticSource::new(Vec::new());
        let fetcher = PriceSeriesFetcher::new(source, Duration::ZERO);
        let end = base() + ChronoDuration::minutes(2_500);

        let series = fetcher
            .fetch_series("BTCUSDT", CandleInterval::OneMinute, base(), end)
            .await
            .unwrap();

        assert!(series.is_empty());
        let requests = fetcher.source().requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests.last().unwrap().1, end.timestamp_millis());
    }

    #[tokio::test]
    async fn empty_range_makes_no_requests() {
        let fetcher = PriceSeriesFetcher::new(StaticSource::new(minute_candles(10)), Duration::ZERO);
        let series = fetcher
            .fetch_series("BTCUSDT", CandleInterval::OneMinute, base(), base())
            .await
            .unwrap();
        assert!(series.is_empty());
        assert!(fetcher.source().requests().is_empty());
    }

    #[tokio::test]
    async fn failed_chunk_fails_the_series() {
        let mut source = StaticSource::new(minute_candles(2_500));
        source.fail_from_request = Some(2);
        let fetcher = PriceSeriesFetcher::new(source, Duration::ZERO);

        let result = fetcher
            .fetch_series(
                "BTCUSDT",
                CandleInterval::OneMinute,
                base(),
                base() + ChronoDuration::minutes(2_500),
            )
            .await;

        assert!(matches!(result, Err(FetchError::Status { status: 503, .. })));
    }

    /// Always answers with the same opening candles, whatever the cursor.
    struct StaleSource {
        candles: Vec<PriceCandle>,
        requests: Mutex<Vec<(i64, i64)>>,
    }

    #[async_trait]
    impl CandleSource for StaleSource {
        async fn fetch_chunk(
            &self,
            _symbol: &str,
            _interval: CandleInterval,
            start_ms: i64,
            end_ms: i64,
        ) -> Result<Vec<PriceCandle>, FetchError> {
            self.requests.lock().unwrap().push((start_ms, end_ms));
            Ok(self.candles.clone())
        }
    }

    #[tokio::test]
    async fn cursor_behind_the_window_jumps_to_chunk_end() {
        let source = StaleSource {
            candles: minute_candles(10),
            requests: Mutex::new(Vec::new()),
        };
        let fetcher = PriceSeriesFetcher::new(source, Duration::ZERO);
        let end = base() + ChronoDuration::minutes(2_500);

        let series = fetcher
            .fetch_series("BTCUSDT", CandleInterval::OneMinute, base(), end)
            .await
            .unwrap();

        assert_eq!(series.len(), 10);
        let starts: Vec<i64> = fetcher
            .source()
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(start, _)| *start)
            .collect();
        let minute = |m: i64| (base() + ChronoDuration::minutes(m)).timestamp_millis();
        assert_eq!(starts, vec![minute(0), minute(10), minute(1_010), minute(2_010)]);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_between_requests_only() {
        let delay = Duration::from_millis(250);
        let fetcher = PriceSeriesFetcher::new(StaticSource::new(minute_candles(2_500)), delay);
        let started = tokio::time::Instant::now();

        fetcher
            .fetch_series(
                "BTCUSDT",
                CandleInterval::OneMinute,
                base(),
                base() + ChronoDuration::minutes(2_500),
            )
            .await
            .unwrap();

        let requests = fetcher.source().requests().len() as u32;
        assert_eq!(requests, 3);
        assert_eq!(started.elapsed(), delay * (requests - 1));
    }

    #[tokio::test(start_paused = true)]
    async fn single_request_does_not_sleep() {
        let delay = Duration::from_secs(5);
        let fetcher = PriceSeriesFetcher::new(StaticSource::new(minute_candles(10)), delay);
        let started = tokio::time::Instant::now();

        fetcher
            .fetch_series(
                "BTCUSDT",
                CandleInterval::OneMinute,
                base(),
                base() + ChronoDuration::minutes(10),
            )
            .await
            .unwrap();

        assert_eq!(fetcher.source().requests().len(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
