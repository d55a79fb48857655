use crate::config::CandleInterval;
use crate::error::FetchError;
use crate::models::PriceCandle;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::{debug, warn};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Upstream cap on rows per kline response.
pub const MAX_CANDLES_PER_REQUEST: i64 = 1000;
const KLINES_PATH: &str = "/api/v3/klines";

/// Fetches one chunk of candles for `[start_ms, end_ms)`.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_chunk(
        &self,
        symbol: &str,
        interval: CandleInterval,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<PriceCandle>, FetchError>;
}

pub fn build_async_client(timeout: Option<Duration>) -> anyhow::Result<Client> {
    let mut builder = Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("failed to build HTTP client")
}

/// Kline endpoint on a single base URL.
#[derive(Clone)]
pub struct KlineClient {
    http: Client,
    base_url: String,
}

impl KlineClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: CandleInterval,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<PriceCandle>, FetchError> {
        let url = format!("{}{}", self.base_url, KLINES_PATH);
        // endTime is inclusive upstream; the chunk is half-open.
        let end_inclusive = (end_ms - 1).max(start_ms);
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.label().to_string()),
            ("startTime", start_ms.to_string()),
            ("endTime", end_inclusive.to_string()),
            ("limit", MAX_CANDLES_PER_REQUEST.to_string()),
        ];

        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|err| FetchError::Request {
                url: url.clone(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let rows = response
            .json::<Vec<Vec<Value>>>()
            .await
            .map_err(|err| FetchError::Decode {
                url: url.clone(),
                message: err.to_string(),
            })?;

        let total = rows.len();
        let candles: Vec<PriceCandle> = rows.iter().filter_map(|row| parse_kline_row(row)).collect();
        if candles.len() < total {
            warn!(
                "Dropped {} malformed kline row(s) from {}",
                total - candles.len(),
                url
            );
        }
        debug!(
            "{} {} [{}, {}) -> {} candle(s) from {}",
            symbol,
            interval,
            start_ms,
            end_ms,
            candles.len(),
            self.base_url
        );
        Ok(candles)
    }
}

/// Primary endpoint with a single fallback attempt per chunk.
pub struct FallbackKlineSource {
    primary: KlineClient,
    fallback: KlineClient,
}

impl FallbackKlineSource {
    pub fn new(primary: KlineClient, fallback: KlineClient) -> Self {
        Self { primary, fallback }
    }

    pub fn from_urls(http: Client, primary_url: &str, fallback_url: &str) -> Self {
        Self::new(
            KlineClient::new(http.clone(), primary_url),
            KlineClient::new(http, fallback_url),
        )
    }
}

#[async_trait]
impl CandleSource for FallbackKlineSource {
    async fn fetch_chunk(
        &self,
        symbol: &str,
        interval: CandleInterval,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<PriceCandle>, FetchError> {
        let primary_err = match self
            .primary
            .get_klines(symbol, interval, start_ms, end_ms)
            .await
        {
            Ok(candles) => return Ok(candles),
            Err(err) => err,
        };

        warn!(
            "Primary price source failed for {} ({}); retrying on {}",
            symbol,
            primary_err,
            self.fallback.base_url()
        );

        self.fallback
            .get_klines(symbol, interval, start_ms, end_ms)
            .await
            .map_err(|fallback_err| FetchError::ChunkFailed {
                symbol: symbol.to_string(),
                start_ms,
                end_ms,
                primary: Box::new(primary_err),
                fallback: Box::new(fallback_err),
            })
    }
}

/// Reads `[openTime, open, high, low, close, ...]`; numbers may be strings.
fn parse_kline_row(row: &[Value]) -> Option<PriceCandle> {
    if row.len() < 5 {
        return None;
    }
    let open_time_ms = value_as_f64(&row[0])? as i64;
    let open_time = Utc.timestamp_millis_opt(open_time_ms).single()?;
    Some(PriceCandle {
        open_time,
        open: value_as_f64(&row[1])?,
        high: value_as_f64(&row[2])?,
        low: value_as_f64(&row[3])?,
        close: value_as_f64(&row[4])?,
    })
}

fn value_as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}
