use anyhow::{anyhow, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PRIMARY_URL: &str = "https://api.binance.com";
pub const DEFAULT_FALLBACK_URL: &str = "https://data-api.binance.vision";
const DEFAULT_REQUEST_DELAY_MS: u64 = 250;
const DEFAULT_LOOKAHEAD_HOURS: f64 = 24.0;
const DEFAULT_REALISM: f64 = 0.5;
const DEFAULT_INTERVAL: CandleInterval = CandleInterval::FifteenMinutes;
pub const MAX_LOOKAHEAD_HOURS: f64 = 8_760.0;
pub const MAX_REQUEST_TIMEOUT_SECS: f64 = 3_600.0;

/// Candle granularities understood by the price source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    EightHours,
    TwelveHours,
    OneDay,
}

impl CandleInterval {
    pub const ALL: [CandleInterval; 12] = [
        CandleInterval::OneMinute,
        CandleInterval::ThreeMinutes,
        CandleInterval::FiveMinutes,
        CandleInterval::FifteenMinutes,
        CandleInterval::ThirtyMinutes,
        CandleInterval::OneHour,
        CandleInterval::TwoHours,
        CandleInterval::FourHours,
        CandleInterval::SixHours,
        CandleInterval::EightHours,
        CandleInterval::TwelveHours,
        CandleInterval::OneDay,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::ThreeMinutes => "3m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::FifteenMinutes => "15m",
            CandleInterval::ThirtyMinutes => "30m",
            CandleInterval::OneHour => "1h",
            CandleInterval::TwoHours => "2h",
            CandleInterval::FourHours => "4h",
            CandleInterval::SixHours => "6h",
            CandleInterval::EightHours => "8h",
            CandleInterval::TwelveHours => "12h",
            CandleInterval::OneDay => "1d",
        }
    }

    pub fn duration_ms(self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            CandleInterval::OneMinute => MINUTE,
            CandleInterval::ThreeMinutes => 3 * MINUTE,
            CandleInterval::FiveMinutes => 5 * MINUTE,
            CandleInterval::FifteenMinutes => 15 * MINUTE,
            CandleInterval::ThirtyMinutes => 30 * MINUTE,
            CandleInterval::OneHour => 60 * MINUTE,
            CandleInterval::TwoHours => 120 * MINUTE,
            CandleInterval::FourHours => 240 * MINUTE,
            CandleInterval::SixHours => 360 * MINUTE,
            CandleInterval::EightHours => 480 * MINUTE,
            CandleInterval::TwelveHours => 720 * MINUTE,
            CandleInterval::OneDay => 1_440 * MINUTE,
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CandleInterval {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|interval| interval.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                anyhow!(
                    "unsupported candle interval {} (expected one of {})",
                    trimmed,
                    Self::ALL.map(|i| i.label()).join(", ")
                )
            })
    }
}

/// Parses a realism setting: a fraction such as `0.35`, or a percentage with
/// an explicit suffix such as `35%`. Either form must land in [0, 1].
pub fn parse_realism(raw: &str) -> Result<f64> {
    let trimmed = raw.trim();
    let (number, scale) = match trimmed.strip_suffix('%') {
        Some(percent) => (percent.trim(), 100.0),
        None => (trimmed, 1.0),
    };
    let value = number
        .parse::<f64>()
        .map_err(|_| anyhow!("realism must be a fraction or a percentage (value: {})", raw))?;
    check_realism(value / scale)
}

pub fn check_realism(fraction: f64) -> Result<f64> {
    if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
        return Err(anyhow!(
            "realism must be between 0 and 1, or 0% and 100% (value: {})",
            fraction
        ));
    }
    Ok(fraction)
}

#[derive(Debug, Clone)]
pub struct HindsightSettings {
    pub primary_url: String,
    pub fallback_url: String,
    pub request_delay: std::time::Duration,
    pub request_timeout: Option<std::time::Duration>,
    pub interval: CandleInterval,
    pub lookahead: Duration,
    pub realism: f64,
}

impl Default for HindsightSettings {
    fn default() -> Self {
        Self {
            primary_url: DEFAULT_PRIMARY_URL.to_string(),
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            request_delay: std::time::Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            request_timeout: None,
            interval: DEFAULT_INTERVAL,
            lookahead: lookahead_from_hours(DEFAULT_LOOKAHEAD_HOURS),
            realism: DEFAULT_REALISM,
        }
    }
}

impl HindsightSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let primary_url = optional_setting(settings, "PRICE_PRIMARY_URL")
            .map(normalize_base_url)
            .unwrap_or(defaults.primary_url);
        let fallback_url = optional_setting(settings, "PRICE_FALLBACK_URL")
            .map(normalize_base_url)
            .unwrap_or(defaults.fallback_url);

        let request_delay_ms = setting_f64(
            settings,
            "PRICE_REQUEST_DELAY_MS",
            DEFAULT_REQUEST_DELAY_MS as f64,
            Some(0.0),
            None,
        )?;
        let request_timeout = match optional_setting(settings, "PRICE_REQUEST_TIMEOUT_SECS") {
            Some(_) => {
                let secs = setting_f64(
                    settings,
                    "PRICE_REQUEST_TIMEOUT_SECS",
                    0.0,
                    Some(0.0),
                    Some(MAX_REQUEST_TIMEOUT_SECS),
                )?;
                if secs > 0.0 {
                    Some(std::time::Duration::try_from_secs_f64(secs).map_err(|err| {
                        anyhow!("Setting PRICE_REQUEST_TIMEOUT_SECS is invalid: {}", err)
                    })?)
                } else {
                    None
                }
            }
            None => None,
        };

        let interval = match optional_setting(settings, "HINDSIGHT_INTERVAL") {
            Some(raw) => raw
                .parse::<CandleInterval>()
                .map_err(|err| anyhow!("Setting HINDSIGHT_INTERVAL is invalid: {}", err))?,
            None => defaults.interval,
        };
        let lookahead_hours = setting_f64(
            settings,
            "HINDSIGHT_LOOKAHEAD_HOURS",
            DEFAULT_LOOKAHEAD_HOURS,
            Some(0.0),
            Some(MAX_LOOKAHEAD_HOURS),
        )?;
        let realism = match optional_setting(settings, "HINDSIGHT_REALISM") {
            Some(raw) => parse_realism(raw)
                .map_err(|err| anyhow!("Setting HINDSIGHT_REALISM is invalid: {}", err))?,
            None => defaults.realism,
        };

        Ok(Self {
            primary_url,
            fallback_url,
            request_delay: std::time::Duration::from_millis(request_delay_ms.round() as u64),
            request_timeout,
            interval,
            lookahead: lookahead_from_hours(lookahead_hours),
            realism,
        })
    }

    pub fn with_overrides(
        mut self,
        interval: Option<CandleInterval>,
        lookahead_hours: Option<f64>,
        realism: Option<f64>,
    ) -> Result<Self> {
        if let Some(interval) = interval {
            self.interval = interval;
        }
        if let Some(hours) = lookahead_hours {
            if !hours.is_finite() || !(0.0..=MAX_LOOKAHEAD_HOURS).contains(&hours) {
                return Err(anyhow!(
                    "lookahead hours must be between 0 and {} (value: {})",
                    MAX_LOOKAHEAD_HOURS,
                    hours
                ));
            }
            self.lookahead = lookahead_from_hours(hours);
        }
        if let Some(realism) = realism {
            self.realism = check_realism(realism)?;
        }
        Ok(self)
    }
}

pub fn lookahead_from_hours(hours: f64) -> Duration {
    Duration::milliseconds((hours * 3_600_000.0).round() as i64)
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim_end_matches('/').to_string()
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}
