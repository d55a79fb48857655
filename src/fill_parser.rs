use crate::export::{ExportField, ExportSchema, RawRow};
use crate::models::{Direction, Fill, FillAction};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use log::{debug, info};
use std::collections::BTreeMap;

const NO_VALUE_PLACEHOLDER: &str = "--";
const FILLED_STATUS: &str = "filled";

/// Locale-style layouts tried before the explicit US fallback.
const LOCALE_TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];
const FALLBACK_TIME_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkipReason {
    NotFilled,
    MissingSymbol,
    UnknownSide,
    InvalidTime,
    InvalidQuantity,
    InvalidPrice,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotFilled => "not filled",
            SkipReason::MissingSymbol => "missing symbol",
            SkipReason::UnknownSide => "unknown side",
            SkipReason::InvalidTime => "invalid time",
            SkipReason::InvalidQuantity => "invalid quantity",
            SkipReason::InvalidPrice => "invalid price",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RowOutcome {
    Parsed(Fill),
    Skip(SkipReason),
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedFills {
    pub fills: Vec<Fill>,
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl NormalizedFills {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

pub fn normalize_rows(rows: &[RawRow], schema: &ExportSchema) -> NormalizedFills {
    let mut normalized = NormalizedFills::default();
    for row in rows {
        match normalize_row(row, schema) {
            RowOutcome::Parsed(fill) => normalized.fills.push(fill),
            RowOutcome::Skip(reason) => *normalized.skipped.entry(reason).or_default() += 1,
        }
    }

    if !normalized.skipped.is_empty() {
        for (reason, count) in &normalized.skipped {
            debug!("Skipped {} row(s): {}", count, reason.as_str());
        }
    }
    info!(
        "Normalized {} fill(s) from {} row(s) ({} skipped)",
        normalized.fills.len(),
        rows.len(),
        normalized.skipped_total()
    );

    normalized
}

pub fn normalize_row(row: &RawRow, schema: &ExportSchema) -> RowOutcome {
    let field = |name: ExportField| schema.value(row, name).unwrap_or("");

    if !field(ExportField::Status).eq_ignore_ascii_case(FILLED_STATUS) {
        return RowOutcome::Skip(SkipReason::NotFilled);
    }

    let symbol = field(ExportField::UnderlyingAsset).trim().to_uppercase();
    if symbol.is_empty() {
        return RowOutcome::Skip(SkipReason::MissingSymbol);
    }

    let (Some(action), Some(direction)) = classify_side(field(ExportField::Side)) else {
        return RowOutcome::Skip(SkipReason::UnknownSide);
    };

    let Some(time) = parse_order_time(field(ExportField::OrderTime)) else {
        return RowOutcome::Skip(SkipReason::InvalidTime);
    };

    let quantity = match parse_numeric(field(ExportField::Filled)) {
        Some(value) if value > 0.0 => value,
        _ => return RowOutcome::Skip(SkipReason::InvalidQuantity),
    };

    let price = match parse_numeric(field(ExportField::AvgFill)) {
        Some(value) if value > 0.0 => value,
        _ => return RowOutcome::Skip(SkipReason::InvalidPrice),
    };

    RowOutcome::Parsed(Fill {
        symbol,
        action,
        direction,
        time,
        price,
        quantity,
        realized_pnl: parse_numeric(field(ExportField::Pnl)),
        realized_pnl_pct: parse_numeric(field(ExportField::PnlPercent)),
        fee: parse_numeric(field(ExportField::Fee)),
    })
}

/// Parses the leading number of a field such as `"0.5 BTC"`, `"-12.3USDT"`,
/// `"4.1%"` or `"1e-5 BTC"`. The `--` placeholder and empty cells yield `None`.
/// A comma is only read as a thousands separator (followed by exactly three
/// digits); any other comma makes the value unreadable.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == NO_VALUE_PLACEHOLDER {
        return None;
    }

    let chars: Vec<char> = trimmed.trim_start_matches('$').chars().collect();
    let digit_at = |idx: usize| chars.get(idx).is_some_and(|c| c.is_ascii_digit());

    let mut number = String::with_capacity(chars.len());
    let mut idx = 0usize;
    if let Some(sign @ ('+' | '-')) = chars.first() {
        number.push(*sign);
        idx = 1;
    }

    let mut seen_digit = false;
    while let Some(&c) = chars.get(idx) {
        if c.is_ascii_digit() {
            number.push(c);
            seen_digit = true;
        } else if c == ',' {
            let grouped = seen_digit
                && (1..=3).all(|offset| digit_at(idx + offset))
                && !digit_at(idx + 4);
            if !grouped {
                return None;
            }
        } else {
            break;
        }
        idx += 1;
    }

    if chars.get(idx) == Some(&'.') && digit_at(idx + 1) {
        number.push('.');
        idx += 1;
        while digit_at(idx) {
            number.push(chars[idx]);
            seen_digit = true;
            idx += 1;
        }
    }

    if !seen_digit {
        return None;
    }

    if matches!(chars.get(idx), Some('e' | 'E')) {
        let signed = matches!(chars.get(idx + 1), Some('+' | '-'));
        let mut pos = idx + 1 + usize::from(signed);
        if digit_at(pos) {
            number.push('e');
            if signed {
                number.push(chars[idx + 1]);
            }
            while digit_at(pos) {
                number.push(chars[pos]);
                pos += 1;
            }
        }
    }

    number.parse::<f64>().ok().filter(|value| value.is_finite())
}

pub fn parse_order_time(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    if trimmed.len() >= 12 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
    }

    LOCALE_TIME_FORMATS
        .iter()
        .chain(std::iter::once(&FALLBACK_TIME_FORMAT))
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Derives action and direction from free-form side text such as
/// `"Open Long"` or `"close_short"`.
pub fn classify_side(raw: &str) -> (Option<FillAction>, Option<Direction>) {
    let lower = raw.trim().to_lowercase();

    let action = if lower.contains("open") {
        Some(FillAction::Open)
    } else if lower.contains("close") {
        Some(FillAction::Close)
    } else {
        None
    };

    let direction = if lower.contains("long") {
        Some(Direction::Long)
    } else if lower.contains("short") {
        Some(Direction::Short)
    } else {
        None
    };

    (action, direction)
}
