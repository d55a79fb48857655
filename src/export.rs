use crate::error::ImportError;
use log::debug;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// One export row keyed by normalized header name.
pub type RawRow = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExportField {
    UnderlyingAsset,
    MarginMode,
    OrderTime,
    AvgFill,
    Filled,
    Pnl,
    PnlPercent,
    Status,
    Side,
    Fee,
}

impl ExportField {
    pub const ALL: [ExportField; 10] = [
        ExportField::UnderlyingAsset,
        ExportField::MarginMode,
        ExportField::OrderTime,
        ExportField::AvgFill,
        ExportField::Filled,
        ExportField::Pnl,
        ExportField::PnlPercent,
        ExportField::Status,
        ExportField::Side,
        ExportField::Fee,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ExportField::UnderlyingAsset => "underlying asset",
            ExportField::MarginMode => "margin mode",
            ExportField::OrderTime => "order time",
            ExportField::AvgFill => "avg fill",
            ExportField::Filled => "filled",
            ExportField::Pnl => "pnl",
            ExportField::PnlPercent => "pnl%",
            ExportField::Status => "status",
            ExportField::Side => "side",
            ExportField::Fee => "fee",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            ExportField::UnderlyingAsset => &["underlying asset", "underlying", "symbol"],
            ExportField::MarginMode => &["margin mode", "margin type"],
            ExportField::OrderTime => &["order time", "time", "create time"],
            ExportField::AvgFill => &[
                "avg fill",
                "avg fill price",
                "average fill price",
                "avg price",
            ],
            ExportField::Filled => &["filled", "filled qty", "filled quantity", "executed"],
            ExportField::Pnl => &["pnl", "realized pnl", "closing pnl"],
            ExportField::PnlPercent => &["pnl%", "pnl %", "pnl pct", "roi"],
            ExportField::Status => &["status", "order status"],
            ExportField::Side => &["side", "direction"],
            ExportField::Fee => &["fee", "fees", "trading fee"],
        }
    }
}

/// Lowercases a header, folds `_`/`-` into spaces and collapses whitespace.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Maps each known field to the normalized header that carries it.
#[derive(Debug, Clone)]
pub struct ExportSchema {
    columns: HashMap<ExportField, String>,
}

impl ExportSchema {
    pub fn detect<S: AsRef<str>>(headers: &[S]) -> Result<Self, ImportError> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();

        let mut columns = HashMap::new();
        let mut missing = Vec::new();
        for field in ExportField::ALL {
            let found = field
                .aliases()
                .iter()
                .find(|alias| normalized.iter().any(|header| header == *alias));
            match found {
                Some(alias) => {
                    columns.insert(field, (*alias).to_string());
                }
                None => missing.push(field.label().to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(ImportError::UnsupportedSchema { missing });
        }

        Ok(Self { columns })
    }

    pub fn value<'a>(&self, row: &'a RawRow, field: ExportField) -> Option<&'a str> {
        let header = self.columns.get(&field)?;
        row.get(header).map(|value| value.trim())
    }
}

#[derive(Debug, Clone)]
pub struct ExportRows {
    pub schema: ExportSchema,
    pub rows: Vec<RawRow>,
}

pub fn read_export_file<P: AsRef<Path>>(path: P) -> Result<ExportRows, ImportError> {
    let file = File::open(path.as_ref()).map_err(csv::Error::from)?;
    read_export(file)
}

/// Reads a CSV export, detecting the supported layout from its header row.
pub fn read_export<R: Read>(source: R) -> Result<ExportRows, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();
    if headers.iter().all(|header| header.is_empty()) {
        return Err(ImportError::MissingHeader);
    }
    let schema = ExportSchema::detect(&headers)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, value)| (header.clone(), value.to_string()))
            .collect();
        rows.push(row);
    }
    debug!("Read {} export row(s)", rows.len());

    Ok(ExportRows { schema, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "Underlying Asset,Margin Mode,Order Time,Avg Fill,Filled,PNL,PNL%,Status,Side,Fee";

    #[test]
    fn normalizes_separators_and_whitespace() {
        assert_eq!(normalize_header("  Underlying_Asset "), "underlying asset");
        assert_eq!(normalize_header("Order-Time"), "order time");
        assert_eq!(normalize_header("Avg   Fill\tPrice"), "avg fill price");
        assert_eq!(normalize_header("\u{feff}PNL%"), "pnl%");
    }

    #[test]
    fn detects_supported_layout() {
        let csv = format!(
            "{}\nBTCUSDT,Cross,2024-01-01 00:00:00,100,1 BTC,--,--,Filled,Open Long,0.1\n",
            HEADER
        );
        let export = read_export(csv.as_bytes()).unwrap();
        assert_eq!(export.rows.len(), 1);
        let row = &export.rows[0];
        assert_eq!(
            export.schema.value(row, ExportField::UnderlyingAsset),
            Some("BTCUSDT")
        );
        assert_eq!(export.schema.value(row, ExportField::Side), Some("Open Long"));
    }

    #[test]
    fn accepts_header_aliases() {
        let headers = [
            "symbol",
            "MARGIN_MODE",
            "order-time",
            "Avg Fill Price",
            "Filled Qty",
            "Realized PNL",
            "PNL %",
            "status",
            "side",
            "Trading Fee",
        ];
        assert!(ExportSchema::detect(&headers).is_ok());
    }

    #[test]
    fn reports_missing_columns() {
        let err = ExportSchema::detect(&["Symbol", "Side", "Price"]).unwrap_err();
        match err {
            ImportError::UnsupportedSchema { missing } => {
                assert!(missing.contains(&"margin mode".to_string()));
                assert!(missing.contains(&"avg fill".to_string()));
                assert!(!missing.contains(&"side".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
