use crate::export::read_export_file;
use crate::fill_parser::normalize_rows;
use crate::lot_matcher::match_fills;
use crate::models::{BehaviorScore, ClosedTrade};
use crate::performance::PerformanceCalculator;
use crate::report::{log_behavior_score, write_json_report, ScoreReport};
use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;

pub struct LoadedTrades {
    pub trades: Vec<ClosedTrade>,
    pub score: BehaviorScore,
}

/// Reads an export and reconstructs its closed trades. Fails only when the
/// file cannot be read or its layout is unsupported.
pub fn load_trades(export_path: &Path) -> Result<LoadedTrades> {
    let export = read_export_file(export_path)
        .with_context(|| format!("failed to import {}", export_path.display()))?;
    let normalized = normalize_rows(&export.rows, &export.schema);
    if normalized.fills.is_empty() {
        warn!(
            "No usable fills found in {} ({} row(s) skipped)",
            export_path.display(),
            normalized.skipped_total()
        );
    }

    let trades = match_fills(&normalized.fills);
    let score = PerformanceCalculator::calculate_behavior(&trades);
    Ok(LoadedTrades { trades, score })
}

pub async fn run(export_path: &Path, output: Option<&Path>) -> Result<BehaviorScore> {
    info!("Scoring trade history from {}", export_path.display());
    let LoadedTrades { trades, score } = load_trades(export_path)?;
    log_behavior_score(&score);

    for trade in trades.iter().filter(|t| t.note.is_some()) {
        warn!(
            "{} {} closed {}: {}",
            trade.symbol,
            trade.direction,
            trade.close_time.format("%Y-%m-%d %H:%M:%S"),
            trade.note.as_deref().unwrap_or_default()
        );
    }

    if let Some(output) = output {
        let report = ScoreReport {
            source: export_path.display().to_string(),
            score: &score,
            trades: &trades,
        };
        write_json_report(output, &report)?;
    }

    Ok(score)
}
