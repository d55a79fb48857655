use crate::models::{BehaviorScore, ClosedTrade, HindsightResult, HindsightSummary};
use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport<'a> {
    pub source: String,
    pub score: &'a BehaviorScore,
    pub trades: &'a [ClosedTrade],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HindsightRunSettings {
    pub interval: String,
    pub lookahead_hours: f64,
    pub realism: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HindsightFileReport<'a> {
    pub source: String,
    pub score: &'a BehaviorScore,
    pub settings: HindsightRunSettings,
    pub summary: &'a HindsightSummary,
    pub results: &'a [HindsightResult],
}

pub fn write_json_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    info!("Wrote report to {}", path.display());
    Ok(())
}

pub fn log_behavior_score(score: &BehaviorScore) {
    info!(
        "{} trade{} ({} won, {} lost) | win rate {} | total PnL {} | fees {}",
        score.total_trades,
        if score.total_trades == 1 { "" } else { "s" },
        score.winning_trades,
        score.losing_trades,
        format_percent(score.win_rate.map(|rate| rate * 100.0)),
        format_amount(score.total_pnl),
        format_amount(score.total_fees)
    );
    info!(
        "Avg hold: winners {} / losers {} | paperhands ratio {} | fumble score {}",
        format_hold(score.avg_win_hold_ms),
        format_hold(score.avg_loss_hold_ms),
        format_ratio(score.paperhands_ratio),
        score
            .fumble_score
            .map(|value| format!("{:.0}/100", value))
            .unwrap_or_else(|| "n/a".to_string())
    );
}

pub fn log_hindsight(results: &[HindsightResult], summary: &HindsightSummary) {
    for result in results.iter().filter(|r| r.has_data()) {
        let trade = &result.trade;
        info!(
            "{} {} closed {} @ {} | best {} | realized {} | potential {} | fumbled {}",
            trade.symbol,
            trade.direction,
            trade.close_time.format("%Y-%m-%d %H:%M"),
            trade.exit_price,
            format_amount(result.best_exit),
            format_amount(trade.realized_pnl),
            format_amount(result.potential_pnl),
            format_amount(result.fumbled)
        );
    }
    info!(
        "Hindsight: {}/{} trade(s) with data | realized {} | potential {} | fumbled {}",
        summary.trades_with_data,
        summary.evaluated_trades,
        format_amount(summary.total_realized_pnl),
        format_amount(summary.total_potential_pnl),
        format_amount(summary.total_fumbled)
    );
    if let Some(worst) = summary.worst_fumble_index.and_then(|idx| results.get(idx)) {
        info!(
            "Largest fumble: {} {} closed {} ({} left on the table)",
            worst.trade.symbol,
            worst.trade.direction,
            worst.trade.close_time.format("%Y-%m-%d %H:%M"),
            format_amount(worst.fumbled)
        );
    }
}

fn format_amount(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn format_percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.1}%", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn format_ratio(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn format_hold(ms: Option<f64>) -> String {
    let Some(ms) = ms else {
        return "n/a".to_string();
    };
    let minutes = ms / 60_000.0;
    if minutes < 120.0 {
        format!("{:.0}m", minutes)
    } else if minutes < 2_880.0 {
        format!("{:.1}h", minutes / 60.0)
    } else {
        format!("{:.1}d", minutes / 1_440.0)
    }
}
