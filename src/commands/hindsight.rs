use crate::commands::score::{load_trades, LoadedTrades};
use crate::config::CandleInterval;
use crate::context::AppContext;
use crate::hindsight::{run_hindsight, HindsightParams, HindsightReport};
use crate::report::{
    log_behavior_score, log_hindsight, write_json_report, HindsightFileReport,
    HindsightRunSettings,
};
use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct HindsightOverrides {
    pub interval: Option<CandleInterval>,
    pub lookahead_hours: Option<f64>,
    pub realism: Option<f64>,
}

pub async fn run(
    app: &AppContext,
    export_path: &Path,
    overrides: HindsightOverrides,
    output: Option<&Path>,
) -> Result<HindsightReport> {
    let settings = app.settings().clone().with_overrides(
        overrides.interval,
        overrides.lookahead_hours,
        overrides.realism,
    )?;

    info!("Running hindsight for {}", export_path.display());
    let LoadedTrades { trades, score } = load_trades(export_path)?;
    // The score stays valid even if the price fetch below fails.
    log_behavior_score(&score);

    let params = HindsightParams {
        lookahead: settings.lookahead,
        realism: settings.realism,
    };
    info!(
        "Lookahead {}h on {} candles, realism {:.0}%",
        settings.lookahead.num_minutes() as f64 / 60.0,
        settings.interval,
        settings.realism * 100.0
    );

    let fetcher = app.price_fetcher()?;
    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress bar template")?
            .progress_chars("#>-"),
    );

    let outcome = run_hindsight(
        &fetcher,
        &trades,
        settings.interval,
        &params,
        Utc::now(),
        &progress,
    )
    .await;
    progress.finish_and_clear();
    let report = outcome.context("hindsight price fetch failed")?;

    log_hindsight(&report.results, &report.summary);

    if let Some(output) = output {
        let file_report = HindsightFileReport {
            source: export_path.display().to_string(),
            score: &score,
            settings: HindsightRunSettings {
                interval: settings.interval.label().to_string(),
                lookahead_hours: settings.lookahead.num_milliseconds() as f64 / 3_600_000.0,
                realism: settings.realism,
            },
            summary: &report.summary,
            results: &report.results,
        };
        write_json_report(output, &file_report)?;
    }

    Ok(report)
}
