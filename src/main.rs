use anyhow::Result;
use clap::{Parser, Subcommand};
use hindsight_engine::{
    commands::{hindsight, score},
    config::{parse_realism, CandleInterval},
    context::AppContext,
};
use log::info;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hindsight-engine")]
#[command(about = "Rebuilds round-trip trades from an exchange export and checks what a better exit would have paid")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct closed trades and compute the behavioral score
    Score {
        /// Trade history export (CSV)
        file: PathBuf,
        /// Write the trades and score as JSON to this path
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Score the export, then compare every exit against later price action
    Hindsight {
        /// Trade history export (CSV)
        file: PathBuf,
        /// Candle granularity (1m, 3m, 5m, 15m, 30m, 1h, 2h, 4h, 6h, 8h, 12h, 1d)
        #[arg(long)]
        interval: Option<CandleInterval>,
        /// Hours after each exit to search for a better price
        #[arg(long)]
        lookahead_hours: Option<f64>,
        /// Share of the theoretical edge assumed capturable: a fraction in 0..=1
        /// (e.g. 0.35) or a percentage with a `%` suffix (e.g. 35%)
        #[arg(long, value_parser = parse_realism)]
        realism: Option<f64>,
        /// Write the full hindsight report as JSON to this path
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings: HashMap<String, String> = env::vars().collect();
    let app_context = AppContext::initialize(&settings)?;

    info!("Starting hindsight engine. Figures are estimates, not exchange-exact accounting.");

    run_command(&app_context, command).await
}

async fn run_command(app_context: &AppContext, command: Commands) -> Result<()> {
    match command {
        Commands::Score { file, output } => {
            score::run(&file, output.as_deref()).await?;
        }
        Commands::Hindsight {
            file,
            interval,
            lookahead_hours,
            realism,
            output,
        } => {
            let overrides = hindsight::HindsightOverrides {
                interval,
                lookahead_hours,
                realism,
            };
            hindsight::run(app_context, &file, overrides, output.as_deref()).await?;
        }
    }

    Ok(())
}
