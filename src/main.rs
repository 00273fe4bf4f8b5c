mod alpha_vantage;
mod analysis;
mod config;
mod error;
mod indicators;
mod market;
mod normalize;
mod provider;
mod render;
mod throttle;
mod yahoo;

use analysis::{ScanProgress, Screener};
use anyhow::Result;
use chrono::Utc;
use config::AppConfig;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so the rendered table on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Step 1: Configuration
    let config = AppConfig::load().await?;
    info!(
        pairs = config.pairs.len(),
        timeframes = config.timeframes.len(),
        period = config.rsi.period,
        "screener configured"
    );

    // Step 2: Providers
    let providers = provider::build_chain(&config.providers)?;

    // First Ctrl-C stops the scan in progress and the partial grid is still rendered.
    // A second one exits immediately.
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if stop_tx.send_replace(true) {
                warn!("second interrupt, exiting");
                std::process::exit(130);
            }
            warn!("interrupt received, finishing with a partial grid");
        }
    });

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ScanProgress>();
    tokio::spawn(async move {
        while let Some(p) = progress_rx.recv().await {
            eprintln!("Analysing: {} ({}/{} cells)", p.pair, p.completed, p.total);
        }
    });

    let mut screener = Screener::new(providers, config.series.normalizer(), config.rsi.period)
        .with_progress(progress_tx)
        .with_stop(stop_rx.clone());
    let thresholds = config.rsi.thresholds();

    loop {
        // Step 3: Scan
        let grid = screener.scan(&config.pairs, &config.timeframes).await;

        // Step 4: Display Results
        if config.refresh_secs.is_some() {
            if let Err(e) = clearscreen::clear() {
                warn!(error = %e, "could not clear screen");
            }
        }
        println!("{}", render::render(&grid, &thresholds, Utc::now()));

        let Some(refresh) = config.refresh_secs else {
            break;
        };
        if *stop_rx.borrow() {
            break;
        }
        let mut stop = stop_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(refresh)) => {}
            _ = stop.changed() => break,
        }
    }

    Ok(())
}
