//! The scan pipeline: provider -> normalizer -> RSI for every pair/timeframe cell.

use crate::error::{ScanError, ScanResult};
use crate::indicators::{RsiResult, RsiThresholds, Zone, compute_rsi};
use crate::market::{CurrencyPair, OhlcSeries, Timeframe};
use crate::normalize::Normalizer;
use crate::provider::MarketDataProvider;
use crate::throttle::Throttle;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

// --- Results ---

#[derive(Debug, Clone, PartialEq)]
pub struct ScanCell {
    pub timeframe: Timeframe,
    pub rsi: RsiResult,
    /// Why the cell is undefined, when a stage failed.
    pub issue: Option<ScanError>,
}

impl ScanCell {
    fn skipped(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            rsi: RsiResult::Undefined,
            issue: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRow {
    pub pair: CurrencyPair,
    /// Same order as `ScanGrid::timeframes`.
    pub cells: Vec<ScanCell>,
}

impl ScanRow {
    pub fn get(&self, timeframe: Timeframe) -> Option<&ScanCell> {
        self.cells.iter().find(|c| c.timeframe == timeframe)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanGrid {
    pub timeframes: Vec<Timeframe>,
    pub rows: Vec<ScanRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeframeSummary {
    pub timeframe: Timeframe,
    pub valid: usize,
    pub oversold: usize,
    pub overbought: usize,
}

impl TimeframeSummary {
    pub fn signals(&self) -> usize {
        self.oversold + self.overbought
    }
}

impl ScanGrid {
    pub fn cells(&self) -> impl Iterator<Item = (&CurrencyPair, &ScanCell)> {
        self.rows
            .iter()
            .flat_map(|row| row.cells.iter().map(move |cell| (&row.pair, cell)))
    }

    /// Per-timeframe signal counts, in column order.
    pub fn summary(&self, thresholds: &RsiThresholds) -> Vec<TimeframeSummary> {
        self.timeframes
            .iter()
            .map(|&timeframe| {
                let mut summary = TimeframeSummary {
                    timeframe,
                    valid: 0,
                    oversold: 0,
                    overbought: 0,
                };
                for cell in self.rows.iter().filter_map(|row| row.get(timeframe)) {
                    if cell.rsi.is_undefined() {
                        continue;
                    }
                    summary.valid += 1;
                    match thresholds.classify(cell.rsi) {
                        Zone::Oversold => summary.oversold += 1,
                        Zone::Overbought => summary.overbought += 1,
                        Zone::Neutral => {}
                    }
                }
                summary
            })
            .collect()
    }
}

/// Emitted after each pair finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanProgress {
    pub pair: CurrencyPair,
    pub completed: usize,
    pub total: usize,
}

// --- Orchestrator ---

struct Source {
    provider: Arc<dyn MarketDataProvider>,
    throttle: Throttle,
}

/// Runs the grid sequentially. Each provider gets its own throttle, and a cell is
/// tried against the providers in order until one yields a usable series.
pub struct Screener {
    sources: Vec<Source>,
    normalizer: Normalizer,
    period: usize,
    progress: Option<mpsc::UnboundedSender<ScanProgress>>,
    stop: Option<watch::Receiver<bool>>,
}

impl Screener {
    pub fn new(
        providers: Vec<Arc<dyn MarketDataProvider>>,
        normalizer: Normalizer,
        period: usize,
    ) -> Self {
        let sources = providers
            .into_iter()
            .map(|provider| Source {
                throttle: Throttle::new(provider.min_interval()),
                provider,
            })
            .collect();
        Self {
            sources,
            normalizer,
            period,
            progress: None,
            stop: None,
        }
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ScanProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Once the receiver reads `true`, remaining cells are left undefined.
    pub fn with_stop(mut self, rx: watch::Receiver<bool>) -> Self {
        self.stop = Some(rx);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub async fn scan(&mut self, pairs: &[CurrencyPair], timeframes: &[Timeframe]) -> ScanGrid {
        let total = pairs.len() * timeframes.len();
        let mut completed = 0;
        let mut rows = Vec::with_capacity(pairs.len());
        let mut stopped = false;

        for pair in pairs {
            let mut cells = Vec::with_capacity(timeframes.len());
            for &timeframe in timeframes {
                if !stopped && self.stop_requested() {
                    info!(completed, total, "scan stopped, leaving remaining cells undefined");
                    stopped = true;
                }
                if stopped {
                    cells.push(ScanCell::skipped(timeframe));
                    continue;
                }
                cells.push(self.evaluate(pair, timeframe).await);
                completed += 1;
            }
            rows.push(ScanRow {
                pair: pair.clone(),
                cells,
            });

            if !stopped && !self.stop_requested() {
                if let Some(tx) = &self.progress {
                    let _ = tx.send(ScanProgress {
                        pair: pair.clone(),
                        completed,
                        total,
                    });
                }
            }
        }

        ScanGrid {
            timeframes: timeframes.to_vec(),
            rows,
        }
    }

    async fn evaluate(&mut self, pair: &CurrencyPair, timeframe: Timeframe) -> ScanCell {
        let stop = self.stop.clone();
        let fetched = tokio::select! {
            fetched = self.fetch_series(pair, timeframe) => fetched,
            _ = stop_signal(stop) => {
                info!(%pair, %timeframe, "scan stopped while the cell was pending");
                return ScanCell::skipped(timeframe);
            }
        };
        match fetched {
            Ok(series) => {
                let rsi = compute_rsi(series.bars(), self.period);
                debug!(%pair, %timeframe, bars = series.len(), rsi = ?rsi.value(), "cell done");
                ScanCell {
                    timeframe,
                    rsi,
                    issue: None,
                }
            }
            Err(issue) => ScanCell {
                timeframe,
                rsi: RsiResult::Undefined,
                issue: Some(issue),
            },
        }
    }

    async fn fetch_series(&mut self, pair: &CurrencyPair, timeframe: Timeframe) -> ScanResult<OhlcSeries> {
        let mut last_err = None;
        for source in &mut self.sources {
            let name = source.provider.name();
            if let Err(e) = source.provider.ready() {
                debug!(provider = name, error = %e, "provider not ready, skipping");
                last_err = Some(e);
                continue;
            }
            source.throttle.wait().await;
            let result = match source.provider.fetch(pair, timeframe).await {
                Ok(raw) => self.normalizer.normalize(raw),
                Err(e) => Err(e),
            };
            match result {
                Ok(series) => return Ok(series),
                Err(e) => {
                    warn!(provider = name, %pair, %timeframe, error = %e, "cell source failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ScanError::NoData("no data provider configured".to_string())))
    }
}

/// Resolves once the stop flag reads `true`; never resolves without a receiver.
async fn stop_signal(stop: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = stop {
        if rx.wait_for(|stopped| *stopped).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}
