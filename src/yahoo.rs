use crate::config::ProviderConfig;
use crate::error::{ScanError, ScanResult};
use crate::market::{CurrencyPair, RawBar, RawSeries, RawTime, Timeframe};
use crate::provider::{self, MarketDataProvider};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::ZERO;

/// `(range, interval, bucket hours)` for the chart endpoint.
fn query_for(timeframe: Timeframe) -> (&'static str, &'static str, Option<i64>) {
    match timeframe {
        Timeframe::H1 => ("1mo", "1h", None),
        // No native 4h interval: pull hourly bars and let the normalizer bucket them.
        Timeframe::H4 => ("3mo", "1h", Some(4)),
        Timeframe::D1 => ("1y", "1d", None),
        Timeframe::W1 => ("5y", "1wk", None),
    }
}

pub fn yahoo_symbol(pair: &CurrencyPair) -> String {
    format!("{}{}=X", pair.base, pair.quote)
}

// --- Response Shape ---

#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Deserialize, Debug)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: Indicators,
}

#[derive(Deserialize, Debug, Default)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Deserialize, Debug)]
struct Quote {
    #[serde(default)]
    open: Vec<Value>,
    #[serde(default)]
    high: Vec<Value>,
    #[serde(default)]
    low: Vec<Value>,
    #[serde(default)]
    close: Vec<Value>,
}

fn parse_chart(body: &str) -> ScanResult<RawSeries> {
    let envelope: ChartEnvelope = serde_json::from_str(body)
        .map_err(|e| ScanError::Upstream(format!("unexpected chart payload: {e}")))?;

    if let Some(err) = envelope.chart.error {
        let description = err.description.unwrap_or_default();
        return Err(if err.code == "Not Found" {
            ScanError::NoData(description)
        } else {
            ScanError::Upstream(format!("{}: {description}", err.code))
        });
    }

    let result = envelope
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| ScanError::NoData("chart result is empty".to_string()))?;
    if result.timestamp.is_empty() {
        return Err(ScanError::NoData("chart has no timestamps".to_string()));
    }
    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| ScanError::NoData("chart has no quote block".to_string()))?;

    let n = result.timestamp.len();
    if [&quote.open, &quote.high, &quote.low, &quote.close]
        .iter()
        .any(|col| col.len() != n)
    {
        return Err(ScanError::MalformedData(format!(
            "quote columns do not match {n} timestamps"
        )));
    }

    let bars = result
        .timestamp
        .into_iter()
        .zip(quote.open)
        .zip(quote.high)
        .zip(quote.low)
        .zip(quote.close)
        .map(|((((ts, open), high), low), close)| RawBar {
            time: RawTime::Epoch(ts),
            open,
            high,
            low,
            close,
        })
        .collect();
    Ok(RawSeries::new(bars))
}

// --- Provider ---

/// Yahoo Finance chart API, addressed with synthetic `EURUSD=X` tickers.
pub struct YahooProvider {
    client: Client,
    base_url: String,
    min_interval: Duration,
    timeout: Duration,
}

impl YahooProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let timeout = config.timeout();
        Ok(Self {
            client: provider::http_client(timeout)?,
            base_url: config.base_url_or(DEFAULT_BASE_URL).to_string(),
            min_interval: config.min_interval_or(DEFAULT_MIN_INTERVAL),
            timeout,
        })
    }
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    fn min_interval(&self) -> Duration {
        self.min_interval
    }

    async fn fetch(&self, pair: &CurrencyPair, timeframe: Timeframe) -> ScanResult<RawSeries> {
        let (range, interval, bucket_hours) = query_for(timeframe);
        let symbol = yahoo_symbol(pair);
        let url = format!("{}/v8/finance/chart/{symbol}", self.base_url);
        debug!(%symbol, range, interval, "requesting chart");

        let request = self.client.get(&url).query(&[
            ("range", range),
            ("interval", interval),
            ("includePrePost", "false"),
        ]);
        let (status, body) = provider::send(request, self.timeout).await?;

        // Unknown symbols come back as 404 with a regular chart error body.
        let parsed = parse_chart(&body);
        let series = match parsed {
            Ok(series) if status.is_success() => series,
            Err(e @ ScanError::NoData(_)) => return Err(e),
            _ if !status.is_success() => return Err(ScanError::from_status(status, &body)),
            other => other?,
        };
        Ok(series.with_bucket(bucket_hours.map(chrono::Duration::hours)))
    }
}
