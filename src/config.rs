use crate::alpha_vantage;
use crate::indicators::{DEFAULT_RSI_PERIOD, RsiThresholds};
use crate::market::{CurrencyPair, Timeframe};
use crate::normalize::{MAX_BARS, MIN_BARS, Normalizer};
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "FX_SCREENER_CONFIG";

const DEFAULT_PAIRS: &[&str] = &[
    "EUR/USD", "USD/JPY", "GBP/USD", "USD/CHF", "AUD/USD", "USD/CAD", "NZD/USD", "EUR/JPY",
    "GBP/JPY", "EUR/GBP",
];

/// Upper bounds for per-provider timings.
const MAX_TIMEOUT_SECS: u64 = 600;
const MAX_MIN_INTERVAL_MS: u64 = 3_600_000;

// CONFIGURATION STRUCTS

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Yahoo,
    AlphaVantage,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub min_interval_ms: Option<u64>,
    pub timeout_secs: u64,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            min_interval_ms: None,
            timeout_secs: 30,
            api_key_env: None,
            api_key: None,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url.as_deref().unwrap_or(default).trim_end_matches('/')
    }

    pub fn min_interval_or(&self, default: Duration) -> Duration {
        self.min_interval_ms.map(Duration::from_millis).unwrap_or(default)
    }

    fn validate(&self, name: &str) -> Result<()> {
        ensure!(
            (1..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs),
            "providers.{name}.timeout_secs must be within 1..={MAX_TIMEOUT_SECS}, got {}",
            self.timeout_secs
        );
        if let Some(ms) = self.min_interval_ms {
            ensure!(
                ms <= MAX_MIN_INTERVAL_MS,
                "providers.{name}.min_interval_ms must be at most {MAX_MIN_INTERVAL_MS}, got {ms}"
            );
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Priority order; later providers are only asked when earlier ones fail.
    pub order: Vec<ProviderKind>,
    pub yahoo: ProviderConfig,
    pub alpha_vantage: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            order: vec![ProviderKind::Yahoo],
            yahoo: ProviderConfig::default(),
            alpha_vantage: ProviderConfig::default(),
        }
    }
}

impl ProvidersConfig {
    fn resolve_credentials(&mut self) {
        let var = self
            .alpha_vantage
            .api_key_env
            .as_deref()
            .unwrap_or(alpha_vantage::DEFAULT_API_KEY_ENV);
        self.alpha_vantage.api_key = std::env::var(var).ok().filter(|k| !k.trim().is_empty());
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct RsiConfig {
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for RsiConfig {
    fn default() -> Self {
        let thresholds = RsiThresholds::default();
        Self {
            period: DEFAULT_RSI_PERIOD,
            oversold: thresholds.oversold,
            overbought: thresholds.overbought,
        }
    }
}

impl RsiConfig {
    pub fn thresholds(&self) -> RsiThresholds {
        RsiThresholds {
            oversold: self.oversold,
            overbought: self.overbought,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct SeriesConfig {
    pub min_bars: usize,
    pub max_bars: usize,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            min_bars: MIN_BARS,
            max_bars: MAX_BARS,
        }
    }
}

impl SeriesConfig {
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.min_bars, self.max_bars)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub pairs: Vec<CurrencyPair>,
    pub timeframes: Vec<Timeframe>,
    pub rsi: RsiConfig,
    pub series: SeriesConfig,
    pub providers: ProvidersConfig,
    /// Re-scan on this interval instead of exiting after one pass.
    pub refresh_secs: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pairs: DEFAULT_PAIRS
                .iter()
                .filter_map(|p| p.parse().ok())
                .collect(),
            timeframes: Timeframe::ALL.to_vec(),
            rsi: RsiConfig::default(),
            series: SeriesConfig::default(),
            providers: ProvidersConfig::default(),
            refresh_secs: None,
        }
    }
}

// LOADING

impl AppConfig {
    /// Loads `.env`, then the config file (`$FX_SCREENER_CONFIG` or
    /// `<binary dir>/storage/config.json`), then resolves credentials and validates.
    pub async fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => default_path()?,
        };

        let mut config = Self::load_from(&path).await?;
        config.providers.resolve_credentials();
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file. A missing file yields the defaults.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        // Read directly into bytes; serde_json validates UTF-8 while parsing.
        let content = fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config = serde_json::from_slice(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.pairs.is_empty(), "config lists no currency pairs");
        ensure!(!self.timeframes.is_empty(), "config lists no timeframes");
        ensure!(self.rsi.period >= 2, "rsi.period must be at least 2, got {}", self.rsi.period);
        ensure!(
            self.rsi.oversold < self.rsi.overbought,
            "rsi.oversold ({}) must be below rsi.overbought ({})",
            self.rsi.oversold,
            self.rsi.overbought
        );
        ensure!(
            self.series.min_bars <= self.series.max_bars,
            "series.min_bars ({}) exceeds series.max_bars ({})",
            self.series.min_bars,
            self.series.max_bars
        );
        ensure!(
            self.series.min_bars > self.rsi.period,
            "series.min_bars ({}) must exceed rsi.period ({})",
            self.series.min_bars,
            self.rsi.period
        );
        ensure!(!self.providers.order.is_empty(), "providers.order is empty");
        self.providers.yahoo.validate("yahoo")?;
        self.providers.alpha_vantage.validate("alpha_vantage")?;
        Ok(())
    }
}

/// `<binary dir>/storage/config.json`
fn default_path() -> Result<PathBuf> {
    let exe_path = std::env::current_exe()?;
    let base_dir = exe_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?;
    Ok(base_dir.join("storage").join("config.json"))
}
