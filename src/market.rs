use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// --- Pairs & Timeframes ---

/// A base/quote currency pair such as `EUR/USD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for CurrencyPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| format!("currency pair must look like 'EUR/USD', got '{s}'"))?;
        let is_code = |c: &str| c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic());
        let (base, quote) = (base.trim(), quote.trim());
        if !is_code(base) || !is_code(quote) {
            return Err(format!("currency codes must be three letters, got '{s}'"));
        }
        Ok(Self::new(base.to_ascii_uppercase(), quote.to_ascii_uppercase()))
    }
}

impl TryFrom<String> for CurrencyPair {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Timeframe {
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::H1, Timeframe::H4, Timeframe::D1, Timeframe::W1];

    /// Column heading used by the renderer.
    pub fn label(self) -> &'static str {
        match self {
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "Daily",
            Timeframe::W1 => "Weekly",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// --- Canonical Series ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OhlcBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl OhlcBar {
    /// OHLC4 composite price.
    pub fn typical(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }
}

/// Ascending, de-duplicated bars. Only the normalizer builds one.
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcSeries {
    bars: Vec<OhlcBar>,
}

impl OhlcSeries {
    pub(crate) fn from_sorted(bars: Vec<OhlcBar>) -> Self {
        debug_assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        Self { bars }
    }

    pub fn bars(&self) -> &[OhlcBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }
}

// --- Raw Provider Output ---

/// Time key exactly as the upstream sent it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTime {
    Text(String),
    Epoch(i64),
}

impl fmt::Display for RawTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawTime::Text(s) => f.write_str(s),
            RawTime::Epoch(ts) => write!(f, "{ts}"),
        }
    }
}

/// One record before coercion: prices may be numbers, numeric strings or null.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBar {
    pub time: RawTime,
    pub open: Value,
    pub high: Value,
    pub low: Value,
    pub close: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSeries {
    pub bars: Vec<RawBar>,
    /// Aggregate into buckets of this width after sorting (H4 is built from hourly bars).
    pub bucket: Option<Duration>,
}

impl RawSeries {
    pub fn new(bars: Vec<RawBar>) -> Self {
        Self { bars, bucket: None }
    }

    pub fn with_bucket(mut self, bucket: Option<Duration>) -> Self {
        self.bucket = bucket;
        self
    }
}
