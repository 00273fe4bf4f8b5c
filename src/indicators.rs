use crate::market::OhlcBar;

pub const DEFAULT_RSI_PERIOD: usize = 10;

/// RSI of one screener cell. `Undefined` is an expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RsiResult {
    Value(f64),
    #[default]
    Undefined,
}

impl RsiResult {
    pub fn value(self) -> Option<f64> {
        match self {
            RsiResult::Value(v) => Some(v),
            RsiResult::Undefined => None,
        }
    }

    pub fn is_undefined(self) -> bool {
        matches!(self, RsiResult::Undefined)
    }

    fn from_f64(v: f64) -> Self {
        if v.is_finite() && (0.0..=100.0).contains(&v) {
            RsiResult::Value(v)
        } else {
            RsiResult::Undefined
        }
    }
}

/// Exponentially weighted mean using the span convention, recursive form.
///
/// Matches pandas `ewm(span=span, adjust=False, min_periods=min_periods).mean()`:
/// the first observation seeds the average, after that
/// `avg = α·x + (1−α)·avg` with `α = 2/(span+1)`.
#[derive(Debug, Clone)]
pub struct Ewm {
    alpha: f64,
    min_periods: usize,
    count: usize,
    value: f64,
}

impl Ewm {
    pub fn new(span: usize, min_periods: usize) -> Self {
        Self {
            alpha: 2.0 / (span as f64 + 1.0),
            min_periods,
            count: 0,
            value: 0.0,
        }
    }

    /// Feeds one observation; returns the mean once `min_periods` have been seen.
    pub fn update(&mut self, x: f64) -> Option<f64> {
        self.value = if self.count == 0 {
            x
        } else {
            self.alpha * x + (1.0 - self.alpha) * self.value
        };
        self.count += 1;
        self.current()
    }

    pub fn current(&self) -> Option<f64> {
        (self.count >= self.min_periods).then_some(self.value)
    }
}

/// RSI over the OHLC4 price of `bars` (oldest first), smoothed with a span-`period` EWMA.
///
/// Needs at least `period + 1` bars. A flat series yields 50, a series with gains and
/// no losses yields 100.
pub fn compute_rsi(bars: &[OhlcBar], period: usize) -> RsiResult {
    if period == 0 || bars.len() < period + 1 {
        return RsiResult::Undefined;
    }

    let mut gains = Ewm::new(period, period);
    let mut losses = Ewm::new(period, period);

    // The first bar has no delta and enters both averages as zero.
    gains.update(0.0);
    losses.update(0.0);

    for pair in bars.windows(2) {
        let delta = pair[1].typical() - pair[0].typical();
        if !delta.is_finite() {
            return RsiResult::Undefined;
        }
        gains.update(delta.max(0.0));
        losses.update((-delta).max(0.0));
    }

    let (Some(avg_gain), Some(avg_loss)) = (gains.current(), losses.current()) else {
        return RsiResult::Undefined;
    };
    if !avg_gain.is_finite() || !avg_loss.is_finite() {
        return RsiResult::Undefined;
    }

    if avg_loss == 0.0 {
        return RsiResult::Value(if avg_gain > 0.0 { 100.0 } else { 50.0 });
    }

    let rs = avg_gain / avg_loss;
    RsiResult::from_f64(100.0 - 100.0 / (1.0 + rs))
}

// --- Classification ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Oversold,
    Neutral,
    Overbought,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RsiThresholds {
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for RsiThresholds {
    fn default() -> Self {
        Self {
            oversold: 20.0,
            overbought: 80.0,
        }
    }
}

impl RsiThresholds {
    /// Both boundaries are inclusive. Undefined cells are neutral.
    pub fn classify(&self, rsi: RsiResult) -> Zone {
        match rsi.value() {
            Some(v) if v <= self.oversold => Zone::Oversold,
            Some(v) if v >= self.overbought => Zone::Overbought,
            _ => Zone::Neutral,
        }
    }
}
