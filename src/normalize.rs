use crate::error::{ScanError, ScanResult};
use crate::market::{OhlcBar, OhlcSeries, RawBar, RawSeries, RawTime};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::de::{self, Visitor};
use serde::Deserializer;
use serde_json::Value;
use std::fmt;

pub const MIN_BARS: usize = 60;
pub const MAX_BARS: usize = 200;

// --- Lenient Price Coercion ---

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

fn lenient_f64(value: &Value) -> Result<Option<f64>, serde_json::Error> {
    value.deserialize_any(LenientF64Visitor)
}

// --- Timestamps ---

fn parse_time(time: &RawTime) -> ScanResult<DateTime<Utc>> {
    let parsed = match time {
        RawTime::Epoch(ts) => DateTime::from_timestamp(*ts, 0),
        RawTime::Text(s) => {
            let s = s.trim();
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .map(|dt| dt.and_utc())
                .or_else(|| {
                    DateTime::parse_from_rfc3339(s)
                        .ok()
                        .map(|dt| dt.with_timezone(&Utc))
                })
        }
    };
    parsed.ok_or_else(|| ScanError::MalformedData(format!("unparseable timestamp '{time}'")))
}

// --- Normalizer ---

/// Turns raw provider records into a canonical ascending series of bounded length.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    min_bars: usize,
    max_bars: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(MIN_BARS, MAX_BARS)
    }
}

impl Normalizer {
    pub fn new(min_bars: usize, max_bars: usize) -> Self {
        Self { min_bars, max_bars }
    }

    pub fn normalize(&self, raw: RawSeries) -> ScanResult<OhlcSeries> {
        let mut bars = Vec::with_capacity(raw.bars.len());
        for raw_bar in &raw.bars {
            if let Some(bar) = coerce_bar(raw_bar)? {
                bars.push(bar);
            }
        }

        // Stable, so the dedup below keeps the last occurrence in input order.
        bars.sort_by_key(|b| b.timestamp);
        let mut bars = dedup_keep_last(bars);

        if let Some(bucket) = raw.bucket {
            bars = resample(&bars, bucket)?;
        }

        if bars.len() < self.min_bars {
            return Err(ScanError::InsufficientData {
                got: bars.len(),
                need: self.min_bars,
            });
        }

        if bars.len() > self.max_bars {
            bars.drain(..bars.len() - self.max_bars);
        }

        Ok(OhlcSeries::from_sorted(bars))
    }
}

/// `Ok(None)` for placeholder rows where every price is missing.
fn coerce_bar(raw: &RawBar) -> ScanResult<Option<OhlcBar>> {
    let mut prices = [0.0; 4];
    let mut missing = 0;
    for (slot, (name, value)) in prices.iter_mut().zip([
        ("open", &raw.open),
        ("high", &raw.high),
        ("low", &raw.low),
        ("close", &raw.close),
    ]) {
        match lenient_f64(value) {
            Ok(Some(v)) if v.is_finite() && v >= 0.0 => *slot = v,
            Ok(Some(v)) => {
                return Err(ScanError::MalformedData(format!(
                    "{name} price {v} at {} is not a finite non-negative number",
                    raw.time
                )));
            }
            Ok(None) => missing += 1,
            Err(e) => {
                return Err(ScanError::MalformedData(format!(
                    "{name} price at {}: {e}",
                    raw.time
                )));
            }
        }
    }

    match missing {
        0 => {}
        4 => return Ok(None),
        _ => {
            return Err(ScanError::MalformedData(format!(
                "bar at {} is missing {missing} of 4 prices",
                raw.time
            )));
        }
    }

    let [open, high, low, close] = prices;
    Ok(Some(OhlcBar {
        timestamp: parse_time(&raw.time)?,
        open,
        high,
        low,
        close,
    }))
}

fn dedup_keep_last(bars: Vec<OhlcBar>) -> Vec<OhlcBar> {
    let mut out: Vec<OhlcBar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

/// Aggregates ascending bars into epoch-aligned buckets of `width`.
fn resample(bars: &[OhlcBar], width: Duration) -> ScanResult<Vec<OhlcBar>> {
    let secs = width.num_seconds();
    if secs <= 0 {
        return Err(ScanError::MalformedData(format!(
            "invalid resampling width {secs}s"
        )));
    }

    let mut out: Vec<OhlcBar> = Vec::new();
    for bar in bars {
        let start = bar.timestamp.timestamp().div_euclid(secs) * secs;
        let bucket_ts = DateTime::from_timestamp(start, 0).ok_or_else(|| {
            ScanError::MalformedData(format!("bucket start {start} out of range"))
        })?;

        match out.last_mut() {
            Some(agg) if agg.timestamp == bucket_ts => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
            }
            _ => out.push(OhlcBar {
                timestamp: bucket_ts,
                ..*bar
            }),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw_bar(time: &str, price: f64) -> RawBar {
        RawBar {
            time: RawTime::Text(time.to_string()),
            open: json!(price.to_string()),
            high: json!((price + 0.5).to_string()),
            low: json!((price - 0.5).to_string()),
            close: json!(price.to_string()),
        }
    }

    fn hourly(count: usize) -> Vec<RawBar> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| RawBar {
                time: RawTime::Epoch((start + Duration::hours(i as i64)).timestamp()),
                open: json!(1.0 + i as f64),
                high: json!(1.5 + i as f64),
                low: json!(0.5 + i as f64),
                close: json!(1.25 + i as f64),
            })
            .collect()
    }

    #[test]
    fn reverses_newest_first_input() {
        let newest_first = vec![
            raw_bar("2024-01-05 00:00:00", 5.0),
            raw_bar("2024-01-04 00:00:00", 4.0),
            raw_bar("2024-01-03 00:00:00", 3.0),
            raw_bar("2024-01-02 00:00:00", 2.0),
            raw_bar("2024-01-01 00:00:00", 1.0),
        ];
        let series = Normalizer::new(1, MAX_BARS)
            .normalize(RawSeries::new(newest_first))
            .unwrap();

        let closes: Vec<f64> = series.bars().iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(series.bars().windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn minimum_length_boundary() {
        let normalizer = Normalizer::default();
        assert_eq!(
            normalizer.normalize(RawSeries::new(hourly(59))),
            Err(ScanError::InsufficientData { got: 59, need: 60 })
        );
        assert_eq!(normalizer.normalize(RawSeries::new(hourly(60))).unwrap().len(), 60);
    }

    #[test]
    fn truncates_to_most_recent_bars() {
        let raw = hourly(250);
        let newest = parse_time(&raw[249].time).unwrap();
        let oldest_kept = parse_time(&raw[50].time).unwrap();

        let series = Normalizer::default().normalize(RawSeries::new(raw)).unwrap();
        assert_eq!(series.len(), 200);
        assert_eq!(series.bars()[0].timestamp, oldest_kept);
        assert_eq!(series.bars()[199].timestamp, newest);
    }

    #[test]
    fn rejects_non_numeric_prices() {
        let mut bars = hourly(60);
        bars[10].close = json!("n/a");
        assert!(matches!(
            Normalizer::default().normalize(RawSeries::new(bars)),
            Err(ScanError::MalformedData(_))
        ));
    }

    #[test]
    fn rejects_negative_prices() {
        let mut bars = hourly(60);
        bars[3].low = json!(-0.1);
        assert!(matches!(
            Normalizer::default().normalize(RawSeries::new(bars)),
            Err(ScanError::MalformedData(msg)) if msg.contains("low")
        ));
    }

    #[test]
    fn drops_all_null_rows_but_rejects_partial_ones() {
        let mut bars = hourly(61);
        bars[0].open = Value::Null;
        bars[0].high = Value::Null;
        bars[0].low = Value::Null;
        bars[0].close = Value::Null;
        let series = Normalizer::default().normalize(RawSeries::new(bars.clone())).unwrap();
        assert_eq!(series.len(), 60);

        bars[1].close = Value::Null;
        assert!(matches!(
            Normalizer::default().normalize(RawSeries::new(bars)),
            Err(ScanError::MalformedData(msg)) if msg.contains("missing 1 of 4")
        ));
    }

    #[test]
    fn duplicate_timestamps_keep_last() {
        let bars = vec![
            raw_bar("2024-01-01", 1.0),
            raw_bar("2024-01-02", 2.0),
            raw_bar("2024-01-02", 2.5),
            raw_bar("2024-01-03", 3.0),
        ];
        let series = Normalizer::new(1, MAX_BARS).normalize(RawSeries::new(bars)).unwrap();
        let closes: Vec<f64> = series.bars().iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.5, 3.0]);
    }

    #[test]
    fn rejects_unparseable_timestamps() {
        let bars = vec![raw_bar("yesterday", 1.0)];
        assert!(matches!(
            Normalizer::new(1, MAX_BARS).normalize(RawSeries::new(bars)),
            Err(ScanError::MalformedData(msg)) if msg.contains("yesterday")
        ));
    }

    #[test]
    fn resamples_hourly_into_four_hour_buckets() {
        // Starts at 02:00, so the first bucket (00:00-04:00) only holds two bars.
        let mut bars = hourly(10);
        bars.drain(..2);
        let raw = RawSeries::new(bars).with_bucket(Some(Duration::hours(4)));
        let series = Normalizer::new(1, MAX_BARS).normalize(raw).unwrap();

        assert_eq!(series.len(), 3);
        let first = series.bars()[0];
        assert_eq!(first.timestamp, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert_eq!((first.open, first.high, first.low, first.close), (3.0, 4.5, 2.5, 4.25));

        let second = series.bars()[1];
        assert_eq!(second.timestamp, Utc.with_ymd_and_hms(2024, 3, 1, 4, 0, 0).unwrap());
        assert_eq!((second.open, second.high, second.low, second.close), (5.0, 8.5, 4.5, 8.25));
    }

    #[test]
    fn minimum_applies_after_resampling() {
        // 200 hourly bars become 50 four-hour bars.
        let raw = RawSeries::new(hourly(200)).with_bucket(Some(Duration::hours(4)));
        assert_eq!(
            Normalizer::default().normalize(raw),
            Err(ScanError::InsufficientData { got: 50, need: 60 })
        );
    }

    #[test]
    fn parses_supported_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 2, 9, 0, 0, 0).unwrap();
        for raw in [
            RawTime::Text("2024-02-09".into()),
            RawTime::Text("2024-02-09 00:00:00".into()),
            RawTime::Text("2024-02-09T00:00:00Z".into()),
            RawTime::Epoch(expected.timestamp()),
        ] {
            assert_eq!(parse_time(&raw).unwrap(), expected, "{raw}");
        }
    }
}
