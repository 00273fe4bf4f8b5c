use crate::config::ProviderConfig;
use crate::error::{ScanError, ScanResult};
use crate::market::{CurrencyPair, RawBar, RawSeries, RawTime, Timeframe};
use crate::provider::{self, MarketDataProvider};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";
pub const DEFAULT_API_KEY_ENV: &str = "ALPHA_VANTAGE_API_KEY";
/// Free tier: 5 requests per minute, with some headroom.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(15);

/// Keys the API uses instead of the series when something went wrong, in lookup order.
const MESSAGE_KEYS: &[&str] = &["Error Message", "Information", "Note"];

static RATE_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)call frequency|rate limit|calls per (minute|day)|requests per (minute|day)")
        .expect("rate limit pattern is valid")
});
static AUTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bapi ?key\b").expect("api key pattern is valid"));

#[derive(Debug, PartialEq)]
struct FxQuery {
    function: &'static str,
    interval: Option<&'static str>,
    bucket_hours: Option<i64>,
}

impl FxQuery {
    fn for_timeframe(timeframe: Timeframe) -> Self {
        let intraday = |bucket_hours| FxQuery {
            function: "FX_INTRADAY",
            interval: Some("60min"),
            bucket_hours,
        };
        match timeframe {
            Timeframe::H1 => intraday(None),
            Timeframe::H4 => intraday(Some(4)),
            Timeframe::D1 => FxQuery {
                function: "FX_DAILY",
                interval: None,
                bucket_hours: None,
            },
            Timeframe::W1 => FxQuery {
                function: "FX_WEEKLY",
                interval: None,
                bucket_hours: None,
            },
        }
    }

    /// Top-level key holding the series, templated on the interval.
    fn series_key(&self) -> String {
        let label = match (self.function, self.interval) {
            (_, Some(interval)) => interval,
            ("FX_WEEKLY", None) => "Weekly",
            _ => "Daily",
        };
        format!("Time Series FX ({label})")
    }
}

/// Maps an in-body API message onto the error taxonomy. Rate-limit and API key
/// wording get their own kinds so the cell warning says what to fix; anything else
/// stays `Upstream`. The message text is kept verbatim in every case.
fn classify_message(message: &str) -> ScanError {
    if RATE_LIMIT_RE.is_match(message) {
        ScanError::RateLimited(message.to_string())
    } else if AUTH_RE.is_match(message) {
        ScanError::Auth(message.to_string())
    } else {
        ScanError::Upstream(message.to_string())
    }
}

fn parse_series(body: &str, series_key: &str) -> ScanResult<RawSeries> {
    let root: Map<String, Value> = serde_json::from_str(body)
        .map_err(|e| ScanError::Upstream(format!("unexpected payload: {e}")))?;

    let entries = match root.get(series_key) {
        Some(Value::Object(entries)) => entries,
        Some(other) => {
            return Err(ScanError::MalformedData(format!(
                "'{series_key}' is not an object: {other}"
            )));
        }
        None => {
            let message = MESSAGE_KEYS
                .iter()
                .find_map(|k| root.get(*k).and_then(Value::as_str));
            return Err(match message {
                Some(message) => classify_message(message),
                None => ScanError::NoData(format!("response has no '{series_key}' series")),
            });
        }
    };

    if entries.is_empty() {
        return Err(ScanError::NoData(format!("'{series_key}' is empty")));
    }

    let field = |record: &Value, name: &str| record.get(name).cloned().unwrap_or(Value::Null);
    let bars = entries
        .iter()
        .map(|(stamp, record)| RawBar {
            time: RawTime::Text(stamp.clone()),
            open: field(record, "1. open"),
            high: field(record, "2. high"),
            low: field(record, "3. low"),
            close: field(record, "4. close"),
        })
        .collect();
    Ok(RawSeries::new(bars))
}

// --- Provider ---

/// Alpha Vantage FX endpoints. Free keys allow 5 requests per minute.
pub struct AlphaVantageProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    min_interval: Duration,
    timeout: Duration,
}

impl AlphaVantageProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let timeout = config.timeout();
        Ok(Self {
            client: provider::http_client(timeout)?,
            base_url: config.base_url_or(DEFAULT_BASE_URL).to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            min_interval: config.min_interval_or(DEFAULT_MIN_INTERVAL),
            timeout,
        })
    }

    fn api_key(&self) -> ScanResult<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            ScanError::Auth(format!("no Alpha Vantage API key (set {DEFAULT_API_KEY_ENV})"))
        })
    }
}

#[async_trait]
impl MarketDataProvider for AlphaVantageProvider {
    fn name(&self) -> &'static str {
        "alpha_vantage"
    }

    fn min_interval(&self) -> Duration {
        self.min_interval
    }

    fn ready(&self) -> ScanResult<()> {
        self.api_key()?;
        Ok(())
    }

    async fn fetch(&self, pair: &CurrencyPair, timeframe: Timeframe) -> ScanResult<RawSeries> {
        let api_key = self.api_key()?;

        let query = FxQuery::for_timeframe(timeframe);
        let mut params = vec![
            ("function", query.function),
            ("from_symbol", pair.base.as_str()),
            ("to_symbol", pair.quote.as_str()),
            ("outputsize", "full"),
            ("datatype", "json"),
            ("apikey", api_key),
        ];
        if let Some(interval) = query.interval {
            params.push(("interval", interval));
        }
        debug!(%pair, function = query.function, interval = ?query.interval, "requesting fx series");

        let url = format!("{}/query", self.base_url);
        let (status, body) = provider::send(self.client.get(&url).query(&params), self.timeout).await?;
        if !status.is_success() {
            return Err(ScanError::from_status(status, &body));
        }

        let series = parse_series(&body, &query.series_key())?;
        Ok(series.with_bucket(query.bucket_hours.map(chrono::Duration::hours)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvidersConfig;
    use serde_json::json;

    #[test]
    fn series_key_embeds_interval() {
        assert_eq!(
            FxQuery::for_timeframe(Timeframe::H1).series_key(),
            "Time Series FX (60min)"
        );
        assert_eq!(
            FxQuery::for_timeframe(Timeframe::H4).series_key(),
            "Time Series FX (60min)"
        );
        assert_eq!(
            FxQuery::for_timeframe(Timeframe::D1).series_key(),
            "Time Series FX (Daily)"
        );
        assert_eq!(
            FxQuery::for_timeframe(Timeframe::W1).series_key(),
            "Time Series FX (Weekly)"
        );
        assert_eq!(FxQuery::for_timeframe(Timeframe::H4).bucket_hours, Some(4));
    }

    #[test]
    fn parses_keyed_series() {
        let body = json!({
            "Meta Data": {"1. Information": "FX Intraday (60min) Time Series"},
            "Time Series FX (60min)": {
                "2024-01-05 16:00:00": {"1. open": "1.0940", "2. high": "1.0951", "3. low": "1.0933", "4. close": "1.0945"},
                "2024-01-05 15:00:00": {"1. open": "1.0921", "2. high": "1.0942", "3. low": "1.0920", "4. close": "1.0940"}
            }
        })
        .to_string();

        let series = parse_series(&body, "Time Series FX (60min)").unwrap();
        assert_eq!(series.bars.len(), 2);
        let bar = series
            .bars
            .iter()
            .find(|b| b.time == RawTime::Text("2024-01-05 16:00:00".into()))
            .unwrap();
        assert_eq!(bar.open, json!("1.0940"));
        assert_eq!(bar.close, json!("1.0945"));
    }

    #[test]
    fn missing_fields_become_null() {
        let body = r#"{"Time Series FX (Daily)": {"2024-01-05": {"1. open": "1.09"}}}"#;
        let series = parse_series(body, "Time Series FX (Daily)").unwrap();
        assert_eq!(series.bars[0].close, Value::Null);
    }

    #[test]
    fn frequency_note_is_rate_limited() {
        let note = "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute and 500 calls per day.";
        let body = json!({ "Note": note }).to_string();
        assert_eq!(
            parse_series(&body, "Time Series FX (60min)").unwrap_err(),
            ScanError::RateLimited(note.to_string())
        );
    }

    #[test]
    fn invalid_key_is_auth() {
        let body = r#"{"Error Message": "the parameter apikey is invalid or missing. Please claim your free API key on (https://www.alphavantage.co/support/#api-key)."}"#;
        assert!(matches!(
            parse_series(body, "Time Series FX (Daily)"),
            Err(ScanError::Auth(msg)) if msg.starts_with("the parameter apikey")
        ));
    }

    #[test]
    fn other_messages_are_upstream_with_text() {
        let body = r#"{"Error Message": "Invalid API call. Please retry or visit the documentation for FX_INTRADAY."}"#;
        assert_eq!(
            parse_series(body, "Time Series FX (60min)").unwrap_err(),
            ScanError::Upstream(
                "Invalid API call. Please retry or visit the documentation for FX_INTRADAY."
                    .to_string()
            )
        );
    }

    #[test]
    fn error_message_wins_over_information() {
        let body = r#"{"Information": "informational", "Error Message": "Invalid API call."}"#;
        assert_eq!(
            parse_series(body, "Time Series FX (Weekly)").unwrap_err(),
            ScanError::Upstream("Invalid API call.".to_string())
        );
    }

    #[test]
    fn silent_miss_is_no_data() {
        assert!(matches!(
            parse_series(r#"{"Meta Data": {}}"#, "Time Series FX (Daily)"),
            Err(ScanError::NoData(msg)) if msg.contains("Time Series FX (Daily)")
        ));
        assert!(matches!(
            parse_series(r#"{"Time Series FX (Daily)": {}}"#, "Time Series FX (Daily)"),
            Err(ScanError::NoData(_))
        ));
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let mut config = ProvidersConfig::default().alpha_vantage;
        config.base_url = Some("http://127.0.0.1:9".to_string());
        config.api_key = None;
        let provider = AlphaVantageProvider::new(&config).unwrap();
        assert!(matches!(provider.ready(), Err(ScanError::Auth(_))));

        let err = provider
            .fetch(&CurrencyPair::new("EUR", "USD"), Timeframe::D1)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Auth(_)));
    }
}
