//! Upstream market data sources and the plumbing they share.

use crate::alpha_vantage::AlphaVantageProvider;
use crate::config::{ProviderKind, ProvidersConfig};
use crate::error::{ScanError, ScanResult};
use crate::market::{CurrencyPair, RawSeries, Timeframe};
use crate::yahoo::YahooProvider;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("fx-rsi-screener/", env!("CARGO_PKG_VERSION"));

/// One upstream source of OHLC history.
///
/// Implementations map a timeframe to their own query parameters and return the
/// records untouched; the normalizer owns every shape check beyond "is this the
/// payload we asked for". Providers never sleep: the orchestrator spaces calls using
/// `min_interval`.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Shortest allowed gap between two requests to this provider.
    fn min_interval(&self) -> Duration;

    /// Local precondition for `fetch`. A provider that is not ready is skipped
    /// without consuming a throttle slot.
    fn ready(&self) -> ScanResult<()> {
        Ok(())
    }

    async fn fetch(&self, pair: &CurrencyPair, timeframe: Timeframe) -> ScanResult<RawSeries>;
}

pub fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .pool_max_idle_per_host(4)
        .build()?)
}

/// Sends the request and returns the status with the full body text.
pub async fn send(request: RequestBuilder, timeout: Duration) -> ScanResult<(StatusCode, String)> {
    let response = request
        .send()
        .await
        .map_err(|e| ScanError::from_transport(e, timeout))?;
    let status = response.status();
    debug!(url = %response.url().path(), %status, "upstream responded");
    let body = response
        .text()
        .await
        .map_err(|e| ScanError::from_transport(e, timeout))?;
    Ok((status, body))
}

/// Builds providers in the configured priority order.
pub fn build_chain(config: &ProvidersConfig) -> Result<Vec<Arc<dyn MarketDataProvider>>> {
    config
        .order
        .iter()
        .map(|kind| -> Result<Arc<dyn MarketDataProvider>> {
            let provider: Arc<dyn MarketDataProvider> = match kind {
                ProviderKind::Yahoo => Arc::new(YahooProvider::new(&config.yahoo)?),
                ProviderKind::AlphaVantage => {
                    Arc::new(AlphaVantageProvider::new(&config.alpha_vantage)?)
                }
            };
            Ok(provider)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_follows_configured_order() {
        let mut config = ProvidersConfig::default();
        config.order = vec![ProviderKind::AlphaVantage, ProviderKind::Yahoo];
        let chain = build_chain(&config).unwrap();
        let names: Vec<&str> = chain.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["alpha_vantage", "yahoo"]);
        assert_eq!(chain[0].min_interval(), Duration::from_secs(15));
    }
}
