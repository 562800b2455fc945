//! Token ratio aggregation across several price sources.
//!
//! Each cycle polls every source of both assets, takes a zero-dropping upper
//! median per asset, rejects medians outside the asset's price band and limits
//! the ratio to a 5% move from the previously accepted value.

use crate::{
    cex::{BinanceTicker, BybitTicker},
    config::{AssetFeedConfig, TokenRatioConfig},
    dex::PoolQuote,
    errors::Result,
    metrics::MetricsSink,
    models::{PricePoint, TokenRatioState},
};
use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tracing::{debug, warn};

/// Bounds of the per-cycle ratio move relative to the last accepted ratio.
pub const RATIO_DRIFT_FLOOR: f64 = 0.95;
pub const RATIO_DRIFT_CEIL: f64 = 1.05;

/// A provider of the USD price of one asset.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_price(&self) -> Result<f64>;
}

/// All sources quoting one asset plus its plausible price band.
pub struct AssetFeed {
    pub name: String,
    pub min_price: f64,
    pub max_price: f64,
    sources: Vec<Arc<dyn PriceSource>>,
}

impl AssetFeed {
    pub fn new(name: impl Into<String>, min_price: f64, max_price: f64) -> Self {
        Self {
            name: name.into(),
            min_price,
            max_price,
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn PriceSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Build three sources: the DEX pool quote and two CEX quotes. A missing
    /// pool or secondary symbol is replaced by another primary CEX query.
    pub fn from_config(
        cfg: &AssetFeedConfig,
        ratio_cfg: &TokenRatioConfig,
        http: &reqwest::Client,
        l1: Arc<Provider<Http>>,
    ) -> Result<Self> {
        let primary: Arc<dyn PriceSource> = Arc::new(BinanceTicker::new(
            http.clone(),
            &ratio_cfg.cex_url,
            &cfg.cex_symbol,
        )?);
        let mut feed = AssetFeed::new(&cfg.name, cfg.min_price, cfg.max_price);
        feed = match cfg.pool {
            Some(pool) => feed.with_source(Arc::new(PoolQuote::new(
                l1,
                pool,
                cfg.pool_asset_is_token0,
                cfg.asset_decimals,
                cfg.quote_decimals,
            ))),
            None => feed.with_source(primary.clone()),
        };
        feed = feed.with_source(primary.clone());
        feed = match &cfg.secondary_cex_symbol {
            Some(symbol) => feed.with_source(Arc::new(BybitTicker::new(
                http.clone(),
                &ratio_cfg.secondary_cex_url,
                symbol,
            )?)),
            None => feed.with_source(primary),
        };
        Ok(feed)
    }

    /// Query every source concurrently; failures are reported as `0.0`.
    pub async fn poll(&self) -> Vec<PricePoint> {
        join_all(self.sources.iter().map(|s| async move {
            let value = match s.fetch_price().await {
                Ok(p) if p.is_finite() && p > 0.0 => p,
                Ok(p) => {
                    warn!(asset = %self.name, source = s.name(), price = p, "[RATIO] unusable price");
                    0.0
                }
                Err(e) => {
                    warn!(asset = %self.name, source = s.name(), error = %e, "[RATIO] price fetch failed");
                    0.0
                }
            };
            PricePoint {
                asset: self.name.clone(),
                value,
                source: s.name().to_string(),
            }
        }))
        .await
    }
}

/// Median of the non-zero values; the upper middle element for even counts.
pub fn median(values: &[f64]) -> f64 {
    let mut present: Vec<f64> = values.iter().copied().filter(|v| *v != 0.0).collect();
    if present.is_empty() {
        return 0.0;
    }
    present.sort_by(|a, b| a.total_cmp(b));
    present[present.len() / 2]
}

/// Keep `candidate` when it lies in `[min, max]`, otherwise fall back to `last`.
pub fn filter_price(candidate: f64, last: f64, min: f64, max: f64) -> f64 {
    if candidate > 0.0 && candidate >= min && candidate <= max {
        candidate
    } else {
        last
    }
}

/// Clamp `raw` to within 5% of `last` and to `[min, max]`.
///
/// With no previous ratio (`last <= 0`) only the global bounds apply.
pub fn clamp_ratio(raw: f64, last: f64, min: f64, max: f64) -> f64 {
    if last <= 0.0 {
        return raw.max(min).min(max);
    }
    let lower = (last * RATIO_DRIFT_FLOOR).max(min);
    let upper = (last * RATIO_DRIFT_CEIL).min(max);
    let clamped = if raw < lower {
        lower
    } else if raw > upper {
        upper
    } else {
        raw
    };
    clamped.max(min).min(max)
}

pub struct PriceAggregator {
    asset_a: AssetFeed,
    asset_b: AssetFeed,
    min_ratio: f64,
    max_ratio: f64,
    state: RwLock<TokenRatioState>,
    metrics: Arc<dyn MetricsSink>,
}

impl PriceAggregator {
    pub fn new(
        asset_a: AssetFeed,
        asset_b: AssetFeed,
        min_ratio: f64,
        max_ratio: f64,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            asset_a,
            asset_b,
            min_ratio,
            max_ratio,
            state: RwLock::new(TokenRatioState::default()),
            metrics,
        }
    }

    /// Seed the previously accepted ratio, e.g. from the contract at startup.
    /// Values outside the global bounds are ignored.
    pub async fn seed_ratio(&self, ratio: f64) {
        if ratio < self.min_ratio || ratio > self.max_ratio {
            warn!(ratio, min = self.min_ratio, max = self.max_ratio, "[RATIO] seed outside bounds, ignored");
            return;
        }
        let mut state = self.state.write().await;
        state.last_ratio = ratio;
        state.latest_ratio = ratio;
    }

    pub async fn state(&self) -> TokenRatioState {
        *self.state.read().await
    }

    pub async fn token_ratio(&self) -> f64 {
        self.state.read().await.latest_ratio
    }

    /// Last accepted USD price of the numerator asset.
    pub async fn asset_a_price(&self) -> f64 {
        self.state.read().await.last_asset_a_price
    }

    /// Run one polling cycle and publish the new state. Never fails; when no
    /// usable price is available the previous values are kept.
    pub async fn refresh(&self) -> TokenRatioState {
        let (points_a, points_b) = tokio::join!(self.asset_a.poll(), self.asset_b.poll());
        let median_a = median(&points_a.iter().map(|p| p.value).collect::<Vec<_>>());
        let median_b = median(&points_b.iter().map(|p| p.value).collect::<Vec<_>>());

        let prev = self.state().await;
        let next = self.next_state(&prev, median_a, median_b);
        *self.state.write().await = next;

        if next.latest_ratio > 0.0 {
            self.metrics.set_token_ratio(next.latest_ratio);
        }
        debug!(
            median_a,
            median_b,
            price_a = next.last_asset_a_price,
            price_b = next.last_asset_b_price,
            ratio = next.latest_ratio,
            "[RATIO] refreshed"
        );
        next
    }

    fn next_state(&self, prev: &TokenRatioState, median_a: f64, median_b: f64) -> TokenRatioState {
        let price_a = filter_price(
            median_a,
            prev.last_asset_a_price,
            self.asset_a.min_price,
            self.asset_a.max_price,
        );
        let price_b = filter_price(
            median_b,
            prev.last_asset_b_price,
            self.asset_b.min_price,
            self.asset_b.max_price,
        );
        if price_a != median_a || price_b != median_b {
            warn!(median_a, median_b, price_a, price_b, "[RATIO] median rejected, using last price");
        }

        let latest_ratio = if price_a > 0.0 && price_b > 0.0 {
            clamp_ratio(price_a / price_b, prev.latest_ratio, self.min_ratio, self.max_ratio)
        } else {
            prev.latest_ratio
        };

        TokenRatioState {
            last_ratio: prev.latest_ratio,
            latest_ratio,
            last_asset_a_price: price_a,
            last_asset_b_price: price_b,
        }
    }

    /// Refresh on a fixed interval until shutdown is signalled.
    pub fn spawn(
        self: Arc<Self>,
        interval_secs: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                self.refresh().await;
            }
            debug!("[RATIO] aggregator stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::OracleGauges;
    use crate::testing::{FailingSource, ScriptedSource, StaticSource};

    fn feed(name: &str, min: f64, max: f64, prices: &[f64]) -> AssetFeed {
        prices.iter().fold(AssetFeed::new(name, min, max), |f, p| {
            f.with_source(Arc::new(StaticSource::new(name, *p)))
        })
    }

    #[test]
    fn median_picks_upper_middle() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 3.0);
        assert_eq!(median(&[0.0, 10.0, 0.0, 20.0]), 20.0);
        assert_eq!(median(&[7.0]), 7.0);
    }

    #[test]
    fn median_of_nothing_is_zero() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn median_is_always_an_input_value() {
        let inputs: [&[f64]; 4] = [
            &[0.0, 1.5, 9.0],
            &[100.0, 0.0, 0.0, 101.0, 99.0],
            &[2.0, 2.0, 0.0, 3.0],
            &[5.5],
        ];
        for values in inputs {
            let m = median(values);
            assert!(values.iter().any(|v| *v != 0.0 && *v == m), "{m} not in {values:?}");
        }
    }

    #[test]
    fn out_of_band_price_falls_back() {
        assert_eq!(filter_price(2500.0, 2400.0, 100.0, 10_000.0), 2500.0);
        assert_eq!(filter_price(50.0, 2400.0, 100.0, 10_000.0), 2400.0);
        assert_eq!(filter_price(20_000.0, 2400.0, 100.0, 10_000.0), 2400.0);
        assert_eq!(filter_price(0.0, 2400.0, 100.0, 10_000.0), 2400.0);
    }

    #[test]
    fn ratio_moves_at_most_five_percent() {
        let last = 3000.0;
        for raw in [0.0001, 1.0, 2000.0, 2899.0, 3000.0, 3100.0, 9_999_999.0] {
            let r = clamp_ratio(raw, last, 1.0, 100_000.0);
            assert!(0.95 * last <= r && r <= 1.05 * last, "raw {raw} -> {r}");
        }
        assert_eq!(clamp_ratio(3100.0, last, 1.0, 100_000.0), 3100.0);
        assert_eq!(clamp_ratio(1.0, last, 1.0, 100_000.0), last * 0.95);
        assert_eq!(clamp_ratio(1e9, last, 1.0, 100_000.0), last * 1.05);
    }

    #[test]
    fn ratio_respects_global_bounds() {
        assert_eq!(clamp_ratio(5000.0, 4990.0, 1.0, 5000.0), 5000.0);
        assert_eq!(clamp_ratio(6000.0, 4990.0, 1.0, 5000.0), 5000.0);
        assert_eq!(clamp_ratio(1.0, 10.0, 9.8, 100.0), 9.8);
        assert_eq!(clamp_ratio(50.0, 0.0, 100.0, 200.0), 100.0);
    }

    #[tokio::test]
    async fn refresh_computes_ratio_from_medians() {
        let gauges = Arc::new(OracleGauges::default());
        let agg = PriceAggregator::new(
            feed("ETH", 100.0, 100_000.0, &[3000.0, 3010.0, 2990.0]),
            feed("MNT", 0.01, 100.0, &[1.0, 0.0, 1.0]),
            1.0,
            100_000.0,
            gauges.clone(),
        );
        let state = agg.refresh().await;
        assert_eq!(state.last_asset_a_price, 3000.0);
        assert_eq!(state.last_asset_b_price, 1.0);
        assert_eq!(state.latest_ratio, 3000.0);
        assert_eq!(agg.token_ratio().await, 3000.0);
        assert_eq!(agg.asset_a_price().await, 3000.0);
        assert_eq!(gauges.snapshot().token_ratio, 3000.0);
    }

    #[tokio::test]
    async fn refresh_limits_drift_per_cycle() {
        let eth = Arc::new(ScriptedSource::new("ETH", &[3000.0, 6000.0, 6000.0]));
        let agg = PriceAggregator::new(
            AssetFeed::new("ETH", 100.0, 100_000.0).with_source(eth),
            feed("MNT", 0.01, 100.0, &[1.0]),
            1.0,
            100_000.0,
            crate::metrics::noop(),
        );
        assert_eq!(agg.refresh().await.latest_ratio, 3000.0);
        let second = agg.refresh().await;
        assert_eq!(second.last_ratio, 3000.0);
        assert_eq!(second.latest_ratio, 3000.0 * 1.05);
        let third = agg.refresh().await;
        assert_eq!(third.last_ratio, 3000.0 * 1.05);
        assert_eq!(third.latest_ratio, 3000.0 * 1.05 * 1.05);
    }

    #[tokio::test]
    async fn all_sources_failing_holds_previous_values() {
        let eth = Arc::new(ScriptedSource::new("ETH", &[3000.0, 0.0]));
        let agg = PriceAggregator::new(
            AssetFeed::new("ETH", 100.0, 100_000.0)
                .with_source(eth)
                .with_source(Arc::new(FailingSource)),
            feed("MNT", 0.01, 100.0, &[0.8]),
            1.0,
            100_000.0,
            crate::metrics::noop(),
        );
        let first = agg.refresh().await;
        let second = agg.refresh().await;
        assert_eq!(second.latest_ratio, first.latest_ratio);
        assert_eq!(second.last_asset_a_price, 3000.0);
    }

    #[tokio::test]
    async fn no_prices_ever_leaves_ratio_unset() {
        let agg = PriceAggregator::new(
            AssetFeed::new("ETH", 100.0, 100_000.0).with_source(Arc::new(FailingSource)),
            feed("MNT", 0.01, 100.0, &[1.0]),
            1.0,
            100_000.0,
            crate::metrics::noop(),
        );
        let state = agg.refresh().await;
        assert_eq!(state.latest_ratio, 0.0);
        assert_eq!(state.last_asset_b_price, 1.0);
    }

    #[tokio::test]
    async fn seeded_ratio_anchors_first_cycle() {
        let agg = PriceAggregator::new(
            feed("ETH", 100.0, 100_000.0, &[4000.0]),
            feed("MNT", 0.01, 100.0, &[1.0]),
            1.0,
            100_000.0,
            crate::metrics::noop(),
        );
        agg.seed_ratio(3000.0).await;
        assert_eq!(agg.refresh().await.latest_ratio, 3000.0 * 1.05);

        agg.seed_ratio(0.5).await;
        assert_eq!(agg.token_ratio().await, 3000.0 * 1.05);
    }

    fn source_names(feed: &AssetFeed) -> Vec<&str> {
        feed.sources.iter().map(|s| s.name()).collect()
    }

    #[test]
    fn default_feeds_have_three_sources() {
        let cfg = crate::config::OracleConfig::from_lookup(|_| None).unwrap();
        let ratio_cfg = &cfg.token_ratio;
        let http = reqwest::Client::new();
        let l1 = Arc::new(Provider::<Http>::try_from("http://127.0.0.1:8545").unwrap());

        let eth = AssetFeed::from_config(&ratio_cfg.asset_a, ratio_cfg, &http, l1.clone()).unwrap();
        let mnt = AssetFeed::from_config(&ratio_cfg.asset_b, ratio_cfg, &http, l1).unwrap();
        assert_eq!(source_names(&eth), ["uniswap-v3", "binance", "bybit"]);
        assert_eq!(source_names(&mnt), ["binance", "binance", "bybit"]);
    }

    #[test]
    fn missing_secondary_symbol_repeats_primary() {
        let mut cfg = crate::config::OracleConfig::from_lookup(|_| None).unwrap();
        cfg.token_ratio.asset_b.secondary_cex_symbol = None;
        let ratio_cfg = &cfg.token_ratio;
        let l1 = Arc::new(Provider::<Http>::try_from("http://127.0.0.1:8545").unwrap());

        let mnt =
            AssetFeed::from_config(&ratio_cfg.asset_b, ratio_cfg, &reqwest::Client::new(), l1)
                .unwrap();
        assert_eq!(source_names(&mnt), ["binance", "binance", "binance"]);
    }

    #[tokio::test]
    async fn repeated_primary_outvotes_a_single_outlier() {
        let agg = PriceAggregator::new(
            feed("ETH", 100.0, 100_000.0, &[3000.0]),
            feed("MNT", 0.01, 100.0, &[0.8, 0.8, 5.0]),
            1.0,
            100_000.0,
            crate::metrics::noop(),
        );
        let state = agg.refresh().await;
        assert_eq!(state.last_asset_b_price, 0.8);
        assert_eq!(state.latest_ratio, 3000.0 / 0.8);
    }
}
