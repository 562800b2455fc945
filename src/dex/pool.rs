use super::UniswapV3Pool;
use crate::aggregator::PriceSource;
use crate::errors::Result;
use async_trait::async_trait;
use ethers::{
    providers::{Http, Provider},
    types::{Address, U256},
};
use std::sync::Arc;

/// Spot price of one asset read from a Uniswap V3 pool against a stablecoin.
#[derive(Clone)]
pub struct PoolQuote {
    pool: UniswapV3Pool<Provider<Http>>,
    asset_is_token0: bool,
    asset_decimals: u8,
    quote_decimals: u8,
}

impl PoolQuote {
    pub fn new(
        provider: Arc<Provider<Http>>,
        pool_addr: Address,
        asset_is_token0: bool,
        asset_decimals: u8,
        quote_decimals: u8,
    ) -> Self {
        Self {
            pool: UniswapV3Pool::new(pool_addr, provider),
            asset_is_token0,
            asset_decimals,
            quote_decimals,
        }
    }
}

#[async_trait]
impl PriceSource for PoolQuote {
    fn name(&self) -> &str {
        "uniswap-v3"
    }

    async fn fetch_price(&self) -> Result<f64> {
        let sqrt_price_x96 = self.pool.slot_0().call().await?.0;
        Ok(price_from_sqrt_x96(
            sqrt_price_x96,
            self.asset_is_token0,
            self.asset_decimals,
            self.quote_decimals,
        ))
    }
}

/// Convert `slot0.sqrtPriceX96` into the human price of the asset in quote units.
///
/// sqrtPriceX96 = sqrt(token1_raw / token0_raw) * 2^96.
pub fn price_from_sqrt_x96(
    sqrt_price_x96: U256,
    asset_is_token0: bool,
    asset_decimals: u8,
    quote_decimals: u8,
) -> f64 {
    let sqrt_q96 = sqrt_price_x96.to_string().parse::<f64>().unwrap_or(0.0) / 2.0_f64.powi(96);
    if sqrt_q96 <= 0.0 {
        return 0.0;
    }
    let ratio_raw = sqrt_q96 * sqrt_q96;
    let scale = 10_f64.powi(asset_decimals as i32 - quote_decimals as i32);
    if asset_is_token0 {
        ratio_raw * scale
    } else {
        (1.0 / ratio_raw) * scale
    }
}
