//! DEX price source backed by Uniswap V3 pools on L1.

use ethers::contract::abigen;

pub mod pool;

pub use pool::PoolQuote;

abigen!(
    UniswapV3Pool,
    r#"[
        function slot0() view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)
    ]"#,
);
