//! Configuration loader and application settings.
//!
//! Every option is read from a `GAS_PRICE_ORACLE_*` environment variable
//! (optionally via a `.env` file) with the default listed next to it.

use crate::errors::{OracleError, Result};
use ethers::types::Address;
use std::str::FromStr;

const ENV_PREFIX: &str = "GAS_PRICE_ORACLE_";

pub const DEFAULT_ETHEREUM_HTTP_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_LAYER_TWO_HTTP_URL: &str = "http://127.0.0.1:9545";
pub const DEFAULT_GAS_PRICE_ORACLE_ADDRESS: &str = "0x420000000000000000000000000000000000000F";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_TOKEN_RATIO_EPOCH_LENGTH_SECONDS: u64 = 15;
pub const DEFAULT_TOKEN_RATIO_SIGNIFICANCE_FACTOR: f64 = 0.05;
pub const DEFAULT_TOKEN_RATIO_UPDATE_FREQUENCY_SECONDS: u64 = 3;
pub const DEFAULT_TOKEN_RATIO_SCALAR: f64 = 1.0;
pub const DEFAULT_TOKEN_RATIO_MIN: f64 = 1.0;
pub const DEFAULT_TOKEN_RATIO_MAX: f64 = 100_000.0;
pub const DEFAULT_CEX_URL: &str = "https://api.binance.com";
pub const DEFAULT_SECONDARY_CEX_URL: &str = "https://api.bybit.com";

pub const DEFAULT_OPERATOR_FEE_UPDATE_INTERVAL: u64 = 300;
pub const DEFAULT_OPERATOR_FEE_SIGNIFICANCE_FACTOR: f64 = 0.05;

pub const DEFAULT_TX_COUNTER_UPDATE_INTERVAL: u64 = 600;
pub const MIN_TX_COUNTER_UPDATE_INTERVAL: u64 = 600;
pub const DEFAULT_TX_COUNTER_WORKER_NUMBER: usize = 3;
pub const MIN_TX_COUNTER_WORKER_NUMBER: usize = 3;
pub const DEFAULT_L2_BLOCK_TIME_SECONDS: u64 = 2;

pub const DEFAULT_CONNECTION_RETRIES: u32 = 90;

/// One side of the token ratio (e.g. ETH for the numerator, MNT for the denominator).
#[derive(Debug, Clone)]
pub struct AssetFeedConfig {
    /// Display name used in logs and price points.
    pub name: String,
    /// Symbol on the primary CEX (e.g. "ETHUSDT").
    pub cex_symbol: String,
    /// Symbol on the secondary CEX. Falls back to a second primary quote when unset.
    pub secondary_cex_symbol: Option<String>,
    /// Uniswap V3 pool quoting this asset against a USD stablecoin, on L1.
    pub pool: Option<Address>,
    /// Whether the asset is token0 of the pool.
    pub pool_asset_is_token0: bool,
    pub asset_decimals: u8,
    pub quote_decimals: u8,
    /// Accepted USD price band; medians outside it are discarded.
    pub min_price: f64,
    pub max_price: f64,
}

#[derive(Debug, Clone)]
pub struct TokenRatioConfig {
    pub epoch_length_seconds: u64,
    pub significance_factor: f64,
    pub update_frequency_seconds: u64,
    pub scalar: f64,
    pub min_ratio: f64,
    pub max_ratio: f64,
    pub cex_url: String,
    pub secondary_cex_url: String,
    pub asset_a: AssetFeedConfig,
    pub asset_b: AssetFeedConfig,
}

#[derive(Debug, Clone)]
pub struct OperatorFeeConfig {
    pub enabled: bool,
    pub markup_percentage: i64,
    pub update_interval_seconds: u64,
    pub significance_factor: f64,
    pub intrinsic_sp1_gas_per_tx: u64,
    pub intrinsic_sp1_gas_per_block: u64,
    pub sp1_price_per_bgas_in_dollars: f64,
    pub sp1_gas_scalar: u64,
}

#[derive(Debug, Clone)]
pub struct TxCounterConfig {
    pub update_interval_seconds: u64,
    pub worker_number: usize,
    pub l2_block_time_seconds: u64,
}

/// Consolidated application configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub ethereum_http_url: String,
    pub layer_two_http_url: String,
    pub l1_chain_id: Option<u64>,
    pub l2_chain_id: Option<u64>,
    pub gas_price_oracle_address: Address,
    pub private_key: Option<String>,
    /// Hardcoded gas price in wei; `None` means estimate per transaction.
    pub transaction_gas_price: Option<u64>,
    pub log_level: String,
    pub wait_for_receipt: bool,
    pub metrics_enabled: bool,
    pub connection_retries: u32,
    pub token_ratio: TokenRatioConfig,
    pub operator_fee: OperatorFeeConfig,
    pub tx_counter: TxCounterConfig,
}

impl OracleConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup (keys carry the full prefix).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let token_ratio = TokenRatioConfig {
            epoch_length_seconds: env.parse_or(
                "TOKEN_RATIO_EPOCH_LENGTH_SECONDS",
                DEFAULT_TOKEN_RATIO_EPOCH_LENGTH_SECONDS,
            )?,
            significance_factor: env.parse_or(
                "TOKEN_RATIO_SIGNIFICANT_FACTOR",
                DEFAULT_TOKEN_RATIO_SIGNIFICANCE_FACTOR,
            )?,
            update_frequency_seconds: env.parse_or(
                "TOKEN_RATIO_UPDATE_FREQUENCY",
                DEFAULT_TOKEN_RATIO_UPDATE_FREQUENCY_SECONDS,
            )?,
            scalar: env.parse_or("TOKEN_RATIO_SCALAR", DEFAULT_TOKEN_RATIO_SCALAR)?,
            min_ratio: env.parse_or("TOKEN_RATIO_MIN", DEFAULT_TOKEN_RATIO_MIN)?,
            max_ratio: env.parse_or("TOKEN_RATIO_MAX", DEFAULT_TOKEN_RATIO_MAX)?,
            cex_url: env.string_or("TOKEN_RATIO_CEX_URL", DEFAULT_CEX_URL),
            secondary_cex_url: env
                .string_or("TOKEN_RATIO_SECONDARY_CEX_URL", DEFAULT_SECONDARY_CEX_URL),
            asset_a: env.asset("ASSET_A", AssetDefaults::ETH)?,
            asset_b: env.asset("ASSET_B", AssetDefaults::MNT)?,
        };
        if token_ratio.min_ratio <= 0.0 || token_ratio.min_ratio > token_ratio.max_ratio {
            return Err(OracleError::Config(format!(
                "token ratio bounds [{}, {}] are invalid",
                token_ratio.min_ratio, token_ratio.max_ratio
            )));
        }

        if !(token_ratio.scalar.is_finite() && token_ratio.scalar > 0.0) {
            return Err(OracleError::Config(format!(
                "token ratio scalar {} must be positive",
                token_ratio.scalar
            )));
        }

        let operator_fee = OperatorFeeConfig {
            enabled: env.parse_or("OPERATOR_FEE_UPDATE_ENABLED", false)?,
            markup_percentage: env.parse_or("OPERATOR_FEE_MARKUP_PERCENTAGE", 0)?,
            update_interval_seconds: env.parse_or(
                "OPERATOR_FEE_UPDATE_INTERVAL",
                DEFAULT_OPERATOR_FEE_UPDATE_INTERVAL,
            )?,
            significance_factor: env.parse_or(
                "OPERATOR_FEE_SIGNIFICANCE_FACTOR",
                DEFAULT_OPERATOR_FEE_SIGNIFICANCE_FACTOR,
            )?,
            intrinsic_sp1_gas_per_tx: env.parse_or("INTRINSIC_SP1_GAS_PER_TX", 0)?,
            intrinsic_sp1_gas_per_block: env.parse_or("INTRINSIC_SP1_GAS_PER_BLOCK", 0)?,
            sp1_price_per_bgas_in_dollars: env.parse_or("SP1_PRICE_PER_BGAS_IN_DOLLARS", 0.0)?,
            sp1_gas_scalar: env.parse_or("SP1_GAS_SCALAR", 0)?,
        };

        let tx_counter = TxCounterConfig {
            update_interval_seconds: env
                .parse_or("TX_COUNTER_UPDATE_INTERVAL", DEFAULT_TX_COUNTER_UPDATE_INTERVAL)?
                .max(MIN_TX_COUNTER_UPDATE_INTERVAL),
            worker_number: env
                .parse_or("TX_COUNTER_WORKER_NUMBER", DEFAULT_TX_COUNTER_WORKER_NUMBER)?
                .max(MIN_TX_COUNTER_WORKER_NUMBER),
            l2_block_time_seconds: env
                .parse_or("L2_BLOCK_TIME_SECONDS", DEFAULT_L2_BLOCK_TIME_SECONDS)?
                .max(1),
        };

        Ok(Self {
            ethereum_http_url: env.string_or("ETHEREUM_HTTP_URL", DEFAULT_ETHEREUM_HTTP_URL),
            layer_two_http_url: env.string_or("LAYER_TWO_HTTP_URL", DEFAULT_LAYER_TWO_HTTP_URL),
            l1_chain_id: env.parse_opt("L1_CHAIN_ID")?,
            l2_chain_id: env.parse_opt("L2_CHAIN_ID")?,
            gas_price_oracle_address: env
                .parse_opt("GAS_PRICE_ORACLE_ADDRESS")?
                .map_or_else(|| parse_address(DEFAULT_GAS_PRICE_ORACLE_ADDRESS), Ok)?,
            private_key: env.get("PRIVATE_KEY"),
            transaction_gas_price: env.parse_opt("TRANSACTION_GAS_PRICE")?,
            log_level: env.string_or("LOG_LEVEL", DEFAULT_LOG_LEVEL),
            wait_for_receipt: env.parse_or("WAIT_FOR_RECEIPT", false)?,
            metrics_enabled: env.parse_or("METRICS_ENABLE", false)?,
            connection_retries: env.parse_or("CONNECTION_RETRIES", DEFAULT_CONNECTION_RETRIES)?,
            token_ratio,
            operator_fee,
            tx_counter,
        })
    }
}

struct AssetDefaults {
    name: &'static str,
    cex_symbol: &'static str,
    secondary_cex_symbol: Option<&'static str>,
    pool: Option<&'static str>,
    pool_asset_is_token0: bool,
    asset_decimals: u8,
    quote_decimals: u8,
    min_price: f64,
    max_price: f64,
}

impl AssetDefaults {
    // Uniswap V3 USDC/WETH 0.05%
    const ETH: AssetDefaults = AssetDefaults {
        name: "ETH",
        cex_symbol: "ETHUSDT",
        secondary_cex_symbol: Some("ETHUSDT"),
        pool: Some("0x88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640"),
        pool_asset_is_token0: false,
        asset_decimals: 18,
        quote_decimals: 6,
        min_price: 100.0,
        max_price: 100_000.0,
    };

    const MNT: AssetDefaults = AssetDefaults {
        name: "MNT",
        cex_symbol: "MNTUSDT",
        secondary_cex_symbol: Some("MNTUSDT"),
        pool: None,
        pool_asset_is_token0: true,
        asset_decimals: 18,
        quote_decimals: 6,
        min_price: 0.01,
        max_price: 100.0,
    };
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_opt<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| {
                    OracleError::Config(format!("{ENV_PREFIX}{key}={raw} is invalid: {e}"))
                })
            })
            .transpose()
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    fn asset(&self, prefix: &str, defaults: AssetDefaults) -> Result<AssetFeedConfig> {
        let key = |field: &str| format!("{prefix}_{field}");
        let pool = match self.parse_opt::<Address>(&key("POOL"))? {
            Some(addr) => Some(addr),
            None => defaults.pool.map(parse_address).transpose()?,
        };
        let min_price = self.parse_or(&key("MIN_PRICE"), defaults.min_price)?;
        let max_price = self.parse_or(&key("MAX_PRICE"), defaults.max_price)?;
        if min_price < 0.0 || min_price > max_price {
            return Err(OracleError::Config(format!(
                "{prefix} price bounds [{min_price}, {max_price}] are invalid"
            )));
        }
        Ok(AssetFeedConfig {
            name: self.string_or(&key("NAME"), defaults.name),
            cex_symbol: self.string_or(&key("CEX_SYMBOL"), defaults.cex_symbol),
            secondary_cex_symbol: self
                .get(&key("SECONDARY_CEX_SYMBOL"))
                .or_else(|| defaults.secondary_cex_symbol.map(str::to_string)),
            pool,
            pool_asset_is_token0: self
                .parse_or(&key("POOL_ASSET_IS_TOKEN0"), defaults.pool_asset_is_token0)?,
            asset_decimals: self.parse_or(&key("DECIMALS"), defaults.asset_decimals)?,
            quote_decimals: self.parse_or(&key("QUOTE_DECIMALS"), defaults.quote_decimals)?,
            min_price,
            max_price,
        })
    }
}

fn parse_address(raw: &str) -> Result<Address> {
    raw.parse()
        .map_err(|e| OracleError::Config(format!("invalid address {raw}: {e}")))
}
