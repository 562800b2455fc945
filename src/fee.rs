//! Operator fee formula.
//!
//! The constant charges every transaction its own proving cost plus a share of
//! the per-block proving cost, priced in wei at the current native token price.
//! The scalar prices execution gas at the same rate, with an optional markup.

use crate::{
    config::OperatorFeeConfig,
    errors::{OracleError, Result},
};
use bigdecimal::BigDecimal;
use ethers::types::U256;
use num_bigint::{BigInt, BigUint};
use num_traits::One;
use std::str::FromStr;
use tracing::info;

pub const DEFAULT_INTRINSIC_SP1_GAS_PER_TX: u64 = 10_000_000;
pub const DEFAULT_INTRINSIC_SP1_GAS_PER_BLOCK: u64 = 100_000_000;
pub const DEFAULT_SP1_PRICE_PER_BGAS_IN_DOLLARS: f64 = 0.6;
/// Proving gas per L2 gas unit, 1e6 fixed point.
pub const DEFAULT_SP1_GAS_SCALAR: u64 = 1_000_000;

const WEI_PER_NATIVE_TOKEN: u64 = 1_000_000_000_000_000_000;
const GAS_UNITS_PER_BILLION: u64 = 1_000_000_000;
const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct OperatorFeeCalculator {
    intrinsic_gas_per_tx: u64,
    intrinsic_gas_per_block: u64,
    price_per_bgas_in_dollars: BigDecimal,
    gas_scalar: u64,
    markup_percentage: i64,
    blocks_per_day: u64,
}

impl OperatorFeeCalculator {
    /// Zero or negative cost inputs are replaced by their defaults.
    pub fn new(
        intrinsic_gas_per_tx: u64,
        intrinsic_gas_per_block: u64,
        price_per_bgas_in_dollars: f64,
        gas_scalar: u64,
        markup_percentage: i64,
        block_time_seconds: u64,
    ) -> Self {
        let intrinsic_gas_per_tx = if intrinsic_gas_per_tx == 0 {
            info!(default = DEFAULT_INTRINSIC_SP1_GAS_PER_TX, "[FEE] intrinsic gas per tx not set, using default");
            DEFAULT_INTRINSIC_SP1_GAS_PER_TX
        } else {
            intrinsic_gas_per_tx
        };
        let intrinsic_gas_per_block = if intrinsic_gas_per_block == 0 {
            info!(default = DEFAULT_INTRINSIC_SP1_GAS_PER_BLOCK, "[FEE] intrinsic gas per block not set, using default");
            DEFAULT_INTRINSIC_SP1_GAS_PER_BLOCK
        } else {
            intrinsic_gas_per_block
        };
        let price = if price_per_bgas_in_dollars.is_finite() && price_per_bgas_in_dollars > 0.0 {
            price_per_bgas_in_dollars
        } else {
            info!(default = DEFAULT_SP1_PRICE_PER_BGAS_IN_DOLLARS, "[FEE] price per billion gas not set, using default");
            DEFAULT_SP1_PRICE_PER_BGAS_IN_DOLLARS
        };
        let gas_scalar = if gas_scalar == 0 {
            info!(default = DEFAULT_SP1_GAS_SCALAR, "[FEE] gas scalar not set, using default");
            DEFAULT_SP1_GAS_SCALAR
        } else {
            gas_scalar
        };
        Self {
            intrinsic_gas_per_tx,
            intrinsic_gas_per_block,
            price_per_bgas_in_dollars: decimal(price),
            gas_scalar,
            markup_percentage,
            blocks_per_day: SECONDS_PER_DAY / block_time_seconds.max(1),
        }
    }

    pub fn from_config(cfg: &OperatorFeeConfig, block_time_seconds: u64) -> Self {
        Self::new(
            cfg.intrinsic_sp1_gas_per_tx,
            cfg.intrinsic_sp1_gas_per_block,
            cfg.sp1_price_per_bgas_in_dollars,
            cfg.sp1_gas_scalar,
            cfg.markup_percentage,
            block_time_seconds,
        )
    }

    /// Per-transaction operator fee constant in wei for a day of `tx_count`
    /// transactions at `token_price` dollars per native token.
    pub fn calculate_constant(&self, tx_count: u64, token_price: f64) -> Result<U256> {
        if tx_count == 0 {
            return Err(OracleError::InvalidInput("tx count must be positive".into()));
        }
        let price_per_gas = self.price_per_gas_wei(token_price)?;

        let apportioned = BigUint::from(self.intrinsic_gas_per_block)
            * BigUint::from(self.blocks_per_day)
            / BigUint::from(tx_count);
        let total_gas = BigUint::from(self.intrinsic_gas_per_tx) + apportioned;
        to_u256(&(total_gas * price_per_gas))
    }

    /// Operator fee scalar (1e6 fixed point, wei per L2 gas unit) including markup.
    pub fn calculate_scalar(&self, token_price: f64) -> Result<U256> {
        let price_per_gas = self.price_per_gas_wei(token_price)?;
        let markup = BigUint::from(100i64.saturating_add(self.markup_percentage).max(0) as u64);
        let scalar = BigUint::from(self.gas_scalar) * price_per_gas * markup / BigUint::from(100u32);
        to_u256(&scalar)
    }

    /// Wei per proving gas unit, truncated, never below 1.
    fn price_per_gas_wei(&self, token_price: f64) -> Result<BigUint> {
        if !(token_price.is_finite() && token_price > 0.0) {
            return Err(OracleError::InvalidInput(format!(
                "token price must be positive, got {token_price}"
            )));
        }
        let wei_per_gas_unit = BigDecimal::from(WEI_PER_NATIVE_TOKEN / GAS_UNITS_PER_BILLION);
        let exact = &self.price_per_bgas_in_dollars * wei_per_gas_unit / decimal(token_price);
        let (truncated, _) = exact.with_scale(0).into_bigint_and_exponent();
        if truncated < BigInt::one() {
            return Ok(BigUint::one());
        }
        truncated
            .to_biguint()
            .ok_or_else(|| OracleError::Other("negative gas price".into()))
    }
}

fn decimal(value: f64) -> BigDecimal {
    BigDecimal::from_str(&value.to_string()).unwrap_or_default()
}

fn to_u256(value: &BigUint) -> Result<U256> {
    U256::from_dec_str(&value.to_string())
        .map_err(|e| OracleError::Other(format!("value {value} does not fit in uint256: {e}")))
}
