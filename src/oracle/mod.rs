//! Epoch-driven updater of the L2 gas price oracle.
//!
//! The token ratio and the operator fee parameters are each pushed on their
//! own interval, and only when the new value differs enough from the current
//! one.

pub mod backend;
pub mod contract;
pub mod submitter;

pub use backend::{ContractBackend, RpcBackend};
pub use contract::{OnChainOracle, OracleContract};
pub use submitter::TransactionSubmitter;

use crate::{
    aggregator::PriceAggregator,
    config::{
        DEFAULT_OPERATOR_FEE_SIGNIFICANCE_FACTOR, DEFAULT_TOKEN_RATIO_SIGNIFICANCE_FACTOR,
        OracleConfig,
    },
    counter::BlockTxCounter,
    errors::{OracleError, Result},
    fee::OperatorFeeCalculator,
    metrics::MetricsSink,
    models::{FeeUpdateDecision, OracleParameter},
    utils::is_difference_significant,
};
use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleState {
    Initializing,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub signer: Address,
    pub l2_chain_id: Option<u64>,
    pub token_ratio_epoch_length_seconds: u64,
    pub token_ratio_significance_factor: f64,
    pub token_ratio_scalar: f64,
    pub operator_fee_update_interval_seconds: u64,
    pub operator_fee_significance_factor: f64,
    pub wait_for_receipt: bool,
}

impl OracleSettings {
    pub fn from_config(cfg: &OracleConfig, signer: Address) -> Self {
        Self {
            signer,
            l2_chain_id: cfg.l2_chain_id,
            token_ratio_epoch_length_seconds: cfg.token_ratio.epoch_length_seconds.max(1),
            token_ratio_significance_factor: positive_or(
                cfg.token_ratio.significance_factor,
                DEFAULT_TOKEN_RATIO_SIGNIFICANCE_FACTOR,
            ),
            token_ratio_scalar: cfg.token_ratio.scalar,
            operator_fee_update_interval_seconds: cfg.operator_fee.update_interval_seconds.max(1),
            operator_fee_significance_factor: positive_or(
                cfg.operator_fee.significance_factor,
                DEFAULT_OPERATOR_FEE_SIGNIFICANCE_FACTOR,
            ),
            wait_for_receipt: cfg.wait_for_receipt,
        }
    }
}

fn positive_or(value: f64, default: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        default
    }
}

/// Values this process last pushed or read from the contract.
#[derive(Debug, Clone, Copy, Default)]
struct CachedValues {
    token_ratio: U256,
    operator_fee_constant: U256,
    operator_fee_scalar: U256,
}

struct OperatorFee {
    counter: Arc<BlockTxCounter>,
    calculator: OperatorFeeCalculator,
}

pub struct GasPriceOracle {
    settings: OracleSettings,
    contract: Arc<dyn OnChainOracle>,
    aggregator: Arc<PriceAggregator>,
    operator_fee: Option<OperatorFee>,
    metrics: Arc<dyn MetricsSink>,
    cache: RwLock<CachedValues>,
    state: watch::Sender<OracleState>,
}

impl GasPriceOracle {
    pub fn new(
        settings: OracleSettings,
        contract: Arc<dyn OnChainOracle>,
        aggregator: Arc<PriceAggregator>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (state, _) = watch::channel(OracleState::Initializing);
        Self {
            settings,
            contract,
            aggregator,
            operator_fee: None,
            metrics,
            cache: RwLock::new(CachedValues::default()),
            state,
        }
    }

    /// Enable operator fee updates.
    pub fn with_operator_fee(
        mut self,
        counter: Arc<BlockTxCounter>,
        calculator: OperatorFeeCalculator,
    ) -> Self {
        self.operator_fee = Some(OperatorFee {
            counter,
            calculator,
        });
        self
    }

    pub fn state(&self) -> OracleState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<OracleState> {
        self.state.subscribe()
    }

    /// Fail unless the configured key is the contract operator.
    pub async fn ensure(&self) -> Result<()> {
        let operator = self.contract.read_operator().await?;
        if operator != self.settings.signer {
            return Err(OracleError::InvalidSigningKey {
                signer: self.settings.signer,
                operator,
            });
        }
        Ok(())
    }

    /// Verify chain and identity, then load the current contract values.
    pub async fn initialize(&self) -> Result<()> {
        let actual = self.contract.chain_id().await?;
        resolve_chain_id("L2", self.settings.l2_chain_id, actual)?;
        self.ensure().await?;

        let mut cached = CachedValues {
            token_ratio: self.contract.read_token_ratio().await?,
            ..Default::default()
        };
        if self.operator_fee.is_some() {
            let (constant, scalar) = tokio::try_join!(
                self.contract.read_operator_fee_constant(),
                self.contract.read_operator_fee_scalar(),
            )?;
            cached.operator_fee_constant = constant;
            cached.operator_fee_scalar = scalar;
            self.metrics.set_operator_fee_constant(saturating_u64(constant));
            self.metrics.set_operator_fee_scalar(saturating_u64(scalar));
        }
        *self.cache.write().await = cached;

        info!(
            chain_id = actual,
            signer = ?self.settings.signer,
            token_ratio = %cached.token_ratio,
            operator_fee_constant = %cached.operator_fee_constant,
            operator_fee_scalar = %cached.operator_fee_scalar,
            "[ORACLE] initialized"
        );
        Ok(())
    }

    /// Initialize and spawn the update loops. On failure the oracle moves
    /// straight to `Stopped` and nothing is spawned.
    pub async fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        if let Err(e) = self.initialize().await {
            self.state.send_replace(OracleState::Stopped);
            return Err(e);
        }

        let mut handles = vec![self.clone().spawn_token_ratio_loop(shutdown.clone())];
        if self.operator_fee.is_some() {
            handles.push(self.clone().spawn_operator_fee_loop(shutdown));
        }
        self.state.send_replace(OracleState::Running);
        info!(loops = handles.len(), "[ORACLE] running");
        Ok(handles)
    }

    fn spawn_token_ratio_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.settings.token_ratio_epoch_length_seconds);
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if let Err(e) = self.update_token_ratio().await {
                    warn!(error = %e, "[ORACLE] token ratio update failed");
                }
            }
            self.state.send_replace(OracleState::Stopped);
            debug!("[ORACLE] token ratio loop stopped");
        })
    }

    fn spawn_operator_fee_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.settings.operator_fee_update_interval_seconds);
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let (constant, scalar) = tokio::join!(
                    self.update_operator_fee_constant(),
                    self.update_operator_fee_scalar(),
                );
                if let Err(e) = constant {
                    warn!(error = %e, "[ORACLE] operator fee constant update failed");
                }
                if let Err(e) = scalar {
                    warn!(error = %e, "[ORACLE] operator fee scalar update failed");
                }
            }
            debug!("[ORACLE] operator fee loop stopped");
        })
    }

    /// One token ratio epoch. Returns the transaction hash when an update was
    /// sent.
    pub async fn update_token_ratio(&self) -> Result<Option<H256>> {
        let ratio = self.aggregator.token_ratio().await;
        if ratio <= 0.0 {
            debug!("[ORACLE] no token ratio yet, skipping epoch");
            return Ok(None);
        }
        let proposed = scale_ratio(ratio, self.settings.token_ratio_scalar)?;
        let current = self.contract.read_token_ratio().await?;
        self.cache.write().await.token_ratio = current;

        let decision = FeeUpdateDecision {
            parameter: OracleParameter::TokenRatio,
            current,
            proposed,
            significant: significant(current, proposed, self.settings.token_ratio_significance_factor),
        };
        self.push(decision).await
    }

    pub async fn update_operator_fee_constant(&self) -> Result<Option<H256>> {
        let Some(fee) = &self.operator_fee else {
            return Ok(None);
        };
        let tx_count = fee.counter.estimated_daily_tx_count().await;
        let price = self.aggregator.asset_a_price().await;
        if tx_count == 0 || price <= 0.0 {
            debug!(tx_count, price, "[ORACLE] operator fee inputs not ready");
            return Ok(None);
        }
        let proposed = fee.calculator.calculate_constant(tx_count, price)?;
        let current = self.cache.read().await.operator_fee_constant;
        let decision = FeeUpdateDecision {
            parameter: OracleParameter::OperatorFeeConstant,
            current,
            proposed,
            significant: significant(current, proposed, self.settings.operator_fee_significance_factor),
        };
        self.push(decision).await
    }

    pub async fn update_operator_fee_scalar(&self) -> Result<Option<H256>> {
        let Some(fee) = &self.operator_fee else {
            return Ok(None);
        };
        let price = self.aggregator.asset_a_price().await;
        if price <= 0.0 {
            debug!(price, "[ORACLE] operator fee inputs not ready");
            return Ok(None);
        }
        let proposed = fee.calculator.calculate_scalar(price)?;
        let current = self.cache.read().await.operator_fee_scalar;
        let decision = FeeUpdateDecision {
            parameter: OracleParameter::OperatorFeeScalar,
            current,
            proposed,
            significant: significant(current, proposed, self.settings.operator_fee_significance_factor),
        };
        self.push(decision).await
    }

    /// Send a significant decision. The cache follows the send, not the
    /// receipt.
    async fn push(&self, decision: FeeUpdateDecision) -> Result<Option<H256>> {
        let FeeUpdateDecision {
            parameter,
            current,
            proposed,
            significant,
        } = decision;
        if !significant {
            debug!(%parameter, %current, %proposed, "[ORACLE] change not significant");
            return Ok(None);
        }

        let hash = match parameter {
            OracleParameter::TokenRatio => self.contract.submit_token_ratio(proposed).await?,
            OracleParameter::OperatorFeeConstant => {
                self.contract.submit_operator_fee_constant(proposed).await?
            }
            OracleParameter::OperatorFeeScalar => {
                self.contract.submit_operator_fee_scalar(proposed).await?
            }
        };
        info!(%parameter, %current, %proposed, tx = ?hash, "[ORACLE] update sent");

        {
            let mut cache = self.cache.write().await;
            match parameter {
                OracleParameter::TokenRatio => cache.token_ratio = proposed,
                OracleParameter::OperatorFeeConstant => cache.operator_fee_constant = proposed,
                OracleParameter::OperatorFeeScalar => cache.operator_fee_scalar = proposed,
            }
        }
        match parameter {
            OracleParameter::TokenRatio => {}
            OracleParameter::OperatorFeeConstant => {
                self.metrics.set_operator_fee_constant(saturating_u64(proposed))
            }
            OracleParameter::OperatorFeeScalar => {
                self.metrics.set_operator_fee_scalar(saturating_u64(proposed))
            }
        }

        if self.settings.wait_for_receipt {
            let receipt = self.contract.wait_for_receipt(hash).await?;
            info!(%parameter, tx = ?hash, block = ?receipt.block_number, "[ORACLE] update mined");
        }
        Ok(Some(hash))
    }
}

/// Pick the chain id to use for `layer`. A configured id must match the RPC.
pub fn resolve_chain_id(layer: &'static str, configured: Option<u64>, actual: u64) -> Result<u64> {
    match configured {
        Some(configured) if configured != actual => Err(OracleError::WrongChainId {
            layer,
            configured,
            actual,
        }),
        Some(configured) => Ok(configured),
        None if actual == 0 => Err(OracleError::NoChainId { layer }),
        None => Ok(actual),
    }
}

/// Integer ratio written on-chain.
pub fn scale_ratio(ratio: f64, scalar: f64) -> Result<U256> {
    let scaled = (ratio * scalar).round();
    if !scaled.is_finite() || scaled < 1.0 || scaled > u128::MAX as f64 {
        return Err(OracleError::InvalidInput(format!(
            "token ratio {ratio} with scalar {scalar} is not a positive integer"
        )));
    }
    Ok(U256::from(scaled as u128))
}

fn saturating_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}

fn significant(current: U256, proposed: U256, factor: f64) -> bool {
    is_difference_significant(saturating_u64(current), saturating_u64(proposed), factor)
}
