use super::backend::ContractBackend;
use crate::errors::{OracleError, Result};
use ethers::types::{H256, TransactionReceipt, U256, transaction::eip2718::TypedTransaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const RECEIPT_MAX_ATTEMPTS: u32 = 30;

/// Sends oracle updates and optionally waits for them to be mined.
pub struct TransactionSubmitter {
    backend: Arc<dyn ContractBackend>,
    gas_price: Option<U256>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl TransactionSubmitter {
    /// With `gas_price` unset the node's suggested price is fetched for every
    /// transaction.
    pub fn new(backend: Arc<dyn ContractBackend>, gas_price: Option<u64>) -> Self {
        Self {
            backend,
            gas_price: gas_price.map(U256::from),
            poll_interval: RECEIPT_POLL_INTERVAL,
            max_attempts: RECEIPT_MAX_ATTEMPTS,
        }
    }

    pub fn with_receipt_policy(mut self, poll_interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// The configured fixed price, otherwise the node's current `eth_gasPrice`.
    pub async fn current_gas_price(&self) -> Result<U256> {
        match self.gas_price {
            Some(price) => Ok(price),
            None => self.backend.gas_price().await,
        }
    }

    pub fn backend(&self) -> &Arc<dyn ContractBackend> {
        &self.backend
    }

    pub async fn sign_and_send(&self, mut tx: TypedTransaction) -> Result<H256> {
        let gas_price = self.current_gas_price().await?;
        tx.set_gas_price(gas_price);
        let hash = self.backend.send_transaction(tx).await?;
        debug!(tx = ?hash, %gas_price, "[ORACLE] transaction sent");
        Ok(hash)
    }

    /// Poll for the receipt until it appears or the attempts run out. RPC
    /// errors while polling count as "not mined yet".
    pub async fn wait_for_receipt(&self, hash: H256) -> Result<TransactionReceipt> {
        for attempt in 1..=self.max_attempts {
            match self.backend.transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    debug!(tx = ?hash, attempt, block = ?receipt.block_number, "[ORACLE] receipt found");
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(e) => warn!(tx = ?hash, attempt, error = %e, "[ORACLE] receipt lookup failed"),
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Err(OracleError::ReceiptTimeout {
            hash,
            attempts: self.max_attempts,
        })
    }
}
