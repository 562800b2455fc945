use crate::errors::{OracleError, Result};
use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{
        Address, Bytes, H256, TransactionReceipt, U256, transaction::eip2718::TypedTransaction,
    },
};
use std::sync::Arc;

/// The RPC surface needed to read from and write to the oracle contract.
#[async_trait]
pub trait ContractBackend: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;
    async fn gas_price(&self) -> Result<U256>;
    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes>;
    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256>;
    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>>;
}

pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Signing L2 client; nonce and gas limit are filled in by the middleware.
#[derive(Clone)]
pub struct RpcBackend {
    client: Arc<SignerClient>,
}

impl RpcBackend {
    /// `wallet` must already carry the L2 chain id.
    pub fn new(provider: Provider<Http>, wallet: LocalWallet) -> Self {
        Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
        }
    }

    pub fn signer_address(&self) -> Address {
        self.client.signer().address()
    }
}

fn middleware_err(e: impl std::fmt::Display) -> OracleError {
    OracleError::Middleware(e.to_string())
}

#[async_trait]
impl ContractBackend for RpcBackend {
    async fn chain_id(&self) -> Result<u64> {
        let id = self.client.get_chainid().await.map_err(middleware_err)?;
        Ok(id.as_u64())
    }

    async fn gas_price(&self) -> Result<U256> {
        self.client.get_gas_price().await.map_err(middleware_err)
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes> {
        self.client.call(tx, None).await.map_err(middleware_err)
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256> {
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(middleware_err)?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        self.client
            .get_transaction_receipt(hash)
            .await
            .map_err(middleware_err)
    }
}
