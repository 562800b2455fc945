use super::{backend::ContractBackend, submitter::TransactionSubmitter};
use crate::errors::Result;
use async_trait::async_trait;
use ethers::{
    abi::{AbiDecode, AbiEncode},
    contract::abigen,
    types::{
        Address, H256, TransactionReceipt, TransactionRequest, U256,
        transaction::eip2718::TypedTransaction,
    },
};
use std::sync::Arc;

abigen!(
    GasPriceOracleContract,
    r#"[
        function operator() external view returns (address)
        function tokenRatio() external view returns (uint256)
        function operatorFeeConstant() external view returns (uint256)
        function operatorFeeScalar() external view returns (uint256)
        function setTokenRatio(uint256 newRatio) external
        function setOperatorFeeConstant(uint256 newConstant) external
        function setOperatorFeeScalar(uint256 newScalar) external
    ]"#
);

/// Reads and writes of the L2 gas price oracle contract.
#[async_trait]
pub trait OnChainOracle: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;
    async fn read_operator(&self) -> Result<Address>;
    async fn read_token_ratio(&self) -> Result<U256>;
    async fn read_operator_fee_constant(&self) -> Result<U256>;
    async fn read_operator_fee_scalar(&self) -> Result<U256>;
    async fn submit_token_ratio(&self, value: U256) -> Result<H256>;
    async fn submit_operator_fee_constant(&self, value: U256) -> Result<H256>;
    async fn submit_operator_fee_scalar(&self, value: U256) -> Result<H256>;
    async fn wait_for_receipt(&self, hash: H256) -> Result<TransactionReceipt>;
}

pub struct OracleContract {
    address: Address,
    backend: Arc<dyn ContractBackend>,
    submitter: TransactionSubmitter,
}

impl OracleContract {
    pub fn new(address: Address, submitter: TransactionSubmitter) -> Self {
        Self {
            address,
            backend: submitter.backend().clone(),
            submitter,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn request(&self, data: Vec<u8>) -> TypedTransaction {
        TransactionRequest::new().to(self.address).data(data).into()
    }

    async fn read<C: AbiEncode, R: AbiDecode>(&self, call: C) -> Result<R> {
        let raw = self.backend.call(&self.request(call.encode())).await?;
        Ok(R::decode(raw)?)
    }

    async fn submit<C: AbiEncode>(&self, call: C) -> Result<H256> {
        self.submitter.sign_and_send(self.request(call.encode())).await
    }
}

#[async_trait]
impl OnChainOracle for OracleContract {
    async fn chain_id(&self) -> Result<u64> {
        self.backend.chain_id().await
    }

    async fn read_operator(&self) -> Result<Address> {
        let OperatorReturn(operator) = self.read(OperatorCall).await?;
        Ok(operator)
    }

    async fn read_token_ratio(&self) -> Result<U256> {
        let TokenRatioReturn(ratio) = self.read(TokenRatioCall).await?;
        Ok(ratio)
    }

    async fn read_operator_fee_constant(&self) -> Result<U256> {
        let OperatorFeeConstantReturn(constant) = self.read(OperatorFeeConstantCall).await?;
        Ok(constant)
    }

    async fn read_operator_fee_scalar(&self) -> Result<U256> {
        let OperatorFeeScalarReturn(scalar) = self.read(OperatorFeeScalarCall).await?;
        Ok(scalar)
    }

    async fn submit_token_ratio(&self, value: U256) -> Result<H256> {
        self.submit(SetTokenRatioCall { new_ratio: value }).await
    }

    async fn submit_operator_fee_constant(&self, value: U256) -> Result<H256> {
        self.submit(SetOperatorFeeConstantCall {
            new_constant: value,
        })
        .await
    }

    async fn submit_operator_fee_scalar(&self, value: U256) -> Result<H256> {
        self.submit(SetOperatorFeeScalarCall { new_scalar: value })
            .await
    }

    async fn wait_for_receipt(&self, hash: H256) -> Result<TransactionReceipt> {
        self.submitter.wait_for_receipt(hash).await
    }
}
