use ethers::types::{Address, H256};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OracleError>;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("no private key provided")]
    NoPrivateKey,

    #[error("{layer}: no chain id provided")]
    NoChainId { layer: &'static str },

    #[error("wrong chain id provided: {layer}: configured with {configured} and got {actual}")]
    WrongChainId {
        layer: &'static str,
        configured: u64,
        actual: u64,
    },

    #[error("invalid signing key: signer {signer:?} is not the contract operator {operator:?}")]
    InvalidSigningKey { signer: Address, operator: Address },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("gave up connecting after {attempts} attempts: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },

    #[error("receipt for {hash:?} not found after {attempts} attempts")]
    ReceiptTimeout { hash: H256, attempts: u32 },

    #[error("Parse float error: {0}")]
    ParseFloat(#[from] std::num::ParseFloatError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] ethers::providers::ProviderError),

    #[error("Contract error: {0}")]
    Contract(
        #[from]
        ethers::contract::ContractError<ethers::providers::Provider<ethers::providers::Http>>,
    ),

    #[error("ABI error: {0}")]
    Abi(#[from] ethers::abi::AbiError),

    #[error("Middleware error: {0}")]
    Middleware(String),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Other: {0}")]
    Other(String),
}
