//! In-memory fakes for the collaborator traits.

use crate::{
    aggregator::PriceSource,
    counter::ChainReader,
    errors::{OracleError, Result},
    models::OracleParameter,
    oracle::{ContractBackend, OnChainOracle},
};
use async_trait::async_trait;
use ethers::types::{
    Address, Bytes, H256, TransactionReceipt, U256, transaction::eip2718::TypedTransaction,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

pub struct StaticSource {
    name: String,
    price: f64,
}

impl StaticSource {
    pub fn new(name: &str, price: f64) -> Self {
        Self {
            name: name.to_string(),
            price,
        }
    }
}

#[async_trait]
impl PriceSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_price(&self) -> Result<f64> {
        Ok(self.price)
    }
}

/// Returns the scripted prices in order, then repeats the last one.
pub struct ScriptedSource {
    name: String,
    prices: Vec<f64>,
    cursor: AtomicU32,
}

impl ScriptedSource {
    pub fn new(name: &str, prices: &[f64]) -> Self {
        Self {
            name: name.to_string(),
            prices: prices.to_vec(),
            cursor: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_price(&self) -> Result<f64> {
        let i = self.cursor.fetch_add(1, Ordering::SeqCst) as usize;
        self.prices
            .get(i.min(self.prices.len().saturating_sub(1)))
            .copied()
            .ok_or_else(|| OracleError::Other("no scripted price".into()))
    }
}

pub struct FailingSource;

#[async_trait]
impl PriceSource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    async fn fetch_price(&self) -> Result<f64> {
        Err(OracleError::Other("source unavailable".into()))
    }
}

/// Chain with a fixed head and the same transaction count in every block.
pub struct FakeChain {
    head: u64,
    txs_per_block: AtomicU64,
    failing: Mutex<HashSet<u64>>,
    fail_first: AtomicU32,
    delay: Mutex<Duration>,
    attempts: Mutex<HashMap<u64, u32>>,
    attempt_times: Mutex<HashMap<u64, Vec<Instant>>>,
    calls: AtomicU32,
    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
}

/// Decrements the in-flight counter even when the fetch is cancelled.
struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeChain {
    pub fn new(head: u64, txs_per_block: u64) -> Self {
        Self {
            head,
            txs_per_block: AtomicU64::new(txs_per_block),
            failing: Mutex::new(HashSet::new()),
            fail_first: AtomicU32::new(0),
            delay: Mutex::new(Duration::ZERO),
            attempts: Mutex::new(HashMap::new()),
            attempt_times: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            peak_in_flight: AtomicU32::new(0),
        }
    }

    /// These blocks fail on every attempt.
    pub fn fail_blocks(&self, blocks: &[u64]) {
        self.failing.lock().unwrap().extend(blocks.iter().copied());
    }

    pub fn set_txs_per_block(&self, n: u64) {
        self.txs_per_block.store(n, Ordering::SeqCst);
    }

    /// Every block fails its first `n` attempts.
    pub fn fail_first_attempts(&self, n: u32) {
        self.fail_first.store(n, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of block fetches running at the same time.
    pub fn peak_in_flight(&self) -> u32 {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self, block: u64) -> Vec<Instant> {
        self.attempt_times
            .lock()
            .unwrap()
            .get(&block)
            .cloned()
            .unwrap_or_default()
    }

    pub fn distinct_blocks_requested(&self) -> Vec<u64> {
        let mut blocks: Vec<u64> = self.attempts.lock().unwrap().keys().copied().collect();
        blocks.sort_unstable();
        blocks
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn chain_head(&self) -> Result<u64> {
        Ok(self.head)
    }

    async fn transaction_count_in_block(&self, number: u64) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        self.attempt_times
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push(Instant::now());
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(number).or_insert(0);
            *entry += 1;
            *entry
        };
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&number) {
            return Err(OracleError::Other(format!("block {number} unavailable")));
        }
        if attempt <= self.fail_first.load(Ordering::SeqCst) {
            return Err(OracleError::Other(format!("transient error on block {number}")));
        }
        Ok(self.txs_per_block.load(Ordering::SeqCst))
    }
}

/// Backend answering calls by selector and recording every sent transaction.
pub struct FakeBackend {
    chain_id: u64,
    responses: Mutex<HashMap<[u8; 4], Bytes>>,
    sent: Mutex<Vec<TypedTransaction>>,
    /// Receipt becomes available on this poll; 0 means never.
    receipt_on_poll: AtomicU32,
    receipt_polls: AtomicU32,
    reject_sends: AtomicBool,
    gas_price: AtomicU64,
    gas_price_queries: AtomicU32,
}

impl FakeBackend {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            responses: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            receipt_on_poll: AtomicU32::new(1),
            receipt_polls: AtomicU32::new(0),
            reject_sends: AtomicBool::new(false),
            gas_price: AtomicU64::new(1),
            gas_price_queries: AtomicU32::new(0),
        }
    }

    pub fn respond(&self, selector: [u8; 4], data: impl Into<Bytes>) {
        self.responses.lock().unwrap().insert(selector, data.into());
    }

    pub fn receipt_on_poll(&self, poll: u32) {
        self.receipt_on_poll.store(poll, Ordering::SeqCst);
    }

    pub fn set_gas_price(&self, wei: u64) {
        self.gas_price.store(wei, Ordering::SeqCst);
    }

    pub fn gas_price_queries(&self) -> u32 {
        self.gas_price_queries.load(Ordering::SeqCst)
    }

    pub fn reject_sends(&self) {
        self.reject_sends.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<TypedTransaction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn receipt_polls(&self) -> u32 {
        self.receipt_polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractBackend for FakeBackend {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn gas_price(&self) -> Result<U256> {
        self.gas_price_queries.fetch_add(1, Ordering::SeqCst);
        Ok(U256::from(self.gas_price.load(Ordering::SeqCst)))
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes> {
        let data = tx.data().cloned().unwrap_or_default();
        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| OracleError::Middleware("call without selector".into()))?;
        self.responses
            .lock()
            .unwrap()
            .get(&selector)
            .cloned()
            .ok_or_else(|| OracleError::Middleware("execution reverted".into()))
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256> {
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(OracleError::Middleware("nonce too low".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(tx);
        Ok(H256::from_low_u64_be(sent.len() as u64))
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        let poll = self.receipt_polls.fetch_add(1, Ordering::SeqCst) + 1;
        let ready_on = self.receipt_on_poll.load(Ordering::SeqCst);
        if ready_on == 0 || poll < ready_on {
            return Ok(None);
        }
        Ok(Some(TransactionReceipt {
            transaction_hash: hash,
            ..Default::default()
        }))
    }
}

/// Contract holding three values in memory.
pub struct FakeOracle {
    chain_id: u64,
    operator: Address,
    values: Mutex<HashMap<OracleParameter, U256>>,
    submissions: Mutex<Vec<(OracleParameter, U256)>>,
    receipts_time_out: AtomicBool,
}

impl FakeOracle {
    pub fn new(chain_id: u64, operator: Address) -> Self {
        Self {
            chain_id,
            operator,
            values: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            receipts_time_out: AtomicBool::new(false),
        }
    }

    pub fn set(&self, parameter: OracleParameter, value: U256) {
        self.values.lock().unwrap().insert(parameter, value);
    }

    pub fn value(&self, parameter: OracleParameter) -> U256 {
        self.values
            .lock()
            .unwrap()
            .get(&parameter)
            .copied()
            .unwrap_or_default()
    }

    pub fn time_out_receipts(&self) {
        self.receipts_time_out.store(true, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<(OracleParameter, U256)> {
        self.submissions.lock().unwrap().clone()
    }

    fn submit(&self, parameter: OracleParameter, value: U256) -> H256 {
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push((parameter, value));
        self.values.lock().unwrap().insert(parameter, value);
        H256::from_low_u64_be(submissions.len() as u64)
    }
}

#[async_trait]
impl OnChainOracle for FakeOracle {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn read_operator(&self) -> Result<Address> {
        Ok(self.operator)
    }

    async fn read_token_ratio(&self) -> Result<U256> {
        Ok(self.value(OracleParameter::TokenRatio))
    }

    async fn read_operator_fee_constant(&self) -> Result<U256> {
        Ok(self.value(OracleParameter::OperatorFeeConstant))
    }

    async fn read_operator_fee_scalar(&self) -> Result<U256> {
        Ok(self.value(OracleParameter::OperatorFeeScalar))
    }

    async fn submit_token_ratio(&self, value: U256) -> Result<H256> {
        Ok(self.submit(OracleParameter::TokenRatio, value))
    }

    async fn submit_operator_fee_constant(&self, value: U256) -> Result<H256> {
        Ok(self.submit(OracleParameter::OperatorFeeConstant, value))
    }

    async fn submit_operator_fee_scalar(&self, value: U256) -> Result<H256> {
        Ok(self.submit(OracleParameter::OperatorFeeScalar, value))
    }

    async fn wait_for_receipt(&self, hash: H256) -> Result<TransactionReceipt> {
        if self.receipts_time_out.load(Ordering::SeqCst) {
            return Err(OracleError::ReceiptTimeout { hash, attempts: 30 });
        }
        Ok(TransactionReceipt {
            transaction_hash: hash,
            ..Default::default()
        })
    }
}
