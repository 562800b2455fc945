//! L2 transaction throughput estimation.
//!
//! A scan walks the trailing `count_interval_seconds` worth of blocks with a
//! small worker pool, drops the per-block system transaction, and extrapolates
//! over blocks that could not be fetched. Scans with more than 10% failed
//! blocks are discarded.

use crate::{
    config::{MIN_TX_COUNTER_UPDATE_INTERVAL, MIN_TX_COUNTER_WORKER_NUMBER, TxCounterConfig},
    errors::{OracleError, Result},
    models::{BlockScanResult, ScanOutcome},
};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tracing::{debug, info, warn};

/// Transactions injected by the protocol into every block.
pub const SYSTEM_TXS_PER_BLOCK: u64 = 1;

const SECONDS_PER_DAY: u64 = 86_400;

/// Read-only chain access needed for counting.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn chain_head(&self) -> Result<u64>;
    async fn transaction_count_in_block(&self, number: u64) -> Result<u64>;
}

#[async_trait]
impl ChainReader for Provider<Http> {
    async fn chain_head(&self) -> Result<u64> {
        Ok(self.get_block_number().await?.as_u64())
    }

    async fn transaction_count_in_block(&self, number: u64) -> Result<u64> {
        let block = self
            .get_block(number)
            .await?
            .ok_or_else(|| OracleError::Other(format!("block {number} not found")))?;
        Ok(block.transactions.len() as u64)
    }
}

/// Retry behaviour for a single block fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    /// Sleep before retry `n` is `n * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
            backoff_step: Duration::from_secs(1),
        }
    }
}

pub struct BlockTxCounter {
    reader: Arc<dyn ChainReader>,
    count_interval_seconds: u64,
    worker_count: usize,
    block_time_seconds: u64,
    policy: FetchPolicy,
    last_result: RwLock<u64>,
}

impl BlockTxCounter {
    pub fn new(reader: Arc<dyn ChainReader>, cfg: &TxCounterConfig) -> Self {
        Self {
            reader,
            count_interval_seconds: cfg.update_interval_seconds.max(MIN_TX_COUNTER_UPDATE_INTERVAL),
            worker_count: cfg.worker_number.max(MIN_TX_COUNTER_WORKER_NUMBER),
            block_time_seconds: cfg.l2_block_time_seconds.max(1),
            policy: FetchPolicy::default(),
            last_result: RwLock::new(0),
        }
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn count_interval_seconds(&self) -> u64 {
        self.count_interval_seconds
    }

    pub fn window_size_blocks(&self) -> u64 {
        (self.count_interval_seconds / self.block_time_seconds).max(1)
    }

    /// Transactions counted over the last accepted window.
    pub async fn last_result(&self) -> u64 {
        *self.last_result.read().await
    }

    /// Last accepted window scaled to a 24h day.
    pub async fn estimated_daily_tx_count(&self) -> u64 {
        let last = *self.last_result.read().await;
        (last as u128 * SECONDS_PER_DAY as u128 / self.count_interval_seconds as u128) as u64
    }

    /// Scan the window ending at the chain head and publish the estimate when
    /// the failure ratio allows it.
    pub async fn update_tx_count(&self) -> Result<ScanOutcome> {
        let end = self.reader.chain_head().await?;
        let start = (end + 1).saturating_sub(self.window_size_blocks());
        let outcome = self.scan(start, end).await;

        match outcome.estimate() {
            Some(estimate) => {
                *self.last_result.write().await = estimate;
                info!(
                    start,
                    end,
                    total = outcome.total_tx_count,
                    failed = outcome.blocks_failed,
                    estimate,
                    "[TXCOUNT] window counted"
                );
            }
            None => warn!(
                start,
                end,
                failed = outcome.blocks_failed,
                window = outcome.blocks_in_window,
                "[TXCOUNT] too many failed blocks, keeping previous estimate"
            ),
        }
        Ok(outcome)
    }

    /// Fetch every block in `[start, end]` through the worker pool and wait
    /// for all workers before aggregating.
    pub async fn scan(&self, start: u64, end: u64) -> ScanOutcome {
        let blocks_in_window = end.saturating_sub(start) + 1;

        let (job_tx, job_rx) = mpsc::unbounded_channel::<u64>();
        for number in start..=end {
            let _ = job_tx.send(number);
        }
        drop(job_tx);
        let jobs = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<BlockScanResult>();

        let workers = self.worker_count.min(blocks_in_window as usize).max(1);
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let jobs = jobs.clone();
                let results = result_tx.clone();
                let reader = self.reader.clone();
                let policy = self.policy;
                tokio::spawn(async move {
                    loop {
                        let next = jobs.lock().await.recv().await;
                        let Some(number) = next else { break };
                        let res = fetch_block(reader.as_ref(), number, &policy).await;
                        if let Some(e) = &res.error {
                            debug!(worker, block = number, error = %e, "[TXCOUNT] block failed");
                        }
                        let _ = results.send(res);
                    }
                })
            })
            .collect();
        drop(result_tx);

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                warn!(error = %e, "[TXCOUNT] worker aborted");
            }
        }

        let mut outcome = ScanOutcome {
            blocks_in_window,
            ..Default::default()
        };
        while let Some(res) = result_rx.recv().await {
            match res.error {
                None => {
                    outcome.total_tx_count += res.tx_count;
                    outcome.blocks_processed += 1;
                }
                Some(_) => outcome.blocks_failed += 1,
            }
        }
        // Blocks lost to an aborted worker count as failed.
        outcome.blocks_failed = blocks_in_window - outcome.blocks_processed;
        outcome
    }

    /// Scan immediately, then every `count_interval_seconds`, until shutdown.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(self.count_interval_seconds));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if let Err(e) = self.update_tx_count().await {
                    warn!(error = %e, "[TXCOUNT] scan failed");
                }
            }
            debug!("[TXCOUNT] counter stopped");
        })
    }
}

async fn fetch_block(reader: &dyn ChainReader, number: u64, policy: &FetchPolicy) -> BlockScanResult {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.attempt_timeout, reader.transaction_count_in_block(number))
            .await
        {
            Ok(Ok(count)) => {
                return BlockScanResult {
                    block_number: number,
                    tx_count: count.saturating_sub(SYSTEM_TXS_PER_BLOCK),
                    error: None,
                };
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("timed out after {:?}", policy.attempt_timeout),
        }
        if attempt < attempts {
            tokio::time::sleep(policy.backoff_step * attempt).await;
        }
    }
    BlockScanResult {
        block_number: number,
        tx_count: 0,
        error: Some(last_error),
    }
}
