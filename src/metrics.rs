//! Gauges reported by the oracle.
//!
//! Components receive an `Arc<dyn MetricsSink>` at construction. Updates are
//! fire-and-forget and must never block the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

pub trait MetricsSink: Send + Sync {
    fn set_token_ratio(&self, ratio: f64);
    fn set_l1_base_fee(&self, wei: u64);
    fn set_operator_fee_scalar(&self, scalar: u64);
    fn set_operator_fee_constant(&self, constant: u64);
}

/// Sink used when metrics are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_token_ratio(&self, _ratio: f64) {}
    fn set_l1_base_fee(&self, _wei: u64) {}
    fn set_operator_fee_scalar(&self, _scalar: u64) {}
    fn set_operator_fee_constant(&self, _constant: u64) {}
}

pub fn noop() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}

/// In-process gauges backed by atomics.
#[derive(Debug, Default)]
pub struct OracleGauges {
    token_ratio_bits: AtomicU64,
    l1_base_fee: AtomicU64,
    operator_fee_scalar: AtomicU64,
    operator_fee_constant: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GaugeSnapshot {
    pub token_ratio: f64,
    pub l1_base_fee: u64,
    pub operator_fee_scalar: u64,
    pub operator_fee_constant: u64,
}

impl OracleGauges {
    pub fn snapshot(&self) -> GaugeSnapshot {
        GaugeSnapshot {
            token_ratio: f64::from_bits(self.token_ratio_bits.load(Ordering::Relaxed)),
            l1_base_fee: self.l1_base_fee.load(Ordering::Relaxed),
            operator_fee_scalar: self.operator_fee_scalar.load(Ordering::Relaxed),
            operator_fee_constant: self.operator_fee_constant.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for OracleGauges {
    fn set_token_ratio(&self, ratio: f64) {
        self.token_ratio_bits.store(ratio.to_bits(), Ordering::Relaxed);
    }

    fn set_l1_base_fee(&self, wei: u64) {
        self.l1_base_fee.store(wei, Ordering::Relaxed);
    }

    fn set_operator_fee_scalar(&self, scalar: u64) {
        self.operator_fee_scalar.store(scalar, Ordering::Relaxed);
    }

    fn set_operator_fee_constant(&self, constant: u64) {
        self.operator_fee_constant.store(constant, Ordering::Relaxed);
    }
}

/// Periodically log the gauge values until shutdown.
pub fn spawn_gauge_reporter(
    gauges: Arc<OracleGauges>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let s = gauges.snapshot();
                    tracing::info!(
                        token_ratio = s.token_ratio,
                        l1_base_fee = s.l1_base_fee,
                        operator_fee_scalar = s.operator_fee_scalar,
                        operator_fee_constant = s.operator_fee_constant,
                        "[METRICS] gauges"
                    );
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}
