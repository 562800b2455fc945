use anyhow::{Context, Result};
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use futures::future::join_all;
use gas_oracle::{
    aggregator::{AssetFeed, PriceAggregator},
    cex,
    config::OracleConfig,
    counter::BlockTxCounter,
    errors::OracleError,
    fee::OperatorFeeCalculator,
    metrics::{self, MetricsSink, OracleGauges},
    oracle::{
        GasPriceOracle, OnChainOracle, OracleContract, OracleSettings, RpcBackend,
        TransactionSubmitter, resolve_chain_id,
    },
    utils,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const CONNECTION_RETRY_DELAY: Duration = Duration::from_secs(1);
const L1_BASE_FEE_INTERVAL_SECONDS: u64 = 15;
const METRICS_REPORT_INTERVAL_SECONDS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cfg = OracleConfig::from_env()?;
    utils::init_logging(&cfg.log_level);

    let wallet: LocalWallet = cfg
        .private_key
        .as_deref()
        .ok_or(OracleError::NoPrivateKey)?
        .trim_start_matches("0x")
        .parse()
        .context("invalid private key")?;

    let l1 = Provider::<Http>::try_from(cfg.ethereum_http_url.as_str())
        .with_context(|| format!("invalid L1 url {}", cfg.ethereum_http_url))?;
    let l2 = Provider::<Http>::try_from(cfg.layer_two_http_url.as_str())
        .with_context(|| format!("invalid L2 url {}", cfg.layer_two_http_url))?;

    let l1_chain_id = resolve_chain_id(
        "L1",
        cfg.l1_chain_id,
        utils::ensure_connection(&l1, cfg.connection_retries, CONNECTION_RETRY_DELAY).await?,
    )?;
    let l2_chain_id = resolve_chain_id(
        "L2",
        cfg.l2_chain_id,
        utils::ensure_connection(&l2, cfg.connection_retries, CONNECTION_RETRY_DELAY).await?,
    )?;
    tracing::info!(l1_chain_id, l2_chain_id, "[INIT] connected");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    let sink: Arc<dyn MetricsSink> = if cfg.metrics_enabled {
        let gauges = Arc::new(OracleGauges::default());
        handles.push(metrics::spawn_gauge_reporter(
            gauges.clone(),
            METRICS_REPORT_INTERVAL_SECONDS,
            shutdown_rx.clone(),
        ));
        gauges
    } else {
        metrics::noop()
    };

    let wallet = wallet.with_chain_id(l2_chain_id);
    let backend = RpcBackend::new(l2.clone(), wallet);
    let signer = backend.signer_address();
    let submitter = TransactionSubmitter::new(Arc::new(backend), cfg.transaction_gas_price);
    let contract = Arc::new(OracleContract::new(cfg.gas_price_oracle_address, submitter));
    tracing::info!(
        signer = ?signer,
        oracle = ?contract.address(),
        gas_price = ?cfg.transaction_gas_price,
        "[INIT] oracle client ready"
    );

    let l1 = Arc::new(l1);
    let http = cex::http_client()?;
    let ratio_cfg = &cfg.token_ratio;
    let aggregator = Arc::new(PriceAggregator::new(
        AssetFeed::from_config(&ratio_cfg.asset_a, ratio_cfg, &http, l1.clone())?,
        AssetFeed::from_config(&ratio_cfg.asset_b, ratio_cfg, &http, l1.clone())?,
        ratio_cfg.min_ratio,
        ratio_cfg.max_ratio,
        sink.clone(),
    ));
    match contract.read_token_ratio().await {
        Ok(on_chain) if ratio_cfg.scalar > 0.0 => {
            aggregator
                .seed_ratio(on_chain.low_u128() as f64 / ratio_cfg.scalar)
                .await
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "[INIT] could not read on-chain token ratio"),
    }
    aggregator.refresh().await;
    handles.push(
        aggregator
            .clone()
            .spawn(ratio_cfg.update_frequency_seconds, shutdown_rx.clone()),
    );
    handles.push(utils::spawn_l1_base_fee_watcher(
        l1.clone(),
        sink.clone(),
        L1_BASE_FEE_INTERVAL_SECONDS,
        shutdown_rx.clone(),
    ));

    let mut oracle = GasPriceOracle::new(
        OracleSettings::from_config(&cfg, signer),
        contract,
        aggregator,
        sink,
    );
    if cfg.operator_fee.enabled {
        let counter = Arc::new(BlockTxCounter::new(Arc::new(l2), &cfg.tx_counter));
        handles.push(counter.clone().spawn(shutdown_rx.clone()));
        let calculator =
            OperatorFeeCalculator::from_config(&cfg.operator_fee, cfg.tx_counter.l2_block_time_seconds);
        oracle = oracle.with_operator_fee(counter, calculator);
        tracing::info!(
            interval = cfg.operator_fee.update_interval_seconds,
            markup = cfg.operator_fee.markup_percentage,
            "[INIT] operator fee updates enabled"
        );
    }

    let oracle = Arc::new(oracle);
    let started = oracle.start(shutdown_rx).await;
    let loops = match started {
        Ok(loops) => loops,
        Err(e) => {
            let _ = shutdown_tx.send(true);
            join_all(handles).await;
            return Err(e.into());
        }
    };
    handles.extend(loops);

    tokio::signal::ctrl_c().await?;
    tracing::info!("[INIT] shutdown requested");
    let _ = shutdown_tx.send(true);
    join_all(handles).await;
    tracing::info!(state = ?oracle.state(), "[INIT] stopped");
    Ok(())
}
