use std::{
    backtrace::{Backtrace, BacktraceStatus},
    fs,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use bifrost::{
    cfg::Config,
    decoder::decoder_for,
    metrics::Metrics,
    observer::{BlockObserver, ObservedBlock},
    scanner::BlockScanner,
    storage::{ScannerStorage, SqliteScannerStorage},
    thorclient::ThorchainBridge,
};
use clap::Parser;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use serde::Deserialize;
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[clap(long, short, default_values = ["config.toml"])]
    config_file: Vec<PathBuf>,
    #[clap(long, default_value = "false")]
    log_json: bool,
}

/// Logs panics through `tracing`, so they reach the same sink as everything else.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        let location = info.location().map(ToString::to_string);
        let thread = std::thread::current();
        let backtrace = Backtrace::capture();
        let backtrace =
            (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());

        error!(
            thread = thread.name().unwrap_or("<unnamed>"),
            location = location.as_deref(),
            backtrace = backtrace.as_deref(),
            "panic: {message}"
        );
    }));
}

/// Merges the top-level tables of every file. Splitting a config across files is fine, but setting the same table
/// in two of them is an error rather than a silent override.
fn load_config(files: &[PathBuf]) -> Result<Config> {
    let mut merged = toml::Table::new();
    for path in files {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read {}", path.display()))?;
        let table: toml::Table = toml::from_str(&contents)
            .with_context(|| format!("malformed config file {}", path.display()))?;
        for (key, value) in table {
            if merged.contains_key(&key) {
                return Err(anyhow!(
                    "{key:?} in {} is already set by an earlier config file",
                    path.display()
                ));
            }
            merged.insert(key, value);
        }
    }

    let config = Config::deserialize(merged)?;
    config.validate()?;
    Ok(config)
}

fn init_metrics(endpoint: &str) -> Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let reader = PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(10))
        .build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(provider)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_line_number(true)
        .with_ansi(false);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
    install_panic_hook();

    let config = load_config(&args.config_file)?;

    let meter_provider = config
        .otlp_collector_endpoint
        .as_deref()
        .map(init_metrics)
        .transpose()?;
    let metrics = Arc::new(Metrics::default());

    let storage: Arc<dyn ScannerStorage> = match &config.observer.db_path {
        Some(path) => Arc::new(SqliteScannerStorage::open(path)?),
        None => Arc::new(SqliteScannerStorage::in_memory()?),
    };

    let bridge = ThorchainBridge::new(config.thorchain.clone(), metrics.clone())?;
    select! {
        result = bridge.ensure_node_whitelisted_with_timeout() => result?,
        _ = tokio::signal::ctrl_c() => {
            bridge.stop();
            return Ok(());
        }
    }
    info!(address = %bridge.keys().address(), "node is whitelisted");

    let scanner_config = &config.observer.block_scanner;
    let mut scanner = BlockScanner::new(scanner_config, storage.clone(), metrics.clone())?;
    let observer = Arc::new(BlockObserver::new(
        scanner_config,
        decoder_for(scanner_config.decoder),
        storage,
        metrics,
    )?);

    let cancel = CancellationToken::new();
    let (block_sender, mut blocks) = mpsc::channel::<ObservedBlock>(scanner_config.block_scan_processors);
    let observer_task = tokio::spawn(observer.run(scanner.messages()?, block_sender, cancel.clone()));
    let consumer_task = tokio::spawn(async move {
        while let Some(block) = blocks.recv().await {
            debug!(height = block.height, txs = block.txs.len(), "block ready for classification");
        }
    });

    scanner.start()?;

    let result = select! {
        result = scanner.wait() => {
            if let Err(e) = &result {
                error!(error = ?e, "block scanner failed");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    };

    bridge.stop();
    let stopped = scanner.stop().await;
    cancel.cancel();
    observer_task.await??;
    consumer_task.await?;

    if let Some(provider) = meter_provider {
        provider.shutdown()?;
    }

    result.and(stopped)
}
