use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cloudsift::{
    aws::inventory::{Inventory, StaticPricingBackend, StaticSessionProvider},
    aws::SessionProvider,
    config::{Config, FlagOverrides},
    dispatcher::{Dispatcher, ScanRequest},
    pool::WorkerPool,
    pricing::{CostEstimator, PriceCache, DEFAULT_CACHE_PATH},
    report::ScanReport,
    scanners::builtin_registry,
};
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cloudsift")]
#[command(about = "CloudSift - find unused cloud resources and what they cost")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scan and write the consolidated report
    Scan {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Inventory file to scan (offline/example mode)
        #[arg(short, long)]
        inventory: PathBuf,
        /// Comma-separated regions (default: all enabled)
        #[arg(long)]
        regions: Option<String>,
        /// Comma-separated scanner names (default: all)
        #[arg(long)]
        scanners: Option<String>,
        /// Unused-age threshold in days
        #[arg(long)]
        days_unused: Option<i64>,
        /// Report output path
        #[arg(short, long, default_value = "reports/scan_report.json")]
        output: PathBuf,
        /// Worker pool size
        #[arg(long)]
        max_workers: Option<usize>,
    },
    /// List the available scanners
    List {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            config,
            inventory,
            regions,
            scanners,
            days_unused,
            output,
            max_workers,
        } => {
            let flags = FlagOverrides {
                regions: regions.map(split_list),
                scanners: scanners.map(split_list),
                days_unused,
                max_workers,
                ..Default::default()
            };
            let (cfg, sources) = Config::load(config.as_deref(), &flags)?;
            cloudsift::init_tracing(&cfg.app.log_level, &cfg.app.log_format);
            info!("Starting CloudSift v{}", env!("CARGO_PKG_VERSION"));
            Config::log_parameter_sources(&sources);

            if cfg.scan.output != "filesystem" || cfg.scan.output_format != "json" {
                bail!(
                    "the '{}' output in '{}' format is handled by an external renderer; \
                     this binary writes filesystem/json reports",
                    cfg.scan.output,
                    cfg.scan.output_format
                );
            }

            run_scan(cfg, &inventory, &output).await?;
        }
        Commands::List { config } => {
            let (cfg, _) = Config::load(config.as_deref(), &FlagOverrides::default())?;
            cloudsift::init_tracing(&cfg.app.log_level, &cfg.app.log_format);

            let pool = Arc::new(WorkerPool::new(1));
            let cache = Arc::new(PriceCache::load(DEFAULT_CACHE_PATH).await?);
            let estimator = Arc::new(CostEstimator::new(
                cache,
                Arc::new(StaticPricingBackend::empty()),
            ));
            let registry = builtin_registry(estimator, pool.clone())?;

            println!("Available scanners:");
            for name in registry.list() {
                let scanner = registry.get(name)?;
                println!("  {:<22} {}", name, scanner.label());
            }
            pool.close().await;
        }
    }

    Ok(())
}

async fn run_scan(cfg: Config, inventory_path: &PathBuf, output: &PathBuf) -> Result<()> {
    let started_at = chrono::Utc::now();

    let inventory = Inventory::load(inventory_path)
        .with_context(|| format!("loading inventory {}", inventory_path.display()))?;
    let backend = Arc::new(StaticPricingBackend::new(inventory.prices.clone()));
    let provider: Arc<dyn SessionProvider> = Arc::new(StaticSessionProvider::new(inventory));

    // Init order: pool, then estimator (cache load), then scanners.
    let pool = Arc::new(WorkerPool::new(cfg.app.max_workers));
    let cache = Arc::new(PriceCache::load(DEFAULT_CACHE_PATH).await?);
    let estimator = Arc::new(CostEstimator::new(cache.clone(), backend));
    let registry = Arc::new(builtin_registry(estimator, pool.clone())?);

    let accounts = provider.list_accounts().await?;
    if accounts.is_empty() {
        bail!("the inventory lists no accounts to scan");
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling scan");
            signal_cancel.cancel();
        }
    });

    let request = ScanRequest {
        accounts: accounts.clone(),
        regions: cfg.scan.regions.clone(),
        scanners: cfg.scan.scanners.clone(),
        days_unused: cfg.scan.days_unused,
        ignore: cfg.scan.ignore.clone(),
    };
    let dispatcher = Dispatcher::new(registry.clone(), provider.clone(), pool.clone());
    let outcome = dispatcher.run(request, cancel.clone()).await?;

    // Teardown mirrors init: drain the pool before the final cache save.
    pool.close().await;
    if let Err(err) = cache.save().await {
        warn!("Final price cache save failed: {err}");
    }

    let scanners = if cfg.scan.scanners.is_empty() {
        registry.list().iter().map(|s| s.to_string()).collect()
    } else {
        cfg.scan.scanners.clone()
    };
    let regions = if cfg.scan.regions.is_empty() {
        provider.enabled_regions().await?
    } else {
        cfg.scan.regions.clone()
    };
    let report = ScanReport::new(
        started_at,
        accounts,
        regions,
        scanners,
        outcome.results,
        outcome.metrics,
    );
    report.write_json(output).await?;

    if outcome.cancelled {
        bail!("scan cancelled before completion; partial report written");
    }
    Ok(())
}

fn split_list(value: String) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
