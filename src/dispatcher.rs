use crate::{
    aws::SessionProvider,
    error::{Result, SiftError},
    pool::{Task, WorkerPool},
    scanners::{Scanner, ScannerRegistry},
    types::{Account, IgnoreFilters, ScanMetrics, ScanOptions, ScanResult},
};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One scan request: which accounts, regions, and scanners, plus the
/// unused-age threshold and post-scan ignore lists.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub accounts: Vec<Account>,
    /// Empty means every enabled region.
    pub regions: Vec<String>,
    /// Scanner argument names; empty means every registered scanner.
    pub scanners: Vec<String>,
    pub days_unused: i64,
    pub ignore: IgnoreFilters,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub results: Vec<ScanResult>,
    pub metrics: ScanMetrics,
    /// Set when the run was interrupted; `results` then holds whatever was
    /// aggregated before the cancellation was observed.
    pub cancelled: bool,
}

/// Fans the (account, region, scanner) cartesian product out over the
/// worker pool and aggregates the findings.
pub struct Dispatcher {
    registry: Arc<ScannerRegistry>,
    provider: Arc<dyn SessionProvider>,
    pool: Arc<WorkerPool>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ScannerRegistry>,
        provider: Arc<dyn SessionProvider>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            registry,
            provider,
            pool,
        }
    }

    pub async fn run(
        &self,
        request: ScanRequest,
        cancel: CancellationToken,
    ) -> Result<ScanOutcome> {
        let started = Instant::now();

        // Configuration problems surface before any scan begins.
        let scanners = self.resolve_scanners(&request.scanners)?;
        let regions = self.resolve_regions(&request.regions).await?;

        let results: Arc<Mutex<Vec<ScanResult>>> = Arc::new(Mutex::new(Vec::new()));
        // Account-global scanners run once per account, owned by this run.
        let scanned_global: Arc<Mutex<HashSet<(String, String)>>> =
            Arc::new(Mutex::new(HashSet::new()));
        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let busy_ms = Arc::new(AtomicU64::new(0));

        let mut tasks: Vec<Task> = Vec::new();
        for account in &request.accounts {
            for region in &regions {
                for scanner in &scanners {
                    tasks.push(self.build_task(
                        account.clone(),
                        region.clone(),
                        scanner.clone(),
                        request.days_unused,
                        cancel.clone(),
                        results.clone(),
                        scanned_global.clone(),
                        completed.clone(),
                        failed.clone(),
                        busy_ms.clone(),
                    ));
                }
            }
        }
        let total_tasks = tasks.len();
        info!(
            accounts = request.accounts.len(),
            regions = regions.len(),
            scanners = scanners.len(),
            total_tasks,
            "Dispatching scan"
        );

        self.pool.execute_tasks(tasks).await?;

        let elapsed = started.elapsed();
        let completed = completed.load(Ordering::SeqCst);
        let failed = failed.load(Ordering::SeqCst);
        let busy = busy_ms.load(Ordering::SeqCst);
        let metrics = ScanMetrics {
            total_tasks,
            completed_tasks: completed,
            failed_tasks: failed,
            peak_workers: self.pool.metrics().peak_workers,
            avg_execution_time_ms: if completed > 0 {
                busy as f64 / completed as f64
            } else {
                0.0
            },
            total_run_time_ms: elapsed.as_millis() as u64,
            tasks_per_second: if elapsed.as_secs_f64() > 0.0 {
                completed as f64 / elapsed.as_secs_f64()
            } else {
                0.0
            },
        };

        let aggregated = std::mem::take(&mut *results.lock().unwrap());
        let filtered = request.ignore.apply(aggregated);
        info!(
            results = filtered.len(),
            failed_tasks = failed,
            elapsed_ms = metrics.total_run_time_ms,
            "Scan complete"
        );

        Ok(ScanOutcome {
            results: filtered,
            metrics,
            cancelled: cancel.is_cancelled(),
        })
    }

    fn resolve_scanners(&self, selected: &[String]) -> Result<Vec<Arc<dyn Scanner>>> {
        if selected.is_empty() {
            return Ok(self.registry.all());
        }
        selected
            .iter()
            .map(|name| self.registry.get(name))
            .collect()
    }

    async fn resolve_regions(&self, selected: &[String]) -> Result<Vec<String>> {
        let enabled = self.provider.enabled_regions().await?;
        if selected.is_empty() {
            return Ok(enabled);
        }
        for region in selected {
            if !enabled.contains(region) {
                return Err(SiftError::UnknownRegion(region.clone()));
            }
        }
        Ok(selected.to_vec())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_task(
        &self,
        account: Account,
        region: String,
        scanner: Arc<dyn Scanner>,
        days_unused: i64,
        cancel: CancellationToken,
        results: Arc<Mutex<Vec<ScanResult>>>,
        scanned_global: Arc<Mutex<HashSet<(String, String)>>>,
        completed: Arc<AtomicUsize>,
        failed: Arc<AtomicUsize>,
        busy_ms: Arc<AtomicU64>,
    ) -> Task {
        let provider = self.provider.clone();
        Box::new(move |_pool_cancel| {
            Box::pin(async move {
                if cancel.is_cancelled() {
                    return Err(SiftError::Cancelled);
                }

                // An account-global class is scanned once per account no
                // matter how many regions the run spans.
                if scanner.account_global() {
                    let key = (account.id.clone(), scanner.argument_name().to_string());
                    if !scanned_global.lock().unwrap().insert(key) {
                        completed.fetch_add(1, Ordering::SeqCst);
                        return Ok(());
                    }
                }

                let task_started = Instant::now();
                let session = match provider.connect(&account, &region).await {
                    Ok(session) => session,
                    Err(err) => {
                        // Auth problems skip this triple; the rest of the
                        // run proceeds.
                        warn!(
                            account = %account.id,
                            region = %region,
                            scanner = scanner.argument_name(),
                            "Skipping: {err}"
                        );
                        completed.fetch_add(1, Ordering::SeqCst);
                        return Ok(());
                    }
                };

                let options = ScanOptions {
                    region: region.clone(),
                    account_id: account.id.clone(),
                    days_unused,
                    session,
                    cancel: cancel.clone(),
                };

                info!(
                    scanner = scanner.argument_name(),
                    account = %account.id,
                    region = %region,
                    "Scanner starting"
                );
                match scanner.scan(&options).await {
                    Ok(found) => {
                        info!(
                            scanner = scanner.argument_name(),
                            account = %account.id,
                            region = %region,
                            results = found.len(),
                            "Scanner finished"
                        );
                        if !found.is_empty() {
                            results.lock().unwrap().extend(found);
                        }
                        busy_ms.fetch_add(
                            task_started.elapsed().as_millis() as u64,
                            Ordering::SeqCst,
                        );
                        completed.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                    Err(err) => {
                        error!(
                            scanner = scanner.argument_name(),
                            account = %account.id,
                            region = %region,
                            "Scanner failed: {err}"
                        );
                        failed.fetch_add(1, Ordering::SeqCst);
                        completed.fetch_add(1, Ordering::SeqCst);
                        Err(err)
                    }
                }
            })
        })
    }
}
