//! Shared harness for the scan scenario tests: builds a dispatcher over a
//! static inventory, with helpers to seed prices and inject faults.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use cloudsift::{
    aws::{
        inventory::{Inventory, RegionInventory, StaticPricingBackend, StaticSessionProvider},
        types::{Instance, Volume},
        CloudSession, ComputeClient, MetricConfig, MetricsClient, SessionProvider,
    },
    dispatcher::Dispatcher,
    error::{Result, SiftError},
    pool::WorkerPool,
    pricing::{CostEstimator, PriceCache},
    scanners::builtin_registry,
    types::Account,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub provider: Arc<dyn SessionProvider>,
    pub pool: Arc<WorkerPool>,
    pub cache: Arc<PriceCache>,
    // Keeps the cache directory alive for the test's duration.
    _cache_dir: tempfile::TempDir,
}

pub async fn harness(inventory: Inventory, cached_prices: &[(&str, f64)]) -> Harness {
    harness_with_provider(Arc::new(StaticSessionProvider::new(inventory)), cached_prices).await
}

pub async fn harness_with_provider(
    provider: Arc<dyn SessionProvider>,
    cached_prices: &[(&str, f64)],
) -> Harness {
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(
        PriceCache::load(cache_dir.path().join("costs.json"))
            .await
            .unwrap(),
    );
    for (key, price) in cached_prices {
        cache.set(key.to_string(), *price).await;
    }

    let estimator = Arc::new(CostEstimator::new(
        cache.clone(),
        Arc::new(StaticPricingBackend::empty()),
    ));
    let pool = Arc::new(WorkerPool::new(4));
    let registry = Arc::new(builtin_registry(estimator, pool.clone()).unwrap());
    let dispatcher = Dispatcher::new(registry, provider.clone(), pool.clone());

    Harness {
        dispatcher,
        provider,
        pool,
        cache,
        _cache_dir: cache_dir,
    }
}

pub fn account(id: &str) -> Account {
    Account::new(id, "test-account")
}

pub fn empty_inventory(account_id: &str, regions: &[&str]) -> Inventory {
    Inventory {
        accounts: vec![account(account_id)],
        regions: regions.iter().map(|r| r.to_string()).collect(),
        inventories: HashMap::new(),
        prices: HashMap::new(),
    }
}

pub fn available_volume(id: &str, size_gb: i64, age_days: i64) -> Volume {
    Volume {
        id: id.to_string(),
        state: "available".to_string(),
        size_gb,
        volume_type: "gp2".to_string(),
        create_time: Some(Utc::now() - Duration::days(age_days)),
        attached_instance_ids: Vec::new(),
        tags: HashMap::new(),
    }
}

pub fn stopped_instance(id: &str, launched_days_ago: i64, stopped_days_ago: i64) -> Instance {
    Instance {
        id: id.to_string(),
        name: None,
        state: "stopped".to_string(),
        instance_type: "t3.medium".to_string(),
        launch_time: Some(Utc::now() - Duration::days(launched_days_ago)),
        state_transition_time: Some(Utc::now() - Duration::days(stopped_days_ago)),
        image_id: None,
        vpc_id: None,
        volume_ids: Vec::new(),
        tags: HashMap::new(),
    }
}

pub fn region_key(account_id: &str, region: &str) -> String {
    format!("{account_id}/{region}")
}

/// Session provider that fails every `period`-th remote call with a
/// provider throttling error, shared across all sessions it opens.
pub struct ThrottlingSessionProvider {
    inner: StaticSessionProvider,
    calls: Arc<AtomicU32>,
    throttles: Arc<AtomicU32>,
    period: u32,
}

impl ThrottlingSessionProvider {
    pub fn new(inventory: Inventory, period: u32) -> Self {
        Self {
            inner: StaticSessionProvider::new(inventory),
            calls: Arc::new(AtomicU32::new(0)),
            throttles: Arc::new(AtomicU32::new(0)),
            period,
        }
    }

    pub fn throttle_count(&self) -> u32 {
        self.throttles.load(Ordering::SeqCst)
    }

    fn gate(&self) -> Gate {
        Gate {
            calls: self.calls.clone(),
            throttles: self.throttles.clone(),
            period: self.period,
        }
    }
}

#[derive(Clone)]
struct Gate {
    calls: Arc<AtomicU32>,
    throttles: Arc<AtomicU32>,
    period: u32,
}

impl Gate {
    fn check(&self) -> Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.period == 0 {
            self.throttles.fetch_add(1, Ordering::SeqCst);
            return Err(SiftError::Provider(
                "Throttling: Rate exceeded".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionProvider for ThrottlingSessionProvider {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.inner.list_accounts().await
    }

    async fn enabled_regions(&self) -> Result<Vec<String>> {
        self.inner.enabled_regions().await
    }

    async fn connect(&self, account: &Account, region: &str) -> Result<Arc<dyn CloudSession>> {
        let session = self.inner.connect(account, region).await?;
        Ok(Arc::new(ThrottlingSession {
            inner: session,
            gate: self.gate(),
        }))
    }
}

struct ThrottlingSession {
    inner: Arc<dyn CloudSession>,
    gate: Gate,
}

impl CloudSession for ThrottlingSession {
    fn account_id(&self) -> &str {
        self.inner.account_id()
    }

    fn region(&self) -> &str {
        self.inner.region()
    }

    fn compute(&self) -> Arc<dyn ComputeClient> {
        Arc::new(ThrottlingCompute {
            inner: self.inner.compute(),
            gate: self.gate.clone(),
        })
    }

    fn load_balancing(&self) -> Arc<dyn cloudsift::aws::LoadBalancingClient> {
        self.inner.load_balancing()
    }

    fn database(&self) -> Arc<dyn cloudsift::aws::DatabaseClient> {
        self.inner.database()
    }

    fn tables(&self) -> Arc<dyn cloudsift::aws::TableClient> {
        self.inner.tables()
    }

    fn search(&self) -> Arc<dyn cloudsift::aws::SearchClient> {
        self.inner.search()
    }

    fn object_storage(&self) -> Arc<dyn cloudsift::aws::ObjectStorageClient> {
        self.inner.object_storage()
    }

    fn identity(&self) -> Arc<dyn cloudsift::aws::IdentityClient> {
        self.inner.identity()
    }

    fn metrics(&self) -> Arc<dyn MetricsClient> {
        Arc::new(ThrottlingMetrics {
            inner: self.inner.metrics(),
            gate: self.gate.clone(),
        })
    }
}

struct ThrottlingCompute {
    inner: Arc<dyn ComputeClient>,
    gate: Gate,
}

#[async_trait]
impl ComputeClient for ThrottlingCompute {
    async fn describe_instances(&self) -> Result<Vec<Instance>> {
        self.gate.check()?;
        self.inner.describe_instances().await
    }

    async fn describe_volumes(&self) -> Result<Vec<Volume>> {
        self.gate.check()?;
        self.inner.describe_volumes().await
    }

    async fn describe_snapshots(&self) -> Result<Vec<cloudsift::aws::types::Snapshot>> {
        self.gate.check()?;
        self.inner.describe_snapshots().await
    }

    async fn describe_images(&self) -> Result<Vec<cloudsift::aws::types::Image>> {
        self.gate.check()?;
        self.inner.describe_images().await
    }

    async fn describe_addresses(&self) -> Result<Vec<cloudsift::aws::types::Address>> {
        self.gate.check()?;
        self.inner.describe_addresses().await
    }

    async fn describe_nat_gateways(
        &self,
    ) -> Result<Vec<cloudsift::aws::types::NatGatewayInfo>> {
        self.gate.check()?;
        self.inner.describe_nat_gateways().await
    }

    async fn describe_security_groups(
        &self,
    ) -> Result<Vec<cloudsift::aws::types::SecurityGroupInfo>> {
        self.gate.check()?;
        self.inner.describe_security_groups().await
    }

    async fn describe_network_interfaces(
        &self,
    ) -> Result<Vec<cloudsift::aws::types::NetworkInterface>> {
        self.gate.check()?;
        self.inner.describe_network_interfaces().await
    }

    async fn describe_vpcs(&self) -> Result<Vec<cloudsift::aws::types::VpcInfo>> {
        self.gate.check()?;
        self.inner.describe_vpcs().await
    }
}

struct ThrottlingMetrics {
    inner: Arc<dyn MetricsClient>,
    gate: Gate,
}

#[async_trait]
impl MetricsClient for ThrottlingMetrics {
    async fn metric_statistic(&self, config: &MetricConfig) -> Result<Option<f64>> {
        self.gate.check()?;
        self.inner.metric_statistic(config).await
    }

    async fn metric_batch(
        &self,
        configs: &[MetricConfig],
    ) -> Result<HashMap<String, f64>> {
        self.gate.check()?;
        self.inner.metric_batch(configs).await
    }

    async fn metric_series(&self, config: &MetricConfig) -> Result<Vec<f64>> {
        self.gate.check()?;
        self.inner.metric_series(config).await
    }
}

/// Session provider whose `connect` takes a fixed delay, so a run has
/// measurable in-flight time to cancel into.
pub struct SlowSessionProvider {
    inner: StaticSessionProvider,
    delay: std::time::Duration,
}

impl SlowSessionProvider {
    pub fn new(inventory: Inventory, delay: std::time::Duration) -> Self {
        Self {
            inner: StaticSessionProvider::new(inventory),
            delay,
        }
    }
}

#[async_trait]
impl SessionProvider for SlowSessionProvider {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.inner.list_accounts().await
    }

    async fn enabled_regions(&self) -> Result<Vec<String>> {
        self.inner.enabled_regions().await
    }

    async fn connect(&self, account: &Account, region: &str) -> Result<Arc<dyn CloudSession>> {
        tokio::time::sleep(self.delay).await;
        self.inner.connect(account, region).await
    }
}
