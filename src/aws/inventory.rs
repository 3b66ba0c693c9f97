//! Offline session provider backed by a static inventory. Serves example
//! data for demo runs and gives the integration tests a deterministic
//! world to scan; production deployments supply their own
//! `SessionProvider` wired to real provider credentials.

use crate::{
    aws::{
        metrics::MetricConfig,
        types::*,
        CloudSession, ComputeClient, DatabaseClient, IdentityClient, LoadBalancingClient,
        MetricsClient, ObjectStorageClient, SearchClient, SessionProvider, TableClient,
    },
    error::{Result, SiftError},
    types::Account,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, sync::Arc};

/// Everything one (account, region) pair contains.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionInventory {
    pub instances: Vec<Instance>,
    pub volumes: Vec<Volume>,
    pub snapshots: Vec<Snapshot>,
    pub images: Vec<Image>,
    pub addresses: Vec<Address>,
    pub nat_gateways: Vec<NatGatewayInfo>,
    pub security_groups: Vec<SecurityGroupInfo>,
    pub network_interfaces: Vec<NetworkInterface>,
    pub vpcs: Vec<VpcInfo>,
    pub load_balancers: Vec<LoadBalancerInfo>,
    /// Registered target counts keyed by load balancer ARN.
    pub load_balancer_targets: HashMap<String, usize>,
    pub db_instances: Vec<DbInstanceInfo>,
    pub tables: Vec<TableInfo>,
    pub search_domains: Vec<SearchDomainInfo>,
    pub buckets: Vec<BucketInfo>,
    pub users: Vec<UserInfo>,
    pub access_keys: Vec<AccessKeyInfo>,
    pub access_key_last_used: HashMap<String, DateTime<Utc>>,
    pub roles: Vec<RoleInfo>,
    /// Metric scalars keyed `"<MetricName>:<first dimension value>"`.
    pub metrics: HashMap<String, f64>,
    /// Raw datapoint series, same key scheme.
    pub metric_series: HashMap<String, Vec<f64>>,
}

/// Whole-deployment inventory as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub accounts: Vec<Account>,
    pub regions: Vec<String>,
    /// Keyed `"<account id>/<region>"`. Missing pairs scan as empty.
    pub inventories: HashMap<String, RegionInventory>,
    /// Unit prices keyed by product family (or capacity group), consumed
    /// by `StaticPricingBackend`.
    pub prices: HashMap<String, f64>,
}

impl Inventory {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let inventory = serde_json::from_str(&content)?;
        Ok(inventory)
    }
}

/// `SessionProvider` over a static inventory.
#[derive(Debug, Default)]
pub struct StaticSessionProvider {
    inventory: Inventory,
}

impl StaticSessionProvider {
    pub fn new(inventory: Inventory) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.inventory.accounts.clone())
    }

    async fn enabled_regions(&self) -> Result<Vec<String>> {
        Ok(self.inventory.regions.clone())
    }

    async fn connect(&self, account: &Account, region: &str) -> Result<Arc<dyn CloudSession>> {
        let key = format!("{}/{}", account.id, region);
        let data = self
            .inventory
            .inventories
            .get(&key)
            .cloned()
            .unwrap_or_default();
        Ok(Arc::new(StaticSession {
            account_id: account.id.clone(),
            region: region.to_string(),
            data: Arc::new(data),
        }))
    }
}

struct StaticSession {
    account_id: String,
    region: String,
    data: Arc<RegionInventory>,
}

impl CloudSession for StaticSession {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn compute(&self) -> Arc<dyn ComputeClient> {
        Arc::new(StaticClient(self.data.clone()))
    }

    fn load_balancing(&self) -> Arc<dyn LoadBalancingClient> {
        Arc::new(StaticClient(self.data.clone()))
    }

    fn database(&self) -> Arc<dyn DatabaseClient> {
        Arc::new(StaticClient(self.data.clone()))
    }

    fn tables(&self) -> Arc<dyn TableClient> {
        Arc::new(StaticClient(self.data.clone()))
    }

    fn search(&self) -> Arc<dyn SearchClient> {
        Arc::new(StaticClient(self.data.clone()))
    }

    fn object_storage(&self) -> Arc<dyn ObjectStorageClient> {
        Arc::new(StaticClient(self.data.clone()))
    }

    fn identity(&self) -> Arc<dyn IdentityClient> {
        Arc::new(StaticClient(self.data.clone()))
    }

    fn metrics(&self) -> Arc<dyn MetricsClient> {
        Arc::new(StaticClient(self.data.clone()))
    }
}

struct StaticClient(Arc<RegionInventory>);

#[async_trait]
impl ComputeClient for StaticClient {
    async fn describe_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.0.instances.clone())
    }

    async fn describe_volumes(&self) -> Result<Vec<Volume>> {
        Ok(self.0.volumes.clone())
    }

    async fn describe_snapshots(&self) -> Result<Vec<Snapshot>> {
        Ok(self.0.snapshots.clone())
    }

    async fn describe_images(&self) -> Result<Vec<Image>> {
        Ok(self.0.images.clone())
    }

    async fn describe_addresses(&self) -> Result<Vec<Address>> {
        Ok(self.0.addresses.clone())
    }

    async fn describe_nat_gateways(&self) -> Result<Vec<NatGatewayInfo>> {
        Ok(self.0.nat_gateways.clone())
    }

    async fn describe_security_groups(&self) -> Result<Vec<SecurityGroupInfo>> {
        Ok(self.0.security_groups.clone())
    }

    async fn describe_network_interfaces(&self) -> Result<Vec<NetworkInterface>> {
        Ok(self.0.network_interfaces.clone())
    }

    async fn describe_vpcs(&self) -> Result<Vec<VpcInfo>> {
        Ok(self.0.vpcs.clone())
    }
}

#[async_trait]
impl LoadBalancingClient for StaticClient {
    async fn describe_load_balancers(&self) -> Result<Vec<LoadBalancerInfo>> {
        Ok(self.0.load_balancers.clone())
    }

    async fn target_count(&self, lb_arn: &str) -> Result<usize> {
        Ok(self.0.load_balancer_targets.get(lb_arn).copied().unwrap_or(0))
    }
}

#[async_trait]
impl DatabaseClient for StaticClient {
    async fn describe_db_instances(&self) -> Result<Vec<DbInstanceInfo>> {
        Ok(self.0.db_instances.clone())
    }
}

#[async_trait]
impl TableClient for StaticClient {
    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        Ok(self.0.tables.clone())
    }
}

#[async_trait]
impl SearchClient for StaticClient {
    async fn list_domains(&self) -> Result<Vec<SearchDomainInfo>> {
        Ok(self.0.search_domains.clone())
    }
}

#[async_trait]
impl ObjectStorageClient for StaticClient {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        Ok(self.0.buckets.clone())
    }
}

#[async_trait]
impl IdentityClient for StaticClient {
    async fn list_users(&self) -> Result<Vec<UserInfo>> {
        Ok(self.0.users.clone())
    }

    async fn list_access_keys(&self, user_name: &str) -> Result<Vec<AccessKeyInfo>> {
        Ok(self
            .0
            .access_keys
            .iter()
            .filter(|key| key.user_name == user_name)
            .cloned()
            .collect())
    }

    async fn access_key_last_used(
        &self,
        access_key_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self.0.access_key_last_used.get(access_key_id).copied())
    }

    async fn list_roles(&self) -> Result<Vec<RoleInfo>> {
        Ok(self.0.roles.clone())
    }
}

fn metric_key(config: &MetricConfig) -> String {
    let dimension = config
        .dimensions
        .first()
        .map(|(_, value)| value.as_str())
        .unwrap_or("");
    format!("{}:{}", config.metric_name, dimension)
}

#[async_trait]
impl MetricsClient for StaticClient {
    async fn metric_statistic(&self, config: &MetricConfig) -> Result<Option<f64>> {
        Ok(self.0.metrics.get(&metric_key(config)).copied())
    }

    async fn metric_batch(
        &self,
        configs: &[MetricConfig],
    ) -> Result<HashMap<String, f64>> {
        let mut values = HashMap::new();
        for config in configs {
            if let Some(value) = self.0.metrics.get(&metric_key(config)) {
                values.insert(config.id.clone(), *value);
            }
        }
        Ok(values)
    }

    async fn metric_series(&self, config: &MetricConfig) -> Result<Vec<f64>> {
        Ok(self
            .0
            .metric_series
            .get(&metric_key(config))
            .cloned()
            .unwrap_or_default())
    }
}

/// Pricing backend over a static unit-price table, keyed by the query's
/// `productFamily` (or capacity `group`) filter.
#[derive(Debug, Clone, Default)]
pub struct StaticPricingBackend {
    prices: HashMap<String, f64>,
}

impl StaticPricingBackend {
    pub fn new(prices: HashMap<String, f64>) -> Self {
        Self { prices }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl crate::pricing::PricingBackend for StaticPricingBackend {
    async fn lookup_price(
        &self,
        _service_code: &str,
        filters: &[crate::pricing::PriceFilter],
    ) -> Result<Option<f64>> {
        let key = filters
            .iter()
            .find(|filter| filter.field == "group")
            .or_else(|| filters.iter().find(|filter| filter.field == "productFamily"))
            .map(|filter| filter.value.clone())
            .ok_or_else(|| {
                SiftError::Provider("price query carries no product family".to_string())
            })?;
        Ok(self.prices.get(&key).copied())
    }
}
