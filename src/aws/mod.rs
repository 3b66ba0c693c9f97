//! The boundary toward the provider. Credential acquisition, role
//! chaining, pagination, and the wire protocol all live behind these
//! traits; the engine consumes plain resource descriptions.

use crate::{error::Result, types::Account};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};

pub mod inventory;
pub mod metrics;
pub mod types;

pub use metrics::{MetricConfig, Statistic};
pub use types::*;

/// EC2-family lookups. Implementations return fully paginated listings.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    async fn describe_instances(&self) -> Result<Vec<Instance>>;
    async fn describe_volumes(&self) -> Result<Vec<Volume>>;
    /// Snapshots owned by the calling account.
    async fn describe_snapshots(&self) -> Result<Vec<Snapshot>>;
    /// Images owned by the calling account.
    async fn describe_images(&self) -> Result<Vec<Image>>;
    async fn describe_addresses(&self) -> Result<Vec<Address>>;
    async fn describe_nat_gateways(&self) -> Result<Vec<NatGatewayInfo>>;
    async fn describe_security_groups(&self) -> Result<Vec<SecurityGroupInfo>>;
    async fn describe_network_interfaces(&self) -> Result<Vec<NetworkInterface>>;
    async fn describe_vpcs(&self) -> Result<Vec<VpcInfo>>;
}

#[async_trait]
pub trait LoadBalancingClient: Send + Sync {
    async fn describe_load_balancers(&self) -> Result<Vec<LoadBalancerInfo>>;
    /// Healthy-or-not registered targets across the balancer's target
    /// groups.
    async fn target_count(&self, lb_arn: &str) -> Result<usize>;
}

#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn describe_db_instances(&self) -> Result<Vec<DbInstanceInfo>>;
}

#[async_trait]
pub trait TableClient: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<TableInfo>>;
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn list_domains(&self) -> Result<Vec<SearchDomainInfo>>;
}

#[async_trait]
pub trait ObjectStorageClient: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;
}

#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn list_users(&self) -> Result<Vec<UserInfo>>;
    async fn list_access_keys(&self, user_name: &str) -> Result<Vec<AccessKeyInfo>>;
    async fn access_key_last_used(&self, access_key_id: &str)
        -> Result<Option<DateTime<Utc>>>;
    async fn list_roles(&self) -> Result<Vec<RoleInfo>>;
}

/// CloudWatch-equivalent metric lookups.
#[async_trait]
pub trait MetricsClient: Send + Sync {
    /// Scalar for one metric over its window, `None` when the provider has
    /// no datapoints.
    async fn metric_statistic(&self, config: &MetricConfig) -> Result<Option<f64>>;
    /// Batched lookup mapping config ids to scalars. Ids with no
    /// datapoints may be omitted.
    async fn metric_batch(&self, configs: &[MetricConfig]) -> Result<HashMap<String, f64>>;
    /// Raw datapoint series for one metric, for callers that need the
    /// distribution rather than a single aggregate.
    async fn metric_series(&self, config: &MetricConfig) -> Result<Vec<f64>>;
}

/// A region/account-scoped auth handle vending the per-service clients.
pub trait CloudSession: Send + Sync {
    fn account_id(&self) -> &str;
    fn region(&self) -> &str;
    fn compute(&self) -> Arc<dyn ComputeClient>;
    fn load_balancing(&self) -> Arc<dyn LoadBalancingClient>;
    fn database(&self) -> Arc<dyn DatabaseClient>;
    fn tables(&self) -> Arc<dyn TableClient>;
    fn search(&self) -> Arc<dyn SearchClient>;
    fn object_storage(&self) -> Arc<dyn ObjectStorageClient>;
    fn identity(&self) -> Arc<dyn IdentityClient>;
    fn metrics(&self) -> Arc<dyn MetricsClient>;
}

/// The credential/enumeration collaborator: lists accounts and enabled
/// regions, and opens sessions (assuming the scanner role where the
/// deployment requires it).
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn list_accounts(&self) -> Result<Vec<Account>>;
    async fn enabled_regions(&self) -> Result<Vec<String>>;
    async fn connect(&self, account: &Account, region: &str) -> Result<Arc<dyn CloudSession>>;
}
