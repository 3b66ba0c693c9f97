use crate::{
    error::{Result, SiftError},
    pool::WorkerPool,
    pricing::CostEstimator,
    ratelimit::{is_throttling_error, RateLimiter},
    types::{ScanOptions, ScanResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;

pub mod amis;
pub mod dynamodb_tables;
pub mod ebs_snapshots;
pub mod ebs_volumes;
pub mod ec2_instances;
pub mod elastic_ips;
pub mod iam_roles;
pub mod iam_users;
pub mod load_balancers;
pub mod nat_gateways;
pub mod opensearch_domains;
pub mod rds_instances;
pub mod s3_buckets;
pub mod security_groups;
pub mod vpcs;

/// A pluggable probe for one resource class.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Stable identifier used in CLI/config selectors and ignore lists.
    fn argument_name(&self) -> &'static str;

    /// Human-readable tag stamped onto every result this scanner emits.
    fn label(&self) -> &'static str;

    /// Account-global resource classes are scanned once per account
    /// regardless of how many regions a run spans.
    fn account_global(&self) -> bool {
        false
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>>;
}

/// Process-wide registry of compiled-in scanners, keyed by argument name.
#[derive(Default)]
pub struct ScannerRegistry {
    scanners: BTreeMap<&'static str, Arc<dyn Scanner>>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate registration is a startup error.
    pub fn register(&mut self, scanner: Arc<dyn Scanner>) -> Result<()> {
        let name = scanner.argument_name();
        if self.scanners.contains_key(name) {
            return Err(SiftError::Config(format!(
                "Scanner '{name}' registered twice"
            )));
        }
        self.scanners.insert(name, scanner);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Scanner>> {
        self.scanners
            .get(name)
            .cloned()
            .ok_or_else(|| SiftError::UnknownScanner(name.to_string()))
    }

    /// Argument names in deterministic ascending order.
    pub fn list(&self) -> Vec<&'static str> {
        self.scanners.keys().copied().collect()
    }

    pub fn all(&self) -> Vec<Arc<dyn Scanner>> {
        self.scanners.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }
}

/// Build the registry with every compiled-in scanner.
pub fn builtin_registry(
    estimator: Arc<CostEstimator>,
    pool: Arc<WorkerPool>,
) -> Result<ScannerRegistry> {
    let mut registry = ScannerRegistry::new();
    registry.register(Arc::new(amis::AmiScanner::new(estimator.clone())))?;
    registry.register(Arc::new(dynamodb_tables::DynamoDbTableScanner::new(
        estimator.clone(),
    )))?;
    registry.register(Arc::new(ebs_snapshots::EbsSnapshotScanner::new(
        estimator.clone(),
    )))?;
    registry.register(Arc::new(ebs_volumes::EbsVolumeScanner::new(
        estimator.clone(),
    )))?;
    registry.register(Arc::new(ec2_instances::Ec2InstanceScanner::new(
        estimator.clone(),
    )))?;
    registry.register(Arc::new(elastic_ips::ElasticIpScanner::new(
        estimator.clone(),
    )))?;
    registry.register(Arc::new(iam_roles::IamRoleScanner::new()))?;
    registry.register(Arc::new(iam_users::IamUserScanner::new(pool)))?;
    registry.register(Arc::new(load_balancers::LoadBalancerScanner::new(
        estimator.clone(),
    )))?;
    registry.register(Arc::new(nat_gateways::NatGatewayScanner::new(
        estimator.clone(),
    )))?;
    registry.register(Arc::new(opensearch_domains::OpenSearchDomainScanner::new(
        estimator.clone(),
    )))?;
    registry.register(Arc::new(rds_instances::RdsInstanceScanner::new(estimator)))?;
    registry.register(Arc::new(s3_buckets::S3BucketScanner::new()))?;
    registry.register(Arc::new(security_groups::SecurityGroupScanner::new()))?;
    registry.register(Arc::new(vpcs::VpcScanner::new()))?;
    Ok(registry)
}

/// Gate one remote call on the limiter and feed the outcome back. A
/// throttled call records a failure (slowing every concurrent caller of
/// the same service via the shared cooldown) and is retried up to the
/// limiter's retry budget; other errors propagate immediately.
pub(crate) async fn rate_limited<T, F, Fut>(
    limiter: &RateLimiter,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for _ in 0..limiter.max_retries().max(1) {
        limiter.wait(cancel).await?;
        match op().await {
            Ok(value) => {
                limiter.on_success();
                return Ok(value);
            }
            Err(err) if is_throttling_error(&err) => {
                limiter.on_failure();
                tracing::warn!(limiter = limiter.name(), "Throttled: {err}");
            }
            Err(err) => return Err(err),
        }
    }
    Err(SiftError::MaxRetriesExceeded {
        api: limiter.name().to_string(),
    })
}

/// Age gate shared by every scanner: resources younger than the threshold
/// are skipped. A missing creation timestamp never passes the gate.
pub(crate) fn older_than_days(created: Option<DateTime<Utc>>, days_unused: i64) -> bool {
    match created {
        Some(created) => (Utc::now() - created).num_days() >= days_unused,
        None => false,
    }
}

/// Display name: the `Name` tag when present, else the resource id.
pub(crate) fn name_from_tags(
    tags: &std::collections::HashMap<String, String>,
    fallback: &str,
) -> String {
    tags.get("Name")
        .filter(|name| !name.is_empty())
        .cloned()
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{PriceCache, PriceFilter, PricingBackend};

    #[derive(Debug)]
    struct NullBackend;

    #[async_trait]
    impl PricingBackend for NullBackend {
        async fn lookup_price(
            &self,
            _service_code: &str,
            _filters: &[PriceFilter],
        ) -> Result<Option<f64>> {
            Ok(None)
        }
    }

    async fn registry() -> ScannerRegistry {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(
            PriceCache::load(dir.path().join("costs.json")).await.unwrap(),
        );
        let estimator = Arc::new(CostEstimator::new(cache, Arc::new(NullBackend)));
        let pool = Arc::new(WorkerPool::new(2));
        builtin_registry(estimator, pool).unwrap()
    }

    #[tokio::test]
    async fn list_is_sorted_and_stable() {
        let registry = registry().await;
        let names = registry.list();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert_eq!(names, registry.list());
        assert_eq!(names.len(), 15);
    }

    #[tokio::test]
    async fn get_unknown_scanner_errors() {
        let registry = registry().await;
        let err = registry.get("floppy-disks").err().unwrap();
        assert!(matches!(err, SiftError::UnknownScanner(_)));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let registry = registry().await;
        let mut fresh = ScannerRegistry::new();
        let scanner = registry.get("vpcs").unwrap();
        fresh.register(scanner.clone()).unwrap();
        let err = fresh.register(scanner).unwrap_err();
        assert!(matches!(err, SiftError::Config(_)));
    }

    #[tokio::test]
    async fn iam_scanners_are_account_global() {
        let registry = registry().await;
        assert!(registry.get("iam-users").unwrap().account_global());
        assert!(registry.get("iam-roles").unwrap().account_global());
        assert!(!registry.get("ebs-volumes").unwrap().account_global());
    }

    #[test]
    fn age_gate_requires_a_timestamp() {
        assert!(!older_than_days(None, 90));
        assert!(older_than_days(
            Some(Utc::now() - chrono::Duration::days(120)),
            90
        ));
        assert!(!older_than_days(
            Some(Utc::now() - chrono::Duration::days(30)),
            90
        ));
    }
}
