use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod estimator;

pub use cache::{PriceCache, DEFAULT_CACHE_PATH};
pub use estimator::CostEstimator;

/// Resource classes the estimator can price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Ec2Instance,
    EbsVolume,
    EbsSnapshot,
    ElasticIp,
    LoadBalancer,
    NatGateway,
    RdsInstance,
    DynamoDbTable,
    OpenSearchDomain,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceType::Ec2Instance => "EC2Instance",
            ResourceType::EbsVolume => "EBSVolume",
            ResourceType::EbsSnapshot => "EBSSnapshot",
            ResourceType::ElasticIp => "ElasticIP",
            ResourceType::LoadBalancer => "LoadBalancer",
            ResourceType::NatGateway => "NATGateway",
            ResourceType::RdsInstance => "RDSInstance",
            ResourceType::DynamoDbTable => "DynamoDBTable",
            ResourceType::OpenSearchDomain => "OpenSearchDomain",
        };
        f.write_str(name)
    }
}

/// Sizing is polymorphic: storage classes carry a size in GB, compute
/// classes carry the instance-class string. A mismatch at the estimator
/// boundary is `InvalidSizeType`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSize {
    Gigabytes(i64),
    InstanceClass(String),
}

/// Query object handed to the estimator for one resource.
#[derive(Debug, Clone)]
pub struct ResourceCostConfig {
    pub resource_type: ResourceType,
    pub resource_size: ResourceSize,
    pub region: String,
    pub creation_time: Option<DateTime<Utc>>,
    pub volume_type: Option<String>,
    pub lb_type: Option<String>,
    pub engine: Option<String>,
    pub processed_gb: Option<f64>,
    pub instance_count: Option<i64>,
    pub storage_size: Option<i64>,
    pub read_capacity: Option<i64>,
    pub write_capacity: Option<i64>,
}

impl ResourceCostConfig {
    pub fn new(resource_type: ResourceType, resource_size: ResourceSize, region: &str) -> Self {
        Self {
            resource_type,
            resource_size,
            region: region.to_string(),
            creation_time: None,
            volume_type: None,
            lb_type: None,
            engine: None,
            processed_gb: None,
            instance_count: None,
            storage_size: None,
            read_capacity: None,
            write_capacity: None,
        }
    }
}

/// USD cost rates for one resource. Rates obey fixed display conventions:
/// 24h days, 30-day months, 365-day years. Everything is rounded to four
/// decimals at this boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub hourly_rate: f64,
    pub daily_rate: f64,
    pub monthly_rate: f64,
    pub yearly_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours_running: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<f64>,
}

impl CostBreakdown {
    /// Derive the full breakdown from an hourly rate. `hours_running` is
    /// absent for classes with no meaningful creation instant.
    pub fn from_hourly(hourly_rate: f64, hours_running: Option<f64>) -> Self {
        let hourly = round4(hourly_rate);
        let daily = round4(hourly * 24.0);
        Self {
            hourly_rate: hourly,
            daily_rate: daily,
            monthly_rate: round4(daily * 30.0),
            yearly_rate: round4(daily * 365.0),
            hours_running: hours_running.map(round4),
            lifetime: hours_running.map(|hours| round4(hourly * hours)),
        }
    }
}

/// Four-decimal rounding, half away from zero.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// One attribute constraint of a price query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceFilter {
    pub field: String,
    pub value: String,
}

impl PriceFilter {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// The provider price query collaborator. Implementations resolve a filter
/// set to the first on-demand USD per-unit price, or `None` when no product
/// matches.
#[async_trait]
pub trait PricingBackend: Send + Sync + std::fmt::Debug {
    async fn lookup_price(
        &self,
        service_code: &str,
        filters: &[PriceFilter],
    ) -> Result<Option<f64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round4_is_half_away_from_zero() {
        assert_eq!(round4(0.00005), 0.0001);
        assert_eq!(round4(-0.00005), -0.0001);
        assert_eq!(round4(1.23456), 1.2346);
        assert_eq!(round4(1.23444), 1.2344);
    }

    #[test]
    fn breakdown_obeys_rate_invariants() {
        let cost = CostBreakdown::from_hourly(0.0137, Some(2880.0));
        assert_eq!(cost.daily_rate, round4(cost.hourly_rate * 24.0));
        assert_eq!(cost.monthly_rate, round4(cost.daily_rate * 30.0));
        assert_eq!(cost.yearly_rate, round4(cost.daily_rate * 365.0));
        assert_eq!(cost.lifetime, Some(round4(cost.hourly_rate * 2880.0)));
    }

    #[test]
    fn breakdown_without_creation_instant_omits_lifetime() {
        let cost = CostBreakdown::from_hourly(0.005, None);
        assert!(cost.hours_running.is_none());
        assert!(cost.lifetime.is_none());
        assert_eq!(cost.daily_rate, 0.12);
    }

    #[test]
    fn resource_type_names_are_stable_cache_key_components() {
        assert_eq!(ResourceType::EbsVolume.to_string(), "EBSVolume");
        assert_eq!(ResourceType::NatGateway.to_string(), "NATGateway");
        assert_eq!(ResourceType::ElasticIp.to_string(), "ElasticIP");
    }
}
