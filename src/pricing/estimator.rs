use crate::{
    error::{Result, SiftError},
    pricing::{
        CostBreakdown, PriceCache, PriceFilter, PricingBackend, ResourceCostConfig, ResourceSize,
        ResourceType,
    },
    ratelimit::{self, ServiceLimiter, ServiceLimiterConfig},
};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Unattached elastic IPs bill at a fixed rate; no price query needed.
pub const ELASTIC_IP_HOURLY_USD: f64 = 0.005;
/// Documented fallback when the NAT gateway price lookup comes back empty.
pub const NAT_GATEWAY_FALLBACK_HOURLY_USD: f64 = 0.045;

const HOURS_PER_MONTH: f64 = 730.0;

/// Translates a `ResourceCostConfig` into a `CostBreakdown`, backed by the
/// persistent price cache and the provider price query collaborator. Its
/// own lookups are paced by a dedicated service limiter.
#[derive(Debug)]
pub struct CostEstimator {
    cache: Arc<PriceCache>,
    backend: Arc<dyn PricingBackend>,
    limiter: Arc<ServiceLimiter>,
}

impl CostEstimator {
    pub fn new(cache: Arc<PriceCache>, backend: Arc<dyn PricingBackend>) -> Self {
        let limiter = ratelimit::service_limiter(
            "pricing",
            ServiceLimiterConfig {
                default_requests_per_second: 5.0,
                ..Default::default()
            },
        );
        Self {
            cache,
            backend,
            limiter,
        }
    }

    pub fn cache(&self) -> Arc<PriceCache> {
        self.cache.clone()
    }

    /// Price one resource. `PriceNotFound` means the caller should emit the
    /// finding without a cost estimate; only the NAT gateway class carries
    /// a documented default.
    pub async fn calculate_cost(
        &self,
        cancel: &CancellationToken,
        config: &ResourceCostConfig,
    ) -> Result<CostBreakdown> {
        let hourly = self.hourly_rate(cancel, config).await?;
        let hours_running = config.creation_time.map(|created| {
            (Utc::now() - created).num_seconds().max(0) as f64 / 3600.0
        });
        Ok(CostBreakdown::from_hourly(hourly, hours_running))
    }

    async fn hourly_rate(
        &self,
        cancel: &CancellationToken,
        config: &ResourceCostConfig,
    ) -> Result<f64> {
        let location = region_location(&config.region)?;

        match config.resource_type {
            ResourceType::ElasticIp => Ok(ELASTIC_IP_HOURLY_USD),

            ResourceType::Ec2Instance => {
                let class = instance_class(config)?;
                let key = format!("EC2Instance_{}_{}", config.region, class);
                let filters = vec![
                    PriceFilter::new("operatingSystem", "Linux"),
                    PriceFilter::new("instanceType", class),
                    PriceFilter::new("location", location),
                    PriceFilter::new("tenancy", "Shared"),
                    PriceFilter::new("preInstalledSw", "NA"),
                    PriceFilter::new("capacityStatus", "Used"),
                    PriceFilter::new("productFamily", "Compute Instance"),
                ];
                self.unit_price(cancel, &key, "AmazonEC2", filters).await
            }

            ResourceType::EbsVolume => {
                let size = gigabytes(config)?;
                let volume_type = config.volume_type.as_deref().unwrap_or("gp2");
                let key = format!("EBSVolume_{}_{}", config.region, volume_type);
                let filters = vec![
                    PriceFilter::new("productFamily", "Storage"),
                    PriceFilter::new("volumeApiName", volume_type),
                    PriceFilter::new("location", location),
                ];
                let per_gb_month = self.unit_price(cancel, &key, "AmazonEC2", filters).await?;
                Ok(size as f64 * per_gb_month / HOURS_PER_MONTH)
            }

            ResourceType::EbsSnapshot => {
                let size = gigabytes(config)?;
                let key = format!("EBSSnapshot_{}", config.region);
                let filters = vec![
                    PriceFilter::new("productFamily", "Storage Snapshot"),
                    PriceFilter::new("storageMedia", "Amazon S3"),
                    PriceFilter::new("location", location),
                ];
                let per_gb_month = self.unit_price(cancel, &key, "AmazonEC2", filters).await?;
                Ok(size as f64 * per_gb_month / HOURS_PER_MONTH)
            }

            ResourceType::LoadBalancer => {
                let lb_type = config.lb_type.as_deref().unwrap_or("application");
                let key = format!("LoadBalancer_{}_{}", config.region, lb_type);
                let filters = vec![
                    PriceFilter::new("productFamily", "Load Balancer"),
                    PriceFilter::new("usagetype", "LoadBalancerUsage"),
                    PriceFilter::new("location", location),
                ];
                self.unit_price(cancel, &key, "AWSELB", filters).await
            }

            ResourceType::NatGateway => {
                let key = format!("NATGateway_{}", config.region);
                let filters = vec![
                    PriceFilter::new("productFamily", "NAT Gateway"),
                    PriceFilter::new("usagetype", "NatGateway-Hours"),
                    PriceFilter::new("location", location),
                ];
                match self.unit_price(cancel, &key, "AmazonEC2", filters).await {
                    Ok(price) => Ok(price),
                    Err(SiftError::PriceNotFound(_)) => {
                        warn!(
                            region = %config.region,
                            fallback = NAT_GATEWAY_FALLBACK_HOURLY_USD,
                            "NAT gateway price lookup empty, using documented fallback rate"
                        );
                        Ok(NAT_GATEWAY_FALLBACK_HOURLY_USD)
                    }
                    Err(err) => Err(err),
                }
            }

            ResourceType::RdsInstance => {
                let class = instance_class(config)?;
                let engine = config.engine.as_deref().unwrap_or("PostgreSQL");
                let key = format!("RDSInstance_{}_{}_{}", config.region, class, engine);
                let filters = vec![
                    PriceFilter::new("productFamily", "Database Instance"),
                    PriceFilter::new("instanceType", class),
                    PriceFilter::new("databaseEngine", engine),
                    PriceFilter::new("deploymentOption", "Single-AZ"),
                    PriceFilter::new("location", location),
                ];
                self.unit_price(cancel, &key, "AmazonRDS", filters).await
            }

            ResourceType::DynamoDbTable => self.dynamodb_hourly(cancel, config, location).await,

            ResourceType::OpenSearchDomain => self.opensearch_hourly(cancel, config, location).await,
        }
    }

    /// Storage plus provisioned read and write capacity, summed.
    async fn dynamodb_hourly(
        &self,
        cancel: &CancellationToken,
        config: &ResourceCostConfig,
        location: &str,
    ) -> Result<f64> {
        let storage_gb = gigabytes(config)?;

        let storage_key = format!("DynamoDBTable_{}_storage", config.region);
        let storage_per_gb_month = self
            .unit_price(
                cancel,
                &storage_key,
                "AmazonDynamoDB",
                vec![
                    PriceFilter::new("productFamily", "Database Storage"),
                    PriceFilter::new("location", location),
                ],
            )
            .await?;
        let mut hourly = storage_gb as f64 * storage_per_gb_month / HOURS_PER_MONTH;

        if let Some(read_units) = config.read_capacity.filter(|units| *units > 0) {
            let key = format!("DynamoDBTable_{}_read", config.region);
            let per_unit = self
                .unit_price(
                    cancel,
                    &key,
                    "AmazonDynamoDB",
                    vec![
                        PriceFilter::new("productFamily", "Provisioned IOPS"),
                        PriceFilter::new("group", "DDB-ReadUnits"),
                        PriceFilter::new("location", location),
                    ],
                )
                .await?;
            hourly += read_units as f64 * per_unit;
        }

        if let Some(write_units) = config.write_capacity.filter(|units| *units > 0) {
            let key = format!("DynamoDBTable_{}_write", config.region);
            let per_unit = self
                .unit_price(
                    cancel,
                    &key,
                    "AmazonDynamoDB",
                    vec![
                        PriceFilter::new("productFamily", "Provisioned IOPS"),
                        PriceFilter::new("group", "DDB-WriteUnits"),
                        PriceFilter::new("location", location),
                    ],
                )
                .await?;
            hourly += write_units as f64 * per_unit;
        }

        Ok(hourly)
    }

    /// Data-node instances plus attached storage, summed.
    async fn opensearch_hourly(
        &self,
        cancel: &CancellationToken,
        config: &ResourceCostConfig,
        location: &str,
    ) -> Result<f64> {
        let class = instance_class(config)?;
        let instance_count = config.instance_count.unwrap_or(1).max(1);

        let instance_key = format!("OpenSearchDomain_{}_{}", config.region, class);
        let instance_hourly = self
            .unit_price(
                cancel,
                &instance_key,
                "AmazonES",
                vec![
                    PriceFilter::new("productFamily", "Amazon OpenSearch Service Instance"),
                    PriceFilter::new("instanceType", class),
                    PriceFilter::new("location", location),
                ],
            )
            .await?;
        let mut hourly = instance_hourly * instance_count as f64;

        if let Some(storage_gb) = config.storage_size.filter(|gb| *gb > 0) {
            let volume_type = config.volume_type.as_deref().unwrap_or("gp2");
            let storage_key =
                format!("OpenSearchDomain_{}_storage_{}", config.region, volume_type);
            let per_gb_month = self
                .unit_price(
                    cancel,
                    &storage_key,
                    "AmazonES",
                    vec![
                        PriceFilter::new("productFamily", "Storage"),
                        PriceFilter::new("volumeType", volume_type),
                        PriceFilter::new("location", location),
                    ],
                )
                .await?;
            hourly += storage_gb as f64 * per_gb_month / HOURS_PER_MONTH;
        }

        Ok(hourly)
    }

    /// Cache-first unit-price lookup; misses go to the backend through the
    /// pricing limiter and persist the cache in the background.
    async fn unit_price(
        &self,
        cancel: &CancellationToken,
        key: &str,
        service_code: &str,
        filters: Vec<PriceFilter>,
    ) -> Result<f64> {
        if let Some(price) = self.cache.get(key).await {
            return Ok(price);
        }
        debug!(key, "Price cache miss, querying provider");

        let backend = self.backend.clone();
        let price = self
            .limiter
            .execute(cancel, "GetProducts", || {
                backend.lookup_price(service_code, &filters)
            })
            .await?;

        let Some(price) = price else {
            return Err(SiftError::PriceNotFound(key.to_string()));
        };

        self.cache.set(key.to_string(), price).await;
        let cache = self.cache.clone();
        tokio::spawn(async move {
            if let Err(err) = cache.save().await {
                warn!("Failed to persist price cache: {err}");
            }
        });

        Ok(price)
    }
}

fn instance_class(config: &ResourceCostConfig) -> Result<&str> {
    match &config.resource_size {
        ResourceSize::InstanceClass(class) => Ok(class),
        ResourceSize::Gigabytes(_) => Err(SiftError::InvalidSizeType {
            resource_type: config.resource_type.to_string(),
            expected: "instance class string".to_string(),
        }),
    }
}

fn gigabytes(config: &ResourceCostConfig) -> Result<i64> {
    match &config.resource_size {
        ResourceSize::Gigabytes(size) => Ok(*size),
        ResourceSize::InstanceClass(_) => Err(SiftError::InvalidSizeType {
            resource_type: config.resource_type.to_string(),
            expected: "size in GB".to_string(),
        }),
    }
}

/// Built-in region → human-readable pricing location table.
pub fn region_location(region: &str) -> Result<&'static str> {
    let location = match region {
        "us-east-1" => "US East (N. Virginia)",
        "us-east-2" => "US East (Ohio)",
        "us-west-1" => "US West (N. California)",
        "us-west-2" => "US West (Oregon)",
        "af-south-1" => "Africa (Cape Town)",
        "ap-east-1" => "Asia Pacific (Hong Kong)",
        "ap-south-1" => "Asia Pacific (Mumbai)",
        "ap-northeast-1" => "Asia Pacific (Tokyo)",
        "ap-northeast-2" => "Asia Pacific (Seoul)",
        "ap-northeast-3" => "Asia Pacific (Osaka)",
        "ap-southeast-1" => "Asia Pacific (Singapore)",
        "ap-southeast-2" => "Asia Pacific (Sydney)",
        "ca-central-1" => "Canada (Central)",
        "eu-central-1" => "EU (Frankfurt)",
        "eu-west-1" => "EU (Ireland)",
        "eu-west-2" => "EU (London)",
        "eu-west-3" => "EU (Paris)",
        "eu-north-1" => "EU (Stockholm)",
        "eu-south-1" => "EU (Milan)",
        "me-south-1" => "Middle East (Bahrain)",
        "sa-east-1" => "South America (Sao Paulo)",
        _ => return Err(SiftError::UnknownRegion(region.to_string())),
    };
    Ok(location)
}
