use crate::{aws::MetricsClient, error::Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Average,
    Sum,
    Maximum,
    Minimum,
}

/// One metric lookup. Drives both single-metric fetches and the batched
/// "get many metrics" path; `id` keys the batch result map.
#[derive(Debug, Clone)]
pub struct MetricConfig {
    pub id: String,
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<(String, String)>,
    pub statistic: Statistic,
    pub period_seconds: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

pub const PERIOD_ONE_HOUR: i64 = 3600;
pub const PERIOD_ONE_DAY: i64 = 86_400;

impl MetricConfig {
    /// Window convention shared by every scanner: `end = now`,
    /// `start = end - days_unused`.
    pub fn over_days(
        id: impl Into<String>,
        namespace: impl Into<String>,
        metric_name: impl Into<String>,
        dimensions: Vec<(String, String)>,
        statistic: Statistic,
        period_seconds: i64,
        days_unused: i64,
    ) -> Self {
        let end = Utc::now();
        Self {
            id: id.into(),
            namespace: namespace.into(),
            metric_name: metric_name.into(),
            dimensions,
            statistic,
            period_seconds,
            start: end - Duration::days(days_unused),
            end,
        }
    }
}

/// Fetch one scalar; an absent metric reads as zero (no datapoints means no
/// recorded activity).
pub async fn fetch_metric(client: &dyn MetricsClient, config: &MetricConfig) -> Result<f64> {
    Ok(client.metric_statistic(config).await?.unwrap_or(0.0))
}

/// Batched fetch mapping each config's `id` to its scalar, zero-filled for
/// metrics the provider returned nothing for.
pub async fn fetch_metrics(
    client: &dyn MetricsClient,
    configs: &[MetricConfig],
) -> Result<HashMap<String, f64>> {
    let mut values = client.metric_batch(configs).await?;
    for config in configs {
        values.entry(config.id.clone()).or_insert(0.0);
    }
    Ok(values)
}

/// Population standard deviation of a datapoint series.
pub fn std_deviation(series: &[f64]) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let mean = series.iter().sum::<f64>() / series.len() as f64;
    let variance =
        series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / series.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_spans_days_unused_back_from_now() {
        let config = MetricConfig::over_days(
            "cpu",
            "AWS/EC2",
            "CPUUtilization",
            vec![("InstanceId".to_string(), "i-123".to_string())],
            Statistic::Average,
            PERIOD_ONE_HOUR,
            90,
        );
        let span = config.end - config.start;
        assert_eq!(span.num_days(), 90);
        assert!((Utc::now() - config.end).num_seconds() < 5);
    }

    #[test]
    fn std_deviation_of_flat_series_is_zero() {
        assert_eq!(std_deviation(&[5.0, 5.0, 5.0]), 0.0);
        assert_eq!(std_deviation(&[]), 0.0);
    }

    #[test]
    fn std_deviation_matches_population_formula() {
        let sd = std_deviation(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.0).abs() < 1e-9);
    }
}
