use crate::{
    error::Result,
    types::{Account, ScanMetrics, ScanResult},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// The consolidated scan document handed to renderers. This crate writes
/// the JSON form; HTML rendering and object-store upload are external.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
    pub regions: Vec<String>,
    pub scanners: Vec<String>,
    pub results: Vec<ScanResult>,
    pub metrics: ScanMetrics,
}

impl ScanReport {
    pub fn new(
        started_at: DateTime<Utc>,
        accounts: Vec<Account>,
        regions: Vec<String>,
        scanners: Vec<String>,
        results: Vec<ScanResult>,
        metrics: ScanMetrics,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            accounts,
            regions,
            scanners,
            results,
            metrics,
        }
    }

    /// Atomic write: temp sibling then rename, same as the price cache.
    pub async fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!(
            path = %path.display(),
            results = self.results.len(),
            "Wrote scan report"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn report_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("scan.json");

        let report = ScanReport::new(
            Utc::now(),
            vec![Account::new("123456789012", "dev")],
            vec!["us-east-1".to_string()],
            vec!["ebs-volumes".to_string()],
            Vec::new(),
            ScanMetrics::default(),
        );
        report.write_json(&path).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed["accounts"][0]["id"], "123456789012");
        assert_eq!(parsed["scanners"][0], "ebs-volumes");
    }
}
