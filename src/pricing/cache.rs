use crate::error::{Result, SiftError};
use std::{collections::HashMap, path::PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

pub const DEFAULT_CACHE_PATH: &str = "cache/costs.json";

/// Disk-persisted map of composite price keys to USD unit prices.
///
/// Entries are created lazily by the estimator and never deleted at
/// runtime. Saves are atomic: serialize a snapshot, write a sibling temp
/// file, rename over the canonical path. The in-memory map lock is never
/// held across disk I/O.
#[derive(Debug)]
pub struct PriceCache {
    path: PathBuf,
    prices: RwLock<HashMap<String, f64>>,
    // Serializes writers to the file itself.
    save_lock: Mutex<()>,
}

impl PriceCache {
    /// Load the cache from disk. A missing file is an empty cache; a
    /// malformed file is fatal.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let prices = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<HashMap<String, f64>>(&bytes).map_err(|e| {
                SiftError::Config(format!(
                    "Malformed price cache at {}: {e}",
                    path.display()
                ))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };

        let prices = migrate_legacy_keys(prices);
        info!(
            entries = prices.len(),
            path = %path.display(),
            "Loaded price cache"
        );

        Ok(Self {
            path,
            prices: RwLock::new(prices),
            save_lock: Mutex::new(()),
        })
    }

    pub async fn get(&self, key: &str) -> Option<f64> {
        self.prices.read().await.get(key).copied()
    }

    pub async fn set(&self, key: String, price: f64) {
        self.prices.write().await.insert(key, price);
    }

    pub async fn len(&self) -> usize {
        self.prices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.prices.read().await.is_empty()
    }

    /// Persist the current contents. Snapshot under the read lock, release,
    /// then write temp file + rename.
    pub async fn save(&self) -> Result<()> {
        let snapshot = { self.prices.read().await.clone() };

        let _guard = self.save_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(
            entries = snapshot.len(),
            path = %self.path.display(),
            "Saved price cache"
        );
        Ok(())
    }
}

/// Volume keys written before volume types joined the composite key lack
/// the third component; rewrite `EBSVolume_<region>` to
/// `EBSVolume_<region>_gp2`.
fn migrate_legacy_keys(prices: HashMap<String, f64>) -> HashMap<String, f64> {
    prices
        .into_iter()
        .map(|(key, price)| {
            if key.starts_with("EBSVolume_") && key.matches('_').count() == 1 {
                (format!("{key}_gp2"), price)
            } else {
                (key, price)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_as_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::load(dir.path().join("costs.json")).await.unwrap();
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn malformed_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("costs.json");
        tokio::fs::write(&path, b"not json at all").await.unwrap();

        let err = PriceCache::load(&path).await.unwrap_err();
        assert!(matches!(err, SiftError::Config(_)));
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("costs.json");

        let cache = PriceCache::load(&path).await.unwrap();
        cache.set("EC2Instance_us-east-1_t3.micro".to_string(), 0.0104).await;
        cache.set("EBSSnapshot_us-east-1".to_string(), 0.05).await;
        cache.save().await.unwrap();

        let reloaded = PriceCache::load(&path).await.unwrap();
        assert_eq!(reloaded.len().await, 2);
        assert_eq!(
            reloaded.get("EC2Instance_us-east-1_t3.micro").await,
            Some(0.0104)
        );
        assert_eq!(reloaded.get("EBSSnapshot_us-east-1").await, Some(0.05));
    }

    #[tokio::test]
    async fn save_load_is_idempotent_for_well_formed_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("costs.json");
        tokio::fs::write(
            &path,
            serde_json::json!({
                "NATGateway_eu-west-1": 0.045,
                "EBSVolume_us-east-1_gp3": 0.08
            })
            .to_string(),
        )
        .await
        .unwrap();

        let cache = PriceCache::load(&path).await.unwrap();
        cache.save().await.unwrap();
        let reloaded = PriceCache::load(&path).await.unwrap();

        assert_eq!(reloaded.get("NATGateway_eu-west-1").await, Some(0.045));
        assert_eq!(reloaded.get("EBSVolume_us-east-1_gp3").await, Some(0.08));
        assert_eq!(reloaded.len().await, 2);
    }

    #[tokio::test]
    async fn legacy_volume_keys_gain_default_volume_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("costs.json");
        tokio::fs::write(
            &path,
            serde_json::json!({
                "EBSVolume_us-east-1": 0.10,
                "EBSVolume_us-west-2_io1": 0.125,
                "EBSSnapshot_us-east-1": 0.05
            })
            .to_string(),
        )
        .await
        .unwrap();

        let cache = PriceCache::load(&path).await.unwrap();
        assert_eq!(cache.get("EBSVolume_us-east-1_gp2").await, Some(0.10));
        assert_eq!(cache.get("EBSVolume_us-east-1").await, None);
        // Keys already carrying a volume type pass through untouched.
        assert_eq!(cache.get("EBSVolume_us-west-2_io1").await, Some(0.125));
        assert_eq!(cache.get("EBSSnapshot_us-east-1").await, Some(0.05));
    }

    #[tokio::test]
    async fn concurrent_sets_are_all_visible() {
        let dir = tempfile::tempdir().unwrap();
        let cache = std::sync::Arc::new(
            PriceCache::load(dir.path().join("costs.json")).await.unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.set(format!("key_{i}"), i as f64).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len().await, 16);
    }
}
