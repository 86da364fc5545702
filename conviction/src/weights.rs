// Weight snapshots
// The external tuning process publishes a TOML weight file at its own
// cadence. The store reloads it only at an explicit boundary and hands out
// immutable snapshots, so a reload can never change a score in flight and
// every scored signal can record exactly the vector it used.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use common::WeightSnapshot;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct WeightsFile {
    #[serde(default)]
    weights: BTreeMap<String, f64>,
}

/// Holds the current weight snapshot and reloads it from disk on demand
pub struct WeightStore {
    path: PathBuf,
    current: RwLock<Arc<WeightSnapshot>>,
}

impl WeightStore {
    /// Load the initial snapshot. A missing file yields an empty version-1
    /// snapshot (every component then scores zero) rather than an error,
    /// so the pipeline can start before the tuner has published anything.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let weights = match read_weights(&path).await {
            Ok(w) => w,
            Err(e) => {
                warn!(
                    "weights file {} unreadable ({}), starting with empty weights",
                    path.display(),
                    e
                );
                BTreeMap::new()
            }
        };

        let snapshot = Arc::new(WeightSnapshot {
            version: 1,
            weights,
            loaded_at: Utc::now(),
        });

        Ok(Self {
            path,
            current: RwLock::new(snapshot),
        })
    }

    /// The current immutable snapshot. Callers score against this Arc;
    /// a concurrent reload swaps the store's pointer without touching it.
    pub async fn snapshot(&self) -> Arc<WeightSnapshot> {
        self.current.read().await.clone()
    }

    /// Re-read the weight file and swap in a new snapshot.
    ///
    /// Returns the new version. Signals scored before the swap keep the old
    /// snapshot recorded on their scored event.
    pub async fn reload(&self) -> Result<u64> {
        let weights = read_weights(&self.path)
            .await
            .with_context(|| format!("reload weights from {}", self.path.display()))?;

        let mut current = self.current.write().await;
        let version = current.version + 1;
        *current = Arc::new(WeightSnapshot {
            version,
            weights,
            loaded_at: Utc::now(),
        });
        info!("weights reloaded from {} (version {})", self.path.display(), version);
        Ok(version)
    }
}

async fn read_weights(path: &Path) -> Result<BTreeMap<String, f64>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .context("read weights file")?;
    let file: WeightsFile = toml::from_str(&content).context("parse weights file")?;
    Ok(file.weights)
}
