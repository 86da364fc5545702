// Shadow outcome ledger
// One JSON line per outcome update; the latest line per signal wins on
// read-back. The append is flushed before the engine's checkpoint moves,
// which is what makes restart reprocessing idempotent.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use common::ShadowOutcome;
use dashmap::DashMap;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use uuid::Uuid;

pub struct ShadowLedger {
    path: PathBuf,
    outcomes: DashMap<Uuid, ShadowOutcome>,
}

impl ShadowLedger {
    /// Load the ledger, folding update lines into latest-state per signal.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let outcomes = DashMap::new();

        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => Some(f),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e).context("open shadow outcomes log"),
        };

        if let Some(file) = file {
            let mut lines = BufReader::new(file).lines();
            let mut line_no = 0u64;
            while let Some(line) = lines.next_line().await.context("read outcome line")? {
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ShadowOutcome>(&line) {
                    Ok(outcome) => {
                        outcomes.insert(outcome.signal_id, outcome);
                    }
                    Err(e) => warn!(
                        "skipping corrupted shadow outcome line {} in {}: {}",
                        line_no,
                        path.display(),
                        e
                    ),
                }
            }
        }

        Ok(Self { path, outcomes })
    }

    /// Durably append an outcome update and fold it into the in-memory view.
    pub async fn upsert(&self, outcome: ShadowOutcome) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("create shadow outcomes dir")?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .context("open shadow outcomes log")?;
        let mut line = serde_json::to_vec(&outcome).context("encode shadow outcome")?;
        line.push(b'\n');
        file.write_all(&line).await.context("append shadow outcome")?;
        file.sync_data().await.context("sync shadow outcomes log")?;

        self.outcomes.insert(outcome.signal_id, outcome);
        Ok(())
    }

    pub fn get(&self, signal_id: Uuid) -> Option<ShadowOutcome> {
        self.outcomes.get(&signal_id).map(|o| o.value().clone())
    }

    pub fn all(&self) -> Vec<ShadowOutcome> {
        self.outcomes.iter().map(|o| o.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
