// JSONL event store
// One JSON object per line. A line is committed once it ends in a newline;
// a torn tail from a crash is sealed on reopen and skipped by readers.

use std::path::Path;

use anyhow::{Context, Result};
use common::LifecycleEvent;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tracing::warn;

/// Append-only writer for the event log file
pub struct EventWriter {
    file: File,
}

impl EventWriter {
    /// Open the log for appending, creating parent directories as needed.
    ///
    /// If the file ends in a partial line (crash mid-append), a newline is
    /// written first so the torn record cannot swallow the next append.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("create event log dir")?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .context("open event log file")?;

        if ends_mid_line(path).await? {
            warn!("event log {} has a torn tail line, sealing it", path.display());
            file.write_all(b"\n").await.context("seal torn tail")?;
            file.sync_data().await.context("sync sealed tail")?;
        }

        Ok(Self { file })
    }

    /// Append one event as a single line and flush it to disk.
    ///
    /// The whole line, newline included, goes out in one write so prior
    /// entries can never be corrupted by a partial append.
    pub async fn append(&mut self, event: &LifecycleEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event).context("encode event")?;
        line.push(b'\n');
        self.file.write_all(&line).await.context("append event")?;
        self.file.sync_data().await.context("sync event log")?;
        Ok(())
    }
}

async fn ends_mid_line(path: &Path) -> Result<bool> {
    let mut file = File::open(path).await.context("open log for tail check")?;
    let len = file
        .metadata()
        .await
        .context("stat event log")?
        .len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(std::io::SeekFrom::End(-1))
        .await
        .context("seek log tail")?;
    let mut last = [0u8; 1];
    tokio::io::AsyncReadExt::read_exact(&mut file, &mut last)
        .await
        .context("read log tail")?;
    Ok(last[0] != b'\n')
}

/// Read every committed event, in file order.
///
/// Unreadable lines are skipped with a warning; replay continues from the
/// next valid line. Returns an empty vec if the file does not exist yet.
pub async fn read_events(path: impl AsRef<Path>) -> Result<Vec<LifecycleEvent>> {
    let path = path.as_ref();
    let file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context("open event log for read"),
    };

    let mut events = Vec::new();
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0u64;
    while let Some(line) = lines.next_line().await.context("read event log line")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LifecycleEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!(
                    "skipping corrupted event log line {} in {}: {}",
                    line_no,
                    path.display(),
                    e
                );
            }
        }
    }
    Ok(events)
}

/// Read committed events with `seq` greater than `after`.
///
/// Used by catch-up consumers tailing a live log. An unparseable final line
/// is treated as an in-progress append and dropped without a warning; it
/// will be picked up on the next poll. Interior corruption is skipped with
/// a warning, same as replay.
pub async fn read_events_after(path: impl AsRef<Path>, after: u64) -> Result<Vec<LifecycleEvent>> {
    let path = path.as_ref();
    let file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context("open event log for tail read"),
    };

    let mut parsed: Vec<Result<LifecycleEvent, (u64, String)>> = Vec::new();
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0u64;
    while let Some(line) = lines.next_line().await.context("read event log line")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LifecycleEvent>(&line) {
            Ok(event) => parsed.push(Ok(event)),
            Err(e) => parsed.push(Err((line_no, e.to_string()))),
        }
    }

    // A bad final line is an append still in flight, not corruption.
    if matches!(parsed.last(), Some(Err(_))) {
        parsed.pop();
    }

    let mut events = Vec::new();
    for entry in parsed {
        match entry {
            Ok(event) => {
                if event.seq > after {
                    events.push(event);
                }
            }
            Err((n, e)) => {
                warn!(
                    "skipping corrupted event log line {} in {}: {}",
                    n,
                    path.display(),
                    e
                );
            }
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{EventType, SignalState};
    use uuid::Uuid;

    fn event(seq: u64) -> LifecycleEvent {
        LifecycleEvent {
            seq,
            signal_id: Uuid::new_v4(),
            event_type: EventType::StateChanged,
            from_state: Some(SignalState::Generated),
            to_state: SignalState::Evaluating,
            timestamp: Utc::now(),
            payload: serde_json::json!({ "actor": "test" }),
        }
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut writer = EventWriter::open(&path).await.unwrap();
        writer.append(&event(1)).await.unwrap();
        writer.append(&event(2)).await.unwrap();

        let events = read_events(&path).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[1].seq, 2);
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let events = read_events(dir.path().join("nope.jsonl")).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn corrupted_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut writer = EventWriter::open(&path).await.unwrap();
        writer.append(&event(1)).await.unwrap();
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap()
            .write_all(b"{ not json at all\n")
            .await
            .unwrap();
        writer.append(&event(2)).await.unwrap();

        let events = read_events(&path).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].seq, 2);
    }

    #[tokio::test]
    async fn torn_tail_is_sealed_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut writer = EventWriter::open(&path).await.unwrap();
        writer.append(&event(1)).await.unwrap();
        drop(writer);

        // Crash mid-append: a partial record with no newline.
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap()
            .write_all(b"{\"seq\":2,\"signal_id\"")
            .await
            .unwrap();

        let mut writer = EventWriter::open(&path).await.unwrap();
        writer.append(&event(3)).await.unwrap();

        let events = read_events(&path).await.unwrap();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[tokio::test]
    async fn read_after_drops_in_flight_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut writer = EventWriter::open(&path).await.unwrap();
        writer.append(&event(1)).await.unwrap();
        writer.append(&event(2)).await.unwrap();
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap()
            .write_all(b"{\"seq\":3,")
            .await
            .unwrap();

        let events = read_events_after(&path, 1).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 2);
    }
}
