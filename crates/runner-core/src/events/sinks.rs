//! Concrete `EventSink` implementations: `stream` (NDJSON to stdout), `file`
//! (append-only JSONL), and `fanout`/`mirror` composites that write events
//! directly to a stream or file rather than a database.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::contracts::{Event, EventSink};

/// NDJSON to stdout.
pub struct StreamSink;

#[async_trait]
impl EventSink for StreamSink {
    async fn emit(&self, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event).context("serializing event for stream sink")?;
        println!("{line}");
        Ok(())
    }
}

/// Append-only JSONL file sink. Durability over latency: callers that need
/// back-pressure to block rather than drop should route through this sink.
pub struct FileSink {
    file: Mutex<std::fs::File>,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path: &Path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self { file: Mutex::new(file) })
    }
}

#[async_trait]
impl EventSink for FileSink {
    async fn emit(&self, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event).context("serializing event for file sink")?;
        let mut file = self.file.lock().expect("file sink mutex poisoned");
        writeln!(file, "{line}").context("writing event line")?;
        Ok(())
    }
}

/// Fans a single event out to every composed sink. Each sink's failure is
/// logged, never propagated: sinks are always best-effort and never fail
/// the run.
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn emit(&self, event: &Event) -> Result<()> {
        for sink in &self.sinks {
            if let Err(err) = sink.emit(event).await {
                tracing::warn!(error = %err, "event sink failed to emit");
            }
        }
        Ok(())
    }
}

/// Couples a slow file sink behind a bounded buffer to a fast stream sink,
/// so the stream never stalls waiting on file I/O. The mirrored sink's
/// writes happen on a background task fed by a bounded channel; on a full
/// buffer the oldest queued write is dropped, exactly like a stream sink
/// overflowing, since durability is the file sink's own direct-mode job.
pub struct MirrorSink {
    primary: Box<dyn EventSink>,
    tx: tokio::sync::mpsc::Sender<Event>,
}

impl MirrorSink {
    pub fn new(primary: Box<dyn EventSink>, mirrored: Box<dyn EventSink>, buffer: usize) -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Event>(buffer.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = mirrored.emit(&event).await {
                    tracing::warn!(error = %err, "mirrored sink failed to emit");
                }
            }
        });
        Self { primary, tx }
    }
}

#[async_trait]
impl EventSink for MirrorSink {
    async fn emit(&self, event: &Event) -> Result<()> {
        if let Err(tokio::sync::mpsc::error::TrySendError::Full(_)) = self.tx.try_send(event.clone()) {
            tracing::debug!("mirror sink buffer full, dropping mirrored copy");
        }
        self.primary.emit(event).await
    }
}

pub fn default_journal_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(".yolo-runner")
}

pub fn default_event_log_path(repo_root: &Path) -> PathBuf {
    repo_root.join("runner-logs").join("agent.events.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::EventType;

    #[tokio::test]
    async fn file_sink_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = FileSink::open(&path).unwrap();

        sink.emit(&Event::new(EventType::RunStarted)).await.unwrap();
        sink.emit(&Event::new(EventType::RunFinished)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn fanout_delivers_to_every_sink() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        let b = dir.path().join("b.jsonl");
        let fanout = FanoutSink::new(vec![
            Box::new(FileSink::open(&a).unwrap()),
            Box::new(FileSink::open(&b).unwrap()),
        ]);
        fanout.emit(&Event::new(EventType::RunStarted)).await.unwrap();

        assert_eq!(std::fs::read_to_string(&a).unwrap().lines().count(), 1);
        assert_eq!(std::fs::read_to_string(&b).unwrap().lines().count(), 1);
    }
}
