use crate::models::{Chunk, ChunkExtraction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// On-disk JSON cache of intermediate pipeline artifacts, namespaced by
/// document id. Reads treat corrupt or missing files as a miss; writes are
/// best effort and never fail the pipeline.
pub struct PipelineCache {
    dir: PathBuf,
}

impl PipelineCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn chunk_path(&self, document_id: &str) -> PathBuf {
        self.dir.join(format!("{document_id}.chunks.json"))
    }

    fn extraction_path(&self, document_id: &str) -> PathBuf {
        self.dir.join(format!("{document_id}.extractions.json"))
    }

    pub async fn load_chunks(&self, document_id: &str) -> Option<Vec<Chunk>> {
        read_json(&self.chunk_path(document_id)).await
    }

    pub async fn store_chunks(&self, document_id: &str, chunks: &[Chunk]) {
        write_json(&self.chunk_path(document_id), &chunks).await;
    }

    pub async fn load_extractions(&self, document_id: &str) -> Option<Vec<ChunkExtraction>> {
        read_json(&self.extraction_path(document_id)).await
    }

    /// Single-writer queue for extraction snapshots: one task drains the
    /// channel, so writes never interleave and each waits for its
    /// predecessor. A crash mid-batch loses at most the queued snapshots,
    /// not previously flushed progress.
    pub fn extraction_writer(&self, document_id: &str) -> ExtractionWriter {
        let path = self.extraction_path(document_id);
        let (sender, mut receiver) = mpsc::channel::<Vec<ChunkExtraction>>(16);
        let task = tokio::spawn(async move {
            while let Some(snapshot) = receiver.recv().await {
                write_json(&path, &snapshot).await;
            }
        });
        ExtractionWriter { sender, task }
    }
}

pub struct ExtractionWriter {
    sender: mpsc::Sender<Vec<ChunkExtraction>>,
    task: JoinHandle<()>,
}

impl ExtractionWriter {
    pub async fn submit(&self, snapshot: Vec<ChunkExtraction>) {
        if self.sender.send(snapshot).await.is_err() {
            warn!("extraction cache writer stopped early");
        }
    }

    /// Close the queue and wait for queued snapshots to reach disk.
    pub async fn finish(self) {
        drop(self.sender);
        if let Err(error) = self.task.await {
            warn!(error = %error, "extraction cache writer task failed");
        }
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "ignoring unreadable cache file");
            None
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) {
    if let Some(parent) = path.parent() {
        if let Err(error) = tokio::fs::create_dir_all(parent).await {
            warn!(path = %path.display(), error = %error, "cache directory unavailable");
            return;
        }
    }

    match serde_json::to_vec_pretty(value) {
        Ok(bytes) => {
            if let Err(error) = tokio::fs::write(path, bytes).await {
                warn!(path = %path.display(), error = %error, "cache write failed");
            }
        }
        Err(error) => warn!(path = %path.display(), error = %error, "cache serialization failed"),
    }
}
