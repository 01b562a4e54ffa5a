//! Debounced batch metadata retrieval.
//!
//! Videos in status New arrive one at a time and leave in batches: a flush
//! happens when the buffer reaches the size cap or when no new video has
//! arrived for the idle duration, whichever comes first. Flushed batches get
//! one multi-id metadata lookup; enriched videos are persisted as Fetched and
//! re-injected into the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::clients::youtube::MetadataFetcher;
use crate::model::{Video, VideoStatus};
use crate::storage::VideoRepository;

pub(super) struct MetadataBatcher {
    max_batch: usize,
    idle_flush: Duration,
    videos: Arc<dyn VideoRepository>,
    metadata: Arc<dyn MetadataFetcher>,
    rx: mpsc::Receiver<Video>,
    dispatch_tx: mpsc::Sender<Video>,
}

impl MetadataBatcher {
    pub(super) fn new(
        max_batch: usize,
        idle_flush: Duration,
        videos: Arc<dyn VideoRepository>,
        metadata: Arc<dyn MetadataFetcher>,
        rx: mpsc::Receiver<Video>,
        dispatch_tx: mpsc::Sender<Video>,
    ) -> Self {
        Self {
            max_batch: max_batch.max(1),
            idle_flush,
            videos,
            metadata,
            rx,
            dispatch_tx,
        }
    }

    /// Run the accumulator loop; flushes execute on a companion task so a
    /// slow lookup never blocks accumulation.
    pub(super) async fn run(self) {
        info!("started metadata batcher");
        let (batch_tx, batch_rx) = mpsc::channel::<Vec<Video>>(1);
        let flusher = BatchFlusher {
            videos: self.videos,
            metadata: self.metadata,
            dispatch_tx: self.dispatch_tx,
        };
        tokio::spawn(flusher.run(batch_rx));
        accumulate(self.rx, batch_tx, self.max_batch, self.idle_flush).await;
    }
}

/// Split a full batch off the front of the buffer.
fn stage_full(buffer: &mut Vec<Video>, max_batch: usize) -> Vec<Video> {
    let tail = buffer.split_off(max_batch);
    std::mem::replace(buffer, tail)
}

async fn accumulate(
    mut rx: mpsc::Receiver<Video>,
    batch_tx: mpsc::Sender<Vec<Video>>,
    max_batch: usize,
    idle_flush: Duration,
) {
    let mut buffer: Vec<Video> = Vec::new();
    let mut staged: Option<Vec<Video>> = None;
    let deadline = tokio::time::sleep(idle_flush);
    tokio::pin!(deadline);
    let mut deadline_armed = false;

    // The recv arm stays enabled while a staged batch waits for the flusher:
    // the dispatcher must never stall behind a slow metadata lookup, or the
    // channel cycle through it would wedge the whole fetch pipeline.
    loop {
        tokio::select! {
            maybe = rx.recv() => {
                let Some(video) = maybe else { break };
                buffer.push(video);
                deadline.as_mut().reset(Instant::now() + idle_flush);
                deadline_armed = true;
                if buffer.len() >= max_batch && staged.is_none() {
                    staged = Some(stage_full(&mut buffer, max_batch));
                }
            }
            _ = deadline.as_mut(), if deadline_armed => {
                deadline_armed = false;
                if !buffer.is_empty() && staged.is_none() {
                    staged = Some(std::mem::take(&mut buffer));
                }
            }
            permit = batch_tx.reserve(), if staged.is_some() => {
                let Ok(permit) = permit else { break };
                if let Some(batch) = staged.take() {
                    permit.send(batch);
                }
                if buffer.len() >= max_batch {
                    staged = Some(stage_full(&mut buffer, max_batch));
                } else if !buffer.is_empty() && !deadline_armed {
                    deadline.as_mut().reset(Instant::now() + idle_flush);
                    deadline_armed = true;
                }
            }
        }
    }

    // Input closed: hand any remainder to the flusher before exiting.
    if let Some(batch) = staged.take() {
        let _ = batch_tx.send(batch).await;
    }
    if !buffer.is_empty() {
        let _ = batch_tx.send(buffer).await;
    }
}

struct BatchFlusher {
    videos: Arc<dyn VideoRepository>,
    metadata: Arc<dyn MetadataFetcher>,
    dispatch_tx: mpsc::Sender<Video>,
}

impl BatchFlusher {
    async fn run(self, mut batch_rx: mpsc::Receiver<Vec<Video>>) {
        while let Some(batch) = batch_rx.recv().await {
            if !self.flush(batch).await {
                return;
            }
        }
    }

    /// Returns false once the dispatcher is gone and flushing is pointless.
    async fn flush(&self, batch: Vec<Video>) -> bool {
        info!(count = batch.len(), "fetching metadata");
        let ids: Vec<String> = batch.iter().map(|v| v.external_id.clone()).collect();
        let mut found = match self.metadata.fetch_metadata(&ids).await {
            Ok(found) => found,
            Err(err) => {
                // The batch stays New in the store; the recovery scan of a
                // later run retries it.
                error!(count = batch.len(), error = %err, "metadata lookup failed, skipping batch");
                return true;
            }
        };

        let mut fetched = 0usize;
        for mut video in batch {
            let Some(md) = found.remove(&video.external_id) else {
                warn!(external_id = %video.external_id, "no metadata in lookup response");
                continue;
            };
            video.title = md.title;
            video.description = md.description;
            video.duration = md.duration;
            video.published_at = md.published_at;
            video.status = VideoStatus::Fetched;
            if let Err(err) = self.videos.save(&video).await {
                error!(video_id = %video.id, error = %err, "failed to save fetched video");
                continue;
            }
            fetched += 1;
            if self.dispatch_tx.send(video).await.is_err() {
                return false;
            }
        }
        info!(fetched, "fetched metadata");
        true
    }
}
