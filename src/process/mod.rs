//! Enrichment chain over the fetch pipeline's output boundary.
//!
//! A processor is a named, idempotent enrichment step that decides for
//! itself whether it still applies to a video. The selector walks an ordered
//! set of them; a worker pool drains the output channel and walks each video
//! through the chain until no step remains.

mod summarize;

pub use summarize::SummaryProcessor;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info};

use crate::model::{Video, VideoStatus};
use crate::storage::{VideoRepository, VideoVectorRepository};

/// Failure of a single enrichment step.
#[derive(Debug, Error)]
#[error("processor {name} failed: {cause}")]
pub struct ProcessorError {
    pub name: &'static str,
    pub cause: anyhow::Error,
}

#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;
    /// Whether this step still needs to run for the given video.
    fn applicable(&self, video: &Video) -> bool;
    async fn apply(&self, video: &mut Video) -> Result<(), ProcessorError>;
}

/// Ordered set of processors; yields the first one still applicable.
pub struct Selector {
    processors: Vec<Arc<dyn Processor>>,
}

impl Selector {
    pub fn new(processors: Vec<Arc<dyn Processor>>) -> Self {
        Self { processors }
    }

    pub fn next(&self, video: &Video) -> Option<Arc<dyn Processor>> {
        self.processors
            .iter()
            .find(|p| p.applicable(video))
            .cloned()
    }
}

pub struct Pipeline {
    selector: Arc<Selector>,
    relational: Arc<dyn VideoRepository>,
    vector: Arc<dyn VideoVectorRepository>,
    workers: usize,
}

impl Pipeline {
    pub fn new(
        selector: Arc<Selector>,
        relational: Arc<dyn VideoRepository>,
        vector: Arc<dyn VideoVectorRepository>,
        workers: usize,
    ) -> Self {
        Self {
            selector,
            relational,
            vector,
            workers,
        }
    }

    /// Spawn the worker pool draining `rx`. Distinct videos are processed in
    /// parallel; one video's own chain walk stays sequential because a worker
    /// finishes it before taking the next video.
    pub fn start(self, rx: mpsc::Receiver<Video>) {
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..self.workers.max(1) {
            let rx = rx.clone();
            let selector = self.selector.clone();
            let relational = self.relational.clone();
            let vector = self.vector.clone();
            tokio::spawn(async move {
                info!(worker, "started pipeline worker");
                loop {
                    let video = { rx.lock().await.recv().await };
                    let Some(video) = video else { break };
                    process_video(video, &selector, relational.as_ref(), vector.as_ref()).await;
                }
            });
        }
    }
}

/// Walk the chain for one video: apply processors until none remains, with a
/// relational-then-vector persist after every successful step. The terminal
/// flip to Ready rides the final step's persist.
async fn process_video(
    mut video: Video,
    selector: &Selector,
    relational: &dyn VideoRepository,
    vector: &dyn VideoVectorRepository,
) {
    info!(external_id = %video.external_id, "processing video");
    loop {
        let Some(processor) = selector.next(&video) else {
            // Nothing applies and the chain never ran a step this walk, so
            // the Ready flip still needs its own save.
            if video.status != VideoStatus::Ready {
                video.status = VideoStatus::Ready;
                if let Err(err) = relational.save(&video).await {
                    error!(video_id = %video.id, error = %err, "failed to save finished video");
                }
            }
            info!(external_id = %video.external_id, "chain complete");
            return;
        };

        info!(external_id = %video.external_id, processor = processor.name(), "applying processor");
        if let Err(err) = processor.apply(&mut video).await {
            error!(video_id = %video.id, error = %err, "processor failed, aborting chain");
            return;
        }
        if selector.next(&video).is_none() {
            video.status = VideoStatus::Ready;
        }
        if let Err(err) = relational.save(&video).await {
            error!(video_id = %video.id, error = %err, "failed to save video after processor");
            return;
        }
        if let Err(err) = vector.save(&video).await {
            error!(video_id = %video.id, error = %err, "failed to save video in vector store");
            return;
        }
    }
}
