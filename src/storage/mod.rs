//! Persistence boundaries: relational repositories for feeds and videos plus
//! a vector-side repository for enriched videos.

pub mod memory;
pub mod postgres;
pub mod weaviate;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Feed, FeedStatus, Video, VideoStatus};

/// Relational persistence for feeds. `save` is an idempotent upsert keyed by
/// the feed id.
#[async_trait]
pub trait FeedRepository: Send + Sync {
    async fn save(&self, feed: &Feed) -> Result<()>;
    async fn find_by_status(&self, statuses: &[FeedStatus]) -> Result<Vec<Feed>>;
}

/// Relational persistence for videos. `save` is an idempotent upsert keyed by
/// the video id; a second row with the same external id is rejected.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn save(&self, video: &Video) -> Result<()>;
    async fn find_by_status(&self, statuses: &[VideoStatus]) -> Result<Vec<Video>>;
}

/// Vector-side persistence, keyed by the video id so repeated saves replace
/// the stored object instead of duplicating it.
#[async_trait]
pub trait VideoVectorRepository: Send + Sync {
    async fn save(&self, video: &Video) -> Result<()>;
}
