//! In-memory repositories. They enforce the same uniqueness rules as the
//! Postgres schema and can be switched into a failing mode, which is what the
//! pipeline tests lean on.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Feed, FeedStatus, Video, VideoStatus};

use super::{FeedRepository, VideoRepository, VideoVectorRepository};

#[derive(Default)]
pub struct MemoryFeedRepository {
    feeds: Mutex<HashMap<Uuid, Feed>>,
    fail_saves: AtomicBool,
}

impl MemoryFeedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn insert(&self, feed: Feed) {
        self.feeds.lock().unwrap().insert(feed.id, feed);
    }

    pub fn get(&self, id: Uuid) -> Option<Feed> {
        self.feeds.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl FeedRepository for MemoryFeedRepository {
    async fn save(&self, feed: &Feed) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("feed saves disabled");
        }
        let mut feeds = self.feeds.lock().unwrap();
        if feeds
            .values()
            .any(|f| f.channel_id == feed.channel_id && f.id != feed.id)
        {
            bail!("duplicate channel id {}", feed.channel_id);
        }
        feeds.insert(feed.id, feed.clone());
        Ok(())
    }

    async fn find_by_status(&self, statuses: &[FeedStatus]) -> Result<Vec<Feed>> {
        let feeds = self.feeds.lock().unwrap();
        Ok(feeds
            .values()
            .filter(|f| statuses.contains(&f.status))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryVideoRepository {
    videos: Mutex<HashMap<Uuid, Video>>,
    save_count: AtomicUsize,
    fail_saves: AtomicBool,
    fail_finds: AtomicBool,
}

impl MemoryVideoRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_finds(&self, fail: bool) {
        self.fail_finds.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    pub fn insert(&self, video: Video) {
        self.videos.lock().unwrap().insert(video.id, video);
    }

    pub fn get(&self, id: Uuid) -> Option<Video> {
        self.videos.lock().unwrap().get(&id).cloned()
    }

    pub fn get_by_external_id(&self, external_id: &str) -> Option<Video> {
        self.videos
            .lock()
            .unwrap()
            .values()
            .find(|v| v.external_id == external_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.videos.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VideoRepository for MemoryVideoRepository {
    async fn save(&self, video: &Video) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("video saves disabled");
        }
        let mut videos = self.videos.lock().unwrap();
        if videos
            .values()
            .any(|v| v.external_id == video.external_id && v.id != video.id)
        {
            bail!("duplicate external id {}", video.external_id);
        }
        videos.insert(video.id, video.clone());
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_by_status(&self, statuses: &[VideoStatus]) -> Result<Vec<Video>> {
        if self.fail_finds.load(Ordering::SeqCst) {
            bail!("video finds disabled");
        }
        let videos = self.videos.lock().unwrap();
        Ok(videos
            .values()
            .filter(|v| statuses.contains(&v.status))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryVectorRepository {
    saved: Mutex<Vec<Video>>,
    fail_saves: AtomicBool,
}

impl MemoryVectorRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Vec<Video> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoVectorRepository for MemoryVectorRepository {
    async fn save(&self, video: &Video) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("vector saves disabled");
        }
        self.saved.lock().unwrap().push(video.clone());
        Ok(())
    }
}
