//! Fetch pipeline: backlog crawl, periodic poll, status dispatch and batched
//! metadata retrieval.
//!
//! Every stage runs as its own task and talks to the others only through
//! bounded channels; a video moves through exactly one stage at a time. All
//! routing happens in the dispatcher, so each status change passes through a
//! single choke point.

mod batch;
mod crawl;
mod poll;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::clients::miniflux::FeedReader;
use crate::clients::youtube::{ChannelSearch, MetadataFetcher};
use crate::model::{Feed, FeedStatus, Video, VideoStatus};
use crate::storage::{FeedRepository, VideoRepository};

use batch::MetadataBatcher;
use crawl::HistoricalCrawler;
use poll::FeedPoller;

#[derive(Clone, Debug)]
pub struct FetcherConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub batch_idle: Duration,
    pub channel_capacity: usize,
}

pub struct Fetcher {
    feeds: Arc<dyn FeedRepository>,
    videos: Arc<dyn VideoRepository>,
    reader: Arc<dyn FeedReader>,
    search: Arc<dyn ChannelSearch>,
    metadata: Arc<dyn MetadataFetcher>,
    config: FetcherConfig,
}

impl Fetcher {
    pub fn new(
        feeds: Arc<dyn FeedRepository>,
        videos: Arc<dyn VideoRepository>,
        reader: Arc<dyn FeedReader>,
        search: Arc<dyn ChannelSearch>,
        metadata: Arc<dyn MetadataFetcher>,
        config: FetcherConfig,
    ) -> Self {
        Self {
            feeds,
            videos,
            reader,
            search,
            metadata,
            config,
        }
    }

    /// Spawn every stage. The returned receiver is the pipeline's output
    /// boundary: videos leave it in status Fetched, metadata complete.
    pub fn start(self) -> mpsc::Receiver<Video> {
        let cap = self.config.channel_capacity;
        let (dispatch_tx, dispatch_rx) = mpsc::channel(cap);
        let (feed_tx, feed_rx) = mpsc::channel(cap);
        let (needs_metadata_tx, needs_metadata_rx) = mpsc::channel(cap);
        let (out_tx, out_rx) = mpsc::channel(cap);

        let crawler = HistoricalCrawler::new(
            self.feeds.clone(),
            self.videos.clone(),
            self.search,
            feed_rx,
            dispatch_tx.clone(),
        );
        tokio::spawn(crawler.run());

        let poller = FeedPoller::new(
            self.config.poll_interval,
            self.videos.clone(),
            self.reader,
            dispatch_tx.clone(),
        );
        tokio::spawn(poller.run());

        let batcher = MetadataBatcher::new(
            self.config.batch_size,
            self.config.batch_idle,
            self.videos.clone(),
            self.metadata,
            needs_metadata_rx,
            dispatch_tx.clone(),
        );
        tokio::spawn(batcher.run());

        tokio::spawn(find_new_feeds(self.feeds, feed_tx));
        tokio::spawn(find_unprocessed(self.videos.clone(), dispatch_tx));

        let dispatcher = Dispatcher {
            videos: self.videos,
            needs_metadata_tx,
            out_tx,
        };
        tokio::spawn(dispatcher.run(dispatch_rx));

        out_rx
    }
}

/// One-shot startup scan for feeds whose backlog has never been crawled.
async fn find_new_feeds(feeds: Arc<dyn FeedRepository>, feed_tx: mpsc::Sender<Feed>) {
    info!("looking for new feeds");
    let found = match feeds.find_by_status(&[FeedStatus::New]).await {
        Ok(found) => found,
        Err(err) => {
            error!(error = %err, "failed to fetch new feeds");
            return;
        }
    };
    info!(count = found.len(), "found new feeds");
    for feed in found {
        if feed_tx.send(feed).await.is_err() {
            return;
        }
    }
}

/// One-shot startup scan re-injecting videos a previous run left in a
/// non-terminal status.
async fn find_unprocessed(videos: Arc<dyn VideoRepository>, dispatch_tx: mpsc::Sender<Video>) {
    info!("looking for unprocessed videos");
    let found = match videos
        .find_by_status(&[VideoStatus::New, VideoStatus::Fetched])
        .await
    {
        Ok(found) => found,
        Err(err) => {
            error!(error = %err, "failed to fetch unprocessed videos");
            return;
        }
    };
    info!(count = found.len(), "found unprocessed videos");
    for video in found {
        if dispatch_tx.send(video).await.is_err() {
            return;
        }
    }
}

struct Dispatcher {
    videos: Arc<dyn VideoRepository>,
    needs_metadata_tx: mpsc::Sender<Video>,
    out_tx: mpsc::Sender<Video>,
}

impl Dispatcher {
    /// Persist every incoming video, then route it by status. A failed save
    /// drops the video from this cycle; the recovery scan of a later run
    /// picks it up again.
    async fn run(self, mut rx: mpsc::Receiver<Video>) {
        info!("started dispatcher");
        while let Some(video) = rx.recv().await {
            if let Err(err) = self.videos.save(&video).await {
                error!(video_id = %video.id, error = %err, "failed to save video, dropping from cycle");
                continue;
            }
            let forwarded = match video.status {
                VideoStatus::New => self.needs_metadata_tx.send(video).await.is_ok(),
                VideoStatus::Fetched => self.out_tx.send(video).await.is_ok(),
                // Terminal; nothing downstream wants it.
                VideoStatus::Ready => true,
            };
            if !forwarded {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::miniflux::MockFeedReader;
    use crate::clients::youtube::{MockChannelSearch, MockMetadataFetcher, SearchPage};
    use crate::storage::memory::{MemoryFeedRepository, MemoryVideoRepository};
    use tokio::time::timeout;

    fn test_config() -> FetcherConfig {
        FetcherConfig {
            poll_interval: Duration::from_secs(60),
            batch_size: 50,
            batch_idle: Duration::from_millis(50),
            channel_capacity: 10,
        }
    }

    struct DispatcherHarness {
        store: Arc<MemoryVideoRepository>,
        tx: mpsc::Sender<Video>,
        needs_metadata_rx: mpsc::Receiver<Video>,
        out_rx: mpsc::Receiver<Video>,
    }

    fn start_dispatcher() -> DispatcherHarness {
        let store = Arc::new(MemoryVideoRepository::new());
        let (tx, rx) = mpsc::channel(10);
        let (needs_metadata_tx, needs_metadata_rx) = mpsc::channel(10);
        let (out_tx, out_rx) = mpsc::channel(10);
        let dispatcher = Dispatcher {
            videos: store.clone(),
            needs_metadata_tx,
            out_tx,
        };
        tokio::spawn(dispatcher.run(rx));
        DispatcherHarness {
            store,
            tx,
            needs_metadata_rx,
            out_rx,
        }
    }

    #[tokio::test]
    async fn new_videos_route_to_metadata_and_never_out() {
        let mut harness = start_dispatcher();
        let video = Video::new("yt-1", "UC1");
        harness.tx.send(video.clone()).await.unwrap();

        let routed = timeout(Duration::from_secs(2), harness.needs_metadata_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(routed.id, video.id);
        assert!(harness.out_rx.try_recv().is_err());
        assert_eq!(harness.store.get(video.id).unwrap().status, VideoStatus::New);
    }

    #[tokio::test]
    async fn fetched_videos_route_out_and_never_back() {
        let mut harness = start_dispatcher();
        let mut video = Video::new("yt-1", "UC1");
        video.status = VideoStatus::Fetched;
        harness.tx.send(video.clone()).await.unwrap();

        let routed = timeout(Duration::from_secs(2), harness.out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(routed.id, video.id);
        assert!(harness.needs_metadata_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_save_drops_the_video_from_the_cycle() {
        let mut harness = start_dispatcher();
        harness.store.fail_saves(true);
        harness.tx.send(Video::new("yt-1", "UC1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(harness.needs_metadata_rx.try_recv().is_err());
        assert!(harness.out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn recovery_scan_reinjects_unfinished_videos_once() {
        let store = Arc::new(MemoryVideoRepository::new());
        let new = Video::new("yt-new", "UC1");
        let mut fetched = Video::new("yt-fetched", "UC1");
        fetched.status = VideoStatus::Fetched;
        let mut ready = Video::new("yt-ready", "UC1");
        ready.status = VideoStatus::Ready;
        store.insert(new.clone());
        store.insert(fetched.clone());
        store.insert(ready.clone());

        let (tx, mut rx) = mpsc::channel(10);
        find_unprocessed(store, tx).await;

        let mut seen = Vec::new();
        while let Ok(video) = rx.try_recv() {
            seen.push(video.external_id);
        }
        seen.sort();
        assert_eq!(seen, vec!["yt-fetched", "yt-new"]);
    }

    #[tokio::test]
    async fn crawled_backlog_flows_to_the_output_boundary() {
        let feeds = Arc::new(MemoryFeedRepository::new());
        let videos = Arc::new(MemoryVideoRepository::new());
        let reader = Arc::new(MockFeedReader::new());
        let search = Arc::new(MockChannelSearch::new());
        let metadata = Arc::new(MockMetadataFetcher::new());

        let feed = Feed::new("C1", "F1");
        feeds.insert(feed.clone());
        search.push_page(Ok(SearchPage {
            video_ids: vec!["v1".to_string(), "v2".to_string()],
            next_page: String::new(),
        }));
        metadata.push_metadata_for(&["v1", "v2"]);

        let fetcher = Fetcher::new(
            feeds.clone(),
            videos.clone(),
            reader,
            search.clone(),
            metadata,
            test_config(),
        );
        let mut out_rx = fetcher.start();

        let first = timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(search.calls().len(), 1);
        for video in [&first, &second] {
            assert_eq!(video.status, VideoStatus::Fetched);
            assert!(!video.title.is_empty());
            assert_eq!(
                videos.get(video.id).unwrap().status,
                VideoStatus::Fetched
            );
        }
        assert_eq!(feeds.get(feed.id).unwrap().status, FeedStatus::Ready);
    }
}
