//! Historical backlog crawl for newly subscribed feeds.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::clients::youtube::ChannelSearch;
use crate::model::{Feed, FeedStatus, Video};
use crate::storage::{FeedRepository, VideoRepository};

pub(super) struct HistoricalCrawler {
    feeds: Arc<dyn FeedRepository>,
    videos: Arc<dyn VideoRepository>,
    search: Arc<dyn ChannelSearch>,
    feed_rx: mpsc::Receiver<Feed>,
    dispatch_tx: mpsc::Sender<Video>,
}

impl HistoricalCrawler {
    pub(super) fn new(
        feeds: Arc<dyn FeedRepository>,
        videos: Arc<dyn VideoRepository>,
        search: Arc<dyn ChannelSearch>,
        feed_rx: mpsc::Receiver<Feed>,
        dispatch_tx: mpsc::Sender<Video>,
    ) -> Self {
        Self {
            feeds,
            videos,
            search,
            feed_rx,
            dispatch_tx,
        }
    }

    pub(super) async fn run(mut self) {
        info!("started historical crawl");
        while let Some(mut feed) = self.feed_rx.recv().await {
            info!(channel_id = %feed.channel_id, "crawling channel backlog");
            if !self.crawl_feed(&feed).await {
                continue;
            }
            feed.status = FeedStatus::Ready;
            if let Err(err) = self.feeds.save(&feed).await {
                error!(channel_id = %feed.channel_id, error = %err, "failed to save crawled feed");
            }
        }
    }

    /// Walk every backlog page of one feed. Returns false when the crawl was
    /// abandoned mid-way; the feed then stays New and a later run redoes it.
    async fn crawl_feed(&self, feed: &Feed) -> bool {
        let mut cursor = String::new();
        loop {
            let page = match self.search.search(&feed.channel_id, &cursor).await {
                Ok(page) => page,
                Err(err) => {
                    error!(
                        channel_id = %feed.channel_id,
                        cursor = %cursor,
                        error = %err,
                        "backlog page fetch failed, abandoning crawl"
                    );
                    return false;
                }
            };
            info!(
                channel_id = %feed.channel_id,
                count = page.video_ids.len(),
                "fetched backlog page"
            );
            for external_id in page.video_ids {
                let video = Video::new(external_id, feed.channel_id.clone());
                if let Err(err) = self.videos.save(&video).await {
                    error!(external_id = %video.external_id, error = %err, "failed to save discovered video");
                    continue;
                }
                if self.dispatch_tx.send(video).await.is_err() {
                    return false;
                }
            }
            if page.next_page.is_empty() {
                return true;
            }
            cursor = page.next_page;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::youtube::{MockChannelSearch, SearchPage};
    use crate::model::VideoStatus;
    use crate::storage::memory::{MemoryFeedRepository, MemoryVideoRepository};

    fn page(ids: &[&str], next: &str) -> SearchPage {
        SearchPage {
            video_ids: ids.iter().map(|s| s.to_string()).collect(),
            next_page: next.to_string(),
        }
    }

    async fn run_crawler(
        search: Arc<MockChannelSearch>,
        feeds: Arc<MemoryFeedRepository>,
        videos: Arc<MemoryVideoRepository>,
        feed: Feed,
    ) -> Vec<Video> {
        let (feed_tx, feed_rx) = mpsc::channel(10);
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel(100);
        let crawler = HistoricalCrawler::new(feeds, videos, search, feed_rx, dispatch_tx);
        let handle = tokio::spawn(crawler.run());

        feed_tx.send(feed).await.unwrap();
        drop(feed_tx);
        handle.await.unwrap();

        let mut out = Vec::new();
        while let Ok(video) = dispatch_rx.try_recv() {
            out.push(video);
        }
        out
    }

    #[tokio::test]
    async fn walks_every_page_then_marks_feed_ready() {
        let search = Arc::new(MockChannelSearch::new());
        search.push_page(Ok(page(&["v1", "v2"], "p2")));
        search.push_page(Ok(page(&["v3"], "")));

        let feeds = Arc::new(MemoryFeedRepository::new());
        let videos = Arc::new(MemoryVideoRepository::new());
        let feed = Feed::new("UC1", "Channel One");
        feeds.insert(feed.clone());

        let emitted = run_crawler(search.clone(), feeds.clone(), videos.clone(), feed.clone()).await;

        assert_eq!(
            search.calls(),
            vec![
                ("UC1".to_string(), String::new()),
                ("UC1".to_string(), "p2".to_string())
            ]
        );
        assert_eq!(emitted.len(), 3);
        assert!(emitted.iter().all(|v| v.status == VideoStatus::New));
        assert_eq!(videos.len(), 3);
        assert_eq!(feeds.get(feed.id).unwrap().status, FeedStatus::Ready);
    }

    #[tokio::test]
    async fn single_page_backlog() {
        let search = Arc::new(MockChannelSearch::new());
        search.push_page(Ok(page(&["v1", "v2"], "")));

        let feeds = Arc::new(MemoryFeedRepository::new());
        let videos = Arc::new(MemoryVideoRepository::new());
        let feed = Feed::new("C1", "F1");
        feeds.insert(feed.clone());

        let emitted = run_crawler(search.clone(), feeds.clone(), videos.clone(), feed.clone()).await;

        assert_eq!(search.calls().len(), 1);
        assert_eq!(emitted.len(), 2);
        assert_eq!(videos.len(), 2);
        assert_eq!(feeds.get(feed.id).unwrap().status, FeedStatus::Ready);
    }

    #[tokio::test]
    async fn page_failure_abandons_crawl_and_leaves_feed_new() {
        let search = Arc::new(MockChannelSearch::new());
        search.push_page(Ok(page(&["v1"], "p2")));
        search.push_page(Err(anyhow::anyhow!("quota exceeded")));

        let feeds = Arc::new(MemoryFeedRepository::new());
        let videos = Arc::new(MemoryVideoRepository::new());
        let feed = Feed::new("UC1", "Channel One");
        feeds.insert(feed.clone());

        let emitted = run_crawler(search.clone(), feeds.clone(), videos.clone(), feed.clone()).await;

        assert_eq!(search.calls().len(), 2);
        assert_eq!(emitted.len(), 1);
        assert_eq!(feeds.get(feed.id).unwrap().status, FeedStatus::New);
    }

    #[tokio::test]
    async fn feed_save_failure_leaves_the_feed_new_for_a_later_run() {
        let search = Arc::new(MockChannelSearch::new());
        search.push_page(Ok(page(&["v1"], "")));

        let feeds = Arc::new(MemoryFeedRepository::new());
        let videos = Arc::new(MemoryVideoRepository::new());
        let feed = Feed::new("UC1", "Channel One");
        feeds.insert(feed.clone());
        feeds.fail_saves(true);

        let emitted = run_crawler(search.clone(), feeds.clone(), videos.clone(), feed.clone()).await;

        // The backlog walk itself finished; only the Ready flip was lost.
        assert_eq!(emitted.len(), 1);
        assert_eq!(videos.len(), 1);
        assert_eq!(feeds.get(feed.id).unwrap().status, FeedStatus::New);
    }

    #[tokio::test]
    async fn duplicate_discovery_is_not_forwarded() {
        let search = Arc::new(MockChannelSearch::new());
        search.push_page(Ok(page(&["v1"], "")));

        let feeds = Arc::new(MemoryFeedRepository::new());
        let videos = Arc::new(MemoryVideoRepository::new());
        // Same external id discovered on an earlier run.
        videos.insert(Video::new("v1", "UC1"));
        let feed = Feed::new("UC1", "Channel One");
        feeds.insert(feed.clone());

        let emitted = run_crawler(search.clone(), feeds.clone(), videos.clone(), feed.clone()).await;

        assert!(emitted.is_empty());
        assert_eq!(videos.len(), 1);
        assert_eq!(feeds.get(feed.id).unwrap().status, FeedStatus::Ready);
    }
}
