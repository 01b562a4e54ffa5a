//! Periodic poll of the feed reader for unread entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::clients::miniflux::FeedReader;
use crate::model::Video;
use crate::storage::VideoRepository;

pub(super) struct FeedPoller {
    interval: Duration,
    videos: Arc<dyn VideoRepository>,
    reader: Arc<dyn FeedReader>,
    dispatch_tx: mpsc::Sender<Video>,
}

impl FeedPoller {
    pub(super) fn new(
        interval: Duration,
        videos: Arc<dyn VideoRepository>,
        reader: Arc<dyn FeedReader>,
        dispatch_tx: mpsc::Sender<Video>,
    ) -> Self {
        Self {
            interval,
            videos,
            reader,
            dispatch_tx,
        }
    }

    pub(super) async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "started feed poll");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if !self.poll_once().await {
                return;
            }
        }
    }

    /// Returns false once the dispatcher is gone.
    async fn poll_once(&self) -> bool {
        let entries = match self.reader.unread().await {
            Ok(entries) => entries,
            Err(err) => {
                error!(error = %err, "failed to fetch unread entries");
                return true;
            }
        };
        if entries.is_empty() {
            return true;
        }
        info!(count = entries.len(), "fetched unread entries");

        for entry in entries {
            let video = Video::new(entry.video_external_id, entry.channel_id);
            // Persist before acknowledging. The reverse order loses the
            // video entirely when the save fails: the remote unread flag is
            // already cleared and the entry never comes back.
            if let Err(err) = self.videos.save(&video).await {
                error!(external_id = %video.external_id, error = %err, "failed to save polled video");
                continue;
            }
            if self.dispatch_tx.send(video).await.is_err() {
                return false;
            }
            if let Err(err) = self.reader.mark_read(entry.entry_id).await {
                error!(entry_id = entry.entry_id, error = %err, "failed to mark entry as read");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::miniflux::{FeedEntry, MockFeedReader};
    use crate::model::VideoStatus;
    use crate::storage::memory::MemoryVideoRepository;

    fn entry(entry_id: i64, external_id: &str) -> FeedEntry {
        FeedEntry {
            entry_id,
            feed_id: 7,
            channel_id: "UC1".to_string(),
            video_external_id: external_id.to_string(),
        }
    }

    #[tokio::test]
    async fn persists_forwards_then_acknowledges() {
        let store = Arc::new(MemoryVideoRepository::new());
        let reader = Arc::new(MockFeedReader::new());
        reader.push_entry(entry(1, "yt-1"));
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel(10);

        let poller = FeedPoller::new(
            Duration::from_millis(20),
            store.clone(),
            reader.clone(),
            dispatch_tx,
        );
        tokio::spawn(poller.run());
        tokio::time::sleep(Duration::from_millis(150)).await;

        let video = store.get_by_external_id("yt-1").unwrap();
        assert_eq!(video.status, VideoStatus::New);
        assert_eq!(video.channel_id, "UC1");
        assert_eq!(reader.marked(), vec![1]);

        let forwarded = dispatch_rx.try_recv().unwrap();
        assert_eq!(forwarded.external_id, "yt-1");
        // The entry was acknowledged, so later ticks found nothing.
        assert!(dispatch_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn save_failure_skips_acknowledgement() {
        let store = Arc::new(MemoryVideoRepository::new());
        store.fail_saves(true);
        let reader = Arc::new(MockFeedReader::new());
        reader.push_entry(entry(1, "yt-1"));
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel(10);

        let poller = FeedPoller::new(
            Duration::from_millis(20),
            store.clone(),
            reader.clone(),
            dispatch_tx,
        );
        tokio::spawn(poller.run());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(store.is_empty());
        assert!(reader.marked().is_empty());
        assert!(dispatch_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unread_failure_does_not_stop_the_timer() {
        let store = Arc::new(MemoryVideoRepository::new());
        let reader = Arc::new(MockFeedReader::new());
        reader.push_error(anyhow::anyhow!("service unavailable"));
        reader.push_entry(entry(1, "yt-1"));
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel(10);

        let poller = FeedPoller::new(
            Duration::from_millis(20),
            store.clone(),
            reader.clone(),
            dispatch_tx,
        );
        tokio::spawn(poller.run());
        tokio::time::sleep(Duration::from_millis(150)).await;

        // First tick failed, a later tick picked the entry up anyway.
        assert_eq!(reader.marked(), vec![1]);
        assert!(dispatch_rx.try_recv().is_ok());
    }
}
