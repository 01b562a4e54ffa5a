//! Domain types shared across the fetch and processor pipelines.

use uuid::Uuid;

/// Lifecycle of a subscribed feed. `New` until the channel backlog has been
/// crawled, `Ready` afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedStatus {
    New,
    Ready,
}

impl FeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStatus::New => "new",
            FeedStatus::Ready => "ready",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(FeedStatus::New),
            "ready" => Some(FeedStatus::Ready),
            _ => None,
        }
    }
}

/// Lifecycle of a video. `New` is identity only, `Fetched` has complete
/// metadata, `Ready` has passed the whole enrichment chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoStatus {
    New,
    Fetched,
    Ready,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::New => "new",
            VideoStatus::Fetched => "fetched",
            VideoStatus::Ready => "ready",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(VideoStatus::New),
            "fetched" => Some(VideoStatus::Fetched),
            "ready" => Some(VideoStatus::Ready),
            _ => None,
        }
    }
}

/// A subscribed channel. `channel_id` is the upstream platform identifier
/// and is unique across feeds.
#[derive(Clone, Debug, PartialEq)]
pub struct Feed {
    pub id: Uuid,
    pub status: FeedStatus,
    pub title: String,
    pub channel_id: String,
}

impl Feed {
    pub fn new(channel_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: FeedStatus::New,
            title: title.into(),
            channel_id: channel_id.into(),
        }
    }
}

/// A single video moving through the pipelines. Metadata strings are kept
/// verbatim as the upstream API returned them, `duration` and `published_at`
/// included.
#[derive(Clone, Debug, PartialEq)]
pub struct Video {
    pub id: Uuid,
    pub status: VideoStatus,
    pub external_id: String,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub duration: String,
    pub published_at: String,
    pub summary: String,
}

impl Video {
    /// A freshly discovered video: identity only, metadata arrives later.
    pub fn new(external_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: VideoStatus::New,
            external_id: external_id.into(),
            channel_id: channel_id.into(),
            title: String::new(),
            description: String::new(),
            duration: String::new(),
            published_at: String::new(),
            summary: String::new(),
        }
    }
}
