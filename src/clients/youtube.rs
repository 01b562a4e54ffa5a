//! YouTube Data API v3 client: paginated channel backlog search plus batched
//! video metadata lookup. Both pipelines talk to it through the two traits,
//! never through the client type itself.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const SEARCH_PAGE_SIZE: &str = "50";

/// One page of a channel backlog walk. An empty `next_page` means the
/// backlog is exhausted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchPage {
    pub video_ids: Vec<String>,
    pub next_page: String,
}

/// Metadata for one video, verbatim as the API returned it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub duration: String,
    pub published_at: String,
}

/// Walks a channel's uploads newest-first. Pass an empty cursor for the
/// first page.
#[async_trait]
pub trait ChannelSearch: Send + Sync {
    async fn search(&self, channel_id: &str, page_cursor: &str) -> Result<SearchPage>;
}

/// Multi-id metadata lookup. Ids missing from the response are simply absent
/// from the returned map.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch_metadata(&self, ids: &[String]) -> Result<HashMap<String, VideoMetadata>>;
}

#[derive(Clone, Debug)]
pub struct YoutubeConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum YoutubeError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} returned {status}")]
    Api {
        operation: &'static str,
        status: StatusCode,
    },
}

pub struct YoutubeClient {
    http: HttpClient,
    cfg: YoutubeConfig,
}

impl YoutubeClient {
    pub fn new(cfg: YoutubeConfig) -> Result<Self, YoutubeError> {
        let http = HttpClient::builder().timeout(cfg.timeout).build()?;
        Ok(Self { http, cfg })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: String,
}

#[derive(Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Deserialize)]
struct SearchItemId {
    #[serde(default, rename = "videoId")]
    video_id: String,
}

impl SearchResponse {
    fn into_page(self) -> SearchPage {
        SearchPage {
            video_ids: self
                .items
                .into_iter()
                .map(|item| item.id.video_id)
                .filter(|id| !id.is_empty())
                .collect(),
            next_page: self.next_page_token,
        }
    }
}

#[derive(Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Deserialize)]
struct VideoItem {
    id: String,
    snippet: Option<Snippet>,
    #[serde(rename = "contentDetails")]
    content_details: Option<ContentDetails>,
}

#[derive(Deserialize)]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "publishedAt")]
    published_at: String,
}

#[derive(Deserialize)]
struct ContentDetails {
    #[serde(default)]
    duration: String,
}

impl VideosResponse {
    fn into_metadata(self) -> HashMap<String, VideoMetadata> {
        let mut found = HashMap::with_capacity(self.items.len());
        for item in self.items {
            // No snippet means the video is gone or private; skip it.
            let Some(snippet) = item.snippet else {
                continue;
            };
            let duration = item
                .content_details
                .map(|d| d.duration)
                .unwrap_or_default();
            found.insert(
                item.id,
                VideoMetadata {
                    title: snippet.title,
                    description: snippet.description,
                    duration,
                    published_at: snippet.published_at,
                },
            );
        }
        found
    }
}

#[async_trait]
impl ChannelSearch for YoutubeClient {
    async fn search(&self, channel_id: &str, page_cursor: &str) -> Result<SearchPage> {
        let mut query = vec![
            ("part", "id"),
            ("type", "video"),
            ("order", "date"),
            ("maxResults", SEARCH_PAGE_SIZE),
            ("channelId", channel_id),
            ("key", self.cfg.api_key.as_str()),
        ];
        if !page_cursor.is_empty() {
            query.push(("pageToken", page_cursor));
        }

        let resp = self
            .http
            .get(self.endpoint("/search"))
            .query(&query)
            .send()
            .await
            .map_err(YoutubeError::Http)?;
        if !resp.status().is_success() {
            return Err(YoutubeError::Api {
                operation: "search",
                status: resp.status(),
            }
            .into());
        }
        let body: SearchResponse = resp.json().await.map_err(YoutubeError::Http)?;
        Ok(body.into_page())
    }
}

#[async_trait]
impl MetadataFetcher for YoutubeClient {
    async fn fetch_metadata(&self, ids: &[String]) -> Result<HashMap<String, VideoMetadata>> {
        let joined = ids.join(",");
        let resp = self
            .http
            .get(self.endpoint("/videos"))
            .query(&[
                ("part", "snippet,contentDetails"),
                ("id", joined.as_str()),
                ("key", self.cfg.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(YoutubeError::Http)?;
        if !resp.status().is_success() {
            return Err(YoutubeError::Api {
                operation: "videos list",
                status: resp.status(),
            }
            .into());
        }
        let body: VideosResponse = resp.json().await.map_err(YoutubeError::Http)?;
        Ok(body.into_metadata())
    }
}

/// Scripted channel search: queued pages are handed out in order and every
/// call is recorded. An exhausted queue yields the empty page.
#[derive(Default)]
pub struct MockChannelSearch {
    pages: Mutex<VecDeque<Result<SearchPage>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockChannelSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_page(&self, page: Result<SearchPage>) {
        self.pages.lock().unwrap().push_back(page);
    }

    /// Recorded (channel id, cursor) pairs.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelSearch for MockChannelSearch {
    async fn search(&self, channel_id: &str, page_cursor: &str) -> Result<SearchPage> {
        self.calls
            .lock()
            .unwrap()
            .push((channel_id.to_string(), page_cursor.to_string()));
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SearchPage::default()))
    }
}

/// Scripted metadata lookup: queued responses in call order, calls recorded.
/// An exhausted queue yields an empty map.
#[derive(Default)]
pub struct MockMetadataFetcher {
    responses: Mutex<VecDeque<Result<HashMap<String, VideoMetadata>>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockMetadataFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<HashMap<String, VideoMetadata>>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Convenience: queue a response with the same stub metadata for each id.
    pub fn push_metadata_for(&self, ids: &[&str]) {
        let found = ids
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    VideoMetadata {
                        title: format!("title {id}"),
                        description: format!("description {id}"),
                        duration: "PT10M".to_string(),
                        published_at: "2023-05-01T10:00:00Z".to_string(),
                    },
                )
            })
            .collect();
        self.push_response(Ok(found));
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataFetcher for MockMetadataFetcher {
    async fn fetch_metadata(&self, ids: &[String]) -> Result<HashMap<String, VideoMetadata>> {
        self.calls.lock().unwrap().push(ids.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(HashMap::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_response() {
        let raw = r#"{
            "nextPageToken": "CAUQAA",
            "items": [
                {"id": {"kind": "youtube#video", "videoId": "abc"}},
                {"id": {"kind": "youtube#video", "videoId": "def"}}
            ]
        }"#;
        let body: SearchResponse = serde_json::from_str(raw).unwrap();
        let page = body.into_page();
        assert_eq!(page.video_ids, vec!["abc", "def"]);
        assert_eq!(page.next_page, "CAUQAA");
    }

    #[test]
    fn last_search_page_has_empty_cursor() {
        let raw = r#"{"items": [{"id": {"videoId": "abc"}}]}"#;
        let body: SearchResponse = serde_json::from_str(raw).unwrap();
        let page = body.into_page();
        assert_eq!(page.video_ids, vec!["abc"]);
        assert!(page.next_page.is_empty());
    }

    #[test]
    fn parses_videos_response_and_skips_missing_snippets() {
        let raw = r#"{
            "items": [
                {
                    "id": "abc",
                    "snippet": {
                        "title": "A Video",
                        "description": "About things.",
                        "publishedAt": "2023-05-01T10:00:00Z"
                    },
                    "contentDetails": {"duration": "PT4M13S"}
                },
                {"id": "gone"}
            ]
        }"#;
        let body: VideosResponse = serde_json::from_str(raw).unwrap();
        let found = body.into_metadata();
        assert_eq!(found.len(), 1);
        let md = &found["abc"];
        assert_eq!(md.title, "A Video");
        assert_eq!(md.duration, "PT4M13S");
        assert_eq!(md.published_at, "2023-05-01T10:00:00Z");
    }

    #[test]
    fn missing_content_details_leaves_duration_empty() {
        let raw = r#"{"items": [{"id": "abc", "snippet": {"title": "t"}}]}"#;
        let body: VideosResponse = serde_json::from_str(raw).unwrap();
        let found = body.into_metadata();
        assert_eq!(found["abc"].duration, "");
    }

    #[tokio::test]
    async fn mock_search_records_calls_in_order() {
        let search = MockChannelSearch::new();
        search.push_page(Ok(SearchPage {
            video_ids: vec!["a".to_string()],
            next_page: "p2".to_string(),
        }));
        let page = search.search("UC1", "").await.unwrap();
        assert_eq!(page.next_page, "p2");
        let empty = search.search("UC1", "p2").await.unwrap();
        assert!(empty.video_ids.is_empty());
        assert_eq!(
            search.calls(),
            vec![
                ("UC1".to_string(), String::new()),
                ("UC1".to_string(), "p2".to_string())
            ]
        );
    }
}
