//! Miniflux client: list unread entries, acknowledge them once ingested.
//!
//! Miniflux subscribes to the channels' RSS feeds for us; every unread entry
//! is a watch URL plus the feed's site URL, from which the video and channel
//! identifiers are extracted.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One unread entry, reduced to the identifiers the pipeline needs.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedEntry {
    pub entry_id: i64,
    pub feed_id: i64,
    pub channel_id: String,
    pub video_external_id: String,
}

/// Read side of the subscription reader.
#[async_trait]
pub trait FeedReader: Send + Sync {
    async fn unread(&self) -> Result<Vec<FeedEntry>>;
    async fn mark_read(&self, entry_id: i64) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct MinifluxConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl Default for MinifluxConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost".to_string(),
            api_key: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum MinifluxError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} returned {status}")]
    Api {
        operation: &'static str,
        status: StatusCode,
    },
}

pub struct MinifluxClient {
    http: HttpClient,
    cfg: MinifluxConfig,
}

impl MinifluxClient {
    pub fn new(cfg: MinifluxConfig) -> Result<Self, MinifluxError> {
        let http = HttpClient::builder().timeout(cfg.timeout).build()?;
        Ok(Self { http, cfg })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.cfg.endpoint.trim_end_matches('/'), path)
    }
}

#[derive(Deserialize)]
struct EntriesResponse {
    #[serde(default)]
    entries: Vec<ApiEntry>,
}

#[derive(Deserialize)]
struct ApiEntry {
    id: i64,
    feed_id: i64,
    #[serde(default)]
    url: String,
    #[serde(default)]
    feed: ApiFeed,
}

#[derive(Default, Deserialize)]
struct ApiFeed {
    #[serde(default)]
    site_url: String,
}

#[derive(Serialize)]
struct UpdateEntries<'a> {
    entry_ids: &'a [i64],
    status: &'a str,
}

/// Extract the video id from a watch URL. Handles the `watch?v=` form and
/// the short `youtu.be/<id>` form.
fn video_id_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
        if !v.is_empty() {
            return Some(v.into_owned());
        }
    }
    if url.host_str() == Some("youtu.be") {
        let id = url.path().trim_start_matches('/');
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    None
}

/// Extract the channel id from a feed's site URL (`.../channel/<id>`).
fn channel_id_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let mut segments = url.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "channel" {
            return segments
                .next()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());
        }
    }
    None
}

#[async_trait]
impl FeedReader for MinifluxClient {
    async fn unread(&self) -> Result<Vec<FeedEntry>> {
        let resp = self
            .http
            .get(self.endpoint("/v1/entries"))
            .header("X-Auth-Token", &self.cfg.api_key)
            .query(&[("status", "unread")])
            .send()
            .await
            .map_err(MinifluxError::Http)?;
        if !resp.status().is_success() {
            return Err(MinifluxError::Api {
                operation: "entries list",
                status: resp.status(),
            }
            .into());
        }
        let body: EntriesResponse = resp.json().await.map_err(MinifluxError::Http)?;

        let mut entries = Vec::with_capacity(body.entries.len());
        for entry in body.entries {
            let Some(video_external_id) = video_id_from_url(&entry.url) else {
                warn!(entry_id = entry.id, url = %entry.url, "entry url is not a watch url, skipping");
                continue;
            };
            let channel_id = channel_id_from_url(&entry.feed.site_url).unwrap_or_default();
            entries.push(FeedEntry {
                entry_id: entry.id,
                feed_id: entry.feed_id,
                channel_id,
                video_external_id,
            });
        }
        Ok(entries)
    }

    async fn mark_read(&self, entry_id: i64) -> Result<()> {
        let resp = self
            .http
            .put(self.endpoint("/v1/entries"))
            .header("X-Auth-Token", &self.cfg.api_key)
            .json(&UpdateEntries {
                entry_ids: &[entry_id],
                status: "read",
            })
            .send()
            .await
            .map_err(MinifluxError::Http)?;
        if !resp.status().is_success() {
            return Err(MinifluxError::Api {
                operation: "entries update",
                status: resp.status(),
            }
            .into());
        }
        Ok(())
    }
}

/// Scripted feed reader. Entries disappear from `unread` once marked read,
/// mirroring the live service.
#[derive(Default)]
pub struct MockFeedReader {
    entries: Mutex<Vec<FeedEntry>>,
    marked: Mutex<Vec<i64>>,
    errors: Mutex<VecDeque<anyhow::Error>>,
}

impl MockFeedReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_entry(&self, entry: FeedEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    /// Queue an error for the next `unread` call.
    pub fn push_error(&self, err: anyhow::Error) {
        self.errors.lock().unwrap().push_back(err);
    }

    pub fn marked(&self) -> Vec<i64> {
        self.marked.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedReader for MockFeedReader {
    async fn unread(&self) -> Result<Vec<FeedEntry>> {
        if let Some(err) = self.errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn mark_read(&self, entry_id: i64) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .retain(|e| e.entry_id != entry_id);
        self.marked.lock().unwrap().push(entry_id);
        Ok(())
    }
}
