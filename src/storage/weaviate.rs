//! Weaviate-backed vector repository.
//!
//! Objects live in a single `Video` class keyed by the video's row id: `save`
//! checks for an existing object and then updates or creates, so repeated
//! saves of the same video replace the stored object.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::model::Video;

use super::VideoVectorRepository;

const CLASS_NAME: &str = "Video";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct WeaviateConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Forwarded per request for the text2vec-openai vectorizer.
    pub openai_api_key: String,
    pub timeout: Duration,
}

impl Default for WeaviateConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8090".to_string(),
            api_key: String::new(),
            openai_api_key: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum WeaviateError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} returned {status}")]
    Api {
        operation: &'static str,
        status: StatusCode,
    },
}

pub struct WeaviateVideoRepository {
    http: HttpClient,
    cfg: WeaviateConfig,
}

impl WeaviateVideoRepository {
    pub fn new(cfg: WeaviateConfig) -> Result<Self, WeaviateError> {
        let http = HttpClient::builder().timeout(cfg.timeout).build()?;
        Ok(Self { http, cfg })
    }

    fn objects_url(&self) -> String {
        format!("{}/v1/objects", self.cfg.endpoint.trim_end_matches('/'))
    }

    fn object_url(&self, id: &str) -> String {
        format!("{}/{}/{}", self.objects_url(), CLASS_NAME, id)
    }

    fn schema_url(&self) -> String {
        format!("{}/v1/schema", self.cfg.endpoint.trim_end_matches('/'))
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.cfg.api_key)
            .header("X-OpenAI-Api-Key", &self.cfg.openai_api_key)
    }

    async fn exists(&self, id: &str) -> Result<bool, WeaviateError> {
        let resp = self.authed(self.http.head(self.object_url(id))).send().await?;
        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(WeaviateError::Api {
                operation: "object check",
                status,
            }),
        }
    }

    /// Drop the class if present and recreate it with the text2vec-openai
    /// vectorizer. Destroys all stored objects.
    pub async fn reset_schema(&self) -> Result<(), WeaviateError> {
        let url = format!("{}/{}", self.schema_url(), CLASS_NAME);
        let resp = self.authed(self.http.delete(&url)).send().await?;
        let status = resp.status();
        if !class_delete_done(status) {
            return Err(WeaviateError::Api {
                operation: "class delete",
                status,
            });
        }

        let class = json!({
            "class": CLASS_NAME,
            "vectorizer": "text2vec-openai",
            "moduleConfig": {
                "text2vec-openai": {
                    "model": "ada",
                    "modelVersion": "002",
                    "type": "text",
                },
            },
        });
        let resp = self
            .authed(self.http.post(self.schema_url()).json(&class))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(WeaviateError::Api {
                operation: "class create",
                status: resp.status(),
            });
        }
        Ok(())
    }
}

/// A schema delete is done when the class was removed or was never there.
/// Weaviate answers 400 for an absent class, 404 on some releases.
fn class_delete_done(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND
}

#[derive(Serialize)]
struct VideoObject<'a> {
    class: &'static str,
    id: &'a str,
    properties: VideoProperties<'a>,
}

#[derive(Serialize)]
struct VideoProperties<'a> {
    external_id: &'a str,
    channel_id: &'a str,
    title: &'a str,
    description: &'a str,
    summary: &'a str,
}

impl<'a> VideoObject<'a> {
    fn new(id: &'a str, video: &'a Video) -> Self {
        Self {
            class: CLASS_NAME,
            id,
            properties: VideoProperties {
                external_id: &video.external_id,
                channel_id: &video.channel_id,
                title: &video.title,
                description: &video.description,
                summary: &video.summary,
            },
        }
    }
}

#[async_trait]
impl VideoVectorRepository for WeaviateVideoRepository {
    async fn save(&self, video: &Video) -> anyhow::Result<()> {
        let id = video.id.to_string();
        let object = VideoObject::new(&id, video);

        let resp = if self.exists(&id).await? {
            self.authed(self.http.put(self.object_url(&id)).json(&object))
                .send()
                .await
                .map_err(WeaviateError::Http)?
        } else {
            self.authed(self.http.post(self.objects_url()).json(&object))
                .send()
                .await
                .map_err(WeaviateError::Http)?
        };
        if !resp.status().is_success() {
            return Err(WeaviateError::Api {
                operation: "object save",
                status: resp.status(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn object_payload_carries_class_id_and_properties() {
        let mut video = Video::new("yt-1", "ch-1");
        video.id = Uuid::nil();
        video.title = "a title".to_string();
        video.summary = "a summary".to_string();

        let id = video.id.to_string();
        let object = VideoObject::new(&id, &video);
        let value = serde_json::to_value(&object).unwrap();

        assert_eq!(value["class"], "Video");
        assert_eq!(value["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(value["properties"]["external_id"], "yt-1");
        assert_eq!(value["properties"]["title"], "a title");
        assert_eq!(value["properties"]["summary"], "a summary");
    }

    #[test]
    fn schema_delete_tolerates_an_absent_class() {
        assert!(class_delete_done(StatusCode::OK));
        assert!(class_delete_done(StatusCode::BAD_REQUEST));
        assert!(class_delete_done(StatusCode::NOT_FOUND));
        assert!(!class_delete_done(StatusCode::UNAUTHORIZED));
        assert!(!class_delete_done(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn urls_are_rooted_at_the_endpoint() {
        let repo = WeaviateVideoRepository::new(WeaviateConfig {
            endpoint: "http://vector:8090/".to_string(),
            ..WeaviateConfig::default()
        })
        .unwrap();
        assert_eq!(repo.objects_url(), "http://vector:8090/v1/objects");
        assert_eq!(repo.object_url("abc"), "http://vector:8090/v1/objects/Video/abc");
        assert_eq!(repo.schema_url(), "http://vector:8090/v1/schema");
    }
}
