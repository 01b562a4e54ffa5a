//! Read-only HTTP API over processed videos.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::model::{Video, VideoStatus};
use crate::storage::VideoRepository;

#[derive(Clone)]
struct ApiState {
    videos: Arc<dyn VideoRepository>,
}

#[derive(Debug, Serialize)]
struct VideoOut {
    id: String,
    external_id: String,
    channel_id: String,
    title: String,
    duration: String,
    published_at: String,
    summary: String,
}

impl From<Video> for VideoOut {
    fn from(video: Video) -> Self {
        Self {
            id: video.id.to_string(),
            external_id: video.external_id,
            channel_id: video.channel_id,
            title: video.title,
            duration: video.duration,
            published_at: video.published_at,
            summary: video.summary,
        }
    }
}

pub fn router(videos: Arc<dyn VideoRepository>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/videos", get(list_videos))
        .with_state(ApiState { videos })
}

/// Bind and serve until the process exits.
pub async fn serve(videos: Arc<dyn VideoRepository>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http server started");
    axum::serve(listener, router(videos)).await?;
    Ok(())
}

async fn index() -> Json<Value> {
    Json(json!({"message": "tubefeed index"}))
}

async fn list_videos(State(state): State<ApiState>) -> Result<Json<Vec<VideoOut>>, StatusCode> {
    let videos = state
        .videos
        .find_by_status(&[VideoStatus::Ready])
        .await
        .map_err(|err| {
            error!(error = %err, "failed to list ready videos");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(videos.into_iter().map(VideoOut::from).collect()))
}
