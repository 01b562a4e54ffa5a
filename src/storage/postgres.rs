//! Postgres-backed repositories.
//!
//! Statuses are stored as text and parsed back through the model enums, so an
//! unknown value in the database surfaces as an error instead of a silent
//! misroute.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::model::{Feed, FeedStatus, Video, VideoStatus};

use super::{FeedRepository, VideoRepository};

/// Connect to Postgres and apply any pending migrations (idempotent).
pub async fn init_pool(dsn: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new().max_connections(5).connect(dsn).await?;
    sqlx::migrate!().run(&pool).await?;
    Ok(pool)
}

#[derive(FromRow)]
struct FeedRow {
    id: Uuid,
    status: String,
    title: String,
    channel_id: String,
}

impl FeedRow {
    fn into_feed(self) -> Result<Feed> {
        let status = FeedStatus::parse(&self.status)
            .ok_or_else(|| anyhow::anyhow!("unknown feed status {:?} for {}", self.status, self.id))?;
        Ok(Feed {
            id: self.id,
            status,
            title: self.title,
            channel_id: self.channel_id,
        })
    }
}

pub struct PostgresFeedRepository {
    pool: PgPool,
}

impl PostgresFeedRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedRepository for PostgresFeedRepository {
    async fn save(&self, feed: &Feed) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feed (id, status, title, channel_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
               SET status = EXCLUDED.status,
                   title = EXCLUDED.title,
                   channel_id = EXCLUDED.channel_id
            "#,
        )
        .bind(feed.id)
        .bind(feed.status.as_str())
        .bind(&feed.title)
        .bind(&feed.channel_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_status(&self, statuses: &[FeedStatus]) -> Result<Vec<Feed>> {
        let wanted: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows: Vec<FeedRow> = sqlx::query_as(
            "SELECT id, status, title, channel_id FROM feed WHERE status = ANY($1)",
        )
        .bind(&wanted)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FeedRow::into_feed).collect()
    }
}

#[derive(FromRow)]
struct VideoRow {
    id: Uuid,
    status: String,
    external_id: String,
    channel_id: String,
    title: String,
    description: String,
    duration: String,
    published_at: String,
    summary: String,
}

impl VideoRow {
    fn into_video(self) -> Result<Video> {
        let status = VideoStatus::parse(&self.status)
            .ok_or_else(|| anyhow::anyhow!("unknown video status {:?} for {}", self.status, self.id))?;
        Ok(Video {
            id: self.id,
            status,
            external_id: self.external_id,
            channel_id: self.channel_id,
            title: self.title,
            description: self.description,
            duration: self.duration,
            published_at: self.published_at,
            summary: self.summary,
        })
    }
}

pub struct PostgresVideoRepository {
    pool: PgPool,
}

impl PostgresVideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoRepository for PostgresVideoRepository {
    async fn save(&self, video: &Video) -> Result<()> {
        // Conflicts on external_id are not handled here: a second discovery
        // of the same video carries a different row id and must fail.
        sqlx::query(
            r#"
            INSERT INTO video
                (id, status, external_id, channel_id, title, description, duration, published_at, summary)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
               SET status = EXCLUDED.status,
                   title = EXCLUDED.title,
                   description = EXCLUDED.description,
                   duration = EXCLUDED.duration,
                   published_at = EXCLUDED.published_at,
                   summary = EXCLUDED.summary
            "#,
        )
        .bind(video.id)
        .bind(video.status.as_str())
        .bind(&video.external_id)
        .bind(&video.channel_id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.duration)
        .bind(&video.published_at)
        .bind(&video.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_status(&self, statuses: &[VideoStatus]) -> Result<Vec<Video>> {
        let wanted: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows: Vec<VideoRow> = sqlx::query_as(
            r#"
            SELECT id, status, external_id, channel_id, title, description, duration, published_at, summary
            FROM video
            WHERE status = ANY($1)
            "#,
        )
        .bind(&wanted)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(VideoRow::into_video).collect()
    }
}
