use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tracing::{error, info};

mod api;
mod clients;
mod config;
mod feeds;
mod fetch;
mod model;
mod process;
mod storage;
mod telemetry;

use clients::miniflux::{MinifluxClient, MinifluxConfig};
use clients::openai::{OpenAiConfig, OpenAiSummarizer};
use clients::youtube::{YoutubeClient, YoutubeConfig};
use config::Config;
use fetch::{Fetcher, FetcherConfig};
use process::{Pipeline, Processor, Selector, SummaryProcessor};
use storage::postgres::{self, PostgresFeedRepository, PostgresVideoRepository};
use storage::weaviate::{WeaviateConfig, WeaviateVideoRepository};
use storage::{FeedRepository, VideoRepository, VideoVectorRepository};

#[derive(Parser)]
#[command(name = "tubefeed", about = "YouTube channel ingestion and enrichment service")]
struct Cli {
    /// Override DATABASE_URL from the environment
    #[arg(global = true, long)]
    dsn: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the fetch pipeline, the processing pipeline and the read API
    Serve,
    /// Create the relational schema, applying pending migrations
    Init,
    /// Drop and recreate the vector store class
    VectorInit,
    Feed(feeds::FeedCmd),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    // logging/tracing to stderr. Respects RUST_LOG and TUBEFEED_LOG_FORMAT
    telemetry::init_tracing();

    let mut config = Config::from_env();
    if let Some(dsn) = cli.dsn {
        config.database_url = dsn;
    }

    match cli.command {
        Commands::Serve => serve(&config).await?,
        Commands::Init => {
            postgres::init_pool(&config.database_url).await?;
            info!("database initialized");
        }
        Commands::VectorInit => {
            let vector = WeaviateVideoRepository::new(weaviate_config(&config))?;
            vector.reset_schema().await?;
            info!("vector schema reset");
        }
        Commands::Feed(args) => {
            let pool = postgres::init_pool(&config.database_url).await?;
            feeds::run(&PostgresFeedRepository::new(pool), args).await?;
        }
    }

    Ok(())
}

async fn serve(config: &Config) -> Result<()> {
    let pool = postgres::init_pool(&config.database_url).await?;
    let feeds: Arc<dyn FeedRepository> = Arc::new(PostgresFeedRepository::new(pool.clone()));
    let videos: Arc<dyn VideoRepository> = Arc::new(PostgresVideoRepository::new(pool));
    let vector: Arc<dyn VideoVectorRepository> =
        Arc::new(WeaviateVideoRepository::new(weaviate_config(config))?);

    let reader = Arc::new(MinifluxClient::new(MinifluxConfig {
        endpoint: config.miniflux_endpoint.clone(),
        api_key: config.miniflux_api_key.clone(),
        ..Default::default()
    })?);
    // One client serves both the backlog search and the metadata lookups.
    let youtube = Arc::new(YoutubeClient::new(YoutubeConfig {
        api_key: config.youtube_api_key.clone(),
        base_url: config.youtube_base_url.clone(),
        ..Default::default()
    })?);
    let summarizer = Arc::new(OpenAiSummarizer::new(OpenAiConfig {
        api_key: config.openai_api_key.clone(),
        base_url: config.openai_base_url.clone(),
        model: config.openai_model.clone(),
        ..Default::default()
    })?);

    let fetcher = Fetcher::new(
        feeds,
        videos.clone(),
        reader,
        youtube.clone(),
        youtube,
        FetcherConfig {
            poll_interval: config.fetch_interval,
            batch_size: config.batch_size,
            batch_idle: config.batch_idle,
            channel_capacity: config.channel_capacity,
        },
    );
    let out_rx = fetcher.start();

    let summary: Arc<dyn Processor> = Arc::new(SummaryProcessor::new(summarizer));
    let selector = Arc::new(Selector::new(vec![summary]));
    Pipeline::new(selector, videos.clone(), vector, config.pipeline_workers).start(out_rx);

    let port = config.api_port;
    tokio::spawn(async move {
        if let Err(err) = api::serve(videos, port).await {
            error!(error = %err, "http server failed");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("service stopped");
    Ok(())
}

fn weaviate_config(config: &Config) -> WeaviateConfig {
    WeaviateConfig {
        endpoint: config.weaviate_endpoint.clone(),
        api_key: config.weaviate_api_key.clone(),
        openai_api_key: config.openai_api_key.clone(),
        ..Default::default()
    }
}
