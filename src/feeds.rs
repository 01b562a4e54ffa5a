//! The `feed` subcommand: manage channel subscriptions.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use tracing::info;

use crate::model::{Feed, FeedStatus};
use crate::storage::FeedRepository;

/// tubefeed feed add/ls
#[derive(Args)]
pub struct FeedCmd {
    #[command(subcommand)]
    pub cmd: FeedSub,
}

#[derive(Subcommand)]
pub enum FeedSub {
    /// Subscribe a channel; its backlog is crawled on the next serve start
    Add {
        /// Channel id as issued by the upstream platform
        #[arg(long)]
        channel: String,
        #[arg(long)]
        title: String,
    },
    /// List subscribed feeds
    Ls,
}

pub async fn run(repo: &impl FeedRepository, args: FeedCmd) -> Result<()> {
    match args.cmd {
        FeedSub::Add { channel, title } => add_feed(repo, channel, title).await?,
        FeedSub::Ls => ls_feeds(repo).await?,
    }
    Ok(())
}

async fn add_feed(repo: &impl FeedRepository, channel: String, title: String) -> Result<()> {
    if channel.trim().is_empty() {
        bail!("channel id must not be empty");
    }
    let feed = Feed::new(channel.trim(), title);
    repo.save(&feed).await?;
    info!(feed_id = %feed.id, channel_id = %feed.channel_id, "feed added");
    Ok(())
}

async fn ls_feeds(repo: &impl FeedRepository) -> Result<()> {
    let mut feeds = repo
        .find_by_status(&[FeedStatus::New, FeedStatus::Ready])
        .await?;
    feeds.sort_by(|a, b| a.title.cmp(&b.title));
    for feed in &feeds {
        println!(
            "{}  {:<7} {}  {}",
            feed.id,
            feed.status.as_str(),
            feed.channel_id,
            feed.title
        );
    }
    if feeds.is_empty() {
        println!("no feeds");
    }
    Ok(())
}
