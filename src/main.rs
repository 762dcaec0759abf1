use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use reel_tv::backends::{JellyfinApi, MediaRef, SubtitleCatalog};
use reel_tv::config::Config;
use reel_tv::player::engine::singleton;
use reel_tv::player::subtitles::SubtitleResolver;

/// Diagnostics for the Reel TV playback core
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to the platform config dir)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the native engine can be created
    Check,
    /// Fetch one subtitle stream through the configured server into the cache
    Subtitle {
        item_id: String,
        stream_index: i64,
        /// Media source id, when the item has several
        #[arg(long)]
        source: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    reel_tv::logging::init()?;
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match args.command {
        Command::Check => check(&config),
        Command::Subtitle {
            item_id,
            stream_index,
            source,
        } => subtitle(&config, item_id, stream_index, source).await,
    }
}

fn check(config: &Config) -> Result<()> {
    info!("Probing native engine");
    let engine = singleton::get_or_create(&config.playback).context("Native engine unavailable")?;
    println!("native engine available ({:?})", engine.readiness());
    engine.destroy();
    Ok(())
}

async fn subtitle(config: &Config, item_id: String, stream_index: i64, source: Option<String>) -> Result<()> {
    let api = Arc::new(JellyfinApi::from_config(config)?);
    let media = match source {
        Some(source) => MediaRef::with_source(item_id, source),
        None => MediaRef::new(item_id),
    };

    let descriptors = api
        .subtitle_streams(&media)
        .await
        .context("Failed to list subtitle streams")?;
    let descriptor = descriptors
        .iter()
        .find(|d| d.index == stream_index)
        .ok_or_else(|| anyhow!("Item {} has no subtitle stream {}", media.item_id, stream_index))?;
    if !descriptor.is_text() {
        warn!("Stream {} is a bitmap subtitle; the server may refuse conversion", stream_index);
    }

    let resolver = SubtitleResolver::from_config(api, config)?;
    let path = resolver.fetch_subtitle(&media, descriptor).await?;
    println!("{}", path.display());
    Ok(())
}
