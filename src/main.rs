use std::path::PathBuf;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use feed_viewer::config::ViewerConfig;
use feed_viewer::coordinator::{Coordinator, DragPermission};
use feed_viewer::driver::{spawn_feed, FeedHandle};
use feed_viewer::feed::HttpFeedSource;
use feed_viewer::media::MediaBackend;
use feed_viewer::pool::ResourcePool;

/// Viewport height used for the synthetic drags of `next` and `prev`.
const VIEWPORT: f64 = 1000.0;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ViewerConfig::load(config_path.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let client = Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let source = HttpFeedSource::new(client.clone(), config.manifest_url()?);

    start(&config, client, source).await
}

#[cfg(feature = "gstreamer")]
async fn start(config: &ViewerConfig, _client: Client, source: HttpFeedSource) -> Result<()> {
    use feed_viewer::media::gst::GstBackend;

    GstBackend::init()?;
    run(config, source, |_| GstBackend::new()).await
}

#[cfg(not(feature = "gstreamer"))]
async fn start(config: &ViewerConfig, client: Client, source: HttpFeedSource) -> Result<()> {
    use feed_viewer::media::HttpProbeBackend;

    let prebuffer = config.prebuffer_bytes;
    run(config, source, move |_| {
        HttpProbeBackend::new(client.clone(), prebuffer)
    })
    .await
}

async fn run<B: MediaBackend>(
    config: &ViewerConfig,
    source: HttpFeedSource,
    make_backend: impl FnMut(feed_viewer::HandleId) -> B,
) -> Result<()> {
    let pool = ResourcePool::new(config.pool_capacity, make_backend)?;
    let coordinator = Coordinator::new(pool, config.coordinator_settings())?;
    let (feed, task) = spawn_feed(coordinator, source);

    let mut locked = feed.scroll_locked();
    tokio::spawn(async move {
        while locked.changed().await.is_ok() {
            if *locked.borrow_and_update() {
                tracing::info!("Scroll locked, waiting for neighbor");
            } else {
                tracing::info!("Scroll unlocked");
            }
        }
    });

    println!("Commands: next, prev, tap, focus, blur, prefetch <index>, status, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match handle_command(&feed, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => tracing::error!("Command failed: {:#}", e),
        }
    }

    feed.shutdown().await.ok();
    task.await.context("Feed driver panicked")?;
    Ok(())
}

/// Apply one stdin command. Returns `false` when the viewer should exit.
async fn handle_command(feed: &FeedHandle, line: &str) -> Result<bool> {
    let mut words = line.split_whitespace();
    match words.next() {
        None => {}
        Some("next") => navigate(feed, 1).await?,
        Some("prev") => navigate(feed, -1).await?,
        Some("tap") => feed.tap().await?,
        Some("focus") => feed.compose_focus(true).await?,
        Some("blur") => feed.compose_focus(false).await?,
        Some("prefetch") => {
            let index: usize = words
                .next()
                .context("prefetch needs an index")?
                .parse()
                .context("Invalid index")?;
            feed.prefetch(index).await?;
        }
        Some("status") => {
            let status = feed.status().await?;
            println!(
                "item {}/{} {:?} playing={} locked={} navigation={} watching={:?} bound={:?}",
                status.current_index,
                status.len,
                status.phase,
                status.playing,
                status.scroll_locked,
                status.navigation_enabled,
                status.watched_index,
                status.bound_indices
            );
        }
        Some("quit") | Some("exit") => return Ok(false),
        Some(other) => println!("Unknown command: {}", other),
    }
    Ok(true)
}

/// Drag one page in `step` direction past the peek threshold and settle.
async fn navigate(feed: &FeedHandle, step: isize) -> Result<()> {
    if feed.begin_drag().await? == DragPermission::Blocked {
        println!("Navigation is blocked");
        return Ok(());
    }

    let status = feed.status().await?;
    if status.len == 0 {
        return Ok(());
    }
    let Some(target) = status
        .current_index
        .checked_add_signed(step)
        .filter(|&index| index < status.len)
    else {
        // Drag released at the edge snaps back
        feed.settle(status.current_index).await?;
        return Ok(());
    };

    let offset = (status.current_index as f64 + step as f64 * 0.6) * VIEWPORT;
    feed.scroll(offset, VIEWPORT).await?;
    feed.settle(target).await?;
    Ok(())
}
