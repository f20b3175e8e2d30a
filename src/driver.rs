//! Owner context for a feed.
//!
//! One tokio task owns the [`Coordinator`]. Presentation events arrive as
//! [`FeedCommand`]s on a channel and readiness wake-ups come from
//! [`Coordinator::next_wake`]; the task handles both one at a time, so the
//! pool, the neighbor window and the scroll lock never see concurrent
//! mutation.

use anyhow::{anyhow, Context, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::coordinator::{Coordinator, DragPermission, Phase};
use crate::feed::MediaListSource;
use crate::media::{HandleId, MediaBackend, MediaItem};

/// Events from the presentation layer.
#[derive(Debug)]
pub enum FeedCommand {
    /// Live scroll position during a drag.
    Scroll { offset: f64, viewport_height: f64 },
    /// A drag is starting; the answer says whether it may proceed.
    BeginDrag { reply: oneshot::Sender<DragPermission> },
    /// A drag settled on an index.
    Settle { index: usize },
    /// Tap on the current item.
    Tap,
    ComposeFocus(bool),
    /// The presentation is about to render an index.
    Prefetch { index: usize },
    /// A surface for `index` needs its handle.
    Attach {
        index: usize,
        reply: oneshot::Sender<Option<HandleId>>,
    },
    ReplaceFeed(Vec<MediaItem>),
    Status { reply: oneshot::Sender<FeedStatus> },
    Shutdown,
}

/// Snapshot of the coordinator for display and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedStatus {
    pub len: usize,
    pub current_index: usize,
    pub phase: Phase,
    pub scroll_locked: bool,
    pub playing: bool,
    pub navigation_enabled: bool,
    pub watched_index: Option<usize>,
    pub bound_indices: Vec<usize>,
}

impl FeedStatus {
    fn of<B: MediaBackend>(coordinator: &Coordinator<B>) -> Self {
        Self {
            len: coordinator.items().len(),
            current_index: coordinator.current_index(),
            phase: coordinator.phase(),
            scroll_locked: coordinator.is_scroll_locked(),
            playing: coordinator.is_playing(),
            navigation_enabled: coordinator.navigation_enabled(),
            watched_index: coordinator.watched_index(),
            bound_indices: coordinator.pool().bound_indices(),
        }
    }
}

/// Cloneable sender side of a running feed.
///
/// The feed shuts down once every handle is dropped.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    commands: mpsc::Sender<FeedCommand>,
    scroll_locked: watch::Receiver<bool>,
    playing: watch::Receiver<bool>,
    navigation: watch::Receiver<bool>,
}

impl FeedHandle {
    async fn send(&self, command: FeedCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("Feed driver has stopped"))
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> FeedCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx)).await?;
        rx.await.context("Feed driver dropped the request")
    }

    pub async fn scroll(&self, offset: f64, viewport_height: f64) -> Result<()> {
        self.send(FeedCommand::Scroll {
            offset,
            viewport_height,
        })
        .await
    }

    pub async fn begin_drag(&self) -> Result<DragPermission> {
        self.request(|reply| FeedCommand::BeginDrag { reply }).await
    }

    pub async fn settle(&self, index: usize) -> Result<()> {
        self.send(FeedCommand::Settle { index }).await
    }

    pub async fn tap(&self) -> Result<()> {
        self.send(FeedCommand::Tap).await
    }

    pub async fn compose_focus(&self, focused: bool) -> Result<()> {
        self.send(FeedCommand::ComposeFocus(focused)).await
    }

    pub async fn prefetch(&self, index: usize) -> Result<()> {
        self.send(FeedCommand::Prefetch { index }).await
    }

    pub async fn attach(&self, index: usize) -> Result<Option<HandleId>> {
        self.request(|reply| FeedCommand::Attach { index, reply })
            .await
    }

    pub async fn replace_feed(&self, items: Vec<MediaItem>) -> Result<()> {
        self.send(FeedCommand::ReplaceFeed(items)).await
    }

    pub async fn status(&self) -> Result<FeedStatus> {
        self.request(|reply| FeedCommand::Status { reply }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(FeedCommand::Shutdown).await
    }

    pub fn scroll_locked(&self) -> watch::Receiver<bool> {
        self.scroll_locked.clone()
    }

    pub fn playing(&self) -> watch::Receiver<bool> {
        self.playing.clone()
    }

    pub fn navigation_enabled(&self) -> watch::Receiver<bool> {
        self.navigation.clone()
    }
}

/// Spawn the owner task for `coordinator`.
///
/// The task fetches the media list from `source` once before handling any
/// command. A failed fetch is logged and leaves the feed empty.
pub fn spawn_feed<B, S>(coordinator: Coordinator<B>, source: S) -> (FeedHandle, JoinHandle<()>)
where
    B: MediaBackend,
    S: MediaListSource,
{
    let (tx, rx) = mpsc::channel(64);
    let handle = FeedHandle {
        commands: tx,
        scroll_locked: coordinator.subscribe_scroll_lock(),
        playing: coordinator.subscribe_playing(),
        navigation: coordinator.subscribe_navigation(),
    };

    let task = tokio::spawn(run(coordinator, source, rx));
    (handle, task)
}

async fn run<B, S>(mut coordinator: Coordinator<B>, source: S, mut commands: mpsc::Receiver<FeedCommand>)
where
    B: MediaBackend,
    S: MediaListSource,
{
    match source.fetch_media_list().await {
        Ok(items) => coordinator.replace_feed(items),
        Err(e) => tracing::error!("Failed to fetch media list: {}", e),
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(FeedCommand::Shutdown) | None => break,
                Some(command) => apply(&mut coordinator, command),
            },
            wake = coordinator.next_wake() => coordinator.handle_wake(wake),
        }
    }

    coordinator.teardown();
    tracing::info!("Feed driver stopped");
}

fn apply<B: MediaBackend>(coordinator: &mut Coordinator<B>, command: FeedCommand) {
    match command {
        FeedCommand::Scroll {
            offset,
            viewport_height,
        } => coordinator.on_scroll(offset, viewport_height),
        FeedCommand::BeginDrag { reply } => {
            let _ = reply.send(coordinator.begin_drag());
        }
        FeedCommand::Settle { index } => coordinator.on_settle(index),
        FeedCommand::Tap => coordinator.toggle_playback(),
        FeedCommand::ComposeFocus(focused) => coordinator.set_compose_focus(focused),
        FeedCommand::Prefetch { index } => {
            coordinator.prefetch(index);
        }
        FeedCommand::Attach { index, reply } => {
            let _ = reply.send(coordinator.attach(index));
        }
        FeedCommand::ReplaceFeed(items) => coordinator.replace_feed(items),
        FeedCommand::Status { reply } => {
            let _ = reply.send(FeedStatus::of(coordinator));
        }
        FeedCommand::Shutdown => {}
    }
}
