//! Reusable playback handles and the readiness channel between a handle and
//! the asynchronous media layer.
//!
//! Every load of a handle gets a new generation. The media layer reports
//! readiness through a [`ReadinessReporter`] stamped with the generation it
//! was created for, so a report that arrives after the handle has been rebound
//! is dropped instead of being attributed to the new source.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use super::backend::MediaBackend;
use super::item::MediaItem;

/// Stable identity of a pooled handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub(crate) usize);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// Buffering state of a handle's current source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Readiness {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// Transport state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayState {
    Playing,
    Paused,
}

/// Value carried by a handle's readiness channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessSnapshot {
    pub generation: u64,
    pub readiness: Readiness,
}

/// Write side of a handle's readiness, handed to the media layer for one load.
///
/// Cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct ReadinessReporter {
    tx: Arc<watch::Sender<ReadinessSnapshot>>,
    generation: u64,
}

impl ReadinessReporter {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the load this reporter belongs to is still the handle's
    /// current one.
    pub fn is_current(&self) -> bool {
        self.tx.borrow().generation == self.generation
    }

    /// Publish a new readiness for this load.
    ///
    /// Returns `false` when the report was dropped, either because the handle
    /// has moved on to another load or because nothing changed.
    pub fn report(&self, readiness: Readiness) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.generation != self.generation || snapshot.readiness == readiness {
                return false;
            }
            snapshot.readiness = readiness;
            true
        })
    }
}

/// Read side of one load's readiness.
///
/// Dropping the watch unsubscribes it.
#[derive(Debug)]
pub struct ReadinessWatch {
    rx: watch::Receiver<ReadinessSnapshot>,
    handle: HandleId,
    generation: u64,
}

impl ReadinessWatch {
    pub fn handle(&self) -> HandleId {
        self.handle
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Readiness of the watched load right now.
    ///
    /// Reads as [`Readiness::Unloaded`] once the handle has been released or
    /// rebound, since the watched load no longer exists.
    pub fn current(&self) -> Readiness {
        let snapshot = *self.rx.borrow();
        if snapshot.generation == self.generation {
            snapshot.readiness
        } else {
            Readiness::Unloaded
        }
    }

    /// Wait for the next readiness change of the watched load.
    ///
    /// Cancel safe. Never resolves if the owning handle is gone.
    pub async fn changed(&mut self) -> Readiness {
        if self.rx.changed().await.is_err() {
            return std::future::pending().await;
        }
        let snapshot = *self.rx.borrow_and_update();
        if snapshot.generation == self.generation {
            snapshot.readiness
        } else {
            Readiness::Unloaded
        }
    }
}

/// A single reusable playback resource.
///
/// Handles live as long as their pool; binding a handle to another feed index
/// reloads it in place.
pub struct MediaHandle<B> {
    id: HandleId,
    backend: B,
    bound_index: Option<usize>,
    source: Option<MediaItem>,
    readiness: Arc<watch::Sender<ReadinessSnapshot>>,
    play_state: PlayState,
    looping: bool,
}

impl<B: MediaBackend> MediaHandle<B> {
    pub(crate) fn new(id: HandleId, backend: B) -> Self {
        let (tx, _) = watch::channel(ReadinessSnapshot {
            generation: 0,
            readiness: Readiness::Unloaded,
        });
        Self {
            id,
            backend,
            bound_index: None,
            source: None,
            readiness: Arc::new(tx),
            play_state: PlayState::Paused,
            looping: false,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn bound_index(&self) -> Option<usize> {
        self.bound_index
    }

    pub fn source(&self) -> Option<&MediaItem> {
        self.source.as_ref()
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.borrow().readiness
    }

    pub fn generation(&self) -> u64 {
        self.readiness.borrow().generation
    }

    pub fn is_playing(&self) -> bool {
        self.play_state == PlayState::Playing
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Subscribe to readiness changes of the current load.
    pub fn watch(&self) -> ReadinessWatch {
        let rx = self.readiness.subscribe();
        let generation = rx.borrow().generation;
        ReadinessWatch {
            rx,
            handle: self.id,
            generation,
        }
    }

    /// Bind to a feed index and start loading `item`.
    ///
    /// Readiness goes to `Loading` before the media layer sees the source.
    pub(crate) fn bind(&mut self, index: usize, item: &MediaItem) {
        let generation = self.generation() + 1;
        self.readiness.send_replace(ReadinessSnapshot {
            generation,
            readiness: Readiness::Loading,
        });
        self.bound_index = Some(index);
        self.source = Some(item.clone());
        self.play_state = PlayState::Paused;
        self.looping = true;
        self.backend.set_looping(true);

        let reporter = ReadinessReporter {
            tx: Arc::clone(&self.readiness),
            generation,
        };
        if let Err(e) = self.backend.load(item, reporter.clone()) {
            tracing::warn!(handle = %self.id, index, source = %item, "Failed to load: {}", e);
            reporter.report(Readiness::Failed);
        }
    }

    /// Drop the current binding and clear the source.
    ///
    /// Returns the index the handle was bound to.
    pub(crate) fn unbind(&mut self) -> Option<usize> {
        let index = self.bound_index.take()?;
        if self.is_playing() {
            self.pause();
        }
        self.looping = false;
        self.backend.set_looping(false);
        self.backend.unload();
        self.source = None;

        let generation = self.generation() + 1;
        self.readiness.send_replace(ReadinessSnapshot {
            generation,
            readiness: Readiness::Unloaded,
        });
        Some(index)
    }

    pub(crate) fn play(&mut self) {
        if self.source.is_none() {
            return;
        }
        match self.backend.play() {
            Ok(()) => self.play_state = PlayState::Playing,
            Err(e) => tracing::error!(handle = %self.id, "Failed to play: {:#}", e),
        }
    }

    pub(crate) fn pause(&mut self) {
        match self.backend.pause() {
            Ok(()) => self.play_state = PlayState::Paused,
            Err(e) => tracing::error!(handle = %self.id, "Failed to pause: {:#}", e),
        }
    }
}

impl<B> fmt::Debug for MediaHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaHandle")
            .field("id", &self.id)
            .field("bound_index", &self.bound_index)
            .field("source", &self.source)
            .field("readiness", &*self.readiness.borrow())
            .field("play_state", &self.play_state)
            .field("looping", &self.looping)
            .finish()
    }
}
