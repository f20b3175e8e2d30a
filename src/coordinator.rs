//! Playback coordination for a vertically paged feed.
//!
//! The [`Coordinator`] owns the [`ResourcePool`] and decides which handles
//! play, which are merely loaded, and whether the user may navigate. All
//! methods run on the feed's owner context; readiness from the media layer
//! comes back through [`Coordinator::next_wake`], which the owner awaits and
//! feeds to [`Coordinator::handle_wake`].
//!
//! After a drag settles on an index the coordinator takes the scroll lock and
//! watches the neighbor the user is heading towards. The lock is released as
//! soon as that neighbor is `Ready`, seen either through its readiness
//! subscription or through a periodic fallback poll for notifications that
//! never arrive. A neighbor that fails to load is reloaded up to
//! `load_retry_limit` times before the lock gives up on it.

use std::time::Duration;

use anyhow::{ensure, Result};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::media::{HandleId, MediaBackend, MediaHandle, MediaItem, Readiness, ReadinessWatch};
use crate::pool::ResourcePool;

/// Paging direction relative to the current index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No feed loaded.
    Idle,
    /// The current item plays; its neighbors are loaded and paused.
    Settled,
    /// A drag is far enough past the current item that the neighbor in that
    /// direction is previewed instead.
    Peeking(Direction),
    /// Navigation is held until the approached neighbor is buffered.
    Locked,
}

/// Answer to a drag attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragPermission {
    Allowed,
    /// The gesture must be rejected and blocking feedback shown.
    Blocked,
}

/// Handles for the previous, current and next feed index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeighborWindow {
    pub previous: Option<HandleId>,
    pub current: Option<HandleId>,
    pub next: Option<HandleId>,
}

impl NeighborWindow {
    pub fn neighbor(&self, direction: Direction) -> Option<HandleId> {
        match direction {
            Direction::Next => self.next,
            Direction::Previous => self.previous,
        }
    }

    fn slots(&self) -> [Option<HandleId>; 3] {
        [self.previous, self.current, self.next]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorSettings {
    pub peek_threshold: f64,
    pub readiness_poll: Duration,
    pub load_retry_limit: u32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            peek_threshold: 0.3,
            readiness_poll: Duration::from_secs(5),
            load_retry_limit: 1,
        }
    }
}

/// Something the owner context must hand back to the coordinator.
///
/// Stamped with the lock epoch it was produced for; wakes from an earlier
/// lock are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Readiness { epoch: u64, readiness: Readiness },
    Tick { epoch: u64 },
}

impl Wake {
    pub fn epoch(&self) -> u64 {
        match *self {
            Wake::Readiness { epoch, .. } | Wake::Tick { epoch } => epoch,
        }
    }
}

/// Readiness subscription and fallback poll for the neighbor behind a lock.
struct LockWatch {
    epoch: u64,
    index: usize,
    watch: ReadinessWatch,
    next_poll: Instant,
    retries: u32,
}

pub struct Coordinator<B> {
    pool: ResourcePool<B>,
    items: Vec<MediaItem>,
    settings: CoordinatorSettings,
    current_index: usize,
    window: NeighborWindow,
    phase: Phase,
    composing: bool,
    lock: Option<LockWatch>,
    lock_epoch: u64,
    torn_down: bool,
    scroll_locked: watch::Sender<bool>,
    playing: watch::Sender<bool>,
    navigation: watch::Sender<bool>,
}

impl<B: MediaBackend> Coordinator<B> {
    pub fn new(pool: ResourcePool<B>, settings: CoordinatorSettings) -> Result<Self> {
        ensure!(
            pool.capacity() >= 3,
            "Pool of {} handles cannot hold the neighbor window",
            pool.capacity()
        );
        Ok(Self {
            pool,
            items: Vec::new(),
            settings,
            current_index: 0,
            window: NeighborWindow::default(),
            phase: Phase::Idle,
            composing: false,
            lock: None,
            lock_epoch: 0,
            torn_down: false,
            scroll_locked: watch::Sender::new(false),
            playing: watch::Sender::new(false),
            navigation: watch::Sender::new(false),
        })
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn window(&self) -> NeighborWindow {
        self.window
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn pool(&self) -> &ResourcePool<B> {
        &self.pool
    }

    pub fn handle(&self, id: HandleId) -> Option<&MediaHandle<B>> {
        self.pool.handle(id)
    }

    pub fn is_scroll_locked(&self) -> bool {
        self.phase == Phase::Locked
    }

    pub fn is_composing(&self) -> bool {
        self.composing
    }

    pub fn is_playing(&self) -> bool {
        self.current_handle().is_some_and(|h| h.is_playing())
    }

    pub fn navigation_enabled(&self) -> bool {
        !self.torn_down
            && !self.composing
            && matches!(self.phase, Phase::Settled | Phase::Peeking(_))
    }

    /// Index whose readiness currently holds the scroll lock.
    pub fn watched_index(&self) -> Option<usize> {
        self.lock.as_ref().map(|lock| lock.index)
    }

    pub fn subscribe_scroll_lock(&self) -> watch::Receiver<bool> {
        self.scroll_locked.subscribe()
    }

    pub fn subscribe_playing(&self) -> watch::Receiver<bool> {
        self.playing.subscribe()
    }

    pub fn subscribe_navigation(&self) -> watch::Receiver<bool> {
        self.navigation.subscribe()
    }

    /// Install a new snapshot of the feed, dropping every existing binding.
    pub fn replace_feed(&mut self, items: Vec<MediaItem>) {
        if self.torn_down {
            return;
        }
        self.cancel_lock_watch();
        self.pool.release_all();
        self.window = NeighborWindow::default();
        self.items = items;
        self.current_index = 0;

        if self.items.is_empty() {
            tracing::info!("Feed is empty");
            self.phase = Phase::Idle;
        } else {
            tracing::info!("Feed loaded with {} items", self.items.len());
            self.refresh_window();
            self.phase = Phase::Settled;
            if !self.composing {
                self.play_current();
            }
        }
        self.publish_all();
    }

    /// A drag is starting.
    pub fn begin_drag(&self) -> DragPermission {
        if self.navigation_enabled() {
            DragPermission::Allowed
        } else {
            tracing::info!(
                locked = self.is_scroll_locked(),
                composing = self.composing,
                "Drag blocked"
            );
            DragPermission::Blocked
        }
    }

    /// Live scroll position during a drag.
    ///
    /// Crossing `peek_threshold` of the viewport past the current item plays
    /// the neighbor in that direction; coming back inside it restores the
    /// current item. Only the crossing itself changes anything.
    pub fn on_scroll(&mut self, content_offset: f64, viewport_height: f64) {
        if viewport_height <= 0.0 || !self.navigation_enabled() {
            return;
        }
        let relative = content_offset - self.current_index as f64 * viewport_height;
        let threshold = viewport_height * self.settings.peek_threshold;
        let wanted = if relative > threshold {
            Some(Direction::Next)
        } else if relative < -threshold {
            Some(Direction::Previous)
        } else {
            None
        };

        // Past the edge of the feed there is nothing to preview
        let wanted = wanted.filter(|&direction| self.window.neighbor(direction).is_some());

        match (self.phase, wanted) {
            (Phase::Peeking(current), Some(direction)) if current == direction => {}
            (_, Some(direction)) => self.start_peek(direction),
            (Phase::Peeking(_), None) => self.end_peek(),
            _ => {}
        }
    }

    fn start_peek(&mut self, direction: Direction) {
        let Some(neighbor) = self.window.neighbor(direction) else {
            return;
        };
        tracing::debug!(?direction, "Peeking at neighbor");
        self.pause_slots();
        self.set_playing(neighbor, true);
        self.phase = Phase::Peeking(direction);
        self.publish_playing();
    }

    fn end_peek(&mut self) {
        tracing::debug!("Peek cancelled");
        self.pause_slots();
        self.phase = Phase::Settled;
        self.play_current();
    }

    /// The drag settled on `index`.
    ///
    /// Rebuilds the neighbor window around `index` and takes the scroll lock
    /// until the neighbor being approached is buffered.
    pub fn on_settle(&mut self, index: usize) {
        if self.torn_down || self.items.is_empty() {
            return;
        }
        let last = self.items.len() - 1;
        if index > last {
            tracing::warn!("Settled past the end of the feed ({} > {})", index, last);
        }
        let index = index.min(last);

        if index != self.current_index && !self.navigation_enabled() {
            tracing::warn!(
                "Ignoring settle on {} while navigation is disabled",
                index
            );
            return;
        }

        let direction = if index >= self.current_index {
            Direction::Next
        } else {
            Direction::Previous
        };
        tracing::debug!(from = self.current_index, to = index, "Settled");

        self.cancel_lock_watch();
        self.pause_slots();
        self.current_index = index;
        self.refresh_window();
        self.phase = Phase::Settled;
        if !self.composing {
            self.play_current();
        }
        self.enter_lock(direction);
        self.publish_all();
    }

    /// Flip the current item between playing and paused.
    ///
    /// Ignored while a neighbor is previewed or the composer has focus.
    pub fn toggle_playback(&mut self) {
        if self.composing || matches!(self.phase, Phase::Peeking(_)) {
            tracing::debug!(phase = ?self.phase, composing = self.composing, "Tap ignored");
            return;
        }
        let Some(current) = self.window.current else {
            return;
        };
        let playing = self.is_playing();
        self.set_playing(current, !playing);
        self.publish_playing();
    }

    /// The text composer gained or lost focus.
    pub fn set_compose_focus(&mut self, focused: bool) {
        if self.torn_down || focused == self.composing {
            return;
        }
        self.composing = focused;
        if focused {
            if let Phase::Peeking(_) = self.phase {
                self.phase = Phase::Settled;
            }
            self.pause_slots();
        } else if self.phase != Phase::Idle {
            self.play_current();
        }
        self.publish_all();
    }

    /// Start buffering `index` ahead of the user reaching it.
    ///
    /// Play state is untouched. Deferred when the only way to make room would
    /// evict part of the neighbor window.
    pub fn prefetch(&mut self, index: usize) -> Option<HandleId> {
        if self.torn_down {
            return None;
        }
        let item = self.items.get(index)?.clone();
        if let Some(id) = self.pool.handle_for(index) {
            return Some(id);
        }
        if let Some(victim) = self.evicts_window() {
            tracing::debug!("Prefetch of {} deferred, it would evict {}", index, victim);
            return None;
        }
        Some(self.pool.checkout(index, &item))
    }

    /// Handle to show on the surface for `index`, loading it if needed.
    ///
    /// Older bindings outside the neighbor window make way first. `None` when
    /// the window holds every handle.
    pub fn attach(&mut self, index: usize) -> Option<HandleId> {
        if self.torn_down {
            return None;
        }
        let item = self.items.get(index)?.clone();
        if let Some(id) = self.pool.handle_for(index) {
            return Some(id);
        }
        let window = self.window_indices();
        self.make_room(&window);
        if let Some(victim) = self.evicts_window() {
            tracing::debug!("Attach of {} deferred, it would evict {}", index, victim);
            return None;
        }
        Some(self.pool.checkout(index, &item))
    }

    /// Window index the next unbound checkout would evict.
    fn evicts_window(&self) -> Option<usize> {
        self.pool
            .eviction_candidate()
            .filter(|victim| self.window_indices().contains(victim))
    }

    /// Wait for the next readiness event of the locked neighbor.
    ///
    /// Never resolves while no lock is held. Cancel safe, so it can sit in a
    /// `select!` next to the command channel.
    pub async fn next_wake(&mut self) -> Wake {
        let Some(lock) = self.lock.as_mut() else {
            return std::future::pending().await;
        };
        let epoch = lock.epoch;
        let deadline = lock.next_poll;
        tokio::select! {
            readiness = lock.watch.changed() => Wake::Readiness { epoch, readiness },
            _ = tokio::time::sleep_until(deadline) => Wake::Tick { epoch },
        }
    }

    pub fn handle_wake(&mut self, wake: Wake) {
        let poll = self.settings.readiness_poll;
        let Some(lock) = self.lock.as_mut() else {
            return;
        };
        if wake.epoch() != lock.epoch {
            tracing::trace!("Ignoring wake from lock {}", wake.epoch());
            return;
        }
        let observed = match wake {
            Wake::Readiness { readiness, .. } => readiness,
            Wake::Tick { .. } => {
                lock.next_poll = Instant::now() + poll;
                let readiness = lock.watch.current();
                tracing::trace!(index = lock.index, ?readiness, "Readiness poll");
                readiness
            }
        };
        self.evaluate_lock(observed);
    }

    /// Cancel everything outstanding and release every handle.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.cancel_lock_watch();
        self.pool.pause_all();
        self.pool.release_all();
        self.window = NeighborWindow::default();
        self.phase = Phase::Idle;
        self.torn_down = true;
        self.publish_all();
        tracing::info!("Feed torn down");
    }

    fn enter_lock(&mut self, direction: Direction) {
        // Fall back to the other side at the ends of the feed
        let [previous, _, next] = self.expected_indices();
        let target = match direction {
            Direction::Next => next.or(previous),
            Direction::Previous => previous.or(next),
        };
        let Some(index) = target else {
            tracing::debug!("No neighbor to wait for");
            return;
        };

        self.phase = Phase::Locked;
        tracing::debug!(index, "Scroll locked");
        self.watch_index(index, 0);
    }

    /// Subscribe to the neighbor at `index`, rebinding it if it lost its
    /// handle.
    fn watch_index(&mut self, index: usize, retries: u32) {
        self.refresh_window();
        let Some(id) = self.pool.handle_for(index) else {
            self.release_lock();
            return;
        };
        let Some(handle) = self.pool.handle(id) else {
            self.release_lock();
            return;
        };

        self.lock_epoch += 1;
        let watch = handle.watch();
        let readiness = watch.current();
        self.lock = Some(LockWatch {
            epoch: self.lock_epoch,
            index,
            watch,
            next_poll: Instant::now() + self.settings.readiness_poll,
            retries,
        });
        self.evaluate_lock(readiness);
    }

    fn evaluate_lock(&mut self, observed: Readiness) {
        let Some(lock) = self.lock.as_ref() else {
            return;
        };
        let (index, retries) = (lock.index, lock.retries);
        match observed {
            Readiness::Loading => {}
            Readiness::Ready => {
                tracing::debug!(index, "Neighbor ready");
                self.release_lock();
            }
            Readiness::Unloaded => {
                tracing::debug!(index, "Neighbor lost its handle, rebinding");
                self.watch_index(index, retries);
            }
            Readiness::Failed if retries < self.settings.load_retry_limit => {
                tracing::warn!(index, attempt = retries + 1, "Neighbor failed to load, retrying");
                self.pool.release(index);
                self.watch_index(index, retries + 1);
            }
            Readiness::Failed => {
                tracing::warn!(
                    index,
                    "Neighbor failed to load after {} retries, releasing scroll lock",
                    retries
                );
                self.release_lock();
            }
        }
    }

    fn release_lock(&mut self) {
        self.cancel_lock_watch();
        if self.phase == Phase::Locked {
            self.phase = Phase::Settled;
            tracing::debug!("Scroll unlocked");
        }
        self.publish_all();
    }

    fn cancel_lock_watch(&mut self) {
        if let Some(lock) = self.lock.take() {
            tracing::trace!(index = lock.index, "Readiness watch cancelled");
        }
    }

    /// Rebind the neighbor window around the current index.
    fn refresh_window(&mut self) {
        let expected = self.expected_indices();
        if self.window_matches(&expected) {
            return;
        }

        let keep: Vec<usize> = expected.iter().flatten().copied().collect();
        let mut slots = [None; 3];
        for (slot, index) in slots.iter_mut().zip(expected) {
            let Some(index) = index else { continue };
            let Some(item) = self.items.get(index).cloned() else {
                continue;
            };
            if self.pool.handle_for(index).is_none() {
                self.make_room(&keep);
            }
            *slot = Some(self.pool.checkout(index, &item));
        }

        self.window = NeighborWindow {
            previous: slots[0],
            current: slots[1],
            next: slots[2],
        };
        tracing::debug!(
            index = self.current_index,
            bound = ?self.pool.bound_indices(),
            "Neighbor window updated"
        );
    }

    /// Keep the next checkout from evicting one of `keep`.
    fn make_room(&mut self, keep: &[usize]) {
        let Some(victim) = self.pool.eviction_candidate() else {
            return;
        };
        if !keep.contains(&victim) {
            return;
        }
        if let Some(other) = self.pool.oldest_bound_except(keep) {
            self.pool.release(other);
        }
    }

    fn expected_indices(&self) -> [Option<usize>; 3] {
        let len = self.items.len();
        if len == 0 {
            return [None; 3];
        }
        let i = self.current_index;
        [i.checked_sub(1), Some(i), (i + 1 < len).then_some(i + 1)]
    }

    fn window_indices(&self) -> Vec<usize> {
        self.expected_indices().into_iter().flatten().collect()
    }

    fn window_matches(&self, expected: &[Option<usize>; 3]) -> bool {
        self.window
            .slots()
            .iter()
            .zip(expected)
            .all(|(slot, want)| match (slot, want) {
                (None, None) => true,
                (Some(id), Some(index)) => self.pool.index_of(*id) == Some(*index),
                _ => false,
            })
    }

    fn current_handle(&self) -> Option<&MediaHandle<B>> {
        self.pool.handle(self.window.current?)
    }

    fn set_playing(&mut self, id: HandleId, playing: bool) {
        if let Some(handle) = self.pool.handle_mut(id) {
            if playing {
                handle.play();
            } else {
                handle.pause();
            }
        }
    }

    fn play_current(&mut self) {
        if let Some(current) = self.window.current {
            self.set_playing(current, true);
        }
        self.publish_playing();
    }

    fn pause_slots(&mut self) {
        for id in self.window.slots().into_iter().flatten() {
            if self.pool.handle(id).is_some_and(|h| h.is_playing()) {
                self.set_playing(id, false);
            }
        }
        self.publish_playing();
    }

    fn publish_playing(&self) {
        publish(&self.playing, self.is_playing());
    }

    fn publish_all(&self) {
        publish(&self.scroll_locked, self.is_scroll_locked());
        publish(&self.navigation, self.navigation_enabled());
        self.publish_playing();
    }
}

fn publish(tx: &watch::Sender<bool>, value: bool) {
    tx.send_if_modified(|current| {
        if *current == value {
            return false;
        }
        *current = value;
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::ManualBackend;

    const VIEWPORT: f64 = 800.0;

    fn items(count: usize) -> Vec<MediaItem> {
        (0..count)
            .map(|n| MediaItem::parse(&format!("https://cdn.example.com/clip-{n}.mp4")).unwrap())
            .collect()
    }

    fn coordinator(capacity: usize, count: usize) -> Coordinator<ManualBackend> {
        let pool = ResourcePool::new(capacity, |_| ManualBackend::default()).unwrap();
        let mut coordinator = Coordinator::new(pool, CoordinatorSettings::default()).unwrap();
        coordinator.replace_feed(items(count));
        coordinator
    }

    fn backend(c: &Coordinator<ManualBackend>, index: usize) -> &ManualBackend {
        let id = c.pool().handle_for(index).unwrap();
        c.handle(id).unwrap().backend()
    }

    fn window_indices(c: &Coordinator<ManualBackend>) -> [Option<usize>; 3] {
        let w = c.window();
        [w.previous, w.current, w.next].map(|slot| slot.and_then(|id| c.pool().index_of(id)))
    }

    fn playing_indices(c: &Coordinator<ManualBackend>) -> Vec<usize> {
        c.pool()
            .handles()
            .filter(|h| h.is_playing())
            .filter_map(|h| h.bound_index())
            .collect()
    }

    /// Settle on `index` and mark its watched neighbor ready.
    fn settle_ready(c: &mut Coordinator<ManualBackend>, index: usize) {
        c.on_settle(index);
        if let Some(watched) = c.watched_index() {
            backend(c, watched).report(Readiness::Ready);
            let readiness = c.lock.as_ref().unwrap().watch.current();
            let epoch = c.lock.as_ref().unwrap().epoch;
            c.handle_wake(Wake::Readiness { epoch, readiness });
        }
        assert!(!c.is_scroll_locked());
    }

    #[test]
    fn small_pool_is_rejected() {
        let pool = ResourcePool::new(2, |_| ManualBackend::default()).unwrap();
        assert!(Coordinator::new(pool, CoordinatorSettings::default()).is_err());
    }

    #[test]
    fn feed_load_plays_first_item() {
        let c = coordinator(5, 10);
        assert_eq!(c.phase(), Phase::Settled);
        assert_eq!(window_indices(&c), [None, Some(0), Some(1)]);
        assert_eq!(playing_indices(&c), vec![0]);
        assert!(c.is_playing());
        assert!(c.navigation_enabled());
        assert!(!c.is_scroll_locked());
    }

    #[test]
    fn empty_feed_is_idle() {
        let mut c = coordinator(5, 0);
        assert_eq!(c.phase(), Phase::Idle);
        assert!(!c.navigation_enabled());
        c.on_settle(3);
        c.on_scroll(VIEWPORT, VIEWPORT);
        assert_eq!(c.phase(), Phase::Idle);
        assert_eq!(c.prefetch(0), None);
    }

    #[test]
    fn settle_rebuilds_window_and_locks() {
        let mut c = coordinator(5, 10);
        for i in 1..=5 {
            settle_ready(&mut c, i);
        }

        c.on_settle(6);

        assert_eq!(window_indices(&c), [Some(5), Some(6), Some(7)]);
        assert_eq!(c.phase(), Phase::Locked);
        assert!(c.is_scroll_locked());
        assert!(*c.subscribe_scroll_lock().borrow());
        assert_eq!(c.watched_index(), Some(7));
        assert_eq!(playing_indices(&c), vec![6]);

        backend(&c, 7).report(Readiness::Ready);
        let epoch = c.lock.as_ref().unwrap().epoch;
        c.handle_wake(Wake::Readiness {
            epoch,
            readiness: Readiness::Ready,
        });

        assert!(!c.is_scroll_locked());
        assert_eq!(c.phase(), Phase::Settled);
        assert!(!*c.subscribe_scroll_lock().borrow());
        assert_eq!(c.watched_index(), None);
    }

    #[test]
    fn lock_released_immediately_when_neighbor_already_ready() {
        let mut c = coordinator(5, 10);
        backend(&c, 1).report(Readiness::Ready);
        c.prefetch(2);
        backend(&c, 2).report(Readiness::Ready);

        c.on_settle(1);

        assert_eq!(c.phase(), Phase::Settled);
        assert!(!c.is_scroll_locked());
    }

    #[test]
    fn lock_holds_while_neighbor_loading() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        let epoch = c.lock.as_ref().unwrap().epoch;

        c.handle_wake(Wake::Tick { epoch });
        c.handle_wake(Wake::Readiness {
            epoch,
            readiness: Readiness::Loading,
        });

        assert!(c.is_scroll_locked());
        assert_eq!(c.begin_drag(), DragPermission::Blocked);
    }

    #[test]
    fn tick_observes_missed_notification() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        let epoch = c.lock.as_ref().unwrap().epoch;
        backend(&c, 2).report(Readiness::Ready);

        c.handle_wake(Wake::Tick { epoch });

        assert!(!c.is_scroll_locked());
    }

    #[test]
    fn stale_wake_is_ignored() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        let stale = c.lock.as_ref().unwrap().epoch;
        backend(&c, 2).report(Readiness::Ready);
        c.handle_wake(Wake::Readiness {
            epoch: stale,
            readiness: Readiness::Ready,
        });
        assert!(!c.is_scroll_locked());

        c.on_settle(2);
        assert!(c.is_scroll_locked());
        c.handle_wake(Wake::Readiness {
            epoch: stale,
            readiness: Readiness::Ready,
        });
        c.handle_wake(Wake::Tick { epoch: stale });
        assert!(c.is_scroll_locked());
        assert_eq!(c.watched_index(), Some(3));
    }

    #[test]
    fn settling_backwards_watches_previous() {
        let mut c = coordinator(5, 10);
        settle_ready(&mut c, 1);
        settle_ready(&mut c, 2);
        settle_ready(&mut c, 3);

        c.on_settle(2);

        assert_eq!(c.watched_index(), Some(1));
    }

    #[test]
    fn last_item_watches_previous_neighbor() {
        let mut c = coordinator(5, 3);
        settle_ready(&mut c, 1);

        c.on_settle(2);

        assert_eq!(window_indices(&c), [Some(1), Some(2), None]);
        assert_eq!(c.watched_index(), Some(1));
    }

    #[test]
    fn single_item_feed_never_locks() {
        let mut c = coordinator(5, 1);
        c.on_settle(0);
        assert_eq!(c.phase(), Phase::Settled);
        assert!(c.navigation_enabled());
    }

    #[test]
    fn settle_past_end_is_clamped() {
        let mut c = coordinator(5, 4);
        c.on_settle(99);
        assert_eq!(c.current_index(), 3);
    }

    #[test]
    fn settle_elsewhere_while_locked_is_ignored() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        c.on_settle(2);
        assert_eq!(c.current_index(), 1);
        assert!(c.is_scroll_locked());
    }

    #[test]
    fn settle_on_same_index_revalidates_without_churn() {
        let mut c = coordinator(5, 10);
        let loads_before: usize = c.pool().handles().map(|h| h.backend().loads.len()).sum();

        c.on_settle(0);

        let loads_after: usize = c.pool().handles().map(|h| h.backend().loads.len()).sum();
        assert_eq!(loads_before, loads_after);
        assert_eq!(c.phase(), Phase::Locked);
        assert_eq!(c.watched_index(), Some(1));
    }

    #[test]
    fn failed_neighbor_is_retried_then_unlocks() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        let first_gen = c.handle(c.pool().handle_for(2).unwrap()).unwrap().generation();

        backend(&c, 2).report(Readiness::Failed);
        let epoch = c.lock.as_ref().unwrap().epoch;
        c.handle_wake(Wake::Readiness {
            epoch,
            readiness: Readiness::Failed,
        });

        // reloaded once and still waiting
        assert!(c.is_scroll_locked());
        let handle = c.handle(c.pool().handle_for(2).unwrap()).unwrap();
        assert!(handle.generation() > first_gen);
        assert_eq!(handle.readiness(), Readiness::Loading);
        assert_eq!(window_indices(&c), [Some(0), Some(1), Some(2)]);

        backend(&c, 2).report(Readiness::Failed);
        let epoch = c.lock.as_ref().unwrap().epoch;
        c.handle_wake(Wake::Tick { epoch });

        assert!(!c.is_scroll_locked());
        assert_eq!(c.phase(), Phase::Settled);
    }

    #[test]
    fn retried_neighbor_can_still_become_ready() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        backend(&c, 2).report(Readiness::Failed);
        let epoch = c.lock.as_ref().unwrap().epoch;
        c.handle_wake(Wake::Tick { epoch });
        assert!(c.is_scroll_locked());

        backend(&c, 2).report(Readiness::Ready);
        let epoch = c.lock.as_ref().unwrap().epoch;
        c.handle_wake(Wake::Tick { epoch });

        assert!(!c.is_scroll_locked());
    }

    #[test]
    fn peek_crossing_is_edge_triggered() {
        let mut c = coordinator(5, 10);
        settle_ready(&mut c, 1);
        let next_plays = backend(&c, 2).play_calls;
        let current_pauses = backend(&c, 1).pause_calls;

        for step in 0..10 {
            c.on_scroll(VIEWPORT + VIEWPORT * 0.31 + step as f64, VIEWPORT);
        }

        assert_eq!(c.phase(), Phase::Peeking(Direction::Next));
        assert_eq!(backend(&c, 2).play_calls, next_plays + 1);
        assert_eq!(backend(&c, 1).pause_calls, current_pauses + 1);
        assert_eq!(playing_indices(&c), vec![2]);
        assert!(!c.is_playing());
    }

    #[test]
    fn peek_reverts_inside_threshold() {
        let mut c = coordinator(5, 10);
        settle_ready(&mut c, 1);

        c.on_scroll(VIEWPORT - VIEWPORT * 0.4, VIEWPORT);
        assert_eq!(c.phase(), Phase::Peeking(Direction::Previous));
        assert_eq!(playing_indices(&c), vec![0]);

        c.on_scroll(VIEWPORT - VIEWPORT * 0.1, VIEWPORT);
        c.on_scroll(VIEWPORT + VIEWPORT * 0.1, VIEWPORT);

        assert_eq!(c.phase(), Phase::Settled);
        assert_eq!(playing_indices(&c), vec![1]);
        assert_eq!(backend(&c, 1).play_calls, 2);
    }

    #[test]
    fn peek_switches_direction_in_one_drag() {
        let mut c = coordinator(5, 10);
        settle_ready(&mut c, 1);

        c.on_scroll(VIEWPORT * 1.5, VIEWPORT);
        c.on_scroll(VIEWPORT * 0.5, VIEWPORT);

        assert_eq!(c.phase(), Phase::Peeking(Direction::Previous));
        assert_eq!(playing_indices(&c), vec![0]);
    }

    #[test]
    fn peek_at_feed_start_does_nothing() {
        let mut c = coordinator(5, 10);
        c.on_scroll(-VIEWPORT * 0.5, VIEWPORT);
        assert_eq!(c.phase(), Phase::Settled);
        assert_eq!(playing_indices(&c), vec![0]);
    }

    #[test]
    fn scroll_ignored_while_locked() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        c.on_scroll(VIEWPORT * 1.9, VIEWPORT);
        assert_eq!(c.phase(), Phase::Locked);
        assert_eq!(playing_indices(&c), vec![1]);
    }

    #[test]
    fn peek_then_settle_on_neighbor() {
        let mut c = coordinator(5, 10);
        c.on_scroll(VIEWPORT * 0.6, VIEWPORT);
        assert_eq!(playing_indices(&c), vec![1]);

        c.on_settle(1);

        assert_eq!(c.phase(), Phase::Locked);
        assert_eq!(playing_indices(&c), vec![1]);
        assert_eq!(window_indices(&c), [Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn peek_past_feed_start_ends_peek() {
        let mut c = coordinator(5, 10);
        c.on_scroll(VIEWPORT * 0.5, VIEWPORT);
        assert_eq!(c.phase(), Phase::Peeking(Direction::Next));

        c.on_scroll(-VIEWPORT * 0.5, VIEWPORT);

        assert_eq!(c.phase(), Phase::Settled);
        assert_eq!(playing_indices(&c), vec![0]);
    }

    #[test]
    fn toggle_only_affects_current() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);

        c.toggle_playback();
        assert!(!c.is_playing());
        assert!(!*c.subscribe_playing().borrow());
        assert!(c.is_scroll_locked());

        c.toggle_playback();
        assert!(c.is_playing());
        assert_eq!(playing_indices(&c), vec![1]);
    }

    #[test]
    fn tap_ignored_while_peeking_or_composing() {
        let mut c = coordinator(5, 10);
        settle_ready(&mut c, 1);

        c.on_scroll(VIEWPORT * 1.5, VIEWPORT);
        c.toggle_playback();
        assert_eq!(playing_indices(&c), vec![2]);

        c.on_scroll(VIEWPORT, VIEWPORT);
        assert_eq!(playing_indices(&c), vec![1]);

        c.set_compose_focus(true);
        c.toggle_playback();
        assert!(playing_indices(&c).is_empty());
        assert!(!c.is_playing());
    }

    #[test]
    fn compose_focus_pauses_and_blocks_navigation() {
        let mut c = coordinator(5, 10);
        let navigation = c.subscribe_navigation();

        c.set_compose_focus(true);
        assert!(!c.is_playing());
        assert!(!c.navigation_enabled());
        assert!(!*navigation.borrow());
        assert_eq!(c.begin_drag(), DragPermission::Blocked);

        c.set_compose_focus(false);
        assert!(c.is_playing());
        assert!(c.navigation_enabled());
        assert!(*navigation.borrow());
        assert_eq!(c.begin_drag(), DragPermission::Allowed);
    }

    #[test]
    fn compose_blur_keeps_navigation_off_while_locked() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        c.set_compose_focus(true);
        c.set_compose_focus(false);

        assert!(c.is_playing());
        assert!(!c.navigation_enabled());

        backend(&c, 2).report(Readiness::Ready);
        let epoch = c.lock.as_ref().unwrap().epoch;
        c.handle_wake(Wake::Tick { epoch });
        assert!(c.navigation_enabled());
    }

    #[test]
    fn prefetch_warms_without_playing() {
        let mut c = coordinator(5, 10);
        let id = c.prefetch(3).unwrap();

        assert_eq!(c.prefetch(3), Some(id));
        let handle = c.handle(id).unwrap();
        assert_eq!(handle.bound_index(), Some(3));
        assert_eq!(handle.readiness(), Readiness::Loading);
        assert_eq!(handle.backend().loads.len(), 1);
        assert!(!handle.is_playing());
        assert_eq!(playing_indices(&c), vec![0]);
    }

    #[test]
    fn prefetch_never_evicts_window() {
        let mut c = coordinator(3, 10);
        settle_ready(&mut c, 1);
        assert_eq!(c.prefetch(5), None);
        assert_eq!(window_indices(&c), [Some(0), Some(1), Some(2)]);

        let mut c = coordinator(4, 10);
        assert!(c.prefetch(5).is_some());
        assert!(c.prefetch(6).is_some());
        assert_eq!(c.prefetch(7), None);
        assert_eq!(window_indices(&c), [None, Some(0), Some(1)]);
    }

    #[test]
    fn attach_never_evicts_window() {
        let mut c = coordinator(3, 10);
        settle_ready(&mut c, 1);

        assert_eq!(c.attach(3), None);
        assert_eq!(window_indices(&c), [Some(0), Some(1), Some(2)]);

        c.on_scroll(VIEWPORT * 0.5, VIEWPORT);
        assert_eq!(c.phase(), Phase::Peeking(Direction::Previous));
        assert_eq!(playing_indices(&c), vec![0]);
    }

    #[test]
    fn attach_releases_binding_outside_window() {
        let mut c = coordinator(4, 10);
        settle_ready(&mut c, 1);
        c.prefetch(5).unwrap();

        let id = c.attach(3).unwrap();

        assert_eq!(c.pool().index_of(id), Some(3));
        assert_eq!(c.pool().handle_for(5), None);
        assert_eq!(window_indices(&c), [Some(0), Some(1), Some(2)]);
        assert_eq!(c.attach(3), Some(id));
    }

    #[test]
    fn window_survives_prefetched_bindings() {
        let mut c = coordinator(5, 20);
        c.prefetch(2);
        c.prefetch(3);
        settle_ready(&mut c, 1);
        settle_ready(&mut c, 2);
        settle_ready(&mut c, 3);

        assert_eq!(window_indices(&c), [Some(2), Some(3), Some(4)]);
        assert!(c.pool().len() <= 5);
    }

    #[test]
    fn small_pool_moving_backwards_keeps_window() {
        let mut c = coordinator(3, 10);
        for i in 1..=5 {
            settle_ready(&mut c, i);
        }
        settle_ready(&mut c, 4);
        assert_eq!(window_indices(&c), [Some(3), Some(4), Some(5)]);
        settle_ready(&mut c, 3);
        assert_eq!(window_indices(&c), [Some(2), Some(3), Some(4)]);
    }

    #[test]
    fn replace_feed_invalidates_bindings() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        let old: Vec<_> = c.pool().handles().map(|h| h.generation()).collect();

        c.replace_feed(items(4));

        assert!(!c.is_scroll_locked());
        assert_eq!(c.current_index(), 0);
        assert_eq!(window_indices(&c), [None, Some(0), Some(1)]);
        for (handle, before) in c.pool().handles().zip(old) {
            if handle.bound_index().is_some() {
                assert!(handle.generation() > before);
            }
        }
    }

    #[test]
    fn teardown_cancels_and_releases() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        c.teardown();

        assert!(c.pool().is_empty());
        assert_eq!(c.watched_index(), None);
        assert!(playing_indices(&c).is_empty());
        assert!(!*c.subscribe_scroll_lock().borrow());
        assert!(!c.navigation_enabled());

        c.on_settle(2);
        c.replace_feed(items(3));
        assert!(c.pool().is_empty());
        assert_eq!(c.attach(0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_event_wakes_owner() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        let reporter = backend(&c, 2).reporter().unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            reporter.report(Readiness::Ready);
        });

        let wake = c.next_wake().await;
        assert!(matches!(
            wake,
            Wake::Readiness {
                readiness: Readiness::Ready,
                ..
            }
        ));
        c.handle_wake(wake);
        assert!(!c.is_scroll_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_timer_ticks_each_period() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        let start = Instant::now();

        let wake = c.next_wake().await;
        assert!(matches!(wake, Wake::Tick { .. }));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(6));
        c.handle_wake(wake);
        assert!(c.is_scroll_locked());

        let wake = c.next_wake().await;
        assert!(matches!(wake, Wake::Tick { .. }));
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));
        c.handle_wake(wake);
        assert!(c.is_scroll_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_timer_rebases_after_stall() {
        let mut c = coordinator(5, 10);
        c.on_settle(1);
        tokio::time::advance(Duration::from_secs(17)).await;

        let wake = c.next_wake().await;
        assert!(matches!(wake, Wake::Tick { .. }));
        c.handle_wake(wake);

        let resumed = Instant::now();
        let wake = c.next_wake().await;
        assert!(matches!(wake, Wake::Tick { .. }));
        assert!(resumed.elapsed() >= Duration::from_secs(5));
        assert!(c.is_scroll_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn no_wake_without_lock() {
        let mut c = coordinator(5, 10);
        let waited = tokio::time::timeout(Duration::from_secs(60), c.next_wake()).await;
        assert!(waited.is_err());
    }
}
