//! Fixed-capacity pool of playback handles.
//!
//! Feed indices are bound to handles on checkout. Bindings are kept in an
//! [`LruCache`] that is only ever read with `peek`, so its order is bind
//! order: checking out an index that is already bound never refreshes it, and
//! the entry evicted under pressure is the one bound longest ago. The handle
//! side of the mapping lives on the handle itself (`bound_index`), so neither
//! direction needs a scan.

use std::num::NonZeroUsize;

use anyhow::{Context, Result};
use lru::LruCache;

use crate::media::{HandleId, MediaBackend, MediaHandle, MediaItem};

pub struct ResourcePool<B> {
    handles: Vec<MediaHandle<B>>,
    /// Feed index -> handle, oldest binding first out.
    bindings: LruCache<usize, HandleId>,
    /// Handles that are not bound to any index.
    free: Vec<HandleId>,
}

impl<B: MediaBackend> ResourcePool<B> {
    /// Create a pool of `capacity` handles, building one backend per handle.
    pub fn new(capacity: usize, mut make_backend: impl FnMut(HandleId) -> B) -> Result<Self> {
        let cap = NonZeroUsize::new(capacity).context("Pool capacity must be at least 1")?;

        let handles = (0..capacity)
            .map(|i| MediaHandle::new(HandleId(i), make_backend(HandleId(i))))
            .collect();
        // Popped from the back, so handle#0 goes out first
        let free = (0..capacity).rev().map(HandleId).collect();

        tracing::info!("Resource pool initialized with {} handles", capacity);

        Ok(Self {
            handles,
            bindings: LruCache::new(cap),
            free,
        })
    }

    pub fn capacity(&self) -> usize {
        self.handles.len()
    }

    /// Number of bound indices.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bind `index` to a handle loading `item`, or return its existing handle.
    ///
    /// An already bound index is returned untouched: no reload, and its place
    /// in the eviction order is kept. Otherwise a free handle is used if there
    /// is one, and only when every handle is bound is the oldest binding
    /// evicted to make room.
    pub fn checkout(&mut self, index: usize, item: &MediaItem) -> HandleId {
        if let Some(&id) = self.bindings.peek(&index) {
            tracing::trace!("Reusing {} for index {}", id, index);
            return id;
        }

        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                // No free handle means every handle is bound
                let (evicted, id) = self
                    .bindings
                    .pop_lru()
                    .expect("full pool has a binding to evict");
                self.handles[id.0].unbind();
                tracing::debug!("Evicted index {} from {}", evicted, id);
                id
            }
        };

        self.handles[id.0].bind(index, item);
        self.bindings.push(index, id);
        tracing::debug!("Bound index {} to {} ({})", index, id, item);
        id
    }

    /// Unbind `index` and clear its handle's source. No-op when unbound.
    pub fn release(&mut self, index: usize) -> bool {
        let Some(id) = self.bindings.pop(&index) else {
            return false;
        };
        self.handles[id.0].unbind();
        self.free.push(id);
        tracing::debug!("Released index {} from {}", index, id);
        true
    }

    /// Unbind every index.
    pub fn release_all(&mut self) {
        let released = self.bindings.len();
        while let Some((_, id)) = self.bindings.pop_lru() {
            self.handles[id.0].unbind();
            self.free.push(id);
        }
        if released > 0 {
            tracing::debug!("Released all {} bindings", released);
        }
    }

    /// Index the next checkout of an unbound index would evict, if any.
    pub fn eviction_candidate(&self) -> Option<usize> {
        if !self.free.is_empty() {
            return None;
        }
        self.bindings.peek_lru().map(|(&index, _)| index)
    }

    /// Bound indices, oldest binding first.
    pub fn bound_indices(&self) -> Vec<usize> {
        self.bindings.iter().rev().map(|(&index, _)| index).collect()
    }

    /// Oldest binding whose index is not in `keep`.
    pub fn oldest_bound_except(&self, keep: &[usize]) -> Option<usize> {
        self.bindings
            .iter()
            .rev()
            .map(|(&index, _)| index)
            .find(|index| !keep.contains(index))
    }

    pub fn handle_for(&self, index: usize) -> Option<HandleId> {
        self.bindings.peek(&index).copied()
    }

    pub fn index_of(&self, id: HandleId) -> Option<usize> {
        self.handle(id)?.bound_index()
    }

    pub fn handle(&self, id: HandleId) -> Option<&MediaHandle<B>> {
        self.handles.get(id.0)
    }

    pub(crate) fn handle_mut(&mut self, id: HandleId) -> Option<&mut MediaHandle<B>> {
        self.handles.get_mut(id.0)
    }

    pub fn handles(&self) -> impl Iterator<Item = &MediaHandle<B>> {
        self.handles.iter()
    }

    pub(crate) fn pause_all(&mut self) {
        for handle in self.handles.iter_mut().filter(|h| h.is_playing()) {
            handle.pause();
        }
    }
}
