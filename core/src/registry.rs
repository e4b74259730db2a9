//! Process-wide map from live handle identity to its transfer context.
//!
//! # Design
//! Callback entry points only receive the userdata pointer registered with
//! the engine, which is the handle identity. The registry turns that back
//! into the owning `TransferContext`. Entries are `Weak`, so the registry
//! never keeps a context alive: the request that created the context owns it,
//! and a lookup after the context is gone simply misses.
//!
//! Shard guards are released before `lookup` returns, so callback logic never
//! runs while other threads are blocked on the same shard.

use std::sync::{Arc, LazyLock, Weak};

use dashmap::DashMap;

use crate::context::TransferContext;
use crate::engine::HandleId;

static GLOBAL: LazyLock<HandleRegistry> = LazyLock::new(HandleRegistry::new);

/// The registry shared by every transfer in the process.
pub fn global() -> &'static HandleRegistry {
    &GLOBAL
}

#[derive(Debug, Default)]
pub struct HandleRegistry {
    contexts: DashMap<HandleId, Weak<TransferContext>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `handle` with `context`, replacing any stale entry.
    pub fn bind(&self, handle: HandleId, context: &Arc<TransferContext>) {
        if self
            .contexts
            .insert(handle, Arc::downgrade(context))
            .is_some()
        {
            tracing::warn!(%handle, "replaced stale registry entry for reused handle");
        }
    }

    pub fn lookup(&self, handle: HandleId) -> Option<Arc<TransferContext>> {
        let weak = self.contexts.get(&handle).map(|entry| entry.value().clone())?;
        weak.upgrade()
    }

    pub fn unbind(&self, handle: HandleId) -> bool {
        self.contexts.remove(&handle).is_some()
    }

    pub fn contains(&self, handle: HandleId) -> bool {
        self.contexts.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
