//! Registry of in-flight executions.
//!
//! Each running child is represented by a [`CancellationToken`]; cancelling
//! the token makes the execution task kill its process. The registry is owned
//! by the [`Engine`](crate::Engine) and shared with its sessions, never
//! reached through global state.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::execution::ExecutionId;

#[derive(Debug)]
struct Handle {
    generation: u64,
    token: CancellationToken,
}

/// Table of cancellation handles keyed by [`ExecutionId`].
///
/// Safe for concurrent insert, remove and iteration from many sessions.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    handles: DashMap<ExecutionId, Handle>,
    generation: AtomicU64,
}

impl ProcessRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new execution.
    ///
    /// The returned guard removes the entry when dropped, on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateExecution`] if `id` is already tracked.
    pub(crate) fn register(&self, id: ExecutionId) -> Result<Registration<'_>, Error> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        match self.handles.entry(id) {
            Entry::Occupied(_) => return Err(Error::DuplicateExecution(id)),
            Entry::Vacant(slot) => {
                slot.insert(Handle {
                    generation,
                    token: token.clone(),
                });
            }
        }
        tracing::debug!(execution_id = %id, "Registered execution");
        Ok(Registration {
            registry: self,
            id,
            generation,
            token,
        })
    }

    /// Signal one execution to stop and forget it.
    ///
    /// Returns `false` if nothing was tracked under `id`.
    pub fn cancel(&self, id: &ExecutionId) -> bool {
        match self.handles.remove(id) {
            Some((_, handle)) => {
                handle.token.cancel();
                tracing::debug!(execution_id = %id, "Cancelled execution");
                true
            }
            None => false,
        }
    }

    /// Signal every tracked execution to stop and clear the registry.
    ///
    /// Returns how many executions were signalled.
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        self.handles.retain(|_, handle| {
            handle.token.cancel();
            count += 1;
            false
        });
        if count > 0 {
            tracing::debug!(count, "Cancelled all executions");
        }
        count
    }

    /// Whether `id` is currently tracked.
    #[must_use]
    pub fn contains(&self, id: &ExecutionId) -> bool {
        self.handles.contains_key(id)
    }

    /// Number of tracked executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Live registry entry for one execution.
///
/// Dropping it removes the entry. Removal is a no-op when the entry was
/// already taken by a cancel, or now belongs to a later registration that
/// reused the id.
#[derive(Debug)]
pub(crate) struct Registration<'a> {
    registry: &'a ProcessRegistry,
    id: ExecutionId,
    generation: u64,
    token: CancellationToken,
}

impl Registration<'_> {
    /// Token cancelled when this execution is asked to stop.
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.registry
            .handles
            .remove_if(&self.id, |_, handle| handle.generation == generation);
    }
}
