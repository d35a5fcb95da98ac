//! Sessions: one logical execution at a time.
//!
//! An editor tab maps to a session. Submitting a new snippet while the
//! previous one is still running cancels the previous one, so a session
//! never has two children alive.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::engine::{Engine, ExecutionRequest};
use crate::error::Error;
use crate::execution::{ExecutionId, ExecutionOutcome};

/// A sequential execution context on top of an [`Engine`].
#[derive(Debug)]
pub struct Session {
    engine: Engine,
    current: Mutex<Option<ExecutionId>>,
}

impl Session {
    /// Create a session driving `engine`.
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            current: Mutex::new(None),
        }
    }

    /// Run `request`, cancelling this session's in-flight run first.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::submit`].
    pub async fn submit(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, Error> {
        let id = request.id();
        let previous = self.lock().replace(id);
        if let Some(previous) = previous
            && self.engine.cancel(&previous)
        {
            tracing::debug!(execution_id = %previous, "Superseded by a newer submission");
        }

        let outcome = self.engine.submit(request).await;

        let mut current = self.lock();
        if *current == Some(id) {
            *current = None;
        }
        outcome
    }

    /// Cancel the in-flight run, if any.
    pub fn cancel(&self) -> bool {
        self.lock()
            .take()
            .is_some_and(|id| self.engine.cancel(&id))
    }

    /// Id of the in-flight run, if any.
    #[must_use]
    pub fn current(&self) -> Option<ExecutionId> {
        *self.lock()
    }

    /// The engine this session submits to.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn lock(&self) -> MutexGuard<'_, Option<ExecutionId>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
