//! Asynchronous execution of techs against a node.
//!
//! Every runner invocation opens a [`Session`]: a first-settlement
//! [`Deferred`] that carries the headline outcome of the build, composed
//! with an append-only log of every value published while the session was
//! open. Callers interested in "did something finish" wait on the former,
//! callers collecting several targets read the latter.

mod runner;
mod signal;

use std::sync::{Mutex, PoisonError};

use crate::core::TargetValue;
use crate::error::{BuildStepError, NodeError};

pub(crate) use crate::engine::signal::{Deferred, Outcome};

/// The state of one build session on a node.
pub(crate) struct Session {
    signal: Deferred,
    history: Mutex<Vec<TargetValue>>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            signal: Deferred::new(),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Settles the signal if still pending and always records the value.
    pub(crate) fn publish(&self, value: TargetValue) -> bool {
        let settled = self.signal.resolve(value.clone());
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push(value);
        settled
    }

    pub(crate) fn fail(&self, error: BuildStepError) -> bool {
        self.signal.reject(error)
    }

    pub(crate) fn outcome(&self) -> Option<Outcome> {
        self.signal.outcome()
    }

    pub(crate) async fn settled(&self) -> Result<Outcome, NodeError> {
        self.signal.settled().await
    }

    /// Number of values published in this session so far.
    pub(crate) fn len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Every value published in this session, in publication order.
    pub(crate) fn history(&self) -> Vec<TargetValue> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
