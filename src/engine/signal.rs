use tokio::sync::watch;

use crate::core::TargetValue;
use crate::error::{BuildStepError, NodeError};

pub(crate) type Outcome = Result<TargetValue, BuildStepError>;

/// A single-resolution future, settled at most once, first write wins.
pub(crate) struct Deferred {
    tx: watch::Sender<Option<Outcome>>,
}

impl Deferred {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    fn settle(&self, outcome: Outcome) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    /// Returns `true` if this call settled the future.
    pub(crate) fn resolve(&self, value: TargetValue) -> bool {
        self.settle(Ok(value))
    }

    /// Returns `true` if this call settled the future.
    pub(crate) fn reject(&self, error: BuildStepError) -> bool {
        self.settle(Err(error))
    }

    pub(crate) fn outcome(&self) -> Option<Outcome> {
        self.tx.borrow().clone()
    }

    /// Waits until the future is settled and returns its outcome.
    pub(crate) async fn settled(&self) -> Result<Outcome, NodeError> {
        let mut rx = self.tx.subscribe();
        let slot = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| NodeError::SignalClosed)?;

        (*slot).clone().ok_or(NodeError::SignalClosed)
    }
}
