use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Failure signalled by a tech through [`Node::reject_target`](crate::Node::reject_target).
///
/// The underlying error is shared, so every waiter attached to the same
/// completion signal observes the same failure.
#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct BuildStepError(pub(crate) Arc<anyhow::Error>);

impl BuildStepError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// The error originally passed by the tech.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for BuildStepError {
    fn from(e: anyhow::Error) -> Self {
        BuildStepError(Arc::new(e))
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    BuildStep(#[from] BuildStepError),

    #[error("Couldn't read target file '{path}'.\n{source}")]
    FileRead {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't evaluate module '{path}'.\n{source}")]
    ModuleEvaluation {
        path: Utf8PathBuf,
        source: anyhow::Error,
    },

    #[error("Method `{0}` is not implemented.")]
    Unimplemented(&'static str),

    #[error("Tech '{tech}' did not settle its targets within {after:?}")]
    Timeout { tech: String, after: Duration },

    #[error("Completion signal was dropped before it settled")]
    SignalClosed,

    #[error("Couldn't set up node.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("Invalid tech options.\n{0}")]
    Parse(#[from] serde_json::Error),
}
