//! Error kinds surfaced by the environment lifecycle.

/// Why a registry pull failed. Only `NotFound` and `Unavailable` are
/// recovered by falling back to the baseline image.
#[derive(Debug, thiserror::Error)]
pub enum PullError {
    #[error("Remote image not found: {0}")]
    NotFound(String),
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PullError {
    /// Whether acquire should fall back to a fresh baseline environment.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PullError::NotFound(_) | PullError::Unavailable(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NestError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("No live environment for user: {0}")]
    NoLiveEnvironment(String),

    #[error("Pull of {reference} failed")]
    Pull {
        reference: String,
        #[source]
        source: PullError,
    },

    /// The registry entry was cleared but the instance may still be running.
    #[error("Failed to remove instance {name}; it may still be running")]
    RemoveFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Adapter(#[from] anyhow::Error),
}

pub type NestResult<T> = std::result::Result<T, NestError>;
