//! Error taxonomy for the dynamics subsystem.

/// Boxed error coming from a key-value backend.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum DynamicsError {
    /// An epoch of 0 was given where a real epoch is required.
    #[error("invalid epoch: no zero epoch")]
    ZeroEpoch,

    /// The backend has no record under this key.
    #[error("key not present: {}", hex::encode(.key))]
    KeyNotPresent { key: Vec<u8> },

    #[error("invalid update for {field:?} with value {value:?}: {reason}")]
    InvalidUpdateValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("invalid link for epoch {epoch}: {reason}")]
    InvalidLink { epoch: u32, reason: &'static str },

    #[error("invalid node at epoch {epoch}: {reason}")]
    InvalidNode { epoch: u32, reason: &'static str },

    #[error("epoch {epoch} already has a change point")]
    DuplicateEpoch { epoch: u32 },

    #[error("epoch {epoch} predates recorded history (tail is epoch {tail})")]
    EpochPredatesHistory { epoch: u32, tail: u32 },

    /// Persisted data that cannot be decoded or violates a timeline invariant.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(#[source] BackendError),

    #[error("storage has not been initialized")]
    NotInitialized,

    #[error("storage has already been initialized")]
    AlreadyInitialized,

    #[error("storage has already been started")]
    AlreadyStarted,

    #[error("lock poisoned")]
    LockPoisoned,
}

impl DynamicsError {
    /// Wrap any backend failure.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }

    pub fn is_not_present(&self) -> bool {
        matches!(self, Self::KeyNotPresent { .. })
    }

    pub(crate) fn invalid_update(field: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidUpdateValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DynamicsError>;
