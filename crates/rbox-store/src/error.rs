use crate::pending::CompletionHandle;

/// Errors from mail object bookkeeping and backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A GUID was already assigned to this object.
    #[error("guid already set on object {oid:?}")]
    GuidAlreadySet { oid: String },

    /// The completion handle is already tracked by this object.
    #[error("completion handle {0} is already pending")]
    DuplicateHandle(CompletionHandle),

    /// The completion handle was never registered (or already resolved).
    #[error("completion handle {0} is not pending")]
    UnknownHandle(CompletionHandle),

    /// The operation is not allowed while writes are outstanding.
    #[error("object {oid:?} has {count} pending operation(s)")]
    PendingOperations { oid: String, count: usize },

    /// The object is addressed by a different identifier than the context.
    #[error("context addresses {context:?} but object is {object:?}")]
    AddressMismatch { context: String, object: String },

    /// The backend rejected or failed an operation.
    #[error("backend error on {oid:?}: {reason}")]
    Backend { oid: String, reason: String },

    /// The completion token was dropped before the backend reported.
    #[error("completion {0} abandoned by backend")]
    Abandoned(CompletionHandle),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
