use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::completion::Completion;
use crate::error::StoreResult;
use crate::pending::WriteOp;

/// A mail object as the backend holds it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMail {
    pub data: Vec<u8>,
    /// Inline attributes.
    pub attrs: BTreeMap<String, Vec<u8>>,
    /// Extended-store entries.
    pub extended: BTreeMap<String, Vec<u8>>,
    /// Time of the last payload write, as recorded by the backend.
    pub saved_at: DateTime<Utc>,
}

/// Capability handle onto an established backend connection.
///
/// Implementations own connection setup, authentication and retries; this
/// crate only submits work and stores the returned tokens. All calls are
/// scoped to a namespace (the owner of the object set).
///
/// Implementations must be thread-safe (`Send + Sync`): one connection is
/// shared read-only by many contexts.
pub trait MailBackend: Send + Sync {
    /// Submit an asynchronous write. Backend failures are reported through
    /// the returned [`Completion`], not through the submission result.
    fn aio_write(&self, namespace: &str, op: &WriteOp) -> StoreResult<Completion>;

    /// Read an object's payload and attributes.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    fn read(&self, namespace: &str, oid: &str) -> StoreResult<Option<StoredMail>>;

    /// Upsert entries in the object's extended store.
    fn set_extended(
        &self,
        namespace: &str,
        oid: &str,
        entries: &BTreeMap<String, Vec<u8>>,
    ) -> StoreResult<()>;

    /// Fetch all entries from the object's extended store.
    ///
    /// Returns an empty map if the object does not exist.
    fn get_extended(&self, namespace: &str, oid: &str) -> StoreResult<BTreeMap<String, Vec<u8>>>;

    /// Delete an object. Returns `true` if the object existed.
    fn remove(&self, namespace: &str, oid: &str) -> StoreResult<bool>;
}
