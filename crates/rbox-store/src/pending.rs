//! In-flight write tracking.
//!
//! A [`PendingOps`] table maps opaque [`CompletionHandle`]s to the
//! [`WriteOp`] each one completes. The table owns its descriptors; handles
//! are plain copyable tokens with no lifetime attached.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::object::StorageObject;

/// Starts high so handles built with [`CompletionHandle::from_raw`] in
/// tests do not collide with allocated ones.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1 << 32);

/// Opaque token identifying one outstanding asynchronous write.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompletionHandle(u64);

impl CompletionHandle {
    /// Allocate a handle never returned before in this process, whatever
    /// connection asks for it.
    pub fn allocate() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw token value. Backends normally use [`allocate`](Self::allocate).
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw token value.
    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompletionHandle({})", self.0)
    }
}

impl fmt::Display for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of write a [`WriteOp`] performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteKind {
    /// Replace the whole payload and set the inline attributes.
    WriteFull,
    /// Append the payload to the stored one.
    Append,
    /// Set inline attributes only; the payload is left untouched.
    SetAttrs,
    /// Upsert the attributes into the extended store.
    SetExtended,
    /// Remove the object.
    Remove,
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteFull => write!(f, "write-full"),
            Self::Append => write!(f, "append"),
            Self::SetAttrs => write!(f, "set-attrs"),
            Self::SetExtended => write!(f, "set-extended"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// Owned description of one asynchronous write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteOp {
    pub kind: WriteKind,
    /// Identifier of the object the write targets.
    pub oid: String,
    /// Payload bytes; empty for attribute-only writes.
    pub data: Vec<u8>,
    /// Attributes to set, in key order.
    pub attrs: Vec<(String, Vec<u8>)>,
}

impl WriteOp {
    pub fn new(kind: WriteKind, oid: impl Into<String>) -> Self {
        Self {
            kind,
            oid: oid.into(),
            data: Vec::new(),
            attrs: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.attrs.push((key.into(), value.into()));
        self
    }

    /// Payload length in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Table of outstanding writes keyed by completion handle.
///
/// Not ordered: completion order is decided by the backend.
#[derive(Debug, Default)]
pub struct PendingOps {
    ops: HashMap<CompletionHandle, WriteOp>,
}

impl PendingOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new write. Rejects a handle that is already tracked.
    pub fn insert(&mut self, handle: CompletionHandle, op: WriteOp) -> StoreResult<()> {
        if self.ops.contains_key(&handle) {
            return Err(StoreError::DuplicateHandle(handle));
        }
        self.ops.insert(handle, op);
        Ok(())
    }

    /// Stop tracking a write and hand back its descriptor.
    pub fn remove(&mut self, handle: CompletionHandle) -> StoreResult<WriteOp> {
        self.ops
            .remove(&handle)
            .ok_or(StoreError::UnknownHandle(handle))
    }

    pub fn get(&self, handle: CompletionHandle) -> Option<&WriteOp> {
        self.ops.get(&handle)
    }

    pub fn contains(&self, handle: CompletionHandle) -> bool {
        self.ops.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Sorted list of the outstanding handles.
    pub fn handles(&self) -> Vec<CompletionHandle> {
        let mut handles: Vec<CompletionHandle> = self.ops.keys().copied().collect();
        handles.sort();
        handles
    }
}

/// Scoped tracking of one write, returned by [`StorageObject::track`].
///
/// The entry is resolved on every exit path. [`complete`](Self::complete)
/// resolves it and keeps the object valid; [`fail`](Self::fail) or simply
/// dropping the guard resolves it and marks the object invalid.
///
/// The guard holds the object exclusively and dereferences to it, so further
/// writes can be tracked through it while this one is outstanding.
pub struct PendingOpGuard<'a> {
    object: &'a mut StorageObject,
    handle: CompletionHandle,
    settled: bool,
}

impl<'a> PendingOpGuard<'a> {
    pub(crate) fn new(object: &'a mut StorageObject, handle: CompletionHandle) -> Self {
        Self {
            object,
            handle,
            settled: false,
        }
    }

    /// The handle this guard resolves.
    pub fn handle(&self) -> CompletionHandle {
        self.handle
    }

    /// The write succeeded: resolve the entry and return its descriptor.
    pub fn complete(mut self) -> StoreResult<WriteOp> {
        self.settled = true;
        self.object.resolve_pending_op(self.handle)
    }

    /// The write failed: invalidate the object and resolve the entry.
    pub fn fail(mut self) -> StoreResult<WriteOp> {
        self.settled = true;
        self.object.mark_valid(false);
        self.object.resolve_pending_op(self.handle)
    }
}

impl Deref for PendingOpGuard<'_> {
    type Target = StorageObject;

    fn deref(&self) -> &StorageObject {
        &*self.object
    }
}

impl DerefMut for PendingOpGuard<'_> {
    fn deref_mut(&mut self) -> &mut StorageObject {
        &mut *self.object
    }
}

impl Drop for PendingOpGuard<'_> {
    fn drop(&mut self) {
        // Resolved by hand through the deref counts as settled.
        if self.settled || !self.object.pending_ops().contains(self.handle) {
            return;
        }
        debug!(handle = %self.handle, oid = %self.object.identifier(), "pending op abandoned");
        self.object.mark_valid(false);
        if let Err(e) = self.object.resolve_pending_op(self.handle) {
            warn!(handle = %self.handle, error = %e, "failed to resolve abandoned op");
        }
    }
}
