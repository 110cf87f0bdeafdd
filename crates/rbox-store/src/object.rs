use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};
use rbox_types::{decode_time, Guid, Metadata, MetadataKey, XATTR_VERSION};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::pending::{CompletionHandle, PendingOpGuard, PendingOps, WriteKind, WriteOp};

/// A single mail object and the bookkeeping around it.
///
/// Holds the payload, the inline and extended metadata stores, the GUID and
/// the table of writes still in flight against the object. There is no
/// internal locking: every mutator takes `&mut self`, so at most one writer
/// touches the object at a time.
///
/// `size` is tracked separately from the payload length so the size can be
/// declared before the payload is fully buffered. Call
/// [`sync_size`](Self::sync_size) once the buffer is complete.
///
/// The object also remembers how many leading payload bytes the backend
/// already holds, so an [`Append`](WriteKind::Append) write sends only the
/// bytes buffered since.
pub struct StorageObject {
    oid: String,
    guid: Option<Guid>,
    payload: Vec<u8>,
    size: u64,
    durable: u64,
    save_date: Option<DateTime<Utc>>,
    inline: BTreeMap<String, Vec<u8>>,
    extended: BTreeMap<String, Vec<u8>>,
    pending: PendingOps,
    valid: bool,
    index_ref: bool,
}

impl StorageObject {
    /// Create an empty, valid object with no identifier.
    pub fn new() -> Self {
        Self {
            oid: String::new(),
            guid: None,
            payload: Vec::new(),
            size: 0,
            durable: 0,
            save_date: None,
            inline: BTreeMap::new(),
            extended: BTreeMap::new(),
            pending: PendingOps::new(),
            valid: true,
            index_ref: false,
        }
    }

    /// Create an empty object addressed by `oid`.
    pub fn with_identifier(oid: impl Into<String>) -> Self {
        let mut obj = Self::new();
        obj.oid = oid.into();
        obj
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    /// Assign the storage identifier. No syntax checks are made.
    ///
    /// Refused while writes are pending, since those writes target the
    /// current identifier.
    pub fn set_identifier(&mut self, oid: impl Into<String>) -> StoreResult<()> {
        if self.has_pending_op() {
            return Err(self.pending_error());
        }
        self.oid = oid.into();
        Ok(())
    }

    pub fn identifier(&self) -> &str {
        &self.oid
    }

    /// Assign the GUID. A GUID can be set once per object.
    pub fn set_guid(&mut self, guid: Guid) -> StoreResult<()> {
        if self.guid.is_some() {
            return Err(StoreError::GuidAlreadySet {
                oid: self.oid.clone(),
            });
        }
        self.guid = Some(guid);
        Ok(())
    }

    pub fn guid(&self) -> Option<Guid> {
        self.guid
    }

    // -----------------------------------------------------------------------
    // Payload
    // -----------------------------------------------------------------------

    /// Replace the payload wholesale. The declared size is left unchanged.
    /// None of the new buffer counts as written to the backend yet.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
        self.durable = 0;
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Mutable access to the payload for incremental appends.
    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.payload
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Set the declared size to the current payload length.
    pub fn sync_size(&mut self) {
        self.size = self.payload.len() as u64;
    }

    /// Number of leading payload bytes the backend is known to hold.
    pub fn durable_len(&self) -> u64 {
        self.durable
    }

    /// The whole buffer matches the backend, as after a fresh read.
    pub(crate) fn mark_durable(&mut self) {
        self.durable = self.payload.len() as u64;
    }

    /// Record a successful write of `op` that the backend reports as
    /// `written` bytes. Payload writes bring `size` in line with what the
    /// backend now holds.
    pub fn confirm_write(&mut self, op: &WriteOp, written: u64) {
        match op.kind {
            WriteKind::WriteFull => {
                self.durable = written;
                self.size = written;
            }
            WriteKind::Append => {
                self.durable += written;
                self.size = self.durable;
            }
            WriteKind::Remove => self.durable = 0,
            WriteKind::SetAttrs | WriteKind::SetExtended => {}
        }
    }

    /// Cache the backend-recorded save date.
    pub fn set_save_date(&mut self, date: DateTime<Utc>) {
        self.save_date = Some(date);
    }

    pub fn save_date(&self) -> Option<DateTime<Utc>> {
        self.save_date
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    /// Look up an inline attribute. Returns `None` when the key is unset.
    pub fn metadata(&self, key: &str) -> Option<&[u8]> {
        self.inline.get(key).map(Vec::as_slice)
    }

    /// Look up an inline attribute by well-known key.
    pub fn metadata_key(&self, key: MetadataKey) -> Option<&[u8]> {
        self.metadata(key.as_str())
    }

    /// Look up an inline attribute as UTF-8 text.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata(key)
            .and_then(|value| std::str::from_utf8(value).ok())
    }

    /// Upsert an inline attribute. Last write wins.
    pub fn add_metadata(&mut self, metadata: Metadata) {
        self.inline.insert(metadata.key, metadata.value);
    }

    /// All inline attributes in key order.
    pub fn inline_metadata(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.inline.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Look up an extended attribute.
    ///
    /// Unlike [`metadata`](Self::metadata), a missing key yields an empty
    /// value: the extended store does not distinguish "empty" from "unset".
    /// Use [`try_extended_metadata`](Self::try_extended_metadata) when the
    /// difference matters.
    pub fn extended_metadata(&self, key: &str) -> &[u8] {
        self.try_extended_metadata(key).unwrap_or_default()
    }

    pub fn try_extended_metadata(&self, key: &str) -> Option<&[u8]> {
        self.extended.get(key).map(Vec::as_slice)
    }

    /// Upsert an extended attribute. Last write wins.
    pub fn add_extended_metadata(&mut self, metadata: Metadata) {
        self.extended.insert(metadata.key, metadata.value);
    }

    /// All extended attributes in key order.
    pub fn extended_entries(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.extended
    }

    /// The receive time held in the inline [`MetadataKey::ReceivedTime`]
    /// attribute.
    pub fn received_time(&self) -> Option<DateTime<Utc>> {
        self.metadata_key(MetadataKey::ReceivedTime)
            .and_then(decode_time)
    }

    pub fn set_received_time(&mut self, time: DateTime<Utc>) {
        self.add_metadata(Metadata::from_time(MetadataKey::ReceivedTime, time));
    }

    /// Store an attribute inline or in the extended store, as `config` says.
    pub fn add_metadata_routed(&mut self, config: &StoreConfig, metadata: Metadata) {
        if config.routes_extended(&metadata.key) {
            self.add_extended_metadata(metadata);
        } else {
            self.add_metadata(metadata);
        }
    }

    // -----------------------------------------------------------------------
    // Pending operations
    // -----------------------------------------------------------------------

    /// Track an outstanding write. The handle must not already be pending.
    pub fn register_pending_op(
        &mut self,
        handle: CompletionHandle,
        op: WriteOp,
    ) -> StoreResult<()> {
        let kind = op.kind;
        self.pending.insert(handle, op)?;
        debug!(
            oid = %self.oid,
            %handle,
            %kind,
            pending = self.pending.len(),
            "registered pending op"
        );
        Ok(())
    }

    /// Stop tracking a finished write, whatever its outcome.
    ///
    /// This only drops bookkeeping; it never cancels backend work.
    pub fn resolve_pending_op(&mut self, handle: CompletionHandle) -> StoreResult<WriteOp> {
        let op = self.pending.remove(handle)?;
        debug!(oid = %self.oid, %handle, pending = self.pending.len(), "resolved pending op");
        Ok(op)
    }

    /// Track a write and return a guard that resolves it on every exit path.
    pub fn track(
        &mut self,
        handle: CompletionHandle,
        op: WriteOp,
    ) -> StoreResult<PendingOpGuard<'_>> {
        self.register_pending_op(handle, op)?;
        Ok(PendingOpGuard::new(self, handle))
    }

    pub fn has_pending_op(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_ops(&self) -> &PendingOps {
        &self.pending
    }

    fn pending_error(&self) -> StoreError {
        StoreError::PendingOperations {
            oid: self.oid.clone(),
            count: self.pending.len(),
        }
    }

    /// Fails if writes are outstanding; call before deleting or reusing.
    pub fn ensure_idle(&self) -> StoreResult<()> {
        if self.has_pending_op() {
            return Err(self.pending_error());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle flags
    // -----------------------------------------------------------------------

    /// Set to `false` when a backend read or write fails partway. Only the
    /// caller clears the flag again; no operation here resets it.
    pub fn mark_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Mark this instance as a placeholder obtained from an index lookup.
    /// The payload of an index reference must be re-fetched before use.
    pub fn mark_index_ref(&mut self, index_ref: bool) {
        self.index_ref = index_ref;
    }

    pub fn is_index_ref(&self) -> bool {
        self.index_ref
    }

    // -----------------------------------------------------------------------
    // Write preparation and diagnostics
    // -----------------------------------------------------------------------

    /// Describe a write of the object's current state.
    ///
    /// An append carries only the payload bytes past
    /// [`durable_len`](Self::durable_len).
    pub fn prepare_write(&self, kind: WriteKind, config: &StoreConfig) -> WriteOp {
        let op = WriteOp::new(kind, self.oid.clone());
        match kind {
            WriteKind::WriteFull | WriteKind::SetAttrs => {
                let op = if kind == WriteKind::WriteFull {
                    op.with_data(self.payload.clone())
                } else {
                    op
                };
                let version = MetadataKey::Version.as_str();
                let stamp = config.stamp_version;
                let op = self
                    .inline
                    .iter()
                    .filter(|(k, _)| !stamp || k.as_str() != version)
                    .fold(op, |op, (k, v)| op.with_attr(k.clone(), v.clone()));
                if stamp {
                    op.with_attr(version, XATTR_VERSION)
                } else {
                    op
                }
            }
            WriteKind::Append => {
                let start = (self.durable as usize).min(self.payload.len());
                op.with_data(self.payload[start..].to_vec())
            }
            WriteKind::SetExtended => self
                .extended
                .iter()
                .fold(op, |op, (k, v)| op.with_attr(k.clone(), v.clone())),
            WriteKind::Remove => op,
        }
    }

    /// Multi-line human-readable summary, each line prefixed by `indent`.
    pub fn describe(&self, indent: &str) -> String {
        let mut out = String::new();
        let oid: &str = if self.oid.is_empty() {
            "<unassigned>"
        } else {
            &self.oid
        };
        let guid = self.guid.map_or_else(|| "-".to_string(), |g| g.to_hex());
        let save_date = self
            .save_date
            .map_or_else(|| "-".to_string(), |d| d.to_rfc3339());

        let _ = writeln!(out, "{indent}object: {oid}");
        let _ = writeln!(out, "{indent}  guid: {guid}");
        let _ = writeln!(
            out,
            "{indent}  size: {} (buffered {})",
            self.size,
            self.payload.len()
        );
        let _ = writeln!(out, "{indent}  save date: {save_date}");
        if let Some(received) = self.received_time() {
            let _ = writeln!(out, "{indent}  received: {}", received.to_rfc3339());
        }
        let _ = writeln!(
            out,
            "{indent}  valid: {}, index ref: {}, pending ops: {}",
            self.valid,
            self.index_ref,
            self.pending.len()
        );
        for (label, store) in [("inline", &self.inline), ("extended", &self.extended)] {
            for (k, v) in store {
                let value = String::from_utf8_lossy(v);
                match MetadataKey::from_token(k) {
                    Some(key) => {
                        let _ = writeln!(out, "{indent}  {label} {k} ({key:?})={value}");
                    }
                    None => {
                        let _ = writeln!(out, "{indent}  {label} {k}={value}");
                    }
                }
            }
        }
        out
    }
}

impl Default for StorageObject {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StorageObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageObject")
            .field("oid", &self.oid)
            .field("guid", &self.guid)
            .field("size", &self.size)
            .field("valid", &self.valid)
            .field("index_ref", &self.index_ref)
            .field("pending_ops", &self.pending.len())
            .finish()
    }
}

impl Drop for StorageObject {
    fn drop(&mut self) {
        if self.has_pending_op() {
            warn!(
                oid = %self.oid,
                handles = ?self.pending.handles(),
                "mail object dropped with unresolved pending ops"
            );
        }
    }
}
