//! Addressing of one mail object on a shared backend connection.

use std::fmt;
use std::sync::Arc;

use rbox_types::{Guid, Metadata, MetadataKey};
use tracing::{debug, warn};

use crate::completion::Completion;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::object::StorageObject;
use crate::pending::{CompletionHandle, PendingOpGuard, WriteKind, WriteOp};
use crate::traits::MailBackend;

/// Binds a backend connection, an owner namespace and an object identifier.
///
/// The connection is shared: cloning a context clones the `Arc`, never the
/// connection, and the context never closes it. Addressing is fixed at
/// construction; use [`for_object`](Self::for_object) to address another
/// object.
pub struct StorageContext<B: MailBackend> {
    connection: Arc<B>,
    owner: String,
    oid: String,
}

impl<B: MailBackend> StorageContext<B> {
    pub fn new(connection: Arc<B>, owner: impl Into<String>, oid: impl Into<String>) -> Self {
        Self {
            connection,
            owner: owner.into(),
            oid: oid.into(),
        }
    }

    /// Address `oid` under the configured default owner.
    pub fn with_default_owner(
        connection: Arc<B>,
        config: &StoreConfig,
        oid: impl Into<String>,
    ) -> Self {
        Self::new(connection, config.default_owner.clone(), oid)
    }

    pub fn identifier(&self) -> &str {
        &self.oid
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn connection(&self) -> &Arc<B> {
        &self.connection
    }

    /// A new context on the same connection and owner, addressing `oid`.
    pub fn for_object(&self, oid: impl Into<String>) -> Self {
        Self::new(Arc::clone(&self.connection), self.owner.clone(), oid)
    }

    /// An index-reference placeholder for the addressed object. Its payload
    /// is not loaded; call [`load`](Self::load) before reading it.
    pub fn placeholder(&self) -> StorageObject {
        let mut object = StorageObject::with_identifier(self.oid.clone());
        object.mark_index_ref(true);
        object
    }

    /// Give an unnamed object this context's identifier, or check that a
    /// named one matches it.
    fn bind(&self, object: &mut StorageObject) -> StoreResult<()> {
        if object.identifier().is_empty() {
            return object.set_identifier(self.oid.clone());
        }
        if object.identifier() != self.oid {
            return Err(StoreError::AddressMismatch {
                context: self.oid.clone(),
                object: object.identifier().to_string(),
            });
        }
        Ok(())
    }

    /// Prepare and hand a write to the backend without tracking it yet.
    ///
    /// A remove is refused while other writes are pending on the object.
    fn issue(
        &self,
        object: &mut StorageObject,
        kind: WriteKind,
        config: &StoreConfig,
    ) -> StoreResult<(WriteOp, Completion)> {
        self.bind(object)?;
        if kind == WriteKind::Remove {
            object.ensure_idle()?;
        }
        let op = object.prepare_write(kind, config);
        let completion = self.connection.aio_write(&self.owner, &op)?;
        debug!(
            owner = %self.owner,
            oid = %self.oid,
            %kind,
            handle = %completion.handle(),
            "submitted write"
        );
        Ok((op, completion))
    }

    /// Track a write the backend already accepted. If tracking is refused
    /// the write is in flight unobserved, so the object is invalidated.
    fn register(
        &self,
        object: &mut StorageObject,
        handle: CompletionHandle,
        op: WriteOp,
    ) -> StoreResult<()> {
        object.register_pending_op(handle, op).inspect_err(|e| {
            warn!(owner = %self.owner, oid = %self.oid, %handle, error = %e, "untracked write");
            object.mark_valid(false);
        })
    }

    /// Submit a write of the object's current state and register its
    /// completion handle on the object.
    ///
    /// The caller must resolve the handle once the returned token reports,
    /// and call [`StorageObject::confirm_write`] with the resolved op on
    /// success.
    pub fn submit(
        &self,
        object: &mut StorageObject,
        kind: WriteKind,
        config: &StoreConfig,
    ) -> StoreResult<Completion> {
        let (op, completion) = self.issue(object, kind, config)?;
        self.register(object, completion.handle(), op)?;
        Ok(completion)
    }

    /// Submit a write and wait for it, resolving the tracking entry on every
    /// path.
    ///
    /// On success the write is confirmed on the object, so after a payload
    /// write `size` matches what the backend holds. On failure the object is
    /// marked invalid and the backend error is returned.
    pub async fn write(
        &self,
        object: &mut StorageObject,
        kind: WriteKind,
        config: &StoreConfig,
    ) -> StoreResult<u64> {
        let (op, completion) = self.issue(object, kind, config)?;
        let handle = completion.handle();
        self.register(object, handle, op)?;
        let guard = PendingOpGuard::new(object, handle);
        match completion.wait().await {
            Ok(written) => {
                let op = guard.complete()?;
                object.confirm_write(&op, written);
                Ok(written)
            }
            Err(e) => {
                warn!(owner = %self.owner, oid = %self.oid, %kind, error = %e, "write failed");
                guard.fail()?;
                Err(e)
            }
        }
    }

    /// Push the object's extended metadata to the backend.
    pub fn store_extended(&self, object: &StorageObject) -> StoreResult<()> {
        self.connection
            .set_extended(&self.owner, &self.oid, object.extended_entries())
    }

    /// Merge the backend's extended entries into the object. Backend values
    /// win over local ones for the same key.
    pub fn load_extended(&self, object: &mut StorageObject) -> StoreResult<()> {
        let entries = self.connection.get_extended(&self.owner, &self.oid)?;
        for (key, value) in entries {
            object.add_extended_metadata(Metadata::new(key, value));
        }
        Ok(())
    }

    /// Materialize the addressed object from the backend.
    ///
    /// Returns `Ok(None)` if it does not exist. The result is valid, not an
    /// index reference, and its size equals the stored payload length.
    pub fn load(&self) -> StoreResult<Option<StorageObject>> {
        let Some(stored) = self.connection.read(&self.owner, &self.oid)? else {
            return Ok(None);
        };
        let mut object = StorageObject::with_identifier(self.oid.clone());
        object.set_payload(stored.data);
        object.sync_size();
        object.mark_durable();
        object.set_save_date(stored.saved_at);
        for (key, value) in stored.attrs {
            object.add_metadata(Metadata::new(key, value));
        }
        for (key, value) in stored.extended {
            object.add_extended_metadata(Metadata::new(key, value));
        }
        let guid = object
            .metadata_str(MetadataKey::Guid.as_str())
            .and_then(|hex| Guid::from_hex(hex).ok());
        if let Some(guid) = guid {
            object.set_guid(guid)?;
        }
        Ok(Some(object))
    }

    /// Delete the addressed object. Refused while the object has writes
    /// outstanding. Returns `true` if the object existed.
    pub fn remove(&self, object: &StorageObject) -> StoreResult<bool> {
        object.ensure_idle()?;
        let removed = self.connection.remove(&self.owner, &self.oid)?;
        debug!(owner = %self.owner, oid = %self.oid, removed, "removed object");
        Ok(removed)
    }
}

impl<B: MailBackend> Clone for StorageContext<B> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            owner: self.owner.clone(),
            oid: self.oid.clone(),
        }
    }
}

impl<B: MailBackend> fmt::Debug for StorageContext<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageContext")
            .field("owner", &self.owner)
            .field("oid", &self.oid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use crate::traits::StoredMail;
    use std::collections::BTreeMap;

    /// Backend that hands out the same handle for every write.
    struct FixedHandleBackend;

    impl MailBackend for FixedHandleBackend {
        fn aio_write(&self, _namespace: &str, op: &WriteOp) -> StoreResult<Completion> {
            let (tx, completion) = Completion::channel(CompletionHandle::from_raw(7));
            tx.complete(Ok(op.len()));
            Ok(completion)
        }

        fn read(&self, _namespace: &str, _oid: &str) -> StoreResult<Option<StoredMail>> {
            Ok(None)
        }

        fn set_extended(
            &self,
            _namespace: &str,
            _oid: &str,
            _entries: &BTreeMap<String, Vec<u8>>,
        ) -> StoreResult<()> {
            Ok(())
        }

        fn get_extended(
            &self,
            _namespace: &str,
            _oid: &str,
        ) -> StoreResult<BTreeMap<String, Vec<u8>>> {
            Ok(BTreeMap::new())
        }

        fn remove(&self, _namespace: &str, _oid: &str) -> StoreResult<bool> {
            Ok(false)
        }
    }

    fn ctx(owner: &str, oid: &str) -> StorageContext<InMemoryBackend> {
        StorageContext::new(Arc::new(InMemoryBackend::new()), owner, oid)
    }

    fn mail(body: &[u8]) -> StorageObject {
        let mut obj = StorageObject::new();
        obj.set_payload(body.to_vec());
        obj.sync_size();
        obj
    }

    #[test]
    fn accessors_return_construction_values() {
        let c = ctx("alice", "msg-42");
        assert_eq!(c.owner(), "alice");
        assert_eq!(c.identifier(), "msg-42");
    }

    #[test]
    fn for_object_shares_connection() {
        let c = ctx("alice", "msg-42");
        let other = c.for_object("msg-43");
        assert_eq!(other.identifier(), "msg-43");
        assert_eq!(other.owner(), "alice");
        assert_eq!(c.identifier(), "msg-42");
        assert!(Arc::ptr_eq(c.connection(), other.connection()));
        assert_eq!(Arc::strong_count(c.connection()), 2);
    }

    #[test]
    fn default_owner_comes_from_config() {
        let config = StoreConfig {
            default_owner: "bob".into(),
            ..StoreConfig::default()
        };
        let c = StorageContext::with_default_owner(Arc::new(InMemoryBackend::new()), &config, "m9");
        assert_eq!(c.owner(), "bob");
        assert_eq!(c.identifier(), "m9");
    }

    #[test]
    fn placeholder_is_index_ref() {
        let obj = ctx("alice", "m1").placeholder();
        assert!(obj.is_index_ref());
        assert_eq!(obj.identifier(), "m1");
        assert!(obj.payload().is_empty());
    }

    #[tokio::test]
    async fn submit_registers_and_caller_resolves() {
        let c = ctx("alice", "m1");
        let mut obj = mail(b"hello");
        let completion = c
            .submit(&mut obj, WriteKind::WriteFull, &StoreConfig::default())
            .unwrap();
        assert_eq!(obj.identifier(), "m1");
        assert!(obj.has_pending_op());
        assert!(obj.pending_ops().contains(completion.handle()));

        let handle = completion.handle();
        assert_eq!(completion.wait().await.unwrap(), 5);
        obj.resolve_pending_op(handle).unwrap();
        assert!(!obj.has_pending_op());
    }

    #[tokio::test]
    async fn submit_rejects_other_address() {
        let c = ctx("alice", "m1");
        let mut obj = StorageObject::with_identifier("m2");
        let err = c
            .submit(&mut obj, WriteKind::WriteFull, &StoreConfig::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::AddressMismatch { .. }));
        assert!(!obj.has_pending_op());
    }

    #[tokio::test]
    async fn write_then_load_roundtrip() {
        let c = ctx("alice", "m1");
        let guid = Guid::generate();
        let mut obj = mail(b"Subject: hi\r\n\r\nbody");
        obj.set_guid(guid).unwrap();
        obj.add_metadata(Metadata::from_text(MetadataKey::Guid, &guid.to_hex()));
        obj.add_metadata(Metadata::from_u64(MetadataKey::MailUid, 17));

        let written = c
            .write(&mut obj, WriteKind::WriteFull, &StoreConfig::default())
            .await
            .unwrap();
        assert_eq!(written, obj.payload().len() as u64);
        assert_eq!(obj.size(), written);
        assert!(obj.is_valid());
        assert!(!obj.has_pending_op());

        let loaded = c.load().unwrap().expect("should exist");
        assert_eq!(loaded.payload(), obj.payload());
        assert_eq!(loaded.size(), written);
        assert_eq!(loaded.guid(), Some(guid));
        assert_eq!(loaded.metadata_str("U"), Some("17"));
        assert_eq!(loaded.metadata_str("I"), Some(rbox_types::XATTR_VERSION));
        assert!(loaded.save_date().is_some());
        assert!(loaded.is_valid());
        assert!(!loaded.is_index_ref());
    }

    #[tokio::test]
    async fn failed_write_invalidates_and_resolves() {
        let c = ctx("alice", "m1");
        let mut obj = mail(&[1u8; 100]);
        c.connection().fail_next_write();

        let err = c
            .write(&mut obj, WriteKind::WriteFull, &StoreConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend { .. }));
        assert!(!obj.is_valid());
        assert!(!obj.has_pending_op());
        assert_eq!(obj.payload().len(), 100);
        assert!(c.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_waits_for_pending_ops() {
        let c = ctx("alice", "m1");
        let mut obj = mail(b"x");
        let completion = c
            .submit(&mut obj, WriteKind::WriteFull, &StoreConfig::default())
            .unwrap();
        let err = c.remove(&obj).unwrap_err();
        assert!(matches!(err, StoreError::PendingOperations { .. }));

        let handle = completion.handle();
        completion.wait().await.unwrap();
        obj.resolve_pending_op(handle).unwrap();
        assert!(c.remove(&obj).unwrap());
        assert!(c.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_write_refused_while_pending() {
        let c = ctx("alice", "m1");
        let config = StoreConfig::default();
        let mut obj = mail(b"x");
        let completion = c.submit(&mut obj, WriteKind::WriteFull, &config).unwrap();

        let err = c.submit(&mut obj, WriteKind::Remove, &config).unwrap_err();
        assert!(matches!(err, StoreError::PendingOperations { count: 1, .. }));
        let err = c
            .write(&mut obj, WriteKind::Remove, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PendingOperations { .. }));
        assert!(c.connection().read("alice", "m1").unwrap().is_some());
        assert!(obj.is_valid());

        let handle = completion.handle();
        completion.wait().await.unwrap();
        obj.resolve_pending_op(handle).unwrap();
        c.write(&mut obj, WriteKind::Remove, &config).await.unwrap();
        assert!(c.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn streamed_append_matches_backend() {
        let c = ctx("alice", "m1");
        let config = StoreConfig::default();
        let mut obj = mail(b"ab");
        c.write(&mut obj, WriteKind::WriteFull, &config).await.unwrap();

        obj.payload_mut().extend_from_slice(b"cd");
        let written = c.write(&mut obj, WriteKind::Append, &config).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(obj.size(), 4);
        assert_eq!(obj.durable_len(), 4);
        assert!(obj.is_valid());

        let loaded = c.load().unwrap().expect("should exist");
        assert_eq!(loaded.payload(), b"abcd");
        assert_eq!(loaded.size(), obj.size());

        // A loaded object appends after what it read.
        let mut loaded = loaded;
        loaded.payload_mut().extend_from_slice(b"ef");
        c.write(&mut loaded, WriteKind::Append, &config).await.unwrap();
        assert_eq!(c.load().unwrap().unwrap().payload(), b"abcdef");
        assert_eq!(loaded.size(), 6);
    }

    #[tokio::test]
    async fn one_object_on_two_connections() {
        let first = ctx("alice", "m1");
        let second = ctx("alice", "m1");
        let config = StoreConfig::default();
        let mut obj = mail(b"body");

        let a = first.submit(&mut obj, WriteKind::WriteFull, &config).unwrap();
        let b = second.submit(&mut obj, WriteKind::WriteFull, &config).unwrap();
        assert_ne!(a.handle(), b.handle());
        assert_eq!(obj.pending_ops().len(), 2);
        assert!(obj.is_valid());

        for completion in [a, b] {
            let handle = completion.handle();
            completion.wait().await.unwrap();
            obj.resolve_pending_op(handle).unwrap();
        }
        assert!(!obj.has_pending_op());
    }

    #[tokio::test]
    async fn refused_registration_invalidates() {
        let c = StorageContext::new(Arc::new(FixedHandleBackend), "alice", "m1");
        let config = StoreConfig::default();
        let mut obj = mail(b"body");
        let first = c.submit(&mut obj, WriteKind::WriteFull, &config).unwrap();

        let err = c.submit(&mut obj, WriteKind::SetAttrs, &config).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateHandle(_)));
        assert!(!obj.is_valid());
        assert_eq!(obj.pending_ops().len(), 1);

        let err = c
            .write(&mut obj, WriteKind::SetAttrs, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateHandle(_)));

        obj.resolve_pending_op(first.handle()).unwrap();
    }

    #[test]
    fn extended_metadata_roundtrip() {
        let c = ctx("alice", "m1");
        let mut obj = StorageObject::with_identifier("m1");
        obj.add_extended_metadata(Metadata::from_text("K", "$Junk"));
        c.store_extended(&obj).unwrap();

        let mut fresh = c.placeholder();
        assert_eq!(fresh.extended_metadata("K"), b"");
        c.load_extended(&mut fresh).unwrap();
        assert_eq!(fresh.extended_metadata("K"), b"$Junk");
    }

    #[test]
    fn load_missing_object() {
        assert!(ctx("alice", "nothing").load().unwrap().is_none());
    }

    #[test]
    fn debug_omits_connection() {
        let c = ctx("alice", "m1");
        let text = format!("{c:?}");
        assert!(text.contains("alice"));
        assert!(text.contains(".."));
    }
}
