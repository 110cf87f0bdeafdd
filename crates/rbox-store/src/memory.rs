use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use tracing::debug;

use crate::completion::{Completion, WriteOutcome};
use crate::error::{StoreError, StoreResult};
use crate::pending::{CompletionHandle, WriteKind, WriteOp};
use crate::traits::{MailBackend, StoredMail};

type Key = (String, String);

/// In-memory, HashMap-based mail backend.
///
/// Intended for tests and embedding. Objects are held behind a `RwLock` and
/// keyed by `(namespace, oid)`. Writes are applied on submission and their
/// completion is reported immediately, so a caller awaiting the token never
/// actually suspends.
pub struct InMemoryBackend {
    objects: RwLock<HashMap<Key, StoredMail>>,
    fail_next: AtomicBool,
}

impl InMemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Make the next submitted write complete with a backend error without
    /// being applied.
    pub fn fail_next_write(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of objects across all namespaces.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no object is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    fn key(namespace: &str, oid: &str) -> Key {
        (namespace.to_string(), oid.to_string())
    }

    fn apply(&self, namespace: &str, op: &WriteOp) -> WriteOutcome {
        let not_found = || StoreError::Backend {
            oid: op.oid.clone(),
            reason: "no such object".into(),
        };
        let key = Self::key(namespace, &op.oid);
        let mut map = self.objects.write().expect("lock poisoned");
        match op.kind {
            WriteKind::WriteFull => {
                let mail = map.entry(key).or_insert_with(empty_mail);
                mail.data = op.data.clone();
                mail.attrs.extend(op.attrs.iter().cloned());
                mail.saved_at = Utc::now();
                Ok(op.len())
            }
            WriteKind::Append => {
                let mail = map.entry(key).or_insert_with(empty_mail);
                mail.data.extend_from_slice(&op.data);
                mail.saved_at = Utc::now();
                Ok(op.len())
            }
            WriteKind::SetAttrs => {
                let mail = map.get_mut(&key).ok_or_else(not_found)?;
                mail.attrs.extend(op.attrs.iter().cloned());
                Ok(0)
            }
            WriteKind::SetExtended => {
                let mail = map.entry(key).or_insert_with(empty_mail);
                mail.extended.extend(op.attrs.iter().cloned());
                Ok(0)
            }
            WriteKind::Remove => map.remove(&key).map(|_| 0).ok_or_else(not_found),
        }
    }
}

fn empty_mail() -> StoredMail {
    StoredMail {
        data: Vec::new(),
        attrs: BTreeMap::new(),
        extended: BTreeMap::new(),
        saved_at: Utc::now(),
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MailBackend for InMemoryBackend {
    fn aio_write(&self, namespace: &str, op: &WriteOp) -> StoreResult<Completion> {
        let (tx, completion) = Completion::channel(CompletionHandle::allocate());
        let outcome = if self.fail_next.swap(false, Ordering::SeqCst) {
            Err(StoreError::Backend {
                oid: op.oid.clone(),
                reason: "injected write failure".into(),
            })
        } else {
            self.apply(namespace, op)
        };
        debug!(
            namespace,
            oid = %op.oid,
            kind = %op.kind,
            handle = %tx.handle(),
            ok = outcome.is_ok(),
            "aio write"
        );
        tx.complete(outcome);
        Ok(completion)
    }

    fn read(&self, namespace: &str, oid: &str) -> StoreResult<Option<StoredMail>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(&Self::key(namespace, oid)).cloned())
    }

    fn set_extended(
        &self,
        namespace: &str,
        oid: &str,
        entries: &BTreeMap<String, Vec<u8>>,
    ) -> StoreResult<()> {
        let mut map = self.objects.write().expect("lock poisoned");
        let mail = map
            .entry(Self::key(namespace, oid))
            .or_insert_with(empty_mail);
        mail.extended
            .extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn get_extended(&self, namespace: &str, oid: &str) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map
            .get(&Self::key(namespace, oid))
            .map(|mail| mail.extended.clone())
            .unwrap_or_default())
    }

    fn remove(&self, namespace: &str, oid: &str) -> StoreResult<bool> {
        let mut map = self.objects.write().expect("lock poisoned");
        Ok(map.remove(&Self::key(namespace, oid)).is_some())
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len();
        f.debug_struct("InMemoryBackend")
            .field("object_count", &count)
            .finish()
    }
}
