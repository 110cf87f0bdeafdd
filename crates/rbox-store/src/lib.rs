//! Mail object bookkeeping for rbox.
//!
//! This crate models one stored mail object together with the state needed
//! to track asynchronous writes against it. The backend itself (network
//! protocol, placement, replication, retries) lives behind the
//! [`MailBackend`] trait and is not implemented here beyond an in-memory
//! reference backend.
//!
//! # Core Types
//!
//! - [`StorageObject`] -- payload, inline and extended metadata, GUID,
//!   validity flags and the table of pending writes
//! - [`StorageContext`] -- connection + owner + object id addressing triple
//! - [`PendingOps`] / [`PendingOpGuard`] -- write tracking keyed by
//!   [`CompletionHandle`]
//! - [`Completion`] -- caller-side token to await or poll a write
//!
//! # Usage Rules
//!
//! 1. Every registered handle is resolved exactly once, success or failure.
//!    [`StorageObject::track`] returns a guard that does this on drop.
//! 2. An object with pending writes is not deleted and not renamed.
//! 3. A failed write marks the object invalid; the flag is sticky.
//! 4. The object has no internal locking. Mutation needs `&mut`, so there
//!    is a single writer at a time.
//! 5. Completion order across writes is whatever the backend delivers.

pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod object;
pub mod pending;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use completion::{Completion, CompletionSender, WriteOutcome};
pub use config::StoreConfig;
pub use context::StorageContext;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryBackend;
pub use object::StorageObject;
pub use pending::{CompletionHandle, PendingOpGuard, PendingOps, WriteKind, WriteOp};
pub use traits::{MailBackend, StoredMail};
