//! Foundation types for rbox mail objects.
//!
//! This crate provides the identity and metadata vocabulary shared by every
//! rbox crate. It performs no I/O.
//!
//! # Key Types
//!
//! - [`Guid`] -- Fixed 16-byte globally unique mail identifier
//! - [`MetadataKey`] -- Closed enumeration of well-known mail metadata keys
//! - [`Metadata`] -- A single key/value attribute destined for a metadata store

pub mod error;
pub mod guid;
pub mod metadata;

pub use error::TypeError;
pub use guid::{Guid, GUID_SIZE};
pub use metadata::{decode_time, decode_u64, Metadata, MetadataKey, XATTR_VERSION};
