//! # Collab Pad Sync Engine
//!
//! The boundary between the realtime core and whatever CRDT actually merges
//! document changes. The core never looks inside an update buffer; it only
//! needs three operations, and it relies on merge being commutative,
//! idempotent and associative per the engine's contract.

pub mod memory;
pub mod yjs;

use thiserror::Error;

pub use memory::SetEngine;
pub use yjs::YrsEngine;

/// An update buffer could not be applied to a document.
///
/// This is always a property of the buffer, never of the room: a rejected
/// update is dropped and the document is left untouched.
#[derive(Debug, Clone, Error)]
#[error("malformed update: {reason}")]
pub struct MergeError {
    reason: String,
}

impl MergeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Conflict-free document merge engine.
///
/// Implementations own the document representation and the update encoding;
/// callers treat both as opaque.
pub trait SyncEngine: Send + Sync + 'static {
    /// Authoritative document state for one room.
    type Doc: Send + 'static;

    /// A fresh document with no content.
    fn empty_document(&self) -> Self::Doc;

    /// Merge an incremental update buffer into the document.
    ///
    /// Must leave the document unchanged on error.
    fn merge(&self, doc: &mut Self::Doc, update: &[u8]) -> Result<(), MergeError>;

    /// Serialize the full document state as a buffer a fresh peer can
    /// initialize from.
    fn serialize(&self, doc: &Self::Doc) -> Vec<u8>;
}
