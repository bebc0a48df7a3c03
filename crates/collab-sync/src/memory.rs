//! In-memory set-union engine
//!
//! A document is the set of update buffers merged into it; serialization is a
//! length-prefixed concatenation in sorted order. Set union is trivially
//! commutative, idempotent and associative, which makes this engine the
//! reference implementation for core tests and wire-level demos.

use std::collections::BTreeSet;

use crate::{MergeError, SyncEngine};

/// Deterministic engine backed by a set of update buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetEngine;

impl SetEngine {
    pub fn new() -> Self {
        Self
    }
}

impl SyncEngine for SetEngine {
    type Doc = BTreeSet<Vec<u8>>;

    fn empty_document(&self) -> Self::Doc {
        BTreeSet::new()
    }

    fn merge(&self, doc: &mut Self::Doc, update: &[u8]) -> Result<(), MergeError> {
        if update.is_empty() {
            return Err(MergeError::new("empty update buffer"));
        }
        doc.insert(update.to_vec());
        Ok(())
    }

    fn serialize(&self, doc: &Self::Doc) -> Vec<u8> {
        let mut out = Vec::new();
        for update in doc {
            out.extend_from_slice(&(update.len() as u32).to_le_bytes());
            out.extend_from_slice(update);
        }
        out
    }
}
