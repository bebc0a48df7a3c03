//! Yjs-compatible engine backed by the `yrs` crate
//!
//! Update buffers use the Yjs v1 update encoding, so browser clients running
//! `Y.encodeStateAsUpdate` / `Y.applyUpdate` interoperate with this engine
//! unchanged. A snapshot is the full state encoded as an update against the
//! empty state vector, which a fresh peer applies like any other update.

use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::{MergeError, SyncEngine};

/// Production engine over the `yrs` CRDT.
#[derive(Debug, Clone, Copy, Default)]
pub struct YrsEngine;

impl YrsEngine {
    pub fn new() -> Self {
        Self
    }
}

impl SyncEngine for YrsEngine {
    type Doc = Doc;

    fn empty_document(&self) -> Self::Doc {
        Doc::new()
    }

    fn merge(&self, doc: &mut Self::Doc, update: &[u8]) -> Result<(), MergeError> {
        // Decoding validates the buffer; nothing is applied on failure.
        let update = Update::decode_v1(update).map_err(|e| MergeError::new(e.to_string()))?;
        doc.transact_mut().apply_update(update);
        Ok(())
    }

    fn serialize(&self, doc: &Self::Doc) -> Vec<u8> {
        doc.transact()
            .encode_state_as_update_v1(&StateVector::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::{GetString, Text};

    fn content(doc: &Doc) -> String {
        let text = doc.get_or_insert_text("content");
        text.get_string(&doc.transact())
    }

    fn update_inserting(at: u32, chunk: &str, base: &[u8]) -> Vec<u8> {
        let engine = YrsEngine::new();
        let mut doc = engine.empty_document();
        engine.merge(&mut doc, base).unwrap();
        let before = doc.transact().state_vector();

        let text = doc.get_or_insert_text("content");
        text.insert(&mut doc.transact_mut(), at, chunk);

        doc.transact().encode_state_as_update_v1(&before)
    }

    #[test]
    fn merge_converges_in_either_order() {
        let engine = YrsEngine::new();

        let mut base = engine.empty_document();
        let seed = update_inserting(0, "hello", &engine.serialize(&base));
        engine.merge(&mut base, &seed).unwrap();
        let base_state = engine.serialize(&base);

        // Two independent edits against the same base.
        let u1 = update_inserting(5, " world", &base_state);
        let u2 = update_inserting(0, ">> ", &base_state);

        let mut first = engine.empty_document();
        engine.merge(&mut first, &base_state).unwrap();
        engine.merge(&mut first, &u1).unwrap();
        engine.merge(&mut first, &u2).unwrap();

        let mut second = engine.empty_document();
        engine.merge(&mut second, &base_state).unwrap();
        engine.merge(&mut second, &u2).unwrap();
        engine.merge(&mut second, &u1).unwrap();

        assert_eq!(content(&first), content(&second));
        assert!(content(&first).contains("hello world"));
    }

    #[test]
    fn merge_is_idempotent() {
        let engine = YrsEngine::new();
        let mut doc = engine.empty_document();

        let update = update_inserting(0, "once", &engine.serialize(&doc));
        engine.merge(&mut doc, &update).unwrap();
        engine.merge(&mut doc, &update).unwrap();

        assert_eq!(content(&doc), "once");
    }

    #[test]
    fn malformed_update_is_rejected() {
        let engine = YrsEngine::new();
        let mut doc = engine.empty_document();

        let update = update_inserting(0, "kept", &engine.serialize(&doc));
        engine.merge(&mut doc, &update).unwrap();

        assert!(engine.merge(&mut doc, &[0xfe, 0xed, 0xfa]).is_err());
        assert_eq!(content(&doc), "kept");
    }

    #[test]
    fn snapshot_initializes_a_fresh_peer() {
        let engine = YrsEngine::new();
        let mut doc = engine.empty_document();

        let update = update_inserting(0, "shared state", &engine.serialize(&doc));
        engine.merge(&mut doc, &update).unwrap();

        let mut peer = engine.empty_document();
        engine.merge(&mut peer, &engine.serialize(&doc)).unwrap();
        assert_eq!(content(&peer), "shared state");
    }
}
