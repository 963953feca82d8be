//! Reassembly of chunked binary payloads.

use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    #[error("message {message_id} declares zero chunks")]
    ZeroChunks { message_id: String },
    #[error("chunk {index} of message {message_id} is outside 0..{total}")]
    IndexOutOfRange {
        message_id: String,
        index: u32,
        total: u32,
    },
    #[error("message {message_id} declared {expected} chunks, chunk claims {actual}")]
    TotalMismatch {
        message_id: String,
        expected: u32,
        actual: u32,
    },
}

#[derive(Debug)]
struct Entry {
    total: u32,
    chunks: BTreeMap<u32, Bytes>,
}

/// Collects indexed chunks per message id and yields the joined payload once
/// every index `0..total` has been seen.
///
/// Chunks may arrive in any order; the result is always in index order and the
/// entry is dropped on completion, so a message id is delivered at most once
/// per set of chunks.
#[derive(Debug, Default)]
pub struct Reassembler {
    entries: HashMap<String, Entry>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one chunk. Returns the full payload when this chunk completes it.
    pub fn ingest(
        &mut self,
        message_id: &str,
        chunk_index: u32,
        total_chunks: u32,
        bytes: Bytes,
    ) -> Result<Option<Bytes>, ReassemblyError> {
        if total_chunks == 0 {
            return Err(ReassemblyError::ZeroChunks {
                message_id: message_id.to_string(),
            });
        }
        if chunk_index >= total_chunks {
            return Err(ReassemblyError::IndexOutOfRange {
                message_id: message_id.to_string(),
                index: chunk_index,
                total: total_chunks,
            });
        }
        if let Some(entry) = self.entries.get(message_id) {
            if entry.total != total_chunks {
                return Err(ReassemblyError::TotalMismatch {
                    message_id: message_id.to_string(),
                    expected: entry.total,
                    actual: total_chunks,
                });
            }
        }

        let entry = self
            .entries
            .entry(message_id.to_string())
            .or_insert_with(|| Entry {
                total: total_chunks,
                chunks: BTreeMap::new(),
            });
        entry.chunks.insert(chunk_index, bytes);

        if entry.chunks.len() < entry.total as usize {
            return Ok(None);
        }

        let Some(entry) = self.entries.remove(message_id) else {
            return Ok(None);
        };
        let size = entry.chunks.values().map(Bytes::len).sum();
        let mut payload = BytesMut::with_capacity(size);
        for chunk in entry.chunks.into_values() {
            payload.extend_from_slice(&chunk);
        }
        Ok(Some(payload.freeze()))
    }

    /// Number of messages with chunks still outstanding.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Drop every partial message.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(data: &'static [u8]) -> Bytes {
        Bytes::from_static(data)
    }

    #[test]
    fn test_out_of_order_chunks_join_in_index_order() {
        let mut reassembler = Reassembler::new();

        let first = reassembler.ingest("m1", 1, 2, chunk(b"world")).unwrap();
        assert!(first.is_none());
        assert_eq!(reassembler.pending(), 1);

        let done = reassembler.ingest("m1", 0, 2, chunk(b"hello ")).unwrap();
        assert_eq!(done, Some(chunk(b"hello world")));
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_every_permutation_yields_same_payload() {
        let parts: [&'static [u8]; 3] = [b"a", b"bb", b"ccc"];
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut reassembler = Reassembler::new();
            let mut result = None;
            for index in order {
                result = reassembler
                    .ingest("m", index, 3, chunk(parts[index as usize]))
                    .unwrap();
            }
            assert_eq!(result, Some(chunk(b"abbccc")), "order {order:?}");
            assert_eq!(reassembler.pending(), 0);
        }
    }

    #[test]
    fn test_single_chunk_message() {
        let mut reassembler = Reassembler::new();
        let done = reassembler.ingest("solo", 0, 1, chunk(b"x")).unwrap();
        assert_eq!(done, Some(chunk(b"x")));
    }

    #[test]
    fn test_interleaved_messages_stay_separate() {
        let mut reassembler = Reassembler::new();
        assert!(reassembler.ingest("a", 0, 2, chunk(b"a0")).unwrap().is_none());
        assert!(reassembler.ingest("b", 1, 2, chunk(b"b1")).unwrap().is_none());
        assert_eq!(
            reassembler.ingest("a", 1, 2, chunk(b"a1")).unwrap(),
            Some(chunk(b"a0a1"))
        );
        assert_eq!(reassembler.pending(), 1);
    }

    #[test]
    fn test_duplicate_index_does_not_complete_early() {
        let mut reassembler = Reassembler::new();
        assert!(reassembler.ingest("m", 0, 2, chunk(b"old")).unwrap().is_none());
        assert!(reassembler.ingest("m", 0, 2, chunk(b"new")).unwrap().is_none());
        assert_eq!(
            reassembler.ingest("m", 1, 2, chunk(b"!")).unwrap(),
            Some(chunk(b"new!"))
        );
    }

    #[test]
    fn test_invalid_chunks_are_rejected() {
        let mut reassembler = Reassembler::new();
        assert!(matches!(
            reassembler.ingest("m", 0, 0, chunk(b"")),
            Err(ReassemblyError::ZeroChunks { .. })
        ));
        assert!(matches!(
            reassembler.ingest("m", 2, 2, chunk(b"")),
            Err(ReassemblyError::IndexOutOfRange { index: 2, total: 2, .. })
        ));

        reassembler.ingest("m", 0, 3, chunk(b"x")).unwrap();
        assert_eq!(
            reassembler.ingest("m", 1, 4, chunk(b"y")),
            Err(ReassemblyError::TotalMismatch {
                message_id: "m".to_string(),
                expected: 3,
                actual: 4,
            })
        );
        assert_eq!(reassembler.pending(), 1);
    }

    #[test]
    fn test_clear_drops_partial_entries() {
        let mut reassembler = Reassembler::new();
        reassembler.ingest("m", 0, 2, chunk(b"x")).unwrap();
        reassembler.clear();
        assert_eq!(reassembler.pending(), 0);
        // A fresh set of chunks starts over.
        assert!(reassembler.ingest("m", 1, 2, chunk(b"y")).unwrap().is_none());
    }
}
