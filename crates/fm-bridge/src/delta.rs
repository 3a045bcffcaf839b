use dashmap::{DashMap, DashSet};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    /// A chunk arrived past the end of the accumulated text.
    #[error("gap in message {message_id}: expected offset {expected}, got {got}")]
    Gap {
        message_id: String,
        expected: usize,
        got: usize,
    },
}

// ---------------------------------------------------------------------------
// DeltaTracker
// ---------------------------------------------------------------------------

/// Offset-addressed accumulation of in-flight messages for one session.
///
/// The server keeps one tracker per session and replays buffered-so-far
/// content on reconnect, so a client resumes without loss; clients use
/// the same structure to assemble what they receive. A finalised
/// `message_id` is remembered so the terminal chunk is observed at most
/// once and late duplicates are dropped.
#[derive(Default)]
pub struct DeltaTracker {
    in_flight: DashMap<String, String>,
    finalized: DashSet<String>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one chunk. Exact duplicates and already-covered overlaps
    /// are dropped; a chunk starting past the accumulated end is a gap.
    pub fn ingest(&self, message_id: &str, text: &str, offset: usize) -> Result<(), DeltaError> {
        if self.finalized.contains(message_id) {
            // Late replay of a finished message.
            return Ok(());
        }
        let mut entry = self.in_flight.entry(message_id.to_string()).or_default();
        let len = entry.len();
        if offset == len {
            entry.push_str(text);
        } else if offset + text.len() <= len {
            // Duplicate delivery (e.g. reconnect replay); already applied.
        } else if offset < len {
            // Overlapping chunk; append only the unseen tail.
            entry.push_str(&text[len - offset..]);
        } else {
            return Err(DeltaError::Gap {
                message_id: message_id.to_string(),
                expected: len,
                got: offset,
            });
        }
        Ok(())
    }

    /// Finalise a message and return its full text exactly once; later
    /// calls observe `None`.
    pub fn finalize(&self, message_id: &str) -> Option<String> {
        if !self.finalized.insert(message_id.to_string()) {
            return None;
        }
        self.in_flight
            .remove(message_id)
            .map(|(_, text)| text)
            .or(Some(String::new()))
    }

    /// Accumulated text of a still-in-flight message.
    pub fn buffered(&self, message_id: &str) -> Option<String> {
        self.in_flight.get(message_id).map(|t| t.value().clone())
    }

    /// Snapshot of every in-flight message for reconnect replay.
    pub fn replay(&self) -> Vec<(String, String)> {
        let mut items: Vec<(String, String)> = self
            .in_flight
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items
    }

    pub fn is_finalized(&self, message_id: &str) -> bool {
        self.finalized.contains(message_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_in_order_reproduce_the_message() {
        let tracker = DeltaTracker::new();
        tracker.ingest("m1", "hel", 0).unwrap();
        tracker.ingest("m1", "lo ", 3).unwrap();
        tracker.ingest("m1", "world", 6).unwrap();
        assert_eq!(tracker.finalize("m1").unwrap(), "hello world");
    }

    #[test]
    fn gap_is_rejected() {
        let tracker = DeltaTracker::new();
        tracker.ingest("m1", "abc", 0).unwrap();
        let err = tracker.ingest("m1", "xyz", 10).unwrap_err();
        match err {
            DeltaError::Gap { expected, got, .. } => {
                assert_eq!(expected, 3);
                assert_eq!(got, 10);
            }
        }
        // The accumulated prefix survives the rejected chunk.
        assert_eq!(tracker.buffered("m1").unwrap(), "abc");
    }

    #[test]
    fn duplicate_chunks_are_dropped() {
        let tracker = DeltaTracker::new();
        tracker.ingest("m1", "abc", 0).unwrap();
        tracker.ingest("m1", "def", 3).unwrap();
        // Replayed chunk after a reconnect.
        tracker.ingest("m1", "abc", 0).unwrap();
        tracker.ingest("m1", "def", 3).unwrap();
        assert_eq!(tracker.finalize("m1").unwrap(), "abcdef");
    }

    #[test]
    fn overlap_appends_only_the_tail() {
        let tracker = DeltaTracker::new();
        tracker.ingest("m1", "abcd", 0).unwrap();
        tracker.ingest("m1", "cdef", 2).unwrap();
        assert_eq!(tracker.buffered("m1").unwrap(), "abcdef");
    }

    #[test]
    fn finalize_is_at_most_once() {
        let tracker = DeltaTracker::new();
        tracker.ingest("m1", "done", 0).unwrap();
        assert_eq!(tracker.finalize("m1").unwrap(), "done");
        assert!(tracker.finalize("m1").is_none());
        assert!(tracker.is_finalized("m1"));
    }

    #[test]
    fn chunks_after_finalize_are_ignored() {
        let tracker = DeltaTracker::new();
        tracker.ingest("m1", "done", 0).unwrap();
        tracker.finalize("m1");
        tracker.ingest("m1", "late", 4).unwrap();
        assert!(tracker.buffered("m1").is_none());
    }

    #[test]
    fn replay_covers_all_in_flight_messages() {
        let tracker = DeltaTracker::new();
        tracker.ingest("a", "first", 0).unwrap();
        tracker.ingest("b", "second", 0).unwrap();
        tracker.ingest("c", "closed", 0).unwrap();
        tracker.finalize("c");

        let replay = tracker.replay();
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0], ("a".to_string(), "first".to_string()));
        assert_eq!(replay[1], ("b".to_string(), "second".to_string()));
    }

    #[test]
    fn reconnect_replay_then_live_tail_assembles_once() {
        // Server side: accumulate, client disconnects mid-message.
        let server = DeltaTracker::new();
        server.ingest("m1", "the quick ", 0).unwrap();
        server.ingest("m1", "brown ", 10).unwrap();

        // Client reconnects: replay buffered-so-far, then live chunks.
        let client = DeltaTracker::new();
        for (id, text) in server.replay() {
            client.ingest(&id, &text, 0).unwrap();
        }
        server.ingest("m1", "fox", 16).unwrap();
        client.ingest("m1", "fox", 16).unwrap();

        assert_eq!(client.finalize("m1").unwrap(), "the quick brown fox");
    }

    #[test]
    fn interleaved_messages_are_independent() {
        let tracker = DeltaTracker::new();
        tracker.ingest("m1", "aaa", 0).unwrap();
        tracker.ingest("m2", "bbb", 0).unwrap();
        tracker.ingest("m1", "ccc", 3).unwrap();
        assert_eq!(tracker.finalize("m1").unwrap(), "aaaccc");
        assert_eq!(tracker.finalize("m2").unwrap(), "bbb");
    }
}
