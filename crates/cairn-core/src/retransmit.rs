//! Retransmission tracking — unacknowledged outbound records and their
//! resend deadlines.
//!
//! One queue per session direction. The queue is pure state: callers wrap
//! it in a single mutex and hold that lock only for the duration of each
//! operation, never across transport I/O.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Default time an entry may wait for an ack before it is due for resend.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// An outbound record awaiting acknowledgment.
///
/// The ciphertext is retransmitted verbatim — same bytes, same sequence —
/// so the receiver's nonce derivation still matches.
#[derive(Debug, Clone)]
struct Pending {
    cipher: Bytes,
    last_sent: Instant,
}

/// Tracks in-flight records for the sending side of one session.
#[derive(Debug)]
pub struct RetransmitQueue {
    pending: HashMap<u64, Pending>,
    timeout: Duration,
}

impl Default for RetransmitQueue {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl RetransmitQueue {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    /// Record a just-sent ciphertext. Re-registering a sequence overwrites
    /// the previous entry and refreshes its timestamp.
    pub fn register(&mut self, seq: u64, cipher: Bytes) {
        self.pending.insert(
            seq,
            Pending {
                cipher,
                last_sent: Instant::now(),
            },
        );
    }

    /// Drop the entry for an acknowledged sequence.
    ///
    /// Returns whether an entry was present; duplicate or late acks find
    /// nothing and are not an error.
    pub fn acknowledge(&mut self, seq: u64) -> bool {
        self.pending.remove(&seq).is_some()
    }

    /// Entries whose ack deadline has passed, sorted by sequence.
    ///
    /// Each returned entry's timestamp resets to now, so repeated polls
    /// only surface it again after another full timeout.
    pub fn collect_due(&mut self) -> Vec<(u64, Bytes)> {
        let now = Instant::now();
        let mut due: Vec<(u64, Bytes)> = Vec::new();
        for (&seq, entry) in self.pending.iter_mut() {
            if now.duration_since(entry.last_sent) > self.timeout {
                due.push((seq, entry.cipher.clone()));
                entry.last_sent = now;
            }
        }
        due.sort_unstable_by_key(|(seq, _)| *seq);
        due
    }

    /// Count of records still awaiting an ack.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
