//! Per-connection session state — the session key, the retransmission
//! tracker, and the send half with its outbound sequence counter.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use cairn_core::record::{self, RecordBody, RecordError};
use cairn_core::retransmit::RetransmitQueue;
use cairn_core::SessionKey;

use crate::framing;

/// Which side of the connection this peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the connection.
    Initiator,
    /// Accepted the connection; acknowledges every incoming message.
    Responder,
}

impl Role {
    /// Responders echo an ack for each delivered message.
    pub fn acknowledges_messages(self) -> bool {
        matches!(self, Role::Responder)
    }
}

/// Write half plus the outbound sequence counter it owns.
///
/// Locked as a unit, and the lock is held across the socket write: counter
/// order must equal wire order or the receiver's nonce derivation breaks.
/// On a responder both the application send path and the ack-echoing
/// receive path go through this lock.
struct SendHalf {
    writer: OwnedWriteHalf,
    next_seq: u64,
}

/// Handle to one session. Clone freely — clones share the key, the
/// tracker, and the send half.
#[derive(Clone)]
pub struct Session {
    key: Arc<SessionKey>,
    tracker: Arc<Mutex<RetransmitQueue>>,
    send: Arc<Mutex<SendHalf>>,
}

impl Session {
    /// Build a session around the write half of an established connection.
    /// Sequence numbers for both directions start at 1.
    pub fn new(writer: OwnedWriteHalf, key: SessionKey, retransmit_timeout: Duration) -> Self {
        Self {
            key: Arc::new(key),
            tracker: Arc::new(Mutex::new(RetransmitQueue::new(retransmit_timeout))),
            send: Arc::new(Mutex::new(SendHalf {
                writer,
                next_seq: 1,
            })),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Seal and send an application message, registering the ciphertext
    /// for retransmission until the peer acknowledges it.
    /// Returns the sequence the record was sent under.
    pub async fn send_message(&self, text: &str) -> Result<u64, SessionError> {
        self.send_record(
            &RecordBody::Msg {
                text: text.to_owned(),
            },
            true,
        )
        .await
    }

    /// Acknowledge a received record.
    ///
    /// Acks are not themselves acknowledged or retransmitted, so they are
    /// never registered with the tracker.
    pub async fn send_ack(&self, acked: u64) -> Result<u64, SessionError> {
        self.send_record(&RecordBody::Ack { ack: acked }, false).await
    }

    async fn send_record(&self, body: &RecordBody, track: bool) -> Result<u64, SessionError> {
        let mut send = self.send.lock().await;
        let seq = send.next_seq;
        let cipher = Bytes::from(record::seal(seq, body, &self.key)?);
        tracing::trace!(
            seq,
            len = cipher.len(),
            prefix = %hex::encode(&cipher[..8.min(cipher.len())]),
            "sending record"
        );
        framing::write_frame(&mut send.writer, &cipher).await?;
        if track {
            self.tracker.lock().await.register(seq, cipher);
        }
        send.next_seq += 1;
        Ok(seq)
    }

    /// Retransmit every record whose ack deadline has passed, verbatim.
    /// The tracker lock is released before any socket I/O.
    pub async fn flush_due(&self) -> Result<usize, SessionError> {
        let due = self.tracker.lock().await.collect_due();
        if due.is_empty() {
            return Ok(0);
        }
        let mut send = self.send.lock().await;
        let count = due.len();
        for (seq, cipher) in due {
            tracing::debug!(seq, "retransmitting unacknowledged record");
            framing::write_frame(&mut send.writer, &cipher).await?;
        }
        Ok(count)
    }

    /// Drop a pending record after its ack arrives. Returns whether it was
    /// still pending; late or duplicate acks find nothing.
    pub async fn acknowledge(&self, seq: u64) -> bool {
        self.tracker.lock().await.acknowledge(seq)
    }

    /// Records still awaiting an ack.
    pub async fn pending_retransmits(&self) -> usize {
        self.tracker.lock().await.pending()
    }

    /// Shut down the write half. The peer's blocked read observes EOF and
    /// its receive loop ends; pending acks are not waited for.
    pub async fn close(&self) -> Result<(), SessionError> {
        let mut send = self.send.lock().await;
        send.writer.shutdown().await?;
        Ok(())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    /// I/O failure on the underlying stream. Fatal to the connection; the
    /// peer task is stopped by closing the shared transport.
    #[error("transport I/O failed: {0}")]
    Transport(#[from] std::io::Error),

    /// Record decode/encode failure. Fatal — see the codec docs.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// A frame length outside the protocol bound.
    #[error("frame of {len} bytes exceeds the {} byte limit", framing::MAX_FRAME_LEN)]
    FrameTooLarge { len: usize },
}
