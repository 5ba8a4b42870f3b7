//! Receive path — one managed task per connection.
//!
//! Reads frames, opens them with the inbound sequence counter, and
//! dispatches: acks drain the retransmission tracker, messages go to the
//! application over a channel (and, on a responder, are acked back),
//! unknown types are logged and skipped. A decode failure ends the
//! session — sequence-derived nonces cannot resynchronize past it.

use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{broadcast, mpsc};

use cairn_core::record::{self, RecordBody};

use crate::framing;
use crate::session::{Role, Session, SessionError};

/// A message delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Sequence the peer assigned to this message.
    pub seq: u64,
    pub text: String,
}

pub struct ReceiveLoop {
    reader: OwnedReadHalf,
    session: Session,
    role: Role,
    next_seq: u64,
    deliveries: mpsc::UnboundedSender<Delivery>,
    shutdown: broadcast::Receiver<()>,
}

impl ReceiveLoop {
    pub fn new(
        reader: OwnedReadHalf,
        session: Session,
        role: Role,
        deliveries: mpsc::UnboundedSender<Delivery>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            reader,
            session,
            role,
            next_seq: 1,
            deliveries,
            shutdown,
        }
    }

    /// Run until the peer closes, shutdown is signaled, or a fatal
    /// decode/transport error ends the session.
    pub async fn run(mut self) -> Result<(), SessionError> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!("receive loop shutting down");
                    return Ok(());
                }

                frame = framing::read_frame(&mut self.reader) => {
                    let cipher = match frame? {
                        Some(c) => c,
                        None => {
                            tracing::info!("peer closed the connection");
                            return Ok(());
                        }
                    };
                    self.handle_frame(&cipher).await?;
                }
            }
        }
    }

    async fn handle_frame(&mut self, cipher: &[u8]) -> Result<(), SessionError> {
        let rec = match record::open(self.next_seq, self.session.key(), cipher) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    expected_seq = self.next_seq,
                    "record decode failed, closing session"
                );
                return Err(e.into());
            }
        };
        self.next_seq += 1;

        match rec.body {
            RecordBody::Ack { ack } => {
                if self.session.acknowledge(ack).await {
                    tracing::debug!(ack, "record acknowledged");
                } else {
                    tracing::debug!(ack, "duplicate or late ack ignored");
                }
            }

            RecordBody::Msg { text } => {
                // A dropped receiver means the application is going away;
                // the shutdown signal arrives separately.
                let _ = self.deliveries.send(Delivery { seq: rec.seq, text });
                if self.role.acknowledges_messages() {
                    self.session.send_ack(rec.seq).await?;
                }
            }

            RecordBody::Unknown { rtype } => {
                tracing::warn!(rtype = %rtype, seq = rec.seq, "unknown record type ignored");
            }
        }

        Ok(())
    }
}
