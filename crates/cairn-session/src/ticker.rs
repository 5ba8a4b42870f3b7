//! Retransmission ticker — the session's coarse resend timer.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::session::{Session, SessionError};

/// Poll the tracker on an interval and resend anything overdue.
///
/// The poll cadence bounds how late a retransmission can be; the per-entry
/// deadline itself lives in the tracker. A transport failure here is fatal
/// and the caller tears the session down.
pub async fn run_retransmit(
    session: Session,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), SessionError> {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("retransmit ticker shutting down");
                return Ok(());
            }

            _ = interval.tick() => {
                let resent = session.flush_due().await?;
                if resent > 0 {
                    tracing::info!(resent, "retransmitted unacknowledged records");
                }
            }
        }
    }
}
