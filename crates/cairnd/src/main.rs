//! cairnd — Cairn record-transport server.
//!
//! Accepts connections on the configured endpoint, runs one session per
//! client, acknowledges every message, and logs delivered text. Errors at
//! connection scope end only that session; the accept loop keeps going.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinError;

use cairn_core::config::CairnConfig;
use cairn_core::keys::{self, PLACEHOLDER_EXCHANGE_SECRET};
use cairn_core::SessionKey;
use cairn_session::{ticker, Delivery, ReceiveLoop, Role, Session, SessionError};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = CairnConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CairnConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CairnConfig::default()
    });

    // Key material problems are fatal at startup; there is nothing to
    // serve without the session key.
    let psk = keys::load_preshared_key(&config.key.preshared_path).with_context(|| {
        format!(
            "pre-shared key at {}",
            config.key.preshared_path.display()
        )
    })?;
    let key = keys::derive_session_key(&psk, &PLACEHOLDER_EXCHANGE_SECRET)?;
    tracing::info!(
        psk_path = %config.key.preshared_path.display(),
        psk_len = psk.len(),
        "session key derived"
    );

    let endpoint = config.network.endpoint();
    let listener = TcpListener::bind(&endpoint)
        .await
        .with_context(|| format!("failed to bind {endpoint}"))?;
    tracing::info!(%endpoint, "listening");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Accept loop ──────────────────────────────────────────────────────────
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("shutting down");
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                tracing::info!(%peer, "connection accepted");

                let key = key.clone();
                let timeout = config.transport.retransmit_timeout();
                let poll = config.transport.retransmit_poll();
                let shutdown = shutdown_tx.clone();
                tokio::spawn(async move {
                    match serve_connection(stream, key, timeout, poll, shutdown).await {
                        Ok(()) => tracing::info!(%peer, "session closed"),
                        Err(e) => tracing::warn!(%peer, error = %e, "session ended with error"),
                    }
                });
            }
        }
    }
}

/// One client session: receive loop, retransmit ticker, delivery logger.
async fn serve_connection(
    stream: TcpStream,
    key: SessionKey,
    retransmit_timeout: Duration,
    retransmit_poll: Duration,
    shutdown: broadcast::Sender<()>,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let session = Session::new(writer, key, retransmit_timeout);

    let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<Delivery>();
    let delivery_task = tokio::spawn(async move {
        while let Some(d) = delivery_rx.recv().await {
            tracing::info!(seq = d.seq, text = %d.text, "message received");
        }
    });

    let receive = ReceiveLoop::new(
        reader,
        session.clone(),
        Role::Responder,
        delivery_tx,
        shutdown.subscribe(),
    );
    let mut receive_task = tokio::spawn(receive.run());
    let mut ticker_task = tokio::spawn(ticker::run_retransmit(
        session.clone(),
        retransmit_poll,
        shutdown.subscribe(),
    ));

    // Whichever path finishes first decides the session's fate; the other
    // is stopped by aborting it and closing the shared transport.
    let outcome = tokio::select! {
        res = &mut receive_task => task_outcome(res),
        res = &mut ticker_task => task_outcome(res),
    };

    receive_task.abort();
    ticker_task.abort();
    delivery_task.abort();
    let _ = session.close().await;

    outcome
}

fn task_outcome(res: Result<Result<(), SessionError>, JoinError>) -> Result<()> {
    match res {
        Ok(inner) => inner.map_err(Into::into),
        Err(join) => Err(anyhow::anyhow!("session task panicked: {join}")),
    }
}
