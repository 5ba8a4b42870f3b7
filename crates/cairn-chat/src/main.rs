//! cairn-chat — interactive Cairn client.
//!
//! Connects to a server, then reads lines from stdin and sends each as an
//! authenticated message record. Unacknowledged records are resent in the
//! background until the server's ack arrives. `/quit` ends the session
//! without waiting for outstanding acks.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

use cairn_core::config::CairnConfig;
use cairn_core::keys::{self, PLACEHOLDER_EXCHANGE_SECRET};
use cairn_session::{ticker, Delivery, ReceiveLoop, Role, Session};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = CairnConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CairnConfig::default()
    });

    // Optional endpoint override: cairn-chat [host:port]
    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.network.endpoint());

    let psk = keys::load_preshared_key(&config.key.preshared_path).with_context(|| {
        format!(
            "pre-shared key at {}",
            config.key.preshared_path.display()
        )
    })?;
    let key = keys::derive_session_key(&psk, &PLACEHOLDER_EXCHANGE_SECRET)?;

    let stream = TcpStream::connect(&endpoint)
        .await
        .with_context(|| format!("failed to connect to {endpoint}"))?;
    tracing::info!(%endpoint, "connected");

    let (reader, writer) = stream.into_split();
    let session = Session::new(writer, key, config.transport.retransmit_timeout());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<Delivery>();
    let printer = tokio::spawn(async move {
        while let Some(d) = delivery_rx.recv().await {
            println!("[{}] peer: {}", d.seq, d.text);
        }
    });

    let receive = ReceiveLoop::new(
        reader,
        session.clone(),
        Role::Initiator,
        delivery_tx,
        shutdown_tx.subscribe(),
    );
    let mut receive_task = tokio::spawn(receive.run());
    let ticker_task = tokio::spawn(ticker::run_retransmit(
        session.clone(),
        config.transport.retransmit_poll(),
        shutdown_tx.subscribe(),
    ));

    println!("type a message and press enter; /quit to exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            res = &mut receive_task => {
                match res {
                    Ok(Ok(())) => tracing::info!("server closed the session"),
                    Ok(Err(e)) => tracing::error!(error = %e, "session failed"),
                    Err(e) => tracing::error!(error = %e, "receive task panicked"),
                }
                break;
            }

            line = lines.next_line() => {
                let line = match line.context("failed to read stdin")? {
                    Some(l) => l,
                    None => break, // stdin closed
                };
                let text = line.trim();
                if text == "/quit" {
                    break;
                }
                if text.is_empty() {
                    continue;
                }
                match session.send_message(text).await {
                    Ok(seq) => tracing::debug!(seq, "message sent"),
                    Err(e) => {
                        tracing::error!(error = %e, "send failed");
                        break;
                    }
                }
            }
        }
    }

    // Best-effort teardown: pending acks are not drained on quit.
    let _ = shutdown_tx.send(());
    let _ = session.close().await;
    receive_task.abort();
    ticker_task.abort();
    printer.abort();

    Ok(())
}
