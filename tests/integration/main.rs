//! Cairn integration tests.
//!
//! Every test runs real peers over loopback TCP — no external setup
//! required. The pre-shared key is 32 zero bytes and the exchange secret
//! is the fixed placeholder, so both ends derive the same session key the
//! way production peers do.
//!
//! Tests that exercise retransmission use short timeouts and real sleeps;
//! the margins are generous enough for loaded CI machines.

use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use cairn_core::keys::{derive_session_key, PLACEHOLDER_EXCHANGE_SECRET};
use cairn_core::record::{self, RecordBody};
use cairn_core::SessionKey;
use cairn_session::{framing, ticker, Delivery, ReceiveLoop, Role, Session, SessionError};

// ── Harness ───────────────────────────────────────────────────────────────────

const RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(300);
const WAIT: Duration = Duration::from_secs(5);

fn test_key() -> SessionKey {
    derive_session_key(&[0u8; 32], &PLACEHOLDER_EXCHANGE_SECRET).expect("key derivation")
}

/// A connected loopback TCP pair: (client end, server end).
async fn tcp_pair() -> Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    let (server, _) = accepted?;
    Ok((connected?, server))
}

/// A full protocol peer: session handle, delivery channel, receive task.
struct Peer {
    session: Session,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    shutdown: broadcast::Sender<()>,
    receive: JoinHandle<Result<(), SessionError>>,
}

fn spawn_peer(stream: TcpStream, role: Role) -> Peer {
    let (reader, writer) = stream.into_split();
    let session = Session::new(writer, test_key(), RETRANSMIT_TIMEOUT);
    let (tx, rx) = mpsc::unbounded_channel();
    let (shutdown_tx, _) = broadcast::channel(1);
    let receive = tokio::spawn(
        ReceiveLoop::new(reader, session.clone(), role, tx, shutdown_tx.subscribe()).run(),
    );
    Peer {
        session,
        deliveries: rx,
        shutdown: shutdown_tx,
        receive,
    }
}

/// Poll until the session has no pending retransmissions.
async fn drained(session: &Session) -> bool {
    for _ in 0..200 {
        if session.pending_retransmits().await == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

/// Client sends "hi"; the server delivers it, acks it, and the client's
/// tracker drains.
#[tokio::test]
async fn message_is_delivered_and_acked() -> Result<()> {
    let (client_stream, server_stream) = tcp_pair().await?;
    let mut server = spawn_peer(server_stream, Role::Responder);
    let client = spawn_peer(client_stream, Role::Initiator);

    let seq = client.session.send_message("hi").await?;
    assert_eq!(seq, 1);
    assert_eq!(client.session.pending_retransmits().await, 1);

    let delivery = timeout(WAIT, server.deliveries.recv()).await?.unwrap();
    assert_eq!(delivery, Delivery { seq: 1, text: "hi".to_string() });

    assert!(drained(&client.session).await, "ack never drained the tracker");
    let _ = client.shutdown.send(());
    let _ = server.shutdown.send(());
    Ok(())
}

/// A multi-message conversation arrives in order with per-direction
/// sequence numbers counting up from 1.
#[tokio::test]
async fn conversation_keeps_sequence_order() -> Result<()> {
    let (client_stream, server_stream) = tcp_pair().await?;
    let mut server = spawn_peer(server_stream, Role::Responder);
    let client = spawn_peer(client_stream, Role::Initiator);

    for (i, text) in ["one", "two", "three"].iter().enumerate() {
        let seq = client.session.send_message(text).await?;
        assert_eq!(seq, (i + 1) as u64);
    }

    for (i, text) in ["one", "two", "three"].iter().enumerate() {
        let d = timeout(WAIT, server.deliveries.recv()).await?.unwrap();
        assert_eq!(d.seq, (i + 1) as u64);
        assert_eq!(d.text, *text);
    }

    assert!(drained(&client.session).await);
    let _ = client.shutdown.send(());
    let _ = server.shutdown.send(());
    Ok(())
}

/// No ack arrives: after the timeout the original ciphertext is resent
/// verbatim; a late ack then clears the entry for good.
#[tokio::test]
async fn lost_ack_triggers_verbatim_retransmission() -> Result<()> {
    let (client_stream, mut raw) = tcp_pair().await?;
    let client = spawn_peer(client_stream, Role::Initiator);
    let key = test_key();

    client.session.send_message("resend me").await?;

    let first = timeout(WAIT, framing::read_frame(&mut raw)).await??.unwrap();
    let rec = record::open(1, &key, &first)?;
    assert_eq!(
        rec.body,
        RecordBody::Msg { text: "resend me".to_string() }
    );

    // Nothing due before the deadline.
    assert_eq!(client.session.flush_due().await?, 0);

    tokio::time::sleep(RETRANSMIT_TIMEOUT + Duration::from_millis(100)).await;
    assert_eq!(client.session.flush_due().await?, 1);

    let resent = timeout(WAIT, framing::read_frame(&mut raw)).await??.unwrap();
    assert_eq!(first, resent, "retransmission must reuse the original ciphertext");

    // The silent peer finally acks; the entry disappears.
    let ack = record::seal(1, &RecordBody::Ack { ack: 1 }, &key)?;
    framing::write_frame(&mut raw, &ack).await?;

    assert!(drained(&client.session).await, "late ack never drained the tracker");
    tokio::time::sleep(RETRANSMIT_TIMEOUT + Duration::from_millis(100)).await;
    assert_eq!(client.session.flush_due().await?, 0);

    let _ = client.shutdown.send(());
    Ok(())
}

/// The background ticker resends without anyone calling flush_due.
#[tokio::test]
async fn ticker_retransmits_automatically() -> Result<()> {
    let (client_stream, mut raw) = tcp_pair().await?;
    let client = spawn_peer(client_stream, Role::Initiator);

    let ticker_task = tokio::spawn(ticker::run_retransmit(
        client.session.clone(),
        Duration::from_millis(25),
        client.shutdown.subscribe(),
    ));

    client.session.send_message("tick").await?;

    let first = timeout(WAIT, framing::read_frame(&mut raw)).await??.unwrap();
    let resent = timeout(WAIT, framing::read_frame(&mut raw)).await??.unwrap();
    assert_eq!(first, resent);

    let _ = client.shutdown.send(());
    let _ = timeout(WAIT, ticker_task).await?;
    Ok(())
}

/// A flipped ciphertext bit ends the receiving session with a decrypt
/// error instead of delivering corrupted text.
#[tokio::test]
async fn tampered_record_ends_the_session() -> Result<()> {
    let (mut raw, server_stream) = tcp_pair().await?;
    let server = spawn_peer(server_stream, Role::Responder);
    let key = test_key();

    let mut cipher = record::seal(1, &RecordBody::Msg { text: "evil".into() }, &key)?;
    cipher[5] ^= 0x01;
    framing::write_frame(&mut raw, &cipher).await?;

    let outcome = timeout(WAIT, server.receive).await??;
    assert!(matches!(
        outcome,
        Err(SessionError::Record(record::RecordError::Decrypt))
    ));
    Ok(())
}

/// Two records written in a single TCP write are still decoded as two
/// records — the length prefix keeps their boundaries.
#[tokio::test]
async fn coalesced_writes_preserve_record_boundaries() -> Result<()> {
    let (mut raw, server_stream) = tcp_pair().await?;
    let mut server = spawn_peer(server_stream, Role::Responder);
    let key = test_key();

    let mut wire = Vec::new();
    for (seq, text) in [(1u64, "first"), (2u64, "second")] {
        let cipher = record::seal(seq, &RecordBody::Msg { text: text.into() }, &key)?;
        wire.extend_from_slice(&(cipher.len() as u32).to_be_bytes());
        wire.extend_from_slice(&cipher);
    }
    raw.write_all(&wire).await?;

    let one = timeout(WAIT, server.deliveries.recv()).await?.unwrap();
    let two = timeout(WAIT, server.deliveries.recv()).await?.unwrap();
    assert_eq!((one.seq, one.text.as_str()), (1, "first"));
    assert_eq!((two.seq, two.text.as_str()), (2, "second"));

    // The responder acked both, under its own outbound counter.
    let ack1 = timeout(WAIT, framing::read_frame(&mut raw)).await??.unwrap();
    let ack2 = timeout(WAIT, framing::read_frame(&mut raw)).await??.unwrap();
    assert_eq!(record::open(1, &key, &ack1)?.body, RecordBody::Ack { ack: 1 });
    assert_eq!(record::open(2, &key, &ack2)?.body, RecordBody::Ack { ack: 2 });

    let _ = server.shutdown.send(());
    Ok(())
}

/// Closing the write half ends the peer's receive loop cleanly and closes
/// its delivery channel.
#[tokio::test]
async fn clean_close_ends_the_peer_receive_loop() -> Result<()> {
    let (client_stream, server_stream) = tcp_pair().await?;
    let mut server = spawn_peer(server_stream, Role::Responder);
    let client = spawn_peer(client_stream, Role::Initiator);

    client.session.send_message("bye").await?;
    let d = timeout(WAIT, server.deliveries.recv()).await?.unwrap();
    assert_eq!(d.text, "bye");

    client.session.close().await?;

    let outcome = timeout(WAIT, server.receive).await??;
    assert!(outcome.is_ok(), "clean EOF should not be an error: {outcome:?}");
    assert!(timeout(WAIT, server.deliveries.recv()).await?.is_none());

    let _ = client.shutdown.send(());
    Ok(())
}

/// Duplicate acks are tolerated; the second one is a no-op.
#[tokio::test]
async fn duplicate_ack_is_ignored() -> Result<()> {
    let (client_stream, mut raw) = tcp_pair().await?;
    let client = spawn_peer(client_stream, Role::Initiator);
    let key = test_key();

    client.session.send_message("once").await?;
    let _ = timeout(WAIT, framing::read_frame(&mut raw)).await??.unwrap();

    for seq in [1u64, 2] {
        let ack = record::seal(seq, &RecordBody::Ack { ack: 1 }, &key)?;
        framing::write_frame(&mut raw, &ack).await?;
    }

    assert!(drained(&client.session).await);
    // The receive loop survived the duplicate and the session still works.
    assert_eq!(client.session.send_message("again").await?, 2);
    let _ = timeout(WAIT, framing::read_frame(&mut raw)).await??.unwrap();

    let _ = client.shutdown.send(());
    Ok(())
}
