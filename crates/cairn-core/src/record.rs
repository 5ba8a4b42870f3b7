//! Record codec — the encrypted unit of Cairn communication.
//!
//! A record is `{"seq", "type", "payload"}` serialized as JSON and sealed
//! with AES-256-GCM. The 12-byte nonce is derived from the sequence number
//! (four zero bytes followed by the big-endian seq), so no nonce travels on
//! the wire — but the receiver must open records in exactly the order they
//! were sealed, and a failed open is fatal to the connection: sequence
//! numbers past a bad record cannot be resynchronized.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::SessionKey;

/// Wire tag for application messages.
pub const RECORD_TYPE_MSG: &str = "MSG";
/// Wire tag for acknowledgments.
pub const RECORD_TYPE_ACK: &str = "ACK";

// ── Types ─────────────────────────────────────────────────────────────────────

/// One decoded protocol record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Sequence number the sender assigned; strictly increasing per
    /// direction, starting at 1.
    pub seq: u64,
    pub body: RecordBody,
}

/// Typed record payloads.
///
/// The wire `payload` object is an open mapping, but each known type is
/// parsed into its variant at decode time so a wrong-shaped payload fails
/// immediately rather than at first field access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    /// Application text.
    Msg { text: String },
    /// Acknowledges receipt of the peer record with this sequence number.
    Ack { ack: u64 },
    /// A type tag this build does not recognize. The session layer logs
    /// and skips these; they are not a protocol break.
    Unknown { rtype: String },
}

/// The JSON shape inside the ciphertext.
#[derive(Serialize, Deserialize)]
struct WireRecord {
    seq: u64,
    #[serde(rename = "type")]
    rtype: String,
    payload: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct MsgPayload {
    text: String,
}

#[derive(Serialize, Deserialize)]
struct AckPayload {
    ack: u64,
}

// ── Nonce ─────────────────────────────────────────────────────────────────────

/// Nonce for a given sequence number: 4 zero bytes ‖ big-endian u64.
///
/// Injective in `seq`, so no two records under one key and direction share
/// a nonce as long as the counter never repeats.
pub fn nonce_for(seq: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Serialize and encrypt a record under the session key.
pub fn seal(seq: u64, body: &RecordBody, key: &SessionKey) -> Result<Vec<u8>, RecordError> {
    let (rtype, payload) = match body {
        RecordBody::Msg { text } => (
            RECORD_TYPE_MSG,
            serde_json::to_value(MsgPayload { text: text.clone() })?,
        ),
        RecordBody::Ack { ack } => (
            RECORD_TYPE_ACK,
            serde_json::to_value(AckPayload { ack: *ack })?,
        ),
        RecordBody::Unknown { rtype } => {
            return Err(RecordError::UnknownType {
                rtype: rtype.clone(),
            })
        }
    };

    let wire = WireRecord {
        seq,
        rtype: rtype.to_string(),
        payload,
    };
    let plaintext = serde_json::to_vec(&wire)?;

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = nonce_for(seq);
    cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|_| RecordError::Decrypt)
}

/// Decrypt and parse a record the peer sealed with `expected_seq`.
///
/// The nonce is recomputed from `expected_seq`; a tampered ciphertext, a
/// mismatched key, or a desynchronized sequence all surface as
/// [`RecordError::Decrypt`].
pub fn open(
    expected_seq: u64,
    key: &SessionKey,
    ciphertext: &[u8],
) -> Result<Record, RecordError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = nonce_for(expected_seq);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .map_err(|_| RecordError::Decrypt)?;

    let wire: WireRecord = serde_json::from_slice(&plaintext)?;

    // The AEAD already binds the ciphertext to the nonce-derived seq; a
    // disagreeing embedded seq means the sender itself is inconsistent.
    if wire.seq != expected_seq {
        return Err(RecordError::SeqMismatch {
            embedded: wire.seq,
            expected: expected_seq,
        });
    }

    let body = match wire.rtype.as_str() {
        RECORD_TYPE_MSG => {
            let p: MsgPayload = serde_json::from_value(wire.payload)?;
            RecordBody::Msg { text: p.text }
        }
        RECORD_TYPE_ACK => {
            let p: AckPayload = serde_json::from_value(wire.payload)?;
            RecordBody::Ack { ack: p.ack }
        }
        _ => RecordBody::Unknown { rtype: wire.rtype },
    };

    Ok(Record {
        seq: expected_seq,
        body,
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RecordError {
    /// AEAD authentication failed — tampering, wrong key, or a
    /// desynchronized sequence number. Fatal to the connection.
    #[error("record decryption failed (tampering, wrong key, or sequence desync)")]
    Decrypt,

    /// The decrypted bytes do not parse into the record shape.
    #[error("record plaintext does not parse: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The embedded sequence disagrees with the nonce-derived one.
    #[error("record carries seq {embedded}, expected {expected}")]
    SeqMismatch { embedded: u64, expected: u64 },

    /// Sealing a record whose type this build cannot encode.
    #[error("cannot seal record of unrecognized type {rtype:?}")]
    UnknownType { rtype: String },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
