//! Key material for Cairn sessions.
//!
//! Provides two things:
//!   1. Pre-shared key loading — a file of high-entropy bytes both peers
//!      hold before any connection exists (e.g. a QKD-produced key).
//!   2. Hybrid session key derivation — HKDF-SHA256 mixing the pre-shared
//!      key with a key-exchange secret into one 32-byte AES-256-GCM key.
//!
//! The exchange secret is currently a fixed placeholder. A real X25519
//! exchange produces a 32-byte secret that drops into `derive_session_key`
//! unchanged, so wiring one in touches nothing else.
//!
//! All key material is ZeroizeOnDrop — wiped from memory when dropped.
//! There is no unsafe code in this module.

use std::path::{Path, PathBuf};

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Domain-separation context for session key derivation.
/// Both peers must use the identical string or their derived keys diverge.
pub const KEY_CONTEXT: &[u8] = b"qs-tls-1.0 hybrid key";

/// Stand-in for a real key-exchange output until one is wired in.
/// Both peers must feed the same bytes to `derive_session_key`.
pub const PLACEHOLDER_EXCHANGE_SECRET: [u8; 32] = [b'A'; 32];

/// Minimum acceptable pre-shared key length in bytes.
pub const MIN_PRESHARED_LEN: usize = 32;

// ── Session key ───────────────────────────────────────────────────────────────

/// The 32-byte symmetric key protecting every record of one session.
///
/// Derived independently by both peers from the same inputs; never
/// persisted, never sent. Owned by the session object for exactly the
/// lifetime of its connection.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    bytes: Zeroizing<[u8; 32]>,
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes never reach logs.
        f.write_str("SessionKey(..)")
    }
}

// ── Pre-shared key ────────────────────────────────────────────────────────────

/// Read the pre-shared key file and check it holds at least 32 bytes.
///
/// The file is the peers' out-of-band secret (`final_key.bin` by default);
/// a missing or undersized file is fatal at startup.
pub fn load_preshared_key(path: impl AsRef<Path>) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| KeyError::Missing {
        path: path.to_path_buf(),
        source,
    })?;
    if data.len() < MIN_PRESHARED_LEN {
        return Err(KeyError::Undersized { len: data.len() });
    }
    Ok(Zeroizing::new(data))
}

// ── Derivation ────────────────────────────────────────────────────────────────

/// Derive the session key from the pre-shared key and an exchange secret.
///
/// HKDF-SHA256 with the pre-shared key as salt, the exchange secret as
/// input keying material, and [`KEY_CONTEXT`] as info. Deterministic:
/// both peers call this independently and obtain the same key.
pub fn derive_session_key(
    preshared: &[u8],
    exchange_secret: &[u8],
) -> Result<SessionKey, KeyError> {
    if preshared.len() < MIN_PRESHARED_LEN {
        return Err(KeyError::Undersized {
            len: preshared.len(),
        });
    }

    let hk = Hkdf::<Sha256>::new(Some(preshared), exchange_secret);
    let mut key = [0u8; 32];
    hk.expand(KEY_CONTEXT, &mut key)
        .map_err(|_| KeyError::Derive)?;

    Ok(SessionKey::from_bytes(key))
}

/// General HKDF-SHA256 expansion for callers that need a different output
/// length or context than the session key uses.
///
/// Same construction as [`derive_session_key`]: the pre-shared key salts
/// the extraction, the exchange secret is the input keying material.
pub fn hkdf_expand(
    preshared: &[u8],
    exchange_secret: &[u8],
    info: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    if preshared.len() < MIN_PRESHARED_LEN {
        return Err(KeyError::Undersized {
            len: preshared.len(),
        });
    }

    let hk = Hkdf::<Sha256>::new(Some(preshared), exchange_secret);
    let mut okm = Zeroizing::new(vec![0u8; output_len]);
    hk.expand(info, &mut okm).map_err(|_| KeyError::Derive)?;
    Ok(okm)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("pre-shared key file not found: {path}")]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pre-shared key too short ({len} bytes, need at least {MIN_PRESHARED_LEN})")]
    Undersized { len: usize },

    #[error("HKDF expansion failed")]
    Derive,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
