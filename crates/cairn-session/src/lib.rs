//! cairn-session — per-connection orchestration of the record protocol:
//! length-prefixed framing, the locked send half, the receive loop, and
//! the retransmission ticker.

pub mod framing;
pub mod receive;
pub mod session;
pub mod ticker;

pub use receive::{Delivery, ReceiveLoop};
pub use session::{Role, Session, SessionError};
