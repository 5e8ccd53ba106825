//! Wire codec (WC) and net transport (NT): the framing, endian-handling and
//! non-blocking socket plumbing shared by the server and client sessions.

pub mod buffer;
pub mod codec;
pub mod message;
pub mod transport;

pub use codec::Codec;
pub use message::{MsgHeader, MsgType};
pub use transport::{ConnState, Listener, PumpEvent, Socket};
