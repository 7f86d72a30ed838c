//! rzmq-classic - a ZeroMQ-style messaging engine with its own I/O threads.
//!
//! Sockets are created from a [`Context`], which owns a small pool of
//! reactor threads driving every TCP connection. User threads talk to the
//! engine through lock-free pipes and per-thread command mailboxes.

pub mod context;
pub(crate) mod engine;
pub mod error;
pub mod message;
pub(crate) mod protocol;
pub mod proxy;
pub(crate) mod runtime;
pub(crate) mod session;
pub mod socket;
pub(crate) mod transport;

// Re-export core types for user convenience
pub use context::{Context, IO_THREADS, MAX_SOCKETS};
pub use error::ZmqError;
pub use message::{Blob, Msg, MsgFlags, RecvFlags, SendFlags};
pub use socket::events::{
  SocketEvent, EVENT_ACCEPTED, EVENT_ACCEPT_FAILED, EVENT_ALL, EVENT_BIND_FAILED, EVENT_CLOSED, EVENT_CLOSE_FAILED,
  EVENT_CONNECTED, EVENT_CONNECT_DELAYED, EVENT_CONNECT_RETRIED, EVENT_DISCONNECTED, EVENT_LISTENING,
};
pub use socket::options::{
  BACKLOG, EVENTS, IDENTITY, LAST_ENDPOINT, LINGER, MAXMSGSIZE, POLLIN, POLLOUT, RCVHWM, RCVMORE, RCVTIMEO, RECONNECT_IVL,
  RECONNECT_IVL_MAX, ROUTER_MANDATORY, SNDHWM, SNDTIMEO, SUBSCRIBE, TCP_KEEPALIVE, TCP_KEEPALIVE_CNT,
  TCP_KEEPALIVE_IDLE, TCP_KEEPALIVE_INTVL, TYPE, UNSUBSCRIBE, XPUB_VERBOSE,
};
pub use proxy::{proxy, Device, DeviceKind};
pub use socket::poll::{poll, PollItem};
pub use socket::types::{Socket, SocketType};

// --- Top-Level Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Returns the major version number of the library.
pub fn version_major() -> i32 {
  VERSION_MAJOR
}

/// Returns the minor version number of the library.
pub fn version_minor() -> i32 {
  VERSION_MINOR
}

/// Returns the patch version number of the library.
pub fn version_patch() -> i32 {
  VERSION_PATCH
}
