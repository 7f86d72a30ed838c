// src/engine/mod.rs

pub(crate) mod stream;

use crate::protocol::zmtp::{MsgSink, MsgSource};

pub(crate) use stream::StreamEngine;

/// The session's side of the pipe as seen by an engine: decoded messages
/// are pushed into it, messages to send are pulled from it.
pub(crate) trait SessionPort: MsgSink + MsgSource {
  /// Publishes messages pushed so far to the socket.
  fn flush(&mut self);
}
