// src/socket/events.rs

use crate::error::ZmqError;
use crate::message::{Msg, SendFlags};
use crate::socket::core::SocketBase;

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

pub const EVENT_CONNECTED: i32 = 1;
pub const EVENT_CONNECT_DELAYED: i32 = 2;
pub const EVENT_CONNECT_RETRIED: i32 = 4;
pub const EVENT_LISTENING: i32 = 8;
pub const EVENT_BIND_FAILED: i32 = 16;
pub const EVENT_ACCEPTED: i32 = 32;
pub const EVENT_ACCEPT_FAILED: i32 = 64;
pub const EVENT_CLOSED: i32 = 128;
pub const EVENT_CLOSE_FAILED: i32 = 256;
pub const EVENT_DISCONNECTED: i32 = 512;
pub const EVENT_ALL: i32 = EVENT_CONNECTED
  | EVENT_CONNECT_DELAYED
  | EVENT_CONNECT_RETRIED
  | EVENT_LISTENING
  | EVENT_BIND_FAILED
  | EVENT_ACCEPTED
  | EVENT_ACCEPT_FAILED
  | EVENT_CLOSED
  | EVENT_CLOSE_FAILED
  | EVENT_DISCONNECTED;

/// Represents significant events occurring within a socket or its connections.
/// Inspired by libzmq socket monitor events.
///
/// Events are delivered as single-part records on the PAIR socket bound at the
/// address passed to [`Socket::monitor`](crate::Socket::monitor); decode them
/// with [`SocketEvent::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SocketEvent {
  // --- Connecter Events ---
  /// Connection established; `fd` is the connected descriptor.
  Connected { endpoint: String, fd: i32 },
  /// Synchronous connect failed; the attempt continues asynchronously.
  ConnectDelayed { endpoint: String, error: i32 },
  /// A reconnect attempt has been scheduled after `interval_ms`.
  ConnectRetried { endpoint: String, interval_ms: i32 },

  // --- Listener Events ---
  /// Socket has started listening on the endpoint.
  Listening { endpoint: String, fd: i32 },
  /// Socket failed to bind to the endpoint.
  BindFailed { endpoint: String, error: i32 },
  /// Accepted a new connection.
  Accepted { endpoint: String, fd: i32 },
  /// Failed to accept a new connection.
  AcceptFailed { endpoint: String, error: i32 },

  // --- General ---
  /// A listening or connecting descriptor was closed.
  Closed { endpoint: String, fd: i32 },
  CloseFailed { endpoint: String, error: i32 },
  /// The session lost its connection to the peer.
  Disconnected { endpoint: String, fd: i32 },
}

impl SocketEvent {
  /// The `EVENT_*` bit of this event.
  pub fn event_id(&self) -> i32 {
    match self {
      SocketEvent::Connected { .. } => EVENT_CONNECTED,
      SocketEvent::ConnectDelayed { .. } => EVENT_CONNECT_DELAYED,
      SocketEvent::ConnectRetried { .. } => EVENT_CONNECT_RETRIED,
      SocketEvent::Listening { .. } => EVENT_LISTENING,
      SocketEvent::BindFailed { .. } => EVENT_BIND_FAILED,
      SocketEvent::Accepted { .. } => EVENT_ACCEPTED,
      SocketEvent::AcceptFailed { .. } => EVENT_ACCEPT_FAILED,
      SocketEvent::Closed { .. } => EVENT_CLOSED,
      SocketEvent::CloseFailed { .. } => EVENT_CLOSE_FAILED,
      SocketEvent::Disconnected { .. } => EVENT_DISCONNECTED,
    }
  }

  pub fn endpoint(&self) -> &str {
    match self {
      SocketEvent::Connected { endpoint, .. }
      | SocketEvent::ConnectDelayed { endpoint, .. }
      | SocketEvent::ConnectRetried { endpoint, .. }
      | SocketEvent::Listening { endpoint, .. }
      | SocketEvent::BindFailed { endpoint, .. }
      | SocketEvent::Accepted { endpoint, .. }
      | SocketEvent::AcceptFailed { endpoint, .. }
      | SocketEvent::Closed { endpoint, .. }
      | SocketEvent::CloseFailed { endpoint, .. }
      | SocketEvent::Disconnected { endpoint, .. } => endpoint,
    }
  }

  /// The event's integer payload: a descriptor, an errno or an interval.
  pub fn value(&self) -> i32 {
    match *self {
      SocketEvent::Connected { fd, .. }
      | SocketEvent::Listening { fd, .. }
      | SocketEvent::Accepted { fd, .. }
      | SocketEvent::Closed { fd, .. }
      | SocketEvent::Disconnected { fd, .. } => fd,
      SocketEvent::ConnectDelayed { error, .. }
      | SocketEvent::BindFailed { error, .. }
      | SocketEvent::AcceptFailed { error, .. }
      | SocketEvent::CloseFailed { error, .. } => error,
      SocketEvent::ConnectRetried { interval_ms, .. } => interval_ms,
    }
  }

  /// Serializes the event as
  /// `[event: i32 LE][addrlen: u8][addr][valueflag: u8][value: i32 LE]`.
  pub(crate) fn encode(&self) -> Vec<u8> {
    let endpoint = self.endpoint().as_bytes();
    // Addresses longer than a length byte allows are truncated.
    let addr = &endpoint[..endpoint.len().min(u8::MAX as usize)];
    let mut record = Vec::with_capacity(4 + 1 + addr.len() + 1 + 4);
    record.extend_from_slice(&self.event_id().to_le_bytes());
    record.push(addr.len() as u8);
    record.extend_from_slice(addr);
    record.push(1);
    record.extend_from_slice(&self.value().to_le_bytes());
    record
  }

  /// Decodes a monitor record.
  pub fn parse(record: &[u8]) -> Result<Self, ZmqError> {
    let bad = |what: &str| ZmqError::ProtocolViolation(format!("malformed monitor record: {}", what));
    if record.len() < 5 {
      return Err(bad("too short"));
    }
    let event = i32::from_le_bytes([record[0], record[1], record[2], record[3]]);
    let addr_len = record[4] as usize;
    let rest = &record[5..];
    if rest.len() < addr_len + 1 {
      return Err(bad("truncated address"));
    }
    let endpoint = String::from_utf8_lossy(&rest[..addr_len]).into_owned();
    let rest = &rest[addr_len..];
    let value = match rest[0] {
      0 => 0,
      1 if rest.len() >= 5 => i32::from_le_bytes([rest[1], rest[2], rest[3], rest[4]]),
      _ => return Err(bad("bad value field")),
    };
    Ok(match event {
      EVENT_CONNECTED => SocketEvent::Connected { endpoint, fd: value },
      EVENT_CONNECT_DELAYED => SocketEvent::ConnectDelayed { endpoint, error: value },
      EVENT_CONNECT_RETRIED => SocketEvent::ConnectRetried {
        endpoint,
        interval_ms: value,
      },
      EVENT_LISTENING => SocketEvent::Listening { endpoint, fd: value },
      EVENT_BIND_FAILED => SocketEvent::BindFailed { endpoint, error: value },
      EVENT_ACCEPTED => SocketEvent::Accepted { endpoint, fd: value },
      EVENT_ACCEPT_FAILED => SocketEvent::AcceptFailed { endpoint, error: value },
      EVENT_CLOSED => SocketEvent::Closed { endpoint, fd: value },
      EVENT_CLOSE_FAILED => SocketEvent::CloseFailed { endpoint, error: value },
      EVENT_DISCONNECTED => SocketEvent::Disconnected { endpoint, fd: value },
      _ => return Err(bad("unknown event")),
    })
  }
}

struct MonitorTarget {
  socket: Box<SocketBase>,
  events: i32,
}

/// Shared handle through which a socket and its I/O objects publish events.
///
/// Cloned into every listener, connecter and session the socket creates.
/// Events are dropped while no monitor is installed or when the monitor
/// socket cannot take them without blocking.
#[derive(Clone, Default)]
pub(crate) struct Monitor {
  target: Arc<Mutex<Option<MonitorTarget>>>,
}

impl Monitor {
  pub(crate) fn emit(&self, event: SocketEvent) {
    let mut target = self.target.lock();
    let Some(target) = target.as_mut() else {
      return;
    };
    if target.events & event.event_id() == 0 {
      return;
    }
    let mut msg = Msg::from_vec(event.encode());
    if let Err(e) = target.socket.send(&mut msg, SendFlags::DONTWAIT) {
      tracing::trace!(event = event.event_id(), error = %e, "Monitor event dropped");
    }
  }

  /// Installs `socket` as the event sink. Returns the previous sink, which
  /// the caller must close.
  pub(crate) fn start(&self, socket: Box<SocketBase>, events: i32) -> Option<Box<SocketBase>> {
    self
      .target
      .lock()
      .replace(MonitorTarget { socket, events })
      .map(|t| t.socket)
  }

  pub(crate) fn stop(&self) -> Option<Box<SocketBase>> {
    self.target.lock().take().map(|t| t.socket)
  }
}

impl fmt::Debug for Monitor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Monitor").field("active", &self.target.lock().is_some()).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn record_layout_matches_wire_format() {
    let event = SocketEvent::Accepted {
      endpoint: "tcp://1.2.3.4:5".into(),
      fd: 17,
    };
    let record = event.encode();
    assert_eq!(&record[..4], &32i32.to_le_bytes());
    assert_eq!(record[4] as usize, "tcp://1.2.3.4:5".len());
    assert_eq!(record[5 + 15], 1);
    assert_eq!(&record[21..], &17i32.to_le_bytes());
    assert_eq!(SocketEvent::parse(&record).unwrap(), event);
  }

  #[test]
  fn parse_rejects_garbage() {
    assert!(SocketEvent::parse(&[1, 0, 0]).is_err());
    assert!(SocketEvent::parse(&[3, 0, 0, 0, 0, 1, 0, 0, 0, 0]).is_err(), "3 is not a single event bit");
    assert!(SocketEvent::parse(&[1, 0, 0, 0, 9, b'a']).is_err());
  }

  #[test]
  fn event_mask_covers_all_events() {
    assert_eq!(EVENT_ALL, 1023);
  }
}
