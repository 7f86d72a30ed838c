// src/socket/types.rs

use crate::context::ContextInner;
use crate::error::ZmqError;
use crate::message::{Msg, RecvFlags, SendFlags};
use crate::socket::core::SocketBase;
use crate::socket::options::EVENTS;

use parking_lot::Mutex;
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Represents the type of a ZeroMQ socket, defining its messaging pattern.
///
/// Discriminants follow libzmq and are what the `TYPE` option reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SocketType {
  /// Exclusive connection to exactly one peer.
  Pair = 0,
  /// Publish messages to subscribers (Pub-Sub pattern).
  Pub = 1,
  /// Subscribe to messages from publishers (Pub-Sub pattern).
  Sub = 2,
  /// Send requests and receive replies (Req-Rep pattern).
  Req = 3,
  /// Receive requests and send replies (Req-Rep pattern).
  Rep = 4,
  /// Asynchronous request-reply, load-balancing outgoing (Dealer-Router pattern).
  Dealer = 5,
  /// Asynchronous request-reply, routing incoming (Dealer-Router pattern).
  Router = 6,
  /// Collect messages from a pool of distributors (Push-Pull pattern).
  Pull = 7,
  /// Distribute messages to a pool of workers (Push-Pull pattern).
  Push = 8,
  /// Publisher that also receives subscription messages.
  XPub = 9,
  /// Subscriber that sends subscriptions as messages.
  XSub = 10,
}

impl SocketType {
  pub fn from_i32(value: i32) -> Option<Self> {
    Some(match value {
      0 => SocketType::Pair,
      1 => SocketType::Pub,
      2 => SocketType::Sub,
      3 => SocketType::Req,
      4 => SocketType::Rep,
      5 => SocketType::Dealer,
      6 => SocketType::Router,
      7 => SocketType::Pull,
      8 => SocketType::Push,
      9 => SocketType::XPub,
      10 => SocketType::XSub,
      _ => return None,
    })
  }
}

/// The public handle for interacting with a socket.
///
/// Calls block the calling thread (bounded by `SNDTIMEO`/`RCVTIMEO`). A
/// handle may be moved between threads but is not meant to be used by
/// several threads at once; calls from different threads are serialized.
/// Dropping the handle closes the socket.
pub struct Socket {
  ctx: Arc<ContextInner>,
  socket_type: SocketType,
  base: Mutex<Option<Box<SocketBase>>>,
}

impl Socket {
  /// Wraps a freshly created socket. Called by `Context::socket`.
  pub(crate) fn new(ctx: Arc<ContextInner>, base: Box<SocketBase>) -> Self {
    Self {
      ctx,
      socket_type: base.socket_type(),
      base: Mutex::new(Some(base)),
    }
  }

  fn with_base<R>(&self, f: impl FnOnce(&mut SocketBase) -> Result<R, ZmqError>) -> Result<R, ZmqError> {
    let mut guard = self.base.lock();
    match guard.as_mut() {
      Some(base) => f(base),
      None => Err(ZmqError::InvalidState("Socket is closed")),
    }
  }

  pub fn socket_type(&self) -> SocketType {
    self.socket_type
  }

  pub(crate) fn mailbox_fd(&self) -> Result<RawFd, ZmqError> {
    self.with_base(|base| Ok(base.mailbox_fd()))
  }

  /// Current `POLLIN`/`POLLOUT` readiness, after processing pending commands.
  pub(crate) fn events(&self) -> Result<i32, ZmqError> {
    let raw = self.get_option(EVENTS)?;
    let bytes: [u8; 4] = raw
      .as_slice()
      .try_into()
      .map_err(|_| ZmqError::Internal("EVENTS is not an i32".into()))?;
    Ok(i32::from_ne_bytes(bytes))
  }

  /// Binds the socket to listen on a local endpoint.
  pub fn bind(&self, endpoint: &str) -> Result<(), ZmqError> {
    self.with_base(|base| base.bind(endpoint))
  }

  /// Connects the socket to a remote endpoint. For TCP the connection is
  /// established in the background and re-established after failures.
  pub fn connect(&self, endpoint: &str) -> Result<(), ZmqError> {
    self.with_base(|base| base.connect(endpoint))
  }

  /// Sends a message part, waiting for room up to `SNDTIMEO`.
  pub fn send(&self, msg: Msg) -> Result<(), ZmqError> {
    self.send_with_flags(msg, SendFlags::empty())
  }

  pub fn send_with_flags(&self, mut msg: Msg, flags: SendFlags) -> Result<(), ZmqError> {
    self.with_base(|base| base.send(&mut msg, flags))
  }

  /// Receives a message part, waiting up to `RCVTIMEO`.
  pub fn recv(&self) -> Result<Msg, ZmqError> {
    self.recv_with_flags(RecvFlags::empty())
  }

  pub fn recv_with_flags(&self, flags: RecvFlags) -> Result<Msg, ZmqError> {
    self.with_base(|base| base.recv(flags))
  }

  /// Sets a socket option. Values are native-endian integers or raw bytes.
  pub fn set_option(&self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    self.with_base(|base| base.set_option(option, value))
  }

  pub fn get_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    self.with_base(|base| base.get_option(option))
  }

  /// Publishes the events in the `events` mask as records on a PAIR socket
  /// bound at `endpoint`, which must be an `inproc://` address. Passing
  /// `None` stops monitoring.
  pub fn monitor(&self, endpoint: Option<&str>, events: i32) -> Result<(), ZmqError> {
    self.with_base(|base| base.monitor(endpoint, events))
  }

  /// Closes the socket. Pending outbound messages are sent in the
  /// background for up to `LINGER`.
  pub fn close(&self) -> Result<(), ZmqError> {
    let base = self.base.lock().take();
    if let Some(base) = base {
      base.close();
    }
    Ok(())
  }
}

impl Drop for Socket {
  fn drop(&mut self) {
    if let Some(base) = self.base.get_mut().take() {
      base.close();
    }
  }
}

impl fmt::Debug for Socket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Socket")
      .field("socket_type", &self.socket_type)
      .field("closed", &self.base.lock().is_none())
      .field("context_terminated", &self.ctx.is_terminated())
      .finish()
  }
}
