// src/proxy.rs

//! Shuttling messages between two sockets, plus the classic devices built on
//! top of that: queue (ROUTER/DEALER), forwarder (XSUB/XPUB) and streamer
//! (PULL/PUSH).

use crate::context::Context;
use crate::error::ZmqError;
use crate::message::SendFlags;
use crate::socket::options::POLLIN;
use crate::socket::poll::{poll, PollItem};
use crate::socket::types::{Socket, SocketType};

/// Moves messages between `frontend` and `backend` in both directions until
/// one of the sockets fails, normally with [`ZmqError::Terminated`] when the
/// context goes away. Every part is also copied to `capture` if given.
///
/// Multi-part messages are moved whole before the other direction is served.
pub fn proxy(frontend: &Socket, backend: &Socket, capture: Option<&Socket>) -> Result<(), ZmqError> {
  tracing::debug!(
    frontend = ?frontend.socket_type(),
    backend = ?backend.socket_type(),
    capture = capture.is_some(),
    "Proxy started"
  );
  loop {
    let mut items = [PollItem::new(frontend, POLLIN), PollItem::new(backend, POLLIN)];
    poll(&mut items, None)?;
    let (front_ready, back_ready) = (items[0].is_readable(), items[1].is_readable());

    if front_ready {
      forward_message(frontend, backend, capture)?;
    }
    if back_ready {
      forward_message(backend, frontend, capture)?;
    }
  }
}

// Moves one complete message.
fn forward_message(from: &Socket, to: &Socket, capture: Option<&Socket>) -> Result<(), ZmqError> {
  loop {
    let msg = from.recv()?;
    let more = msg.is_more();
    let flags = if more { SendFlags::MORE } else { SendFlags::empty() };
    if let Some(capture) = capture {
      capture.send_with_flags(msg.clone(), flags)?;
    }
    to.send_with_flags(msg, flags)?;
    if !more {
      return Ok(());
    }
  }
}

/// The classic device layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
  /// Clients connect to a ROUTER, workers to a DEALER.
  Queue,
  /// Publishers connect to an XSUB, subscribers to an XPUB. Subscriptions
  /// travel upstream through the device.
  Forwarder,
  /// Producers connect to a PULL, consumers to a PUSH.
  Streamer,
}

impl DeviceKind {
  /// Frontend and backend socket types.
  pub fn socket_types(self) -> (SocketType, SocketType) {
    match self {
      DeviceKind::Queue => (SocketType::Router, SocketType::Dealer),
      DeviceKind::Forwarder => (SocketType::XSub, SocketType::XPub),
      DeviceKind::Streamer => (SocketType::Pull, SocketType::Push),
    }
  }
}

/// A frontend/backend socket pair bound and ready to run a [`proxy`].
#[derive(Debug)]
pub struct Device {
  kind: DeviceKind,
  frontend: Socket,
  backend: Socket,
}

impl Device {
  /// Creates both sockets and binds them.
  pub fn bind(ctx: &Context, kind: DeviceKind, frontend_endpoint: &str, backend_endpoint: &str) -> Result<Self, ZmqError> {
    let (front_type, back_type) = kind.socket_types();
    let frontend = ctx.socket(front_type)?;
    let backend = ctx.socket(back_type)?;
    frontend.bind(frontend_endpoint)?;
    backend.bind(backend_endpoint)?;
    Ok(Self {
      kind,
      frontend,
      backend,
    })
  }

  pub fn kind(&self) -> DeviceKind {
    self.kind
  }

  /// Frontend socket, for extra options or endpoints before running.
  pub fn frontend(&self) -> &Socket {
    &self.frontend
  }

  pub fn backend(&self) -> &Socket {
    &self.backend
  }

  /// Forwards messages until the context is terminated, then closes both
  /// sockets. Termination is the normal way to stop a device.
  pub fn run(self) -> Result<(), ZmqError> {
    match proxy(&self.frontend, &self.backend, None) {
      Err(ZmqError::Terminated) => {
        tracing::debug!(kind = ?self.kind, "Device stopped by context termination");
        Ok(())
      }
      other => other,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn device_layouts() {
    assert_eq!(DeviceKind::Queue.socket_types(), (SocketType::Router, SocketType::Dealer));
    assert_eq!(DeviceKind::Forwarder.socket_types(), (SocketType::XSub, SocketType::XPub));
    assert_eq!(DeviceKind::Streamer.socket_types(), (SocketType::Pull, SocketType::Push));
  }
}
