// src/socket/mod.rs

pub(crate) mod core;
pub mod events;
pub mod options;
pub(crate) mod patterns;
pub mod poll;
pub mod types;

mod dealer_socket;
mod pair_socket;
mod pub_socket;
mod pull_socket;
mod push_socket;
mod rep_socket;
mod req_socket;
mod router_socket;
mod sub_socket;
mod xpub_socket;
mod xsub_socket;

pub use types::{Socket, SocketType};

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use dealer_socket::DealerSocket;
use pair_socket::PairSocket;
use patterns::PipeMap;
use pub_socket::PubSocket;
use pull_socket::PullSocket;
use push_socket::PushSocket;
use rep_socket::RepSocket;
use req_socket::ReqSocket;
use router_socket::RouterSocket;
use sub_socket::SubSocket;
use xpub_socket::XPubSocket;
use xsub_socket::XSubSocket;

/// Defines the pattern logic for a specific socket type.
///
/// `SocketBase` owns the pipes and calls these hooks with its [`PipeMap`].
/// A successful `xsend` takes the message out of `msg`; on any error the
/// message is left for the caller to retry.
pub(crate) trait SocketPattern {
  /// A new pipe was attached to the socket.
  fn xattach_pipe(&mut self, pipe: PipeId, pipes: &mut PipeMap);

  /// Applies a pattern-specific option. Returns `Ok(false)` for options the
  /// pattern does not know, which then go to the generic option table.
  fn xsetsockopt(&mut self, _option: i32, _value: &[u8], _pipes: &mut PipeMap) -> Result<bool, ZmqError> {
    Ok(false)
  }

  fn xsend(&mut self, _msg: &mut Msg, _pipes: &mut PipeMap) -> Result<(), ZmqError> {
    Err(ZmqError::UnsupportedOperation("send"))
  }

  fn xrecv(&mut self, _pipes: &mut PipeMap) -> Result<Msg, ZmqError> {
    Err(ZmqError::UnsupportedOperation("recv"))
  }

  fn xhas_in(&mut self, _pipes: &mut PipeMap) -> bool {
    false
  }

  fn xhas_out(&mut self, _pipes: &mut PipeMap) -> bool {
    false
  }

  fn xread_activated(&mut self, _pipe: PipeId, _pipes: &mut PipeMap) {}

  fn xwrite_activated(&mut self, _pipe: PipeId, _pipes: &mut PipeMap) {}

  fn xhiccuped(&mut self, _pipe: PipeId, _pipes: &mut PipeMap) {}

  /// The pipe is gone; it is no longer in `pipes`.
  fn xterminated(&mut self, pipe: PipeId, pipes: &mut PipeMap);
}

/// Pattern state of a socket, one variant per socket type.
pub(crate) enum Pattern {
  Pair(PairSocket),
  Pub(PubSocket),
  Sub(SubSocket),
  Req(ReqSocket),
  Rep(RepSocket),
  Dealer(DealerSocket),
  Router(RouterSocket),
  Pull(PullSocket),
  Push(PushSocket),
  XPub(XPubSocket),
  XSub(XSubSocket),
}

impl Pattern {
  pub(crate) fn new(socket_type: SocketType) -> Self {
    match socket_type {
      SocketType::Pair => Pattern::Pair(PairSocket::new()),
      SocketType::Pub => Pattern::Pub(PubSocket::new()),
      SocketType::Sub => Pattern::Sub(SubSocket::new()),
      SocketType::Req => Pattern::Req(ReqSocket::new()),
      SocketType::Rep => Pattern::Rep(RepSocket::new()),
      SocketType::Dealer => Pattern::Dealer(DealerSocket::new()),
      SocketType::Router => Pattern::Router(RouterSocket::new()),
      SocketType::Pull => Pattern::Pull(PullSocket::new()),
      SocketType::Push => Pattern::Push(PushSocket::new()),
      SocketType::XPub => Pattern::XPub(XPubSocket::new(true)),
      SocketType::XSub => Pattern::XSub(XSubSocket::new()),
    }
  }
}

// Runs `$body` with `$p` bound to the state of whichever socket type this is.
macro_rules! with_pattern {
  ($pattern:expr, $p:ident => $body:expr) => {
    match $pattern {
      Pattern::Pair($p) => $body,
      Pattern::Pub($p) => $body,
      Pattern::Sub($p) => $body,
      Pattern::Req($p) => $body,
      Pattern::Rep($p) => $body,
      Pattern::Dealer($p) => $body,
      Pattern::Router($p) => $body,
      Pattern::Pull($p) => $body,
      Pattern::Push($p) => $body,
      Pattern::XPub($p) => $body,
      Pattern::XSub($p) => $body,
    }
  };
}

impl SocketPattern for Pattern {
  fn xattach_pipe(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    with_pattern!(self, p => p.xattach_pipe(pipe, pipes))
  }

  fn xsetsockopt(&mut self, option: i32, value: &[u8], pipes: &mut PipeMap) -> Result<bool, ZmqError> {
    with_pattern!(self, p => p.xsetsockopt(option, value, pipes))
  }

  fn xsend(&mut self, msg: &mut Msg, pipes: &mut PipeMap) -> Result<(), ZmqError> {
    with_pattern!(self, p => p.xsend(msg, pipes))
  }

  fn xrecv(&mut self, pipes: &mut PipeMap) -> Result<Msg, ZmqError> {
    with_pattern!(self, p => p.xrecv(pipes))
  }

  fn xhas_in(&mut self, pipes: &mut PipeMap) -> bool {
    with_pattern!(self, p => p.xhas_in(pipes))
  }

  fn xhas_out(&mut self, pipes: &mut PipeMap) -> bool {
    with_pattern!(self, p => p.xhas_out(pipes))
  }

  fn xread_activated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    with_pattern!(self, p => p.xread_activated(pipe, pipes))
  }

  fn xwrite_activated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    with_pattern!(self, p => p.xwrite_activated(pipe, pipes))
  }

  fn xhiccuped(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    with_pattern!(self, p => p.xhiccuped(pipe, pipes))
  }

  fn xterminated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    with_pattern!(self, p => p.xterminated(pipe, pipes))
  }
}
