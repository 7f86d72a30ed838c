// src/socket/pub_socket.rs

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use crate::socket::patterns::PipeMap;
use crate::socket::xpub_socket::XPubSocket;
use crate::socket::SocketPattern;

/// XPUB that keeps subscriptions to itself: no `recv`, no `XPUB_VERBOSE`.
#[derive(Debug)]
pub(crate) struct PubSocket {
  xpub: XPubSocket,
}

impl PubSocket {
  pub(crate) fn new() -> Self {
    Self {
      xpub: XPubSocket::new(false),
    }
  }
}

impl SocketPattern for PubSocket {
  fn xattach_pipe(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.xpub.xattach_pipe(pipe, pipes);
  }

  fn xread_activated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.xpub.xread_activated(pipe, pipes);
  }

  fn xwrite_activated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.xpub.xwrite_activated(pipe, pipes);
  }

  fn xterminated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.xpub.xterminated(pipe, pipes);
  }

  fn xsend(&mut self, msg: &mut Msg, pipes: &mut PipeMap) -> Result<(), ZmqError> {
    self.xpub.xsend(msg, pipes)
  }

  fn xhas_out(&mut self, pipes: &mut PipeMap) -> bool {
    self.xpub.xhas_out(pipes)
  }
}
