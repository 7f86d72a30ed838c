// src/socket/req_socket.rs

use crate::error::ZmqError;
use crate::message::{Msg, MsgFlags};
use crate::runtime::pipe::PipeId;
use crate::socket::dealer_socket::DealerSocket;
use crate::socket::patterns::PipeMap;
use crate::socket::SocketPattern;

/// A DEALER that wraps each request in an empty delimiter frame and enforces
/// strict request/reply alternation.
#[derive(Debug)]
pub(crate) struct ReqSocket {
  dealer: DealerSocket,
  // A request went out and its reply has not been read completely.
  receiving_reply: bool,
  // The next part sent or received starts a new message.
  message_begins: bool,
}

impl ReqSocket {
  pub(crate) fn new() -> Self {
    Self {
      dealer: DealerSocket::new(),
      receiving_reply: false,
      message_begins: true,
    }
  }
}

impl SocketPattern for ReqSocket {
  fn xattach_pipe(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.dealer.xattach_pipe(pipe, pipes);
  }

  fn xread_activated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.dealer.xread_activated(pipe, pipes);
  }

  fn xwrite_activated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.dealer.xwrite_activated(pipe, pipes);
  }

  fn xterminated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.dealer.xterminated(pipe, pipes);
  }

  fn xsend(&mut self, msg: &mut Msg, pipes: &mut PipeMap) -> Result<(), ZmqError> {
    if self.receiving_reply {
      return Err(ZmqError::InvalidState("REQ must receive the reply before sending again"));
    }

    if self.message_begins {
      let mut bottom = Msg::new();
      bottom.set_flags(MsgFlags::MORE);
      self.dealer.xsend(&mut bottom, pipes)?;
      self.message_begins = false;
    }

    let more = msg.is_more();
    self.dealer.xsend(msg, pipes)?;

    if !more {
      self.receiving_reply = true;
      self.message_begins = true;
    }
    Ok(())
  }

  fn xrecv(&mut self, pipes: &mut PipeMap) -> Result<Msg, ZmqError> {
    if !self.receiving_reply {
      return Err(ZmqError::InvalidState("REQ must send a request before receiving"));
    }

    // Replies start with the empty delimiter; anything else is discarded.
    if self.message_begins {
      let mut msg = self.dealer.xrecv(pipes)?;
      if !(msg.is_more() && msg.size() == 0) {
        tracing::debug!("REQ dropping malformed reply");
        while msg.is_more() {
          msg = self.dealer.xrecv(pipes)?;
        }
        return Err(ZmqError::WouldBlock);
      }
      self.message_begins = false;
    }

    let msg = self.dealer.xrecv(pipes)?;
    if !msg.is_more() {
      self.receiving_reply = false;
      self.message_begins = true;
    }
    Ok(msg)
  }

  fn xhas_in(&mut self, pipes: &mut PipeMap) -> bool {
    self.receiving_reply && self.dealer.xhas_in(pipes)
  }

  fn xhas_out(&mut self, pipes: &mut PipeMap) -> bool {
    !self.receiving_reply && self.dealer.xhas_out(pipes)
  }
}
