// src/socket/rep_socket.rs

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use crate::socket::patterns::PipeMap;
use crate::socket::router_socket::RouterSocket;
use crate::socket::SocketPattern;

/// A ROUTER that hides the routing envelope: the envelope of each request
/// is written back into the reply pipe before the user sees the request.
#[derive(Debug)]
pub(crate) struct RepSocket {
  router: RouterSocket,
  // A request was read completely and its reply is not finished yet.
  sending_reply: bool,
  // The next part received starts a new request.
  request_begins: bool,
}

impl RepSocket {
  pub(crate) fn new() -> Self {
    Self {
      router: RouterSocket::new(),
      sending_reply: false,
      request_begins: true,
    }
  }
}

impl SocketPattern for RepSocket {
  fn xattach_pipe(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.router.xattach_pipe(pipe, pipes);
  }

  fn xread_activated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.router.xread_activated(pipe, pipes);
  }

  fn xwrite_activated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.router.xwrite_activated(pipe, pipes);
  }

  fn xterminated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.router.xterminated(pipe, pipes);
  }

  fn xsend(&mut self, msg: &mut Msg, pipes: &mut PipeMap) -> Result<(), ZmqError> {
    if !self.sending_reply {
      return Err(ZmqError::InvalidState("REP must receive a request before replying"));
    }
    let more = msg.is_more();
    self.router.xsend(msg, pipes)?;
    if !more {
      self.sending_reply = false;
    }
    Ok(())
  }

  fn xrecv(&mut self, pipes: &mut PipeMap) -> Result<Msg, ZmqError> {
    if self.sending_reply {
      return Err(ZmqError::InvalidState("REP must send the reply before receiving again"));
    }

    // Copy the envelope, up to and including the empty delimiter, into the
    // reply pipe.
    if self.request_begins {
      loop {
        let mut msg = self.router.xrecv(pipes)?;
        if msg.is_more() {
          let bottom = msg.size() == 0;
          self.router.xsend(&mut msg, pipes)?;
          if bottom {
            break;
          }
        } else {
          // No delimiter before the end: drop what was routed so far.
          tracing::debug!("REP dropping request without envelope delimiter");
          self.router.rollback(pipes);
        }
      }
      self.request_begins = false;
    }

    let msg = self.router.xrecv(pipes)?;
    if !msg.is_more() {
      self.sending_reply = true;
      self.request_begins = true;
    }
    Ok(msg)
  }

  fn xhas_in(&mut self, pipes: &mut PipeMap) -> bool {
    !self.sending_reply && self.router.xhas_in(pipes)
  }

  fn xhas_out(&mut self, pipes: &mut PipeMap) -> bool {
    self.sending_reply && self.router.xhas_out(pipes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::MsgFlags;
  use crate::socket::patterns::tests::Harness;

  fn attach_peer(h: &mut Harness, rep: &mut RepSocket, id: &'static [u8]) -> PipeId {
    let pipe = h.add(0);
    let peer = h.peer_of(pipe);
    let mut msg = Msg::from_static(id);
    msg.set_flags(MsgFlags::IDENTITY);
    let p = h.peers.get_mut(&peer).unwrap();
    assert!(p.write(&mut msg));
    p.flush();
    h.pump();
    rep.xattach_pipe(pipe, &mut h.local);
    pipe
  }

  #[test]
  fn reply_reuses_request_envelope() {
    let mut h = Harness::new();
    let mut rep = RepSocket::new();
    let a = attach_peer(&mut h, &mut rep, b"client");

    h.feed(a, &[b"hop", b"", b"request"]);
    assert_eq!(rep.xrecv(&mut h.local).unwrap().as_slice(), b"request");
    rep.xsend(&mut Msg::from_static(b"reply"), &mut h.local).unwrap();
    assert_eq!(h.drain(a), vec![b"hop".to_vec(), b"".to_vec(), b"reply".to_vec()]);
  }

  #[test]
  fn alternation_is_enforced() {
    let mut h = Harness::new();
    let mut rep = RepSocket::new();
    let a = attach_peer(&mut h, &mut rep, b"client");
    assert!(matches!(
      rep.xsend(&mut Msg::from_static(b"early"), &mut h.local),
      Err(ZmqError::InvalidState(_))
    ));
    h.feed(a, &[b"", b"q"]);
    rep.xrecv(&mut h.local).unwrap();
    assert!(matches!(rep.xrecv(&mut h.local), Err(ZmqError::InvalidState(_))));
  }

  #[test]
  fn request_without_delimiter_is_skipped() {
    let mut h = Harness::new();
    let mut rep = RepSocket::new();
    let a = attach_peer(&mut h, &mut rep, b"client");
    h.feed(a, &[b"garbage"]);
    h.feed(a, &[b"", b"good"]);
    assert_eq!(rep.xrecv(&mut h.local).unwrap().as_slice(), b"good");
    rep.xsend(&mut Msg::from_static(b"ok"), &mut h.local).unwrap();
    assert_eq!(h.drain(a), vec![b"".to_vec(), b"ok".to_vec()]);
  }
}
