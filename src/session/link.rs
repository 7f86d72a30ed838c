// src/session/link.rs

use crate::engine::SessionPort;
use crate::error::ZmqError;
use crate::message::{Blob, Msg, MsgFlags};
use crate::protocol::zmtp::{MsgSink, MsgSource};
use crate::runtime::pipe::Pipe;
use crate::socket::options::SocketOptions;
use crate::socket::SocketType;

/// Where a REQ session is within an inbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyState {
  Identity,
  Bottom,
  Body,
}

/// The session's end of the socket pipe plus the per-connection identity
/// exchange. Reset on every reconnect.
#[derive(Debug)]
pub(crate) struct SessionLink {
  pub(crate) pipe: Option<Pipe>,
  // The last message pulled from the pipe had MORE set.
  incomplete_in: bool,
  identity: Blob,
  identity_sent: bool,
  identity_received: bool,
  recv_identity: bool,
  // Only REQ sessions validate the shape of replies.
  reply_state: Option<ReplyState>,
}

impl SessionLink {
  pub(crate) fn new(options: &SocketOptions) -> Self {
    Self {
      pipe: None,
      incomplete_in: false,
      identity: options.identity.clone(),
      identity_sent: false,
      identity_received: false,
      recv_identity: options.recv_identity,
      reply_state: (options.socket_type == SocketType::Req).then_some(ReplyState::Identity),
    }
  }

  /// Forgets the identity exchange of the previous connection.
  pub(crate) fn reset(&mut self) {
    self.identity_sent = false;
    self.identity_received = false;
    if self.reply_state.is_some() {
      self.reply_state = Some(ReplyState::Identity);
    }
  }

  /// Drops the partial message of a lost connection in both directions.
  pub(crate) fn clean_pipes(&mut self) {
    let Some(pipe) = self.pipe.as_mut() else {
      return;
    };
    // Inbound: the half-written message never reaches the socket.
    pipe.rollback();
    pipe.flush();
    // Outbound: skip the rest of the message that was being sent.
    while self.incomplete_in {
      if self.pull_msg().is_none() {
        break;
      }
    }
  }

  fn next_reply_state(&self, msg: &Msg) -> Result<Option<ReplyState>, ZmqError> {
    let Some(state) = self.reply_state else {
      return Ok(None);
    };
    let more = msg.is_more();
    let next = match state {
      ReplyState::Identity if !more => ReplyState::Bottom,
      ReplyState::Bottom if more && msg.size() == 0 => ReplyState::Body,
      ReplyState::Body if more => ReplyState::Body,
      ReplyState::Body => ReplyState::Bottom,
      _ => {
        return Err(ZmqError::ProtocolViolation(format!(
          "unexpected reply frame in state {:?}",
          state
        )))
      }
    };
    Ok(Some(next))
  }
}

impl MsgSource for SessionLink {
  fn pull_msg(&mut self) -> Option<Msg> {
    // Every connection starts with our identity.
    if !self.identity_sent {
      self.identity_sent = true;
      self.incomplete_in = false;
      return Some(Msg::from_bytes(self.identity.to_bytes()));
    }
    let msg = self.pipe.as_mut()?.read()?;
    self.incomplete_in = msg.is_more();
    Some(msg)
  }
}

impl MsgSink for SessionLink {
  fn push_msg(&mut self, mut msg: Msg) -> Result<(), ZmqError> {
    let next_state = self.next_reply_state(&msg)?;

    // The first message of a connection is the peer's identity.
    if !self.identity_received {
      msg.set_flags(MsgFlags::IDENTITY);
      if !self.recv_identity {
        self.identity_received = true;
        self.reply_state = next_state;
        return Ok(());
      }
    }

    let written = match self.pipe.as_mut() {
      Some(pipe) => pipe.write(&mut msg),
      None => false,
    };
    if written {
      self.identity_received = true;
      self.reply_state = next_state;
      Ok(())
    } else {
      Err(ZmqError::WouldBlock)
    }
  }
}

impl SessionPort for SessionLink {
  fn flush(&mut self) {
    if let Some(pipe) = self.pipe.as_mut() {
      pipe.flush();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::tests::TestSlots;
  use crate::runtime::command::Addr;
  use crate::runtime::pipe::pipepair;

  fn link_with_pipe(socket_type: SocketType) -> (TestSlots, SessionLink, Pipe) {
    let slots = TestSlots::new(4);
    let mut options = SocketOptions::new(socket_type);
    options.identity = Blob::from_static(b"me");
    let (session_end, socket_end) = pipepair(&slots.ctx, [Addr::new(2, 1), Addr::new(3, 2)], [0, 0], [true, true]);
    let mut link = SessionLink::new(&options);
    link.pipe = Some(session_end);
    (slots, link, socket_end)
  }

  fn part(data: &'static [u8], more: bool) -> Msg {
    let mut m = Msg::from_static(data);
    if more {
      m.set_flags(MsgFlags::MORE);
    }
    m
  }

  #[test]
  fn identity_goes_first_and_peer_identity_is_dropped_for_plain_sockets() {
    let (_slots, mut link, mut socket_end) = link_with_pipe(SocketType::Dealer);
    assert_eq!(link.pull_msg().unwrap().as_slice(), b"me");
    assert!(link.pull_msg().is_none());

    link.push_msg(Msg::from_static(b"peer")).unwrap();
    link.push_msg(Msg::from_static(b"payload")).unwrap();
    link.flush();
    let got = socket_end.read().unwrap();
    assert_eq!(got.as_slice(), b"payload");
    assert!(!got.is_identity());
  }

  #[test]
  fn router_sessions_forward_the_identity_flagged() {
    let (_slots, mut link, mut socket_end) = link_with_pipe(SocketType::Router);
    link.push_msg(Msg::from_static(b"peer")).unwrap();
    link.flush();
    let id = socket_end.read().unwrap();
    assert!(id.is_identity());
    assert_eq!(id.as_slice(), b"peer");
  }

  #[test]
  fn req_session_rejects_malformed_replies() {
    let (_slots, mut link, _socket_end) = link_with_pipe(SocketType::Req);
    link.push_msg(Msg::from_static(b"peer")).unwrap();
    link.push_msg(part(b"", true)).unwrap();
    link.push_msg(part(b"reply", false)).unwrap();
    // Missing empty delimiter.
    assert!(matches!(
      link.push_msg(part(b"oops", false)),
      Err(ZmqError::ProtocolViolation(_))
    ));

    link.reset();
    link.push_msg(Msg::from_static(b"peer")).unwrap();
    link.push_msg(part(b"", true)).unwrap();
  }

  #[test]
  fn clean_pipes_skips_rest_of_partial_outbound_message() {
    let (_slots, mut link, mut socket_end) = link_with_pipe(SocketType::Dealer);
    for m in [part(b"a1", true), part(b"a2", true), part(b"a3", false), part(b"b", false)] {
      let mut m = m;
      assert!(socket_end.write(&mut m));
    }
    socket_end.flush();

    link.pull_msg(); // identity
    assert_eq!(link.pull_msg().unwrap().as_slice(), b"a1");
    link.clean_pipes();
    link.reset();
    link.pull_msg(); // identity of the next connection
    assert_eq!(link.pull_msg().unwrap().as_slice(), b"b");
  }
}
