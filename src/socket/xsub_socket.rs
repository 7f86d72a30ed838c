// src/socket/xsub_socket.rs

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use crate::socket::patterns::{Distributor, FairQueue, PipeMap, Trie};
use crate::socket::SocketPattern;

/// Subscriber side of pub-sub. Subscriptions are sent upstream as messages
/// `[1|0] + prefix` and inbound messages are filtered against them.
pub(crate) struct XSubSocket {
  fq: FairQueue,
  dist: Distributor,
  subscriptions: Trie,
  // A matching message read ahead by `xhas_in`.
  message: Option<Msg>,
  // In the middle of delivering a multi-part message.
  more: bool,
  // In the middle of sending a multi-part message upstream.
  more_out: bool,
}

impl XSubSocket {
  pub(crate) fn new() -> Self {
    Self {
      fq: FairQueue::new(),
      dist: Distributor::new(),
      subscriptions: Trie::new(),
      message: None,
      more: false,
      more_out: false,
    }
  }

  // Replays every current subscription into one pipe.
  fn send_subscriptions(&self, pipe: PipeId, pipes: &mut PipeMap) {
    let Some(p) = pipes.get_mut(&pipe) else {
      return;
    };
    self.subscriptions.apply(|prefix| {
      let mut sub = Vec::with_capacity(prefix.len() + 1);
      sub.push(1);
      sub.extend_from_slice(prefix);
      // A full pipe loses the subscription, same as a subscribe call would.
      if !p.write(&mut Msg::from_vec(sub)) {
        tracing::debug!(pipe_id = pipe, "Dropping subscription on full pipe");
      }
    });
    p.flush();
  }

  fn matches(&self, msg: &Msg) -> bool {
    self.subscriptions.check(msg.as_slice())
  }
}

impl std::fmt::Debug for XSubSocket {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("XSubSocket")
      .field("fq", &self.fq)
      .field("dist", &self.dist)
      .field("more", &self.more)
      .field("more_out", &self.more_out)
      .finish()
  }
}

impl SocketPattern for XSubSocket {
  fn xattach_pipe(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.fq.attach(pipe);
    self.dist.attach(pipe);
    self.send_subscriptions(pipe, pipes);
  }

  fn xread_activated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.fq.activated(pipe);
  }

  fn xwrite_activated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.dist.activated(pipe);
  }

  fn xhiccuped(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    // The reconnected publisher starts with no subscriptions.
    self.send_subscriptions(pipe, pipes);
  }

  fn xterminated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.fq.terminated(pipe);
    self.dist.terminated(pipe);
  }

  fn xsend(&mut self, msg: &mut Msg, pipes: &mut PipeMap) -> Result<(), ZmqError> {
    let first_part = !self.more_out;
    self.more_out = msg.is_more();
    // Only changes in the subscription set travel upstream. Later parts of a
    // message are payload, whatever their first byte.
    let forward = match msg.as_slice().split_first() {
      Some((&1, prefix)) if first_part => self.subscriptions.add(prefix),
      Some((&0, prefix)) if first_part => self.subscriptions.rm(prefix),
      _ => true,
    };
    let msg = std::mem::take(msg);
    if forward {
      self.dist.send_to_all(msg, pipes);
    }
    Ok(())
  }

  fn xrecv(&mut self, pipes: &mut PipeMap) -> Result<Msg, ZmqError> {
    if let Some(msg) = self.message.take() {
      self.more = msg.is_more();
      return Ok(msg);
    }

    loop {
      let mut msg = self.fq.recv(pipes)?;
      // Later parts belong to a message that already matched.
      if self.more || self.matches(&msg) {
        self.more = msg.is_more();
        return Ok(msg);
      }
      while msg.is_more() {
        msg = self.fq.recv(pipes)?;
      }
    }
  }

  fn xhas_in(&mut self, pipes: &mut PipeMap) -> bool {
    if self.more || self.message.is_some() {
      return true;
    }
    loop {
      let Ok(mut msg) = self.fq.recv(pipes) else {
        return false;
      };
      if self.matches(&msg) {
        self.message = Some(msg);
        return true;
      }
      while msg.is_more() {
        match self.fq.recv(pipes) {
          Ok(next) => msg = next,
          Err(_) => return false,
        }
      }
    }
  }

  fn xhas_out(&mut self, _pipes: &mut PipeMap) -> bool {
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::MsgFlags;
  use crate::socket::patterns::tests::Harness;

  #[test]
  fn subscriptions_go_upstream_once() {
    let mut h = Harness::new();
    let mut xsub = XSubSocket::new();
    let a = h.add(0);
    xsub.xattach_pipe(a, &mut h.local);

    xsub.xsend(&mut Msg::from_static(b"\x01abc"), &mut h.local).unwrap();
    xsub.xsend(&mut Msg::from_static(b"\x01abc"), &mut h.local).unwrap();
    xsub.xsend(&mut Msg::from_static(b"\x00abc"), &mut h.local).unwrap();
    xsub.xsend(&mut Msg::from_static(b"\x00abc"), &mut h.local).unwrap();
    assert_eq!(h.drain(a), vec![b"\x01abc".to_vec(), b"\x00abc".to_vec()]);
  }

  #[test]
  fn later_parts_are_not_subscriptions() {
    let mut h = Harness::new();
    let mut xsub = XSubSocket::new();
    let a = h.add(0);
    xsub.xattach_pipe(a, &mut h.local);

    let mut head = Msg::from_static(b"x");
    head.set_flags(MsgFlags::MORE);
    xsub.xsend(&mut head, &mut h.local).unwrap();
    xsub.xsend(&mut Msg::from_static(b"\x01abc"), &mut h.local).unwrap();
    assert!(!xsub.subscriptions.check(b"abc"));
    assert_eq!(h.drain(a), vec![b"x".to_vec(), b"\x01abc".to_vec()]);

    // The next message starts fresh.
    xsub.xsend(&mut Msg::from_static(b"\x01abc"), &mut h.local).unwrap();
    assert!(xsub.subscriptions.check(b"abc"));
  }

  #[test]
  fn new_pipes_receive_existing_subscriptions() {
    let mut h = Harness::new();
    let mut xsub = XSubSocket::new();
    xsub.xsend(&mut Msg::from_static(b"\x01x"), &mut h.local).unwrap();
    let a = h.add(0);
    xsub.xattach_pipe(a, &mut h.local);
    assert_eq!(h.drain(a), vec![b"\x01x".to_vec()]);
  }

  #[test]
  fn inbound_messages_are_filtered() {
    let mut h = Harness::new();
    let mut xsub = XSubSocket::new();
    let a = h.add(0);
    xsub.xattach_pipe(a, &mut h.local);
    xsub.xsend(&mut Msg::from_static(b"\x01keep"), &mut h.local).unwrap();

    h.feed(a, &[b"drop", b"drop-tail"]);
    h.feed(a, &[b"keep-1", b"tail"]);
    h.feed(a, &[b"keep-2"]);

    assert!(xsub.xhas_in(&mut h.local));
    assert_eq!(xsub.xrecv(&mut h.local).unwrap().as_slice(), b"keep-1");
    assert_eq!(xsub.xrecv(&mut h.local).unwrap().as_slice(), b"tail");
    assert_eq!(xsub.xrecv(&mut h.local).unwrap().as_slice(), b"keep-2");
    assert!(matches!(xsub.xrecv(&mut h.local), Err(ZmqError::WouldBlock)));
  }
}
