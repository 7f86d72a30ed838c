// src/socket/sub_socket.rs

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use crate::socket::options::{SUBSCRIBE, UNSUBSCRIBE};
use crate::socket::patterns::PipeMap;
use crate::socket::xsub_socket::XSubSocket;
use crate::socket::SocketPattern;

/// XSUB driven by the `SUBSCRIBE`/`UNSUBSCRIBE` options instead of sends.
#[derive(Debug)]
pub(crate) struct SubSocket {
  xsub: XSubSocket,
}

impl SubSocket {
  pub(crate) fn new() -> Self {
    Self { xsub: XSubSocket::new() }
  }
}

impl SocketPattern for SubSocket {
  fn xattach_pipe(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.xsub.xattach_pipe(pipe, pipes);
  }

  fn xsetsockopt(&mut self, option: i32, value: &[u8], pipes: &mut PipeMap) -> Result<bool, ZmqError> {
    let kind = match option {
      SUBSCRIBE => 1u8,
      UNSUBSCRIBE => 0u8,
      _ => return Ok(false),
    };
    let mut sub = Vec::with_capacity(value.len() + 1);
    sub.push(kind);
    sub.extend_from_slice(value);
    self.xsub.xsend(&mut Msg::from_vec(sub), pipes)?;
    Ok(true)
  }

  fn xrecv(&mut self, pipes: &mut PipeMap) -> Result<Msg, ZmqError> {
    self.xsub.xrecv(pipes)
  }

  fn xhas_in(&mut self, pipes: &mut PipeMap) -> bool {
    self.xsub.xhas_in(pipes)
  }

  fn xread_activated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.xsub.xread_activated(pipe, pipes);
  }

  fn xwrite_activated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.xsub.xwrite_activated(pipe, pipes);
  }

  fn xhiccuped(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.xsub.xhiccuped(pipe, pipes);
  }

  fn xterminated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.xsub.xterminated(pipe, pipes);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::socket::patterns::tests::Harness;

  #[test]
  fn subscribe_option_sends_subscription_and_filters() {
    let mut h = Harness::new();
    let mut sub = SubSocket::new();
    let a = h.add(0);
    sub.xattach_pipe(a, &mut h.local);
    assert!(sub.xsetsockopt(SUBSCRIBE, b"A", &mut h.local).unwrap());
    assert!(!sub.xsetsockopt(crate::socket::options::LINGER, b"", &mut h.local).unwrap());
    assert_eq!(h.drain(a), vec![b"\x01A".to_vec()]);

    h.feed(a, &[b"B-ignored"]);
    h.feed(a, &[b"A-wanted"]);
    assert_eq!(sub.xrecv(&mut h.local).unwrap().as_slice(), b"A-wanted");
    assert!(matches!(sub.xsend(&mut Msg::new(), &mut h.local), Err(ZmqError::UnsupportedOperation(_))));

    assert!(sub.xsetsockopt(UNSUBSCRIBE, b"A", &mut h.local).unwrap());
    assert_eq!(h.drain(a), vec![b"\x00A".to_vec()]);
  }
}
