// src/socket/patterns/load_balancer.rs

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use crate::socket::patterns::{swap_to, PipeMap};

/// Distributes messages to available pipes in a round-robin fashion.
///
/// Pipes in `pipes[..active]` are writable; a pipe that refuses a write is
/// swapped past the boundary until it reports `write_activated`.
#[derive(Debug, Default)]
pub(crate) struct LoadBalancer {
  pipes: Vec<PipeId>,
  active: usize,
  current: usize,
  // In the middle of a multi-part message.
  more: bool,
  // The pipe carrying the current message went away mid-message.
  dropping: bool,
}

impl LoadBalancer {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn attach(&mut self, pipe: PipeId) {
    self.pipes.push(pipe);
    self.activated(pipe);
  }

  pub(crate) fn terminated(&mut self, pipe: PipeId) {
    let Some(index) = self.pipes.iter().position(|p| *p == pipe) else {
      return;
    };
    // Remaining parts of the current message have nowhere to go.
    if index == self.current && self.more {
      self.dropping = true;
    }
    if index < self.active {
      self.active -= 1;
      self.pipes.swap(index, self.active);
      if self.current == self.active {
        self.current = 0;
      }
    }
    if let Some(index) = self.pipes.iter().position(|p| *p == pipe) {
      self.pipes.swap_remove(index);
    }
    tracing::trace!(pipe_id = pipe, "LoadBalancer removed pipe");
  }

  pub(crate) fn activated(&mut self, pipe: PipeId) {
    if swap_to(&mut self.pipes, pipe, self.active) {
      self.active += 1;
    }
  }

  /// Sends one part to the current pipe, taking it out of `msg`. On
  /// `WouldBlock` the message is left untouched.
  pub(crate) fn send(&mut self, msg: &mut Msg, pipes: &mut PipeMap) -> Result<(), ZmqError> {
    // Drop the tail of a message whose pipe disappeared.
    if self.dropping {
      self.more = msg.is_more();
      self.dropping = self.more;
      *msg = Msg::new();
      return Ok(());
    }

    let more = msg.is_more();
    while self.active > 0 {
      let id = self.pipes[self.current];
      if pipes.get_mut(&id).map_or(false, |p| p.write(msg)) {
        break;
      }
      let was_more = self.more;
      self.active -= 1;
      if self.current < self.active {
        self.pipes.swap(self.current, self.active);
      } else {
        self.current = 0;
      }
      // Only a closing pipe refuses a follow-up part: drop the rest.
      if was_more {
        self.more = more;
        self.dropping = more;
        *msg = Msg::new();
        return Ok(());
      }
    }

    if self.active == 0 {
      return Err(ZmqError::WouldBlock);
    }

    self.more = more;
    if !more {
      if let Some(pipe) = pipes.get_mut(&self.pipes[self.current]) {
        pipe.flush();
      }
      self.current = (self.current + 1) % self.active;
    }
    Ok(())
  }

  pub(crate) fn has_out(&mut self, pipes: &mut PipeMap) -> bool {
    // The rest of a multi-part message always goes through.
    if self.more {
      return true;
    }
    while self.active > 0 {
      let id = self.pipes[self.current];
      if pipes.get_mut(&id).map_or(false, |p| p.check_write()) {
        return true;
      }
      self.active -= 1;
      if self.current < self.active {
        self.pipes.swap(self.current, self.active);
      } else {
        self.current = 0;
      }
    }
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::MsgFlags;
  use crate::socket::patterns::tests::Harness;

  fn part(data: &'static [u8], more: bool) -> Msg {
    let mut m = Msg::from_static(data);
    if more {
      m.set_flags(MsgFlags::MORE);
    }
    m
  }

  #[test]
  fn round_robins_whole_messages() {
    let mut h = Harness::new();
    let mut lb = LoadBalancer::new();
    let a = h.add(0);
    let b = h.add(0);
    lb.attach(a);
    lb.attach(b);

    lb.send(&mut part(b"1a", true), &mut h.local).unwrap();
    lb.send(&mut part(b"1b", false), &mut h.local).unwrap();
    lb.send(&mut part(b"2", false), &mut h.local).unwrap();
    lb.send(&mut part(b"3", false), &mut h.local).unwrap();

    assert_eq!(h.drain(a), vec![b"1a".to_vec(), b"1b".to_vec(), b"3".to_vec()]);
    assert_eq!(h.drain(b), vec![b"2".to_vec()]);
  }

  #[test]
  fn full_pipes_are_skipped_until_reactivated() {
    let mut h = Harness::new();
    let mut lb = LoadBalancer::new();
    let a = h.add(1);
    let b = h.add(1);
    lb.attach(a);
    lb.attach(b);

    lb.send(&mut part(b"x", false), &mut h.local).unwrap();
    lb.send(&mut part(b"y", false), &mut h.local).unwrap();
    let mut z = part(b"z", false);
    assert!(matches!(lb.send(&mut z, &mut h.local), Err(ZmqError::WouldBlock)));
    assert_eq!(z.as_slice(), b"z");
    assert!(!lb.has_out(&mut h.local));

    // Reading one message reopens b; the socket forwards write_activated.
    assert_eq!(h.drain(b), vec![b"y".to_vec()]);
    lb.activated(b);
    assert!(lb.has_out(&mut h.local));
    lb.send(&mut z, &mut h.local).unwrap();
    assert_eq!(h.drain(b), vec![b"z".to_vec()]);
  }

  #[test]
  fn tail_of_message_is_dropped_when_pipe_goes_away() {
    let mut h = Harness::new();
    let mut lb = LoadBalancer::new();
    let a = h.add(0);
    let b = h.add(0);
    lb.attach(a);
    lb.attach(b);

    lb.send(&mut part(b"head", true), &mut h.local).unwrap();
    lb.terminated(a);
    lb.send(&mut part(b"mid", true), &mut h.local).unwrap();
    lb.send(&mut part(b"tail", false), &mut h.local).unwrap();
    lb.send(&mut part(b"next", false), &mut h.local).unwrap();
    assert_eq!(h.drain(b), vec![b"next".to_vec()]);
  }
}
