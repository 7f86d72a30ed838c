// src/socket/patterns/fair_queue.rs

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use crate::socket::patterns::{swap_to, PipeMap};

/// Receives from attached pipes in turn, one whole message per pipe.
///
/// `pipes[..active]` may have messages; a pipe that yields nothing is swapped
/// past the boundary until it reports `read_activated`.
#[derive(Debug, Default)]
pub(crate) struct FairQueue {
  pipes: Vec<PipeId>,
  active: usize,
  current: usize,
  // In the middle of a multi-part message: stay on the current pipe.
  more: bool,
}

impl FairQueue {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn attach(&mut self, pipe: PipeId) {
    self.pipes.push(pipe);
    let last = self.pipes.len() - 1;
    self.pipes.swap(self.active, last);
    self.active += 1;
  }

  pub(crate) fn terminated(&mut self, pipe: PipeId) {
    let Some(index) = self.pipes.iter().position(|p| *p == pipe) else {
      return;
    };
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
    tracing::trace!(pipe_id = pipe, "FairQueue removed pipe");
  }

  pub(crate) fn activated(&mut self, pipe: PipeId) {
    if swap_to(&mut self.pipes, pipe, self.active) {
      self.active += 1;
    }
  }

  pub(crate) fn recv(&mut self, pipes: &mut PipeMap) -> Result<Msg, ZmqError> {
    self.recv_pipe(pipes).map(|(msg, _)| msg)
  }

  /// Like [`FairQueue::recv`], also reporting which pipe the part came from.
  pub(crate) fn recv_pipe(&mut self, pipes: &mut PipeMap) -> Result<(Msg, PipeId), ZmqError> {
    while self.active > 0 {
      let id = self.pipes[self.current];
      if let Some(msg) = pipes.get_mut(&id).and_then(|p| p.read()) {
        self.more = msg.is_more();
        if !self.more {
          self.current = (self.current + 1) % self.active;
        }
        return Ok((msg, id));
      }
      // Parts of one message are published together, so a started message
      // can only be cut short by its pipe closing.
      if self.more {
        tracing::debug!(pipe_id = id, "Pipe closed in the middle of a message");
        self.more = false;
      }
      self.active -= 1;
      self.pipes.swap(self.current, self.active);
      if self.current == self.active {
        self.current = 0;
      }
    }
    Err(ZmqError::WouldBlock)
  }

  pub(crate) fn has_in(&mut self, pipes: &mut PipeMap) -> bool {
    if self.more {
      return true;
    }
    while self.active > 0 {
      let id = self.pipes[self.current];
      if pipes.get_mut(&id).map_or(false, |p| p.check_read()) {
        return true;
      }
      self.active -= 1;
      self.pipes.swap(self.current, self.active);
      if self.current == self.active {
        self.current = 0;
      }
    }
    false
  }
}
