// src/socket/patterns/distributor.rs

use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use crate::socket::patterns::{swap_to, PipeMap};

/// Sends each message to a set of pipes.
///
/// The pipe list is split into three nested prefixes:
/// `pipes[..matching]` receive the current message, `pipes[..active]` are
/// writable and not in the middle of a message, `pipes[..eligible]` are
/// writable but may have joined mid-message.
#[derive(Debug, Default)]
pub(crate) struct Distributor {
  pipes: Vec<PipeId>,
  matching: usize,
  active: usize,
  eligible: usize,
  more: bool,
}

impl Distributor {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn attach(&mut self, pipe: PipeId) {
    self.pipes.push(pipe);
    let last = self.pipes.len() - 1;
    // A pipe joining mid-message only starts with the next one.
    if self.more {
      self.pipes.swap(self.eligible, last);
      self.eligible += 1;
    } else {
      self.pipes.swap(self.active, last);
      self.active += 1;
      self.eligible += 1;
    }
  }

  /// Marks `pipe` as a recipient of the current message.
  pub(crate) fn match_pipe(&mut self, pipe: PipeId) {
    let Some(index) = self.pipes.iter().position(|p| *p == pipe) else {
      return;
    };
    // Already matching, or not writable.
    if index < self.matching || index >= self.eligible {
      return;
    }
    self.pipes.swap(index, self.matching);
    self.matching += 1;
  }

  pub(crate) fn unmatch(&mut self) {
    self.matching = 0;
  }

  pub(crate) fn terminated(&mut self, pipe: PipeId) {
    let index = |pipes: &[PipeId]| pipes.iter().position(|p| *p == pipe);
    let Some(i) = index(&self.pipes) else {
      return;
    };
    if i < self.matching {
      self.pipes.swap(i, self.matching - 1);
      self.matching -= 1;
    }
    if let Some(i) = index(&self.pipes).filter(|i| *i < self.active) {
      self.pipes.swap(i, self.active - 1);
      self.active -= 1;
    }
    if let Some(i) = index(&self.pipes).filter(|i| *i < self.eligible) {
      self.pipes.swap(i, self.eligible - 1);
      self.eligible -= 1;
    }
    if let Some(i) = index(&self.pipes) {
      self.pipes.swap_remove(i);
    }
  }

  pub(crate) fn activated(&mut self, pipe: PipeId) {
    if !swap_to(&mut self.pipes, pipe, self.eligible) {
      return;
    }
    self.eligible += 1;
    // Outside a message the pipe is usable right away.
    if !self.more {
      self.pipes.swap(self.eligible - 1, self.active);
      self.active += 1;
    }
  }

  pub(crate) fn send_to_all(&mut self, msg: Msg, pipes: &mut PipeMap) {
    self.matching = self.active;
    self.send_to_matching(msg, pipes);
  }

  pub(crate) fn send_to_matching(&mut self, msg: Msg, pipes: &mut PipeMap) {
    let msg_more = msg.is_more();
    self.distribute(msg, pipes);
    // Pipes that joined during the message take part from the next one.
    if !msg_more {
      self.active = self.eligible;
    }
    self.more = msg_more;
  }

  fn distribute(&mut self, msg: Msg, pipes: &mut PipeMap) {
    // Without recipients the message is dropped.
    let mut i = 0;
    while i < self.matching {
      let id = self.pipes[i];
      if self.write(id, msg.clone(), pipes) {
        i += 1;
      }
    }
  }

  // Writes to one pipe. A full pipe leaves all three prefixes.
  fn write(&mut self, id: PipeId, mut msg: Msg, pipes: &mut PipeMap) -> bool {
    let more = msg.is_more();
    let written = pipes.get_mut(&id).map_or(false, |p| p.write(&mut msg));
    if !written {
      swap_to(&mut self.pipes, id, self.matching - 1);
      self.matching -= 1;
      swap_to(&mut self.pipes, id, self.active - 1);
      self.active -= 1;
      self.pipes.swap(self.active, self.eligible - 1);
      self.eligible -= 1;
      return false;
    }
    if !more {
      if let Some(pipe) = pipes.get_mut(&id) {
        pipe.flush();
      }
    }
    true
  }

  pub(crate) fn has_out(&self) -> bool {
    true
  }
}
