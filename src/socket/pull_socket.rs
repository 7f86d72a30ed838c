// src/socket/pull_socket.rs

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use crate::socket::patterns::{FairQueue, PipeMap};
use crate::socket::SocketPattern;

#[derive(Debug, Default)]
pub(crate) struct PullSocket {
  fq: FairQueue,
}

impl PullSocket {
  pub(crate) fn new() -> Self {
    Self::default()
  }
}

impl SocketPattern for PullSocket {
  fn xattach_pipe(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.fq.attach(pipe);
  }

  fn xread_activated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.fq.activated(pipe);
  }

  fn xterminated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.fq.terminated(pipe);
  }

  fn xrecv(&mut self, pipes: &mut PipeMap) -> Result<Msg, ZmqError> {
    self.fq.recv(pipes)
  }

  fn xhas_in(&mut self, pipes: &mut PipeMap) -> bool {
    self.fq.has_in(pipes)
  }
}
