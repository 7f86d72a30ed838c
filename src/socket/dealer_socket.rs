// src/socket/dealer_socket.rs

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use crate::socket::patterns::{FairQueue, LoadBalancer, PipeMap};
use crate::socket::SocketPattern;

/// Load-balances outgoing messages and fair-queues incoming ones, without
/// touching the envelope.
#[derive(Debug, Default)]
pub(crate) struct DealerSocket {
  fq: FairQueue,
  lb: LoadBalancer,
}

impl DealerSocket {
  pub(crate) fn new() -> Self {
    Self::default()
  }
}

impl SocketPattern for DealerSocket {
  fn xattach_pipe(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.fq.attach(pipe);
    self.lb.attach(pipe);
  }

  fn xread_activated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.fq.activated(pipe);
  }

  fn xwrite_activated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.lb.activated(pipe);
  }

  fn xterminated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.fq.terminated(pipe);
    self.lb.terminated(pipe);
  }

  fn xsend(&mut self, msg: &mut Msg, pipes: &mut PipeMap) -> Result<(), ZmqError> {
    self.lb.send(msg, pipes)
  }

  fn xrecv(&mut self, pipes: &mut PipeMap) -> Result<Msg, ZmqError> {
    self.fq.recv(pipes)
  }

  fn xhas_in(&mut self, pipes: &mut PipeMap) -> bool {
    self.fq.has_in(pipes)
  }

  fn xhas_out(&mut self, pipes: &mut PipeMap) -> bool {
    self.lb.has_out(pipes)
  }
}
