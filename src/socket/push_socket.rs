// src/socket/push_socket.rs

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use crate::socket::patterns::{LoadBalancer, PipeMap};
use crate::socket::SocketPattern;

#[derive(Debug, Default)]
pub(crate) struct PushSocket {
  lb: LoadBalancer,
}

impl PushSocket {
  pub(crate) fn new() -> Self {
    Self::default()
  }
}

impl SocketPattern for PushSocket {
  fn xattach_pipe(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    // Nothing ever reads the inbound side, so there is no delimiter to wait for.
    if let Some(p) = pipes.get_mut(&pipe) {
      p.set_nodelay();
    }
    self.lb.attach(pipe);
  }

  fn xwrite_activated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.lb.activated(pipe);
  }

  fn xterminated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.lb.terminated(pipe);
  }

  fn xsend(&mut self, msg: &mut Msg, pipes: &mut PipeMap) -> Result<(), ZmqError> {
    self.lb.send(msg, pipes)
  }

  fn xhas_out(&mut self, pipes: &mut PipeMap) -> bool {
    self.lb.has_out(pipes)
  }
}
