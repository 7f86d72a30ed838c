// src/socket/pair_socket.rs

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use crate::socket::patterns::PipeMap;
use crate::socket::SocketPattern;

/// Exclusive pair: exactly one peer at a time.
#[derive(Debug, Default)]
pub(crate) struct PairSocket {
  pipe: Option<PipeId>,
}

impl PairSocket {
  pub(crate) fn new() -> Self {
    Self::default()
  }
}

impl SocketPattern for PairSocket {
  fn xattach_pipe(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    if self.pipe.is_none() {
      self.pipe = Some(pipe);
      return;
    }
    // Only one peer is accepted; later ones are turned away.
    tracing::debug!(pipe_id = pipe, "PAIR already connected, rejecting pipe");
    if let Some(p) = pipes.get_mut(&pipe) {
      p.terminate(false);
    }
  }

  fn xterminated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    if self.pipe == Some(pipe) {
      self.pipe = None;
    }
  }

  fn xsend(&mut self, msg: &mut Msg, pipes: &mut PipeMap) -> Result<(), ZmqError> {
    let Some(pipe) = self.pipe.and_then(|id| pipes.get_mut(&id)) else {
      return Err(ZmqError::WouldBlock);
    };
    let more = msg.is_more();
    if !pipe.write(msg) {
      return Err(ZmqError::WouldBlock);
    }
    if !more {
      pipe.flush();
    }
    Ok(())
  }

  fn xrecv(&mut self, pipes: &mut PipeMap) -> Result<Msg, ZmqError> {
    self
      .pipe
      .and_then(|id| pipes.get_mut(&id))
      .and_then(|p| p.read())
      .ok_or(ZmqError::WouldBlock)
  }

  fn xhas_in(&mut self, pipes: &mut PipeMap) -> bool {
    self.pipe.and_then(|id| pipes.get_mut(&id)).map_or(false, |p| p.check_read())
  }

  fn xhas_out(&mut self, pipes: &mut PipeMap) -> bool {
    self.pipe.and_then(|id| pipes.get_mut(&id)).map_or(false, |p| p.check_write())
  }
}
