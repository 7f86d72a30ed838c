// src/socket/router_socket.rs

use crate::error::ZmqError;
use crate::message::{Blob, Msg, MsgFlags};
use crate::runtime::pipe::PipeId;
use crate::socket::options::{parse_bool_option, ROUTER_MANDATORY};
use crate::socket::patterns::{FairQueue, PipeMap};
use crate::socket::SocketPattern;

use std::collections::{HashMap, HashSet};

#[derive(Debug)]
struct OutPipe {
  pipe: PipeId,
  active: bool,
}

/// Routes outgoing messages by the identity in their first part and prefixes
/// incoming ones with the identity of the pipe they came from.
#[derive(Debug)]
pub(crate) struct RouterSocket {
  fq: FairQueue,
  // A message read ahead by `xhas_in` or `xrecv`, not yet handed out.
  prefetched: bool,
  prefetched_id: Blob,
  prefetched_msg: Msg,
  identity_sent: bool,
  // In the middle of delivering a multi-part message.
  more_in: bool,
  // Pipes whose identity message has not arrived yet.
  anonymous_pipes: HashSet<PipeId>,
  // Pipes that announced an identity already in use; their input is discarded.
  rejected_pipes: HashSet<PipeId>,
  outpipes: HashMap<Blob, OutPipe>,
  current_out: Option<PipeId>,
  more_out: bool,
  next_peer_id: u32,
  mandatory: bool,
}

impl RouterSocket {
  pub(crate) fn new() -> Self {
    Self {
      fq: FairQueue::new(),
      prefetched: false,
      prefetched_id: Blob::new(),
      prefetched_msg: Msg::new(),
      identity_sent: false,
      more_in: false,
      anonymous_pipes: HashSet::new(),
      rejected_pipes: HashSet::new(),
      outpipes: HashMap::new(),
      current_out: None,
      more_out: false,
      next_peer_id: rand::random(),
      mandatory: false,
    }
  }

  /// Reads the peer's identity off `pipe`. Returns false if it has not
  /// arrived yet or is a duplicate.
  fn identify_peer(&mut self, pipe: PipeId, pipes: &mut PipeMap) -> bool {
    let Some(p) = pipes.get_mut(&pipe) else {
      return false;
    };
    let Some(msg) = p.read() else {
      return false;
    };

    let identity = if msg.size() == 0 {
      // Anonymous peer: generate an identity no user identity can clash with.
      let identity = Blob::generated(self.next_peer_id);
      self.next_peer_id = self.next_peer_id.wrapping_add(1);
      identity
    } else {
      let identity = Blob::from_bytes(msg.into_bytes());
      if self.outpipes.contains_key(&identity) {
        tracing::warn!(pipe_id = pipe, "Peer identity already in use, ignoring peer");
        self.rejected_pipes.insert(pipe);
        return false;
      }
      identity
    };

    p.set_identity(identity.clone());
    self.outpipes.insert(identity, OutPipe { pipe, active: true });
    true
  }

  fn drop_input(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    if let Some(p) = pipes.get_mut(&pipe) {
      while p.read().is_some() {}
    }
  }

  /// Cancels a partially routed message.
  pub(crate) fn rollback(&mut self, pipes: &mut PipeMap) {
    if let Some(out) = self.current_out.take() {
      if let Some(p) = pipes.get_mut(&out) {
        p.rollback();
      }
      self.more_out = false;
    }
  }

  fn identity_msg(identity: &Blob) -> Msg {
    let mut msg = Msg::from_bytes(identity.to_bytes());
    msg.set_flags(MsgFlags::MORE);
    msg
  }

  // Next message part from the fair queue, skipping identities re-sent by
  // reconnecting peers.
  fn recv_part(&mut self, pipes: &mut PipeMap) -> Result<(Msg, PipeId), ZmqError> {
    loop {
      let (msg, pipe) = self.fq.recv_pipe(pipes)?;
      if !msg.is_identity() {
        return Ok((msg, pipe));
      }
    }
  }
}

impl SocketPattern for RouterSocket {
  fn xattach_pipe(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    if self.identify_peer(pipe, pipes) {
      self.fq.attach(pipe);
    } else if !self.rejected_pipes.contains(&pipe) {
      self.anonymous_pipes.insert(pipe);
    }
  }

  fn xsetsockopt(&mut self, option: i32, value: &[u8], _pipes: &mut PipeMap) -> Result<bool, ZmqError> {
    if option != ROUTER_MANDATORY {
      return Ok(false);
    }
    self.mandatory = parse_bool_option(value, option)?;
    Ok(true)
  }

  fn xread_activated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    if self.rejected_pipes.contains(&pipe) {
      self.drop_input(pipe, pipes);
    } else if self.anonymous_pipes.contains(&pipe) {
      if self.identify_peer(pipe, pipes) {
        self.anonymous_pipes.remove(&pipe);
        self.fq.attach(pipe);
      } else if self.rejected_pipes.contains(&pipe) {
        self.anonymous_pipes.remove(&pipe);
        self.drop_input(pipe, pipes);
      }
    } else {
      self.fq.activated(pipe);
    }
  }

  fn xwrite_activated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    if let Some(out) = self.outpipes.values_mut().find(|o| o.pipe == pipe) {
      out.active = true;
    }
  }

  fn xterminated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    if self.anonymous_pipes.remove(&pipe) || self.rejected_pipes.remove(&pipe) {
      return;
    }
    self.outpipes.retain(|_, o| o.pipe != pipe);
    self.fq.terminated(pipe);
    if self.current_out == Some(pipe) {
      self.current_out = None;
    }
  }

  fn xsend(&mut self, msg: &mut Msg, pipes: &mut PipeMap) -> Result<(), ZmqError> {
    // The first part names the peer to route to.
    if !self.more_out {
      debug_assert!(self.current_out.is_none());

      // A lone routing part with nothing after it is ignored.
      if msg.is_more() {
        self.more_out = true;
        let identity = Blob::from(msg.as_slice().to_vec());
        match self.outpipes.get_mut(&identity) {
          Some(out) => {
            let writable = pipes.get_mut(&out.pipe).map_or(false, |p| p.check_write());
            if writable {
              self.current_out = Some(out.pipe);
            } else {
              out.active = false;
              if self.mandatory {
                self.more_out = false;
                return Err(ZmqError::WouldBlock);
              }
            }
          }
          None if self.mandatory => {
            self.more_out = false;
            return Err(ZmqError::HostUnreachable(format!("no peer with identity {:?}", identity)));
          }
          None => {}
        }
      }
      *msg = Msg::new();
      return Ok(());
    }

    self.more_out = msg.is_more();

    // Unroutable messages are dropped silently.
    if let Some(out) = self.current_out {
      let Some(pipe) = pipes.get_mut(&out) else {
        self.current_out = None;
        *msg = Msg::new();
        return Ok(());
      };
      if !pipe.write(msg) {
        self.current_out = None;
      } else if !self.more_out {
        pipe.flush();
        self.current_out = None;
      }
    }
    *msg = Msg::new();
    Ok(())
  }

  fn xrecv(&mut self, pipes: &mut PipeMap) -> Result<Msg, ZmqError> {
    if self.prefetched {
      let msg = if !self.identity_sent {
        self.identity_sent = true;
        Self::identity_msg(&self.prefetched_id)
      } else {
        self.prefetched = false;
        std::mem::take(&mut self.prefetched_msg)
      };
      self.more_in = msg.is_more();
      return Ok(msg);
    }

    let (msg, pipe) = self.recv_part(pipes)?;

    // Further parts of a message go out as they are.
    if self.more_in {
      self.more_in = msg.is_more();
      return Ok(msg);
    }

    // A new message: hand out the identity first and keep the part for later.
    let identity = pipes.get(&pipe).map(|p| p.identity().clone()).unwrap_or_default();
    self.prefetched_msg = msg;
    self.prefetched = true;
    self.identity_sent = true;
    let msg = Self::identity_msg(&identity);
    self.more_in = true;
    Ok(msg)
  }

  fn xhas_in(&mut self, pipes: &mut PipeMap) -> bool {
    if self.more_in || self.prefetched {
      return true;
    }
    let Ok((msg, pipe)) = self.recv_part(pipes) else {
      return false;
    };
    self.prefetched_id = pipes.get(&pipe).map(|p| p.identity().clone()).unwrap_or_default();
    self.prefetched_msg = msg;
    self.prefetched = true;
    self.identity_sent = false;
    true
  }

  fn xhas_out(&mut self, _pipes: &mut PipeMap) -> bool {
    // Unroutable messages are dropped, so sending never blocks.
    true
  }
}
