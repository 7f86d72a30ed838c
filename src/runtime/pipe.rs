// src/runtime/pipe.rs

//! Flow-controlled, bidirectional message pipe.
//!
//! A pipe pair is two [`YPipe`](crate::runtime::ypipe)s wired crosswise. Each end
//! lives inside exactly one owner object (a socket or a session) and talks to
//! its peer end only through commands posted to the peer owner's mailbox.

use crate::context::CtxShared;
use crate::message::{Blob, Msg};
use crate::runtime::command::{Addr, Command, CommandKind};
use crate::runtime::ypipe::{ypipe, YPipeReader, YPipeWriter, MESSAGE_PIPE_GRANULARITY};

use std::fmt;
use std::sync::Arc;

/// Context-wide unique id of one pipe end.
pub(crate) type PipeId = u64;

/// Largest distance kept between HWM and LWM for big watermarks.
pub(crate) const MAX_WM_DELTA: u64 = 1024;

/// Derives the low watermark from the peer's high watermark.
pub(crate) fn compute_lwm(hwm: u64) -> u64 {
  // Large HWMs reopen the window shortly below the top so the writer is not
  // throttled for long; small ones reopen halfway down.
  if hwm > MAX_WM_DELTA * 2 {
    hwm - MAX_WM_DELTA
  } else {
    (hwm + 1) / 2
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeState {
  /// Both directions open.
  Active,
  /// Delimiter read before the peer's `pipe_term` arrived.
  Delimited,
  /// Peer asked to terminate; draining inbound messages before acking.
  Pending,
  /// We acked the peer and wait for its final ack.
  Terminating,
  /// We asked the peer to terminate and wait for its ack.
  Terminated,
  /// Both ends asked at the same time.
  DoubleTerminated,
}

/// Address of the remote end: its owner plus the end's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PeerAddr {
  pub owner: Addr,
  pub pipe: PipeId,
}

pub(crate) struct Pipe {
  id: PipeId,
  peer: PeerAddr,
  inpipe: Option<YPipeReader<Msg>>,
  outpipe: Option<YPipeWriter<Msg>>,
  in_active: bool,
  out_active: bool,
  hwm: u64,
  lwm: u64,
  msgs_read: u64,
  msgs_written: u64,
  peers_msgs_read: u64,
  state: PipeState,
  // If set, pending inbound messages are delivered before the pipe closes.
  delay: bool,
  identity: Blob,
  ctx: Arc<CtxShared>,
}

/// Creates a connected pair of pipe ends. `owners[i]` will own end `i`;
/// `hwms[i]` caps messages end `i` may have in flight towards the other end.
/// A HWM of zero means unlimited.
pub(crate) fn pipepair(ctx: &Arc<CtxShared>, owners: [Addr; 2], hwms: [u64; 2], delays: [bool; 2]) -> (Pipe, Pipe) {
  let (w1, r1) = ypipe::<Msg, MESSAGE_PIPE_GRANULARITY>();
  let (w2, r2) = ypipe::<Msg, MESSAGE_PIPE_GRANULARITY>();
  let id0 = ctx.next_id();
  let id1 = ctx.next_id();
  let p0 = Pipe::new(
    ctx.clone(),
    id0,
    PeerAddr {
      owner: owners[1],
      pipe: id1,
    },
    r2,
    w1,
    hwms[1],
    hwms[0],
    delays[0],
  );
  let p1 = Pipe::new(
    ctx.clone(),
    id1,
    PeerAddr {
      owner: owners[0],
      pipe: id0,
    },
    r1,
    w2,
    hwms[0],
    hwms[1],
    delays[1],
  );
  tracing::trace!(pipe_a = id0, pipe_b = id1, "Created pipe pair");
  (p0, p1)
}

impl Pipe {
  #[allow(clippy::too_many_arguments)]
  fn new(
    ctx: Arc<CtxShared>,
    id: PipeId,
    peer: PeerAddr,
    inpipe: YPipeReader<Msg>,
    outpipe: YPipeWriter<Msg>,
    in_hwm: u64,
    out_hwm: u64,
    delay: bool,
  ) -> Self {
    Self {
      id,
      peer,
      inpipe: Some(inpipe),
      outpipe: Some(outpipe),
      in_active: true,
      out_active: true,
      hwm: out_hwm,
      lwm: compute_lwm(in_hwm),
      msgs_read: 0,
      msgs_written: 0,
      peers_msgs_read: 0,
      state: PipeState::Active,
      delay,
      identity: Blob::new(),
      ctx,
    }
  }

  pub(crate) fn id(&self) -> PipeId {
    self.id
  }

  pub(crate) fn identity(&self) -> &Blob {
    &self.identity
  }

  pub(crate) fn set_identity(&mut self, identity: Blob) {
    self.identity = identity;
  }

  pub(crate) fn state(&self) -> PipeState {
    self.state
  }

  /// Peer-initiated termination no longer waits for unread inbound messages.
  pub(crate) fn set_nodelay(&mut self) {
    self.delay = false;
  }

  fn send_to_peer(&self, kind: CommandKind) {
    self.ctx.send_command(Command::new(self.peer.owner, kind));
  }

  /// True if a message part can be read right now. Consumes a delimiter if
  /// one is next in line.
  pub(crate) fn check_read(&mut self) -> bool {
    if !self.in_active || !matches!(self.state, PipeState::Active | PipeState::Pending) {
      return false;
    }
    let Some(inpipe) = self.inpipe.as_mut() else {
      return false;
    };
    if !inpipe.check_read() {
      self.in_active = false;
      return false;
    }
    if inpipe.probe(|m| m.is_delimiter()) {
      let _ = inpipe.read();
      self.delimit();
      return false;
    }
    true
  }

  /// Reads one message part.
  pub(crate) fn read(&mut self) -> Option<Msg> {
    if !self.in_active || !matches!(self.state, PipeState::Active | PipeState::Pending) {
      return None;
    }
    let msg = match self.inpipe.as_mut().and_then(|p| p.read()) {
      Some(m) => m,
      None => {
        self.in_active = false;
        return None;
      }
    };
    if msg.is_delimiter() {
      self.delimit();
      return None;
    }
    if !msg.is_more() {
      self.msgs_read += 1;
      if self.lwm > 0 && self.msgs_read % self.lwm == 0 {
        self.send_to_peer(CommandKind::ActivateWrite {
          pipe: self.peer.pipe,
          msgs_read: self.msgs_read,
        });
      }
    }
    Some(msg)
  }

  /// True if a message can be written without exceeding the HWM.
  pub(crate) fn check_write(&mut self) -> bool {
    if !self.out_active || self.state != PipeState::Active {
      return false;
    }
    let full = self.hwm > 0 && self.msgs_written - self.peers_msgs_read == self.hwm;
    if full {
      self.out_active = false;
      return false;
    }
    true
  }

  /// Writes one message part, taking it out of `msg`. Returns `false` and
  /// leaves `msg` untouched when the pipe is full or closing.
  pub(crate) fn write(&mut self, msg: &mut Msg) -> bool {
    if !self.check_write() {
      return false;
    }
    let more = msg.is_more();
    let Some(outpipe) = self.outpipe.as_mut() else {
      return false;
    };
    outpipe.write(std::mem::take(msg), more);
    if !more {
      self.msgs_written += 1;
    }
    true
  }

  /// Drops the unfinished tail of a multi-part message.
  pub(crate) fn rollback(&mut self) {
    if let Some(outpipe) = self.outpipe.as_mut() {
      while let Some(msg) = outpipe.unwrite() {
        debug_assert!(msg.is_more());
      }
    }
  }

  /// Publishes written messages, waking the peer if it was asleep.
  pub(crate) fn flush(&mut self) {
    // The peer may already be gone in this state.
    if self.state == PipeState::Terminating {
      return;
    }
    if let Some(outpipe) = self.outpipe.as_mut() {
      if !outpipe.flush() {
        self.send_to_peer(CommandKind::ActivateRead { pipe: self.peer.pipe });
      }
    }
  }

  /// Returns true if the owner must be told the pipe became readable.
  pub(crate) fn process_activate_read(&mut self) -> bool {
    if !self.in_active && matches!(self.state, PipeState::Active | PipeState::Pending) {
      self.in_active = true;
      return true;
    }
    false
  }

  /// Returns true if the owner must be told the pipe became writable.
  pub(crate) fn process_activate_write(&mut self, msgs_read: u64) -> bool {
    self.peers_msgs_read = msgs_read;
    if !self.out_active && self.state == PipeState::Active {
      self.out_active = true;
      return true;
    }
    false
  }

  /// Swaps in the new outbound queue sent by a hiccuping peer. Returns true
  /// if the owner must be told.
  pub(crate) fn process_hiccup(&mut self, outpipe: YPipeWriter<Msg>) -> bool {
    // Messages still sitting in the old queue go down with it.
    if let Some(mut old) = self.outpipe.take() {
      old.flush();
    }
    self.outpipe = Some(outpipe);
    self.out_active = true;
    self.state == PipeState::Active
  }

  pub(crate) fn process_pipe_term(&mut self) {
    match self.state {
      PipeState::Active => {
        if self.delay {
          self.state = PipeState::Pending;
        } else {
          self.state = PipeState::Terminating;
          self.outpipe = None;
          self.send_to_peer(CommandKind::PipeTermAck { pipe: self.peer.pipe });
        }
      }
      // Delimiter came first; now we have the term as well.
      PipeState::Delimited => {
        self.state = PipeState::Terminating;
        self.outpipe = None;
        self.send_to_peer(CommandKind::PipeTermAck { pipe: self.peer.pipe });
      }
      // Both ends closed in parallel: ack and keep waiting for our own ack.
      PipeState::Terminated => {
        self.state = PipeState::DoubleTerminated;
        self.outpipe = None;
        self.send_to_peer(CommandKind::PipeTermAck { pipe: self.peer.pipe });
      }
      other => {
        tracing::error!(pipe_id = self.id, state = ?other, "pipe_term received in invalid state");
        debug_assert!(false, "pipe_term in state {:?}", other);
      }
    }
  }

  /// Final step of termination. The owner must drop the pipe afterwards and
  /// treat it as terminated.
  pub(crate) fn process_pipe_term_ack(&mut self) {
    match self.state {
      PipeState::Terminated => {
        self.outpipe = None;
        self.send_to_peer(CommandKind::PipeTermAck { pipe: self.peer.pipe });
      }
      PipeState::Terminating | PipeState::DoubleTerminated => {}
      other => {
        tracing::error!(pipe_id = self.id, state = ?other, "pipe_term_ack received in invalid state");
        debug_assert!(false, "pipe_term_ack in state {:?}", other);
      }
    }
    // Unread inbound messages are released with the queue.
    self.inpipe = None;
  }

  /// Starts closing the pipe. With `delay` set, inbound messages already
  /// queued are still delivered before the pipe goes away.
  pub(crate) fn terminate(&mut self, delay: bool) {
    self.delay = delay;
    match self.state {
      PipeState::Terminated | PipeState::DoubleTerminated | PipeState::Terminating => return,
      PipeState::Active | PipeState::Delimited => {
        self.send_to_peer(CommandKind::PipeTerm { pipe: self.peer.pipe });
        self.state = PipeState::Terminated;
      }
      PipeState::Pending if !self.delay => {
        self.outpipe = None;
        self.send_to_peer(CommandKind::PipeTermAck { pipe: self.peer.pipe });
        self.state = PipeState::Terminating;
      }
      PipeState::Pending => {}
    }

    self.out_active = false;

    if self.outpipe.is_some() {
      self.rollback();
      // Watermarks are not checked; the delimiter always fits.
      if let Some(outpipe) = self.outpipe.as_mut() {
        outpipe.write(Msg::delimiter(), false);
      }
      self.flush();
    }
  }

  /// Replaces the inbound queue so stale messages from a previous connection
  /// are never read. The new writer is shipped to the peer.
  pub(crate) fn hiccup(&mut self) {
    if self.state != PipeState::Active {
      return;
    }
    let (writer, reader) = ypipe::<Msg, MESSAGE_PIPE_GRANULARITY>();
    self.inpipe = Some(reader);
    self.in_active = true;
    self.send_to_peer(CommandKind::Hiccup {
      pipe: self.peer.pipe,
      outpipe: writer,
    });
  }

  fn delimit(&mut self) {
    match self.state {
      PipeState::Active => self.state = PipeState::Delimited,
      PipeState::Pending => {
        self.outpipe = None;
        self.send_to_peer(CommandKind::PipeTermAck { pipe: self.peer.pipe });
        self.state = PipeState::Terminating;
      }
      other => {
        tracing::error!(pipe_id = self.id, state = ?other, "Delimiter read in invalid state");
        debug_assert!(false, "delimiter in state {:?}", other);
      }
    }
  }
}

impl fmt::Debug for Pipe {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Pipe")
      .field("id", &self.id)
      .field("peer", &self.peer)
      .field("state", &self.state)
      .field("hwm", &self.hwm)
      .field("lwm", &self.lwm)
      .field("msgs_read", &self.msgs_read)
      .field("msgs_written", &self.msgs_written)
      .finish()
  }
}
