// src/runtime/command.rs

use crate::engine::StreamEngine;
use crate::message::Msg;
use crate::runtime::io_thread::IoObject;
use crate::runtime::pipe::{Pipe, PipeId};
use crate::runtime::ypipe::YPipeWriter;
use crate::socket::core::SocketBase;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Index into the context's mailbox slot table.
pub(crate) type Tid = usize;
/// Context-wide unique object id.
pub(crate) type Oid = u64;

/// Slot of the context's own termination mailbox.
pub(crate) const TERM_TID: Tid = 0;
/// Slot of the reaper thread.
pub(crate) const REAPER_TID: Tid = 1;

/// Address of an engine object: the thread it lives on plus its id there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Addr {
  pub tid: Tid,
  pub oid: Oid,
}

impl Addr {
  pub(crate) fn new(tid: Tid, oid: Oid) -> Self {
    Self { tid, oid }
  }
}

/// A sendable reference to an engine object. Carries the object's
/// sent-command counter so that senders can bump it before posting a
/// command that must be processed before the object may be destroyed.
#[derive(Clone)]
pub(crate) struct ObjectRef {
  pub addr: Addr,
  sent_seqnum: Arc<AtomicU64>,
}

impl ObjectRef {
  pub(crate) fn new(tid: Tid, oid: Oid) -> Self {
    Self {
      addr: Addr::new(tid, oid),
      sent_seqnum: Arc::new(AtomicU64::new(0)),
    }
  }

  pub(crate) fn inc_seqnum(&self) {
    self.sent_seqnum.fetch_add(1, Ordering::AcqRel);
  }

  pub(crate) fn sent_seqnum(&self) -> u64 {
    self.sent_seqnum.load(Ordering::Acquire)
  }
}

impl PartialEq for ObjectRef {
  fn eq(&self, other: &Self) -> bool {
    self.addr == other.addr
  }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ObjectRef({}:{})", self.addr.tid, self.addr.oid)
  }
}

/// A command posted to an object's thread mailbox.
pub(crate) struct Command {
  pub destination: Addr,
  pub kind: CommandKind,
}

impl Command {
  pub(crate) fn new(destination: Addr, kind: CommandKind) -> Self {
    Self { destination, kind }
  }
}

/// The command vocabulary of the engine. Objects that change threads travel
/// inside the command that hands them over.
pub(crate) enum CommandKind {
  /// Sent to sockets (interrupt blocking calls) and to I/O threads and the
  /// reaper (shut down).
  Stop,
  /// Moves a freshly created I/O object into its thread and starts it.
  Plug(Box<IoObject>),
  /// Registers a child with its owner.
  Own(ObjectRef),
  /// Hands a connected engine to its session.
  Attach(Box<StreamEngine>),
  /// Hands one end of a new pipe to its owner.
  Bind(Box<Pipe>),
  ActivateRead {
    pipe: PipeId,
  },
  ActivateWrite {
    pipe: PipeId,
    msgs_read: u64,
  },
  Hiccup {
    pipe: PipeId,
    outpipe: YPipeWriter<Msg>,
  },
  PipeTerm {
    pipe: PipeId,
  },
  PipeTermAck {
    pipe: PipeId,
  },
  /// A child asks its owner to be terminated.
  TermReq(ObjectRef),
  /// Owner asks a child to terminate. `None` lingers forever.
  Term {
    linger: Option<Duration>,
  },
  TermAck,
  /// Hands a closed socket to the reaper.
  Reap(Box<SocketBase>),
  /// A socket in the reaper finished terminating.
  Reaped,
  /// Reaper has finished; every socket is gone.
  Done,
}

impl CommandKind {
  pub(crate) fn name(&self) -> &'static str {
    match self {
      CommandKind::Stop => "stop",
      CommandKind::Plug(_) => "plug",
      CommandKind::Own(_) => "own",
      CommandKind::Attach(_) => "attach",
      CommandKind::Bind(_) => "bind",
      CommandKind::ActivateRead { .. } => "activate_read",
      CommandKind::ActivateWrite { .. } => "activate_write",
      CommandKind::Hiccup { .. } => "hiccup",
      CommandKind::PipeTerm { .. } => "pipe_term",
      CommandKind::PipeTermAck { .. } => "pipe_term_ack",
      CommandKind::TermReq(_) => "term_req",
      CommandKind::Term { .. } => "term",
      CommandKind::TermAck => "term_ack",
      CommandKind::Reap(_) => "reap",
      CommandKind::Reaped => "reaped",
      CommandKind::Done => "done",
    }
  }

  /// The pipe end a pipe command is aimed at.
  pub(crate) fn pipe_id(&self) -> Option<PipeId> {
    match self {
      CommandKind::ActivateRead { pipe }
      | CommandKind::ActivateWrite { pipe, .. }
      | CommandKind::Hiccup { pipe, .. }
      | CommandKind::PipeTerm { pipe }
      | CommandKind::PipeTermAck { pipe } => Some(*pipe),
      _ => None,
    }
  }

  /// Commands counted by the destination's processed sequence number.
  pub(crate) fn is_sequenced(&self) -> bool {
    matches!(
      self,
      CommandKind::Plug(_) | CommandKind::Own(_) | CommandKind::Attach(_) | CommandKind::Bind(_)
    )
  }
}

impl fmt::Debug for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Command")
      .field("destination", &self.destination)
      .field("kind", &self.kind.name())
      .finish()
  }
}
