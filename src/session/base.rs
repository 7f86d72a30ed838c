// src/session/base.rs

use crate::context::CtxShared;
use crate::engine::StreamEngine;
use crate::runtime::command::{Command, CommandKind, ObjectRef, Oid, Tid};
use crate::runtime::io_thread::{IoHandler, IoObject};
use crate::runtime::own::Own;
use crate::runtime::pipe::{pipepair, Pipe, PipeId};
use crate::runtime::poller::{Handle, Poller};
use crate::session::link::SessionLink;
use crate::socket::events::{Monitor, SocketEvent};
use crate::socket::options::SocketOptions;
use crate::socket::SocketType;
use crate::transport::endpoint::Endpoint;
use crate::transport::tcp::TcpConnecter;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const LINGER_TIMER_ID: u32 = 0x20;

/// Bridges one connection's engine and the socket's pipe.
///
/// A connecting session is created by `connect` and owns the pipe for its
/// whole life, reconnecting after every failure. An accepting session is
/// created by a listener per connection and terminates when it drops.
pub(crate) struct Session {
  own: Own,
  socket: ObjectRef,
  options: SocketOptions,
  // Set for connecting sessions.
  address: Option<(Endpoint, String)>,
  monitor: Monitor,
  link: SessionLink,
  // Pipes replaced on reconnect, waiting for their final ack.
  terminating_pipes: HashMap<PipeId, Pipe>,
  engine: Option<Box<StreamEngine>>,
  // Termination requested; waiting for the pipe to finish.
  pending: bool,
  has_linger_timer: bool,
}

impl Session {
  pub(crate) fn new(
    ctx: Arc<CtxShared>,
    io_tid: Tid,
    socket: ObjectRef,
    options: SocketOptions,
    address: Option<(Endpoint, String)>,
    monitor: Monitor,
  ) -> Self {
    let me = ObjectRef::new(io_tid, ctx.next_id());
    let own = Own::new(ctx, me, Some(socket.clone()), options.linger);
    Self {
      own,
      socket,
      link: SessionLink::new(&options),
      options,
      address,
      monitor,
      terminating_pipes: HashMap::new(),
      engine: None,
      pending: false,
      has_linger_timer: false,
    }
  }

  /// Creates an accepting session owned by the `listener` that accepted the
  /// connection.
  pub(crate) fn new_accepted(
    ctx: Arc<CtxShared>,
    io_tid: Tid,
    listener: ObjectRef,
    socket: ObjectRef,
    options: SocketOptions,
    monitor: Monitor,
  ) -> Self {
    let me = ObjectRef::new(io_tid, ctx.next_id());
    let own = Own::new(ctx, me, Some(listener), options.linger);
    Self {
      own,
      socket,
      link: SessionLink::new(&options),
      options,
      address: None,
      monitor,
      terminating_pipes: HashMap::new(),
      engine: None,
      pending: false,
      has_linger_timer: false,
    }
  }

  pub(crate) fn me(&self) -> &ObjectRef {
    self.own.me()
  }

  fn is_connecting(&self) -> bool {
    self.address.is_some()
  }

  /// Installs the session's end of the socket pipe (connecting side).
  pub(crate) fn attach_pipe(&mut self, pipe: Pipe) {
    debug_assert!(self.link.pipe.is_none());
    self.link.pipe = Some(pipe);
  }

  fn start_connecting(&mut self, wait: bool) {
    let Some((endpoint, uri)) = self.address.clone() else {
      return;
    };
    let Some(io_tid) = self.own.ctx().choose_io_thread() else {
      tracing::error!(endpoint = %uri, "No I/O thread for connecter");
      return;
    };
    let connecter = TcpConnecter::new(
      self.own.ctx().clone(),
      io_tid,
      self.own.me().clone(),
      self.options.clone(),
      endpoint,
      uri,
      wait,
      self.monitor.clone(),
    );
    let child = connecter.me().clone();
    self.own.launch_child(child, Box::new(IoObject::Connecter(connecter)));
  }

  fn process_attach(&mut self, poller: &mut Poller, mut engine: Box<StreamEngine>) {
    // First connection of an accepting session: create the pipe now.
    if self.link.pipe.is_none() && !self.own.is_terminating() {
      let (local, remote) = pipepair(
        self.own.ctx(),
        [self.own.me().addr, self.socket.addr],
        [self.options.rcvhwm(), self.options.sndhwm()],
        [true, true],
      );
      self.link.pipe = Some(local);
      self.socket.inc_seqnum();
      self
        .own
        .ctx()
        .send_command(Command::new(self.socket.addr, CommandKind::Bind(Box::new(remote))));
    }

    debug_assert!(self.engine.is_none());
    let oid = self.oid();
    let alive = engine.plug(poller, oid, &mut self.link);
    self.engine = Some(engine);
    if !alive {
      self.engine_error(poller);
    }
  }

  /// The engine lost its connection.
  fn engine_error(&mut self, poller: &mut Poller) {
    let Some(mut engine) = self.engine.take() else {
      return;
    };
    self.monitor.emit(SocketEvent::Disconnected {
      endpoint: engine.endpoint().to_string(),
      fd: engine.fd(),
    });
    tracing::debug!(oid = self.oid(), endpoint = engine.endpoint(), "Engine disconnected");
    engine.unplug(poller);
    drop(engine);
    self.detach();
  }

  fn detach(&mut self) {
    self.link.clean_pipes();
    self.detached();
    // Pending termination may be waiting for a delimiter nobody reads now.
    if let Some(pipe) = self.link.pipe.as_mut() {
      pipe.check_read();
    }
  }

  fn detached(&mut self) {
    if !self.is_connecting() {
      if self.own.terminate() {
        tracing::error!(oid = self.oid(), "Accepting session has no owner");
      }
      return;
    }
    self.link.reset();
    if self.options.reconnect_ivl >= 0 && !self.own.is_terminating() && !self.pending {
      self.start_connecting(true);
    }
    // Subscriptions must be resent to the next peer.
    if matches!(self.options.socket_type, SocketType::Sub | SocketType::XSub) {
      if let Some(pipe) = self.link.pipe.as_mut() {
        pipe.hiccup();
      }
    }
  }

  fn process_term(&mut self, poller: &mut Poller, linger: Option<Duration>) {
    debug_assert!(!self.pending);
    self.pending = true;
    let oid = self.oid();
    if let Some(pipe) = self.link.pipe.as_mut() {
      // Pending outbound messages get `linger` to drain, then the pipe is
      // cut regardless.
      if let Some(d) = linger.filter(|d| !d.is_zero()) {
        poller.add_timer(d, oid, LINGER_TIMER_ID);
        self.has_linger_timer = true;
      }
      pipe.terminate(linger != Some(Duration::ZERO));
      pipe.check_read();
    }
    self.maybe_proceed_with_term();
  }

  fn maybe_proceed_with_term(&mut self) {
    if self.pending && self.link.pipe.is_none() && self.terminating_pipes.is_empty() {
      self.pending = false;
      self.own.process_term(Some(Duration::ZERO));
    }
  }

  fn pipe_terminated(&mut self, id: PipeId) {
    let ours = self.link.pipe.as_ref().map_or(false, |p| p.id() == id);
    let pipe = if ours {
      self.link.pipe.take()
    } else {
      self.terminating_pipes.remove(&id)
    };
    if let Some(mut pipe) = pipe {
      pipe.process_pipe_term_ack();
    }
  }

  fn pipe_mut(&mut self, id: PipeId) -> Option<&mut Pipe> {
    match self.link.pipe.as_mut() {
      Some(pipe) if pipe.id() == id => Some(pipe),
      _ => self.terminating_pipes.get_mut(&id),
    }
  }

  fn is_current_pipe(&self, id: PipeId) -> bool {
    self.link.pipe.as_ref().map_or(false, |p| p.id() == id)
  }

  fn destroy(&mut self, poller: &mut Poller) {
    if self.has_linger_timer {
      poller.cancel_timer(self.oid(), LINGER_TIMER_ID);
      self.has_linger_timer = false;
    }
    if let Some(mut engine) = self.engine.take() {
      engine.unplug(poller);
    }
    tracing::trace!(oid = self.oid(), "Session destroyed");
  }
}

impl IoHandler for Session {
  fn oid(&self) -> Oid {
    self.own.me().addr.oid
  }

  fn plug(&mut self, _poller: &mut Poller) {
    self.own.process_seqnum();
    if self.is_connecting() {
      self.start_connecting(false);
    }
  }

  fn in_event(&mut self, poller: &mut Poller, handle: Handle) {
    let Some(engine) = self.engine.as_mut() else {
      return;
    };
    debug_assert_eq!(engine.handle(), Some(handle));
    if !engine.in_event(poller, &mut self.link) {
      self.engine_error(poller);
    }
  }

  fn out_event(&mut self, poller: &mut Poller, _handle: Handle) {
    if let Some(engine) = self.engine.as_mut() {
      engine.out_event(poller, &mut self.link);
    }
  }

  fn timer_event(&mut self, _poller: &mut Poller, id: u32) {
    debug_assert_eq!(id, LINGER_TIMER_ID);
    self.has_linger_timer = false;
    // Linger expired: drop whatever is still queued.
    if let Some(pipe) = self.link.pipe.as_mut() {
      pipe.terminate(false);
    }
  }

  fn process_command(&mut self, poller: &mut Poller, kind: CommandKind) {
    let sequenced = kind.is_sequenced();
    match kind {
      CommandKind::Attach(engine) => self.process_attach(poller, engine),
      CommandKind::Own(child) => self.own.process_own(child),
      CommandKind::ActivateRead { pipe } => {
        let activated = self.pipe_mut(pipe).map_or(false, |p| p.process_activate_read());
        if activated && self.is_current_pipe(pipe) {
          match self.engine.as_mut() {
            Some(engine) => engine.activate_out(poller, &mut self.link),
            None => {
              // Only looking for the delimiter.
              if let Some(p) = self.link.pipe.as_mut() {
                p.check_read();
              }
            }
          }
        }
      }
      CommandKind::ActivateWrite { pipe, msgs_read } => {
        let activated = self.pipe_mut(pipe).map_or(false, |p| p.process_activate_write(msgs_read));
        if activated && self.is_current_pipe(pipe) {
          if let Some(engine) = self.engine.as_mut() {
            if !engine.activate_in(poller, &mut self.link) {
              self.engine_error(poller);
            }
          }
        }
      }
      CommandKind::Hiccup { pipe, outpipe } => {
        // Sockets never hiccup towards sessions; just take the new queue.
        if let Some(p) = self.pipe_mut(pipe) {
          p.process_hiccup(outpipe);
        }
      }
      CommandKind::PipeTerm { pipe } => {
        if let Some(p) = self.pipe_mut(pipe) {
          p.process_pipe_term();
        }
      }
      CommandKind::PipeTermAck { pipe } => {
        self.pipe_terminated(pipe);
        self.maybe_proceed_with_term();
      }
      CommandKind::TermReq(child) => self.own.process_term_req(child),
      CommandKind::Term { linger } => self.process_term(poller, linger),
      CommandKind::TermAck => self.own.unregister_term_ack(),
      other => {
        tracing::warn!(oid = self.oid(), command = other.name(), "Unexpected command on session");
      }
    }
    if sequenced {
      self.own.process_seqnum();
    }
    self.check_destroy(poller);
  }

  fn is_destroyed(&self) -> bool {
    self.own.is_destroyed()
  }
}

impl Session {
  fn check_destroy(&mut self, poller: &mut Poller) {
    if self.own.check_term_acks() {
      self.destroy(poller);
    }
  }
}

impl fmt::Debug for Session {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Session")
      .field("me", self.own.me())
      .field("socket", &self.socket)
      .field("connecting", &self.is_connecting())
      .field("engine", &self.engine)
      .field("pending", &self.pending)
      .finish()
  }
}
