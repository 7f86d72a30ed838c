// src/socket/core.rs

//! The socket object: the user-facing send/recv loops on top of the pattern
//! hooks, pipe bookkeeping, endpoint creation and termination.
//!
//! A `SocketBase` lives in the user's `Socket` handle until it is closed, then
//! moves to the reaper thread, which finishes its termination.

use crate::context::{CtxShared, InprocEndpoint};
use crate::error::ZmqError;
use crate::message::{Msg, MsgFlags, RecvFlags, SendFlags};
use crate::runtime::command::{Addr, Command, CommandKind, ObjectRef, Oid, REAPER_TID};
use crate::runtime::io_thread::IoObject;
use crate::runtime::mailbox::MailboxReceiver;
use crate::runtime::own::Own;
use crate::runtime::pipe::{pipepair, Pipe, PipeId};
use crate::runtime::poller::{Handle, Poller};
use crate::session::Session;
use crate::socket::events::{Monitor, SocketEvent};
use crate::socket::options::{self, SocketOptions};
use crate::socket::patterns::PipeMap;
use crate::socket::types::SocketType;
use crate::socket::{Pattern, SocketPattern};
use crate::transport::endpoint::{parse_endpoint, Endpoint};
use crate::transport::tcp::TcpListener;

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// `recv` checks the mailbox once per this many messages on its fast path.
const INBOUND_POLL_RATE: u32 = 100;

pub(crate) struct SocketBase {
  own: Own,
  sid: u64,
  options: SocketOptions,
  mailbox: MailboxReceiver,
  pipes: PipeMap,
  pattern: Pattern,
  monitor: Monitor,
  // Set by `stop`: every further call fails with `Terminated`.
  ctx_terminated: bool,
  rcvmore: bool,
  ticks: u32,
  // Mailbox registration while owned by the reaper.
  reaper_handle: Option<Handle>,
}

impl SocketBase {
  pub(crate) fn new(
    ctx: Arc<CtxShared>,
    socket_type: SocketType,
    me: ObjectRef,
    sid: u64,
    mailbox: MailboxReceiver,
  ) -> Box<Self> {
    let options = SocketOptions::new(socket_type);
    Box::new(Self {
      own: Own::new(ctx, me, None, options.linger),
      sid,
      options,
      mailbox,
      pipes: PipeMap::new(),
      pattern: Pattern::new(socket_type),
      monitor: Monitor::default(),
      ctx_terminated: false,
      rcvmore: false,
      ticks: 0,
      reaper_handle: None,
    })
  }

  pub(crate) fn oid(&self) -> Oid {
    self.own.me().addr.oid
  }

  fn addr(&self) -> Addr {
    self.own.me().addr
  }

  fn ctx(&self) -> &Arc<CtxShared> {
    self.own.ctx()
  }

  pub(crate) fn socket_type(&self) -> SocketType {
    self.options.socket_type
  }

  /// Readable while commands wait for this socket. `EVENTS` drains them.
  pub(crate) fn mailbox_fd(&self) -> RawFd {
    self.mailbox.fd()
  }

  fn check_alive(&self) -> Result<(), ZmqError> {
    if self.ctx_terminated {
      Err(ZmqError::Terminated)
    } else {
      Ok(())
    }
  }

  // --- Commands ---

  /// Processes queued commands. With a non-zero `timeout` it first waits for
  /// one to arrive (`None` waits forever).
  fn process_commands(&mut self, timeout: Option<Duration>) -> Result<(), ZmqError> {
    let mut next = self.mailbox.recv(timeout)?;
    while let Some(cmd) = next {
      self.process_command(cmd);
      next = self.mailbox.recv(Some(Duration::ZERO))?;
    }
    self.check_alive()
  }

  fn process_command(&mut self, cmd: Command) {
    let sequenced = cmd.kind.is_sequenced();
    match cmd.kind {
      CommandKind::Stop => {
        tracing::debug!(sid = self.sid, "Socket interrupted by context termination");
        self.ctx_terminated = true;
      }
      CommandKind::Own(child) => self.own.process_own(child),
      CommandKind::Bind(pipe) => self.attach_pipe(*pipe),
      CommandKind::ActivateRead { pipe } => {
        if self.pipes.get_mut(&pipe).map_or(false, |p| p.process_activate_read()) {
          self.pattern.xread_activated(pipe, &mut self.pipes);
        }
      }
      CommandKind::ActivateWrite { pipe, msgs_read } => {
        if self.pipes.get_mut(&pipe).map_or(false, |p| p.process_activate_write(msgs_read)) {
          self.pattern.xwrite_activated(pipe, &mut self.pipes);
        }
      }
      CommandKind::Hiccup { pipe, outpipe } => {
        if self.pipes.get_mut(&pipe).map_or(false, |p| p.process_hiccup(outpipe)) {
          self.pattern.xhiccuped(pipe, &mut self.pipes);
        }
      }
      CommandKind::PipeTerm { pipe } => {
        if let Some(p) = self.pipes.get_mut(&pipe) {
          p.process_pipe_term();
        }
      }
      CommandKind::PipeTermAck { pipe } => {
        if let Some(mut p) = self.pipes.remove(&pipe) {
          p.process_pipe_term_ack();
          self.pipe_terminated(pipe);
        }
      }
      CommandKind::TermReq(child) => self.own.process_term_req(child),
      CommandKind::Term { linger } => self.process_term(linger),
      CommandKind::TermAck => self.own.unregister_term_ack(),
      other => {
        tracing::warn!(sid = self.sid, command = other.name(), "Unexpected command on socket");
      }
    }
    if sequenced {
      self.own.process_seqnum();
    }
    // Destruction is finished by the reaper once this reports done.
    self.own.check_term_acks();
  }

  fn attach_pipe(&mut self, pipe: Pipe) {
    let id = pipe.id();
    self.pipes.insert(id, pipe);
    self.pattern.xattach_pipe(id, &mut self.pipes);

    // Late arrivals on a closing socket are shut down right away.
    if self.own.is_terminating() {
      self.own.register_term_acks(1);
      if let Some(p) = self.pipes.get_mut(&id) {
        p.terminate(false);
      }
    }
  }

  fn pipe_terminated(&mut self, pipe: PipeId) {
    tracing::trace!(sid = self.sid, pipe_id = pipe, "Pipe detached from socket");
    self.pattern.xterminated(pipe, &mut self.pipes);
    if self.own.is_terminating() {
      self.own.unregister_term_ack();
    }
  }

  fn process_term(&mut self, linger: Option<Duration>) {
    // No new inproc connections may find us now.
    self.ctx().unregister_endpoints(self.addr());

    let count = self.pipes.len();
    for pipe in self.pipes.values_mut() {
      pipe.terminate(false);
    }
    self.own.register_term_acks(count);
    self.own.process_term(linger);
  }

  // --- Endpoints ---

  pub(crate) fn bind(&mut self, uri: &str) -> Result<(), ZmqError> {
    self.check_alive()?;
    self.process_commands(Some(Duration::ZERO))?;

    let endpoint = parse_endpoint(uri)?;
    if let Endpoint::Inproc(name) = &endpoint {
      self.ctx().register_endpoint(
        name,
        InprocEndpoint {
          socket: self.own.me().clone(),
          options: self.options.clone(),
        },
      )?;
      self.options.last_endpoint = uri.to_string();
      return Ok(());
    }

    let io_tid = self
      .ctx()
      .choose_io_thread()
      .ok_or(ZmqError::ResourceLimitReached("no I/O thread available"))?;
    let mut listener = TcpListener::new(
      self.ctx().clone(),
      io_tid,
      self.own.me().clone(),
      self.options.clone(),
      self.monitor.clone(),
    );
    let bound = match listener.set_address(uri, &endpoint) {
      Ok(bound) => bound,
      Err(e) => {
        self.monitor.emit(SocketEvent::BindFailed {
          endpoint: uri.to_string(),
          error: e.errno(),
        });
        return Err(e);
      }
    };
    tracing::debug!(sid = self.sid, endpoint = %bound, "Socket bound");
    self.options.last_endpoint = bound;
    let child = listener.me().clone();
    self.own.launch_child(child, Box::new(IoObject::Listener(listener)));
    Ok(())
  }

  pub(crate) fn connect(&mut self, uri: &str) -> Result<(), ZmqError> {
    self.check_alive()?;
    self.process_commands(Some(Duration::ZERO))?;

    let endpoint = parse_endpoint(uri)?;
    if let Endpoint::Inproc(name) = &endpoint {
      return self.connect_inproc(name, uri);
    }
    // Reject unresolvable addresses now rather than retrying forever.
    endpoint.resolve_connect(uri)?;

    let io_tid = self
      .ctx()
      .choose_io_thread()
      .ok_or(ZmqError::ResourceLimitReached("no I/O thread available"))?;
    let mut session = Session::new(
      self.ctx().clone(),
      io_tid,
      self.own.me().clone(),
      self.options.clone(),
      Some((endpoint, uri.to_string())),
      self.monitor.clone(),
    );

    let (local, remote) = pipepair(
      self.ctx(),
      [self.addr(), session.me().addr],
      [self.options.sndhwm(), self.options.rcvhwm()],
      [true, true],
    );
    session.attach_pipe(remote);
    self.attach_pipe(local);

    self.options.last_endpoint = uri.to_string();
    let child = session.me().clone();
    self.own.launch_child(child, Box::new(IoObject::Session(session)));
    tracing::debug!(sid = self.sid, endpoint = uri, "Socket connecting");
    Ok(())
  }

  fn connect_inproc(&mut self, name: &str, uri: &str) -> Result<(), ZmqError> {
    let peer = self.ctx().find_endpoint(name)?;

    // Both sides' buffers add up; zero on either side means no limit.
    let sndhwm = if self.options.sndhwm == 0 || peer.options.rcvhwm == 0 {
      0
    } else {
      self.options.sndhwm() + peer.options.rcvhwm()
    };
    let rcvhwm = if self.options.rcvhwm == 0 || peer.options.sndhwm == 0 {
      0
    } else {
      self.options.rcvhwm() + peer.options.sndhwm()
    };

    let (mut local, mut remote) = pipepair(
      self.ctx(),
      [self.addr(), peer.socket.addr],
      [sndhwm, rcvhwm],
      [true, true],
    );

    // Identities are exchanged up front, as a transport would.
    if peer.options.recv_identity {
      let mut id = Msg::from_bytes(self.options.identity.to_bytes());
      id.set_flags(MsgFlags::IDENTITY);
      local.write(&mut id);
      local.flush();
    }
    if self.options.recv_identity {
      let mut id = Msg::from_bytes(peer.options.identity.to_bytes());
      id.set_flags(MsgFlags::IDENTITY);
      remote.write(&mut id);
      remote.flush();
    }

    self.attach_pipe(local);
    // find_endpoint already bumped the peer's sequence number.
    self
      .ctx()
      .send_command(Command::new(peer.socket.addr, CommandKind::Bind(Box::new(remote))));
    self.options.last_endpoint = uri.to_string();
    tracing::debug!(sid = self.sid, endpoint = uri, "Socket connected inproc");
    Ok(())
  }

  // --- Messages ---

  pub(crate) fn send(&mut self, msg: &mut Msg, flags: SendFlags) -> Result<(), ZmqError> {
    self.check_alive()?;
    self.process_commands(Some(Duration::ZERO))?;

    msg.reset_flags(MsgFlags::MORE | MsgFlags::IDENTITY);
    if flags.contains(SendFlags::MORE) {
      msg.add_flags(MsgFlags::MORE);
    }

    match self.pattern.xsend(msg, &mut self.pipes) {
      Err(e) if e.is_would_block() => {}
      other => return other,
    }

    if flags.contains(SendFlags::DONTWAIT) || self.options.sndtimeo == Some(Duration::ZERO) {
      return Err(ZmqError::WouldBlock);
    }

    // Wait for activate_write (or anything else) and retry until the deadline.
    let deadline = self.options.sndtimeo.map(|t| Instant::now() + t);
    let mut timeout = self.options.sndtimeo;
    loop {
      self.process_commands(timeout)?;
      match self.pattern.xsend(msg, &mut self.pipes) {
        Err(e) if e.is_would_block() => {}
        other => return other,
      }
      if let Some(deadline) = deadline {
        let now = Instant::now();
        if now >= deadline {
          return Err(ZmqError::Timeout);
        }
        timeout = Some(deadline - now);
      }
    }
  }

  pub(crate) fn recv(&mut self, flags: RecvFlags) -> Result<Msg, ZmqError> {
    self.check_alive()?;

    // Commands are only checked every so often while messages keep coming.
    self.ticks += 1;
    if self.ticks == INBOUND_POLL_RATE {
      self.process_commands(Some(Duration::ZERO))?;
      self.ticks = 0;
    }

    match self.pattern.xrecv(&mut self.pipes) {
      Ok(msg) => return Ok(self.extract_flags(msg)),
      Err(e) if e.is_would_block() => {}
      Err(e) => return Err(e),
    }

    if flags.contains(RecvFlags::DONTWAIT) || self.options.rcvtimeo == Some(Duration::ZERO) {
      self.process_commands(Some(Duration::ZERO))?;
      self.ticks = 0;
      let msg = self.pattern.xrecv(&mut self.pipes)?;
      return Ok(self.extract_flags(msg));
    }

    let deadline = self.options.rcvtimeo.map(|t| Instant::now() + t);
    let mut timeout = self.options.rcvtimeo;
    // Commands queued since the last check are drained before waiting.
    let mut block = self.ticks != 0;
    loop {
      self.process_commands(if block { timeout } else { Some(Duration::ZERO) })?;
      match self.pattern.xrecv(&mut self.pipes) {
        Ok(msg) => {
          self.ticks = 0;
          return Ok(self.extract_flags(msg));
        }
        Err(e) if e.is_would_block() => {}
        Err(e) => return Err(e),
      }
      block = true;
      if let Some(deadline) = deadline {
        let now = Instant::now();
        if now >= deadline {
          return Err(ZmqError::Timeout);
        }
        timeout = Some(deadline - now);
      }
    }
  }

  fn extract_flags(&mut self, msg: Msg) -> Msg {
    debug_assert!(!msg.is_identity() || self.options.recv_identity);
    self.rcvmore = msg.is_more();
    msg
  }

  // --- Options ---

  pub(crate) fn set_option(&mut self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    self.check_alive()?;
    if self.pattern.xsetsockopt(option, value, &mut self.pipes)? {
      return Ok(());
    }
    self.options.set(option, value)?;
    if option == options::LINGER {
      self.own.set_linger(self.options.linger);
    }
    Ok(())
  }

  pub(crate) fn get_option(&mut self, option: i32) -> Result<Vec<u8>, ZmqError> {
    self.check_alive()?;
    match option {
      options::RCVMORE => Ok((self.rcvmore as i32).to_ne_bytes().to_vec()),
      options::EVENTS => {
        self.process_commands(Some(Duration::ZERO))?;
        let mut events = 0i32;
        if self.pattern.xhas_in(&mut self.pipes) {
          events |= options::POLLIN;
        }
        if self.pattern.xhas_out(&mut self.pipes) {
          events |= options::POLLOUT;
        }
        Ok(events.to_ne_bytes().to_vec())
      }
      _ => self.options.get(option),
    }
  }

  // --- Monitor ---

  pub(crate) fn monitor(&mut self, uri: Option<&str>, events: i32) -> Result<(), ZmqError> {
    self.check_alive()?;
    let Some(uri) = uri else {
      if let Some(old) = self.monitor.stop() {
        old.close();
      }
      return Ok(());
    };
    if !matches!(parse_endpoint(uri)?, Endpoint::Inproc(_)) {
      return Err(ZmqError::UnsupportedTransport(uri.to_string()));
    }

    let mut sink = self.ctx().create_socket(SocketType::Pair)?;
    // Undelivered events never hold up termination.
    sink.set_option(options::LINGER, &0i32.to_ne_bytes())?;
    if let Err(e) = sink.bind(uri) {
      sink.close();
      return Err(e);
    }
    if let Some(old) = self.monitor.start(sink, events) {
      old.close();
    }
    tracing::debug!(sid = self.sid, endpoint = uri, events, "Socket monitor started");
    Ok(())
  }

  // --- Closing and reaping ---

  /// Hands the socket to the reaper. Its monitor socket goes with it.
  pub(crate) fn close(self: Box<Self>) {
    if let Some(sink) = self.monitor.stop() {
      sink.close();
    }
    tracing::debug!(sid = self.sid, "Socket closed");
    let ctx = self.ctx().clone();
    ctx.send_command(Command::new(Addr::new(REAPER_TID, 0), CommandKind::Reap(self)));
  }

  /// Runs on the reaper: registers the mailbox and starts termination.
  pub(crate) fn start_reaping(&mut self, poller: &mut Poller) -> Result<(), ZmqError> {
    let handle = poller.add_fd(self.mailbox.fd(), self.oid())?;
    poller.set_pollin(handle);
    self.reaper_handle = Some(handle);

    if self.own.terminate() {
      self.process_term(self.options.linger);
    }
    self.own.check_term_acks();
    Ok(())
  }

  /// Runs on the reaper when the mailbox turns readable.
  pub(crate) fn reaper_in_event(&mut self, poller: &mut Poller) {
    loop {
      match self.mailbox.recv(Some(Duration::ZERO)) {
        Ok(Some(cmd)) => self.process_command(cmd),
        Ok(None) => break,
        Err(e) => {
          tracing::error!(sid = self.sid, error = %e, "Socket mailbox failed while reaping");
          break;
        }
      }
    }
    if let Some(handle) = self.reaper_handle {
      poller.clear_in_ready(handle);
    }
    self.check_destroy(poller);
  }

  fn check_destroy(&mut self, poller: &mut Poller) {
    if !self.own.is_destroyed() {
      return;
    }
    let Some(handle) = self.reaper_handle.take() else {
      return;
    };
    poller.rm_fd(handle);
    let addr = self.addr();
    self.ctx().destroy_socket(addr);
    self
      .ctx()
      .send_command(Command::new(Addr::new(REAPER_TID, 0), CommandKind::Reaped));
    tracing::debug!(sid = self.sid, "Socket destroyed");
  }

  pub(crate) fn is_destroyed(&self) -> bool {
    self.own.is_destroyed() && self.reaper_handle.is_none()
  }
}

impl fmt::Debug for SocketBase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SocketBase")
      .field("sid", &self.sid)
      .field("addr", &self.addr())
      .field("socket_type", &self.options.socket_type)
      .field("pipes", &self.pipes.len())
      .field("ctx_terminated", &self.ctx_terminated)
      .finish()
  }
}
