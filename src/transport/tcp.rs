// src/transport/tcp.rs

use crate::context::CtxShared;
use crate::engine::StreamEngine;
use crate::error::ZmqError;
use crate::runtime::command::{Command, CommandKind, ObjectRef, Oid, Tid};
use crate::runtime::io_thread::{IoHandler, IoObject};
use crate::runtime::own::Own;
use crate::runtime::poller::{Handle, Poller};
use crate::session::Session;
use crate::socket::events::{Monitor, SocketEvent};
use crate::socket::options::SocketOptions;
use crate::transport::endpoint::Endpoint;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

const RECONNECT_TIMER_ID: u32 = 1;

/// Applies the `TCP_KEEPALIVE*` options. `-1` leaves the system default.
fn apply_tcp_socket_options(sock: SockRef<'_>, options: &SocketOptions) -> io::Result<()> {
  if options.tcp_keepalive == -1 {
    return Ok(());
  }
  let enabled = options.tcp_keepalive == 1;
  sock.set_keepalive(enabled)?;
  if !enabled {
    return Ok(());
  }

  let mut keepalive = TcpKeepalive::new();
  let mut tuned = false;
  if options.tcp_keepalive_idle > 0 {
    keepalive = keepalive.with_time(Duration::from_secs(options.tcp_keepalive_idle as u64));
    tuned = true;
  }
  #[cfg(unix)]
  if options.tcp_keepalive_intvl > 0 {
    keepalive = keepalive.with_interval(Duration::from_secs(options.tcp_keepalive_intvl as u64));
    tuned = true;
  }
  #[cfg(unix)]
  if options.tcp_keepalive_cnt > 0 {
    keepalive = keepalive.with_retries(options.tcp_keepalive_cnt as u32);
    tuned = true;
  }
  if tuned {
    sock.set_tcp_keepalive(&keepalive)?;
    tracing::trace!("Applied TCP keepalive settings: {:?}", keepalive);
  }
  Ok(())
}

/// Binds a listening descriptor and creates an accepting session for every
/// incoming connection. Owned by the socket.
pub(crate) struct TcpListener {
  own: Own,
  socket: ObjectRef,
  options: SocketOptions,
  monitor: Monitor,
  listener: Option<std::net::TcpListener>,
  handle: Option<Handle>,
  // Resolved endpoint, reported in events and handed to engines.
  endpoint: String,
}

impl TcpListener {
  pub(crate) fn new(
    ctx: Arc<CtxShared>,
    io_tid: Tid,
    socket: ObjectRef,
    options: SocketOptions,
    monitor: Monitor,
  ) -> Self {
    let me = ObjectRef::new(io_tid, ctx.next_id());
    let own = Own::new(ctx, me, Some(socket.clone()), options.linger);
    Self {
      own,
      socket,
      options,
      monitor,
      listener: None,
      handle: None,
      endpoint: String::new(),
    }
  }

  pub(crate) fn me(&self) -> &ObjectRef {
    self.own.me()
  }

  /// Binds and starts listening. Returns the endpoint actually bound, with
  /// wildcard ports replaced by the assigned one.
  pub(crate) fn set_address(&mut self, uri: &str, endpoint: &Endpoint) -> Result<String, ZmqError> {
    let addr = endpoint.resolve_bind(uri)?;
    let io_err = |e: io::Error| ZmqError::from_io_endpoint(e, uri);

    let sock = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(io_err)?;
    sock.set_reuse_address(true).map_err(io_err)?;
    sock.bind(&addr.into()).map_err(io_err)?;
    sock.listen(self.options.backlog).map_err(io_err)?;
    sock.set_nonblocking(true).map_err(io_err)?;
    let listener: std::net::TcpListener = sock.into();
    let local = listener.local_addr().map_err(io_err)?;

    self.endpoint = match endpoint {
      Endpoint::Tcp { .. } => format!("tcp://{}", local),
      _ => uri.to_string(),
    };
    tracing::info!(endpoint = %self.endpoint, %local, "TCP listener bound");
    self.monitor.emit(SocketEvent::Listening {
      endpoint: self.endpoint.clone(),
      fd: listener.as_raw_fd(),
    });
    self.listener = Some(listener);
    Ok(self.endpoint.clone())
  }

  fn accept_one(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<(), ZmqError> {
    if let Err(e) = apply_tcp_socket_options(SockRef::from(&stream), &self.options) {
      tracing::warn!(endpoint = %self.endpoint, error = %e, "Failed to apply TCP options to accepted stream");
    }
    let fd = stream.as_raw_fd();
    let engine = StreamEngine::new(stream, &self.options, self.endpoint.clone())?;
    let io_tid = self
      .own
      .ctx()
      .choose_io_thread()
      .ok_or(ZmqError::ResourceLimitReached("no I/O thread available"))?;

    let session = Session::new_accepted(
      self.own.ctx().clone(),
      io_tid,
      self.own.me().clone(),
      self.socket.clone(),
      self.options.clone(),
      self.monitor.clone(),
    );
    let session_ref = session.me().clone();
    self.own.launch_child(session_ref.clone(), Box::new(IoObject::Session(session)));
    session_ref.inc_seqnum();
    self.own.ctx().send_command(Command::new(
      session_ref.addr,
      CommandKind::Attach(Box::new(engine)),
    ));

    tracing::debug!(endpoint = %self.endpoint, %peer, fd, "Accepted connection");
    self.monitor.emit(SocketEvent::Accepted {
      endpoint: self.endpoint.clone(),
      fd,
    });
    Ok(())
  }

  fn close(&mut self, poller: &mut Poller) {
    if let Some(handle) = self.handle.take() {
      poller.rm_fd(handle);
    }
    if let Some(listener) = self.listener.take() {
      self.monitor.emit(SocketEvent::Closed {
        endpoint: self.endpoint.clone(),
        fd: listener.as_raw_fd(),
      });
      tracing::debug!(endpoint = %self.endpoint, "TCP listener closed");
    }
  }
}

impl IoHandler for TcpListener {
  fn oid(&self) -> Oid {
    self.own.me().addr.oid
  }

  fn plug(&mut self, poller: &mut Poller) {
    self.own.process_seqnum();
    let Some(listener) = self.listener.as_ref() else {
      return;
    };
    match poller.add_fd(listener.as_raw_fd(), self.oid()) {
      Ok(handle) => {
        poller.set_pollin(handle);
        self.handle = Some(handle);
      }
      Err(e) => tracing::error!(endpoint = %self.endpoint, error = %e, "Failed to register listener"),
    }
  }

  fn in_event(&mut self, poller: &mut Poller, handle: Handle) {
    loop {
      let accepted = match self.listener.as_ref() {
        Some(listener) => listener.accept(),
        None => return,
      };
      match accepted {
        Ok((stream, peer)) => {
          if let Err(e) = self.accept_one(stream, peer) {
            tracing::warn!(endpoint = %self.endpoint, error = %e, "Dropped accepted connection");
            self.monitor.emit(SocketEvent::AcceptFailed {
              endpoint: self.endpoint.clone(),
              error: e.errno(),
            });
          }
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
          poller.clear_in_ready(handle);
          return;
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
        Err(e) => {
          tracing::warn!(endpoint = %self.endpoint, error = %e, "Accept failed");
          self.monitor.emit(SocketEvent::AcceptFailed {
            endpoint: self.endpoint.clone(),
            error: e.raw_os_error().unwrap_or(libc::EIO),
          });
          return;
        }
      }
    }
  }

  fn process_command(&mut self, poller: &mut Poller, kind: CommandKind) {
    match kind {
      CommandKind::Own(child) => {
        self.own.process_own(child);
        self.own.process_seqnum();
      }
      CommandKind::TermReq(child) => self.own.process_term_req(child),
      CommandKind::Term { linger } => {
        self.close(poller);
        self.own.process_term(linger);
      }
      CommandKind::TermAck => self.own.unregister_term_ack(),
      other => {
        tracing::warn!(oid = self.oid(), command = other.name(), "Unexpected command on listener");
      }
    }
    self.own.check_term_acks();
  }

  fn is_destroyed(&self) -> bool {
    self.own.is_destroyed()
  }
}

impl fmt::Debug for TcpListener {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TcpListener")
      .field("me", self.own.me())
      .field("endpoint", &self.endpoint)
      .field("listening", &self.listener.is_some())
      .finish()
  }
}

/// Establishes one outgoing connection for a session and hands the engine
/// to it. Retries on a back-off timer until it succeeds or is terminated.
pub(crate) struct TcpConnecter {
  own: Own,
  session: ObjectRef,
  options: SocketOptions,
  monitor: Monitor,
  endpoint: Endpoint,
  uri: String,
  // Descriptor of the connect in progress.
  pending: Option<Socket>,
  handle: Option<Handle>,
  // Start with the reconnect timer instead of connecting right away.
  delayed_start: bool,
  timer_started: bool,
  current_reconnect_ivl: i32,
}

impl TcpConnecter {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    ctx: Arc<CtxShared>,
    io_tid: Tid,
    session: ObjectRef,
    options: SocketOptions,
    endpoint: Endpoint,
    uri: String,
    delayed_start: bool,
    monitor: Monitor,
  ) -> Self {
    let me = ObjectRef::new(io_tid, ctx.next_id());
    let own = Own::new(ctx, me, Some(session.clone()), options.linger);
    let current_reconnect_ivl = options.reconnect_ivl;
    Self {
      own,
      session,
      options,
      monitor,
      endpoint,
      uri,
      pending: None,
      handle: None,
      delayed_start,
      timer_started: false,
      current_reconnect_ivl,
    }
  }

  pub(crate) fn me(&self) -> &ObjectRef {
    self.own.me()
  }

  /// Opens a non-blocking socket and starts connecting. Ok(true) when the
  /// connection completed immediately.
  fn open(&mut self) -> Result<bool, ZmqError> {
    let addr = self.endpoint.resolve_connect(&self.uri)?;
    let sock = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    sock.set_nonblocking(true)?;
    let result = sock.connect(&addr.into());
    self.pending = Some(sock);
    match result {
      Ok(()) => Ok(true),
      Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) || e.kind() == io::ErrorKind::WouldBlock => Ok(false),
      Err(e) => Err(ZmqError::from_io_endpoint(e, &self.uri)),
    }
  }

  fn start_connecting(&mut self, poller: &mut Poller) {
    match self.open() {
      Ok(immediate) => {
        let Some(fd) = self.pending.as_ref().map(|s| s.as_raw_fd()) else {
          return;
        };
        match poller.add_fd(fd, self.oid()) {
          Ok(handle) => {
            self.handle = Some(handle);
            if immediate {
              self.out_event(poller, handle);
            } else {
              poller.set_pollout(handle);
              self.monitor.emit(SocketEvent::ConnectDelayed {
                endpoint: self.uri.clone(),
                error: libc::EINPROGRESS,
              });
            }
          }
          Err(e) => {
            tracing::error!(endpoint = %self.uri, error = %e, "Failed to register connecting descriptor");
            self.close();
            self.add_reconnect_timer(poller);
          }
        }
      }
      Err(e) => {
        tracing::debug!(endpoint = %self.uri, error = %e, "Connect attempt failed");
        self.close();
        self.add_reconnect_timer(poller);
      }
    }
  }

  /// The outcome of the asynchronous connect, once the descriptor reports
  /// writable.
  fn connect_result(&mut self) -> Result<TcpStream, io::Error> {
    let sock = self
      .pending
      .take()
      .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no connect in progress"))?;
    if let Some(e) = sock.take_error()? {
      self.pending = Some(sock);
      return Err(e);
    }
    // Writable with no error but no peer either: still in progress or reset.
    if let Err(e) = sock.peer_addr() {
      self.pending = Some(sock);
      return Err(e);
    }
    Ok(sock.into())
  }

  fn add_reconnect_timer(&mut self, poller: &mut Poller) {
    let interval = self.next_reconnect_ivl();
    poller.add_timer(Duration::from_millis(interval.max(0) as u64), self.oid(), RECONNECT_TIMER_ID);
    self.timer_started = true;
    self.monitor.emit(SocketEvent::ConnectRetried {
      endpoint: self.uri.clone(),
      interval_ms: interval,
    });
  }

  /// Current interval plus jitter; the base doubles up to `reconnect_ivl_max`.
  fn next_reconnect_ivl(&mut self) -> i32 {
    let jitter = if self.options.reconnect_ivl > 0 {
      rand::random_range(0..self.options.reconnect_ivl)
    } else {
      0
    };
    let interval = self.current_reconnect_ivl.saturating_add(jitter);
    let max = self.options.reconnect_ivl_max;
    if max > 0 && max > self.options.reconnect_ivl {
      self.current_reconnect_ivl = self.current_reconnect_ivl.saturating_mul(2).min(max);
    }
    interval
  }

  fn close(&mut self) {
    if let Some(sock) = self.pending.take() {
      self.monitor.emit(SocketEvent::Closed {
        endpoint: self.uri.clone(),
        fd: sock.as_raw_fd(),
      });
    }
  }
}

impl IoHandler for TcpConnecter {
  fn oid(&self) -> Oid {
    self.own.me().addr.oid
  }

  fn plug(&mut self, poller: &mut Poller) {
    self.own.process_seqnum();
    if self.delayed_start {
      self.add_reconnect_timer(poller);
    } else {
      self.start_connecting(poller);
    }
  }

  // Failures are reported as readable too.
  fn in_event(&mut self, poller: &mut Poller, handle: Handle) {
    self.out_event(poller, handle);
  }

  fn out_event(&mut self, poller: &mut Poller, handle: Handle) {
    poller.rm_fd(handle);
    self.handle = None;

    let stream = match self.connect_result() {
      Ok(stream) => stream,
      Err(e) => {
        tracing::debug!(endpoint = %self.uri, error = %e, "Connect failed");
        self.close();
        self.add_reconnect_timer(poller);
        return;
      }
    };
    if let Err(e) = apply_tcp_socket_options(SockRef::from(&stream), &self.options) {
      tracing::warn!(endpoint = %self.uri, error = %e, "Failed to apply TCP options to connected stream");
    }
    let fd = stream.as_raw_fd();
    let engine = match StreamEngine::new(stream, &self.options, self.uri.clone()) {
      Ok(engine) => engine,
      Err(e) => {
        tracing::warn!(endpoint = %self.uri, error = %e, "Failed to set up engine");
        self.add_reconnect_timer(poller);
        return;
      }
    };

    self.session.inc_seqnum();
    self.own.ctx().send_command(Command::new(
      self.session.addr,
      CommandKind::Attach(Box::new(engine)),
    ));
    tracing::debug!(endpoint = %self.uri, fd, "Connected");
    self.monitor.emit(SocketEvent::Connected {
      endpoint: self.uri.clone(),
      fd,
    });

    // Done: ask the session to shut us down.
    self.own.terminate();
  }

  fn timer_event(&mut self, poller: &mut Poller, id: u32) {
    debug_assert_eq!(id, RECONNECT_TIMER_ID);
    self.timer_started = false;
    self.start_connecting(poller);
  }

  fn process_command(&mut self, poller: &mut Poller, kind: CommandKind) {
    match kind {
      CommandKind::Term { linger } => {
        if self.timer_started {
          poller.cancel_timer(self.oid(), RECONNECT_TIMER_ID);
          self.timer_started = false;
        }
        if let Some(handle) = self.handle.take() {
          poller.rm_fd(handle);
        }
        self.close();
        self.own.process_term(linger);
      }
      CommandKind::TermAck => self.own.unregister_term_ack(),
      other => {
        tracing::warn!(oid = self.oid(), command = other.name(), "Unexpected command on connecter");
      }
    }
    self.own.check_term_acks();
  }

  fn is_destroyed(&self) -> bool {
    self.own.is_destroyed()
  }
}

impl fmt::Debug for TcpConnecter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TcpConnecter")
      .field("me", self.own.me())
      .field("endpoint", &self.uri)
      .field("connecting", &self.pending.is_some())
      .field("timer_started", &self.timer_started)
      .finish()
  }
}
