// src/context.rs

use crate::error::ZmqError;
use crate::runtime::command::{Addr, Command, CommandKind, ObjectRef, Tid, REAPER_TID};
use crate::runtime::io_thread::IoThread;
use crate::runtime::mailbox::{mailbox, MailboxReceiver, MailboxSender};
use crate::runtime::reaper::Reaper;
use crate::socket::core::SocketBase;
use crate::socket::options::SocketOptions;
use crate::socket::types::{Socket, SocketType};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Context option: size of the I/O thread pool.
pub const IO_THREADS: i32 = 1;
/// Context option: maximum number of simultaneously open sockets.
pub const MAX_SOCKETS: i32 = 2;

pub const IO_THREADS_DFLT: usize = 1;
pub const MAX_SOCKETS_DFLT: usize = 1023;

/// A socket bound to an `inproc://` name.
#[derive(Clone)]
pub(crate) struct InprocEndpoint {
  pub(crate) socket: ObjectRef,
  pub(crate) options: SocketOptions,
}

/// Load counter published by one I/O thread.
#[derive(Debug, Clone)]
pub(crate) struct IoThreadInfo {
  pub(crate) tid: Tid,
  pub(crate) load: Arc<AtomicUsize>,
}

#[derive(Default)]
struct CtxState {
  // Slots for sockets, popped from the back.
  empty_slots: Vec<Tid>,
  // Live sockets, including those already handed to the reaper.
  sockets: Vec<Addr>,
  started: bool,
  terminating: bool,
  io_threads: usize,
  max_sockets: usize,
  threads: Vec<JoinHandle<()>>,
}

/// Context state shared by every engine object: the slot table used to route
/// commands, socket bookkeeping and the inproc registry.
pub(crate) struct CtxShared {
  slots: RwLock<Vec<Option<MailboxSender>>>,
  state: Mutex<CtxState>,
  endpoints: Mutex<HashMap<String, InprocEndpoint>>,
  io_threads: OnceCell<Vec<IoThreadInfo>>,
  next_id: AtomicU64,
  next_socket_id: AtomicU64,
}

impl CtxShared {
  fn new(term_tx: MailboxSender) -> Self {
    Self {
      slots: RwLock::new(vec![Some(term_tx)]),
      state: Mutex::new(CtxState {
        io_threads: IO_THREADS_DFLT,
        max_sockets: MAX_SOCKETS_DFLT,
        ..Default::default()
      }),
      endpoints: Mutex::new(HashMap::new()),
      io_threads: OnceCell::new(),
      next_id: AtomicU64::new(1),
      next_socket_id: AtomicU64::new(1),
    }
  }

  /// Allocates an id for an engine object or a pipe end.
  pub(crate) fn next_id(&self) -> u64 {
    self.next_id.fetch_add(1, Ordering::Relaxed)
  }

  /// Posts a command to the mailbox of the destination's thread.
  pub(crate) fn send_command(&self, cmd: Command) {
    let tid = cmd.destination.tid;
    let sender = self.slots.read().get(tid).and_then(|s| s.clone());
    match sender {
      Some(sender) => {
        tracing::trace!(tid, oid = cmd.destination.oid, command = cmd.kind.name(), "Sending command");
        sender.send(cmd);
      }
      None => {
        // The destination thread already released its slot.
        tracing::warn!(tid, oid = cmd.destination.oid, command = cmd.kind.name(), "Dropping command for empty slot");
      }
    }
  }

  /// Picks the least loaded I/O thread.
  pub(crate) fn choose_io_thread(&self) -> Option<Tid> {
    self
      .io_threads
      .get()?
      .iter()
      .min_by_key(|info| info.load.load(Ordering::Relaxed))
      .map(|info| info.tid)
  }

  fn start(self: &Arc<Self>, state: &mut CtxState) -> Result<(), ZmqError> {
    if state.started || self.io_threads.get().is_some() {
      return Err(ZmqError::Internal("context threads already started".into()));
    }
    let io_count = state.io_threads;
    let slot_count = 2 + io_count + state.max_sockets;
    let mut infos = Vec::with_capacity(io_count);
    {
      let mut slots = self.slots.write();
      slots.resize(slot_count, None);

      let (reaper_tx, reaper_rx) = mailbox()?;
      slots[REAPER_TID] = Some(reaper_tx);
      let reaper = Reaper::new(self.clone(), reaper_rx)?;
      state.threads.push(
        std::thread::Builder::new()
          .name("zmq-reaper".into())
          .spawn(move || reaper.run())?,
      );

      for i in 0..io_count {
        let tid = 2 + i;
        let (tx, rx) = mailbox()?;
        slots[tid] = Some(tx);
        let io_thread = IoThread::new(tid, rx)?;
        infos.push(IoThreadInfo {
          tid,
          load: io_thread.load(),
        });
        state.threads.push(
          std::thread::Builder::new()
            .name(format!("zmq-io-{}", i))
            .spawn(move || io_thread.run())?,
        );
      }
    }
    self
      .io_threads
      .set(infos)
      .map_err(|_| ZmqError::Internal("I/O thread table already set".into()))?;
    state.empty_slots = (2 + io_count..slot_count).rev().collect();
    state.started = true;
    tracing::debug!(io_threads = io_count, max_sockets = state.max_sockets, "Context started");
    Ok(())
  }

  pub(crate) fn create_socket(self: &Arc<Self>, socket_type: SocketType) -> Result<Box<SocketBase>, ZmqError> {
    let mut state = self.state.lock();
    if state.terminating {
      return Err(ZmqError::Terminated);
    }
    if !state.started {
      self.start(&mut state)?;
    }
    let tid = state
      .empty_slots
      .pop()
      .ok_or(ZmqError::ResourceLimitReached("maximum number of sockets reached"))?;
    let (tx, rx) = match mailbox() {
      Ok(pair) => pair,
      Err(e) => {
        state.empty_slots.push(tid);
        return Err(e.into());
      }
    };
    let oid = self.next_id();
    let sid = self.next_socket_id.fetch_add(1, Ordering::Relaxed);
    let socket = SocketBase::new(self.clone(), socket_type, ObjectRef::new(tid, oid), sid, rx);
    self.slots.write()[tid] = Some(tx);
    state.sockets.push(Addr::new(tid, oid));
    tracing::debug!(tid, oid, sid, ?socket_type, "Socket created");
    Ok(socket)
  }

  /// Releases a socket's slot once the socket is fully destroyed.
  pub(crate) fn destroy_socket(&self, addr: Addr) {
    let mut state = self.state.lock();
    self.slots.write()[addr.tid] = None;
    state.empty_slots.push(addr.tid);
    state.sockets.retain(|s| *s != addr);
    tracing::debug!(tid = addr.tid, oid = addr.oid, "Socket slot released");
    // The last socket of a terminating context lets the reaper finish.
    if state.terminating && state.sockets.is_empty() {
      self.send_command(Command::new(Addr::new(REAPER_TID, 0), CommandKind::Stop));
    }
  }

  pub(crate) fn register_endpoint(&self, name: &str, endpoint: InprocEndpoint) -> Result<(), ZmqError> {
    let mut endpoints = self.endpoints.lock();
    if endpoints.contains_key(name) {
      return Err(ZmqError::AddrInUse(format!("inproc://{}", name)));
    }
    endpoints.insert(name.to_string(), endpoint);
    Ok(())
  }

  pub(crate) fn unregister_endpoints(&self, socket: Addr) {
    self.endpoints.lock().retain(|_, ep| ep.socket.addr != socket);
  }

  /// Looks up a bound inproc name. The bound socket's sequence number is
  /// bumped so it stays alive until the caller's `bind` command arrives.
  pub(crate) fn find_endpoint(&self, name: &str) -> Result<InprocEndpoint, ZmqError> {
    let endpoints = self.endpoints.lock();
    let ep = endpoints
      .get(name)
      .ok_or_else(|| ZmqError::ConnectionRefused(format!("inproc://{}", name)))?;
    ep.socket.inc_seqnum();
    Ok(ep.clone())
  }
}

impl fmt::Debug for CtxShared {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("CtxShared")
      .field("sockets", &state.sockets.len())
      .field("started", &state.started)
      .field("terminating", &state.terminating)
      .finish()
  }
}

/// State behind user-facing handles. Dropping the last handle terminates the
/// context.
pub(crate) struct ContextInner {
  pub(crate) shared: Arc<CtxShared>,
  term_mailbox: Mutex<MailboxReceiver>,
  terminated: AtomicBool,
}

impl ContextInner {
  pub(crate) fn is_terminated(&self) -> bool {
    self.terminated.load(Ordering::Acquire)
  }

  fn terminate(&self) -> Result<(), ZmqError> {
    if self.terminated.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    let shared = &self.shared;
    let sockets = {
      let mut state = shared.state.lock();
      if !state.started {
        state.terminating = true;
        return Ok(());
      }
      state.terminating = true;
      // Wake any thread blocked in send/recv; every socket call now fails.
      for addr in &state.sockets {
        shared.send_command(Command::new(*addr, CommandKind::Stop));
      }
      if state.sockets.is_empty() {
        shared.send_command(Command::new(Addr::new(REAPER_TID, 0), CommandKind::Stop));
      }
      state.sockets.len()
    };
    tracing::debug!(sockets, "Context terminating, waiting for sockets to close");

    let mut mailbox = self.term_mailbox.lock();
    loop {
      match mailbox.recv(None)? {
        Some(cmd) if matches!(cmd.kind, CommandKind::Done) => break,
        Some(cmd) => tracing::warn!(command = cmd.kind.name(), "Unexpected command on termination mailbox"),
        None => {}
      }
    }

    let threads = {
      let mut state = shared.state.lock();
      if let Some(infos) = shared.io_threads.get() {
        for info in infos {
          shared.send_command(Command::new(Addr::new(info.tid, 0), CommandKind::Stop));
        }
      }
      std::mem::take(&mut state.threads)
    };
    for handle in threads {
      if handle.join().is_err() {
        tracing::error!("Context thread panicked");
      }
    }
    tracing::debug!("Context terminated");
    Ok(())
  }
}

impl Drop for ContextInner {
  fn drop(&mut self) {
    if let Err(e) = self.terminate() {
      tracing::error!(error = %e, "Context termination failed");
    }
  }
}

/// Owns the I/O threads and sockets of one messaging engine instance.
///
/// Handles are cheap to clone. The context terminates when [`Context::term`]
/// is called or the last handle and the last socket are dropped.
#[derive(Clone)]
pub struct Context {
  inner: Arc<ContextInner>,
}

impl Context {
  pub fn new() -> Result<Self, ZmqError> {
    let (term_tx, term_rx) = mailbox()?;
    Ok(Self {
      inner: Arc::new(ContextInner {
        shared: Arc::new(CtxShared::new(term_tx)),
        term_mailbox: Mutex::new(term_rx),
        terminated: AtomicBool::new(false),
      }),
    })
  }

  /// Sets `IO_THREADS` or `MAX_SOCKETS`. Only effective before the first
  /// socket is created.
  pub fn set_option(&self, option: i32, value: i32) -> Result<(), ZmqError> {
    let mut state = self.inner.shared.state.lock();
    match option {
      IO_THREADS if value >= 0 => state.io_threads = value as usize,
      MAX_SOCKETS if value >= 1 => state.max_sockets = value as usize,
      IO_THREADS | MAX_SOCKETS => return Err(ZmqError::InvalidOptionValue(option)),
      _ => return Err(ZmqError::InvalidOption(option)),
    }
    if state.started {
      tracing::warn!(option, value, "Context option set after start has no effect");
    }
    Ok(())
  }

  pub fn get_option(&self, option: i32) -> Result<i32, ZmqError> {
    let state = self.inner.shared.state.lock();
    match option {
      IO_THREADS => Ok(state.io_threads as i32),
      MAX_SOCKETS => Ok(state.max_sockets as i32),
      _ => Err(ZmqError::InvalidOption(option)),
    }
  }

  /// Creates a socket of the given type, starting the context's threads on
  /// first use.
  pub fn socket(&self, socket_type: SocketType) -> Result<Socket, ZmqError> {
    if self.inner.terminated.load(Ordering::Acquire) {
      return Err(ZmqError::Terminated);
    }
    let base = self.inner.shared.create_socket(socket_type)?;
    Ok(Socket::new(self.inner.clone(), base))
  }

  /// Terminates the context. Blocked socket calls fail with
  /// [`ZmqError::Terminated`]; this call returns once every socket has been
  /// closed and its linger period has elapsed.
  pub fn term(&self) -> Result<(), ZmqError> {
    self.inner.terminate()
  }
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context").field("shared", &self.inner.shared).finish()
  }
}
