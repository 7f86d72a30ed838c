// src/runtime/poller.rs

//! Readiness loop shared by I/O threads and the reaper.
//!
//! Descriptors are registered with `mio` once for both directions. mio reports
//! edges; the poller caches them per handle so that objects see level-triggered
//! readiness gated by their pollin/pollout interest. A handler that drains a
//! descriptor down to `WouldBlock` calls [`Poller::clear_in_ready`] or
//! [`Poller::clear_out_ready`].

use crate::runtime::command::Oid;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Registration of one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Handle(Token);

/// Something an object has to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ready {
  In(Handle),
  Out(Handle),
  Timer { oid: Oid, id: u32 },
}

#[derive(Debug)]
struct HandleState {
  fd: RawFd,
  oid: Oid,
  pollin: bool,
  pollout: bool,
  readable: bool,
  writable: bool,
}

pub(crate) struct Poller {
  poll: Poll,
  events: Events,
  handles: HashMap<Token, HandleState>,
  next_token: usize,
  timers: BTreeMap<(Instant, u64), (Oid, u32)>,
  timer_seq: u64,
  load: Arc<AtomicUsize>,
}

impl Poller {
  pub(crate) fn new() -> io::Result<Self> {
    Ok(Self {
      poll: Poll::new()?,
      events: Events::with_capacity(256),
      handles: HashMap::new(),
      next_token: 0,
      timers: BTreeMap::new(),
      timer_seq: 0,
      load: Arc::new(AtomicUsize::new(0)),
    })
  }

  /// Number of registered descriptors, shared with the context for thread
  /// selection.
  pub(crate) fn load(&self) -> Arc<AtomicUsize> {
    self.load.clone()
  }

  pub(crate) fn add_fd(&mut self, fd: RawFd, oid: Oid) -> io::Result<Handle> {
    let token = Token(self.next_token);
    self.next_token += 1;
    self
      .poll
      .registry()
      .register(&mut SourceFd(&fd), token, Interest::READABLE | Interest::WRITABLE)?;
    self.handles.insert(
      token,
      HandleState {
        fd,
        oid,
        pollin: false,
        pollout: false,
        readable: false,
        writable: false,
      },
    );
    self.load.fetch_add(1, Ordering::Relaxed);
    Ok(Handle(token))
  }

  /// Unregisters a descriptor. Must be called before the descriptor is closed.
  pub(crate) fn rm_fd(&mut self, handle: Handle) {
    if let Some(state) = self.handles.remove(&handle.0) {
      if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&state.fd)) {
        tracing::warn!(fd = state.fd, error = %e, "Failed to deregister descriptor");
      }
      self.load.fetch_sub(1, Ordering::Relaxed);
    }
  }

  fn with_handle(&mut self, handle: Handle, f: impl FnOnce(&mut HandleState)) {
    if let Some(state) = self.handles.get_mut(&handle.0) {
      f(state);
    }
  }

  pub(crate) fn set_pollin(&mut self, handle: Handle) {
    self.with_handle(handle, |h| h.pollin = true);
  }

  pub(crate) fn reset_pollin(&mut self, handle: Handle) {
    self.with_handle(handle, |h| h.pollin = false);
  }

  pub(crate) fn set_pollout(&mut self, handle: Handle) {
    self.with_handle(handle, |h| h.pollout = true);
  }

  pub(crate) fn reset_pollout(&mut self, handle: Handle) {
    self.with_handle(handle, |h| h.pollout = false);
  }

  /// The descriptor reported `WouldBlock` on read.
  pub(crate) fn clear_in_ready(&mut self, handle: Handle) {
    self.with_handle(handle, |h| h.readable = false);
  }

  /// The descriptor reported `WouldBlock` on write.
  pub(crate) fn clear_out_ready(&mut self, handle: Handle) {
    self.with_handle(handle, |h| h.writable = false);
  }

  /// True if an `in_event` for `handle` should be dispatched now.
  pub(crate) fn is_in_ready(&self, handle: Handle) -> bool {
    self.handles.get(&handle.0).map_or(false, |h| h.pollin && h.readable)
  }

  /// True if an `out_event` for `handle` should be dispatched now.
  pub(crate) fn is_out_ready(&self, handle: Handle) -> bool {
    self.handles.get(&handle.0).map_or(false, |h| h.pollout && h.writable)
  }

  /// Object owning a registered handle.
  pub(crate) fn owner(&self, handle: Handle) -> Option<Oid> {
    self.handles.get(&handle.0).map(|h| h.oid)
  }

  pub(crate) fn add_timer(&mut self, timeout: Duration, oid: Oid, id: u32) {
    self.timer_seq += 1;
    self.timers.insert((Instant::now() + timeout, self.timer_seq), (oid, id));
  }

  pub(crate) fn cancel_timer(&mut self, oid: Oid, id: u32) {
    let key = self
      .timers
      .iter()
      .find(|(_, target)| **target == (oid, id))
      .map(|(key, _)| *key);
    match key {
      Some(key) => {
        self.timers.remove(&key);
      }
      None => tracing::trace!(oid, timer_id = id, "Cancelled timer was not armed"),
    }
  }

  fn take_expired_timers(&mut self, ready: &mut Vec<Ready>) -> Option<Duration> {
    let now = Instant::now();
    while let Some((&(deadline, seq), &(oid, id))) = self.timers.first_key_value() {
      if deadline > now {
        return Some(deadline - now);
      }
      self.timers.remove(&(deadline, seq));
      ready.push(Ready::Timer { oid, id });
    }
    None
  }

  fn any_ready(&self) -> bool {
    self
      .handles
      .values()
      .any(|h| (h.pollin && h.readable) || (h.pollout && h.writable))
  }

  /// Blocks until at least one handle or timer is ready and returns what to
  /// dispatch. Readiness must be re-checked with `is_in_ready`/`is_out_ready`
  /// at dispatch time since earlier handlers may change it.
  pub(crate) fn wait(&mut self) -> io::Result<Vec<Ready>> {
    let mut ready = Vec::new();
    let next_timer = self.take_expired_timers(&mut ready);
    let timeout = if !ready.is_empty() || self.any_ready() {
      Some(Duration::ZERO)
    } else {
      next_timer
    };

    match self.poll.poll(&mut self.events, timeout) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
      Err(e) => return Err(e),
    }

    for event in self.events.iter() {
      if let Some(h) = self.handles.get_mut(&event.token()) {
        // Errors and hangups are reported to both directions so the owner
        // runs into them on its next read or write.
        let failed = event.is_error() || event.is_read_closed() || event.is_write_closed();
        if event.is_readable() || failed {
          h.readable = true;
        }
        if event.is_writable() || failed {
          h.writable = true;
        }
      }
    }

    let mut tokens: Vec<&Token> = self.handles.keys().collect();
    tokens.sort_unstable();
    for token in tokens {
      let h = &self.handles[token];
      if h.pollin && h.readable {
        ready.push(Ready::In(Handle(*token)));
      }
      if h.pollout && h.writable {
        ready.push(Ready::Out(Handle(*token)));
      }
    }
    Ok(ready)
  }
}

impl std::fmt::Debug for Poller {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Poller")
      .field("handles", &self.handles.len())
      .field("timers", &self.timers.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runtime::signaler::Signaler;

  #[test]
  fn readiness_stays_level_triggered_until_cleared() {
    let mut poller = Poller::new().unwrap();
    let signaler = Signaler::new().unwrap();
    let handle = poller.add_fd(signaler.fd(), 7).unwrap();
    poller.set_pollin(handle);
    assert_eq!(poller.load().load(Ordering::Relaxed), 1);

    signaler.send().unwrap();
    let ready = poller.wait().unwrap();
    assert_eq!(ready, vec![Ready::In(handle)]);
    assert_eq!(poller.owner(handle), Some(7));

    // Not drained: reported again without a new edge.
    assert_eq!(poller.wait().unwrap(), vec![Ready::In(handle)]);

    signaler.recv().unwrap();
    poller.clear_in_ready(handle);
    poller.add_timer(Duration::from_millis(10), 7, 1);
    assert_eq!(poller.wait().unwrap(), vec![]);

    poller.rm_fd(handle);
    assert_eq!(poller.load().load(Ordering::Relaxed), 0);
  }

  #[test]
  fn interest_gates_dispatch() {
    let mut poller = Poller::new().unwrap();
    let signaler = Signaler::new().unwrap();
    let handle = poller.add_fd(signaler.fd(), 1).unwrap();
    signaler.send().unwrap();
    poller.add_timer(Duration::from_millis(20), 1, 9);
    // pollin not set: only the timer fires.
    let ready = loop {
      let ready = poller.wait().unwrap();
      if !ready.is_empty() {
        break ready;
      }
    };
    assert_eq!(ready, vec![Ready::Timer { oid: 1, id: 9 }]);
    poller.set_pollin(handle);
    assert!(poller.is_in_ready(handle));
    poller.reset_pollin(handle);
    assert!(!poller.is_in_ready(handle));
  }

  #[test]
  fn timers_fire_in_deadline_order_and_can_be_cancelled() {
    let mut poller = Poller::new().unwrap();
    poller.add_timer(Duration::from_millis(30), 1, 2);
    poller.add_timer(Duration::from_millis(10), 1, 1);
    poller.add_timer(Duration::from_millis(20), 2, 1);
    poller.cancel_timer(2, 1);

    let mut fired = Vec::new();
    while fired.len() < 2 {
      fired.extend(poller.wait().unwrap());
    }
    assert_eq!(fired, vec![Ready::Timer { oid: 1, id: 1 }, Ready::Timer { oid: 1, id: 2 }]);
  }
}
