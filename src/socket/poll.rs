// src/socket/poll.rs

//! Waiting on several sockets at once.

use crate::error::ZmqError;
use crate::socket::options::{POLLIN, POLLOUT};
use crate::socket::types::Socket;

use std::io;
use std::time::{Duration, Instant};

/// One socket to watch and the `POLLIN`/`POLLOUT` events of interest.
#[derive(Debug)]
pub struct PollItem<'a> {
  socket: &'a Socket,
  events: i32,
  revents: i32,
}

impl<'a> PollItem<'a> {
  pub fn new(socket: &'a Socket, events: i32) -> Self {
    Self {
      socket,
      events,
      revents: 0,
    }
  }

  pub fn socket(&self) -> &'a Socket {
    self.socket
  }

  /// Events found ready by the last [`poll`].
  pub fn revents(&self) -> i32 {
    self.revents
  }

  pub fn is_readable(&self) -> bool {
    self.revents & POLLIN != 0
  }

  pub fn is_writable(&self) -> bool {
    self.revents & POLLOUT != 0
  }
}

/// Waits until at least one item is ready or `timeout` elapses (`None` waits
/// forever). Returns the number of ready items.
///
/// A socket's mailbox descriptor only turns readable when a command arrives
/// after its queue was drained, so readiness is always taken from `EVENTS`
/// and the descriptors are only used to sleep.
pub fn poll(items: &mut [PollItem<'_>], timeout: Option<Duration>) -> Result<usize, ZmqError> {
  if items.is_empty() {
    return Err(ZmqError::InvalidArgument("nothing to poll".into()));
  }
  let deadline = timeout.map(|t| Instant::now() + t);
  let mut fds = items
    .iter()
    .map(|item| {
      Ok(libc::pollfd {
        fd: item.socket.mailbox_fd()?,
        events: libc::POLLIN,
        revents: 0,
      })
    })
    .collect::<Result<Vec<_>, ZmqError>>()?;

  loop {
    let mut ready = 0;
    for item in items.iter_mut() {
      item.revents = item.socket.events()? & item.events;
      if item.revents != 0 {
        ready += 1;
      }
    }
    if ready > 0 {
      return Ok(ready);
    }

    let timeout_ms: libc::c_int = match deadline {
      None => -1,
      Some(deadline) => {
        let now = Instant::now();
        if now >= deadline {
          return Ok(0);
        }
        // Round up so we never wake just before the deadline.
        let left = deadline - now;
        (left.as_micros().div_ceil(1000)).min(libc::c_int::MAX as u128) as libc::c_int
      }
    };
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
      let err = io::Error::last_os_error();
      if err.kind() != io::ErrorKind::Interrupted {
        return Err(err.into());
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::Context;
  use crate::message::Msg;
  use crate::socket::SocketType;

  #[test]
  fn times_out_when_nothing_is_ready() {
    let ctx = Context::new().unwrap();
    let pull = ctx.socket(SocketType::Pull).unwrap();
    pull.bind("inproc://poll-idle").unwrap();

    let start = Instant::now();
    let mut items = [PollItem::new(&pull, POLLIN)];
    assert_eq!(poll(&mut items, Some(Duration::from_millis(50))).unwrap(), 0);
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(!items[0].is_readable());
  }

  #[test]
  fn reports_the_ready_socket() {
    let ctx = Context::new().unwrap();
    let quiet = ctx.socket(SocketType::Pull).unwrap();
    let busy = ctx.socket(SocketType::Pull).unwrap();
    let push = ctx.socket(SocketType::Push).unwrap();
    quiet.bind("inproc://poll-quiet").unwrap();
    busy.bind("inproc://poll-busy").unwrap();
    push.connect("inproc://poll-busy").unwrap();

    let sender = std::thread::spawn(move || {
      std::thread::sleep(Duration::from_millis(50));
      push.send(Msg::from_static(b"wake")).unwrap();
      push
    });
    let mut items = [PollItem::new(&quiet, POLLIN), PollItem::new(&busy, POLLIN | POLLOUT)];
    assert_eq!(poll(&mut items, Some(Duration::from_secs(5))).unwrap(), 1);
    assert!(!items[0].is_readable());
    assert!(items[1].is_readable());
    // PULL never reports writable.
    assert!(!items[1].is_writable());
    assert_eq!(busy.recv().unwrap().data().unwrap(), b"wake");
    drop(sender.join().unwrap());
  }

  #[test]
  fn closed_sockets_cannot_be_polled() {
    let ctx = Context::new().unwrap();
    let pair = ctx.socket(SocketType::Pair).unwrap();
    pair.close().unwrap();
    let mut items = [PollItem::new(&pair, POLLIN)];
    assert!(matches!(poll(&mut items, Some(Duration::ZERO)), Err(ZmqError::InvalidState(_))));
    assert!(matches!(poll(&mut [], None), Err(ZmqError::InvalidArgument(_))));
  }
}
