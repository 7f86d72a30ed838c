// src/runtime/signaler.rs

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// Byte-level wake-up primitive built on a nonblocking Unix stream pair.
///
/// Precondition: at most one signal may be outstanding per wait. Only
/// `Mailbox` drives a signaler, and it signals only when a flush found the
/// reader asleep, which the reader re-arms exactly once per consumed signal.
#[derive(Debug)]
pub(crate) struct Signaler {
  w: UnixStream,
  r: UnixStream,
}

impl Signaler {
  pub(crate) fn new() -> io::Result<Self> {
    let (w, r) = UnixStream::pair()?;
    w.set_nonblocking(true)?;
    r.set_nonblocking(true)?;
    Ok(Self { w, r })
  }

  /// Descriptor to register with a poller; readable while a signal is pending.
  pub(crate) fn fd(&self) -> RawFd {
    self.r.as_raw_fd()
  }

  pub(crate) fn send(&self) -> io::Result<()> {
    loop {
      match (&self.w).write(&[0u8]) {
        Ok(1) => return Ok(()),
        Ok(_) => continue,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    }
  }

  /// Waits until a signal is pending. `None` waits forever. Returns `false`
  /// when the timeout elapsed first.
  pub(crate) fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
      fd: self.fd(),
      events: libc::POLLIN,
      revents: 0,
    };
    let timeout_ms: libc::c_int = match timeout {
      None => -1,
      Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    };
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
      let err = io::Error::last_os_error();
      if err.kind() == io::ErrorKind::Interrupted {
        return Ok(false);
      }
      return Err(err);
    }
    Ok(rc > 0)
  }

  /// Consumes one pending signal.
  pub(crate) fn recv(&self) -> io::Result<()> {
    let mut byte = [0u8; 1];
    loop {
      match (&self.r).read(&mut byte) {
        Ok(1) => return Ok(()),
        Ok(_) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
          self.wait(None)?;
        }
        Err(e) => return Err(e),
      }
    }
  }
}
