// src/runtime/mailbox.rs

//! Per-thread command queue: a YPipe of commands plus a signaler that wakes the
//! owning thread when the queue goes from empty to non-empty.

use crate::runtime::command::Command;
use crate::runtime::signaler::Signaler;
use crate::runtime::ypipe::{ypipe, YPipeReader, YPipeWriter, COMMAND_PIPE_GRANULARITY};

use parking_lot::Mutex;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

struct SenderInner {
  // Many threads may post to one mailbox; the ypipe itself is single-producer.
  pipe: Mutex<YPipeWriter<Command, COMMAND_PIPE_GRANULARITY>>,
  signaler: Arc<Signaler>,
}

/// The sending end of a thread's mailbox. Cloneable; registered in the
/// context's slot table.
#[derive(Clone)]
pub(crate) struct MailboxSender {
  inner: Arc<SenderInner>,
}

impl MailboxSender {
  pub(crate) fn send(&self, cmd: Command) {
    let published = {
      let mut pipe = self.inner.pipe.lock();
      pipe.write(cmd, false);
      pipe.flush()
    };
    if !published {
      if let Err(e) = self.inner.signaler.send() {
        tracing::error!(error = %e, "Failed to signal mailbox reader");
      }
    }
  }
}

impl std::fmt::Debug for MailboxSender {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MailboxSender").field("fd", &self.inner.signaler.fd()).finish()
  }
}

/// The receiving end of a mailbox. Owned by exactly one thread at a time.
pub(crate) struct MailboxReceiver {
  pipe: YPipeReader<Command, COMMAND_PIPE_GRANULARITY>,
  signaler: Arc<Signaler>,
  // While active, the signal that woke us is still unconsumed.
  active: bool,
}

impl MailboxReceiver {
  /// Descriptor that turns readable when commands are waiting.
  pub(crate) fn fd(&self) -> RawFd {
    self.signaler.fd()
  }

  /// Fetches the next command. `Some(Duration::ZERO)` polls, `None` waits
  /// forever. Returns `Ok(None)` when nothing arrived in time.
  pub(crate) fn recv(&mut self, timeout: Option<Duration>) -> io::Result<Option<Command>> {
    if self.active {
      if let Some(cmd) = self.pipe.read() {
        return Ok(Some(cmd));
      }
      // Queue drained: go passive and consume the signal that activated us.
      self.active = false;
      self.signaler.recv()?;
    }

    if !self.signaler.wait(timeout)? {
      return Ok(None);
    }

    self.active = true;
    match self.pipe.read() {
      Some(cmd) => Ok(Some(cmd)),
      None => {
        // A signal is only sent after a successful publish.
        tracing::error!("Mailbox signalled with an empty command queue");
        Ok(None)
      }
    }
  }
}

/// Creates a new mailbox channel pair.
pub(crate) fn mailbox() -> io::Result<(MailboxSender, MailboxReceiver)> {
  let signaler = Arc::new(Signaler::new()?);
  let (writer, mut reader) = ypipe::<Command, COMMAND_PIPE_GRANULARITY>();
  // Put the reader to sleep so the very first command raises a signal.
  let primed = reader.read();
  debug_assert!(primed.is_none());
  Ok((
    MailboxSender {
      inner: Arc::new(SenderInner {
        pipe: Mutex::new(writer),
        signaler: signaler.clone(),
      }),
    },
    MailboxReceiver {
      pipe: reader,
      signaler,
      active: false,
    },
  ))
}
