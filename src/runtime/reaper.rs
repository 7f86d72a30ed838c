// src/runtime/reaper.rs

//! Background thread that finishes closing sockets.
//!
//! A closed socket is moved here inside a `reap` command. The reaper polls the
//! socket's mailbox, drives its termination (lingering sessions, pipe
//! handshakes) and drops it once it reports destroyed.

use crate::context::CtxShared;
use crate::runtime::command::{Addr, Command, CommandKind, Oid, TERM_TID};
use crate::runtime::mailbox::MailboxReceiver;
use crate::runtime::poller::{Handle, Poller, Ready};
use crate::socket::core::SocketBase;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Reaper {
  ctx: Arc<CtxShared>,
  mailbox: MailboxReceiver,
  mailbox_handle: Handle,
  poller: Poller,
  sockets: HashMap<Oid, Box<SocketBase>>,
  terminating: bool,
}

impl Reaper {
  pub(crate) fn new(ctx: Arc<CtxShared>, mailbox: MailboxReceiver) -> io::Result<Self> {
    let mut poller = Poller::new()?;
    let mailbox_handle = poller.add_fd(mailbox.fd(), 0)?;
    poller.set_pollin(mailbox_handle);
    Ok(Self {
      ctx,
      mailbox,
      mailbox_handle,
      poller,
      sockets: HashMap::new(),
      terminating: false,
    })
  }

  pub(crate) fn run(mut self) {
    tracing::debug!("Reaper started");
    loop {
      let ready = match self.poller.wait() {
        Ok(ready) => ready,
        Err(e) => {
          tracing::error!(error = %e, "Reaper poll failed");
          return;
        }
      };
      for event in ready {
        match event {
          Ready::In(handle) if handle == self.mailbox_handle => {
            if self.process_mailbox() {
              tracing::debug!("Reaper stopped");
              return;
            }
          }
          Ready::In(handle) => {
            if self.poller.is_in_ready(handle) {
              if let Some(oid) = self.poller.owner(handle) {
                self.socket_event(oid);
              }
            }
          }
          // Sockets register no timers and never ask for pollout.
          Ready::Out(_) | Ready::Timer { .. } => {}
        }
      }
    }
  }

  fn socket_event(&mut self, oid: Oid) {
    let Some(socket) = self.sockets.get_mut(&oid) else {
      return;
    };
    socket.reaper_in_event(&mut self.poller);
    if socket.is_destroyed() {
      self.sockets.remove(&oid);
      tracing::trace!(oid, remaining = self.sockets.len(), "Socket reaped");
    }
  }

  fn process_mailbox(&mut self) -> bool {
    loop {
      let cmd = match self.mailbox.recv(Some(Duration::ZERO)) {
        Ok(Some(cmd)) => cmd,
        Ok(None) => {
          self.poller.clear_in_ready(self.mailbox_handle);
          return false;
        }
        Err(e) => {
          tracing::error!(error = %e, "Reaper mailbox failed");
          return true;
        }
      };
      match cmd.kind {
        CommandKind::Reap(mut socket) => {
          let oid = socket.oid();
          if let Err(e) = socket.start_reaping(&mut self.poller) {
            tracing::error!(oid, error = %e, "Failed to adopt closed socket");
          }
          self.sockets.insert(oid, socket);
          self.socket_event(oid);
        }
        // Sent when the socket released its slot; the socket itself is
        // dropped from the map by `socket_event`.
        CommandKind::Reaped => {
          if self.finished() {
            return true;
          }
        }
        CommandKind::Stop => {
          self.terminating = true;
          if self.finished() {
            return true;
          }
        }
        other => tracing::warn!(command = other.name(), "Unexpected command on reaper"),
      }
    }
  }

  // Reports Done to the terminating context once every socket is gone.
  fn finished(&mut self) -> bool {
    if !self.terminating || !self.sockets.is_empty() {
      return false;
    }
    self.poller.rm_fd(self.mailbox_handle);
    self.ctx.send_command(Command::new(Addr::new(TERM_TID, 0), CommandKind::Done));
    true
  }
}
