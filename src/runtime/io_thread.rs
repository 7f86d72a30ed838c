// src/runtime/io_thread.rs

use crate::runtime::command::{CommandKind, Oid, Tid};
use crate::runtime::mailbox::MailboxReceiver;
use crate::runtime::poller::{Handle, Poller, Ready};
use crate::session::Session;
use crate::transport::tcp::{TcpConnecter, TcpListener};

use std::collections::HashMap;
use std::io;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

/// Events an object living on an I/O thread reacts to.
pub(crate) trait IoHandler {
  fn oid(&self) -> Oid;
  /// Runs once the object arrived on its thread.
  fn plug(&mut self, poller: &mut Poller);
  fn in_event(&mut self, _poller: &mut Poller, _handle: Handle) {}
  fn out_event(&mut self, _poller: &mut Poller, _handle: Handle) {}
  fn timer_event(&mut self, _poller: &mut Poller, _id: u32) {}
  fn process_command(&mut self, poller: &mut Poller, kind: CommandKind);
  /// True once the object finished terminating and can be dropped.
  fn is_destroyed(&self) -> bool;
}

/// Everything an I/O thread can host.
pub(crate) enum IoObject {
  Session(Session),
  Listener(TcpListener),
  Connecter(TcpConnecter),
}

impl IoObject {
  fn handler(&mut self) -> &mut dyn IoHandler {
    match self {
      IoObject::Session(s) => s,
      IoObject::Listener(l) => l,
      IoObject::Connecter(c) => c,
    }
  }

  fn kind(&self) -> &'static str {
    match self {
      IoObject::Session(_) => "session",
      IoObject::Listener(_) => "listener",
      IoObject::Connecter(_) => "connecter",
    }
  }
}

/// One reactor thread: its mailbox plus an arena of the objects living on it.
pub(crate) struct IoThread {
  tid: Tid,
  mailbox: MailboxReceiver,
  mailbox_handle: Handle,
  poller: Poller,
  objects: HashMap<Oid, Box<IoObject>>,
}

impl IoThread {
  pub(crate) fn new(tid: Tid, mailbox: MailboxReceiver) -> io::Result<Self> {
    let mut poller = Poller::new()?;
    let mailbox_handle = poller.add_fd(mailbox.fd(), 0)?;
    poller.set_pollin(mailbox_handle);
    Ok(Self {
      tid,
      mailbox,
      mailbox_handle,
      poller,
      objects: HashMap::new(),
    })
  }

  pub(crate) fn load(&self) -> Arc<AtomicUsize> {
    self.poller.load()
  }

  pub(crate) fn run(mut self) {
    tracing::debug!(tid = self.tid, "I/O thread started");
    loop {
      let ready = match self.poller.wait() {
        Ok(ready) => ready,
        Err(e) => {
          tracing::error!(tid = self.tid, error = %e, "I/O thread poll failed");
          break;
        }
      };
      for event in ready {
        match event {
          Ready::In(handle) if handle == self.mailbox_handle => {
            if self.process_mailbox() {
              tracing::debug!(tid = self.tid, objects = self.objects.len(), "I/O thread stopped");
              return;
            }
          }
          Ready::In(handle) => {
            if self.poller.is_in_ready(handle) {
              self.dispatch(self.poller.owner(handle), |obj, poller| obj.in_event(poller, handle));
            }
          }
          Ready::Out(handle) => {
            if self.poller.is_out_ready(handle) {
              self.dispatch(self.poller.owner(handle), |obj, poller| obj.out_event(poller, handle));
            }
          }
          Ready::Timer { oid, id } => self.dispatch(Some(oid), |obj, poller| obj.timer_event(poller, id)),
        }
      }
    }
  }

  fn dispatch(&mut self, oid: Option<Oid>, f: impl FnOnce(&mut dyn IoHandler, &mut Poller)) {
    let Some(oid) = oid else { return };
    let Some(object) = self.objects.get_mut(&oid) else {
      tracing::trace!(tid = self.tid, oid, "Event for departed object");
      return;
    };
    f(object.handler(), &mut self.poller);
    if object.handler().is_destroyed() {
      let kind = object.kind();
      self.objects.remove(&oid);
      tracing::trace!(tid = self.tid, oid, kind, "I/O object destroyed");
    }
  }

  /// Drains the mailbox. Returns true when the thread was told to stop.
  fn process_mailbox(&mut self) -> bool {
    loop {
      let cmd = match self.mailbox.recv(Some(Duration::ZERO)) {
        Ok(Some(cmd)) => cmd,
        Ok(None) => {
          self.poller.clear_in_ready(self.mailbox_handle);
          return false;
        }
        Err(e) => {
          tracing::error!(tid = self.tid, error = %e, "I/O thread mailbox failed");
          return true;
        }
      };
      let oid = cmd.destination.oid;
      match cmd.kind {
        CommandKind::Stop if oid == 0 => {
          self.poller.rm_fd(self.mailbox_handle);
          return true;
        }
        CommandKind::Plug(mut object) => {
          let oid = object.handler().oid();
          self.objects.insert(oid, object);
          self.dispatch(Some(oid), |obj, poller| obj.plug(poller));
        }
        kind => self.dispatch(Some(oid), |obj, poller| obj.process_command(poller, kind)),
      }
    }
  }
}
