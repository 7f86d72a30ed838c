// src/runtime/own.rs

//! Ownership tree and the two-phase termination protocol.
//!
//! Each long-lived engine object embeds an [`Own`]. Termination travels down
//! the tree as `term` commands and back up as `term_ack`s; an object may only
//! be destroyed once every child acked and every sequenced command that was
//! sent to it (plug, own, attach, bind) has been processed.

use crate::context::CtxShared;
use crate::runtime::command::{Command, CommandKind, ObjectRef};

use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Own {
  me: ObjectRef,
  ctx: Arc<CtxShared>,
  owner: Option<ObjectRef>,
  owned: Vec<ObjectRef>,
  processed_seqnum: u64,
  terminating: bool,
  term_acks: usize,
  destroyed: bool,
  // Linger handed to children when terminating on a child's own request.
  linger: Option<Duration>,
}

impl Own {
  pub(crate) fn new(ctx: Arc<CtxShared>, me: ObjectRef, owner: Option<ObjectRef>, linger: Option<Duration>) -> Self {
    Self {
      me,
      ctx,
      owner,
      owned: Vec::new(),
      processed_seqnum: 0,
      terminating: false,
      term_acks: 0,
      destroyed: false,
      linger,
    }
  }

  pub(crate) fn me(&self) -> &ObjectRef {
    &self.me
  }

  pub(crate) fn ctx(&self) -> &Arc<CtxShared> {
    &self.ctx
  }

  pub(crate) fn is_terminating(&self) -> bool {
    self.terminating
  }

  pub(crate) fn set_linger(&mut self, linger: Option<Duration>) {
    self.linger = linger;
  }

  /// Called after processing any sequenced command addressed to us.
  pub(crate) fn process_seqnum(&mut self) {
    self.processed_seqnum += 1;
  }

  fn send(&self, to: &ObjectRef, kind: CommandKind) {
    self.ctx.send_command(Command::new(to.addr, kind));
  }

  /// Registers `child` as ours and hands the object to its thread.
  pub(crate) fn launch_child(&self, child: ObjectRef, object: Box<crate::runtime::io_thread::IoObject>) {
    // Own goes to our own mailbox ahead of the plug, so any term_req the child
    // sends later always finds it registered.
    self.me.inc_seqnum();
    self.send(&self.me, CommandKind::Own(child.clone()));
    child.inc_seqnum();
    self.send(&child, CommandKind::Plug(object));
  }

  pub(crate) fn process_own(&mut self, child: ObjectRef) {
    // Already shutting down: the newcomer is terminated right away.
    if self.terminating {
      self.register_term_acks(1);
      self.send(&child, CommandKind::Term { linger: Some(Duration::ZERO) });
      return;
    }
    self.owned.push(child);
  }

  /// Asks the owner to terminate us. Returns true if we are the root of the
  /// tree, in which case the caller must run its own `process_term` now.
  pub(crate) fn terminate(&mut self) -> bool {
    if self.terminating {
      return false;
    }
    match &self.owner {
      None => true,
      Some(owner) => {
        self.send(owner, CommandKind::TermReq(self.me.clone()));
        false
      }
    }
  }

  pub(crate) fn process_term_req(&mut self, child: ObjectRef) {
    if self.terminating {
      return;
    }
    // The child may have been terminated already by another path.
    let Some(pos) = self.owned.iter().position(|o| *o == child) else {
      return;
    };
    self.owned.swap_remove(pos);
    self.register_term_acks(1);
    self.send(&child, CommandKind::Term { linger: self.linger });
  }

  /// Sends `term` to all children and enters the terminating state. The
  /// caller follows up with `check_term_acks`.
  pub(crate) fn process_term(&mut self, linger: Option<Duration>) {
    debug_assert!(!self.terminating);
    for child in &self.owned {
      self.send(child, CommandKind::Term { linger });
    }
    self.register_term_acks(self.owned.len());
    self.owned.clear();
    self.terminating = true;
  }

  pub(crate) fn register_term_acks(&mut self, count: usize) {
    self.term_acks += count;
  }

  pub(crate) fn unregister_term_ack(&mut self) {
    debug_assert!(self.term_acks > 0);
    self.term_acks = self.term_acks.saturating_sub(1);
  }

  /// Returns true exactly once: when the object has fully quiesced and must
  /// now destroy itself. The owner has already been sent its `term_ack`.
  pub(crate) fn check_term_acks(&mut self) -> bool {
    if self.destroyed
      || !self.terminating
      || self.processed_seqnum != self.me.sent_seqnum()
      || self.term_acks != 0
    {
      return false;
    }
    if let Some(owner) = &self.owner {
      self.send(owner, CommandKind::TermAck);
    }
    self.destroyed = true;
    true
  }

  pub(crate) fn is_destroyed(&self) -> bool {
    self.destroyed
  }
}
