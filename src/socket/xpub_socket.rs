// src/socket/xpub_socket.rs

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::PipeId;
use crate::socket::options::{parse_bool_option, XPUB_VERBOSE};
use crate::socket::patterns::{Distributor, Mtrie, PipeMap};
use crate::socket::SocketPattern;

use std::collections::VecDeque;

/// Publisher side of pub-sub. Subscriptions arrive as messages
/// `[1|0] + prefix` on the pipes; XPUB also hands them to the user.
pub(crate) struct XPubSocket {
  subscriptions: Mtrie,
  dist: Distributor,
  // Queue subscription changes for `xrecv` (XPUB only, not PUB).
  expose_subscriptions: bool,
  verbose: bool,
  // In the middle of sending a multi-part message.
  more: bool,
  pending: VecDeque<Vec<u8>>,
}

impl XPubSocket {
  pub(crate) fn new(expose_subscriptions: bool) -> Self {
    Self {
      subscriptions: Mtrie::new(),
      dist: Distributor::new(),
      expose_subscriptions,
      verbose: false,
      more: false,
      pending: VecDeque::new(),
    }
  }
}

impl std::fmt::Debug for XPubSocket {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("XPubSocket")
      .field("dist", &self.dist)
      .field("verbose", &self.verbose)
      .field("pending", &self.pending.len())
      .finish()
  }
}

impl SocketPattern for XPubSocket {
  fn xattach_pipe(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    self.dist.attach(pipe);
    // Subscriptions may already be waiting on the new pipe.
    self.xread_activated(pipe, pipes);
  }

  fn xsetsockopt(&mut self, option: i32, value: &[u8], _pipes: &mut PipeMap) -> Result<bool, ZmqError> {
    if option != XPUB_VERBOSE || !self.expose_subscriptions {
      return Ok(false);
    }
    self.verbose = parse_bool_option(value, option)?;
    Ok(true)
  }

  fn xread_activated(&mut self, pipe: PipeId, pipes: &mut PipeMap) {
    let Some(p) = pipes.get_mut(&pipe) else {
      return;
    };
    while let Some(sub) = p.read() {
      let data = sub.as_slice();
      let Some((&kind, prefix)) = data.split_first() else {
        continue;
      };
      let unique = match kind {
        0 => self.subscriptions.rm(prefix, pipe),
        1 => self.subscriptions.add(prefix, pipe),
        // Anything else is not a subscription message.
        _ => continue,
      };
      tracing::trace!(pipe_id = pipe, subscribe = kind == 1, unique, "Subscription update");
      if self.expose_subscriptions && (unique || (kind == 1 && self.verbose)) {
        self.pending.push_back(data.to_vec());
      }
    }
  }

  fn xwrite_activated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    self.dist.activated(pipe);
  }

  fn xterminated(&mut self, pipe: PipeId, _pipes: &mut PipeMap) {
    // Prefixes nobody subscribes to anymore are reported upstream as
    // unsubscriptions.
    let expose = self.expose_subscriptions;
    let pending = &mut self.pending;
    self.subscriptions.rm_pipe(pipe, |prefix| {
      if expose {
        let mut unsub = Vec::with_capacity(prefix.len() + 1);
        unsub.push(0);
        unsub.extend_from_slice(prefix);
        pending.push_back(unsub);
      }
    });
    self.dist.terminated(pipe);
  }

  fn xsend(&mut self, msg: &mut Msg, pipes: &mut PipeMap) -> Result<(), ZmqError> {
    let msg_more = msg.is_more();

    // The first part decides which pipes get the whole message.
    if !self.more {
      let dist = &mut self.dist;
      self.subscriptions.match_data(msg.as_slice(), |pipe| dist.match_pipe(pipe));
    }

    self.dist.send_to_matching(std::mem::take(msg), pipes);

    if !msg_more {
      self.dist.unmatch();
    }
    self.more = msg_more;
    Ok(())
  }

  fn xrecv(&mut self, _pipes: &mut PipeMap) -> Result<Msg, ZmqError> {
    if !self.expose_subscriptions {
      return Err(ZmqError::UnsupportedOperation("recv"));
    }
    self.pending.pop_front().map(Msg::from_vec).ok_or(ZmqError::WouldBlock)
  }

  fn xhas_in(&mut self, _pipes: &mut PipeMap) -> bool {
    !self.pending.is_empty()
  }

  fn xhas_out(&mut self, _pipes: &mut PipeMap) -> bool {
    self.dist.has_out()
  }
}
