// src/socket/patterns/mtrie.rs

use crate::runtime::pipe::PipeId;
use crate::socket::patterns::trie::{Node, Subscribers};

use std::collections::BTreeSet;

impl Subscribers for BTreeSet<PipeId> {
  fn is_vacant(&self) -> bool {
    self.is_empty()
  }
}

/// Subscription trie that tracks which pipes subscribed to each prefix.
/// Used by XPUB/PUB to route outgoing messages.
#[derive(Default)]
pub(crate) struct Mtrie {
  root: Node<BTreeSet<PipeId>>,
}

impl Mtrie {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Subscribes `pipe` to `prefix`. Returns true if the prefix had no
  /// subscriber before.
  pub(crate) fn add(&mut self, prefix: &[u8], pipe: PipeId) -> bool {
    let node = self.root.find_or_insert(prefix);
    let first = node.value.is_empty();
    node.value.insert(pipe);
    first
  }

  /// Unsubscribes `pipe` from `prefix`. Returns true if the prefix lost its
  /// last subscriber.
  pub(crate) fn rm(&mut self, prefix: &[u8], pipe: PipeId) -> bool {
    self.root.remove_path(prefix, |pipes| pipes.remove(&pipe) && pipes.is_empty())
  }

  /// Removes `pipe` everywhere. `f` receives each prefix that is left without
  /// subscribers.
  pub(crate) fn rm_pipe(&mut self, pipe: PipeId, mut f: impl FnMut(&[u8])) {
    let mut buf = Vec::new();
    self.root.visit_mut(&mut buf, &mut |prefix: &[u8], pipes: &mut BTreeSet<PipeId>| {
      if pipes.remove(&pipe) && pipes.is_empty() {
        f(prefix);
      }
    });
  }

  /// Calls `f` for every pipe subscribed to a prefix of `data`. A pipe
  /// subscribed to several matching prefixes is reported once per prefix.
  pub(crate) fn match_data(&self, data: &[u8], mut f: impl FnMut(PipeId)) {
    self.root.walk_prefixes(data, |pipes| {
      for pipe in pipes {
        f(*pipe);
      }
    });
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.root.is_redundant()
  }
}
