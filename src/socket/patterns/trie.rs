// src/socket/patterns/trie.rs

//! Prefix tries for subscriptions.
//!
//! Both tries share [`Node`], a byte-keyed node whose child table only spans
//! the range of bytes actually in use (`min` plus the table length). Nodes are
//! pruned as soon as they hold no subscriber and have no live children.

/// Per-node subscriber state.
pub(crate) trait Subscribers: Default {
  /// True if nobody is subscribed to the prefix ending here.
  fn is_vacant(&self) -> bool;
}

impl Subscribers for u32 {
  fn is_vacant(&self) -> bool {
    *self == 0
  }
}

pub(crate) struct Node<V> {
  pub(crate) value: V,
  min: u8,
  next: Vec<Option<Box<Node<V>>>>,
  live_nodes: usize,
}

impl<V: Subscribers> Default for Node<V> {
  fn default() -> Self {
    Self {
      value: V::default(),
      min: 0,
      next: Vec::new(),
      live_nodes: 0,
    }
  }
}

impl<V: Subscribers> Node<V> {
  pub(crate) fn is_redundant(&self) -> bool {
    self.value.is_vacant() && self.live_nodes == 0
  }

  /// Width of the child table.
  pub(crate) fn table_len(&self) -> usize {
    self.next.len()
  }

  fn index(&self, c: u8) -> Option<usize> {
    if self.next.is_empty() || c < self.min {
      return None;
    }
    let idx = (c - self.min) as usize;
    (idx < self.next.len()).then_some(idx)
  }

  fn child(&self, c: u8) -> Option<&Node<V>> {
    self.index(c).and_then(|i| self.next[i].as_deref())
  }

  fn child_or_insert(&mut self, c: u8) -> &mut Node<V> {
    if self.next.is_empty() {
      self.min = c;
      self.next.push(None);
    } else if c < self.min {
      let grow = (self.min - c) as usize;
      self.next.splice(0..0, std::iter::repeat_with(|| None).take(grow));
      self.min = c;
    } else if (c - self.min) as usize >= self.next.len() {
      self.next.resize_with((c - self.min) as usize + 1, || None);
    }
    let slot = &mut self.next[(c - self.min) as usize];
    if slot.is_none() {
      self.live_nodes += 1;
    }
    slot.get_or_insert_with(Box::default)
  }

  fn drop_child(&mut self, idx: usize) {
    self.next[idx] = None;
    self.live_nodes -= 1;
  }

  // Shrinks the child table to the span of live children.
  fn compact(&mut self) {
    if self.live_nodes == 0 {
      self.next.clear();
      return;
    }
    let lead = self.next.iter().take_while(|n| n.is_none()).count();
    if lead > 0 {
      self.next.drain(..lead);
      self.min += lead as u8;
    }
    while matches!(self.next.last(), Some(None)) {
      self.next.pop();
    }
  }

  pub(crate) fn find_or_insert(&mut self, prefix: &[u8]) -> &mut Node<V> {
    match prefix.split_first() {
      None => self,
      Some((&c, rest)) => self.child_or_insert(c).find_or_insert(rest),
    }
  }

  /// Applies `f` to the node at `prefix`, pruning nodes that end up
  /// redundant. Returns `f`'s result, or false when the prefix is unknown.
  pub(crate) fn remove_path(&mut self, prefix: &[u8], f: impl FnOnce(&mut V) -> bool) -> bool {
    let Some((&c, rest)) = prefix.split_first() else {
      return f(&mut self.value);
    };
    let Some(idx) = self.index(c) else {
      return false;
    };
    let Some(child) = self.next[idx].as_mut() else {
      return false;
    };
    let result = child.remove_path(rest, f);
    if child.is_redundant() {
      self.drop_child(idx);
      self.compact();
    }
    result
  }

  /// Calls `f` for every node on the path spelled by `data`, root first.
  pub(crate) fn walk_prefixes(&self, data: &[u8], mut f: impl FnMut(&V)) {
    let mut node = self;
    let mut rest = data;
    loop {
      f(&node.value);
      let Some((&c, tail)) = rest.split_first() else {
        return;
      };
      match node.child(c) {
        Some(child) => {
          node = child;
          rest = tail;
        }
        None => return,
      }
    }
  }

  /// Depth-first visit of every node with its full prefix.
  pub(crate) fn visit<F: FnMut(&[u8], &V)>(&self, buf: &mut Vec<u8>, f: &mut F) {
    f(buf, &self.value);
    for (i, child) in self.next.iter().enumerate() {
      if let Some(child) = child {
        buf.push((self.min as usize + i) as u8);
        child.visit(buf, f);
        buf.pop();
      }
    }
  }

  /// Like [`Node::visit`] with mutable access; prunes what becomes redundant.
  pub(crate) fn visit_mut<F: FnMut(&[u8], &mut V)>(&mut self, buf: &mut Vec<u8>, f: &mut F) {
    f(buf, &mut self.value);
    let min = self.min as usize;
    let mut pruned = false;
    for i in 0..self.next.len() {
      let Some(child) = self.next[i].as_mut() else {
        continue;
      };
      buf.push((min + i) as u8);
      child.visit_mut(buf, f);
      buf.pop();
      if child.is_redundant() {
        self.drop_child(i);
        pruned = true;
      }
    }
    if pruned {
      self.compact();
    }
  }
}

/// Reference-counted subscription set used by SUB/XSUB.
#[derive(Default)]
pub(crate) struct Trie {
  root: Node<u32>,
}

impl Trie {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Adds one reference to `prefix`. Returns true if it was not subscribed
  /// before.
  pub(crate) fn add(&mut self, prefix: &[u8]) -> bool {
    let node = self.root.find_or_insert(prefix);
    node.value += 1;
    node.value == 1
  }

  /// Drops one reference. Returns true if this was the last one.
  pub(crate) fn rm(&mut self, prefix: &[u8]) -> bool {
    self.root.remove_path(prefix, |refcnt| {
      if *refcnt == 0 {
        return false;
      }
      *refcnt -= 1;
      *refcnt == 0
    })
  }

  /// True if any subscribed prefix matches the start of `data`.
  pub(crate) fn check(&self, data: &[u8]) -> bool {
    let mut matched = false;
    self.root.walk_prefixes(data, |refcnt| matched |= *refcnt > 0);
    matched
  }

  /// Calls `f` once for every subscribed prefix.
  pub(crate) fn apply(&self, mut f: impl FnMut(&[u8])) {
    let mut buf = Vec::new();
    self.root.visit(&mut buf, &mut |prefix: &[u8], refcnt: &u32| {
      if *refcnt > 0 {
        f(prefix);
      }
    });
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.root.is_redundant()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prefixes_match_and_refcount() {
    let mut trie = Trie::new();
    assert!(!trie.check(b"anything"));
    assert!(trie.add(b"abc"));
    assert!(!trie.add(b"abc"));
    assert!(trie.check(b"abcdef"));
    assert!(trie.check(b"abc"));
    assert!(!trie.check(b"ab"));
    assert!(!trie.check(b"abx"));

    assert!(!trie.rm(b"abc"), "one reference left");
    assert!(trie.check(b"abc"));
    assert!(trie.rm(b"abc"));
    assert!(!trie.check(b"abc"));
    assert!(trie.is_empty(), "nodes are pruned once unused");
  }

  #[test]
  fn empty_prefix_matches_everything() {
    let mut trie = Trie::new();
    assert!(trie.add(b""));
    assert!(trie.check(b""));
    assert!(trie.check(b"\x00\xff"));
  }

  #[test]
  fn removing_unknown_prefix_is_harmless() {
    let mut trie = Trie::new();
    trie.add(b"a");
    assert!(!trie.rm(b"b"));
    assert!(!trie.rm(b"ab"));
    assert!(!trie.rm(b""));
    assert!(trie.check(b"a"));
  }

  #[test]
  fn child_table_spans_only_used_bytes() {
    let mut trie = Trie::new();
    trie.add(&[10]);
    trie.add(&[12]);
    assert_eq!(trie.root.table_len(), 3);
    trie.add(&[5]);
    assert_eq!(trie.root.table_len(), 8);
    trie.rm(&[5]);
    assert_eq!(trie.root.table_len(), 3);
    trie.rm(&[12]);
    assert_eq!(trie.root.table_len(), 1);
  }

  #[test]
  fn apply_lists_every_subscription() {
    let mut trie = Trie::new();
    for topic in [&b"b"[..], b"a", b"ab", b""] {
      trie.add(topic);
    }
    let mut seen = Vec::new();
    trie.apply(|p| seen.push(p.to_vec()));
    assert_eq!(seen, vec![b"".to_vec(), b"a".to_vec(), b"ab".to_vec(), b"b".to_vec()]);
  }
}
