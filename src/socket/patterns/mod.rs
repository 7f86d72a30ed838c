// src/socket/patterns/mod.rs

//! Message routing algorithms shared by the socket types.
//!
//! The algorithms only hold pipe ids; the pipes themselves stay in the
//! socket's [`PipeMap`] and are passed in on every call.

pub(crate) mod distributor;
pub(crate) mod fair_queue;
pub(crate) mod load_balancer;
pub(crate) mod mtrie;
pub(crate) mod trie;

pub(crate) use distributor::Distributor;
pub(crate) use fair_queue::FairQueue;
pub(crate) use load_balancer::LoadBalancer;
pub(crate) use mtrie::Mtrie;
pub(crate) use trie::Trie;

use crate::runtime::pipe::{Pipe, PipeId};
use std::collections::HashMap;

/// Pipes attached to one socket, keyed by id.
pub(crate) type PipeMap = HashMap<PipeId, Pipe>;

/// Moves `pipe` to position `to` in `pipes` by swapping. Returns false if the
/// pipe is not tracked.
pub(crate) fn swap_to(pipes: &mut [PipeId], pipe: PipeId, to: usize) -> bool {
  match pipes.iter().position(|p| *p == pipe) {
    Some(from) => {
      pipes.swap(from, to);
      true
    }
    None => false,
  }
}
