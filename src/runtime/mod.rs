// src/runtime/mod.rs

//! Engine primitives: lock-free queues, pipes, mailboxes, the ownership
//! protocol and the reactor threads.

pub(crate) mod command;
pub(crate) mod io_thread;
pub(crate) mod mailbox;
pub(crate) mod own;
pub(crate) mod pipe;
pub(crate) mod poller;
pub(crate) mod reaper;
pub(crate) mod signaler;
pub(crate) mod ypipe;
