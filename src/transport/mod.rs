// src/transport/mod.rs

//! Endpoint parsing and the stream transports. `ipc://` is carried over
//! loopback TCP, `inproc://` never leaves the context.

pub(crate) mod endpoint;
pub(crate) mod tcp;
