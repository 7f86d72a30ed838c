// src/session/mod.rs

pub(crate) mod base;
pub(crate) mod link;

pub(crate) use base::Session;
