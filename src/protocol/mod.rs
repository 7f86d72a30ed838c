// src/protocol/mod.rs

pub(crate) mod zmtp;
