// src/protocol/zmtp/mod.rs

//! Wire framing: the version-detecting greeting plus the legacy and v1
//! frame codecs.

pub(crate) mod decoder;
pub(crate) mod encoder;
pub(crate) mod greeting;

use crate::error::ZmqError;
use crate::message::Msg;

pub(crate) use decoder::Decoder;
pub(crate) use encoder::Encoder;

// --- Frame flags ---
/// More frames of the same message follow. Same bit in both framings.
pub(crate) const ZMTP_FLAG_MORE: u8 = 0b0000_0001;
/// v1 only: the size field is 8 bytes instead of 1.
pub(crate) const ZMTP_FLAG_LONG: u8 = 0b0000_0010;

/// Read chunk size of the engine.
pub(crate) const IN_BATCH_SIZE: usize = 8192;
/// Output is assembled up to roughly this many bytes before writing.
pub(crate) const OUT_BATCH_SIZE: usize = 8192;

/// Frame layout negotiated by the greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
  /// `[len+1][flags][body]` with `len+1` as one byte or `0xFF` + u64.
  Legacy,
  /// `[flags][len][body]` with `len` as one byte or, with `LONG`, a u64.
  V1,
}

/// Where decoded messages go. `WouldBlock` means "full, retry later".
pub(crate) trait MsgSink {
  fn push_msg(&mut self, msg: Msg) -> Result<(), ZmqError>;
}

/// Where messages to encode come from. `None` means nothing to send now.
pub(crate) trait MsgSource {
  fn pull_msg(&mut self) -> Option<Msg>;
}
