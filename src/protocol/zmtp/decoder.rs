// src/protocol/zmtp/decoder.rs

use crate::error::ZmqError;
use crate::message::{Msg, MsgFlags};
use crate::protocol::zmtp::{Framing, MsgSink, IN_BATCH_SIZE, ZMTP_FLAG_LONG, ZMTP_FLAG_MORE};

/// What the bytes of the current step mean once they are complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
  FlagsReady,
  OneByteSizeReady,
  EightByteSizeReady,
  MessageReady,
}

/// Byte-counting frame decoder.
///
/// Each step declares how many bytes it needs; once they have arrived the
/// step is interpreted and the next one is declared. A decoded message that
/// the sink refuses stays pending (the decoder is "stalled") and is offered
/// again on the next call.
#[derive(Debug)]
pub(crate) struct Decoder {
  framing: Framing,
  maxmsgsize: i64,
  step: Step,
  to_read: usize,
  buf: Vec<u8>,
  // Flags of the frame being decoded.
  msg_flags: MsgFlags,
  // Legacy framing: payload size left after the flags byte.
  body_size: usize,
  pending: Option<Msg>,
  failed: bool,
}

impl Decoder {
  /// `maxmsgsize < 0` means no limit.
  pub(crate) fn new(framing: Framing, maxmsgsize: i64) -> Self {
    let mut decoder = Self {
      framing,
      maxmsgsize,
      step: Step::FlagsReady,
      to_read: 0,
      buf: Vec::with_capacity(8),
      msg_flags: MsgFlags::empty(),
      body_size: 0,
      pending: None,
      failed: false,
    };
    decoder.start_frame();
    decoder
  }

  fn next_step(&mut self, to_read: usize, step: Step) {
    self.buf.clear();
    self.to_read = to_read;
    self.step = step;
  }

  fn start_frame(&mut self) {
    match self.framing {
      Framing::V1 => self.next_step(1, Step::FlagsReady),
      Framing::Legacy => self.next_step(1, Step::OneByteSizeReady),
    }
  }

  /// A decoded message waits for the sink to make room.
  pub(crate) fn stalled(&self) -> bool {
    self.pending.is_some()
  }

  /// Feeds `data` through the state machine. Returns how many bytes were
  /// consumed; fewer than `data.len()` means the sink is full.
  pub(crate) fn process_buffer(&mut self, data: &[u8], sink: &mut dyn MsgSink) -> Result<usize, ZmqError> {
    if self.failed {
      return Err(ZmqError::ProtocolViolation("decoder already failed".into()));
    }
    let mut pos = 0;
    loop {
      while self.to_read == 0 {
        match self.advance(sink) {
          Ok(true) => {}
          Ok(false) => return Ok(pos),
          Err(e) => {
            self.failed = true;
            return Err(e);
          }
        }
      }
      if pos == data.len() {
        return Ok(pos);
      }
      let n = self.to_read.min(data.len() - pos);
      self.buf.extend_from_slice(&data[pos..pos + n]);
      pos += n;
      self.to_read -= n;
    }
  }

  // Interprets a completed step. Ok(false) means the sink refused a message.
  fn advance(&mut self, sink: &mut dyn MsgSink) -> Result<bool, ZmqError> {
    match (self.framing, self.step) {
      (Framing::V1, Step::FlagsReady) => {
        let flags = self.buf[0];
        self.msg_flags = wire_flags(flags);
        if flags & ZMTP_FLAG_LONG != 0 {
          self.next_step(8, Step::EightByteSizeReady);
        } else {
          self.next_step(1, Step::OneByteSizeReady);
        }
        Ok(true)
      }
      (Framing::V1, Step::OneByteSizeReady) => {
        let size = self.buf[0] as u64;
        self.start_body(size)?;
        Ok(true)
      }
      (Framing::V1, Step::EightByteSizeReady) => {
        let size = self.read_u64();
        self.start_body(size)?;
        Ok(true)
      }
      (Framing::Legacy, Step::OneByteSizeReady) => {
        // 0xFF escapes to an 8-byte size.
        if self.buf[0] == 0xff {
          self.next_step(8, Step::EightByteSizeReady);
          return Ok(true);
        }
        let size = self.buf[0] as u64;
        self.start_legacy_flags(size)?;
        Ok(true)
      }
      (Framing::Legacy, Step::EightByteSizeReady) => {
        let size = self.read_u64();
        self.start_legacy_flags(size)?;
        Ok(true)
      }
      (Framing::Legacy, Step::FlagsReady) => {
        self.msg_flags = wire_flags(self.buf[0]);
        let size = self.body_size;
        self.start_payload(size);
        Ok(true)
      }
      (_, Step::MessageReady) => self.deliver(sink),
    }
  }

  fn read_u64(&self) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&self.buf[..8]);
    u64::from_be_bytes(raw)
  }

  fn check_size(&self, size: u64) -> Result<usize, ZmqError> {
    if self.maxmsgsize >= 0 && size > self.maxmsgsize as u64 {
      return Err(ZmqError::ProtocolViolation(format!(
        "message of {} bytes exceeds maxmsgsize {}",
        size, self.maxmsgsize
      )));
    }
    usize::try_from(size).map_err(|_| ZmqError::ProtocolViolation(format!("message size {} out of range", size)))
  }

  fn start_body(&mut self, size: u64) -> Result<(), ZmqError> {
    let size = self.check_size(size)?;
    self.start_payload(size);
    Ok(())
  }

  // The declared size comes from the peer: the buffer only grows as the
  // bytes actually arrive.
  fn start_payload(&mut self, size: usize) {
    self.next_step(size, Step::MessageReady);
    self.buf.reserve(size.min(IN_BATCH_SIZE));
  }

  // Legacy sizes count the flags byte.
  fn start_legacy_flags(&mut self, size: u64) -> Result<(), ZmqError> {
    if size == 0 {
      return Err(ZmqError::ProtocolViolation("legacy frame with zero length".into()));
    }
    self.body_size = self.check_size(size - 1)?;
    self.next_step(1, Step::FlagsReady);
    Ok(())
  }

  fn deliver(&mut self, sink: &mut dyn MsgSink) -> Result<bool, ZmqError> {
    let msg = match self.pending.take() {
      Some(msg) => msg,
      None => {
        let mut msg = Msg::from_vec(std::mem::take(&mut self.buf));
        msg.set_flags(self.msg_flags);
        msg
      }
    };
    match sink.push_msg(msg.clone()) {
      Ok(()) => {
        self.start_frame();
        Ok(true)
      }
      Err(ZmqError::WouldBlock) => {
        self.pending = Some(msg);
        Ok(false)
      }
      Err(e) => Err(e),
    }
  }
}

fn wire_flags(flags: u8) -> MsgFlags {
  if flags & ZMTP_FLAG_MORE != 0 {
    MsgFlags::MORE
  } else {
    MsgFlags::empty()
  }
}
