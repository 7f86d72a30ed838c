// src/protocol/zmtp/encoder.rs

use crate::message::Msg;
use crate::protocol::zmtp::{Framing, MsgSource, ZMTP_FLAG_LONG, ZMTP_FLAG_MORE, OUT_BATCH_SIZE};

use bytes::{BufMut, BytesMut};

/// Frame encoder. Pulls messages from a [`MsgSource`] and serializes them
/// into an output batch.
#[derive(Debug)]
pub(crate) struct Encoder {
  framing: Framing,
  // The header of the next frame was already put on the wire by the greeting.
  skip_header: bool,
}

impl Encoder {
  pub(crate) fn new(framing: Framing) -> Self {
    Self {
      framing,
      skip_header: false,
    }
  }

  /// Legacy peers already received our signature as the identity frame's
  /// header: only the body of the first message is written.
  pub(crate) fn after_signature() -> Self {
    Self {
      framing: Framing::Legacy,
      skip_header: true,
    }
  }

  /// Appends frames to `out` until it holds at least a batch or the source
  /// runs dry. Returns the number of messages encoded.
  pub(crate) fn encode(&mut self, source: &mut dyn MsgSource, out: &mut BytesMut) -> usize {
    let mut count = 0;
    while out.len() < OUT_BATCH_SIZE {
      let Some(msg) = source.pull_msg() else {
        break;
      };
      if self.skip_header {
        self.skip_header = false;
      } else {
        self.put_header(&msg, out);
      }
      out.put_slice(msg.as_slice());
      count += 1;
    }
    count
  }

  fn put_header(&self, msg: &Msg, out: &mut BytesMut) {
    let flags = if msg.is_more() { ZMTP_FLAG_MORE } else { 0 };
    let size = msg.size();
    match self.framing {
      Framing::V1 => {
        if size > u8::MAX as usize {
          out.put_u8(flags | ZMTP_FLAG_LONG);
          out.put_u64(size as u64);
        } else {
          out.put_u8(flags);
          out.put_u8(size as u8);
        }
      }
      Framing::Legacy => {
        // The length covers the flags byte; 0xFF escapes to 8 bytes.
        let len = size as u64 + 1;
        if len < 0xff {
          out.put_u8(len as u8);
        } else {
          out.put_u8(0xff);
          out.put_u64(len);
        }
        out.put_u8(flags);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::MsgFlags;
  use crate::protocol::zmtp::decoder::tests::VecSink;
  use crate::protocol::zmtp::Decoder;
  use std::collections::VecDeque;

  impl MsgSource for VecDeque<Msg> {
    fn pull_msg(&mut self) -> Option<Msg> {
      self.pop_front()
    }
  }

  fn payload(size: usize) -> Msg {
    Msg::from_vec((0..size).map(|i| i as u8).collect())
  }

  #[test]
  fn v1_header_switches_to_long_above_255() {
    let mut enc = Encoder::new(Framing::V1);
    let mut out = BytesMut::new();
    let mut src: VecDeque<Msg> = vec![payload(255), payload(256)].into();
    assert_eq!(enc.encode(&mut src, &mut out), 2);
    assert_eq!(&out[..2], &[0, 255]);
    let second = &out[2 + 255..];
    assert_eq!(second[0], ZMTP_FLAG_LONG);
    assert_eq!(&second[1..9], &256u64.to_be_bytes());
  }

  #[test]
  fn legacy_header_counts_flags_byte() {
    let mut enc = Encoder::new(Framing::Legacy);
    let mut out = BytesMut::new();
    let mut more = payload(253);
    more.set_flags(MsgFlags::MORE);
    let mut src: VecDeque<Msg> = vec![more, payload(254)].into();
    enc.encode(&mut src, &mut out);
    assert_eq!(&out[..2], &[254, ZMTP_FLAG_MORE]);
    let second = &out[2 + 253..];
    assert_eq!(second[0], 0xff);
    assert_eq!(&second[1..9], &255u64.to_be_bytes());
    assert_eq!(second[9], 0);
  }

  #[test]
  fn first_header_is_skipped_after_signature() {
    let mut enc = Encoder::after_signature();
    let mut out = BytesMut::new();
    let mut src: VecDeque<Msg> = vec![Msg::from_static(b"id"), Msg::from_static(b"x")].into();
    enc.encode(&mut src, &mut out);
    assert_eq!(&out[..], &[b'i', b'd', 2, 0, b'x']);
  }

  #[test]
  fn round_trips_through_the_decoder() {
    for framing in [Framing::V1, Framing::Legacy] {
      let sizes = [0usize, 1, 254, 255, 256, 65536];
      let mut src: VecDeque<Msg> = sizes
        .iter()
        .enumerate()
        .map(|(i, s)| {
          let mut m = payload(*s);
          if i % 2 == 0 {
            m.set_flags(MsgFlags::MORE);
          }
          m
        })
        .collect();
      let mut enc = Encoder::new(framing);
      let mut out = BytesMut::new();
      while !src.is_empty() {
        enc.encode(&mut src, &mut out);
      }

      let mut dec = Decoder::new(framing, -1);
      let mut sink = VecSink::default();
      assert_eq!(dec.process_buffer(&out, &mut sink).unwrap(), out.len());
      assert_eq!(sink.msgs.len(), sizes.len());
      for (i, (msg, size)) in sink.msgs.iter().zip(sizes).enumerate() {
        assert_eq!(msg.size(), size, "{:?} frame {}", framing, i);
        assert_eq!(msg.is_more(), i % 2 == 0);
        assert_eq!(msg.as_slice(), payload(size).as_slice());
      }
    }
  }

  #[test]
  fn batch_stops_near_batch_size() {
    let mut enc = Encoder::new(Framing::V1);
    let mut out = BytesMut::new();
    let mut src: VecDeque<Msg> = (0..100).map(|_| payload(200)).collect();
    let n = enc.encode(&mut src, &mut out);
    assert!(n < 100);
    assert!(out.len() >= OUT_BATCH_SIZE);
    assert_eq!(src.len(), 100 - n);
  }
}
