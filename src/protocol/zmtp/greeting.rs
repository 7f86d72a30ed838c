// src/protocol/zmtp/greeting.rs

use crate::protocol::zmtp::Framing;

/// Signature sent by every peer: it doubles as the header of a legacy
/// identity frame.
pub(crate) const SIGNATURE_SIZE: usize = 10;
/// Signature plus revision and socket type.
pub(crate) const GREETING_SIZE: usize = 12;
/// Revision we speak after the signature.
pub(crate) const ZMTP_REVISION: u8 = 0x01;

/// Builds `0xFF`, the 8-byte big-endian `identity_len + 1`, then `0x7F`.
pub(crate) fn signature(identity_len: usize) -> [u8; SIGNATURE_SIZE] {
  let mut sig = [0u8; SIGNATURE_SIZE];
  sig[0] = 0xff;
  sig[1..9].copy_from_slice(&(identity_len as u64 + 1).to_be_bytes());
  sig[9] = 0x7f;
  sig
}

/// What the bytes received so far tell us about the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PeerGreeting {
  /// Not enough bytes to decide.
  Incomplete,
  /// The peer sent a versioned signature; we must send the rest of ours
  /// (revision and socket type) if we have not yet.
  Versioned,
  /// Handshake finished: the framing to use from now on.
  Done(Framing),
}

/// Classifies the greeting bytes received so far.
///
/// A peer that does not start with `0xFF`, or whose 10th byte has the low bit
/// clear, speaks the legacy protocol: what we read is already the start of
/// its identity frame. Otherwise revision 0 means legacy framing after the
/// greeting and anything else means v1 framing.
pub(crate) fn classify(received: &[u8]) -> PeerGreeting {
  if received.is_empty() {
    return PeerGreeting::Incomplete;
  }
  if received[0] != 0xff {
    return PeerGreeting::Done(Framing::Legacy);
  }
  if received.len() < SIGNATURE_SIZE {
    return PeerGreeting::Incomplete;
  }
  if received[9] & 0x01 == 0 {
    return PeerGreeting::Done(Framing::Legacy);
  }
  if received.len() < GREETING_SIZE {
    return PeerGreeting::Versioned;
  }
  match received[SIGNATURE_SIZE] {
    0 => PeerGreeting::Done(Framing::Legacy),
    _ => PeerGreeting::Done(Framing::V1),
  }
}

/// True if the legacy peer only sent its signature as an identity header,
/// i.e. it never will send revision and socket type.
pub(crate) fn is_legacy_peer(received: &[u8]) -> bool {
  !received.is_empty() && (received[0] != 0xff || (received.len() >= SIGNATURE_SIZE && received[9] & 0x01 == 0))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn signature_encodes_identity_length_big_endian() {
    let sig = signature(4);
    assert_eq!(sig, [0xff, 0, 0, 0, 0, 0, 0, 0, 5, 0x7f]);
    assert_eq!(signature(0)[8], 1);
  }

  #[test]
  fn versioned_peer_needs_full_greeting() {
    let mut greeting = signature(0).to_vec();
    assert_eq!(classify(&greeting[..1]), PeerGreeting::Incomplete);
    assert_eq!(classify(&greeting[..9]), PeerGreeting::Incomplete);
    assert_eq!(classify(&greeting), PeerGreeting::Versioned);
    greeting.push(ZMTP_REVISION);
    assert_eq!(classify(&greeting), PeerGreeting::Versioned);
    greeting.push(5);
    assert_eq!(classify(&greeting), PeerGreeting::Done(Framing::V1));
    assert!(!is_legacy_peer(&greeting));
  }

  #[test]
  fn legacy_peers_are_detected_early() {
    // Short identity frame: length byte then flags.
    assert_eq!(classify(&[3, 0, b'i', b'd']), PeerGreeting::Done(Framing::Legacy));
    assert!(is_legacy_peer(&[3]));

    // Long identity frame: flags byte has the low bit clear.
    let mut long = vec![0xff, 0, 0, 0, 0, 0, 0, 1, 0, 0x00];
    assert_eq!(classify(&long), PeerGreeting::Done(Framing::Legacy));
    assert!(is_legacy_peer(&long));

    // Versioned signature announcing revision 0.
    long[9] = 0x7f;
    long.extend_from_slice(&[0, 1]);
    assert_eq!(classify(&long), PeerGreeting::Done(Framing::Legacy));
    assert!(!is_legacy_peer(&long));
  }
}
