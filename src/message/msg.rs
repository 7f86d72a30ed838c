use crate::message::flags::MsgFlags;
use bytes::Bytes;
use std::fmt;

/// Represents a single message part (frame).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Msg {
  // Use Bytes for efficient slicing and cloning (reference counted)
  data: Option<Bytes>,
  flags: MsgFlags,
}

impl Msg {
  /// Creates an empty message with no data.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a message from a `Vec<u8>`, taking ownership.
  pub fn from_vec(data: Vec<u8>) -> Self {
    Self {
      data: Some(Bytes::from(data)),
      ..Default::default()
    }
  }

  /// Creates a message from `bytes::Bytes`.
  pub fn from_bytes(data: Bytes) -> Self {
    Self {
      data: Some(data),
      ..Default::default()
    }
  }

  /// Creates a message from a static byte slice (zero-copy).
  pub fn from_static(data: &'static [u8]) -> Self {
    Self {
      data: Some(Bytes::from_static(data)),
      ..Default::default()
    }
  }

  pub(crate) fn delimiter() -> Self {
    Self {
      data: None,
      flags: MsgFlags::DELIMITER,
    }
  }

  /// Returns a reference to the message payload bytes, if any.
  pub fn data(&self) -> Option<&[u8]> {
    self.data.as_deref()
  }

  /// Returns the payload, or an empty slice for data-less messages.
  pub fn as_slice(&self) -> &[u8] {
    self.data.as_deref().unwrap_or(&[])
  }

  /// Returns the size of the message payload in bytes.
  pub fn size(&self) -> usize {
    self.data.as_ref().map_or(0, |d| d.len())
  }

  /// Returns the flags associated with the message.
  pub fn flags(&self) -> MsgFlags {
    self.flags
  }

  /// Sets the flags for the message (e.g., `MsgFlags::MORE`).
  pub fn set_flags(&mut self, flags: MsgFlags) {
    self.flags = flags;
  }

  pub(crate) fn add_flags(&mut self, flags: MsgFlags) {
    self.flags.insert(flags);
  }

  pub(crate) fn reset_flags(&mut self, flags: MsgFlags) {
    self.flags.remove(flags);
  }

  // --- Flag Helpers ---

  /// Checks if the `MORE` flag is set.
  pub fn is_more(&self) -> bool {
    self.flags.contains(MsgFlags::MORE)
  }

  /// Checks if the message carries a peer identity.
  pub fn is_identity(&self) -> bool {
    self.flags.contains(MsgFlags::IDENTITY)
  }

  pub(crate) fn is_delimiter(&self) -> bool {
    self.flags.contains(MsgFlags::DELIMITER)
  }

  /// Returns the internal `Bytes` object if data is present.
  ///
  /// Cloning `Bytes` is cheap as it is reference-counted.
  pub fn data_bytes(&self) -> Option<Bytes> {
    self.data.clone()
  }

  /// Consumes the message and returns its payload.
  pub fn into_bytes(self) -> Bytes {
    self.data.unwrap_or_default()
  }
}

impl From<&'static str> for Msg {
  fn from(s: &'static str) -> Self {
    Msg::from_static(s.as_bytes())
  }
}

impl From<Vec<u8>> for Msg {
  fn from(v: Vec<u8>) -> Self {
    Msg::from_vec(v)
  }
}

impl fmt::Debug for Msg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Msg")
      .field("size", &self.size())
      .field("flags", &self.flags)
      .field("data", &self.data().map(|d| format!("{} bytes", d.len()))) // Avoid printing large data
      .finish()
  }
}
