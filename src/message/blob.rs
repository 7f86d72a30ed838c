use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::ops::Deref;

/// Longest identity a peer may announce.
pub const MAX_IDENTITY_LEN: usize = 255;

/// An immutable, cheaply cloneable byte sequence used for peer identities.
///
/// User-chosen identities must not start with a zero byte; that prefix is
/// reserved for identities a ROUTER generates for anonymous peers.
#[derive(Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Blob {
  inner: Bytes,
}

impl Blob {
  /// Creates an empty blob.
  pub fn new() -> Self {
    Self { inner: Bytes::new() }
  }

  /// Creates a blob from `bytes::Bytes`.
  pub fn from_bytes(bytes: Bytes) -> Self {
    Self { inner: bytes }
  }

  /// Creates a blob from a static byte slice.
  pub fn from_static(data: &'static [u8]) -> Self {
    Self {
      inner: Bytes::from_static(data),
    }
  }

  /// Returns the size of the blob.
  pub fn size(&self) -> usize {
    self.inner.len()
  }

  /// Returns true if the blob is empty.
  pub fn is_empty(&self) -> bool {
    self.inner.is_empty()
  }

  /// Identity for an anonymous peer: a zero byte and the big-endian counter.
  pub(crate) fn generated(counter: u32) -> Self {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(0);
    buf.put_u32(counter);
    Self { inner: buf.freeze() }
  }

  pub(crate) fn is_generated(&self) -> bool {
    self.inner.first() == Some(&0)
  }

  pub(crate) fn to_bytes(&self) -> Bytes {
    self.inner.clone()
  }
}

impl Deref for Blob {
  type Target = [u8];
  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

impl AsRef<[u8]> for Blob {
  fn as_ref(&self) -> &[u8] {
    &self.inner
  }
}

impl From<Vec<u8>> for Blob {
  fn from(vec: Vec<u8>) -> Self {
    Self {
      inner: Bytes::from(vec),
    }
  }
}

impl From<&[u8]> for Blob {
  fn from(data: &[u8]) -> Self {
    Self {
      inner: Bytes::copy_from_slice(data),
    }
  }
}

impl fmt::Debug for Blob {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Identities are short; print them as hex.
    write!(f, "Blob(")?;
    for b in self.inner.iter() {
      write!(f, "{:02x}", b)?;
    }
    write!(f, ")")
  }
}
