use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum ZmqError {
  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error), // Allows easy conversion from std::io::Error

  #[error("Invalid argument provided: {0}")]
  InvalidArgument(String), // Corresponds to EINVAL for non-option errors

  // --- Flow control / timeouts ---
  #[error("Operation would block")]
  WouldBlock, // EAGAIN on DONTWAIT or zero timeout
  #[error("Operation timed out")]
  Timeout, // EAGAIN after a positive SNDTIMEO/RCVTIMEO elapsed

  // --- Termination ---
  #[error("Context was terminated")]
  Terminated, // ETERM

  // --- Connection/Binding Errors ---
  #[error("Address already in use: {0}")]
  AddrInUse(String), // Endpoint string EADDRINUSE
  #[error("Address not available: {0}")]
  AddrNotAvailable(String), // Endpoint string EADDRNOTAVAIL
  #[error("Connection refused by peer: {0}")]
  ConnectionRefused(String), // Endpoint string ECONNREFUSED
  #[error("Host is unreachable: {0}")]
  HostUnreachable(String), // EHOSTUNREACH, also ROUTER_MANDATORY misses
  #[error("Connection closed by peer or transport")]
  ConnectionClosed, // EPIPE, ECONNRESET
  #[error("Permission denied for endpoint: {0}")]
  PermissionDenied(String), // EACCES, EPERM

  // --- Endpoint Errors ---
  #[error("Invalid endpoint format: {0}")]
  InvalidEndpoint(String),

  // --- Option Errors ---
  #[error("Invalid socket option ID: {0}")]
  InvalidOption(i32), // EINVAL
  #[error("Invalid value provided for option ID {0}")]
  InvalidOptionValue(i32), // EINVAL

  // --- State Errors ---
  #[error("Operation is not supported by the socket type ({0})")]
  UnsupportedOperation(&'static str), // ENOTSUP
  #[error("Operation is invalid for the current socket state: {0}")]
  InvalidState(&'static str), // EFSM

  // --- Protocol Errors ---
  #[error("ZMTP protocol violation: {0}")]
  ProtocolViolation(String), // EPROTO

  // --- Resource Limits ---
  #[error("Resource limit reached: {0}")]
  ResourceLimitReached(&'static str), // EMFILE, no free socket slot

  // --- Unsupported ---
  #[error("Transport scheme not supported: {0}")]
  UnsupportedTransport(String), // EPROTONOSUPPORT

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}

// Helper function to map common std::io::Error kinds
impl ZmqError {
  pub fn from_io_endpoint(e: io::Error, endpoint: &str) -> Self {
    match e.kind() {
      io::ErrorKind::AddrInUse => ZmqError::AddrInUse(endpoint.to_string()),
      io::ErrorKind::AddrNotAvailable => ZmqError::AddrNotAvailable(endpoint.to_string()),
      io::ErrorKind::ConnectionRefused => ZmqError::ConnectionRefused(endpoint.to_string()),
      io::ErrorKind::PermissionDenied => ZmqError::PermissionDenied(endpoint.to_string()),
      io::ErrorKind::TimedOut => ZmqError::Timeout,
      io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => ZmqError::ConnectionClosed,
      _ => ZmqError::Io(e), // Default fallback
    }
  }

  /// True for the outcomes a blocking send/recv loop retries on.
  pub(crate) fn is_would_block(&self) -> bool {
    matches!(self, ZmqError::WouldBlock)
  }

  /// Integer code carried in monitor event records for failures.
  pub(crate) fn errno(&self) -> i32 {
    match self {
      ZmqError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
      ZmqError::AddrInUse(_) => libc::EADDRINUSE,
      ZmqError::AddrNotAvailable(_) => libc::EADDRNOTAVAIL,
      ZmqError::ConnectionRefused(_) => libc::ECONNREFUSED,
      ZmqError::HostUnreachable(_) => libc::EHOSTUNREACH,
      ZmqError::ConnectionClosed => libc::ECONNRESET,
      ZmqError::PermissionDenied(_) => libc::EACCES,
      ZmqError::Timeout => libc::ETIMEDOUT,
      ZmqError::WouldBlock => libc::EAGAIN,
      ZmqError::InvalidEndpoint(_) | ZmqError::InvalidArgument(_) => libc::EINVAL,
      ZmqError::UnsupportedTransport(_) => libc::EPROTONOSUPPORT,
      ZmqError::ProtocolViolation(_) => libc::EPROTO,
      _ => libc::EINVAL,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn io_errors_map_to_endpoint_variants() {
    let err = ZmqError::from_io_endpoint(io::Error::from(io::ErrorKind::AddrInUse), "tcp://127.0.0.1:1");
    assert!(matches!(err, ZmqError::AddrInUse(ref ep) if ep == "tcp://127.0.0.1:1"));
    let err = ZmqError::from_io_endpoint(io::Error::from(io::ErrorKind::ConnectionReset), "x");
    assert!(matches!(err, ZmqError::ConnectionClosed));
    assert_eq!(err.errno(), libc::ECONNRESET);
  }
}
