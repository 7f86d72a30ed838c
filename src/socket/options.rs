// src/socket/options.rs

use std::time::Duration;

use crate::socket::types::SocketType;
use crate::message::MAX_IDENTITY_LEN;
use crate::{Blob, ZmqError};

// Option identifiers, numbered as in libzmq.
pub const IDENTITY: i32 = 5;
pub const SUBSCRIBE: i32 = 6;
pub const UNSUBSCRIBE: i32 = 7;
pub const RCVMORE: i32 = 13;
pub const EVENTS: i32 = 15;
pub const TYPE: i32 = 16;
pub const LINGER: i32 = 17;
pub const RECONNECT_IVL: i32 = 18;
pub const BACKLOG: i32 = 19;
pub const RECONNECT_IVL_MAX: i32 = 21;
pub const MAXMSGSIZE: i32 = 22;
pub const SNDHWM: i32 = 23;
pub const RCVHWM: i32 = 24;
pub const RCVTIMEO: i32 = 27;
pub const SNDTIMEO: i32 = 28;
pub const LAST_ENDPOINT: i32 = 32;
pub const ROUTER_MANDATORY: i32 = 33;
pub const TCP_KEEPALIVE: i32 = 34;
pub const TCP_KEEPALIVE_CNT: i32 = 35;
pub const TCP_KEEPALIVE_IDLE: i32 = 36;
pub const TCP_KEEPALIVE_INTVL: i32 = 37;
pub const XPUB_VERBOSE: i32 = 40;

// Bits of the EVENTS option value.
pub const POLLIN: i32 = 1;
pub const POLLOUT: i32 = 2;

/// Holds parsed and validated socket options.
///
/// A copy is taken by every session, listener and connecter when it is
/// created; later changes on the socket do not reach them.
#[derive(Debug, Clone)]
pub(crate) struct SocketOptions {
  pub socket_type: SocketType,
  // High water marks, in messages. Zero means no limit.
  pub sndhwm: i32,
  pub rcvhwm: i32,
  pub identity: Blob,
  /// `None` lingers until every pending message is sent.
  pub linger: Option<Duration>,
  /// Milliseconds; -1 disables reconnection.
  pub reconnect_ivl: i32,
  /// Milliseconds; 0 keeps the interval fixed.
  pub reconnect_ivl_max: i32,
  pub backlog: i32,
  /// -1 means no limit.
  pub maxmsgsize: i64,
  pub rcvtimeo: Option<Duration>,
  pub sndtimeo: Option<Duration>,
  // -1 leaves the OS default, 0 disables, 1 enables.
  pub tcp_keepalive: i32,
  pub tcp_keepalive_cnt: i32,
  pub tcp_keepalive_idle: i32,
  pub tcp_keepalive_intvl: i32,
  /// Peers' identities are delivered to the socket (ROUTER, REP).
  pub recv_identity: bool,
  pub last_endpoint: String,
}

impl SocketOptions {
  pub(crate) fn new(socket_type: SocketType) -> Self {
    Self {
      socket_type,
      sndhwm: 1000,
      rcvhwm: 1000,
      identity: Blob::new(),
      // Pending subscriptions are not worth waiting for at close.
      linger: matches!(socket_type, SocketType::Sub | SocketType::XSub).then_some(Duration::ZERO),
      reconnect_ivl: 100,
      reconnect_ivl_max: 0,
      backlog: 100,
      maxmsgsize: -1,
      rcvtimeo: None,
      sndtimeo: None,
      tcp_keepalive: -1,
      tcp_keepalive_cnt: -1,
      tcp_keepalive_idle: -1,
      tcp_keepalive_intvl: -1,
      recv_identity: matches!(socket_type, SocketType::Router | SocketType::Rep),
      last_endpoint: String::new(),
    }
  }

  /// Applies one generic option. Pattern-specific options are handled by the
  /// socket type before this is reached.
  pub(crate) fn set(&mut self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    match option {
      SNDHWM => self.sndhwm = parse_non_negative(value, option)?,
      RCVHWM => self.rcvhwm = parse_non_negative(value, option)?,
      IDENTITY => {
        let identity = parse_blob_option(value, option)?;
        if identity.is_empty() || identity.is_generated() {
          return Err(ZmqError::InvalidOptionValue(option));
        }
        self.identity = identity;
      }
      LINGER => self.linger = parse_linger_option(value)?,
      RECONNECT_IVL => {
        let ivl = parse_i32_option(value, option)?;
        if ivl < -1 {
          return Err(ZmqError::InvalidOptionValue(option));
        }
        self.reconnect_ivl = ivl;
      }
      RECONNECT_IVL_MAX => self.reconnect_ivl_max = parse_non_negative(value, option)?,
      BACKLOG => self.backlog = parse_non_negative(value, option)?,
      MAXMSGSIZE => self.maxmsgsize = parse_i64_option(value, option)?,
      RCVTIMEO => self.rcvtimeo = parse_timeout_option(value, option)?,
      SNDTIMEO => self.sndtimeo = parse_timeout_option(value, option)?,
      TCP_KEEPALIVE => self.tcp_keepalive = parse_keepalive_mode_option(value)?,
      TCP_KEEPALIVE_CNT => self.tcp_keepalive_cnt = parse_keepalive_param(value, option)?,
      TCP_KEEPALIVE_IDLE => self.tcp_keepalive_idle = parse_keepalive_param(value, option)?,
      TCP_KEEPALIVE_INTVL => self.tcp_keepalive_intvl = parse_keepalive_param(value, option)?,
      _ => return Err(ZmqError::InvalidOption(option)),
    }
    Ok(())
  }

  pub(crate) fn get(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    let int = |v: i32| Ok(v.to_ne_bytes().to_vec());
    match option {
      SNDHWM => int(self.sndhwm),
      RCVHWM => int(self.rcvhwm),
      IDENTITY => Ok(self.identity.to_vec()),
      TYPE => int(self.socket_type as i32),
      LINGER => int(duration_to_ms(self.linger)),
      RECONNECT_IVL => int(self.reconnect_ivl),
      RECONNECT_IVL_MAX => int(self.reconnect_ivl_max),
      BACKLOG => int(self.backlog),
      MAXMSGSIZE => Ok(self.maxmsgsize.to_ne_bytes().to_vec()),
      RCVTIMEO => int(duration_to_ms(self.rcvtimeo)),
      SNDTIMEO => int(duration_to_ms(self.sndtimeo)),
      TCP_KEEPALIVE => int(self.tcp_keepalive),
      TCP_KEEPALIVE_CNT => int(self.tcp_keepalive_cnt),
      TCP_KEEPALIVE_IDLE => int(self.tcp_keepalive_idle),
      TCP_KEEPALIVE_INTVL => int(self.tcp_keepalive_intvl),
      LAST_ENDPOINT => {
        // NUL-terminated like the C API.
        let mut bytes = self.last_endpoint.as_bytes().to_vec();
        bytes.push(0);
        Ok(bytes)
      }
      _ => Err(ZmqError::InvalidOption(option)),
    }
  }

  /// High water mark as used by pipes; zero disables the limit.
  pub(crate) fn sndhwm(&self) -> u64 {
    self.sndhwm.max(0) as u64
  }

  pub(crate) fn rcvhwm(&self) -> u64 {
    self.rcvhwm.max(0) as u64
  }
}

fn duration_to_ms(d: Option<Duration>) -> i32 {
  d.map_or(-1, |d| d.as_millis().min(i32::MAX as u128) as i32)
}

// --- Helper functions for parsing option values ---

/// Parses a byte slice holding a native-endian `i32`.
pub(crate) fn parse_i32_option(value: &[u8], option: i32) -> Result<i32, ZmqError> {
  let arr: [u8; 4] = value.try_into().map_err(|_| ZmqError::InvalidOptionValue(option))?;
  Ok(i32::from_ne_bytes(arr))
}

pub(crate) fn parse_i64_option(value: &[u8], option: i32) -> Result<i64, ZmqError> {
  let arr: [u8; 8] = value.try_into().map_err(|_| ZmqError::InvalidOptionValue(option))?;
  Ok(i64::from_ne_bytes(arr))
}

fn parse_non_negative(value: &[u8], option: i32) -> Result<i32, ZmqError> {
  let val = parse_i32_option(value, option)?;
  if val < 0 {
    return Err(ZmqError::InvalidOptionValue(option));
  }
  Ok(val)
}

/// Parses a boolean option; only 0 and 1 are accepted.
pub(crate) fn parse_bool_option(value: &[u8], option: i32) -> Result<bool, ZmqError> {
  match parse_i32_option(value, option)? {
    0 => Ok(false),
    1 => Ok(true),
    _ => Err(ZmqError::InvalidOptionValue(option)),
  }
}

/// Parses a send/receive timeout in milliseconds; -1 waits forever.
pub(crate) fn parse_timeout_option(value: &[u8], option: i32) -> Result<Option<Duration>, ZmqError> {
  match parse_i32_option(value, option)? {
    -1 => Ok(None),
    val @ 0.. => Ok(Some(Duration::from_millis(val as u64))),
    _ => Err(ZmqError::InvalidOptionValue(option)),
  }
}

pub(crate) fn parse_linger_option(value: &[u8]) -> Result<Option<Duration>, ZmqError> {
  parse_timeout_option(value, LINGER)
}

/// Parses the TCP_KEEPALIVE mode (-1, 0, 1).
pub(crate) fn parse_keepalive_mode_option(value: &[u8]) -> Result<i32, ZmqError> {
  let val = parse_i32_option(value, TCP_KEEPALIVE)?;
  if (-1..=1).contains(&val) {
    Ok(val)
  } else {
    Err(ZmqError::InvalidOptionValue(TCP_KEEPALIVE))
  }
}

// Keepalive tuning: -1 leaves the OS default, otherwise strictly positive.
fn parse_keepalive_param(value: &[u8], option: i32) -> Result<i32, ZmqError> {
  match parse_i32_option(value, option)? {
    val if val == -1 || val > 0 => Ok(val),
    _ => Err(ZmqError::InvalidOptionValue(option)),
  }
}

/// Parses an identity or subscription blob.
pub(crate) fn parse_blob_option(value: &[u8], option: i32) -> Result<Blob, ZmqError> {
  if value.len() > MAX_IDENTITY_LEN {
    Err(ZmqError::InvalidOptionValue(option))
  } else {
    Ok(Blob::from(value))
  }
}
