// src/transport/endpoint.rs

use crate::error::ZmqError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};

/// Represents a parsed and validated endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Endpoint {
  /// `host` may be `*` for all interfaces; `port` may be `*` or 0 for an
  /// ephemeral port (bind only).
  Tcp { host: String, port: String },
  /// Emulated over loopback TCP, see [`ipc_port`].
  Ipc(String),
  Inproc(String),
}

/// Parses an endpoint string into a structured Endpoint enum.
pub(crate) fn parse_endpoint(endpoint_str: &str) -> Result<Endpoint, ZmqError> {
  let invalid_endpoint_err = || ZmqError::InvalidEndpoint(endpoint_str.to_string());

  let Some((scheme, address_part)) = endpoint_str.split_once("://") else {
    return Err(invalid_endpoint_err());
  };
  if address_part.is_empty() || address_part.contains('\0') {
    return Err(invalid_endpoint_err());
  }

  match scheme {
    "tcp" => {
      // The port follows the last colon so bracketed IPv6 hosts parse too.
      let (host, port) = address_part.rsplit_once(':').ok_or_else(invalid_endpoint_err)?;
      let host = host.trim_start_matches('[').trim_end_matches(']');
      if host.is_empty() || port.is_empty() {
        return Err(invalid_endpoint_err());
      }
      if port != "*" && port.parse::<u16>().is_err() {
        tracing::debug!("Failed to parse TCP port: {}", port);
        return Err(invalid_endpoint_err());
      }
      Ok(Endpoint::Tcp {
        host: host.to_string(),
        port: port.to_string(),
      })
    }
    "ipc" => Ok(Endpoint::Ipc(address_part.to_string())),
    "inproc" => Ok(Endpoint::Inproc(address_part.to_string())),
    _ => Err(ZmqError::UnsupportedTransport(endpoint_str.to_string())),
  }
}

impl Endpoint {
  /// Address a listener binds to.
  pub(crate) fn resolve_bind(&self, uri: &str) -> Result<SocketAddr, ZmqError> {
    match self {
      Endpoint::Tcp { host, port } => {
        let port = if port == "*" { 0 } else { parse_port(port, uri)? };
        if host == "*" {
          return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
        }
        resolve_host(host, port, uri)
      }
      Endpoint::Ipc(path) => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), ipc_port(path))),
      Endpoint::Inproc(_) => Err(ZmqError::InvalidEndpoint(uri.to_string())),
    }
  }

  /// Address a connecter dials.
  pub(crate) fn resolve_connect(&self, uri: &str) -> Result<SocketAddr, ZmqError> {
    match self {
      Endpoint::Tcp { host, port } => {
        if host == "*" || port == "*" {
          return Err(ZmqError::InvalidEndpoint(uri.to_string()));
        }
        let port = parse_port(port, uri)?;
        if port == 0 {
          return Err(ZmqError::InvalidEndpoint(uri.to_string()));
        }
        resolve_host(host, port, uri)
      }
      Endpoint::Ipc(path) => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), ipc_port(path))),
      Endpoint::Inproc(_) => Err(ZmqError::InvalidEndpoint(uri.to_string())),
    }
  }
}

fn parse_port(port: &str, uri: &str) -> Result<u16, ZmqError> {
  port.parse().map_err(|_| ZmqError::InvalidEndpoint(uri.to_string()))
}

fn resolve_host(host: &str, port: u16, uri: &str) -> Result<SocketAddr, ZmqError> {
  if let Ok(ip) = host.parse::<IpAddr>() {
    return Ok(SocketAddr::new(ip, port));
  }
  let addrs: Vec<SocketAddr> = (host, port)
    .to_socket_addrs()
    .map_err(|e| {
      tracing::debug!(endpoint = uri, error = %e, "Failed to resolve host");
      ZmqError::InvalidEndpoint(uri.to_string())
    })?
    .collect();
  // Prefer IPv4, matching what a wildcard bind listens on.
  addrs
    .iter()
    .find(|a| a.is_ipv4())
    .or_else(|| addrs.first())
    .copied()
    .ok_or_else(|| ZmqError::InvalidEndpoint(uri.to_string()))
}

/// Loopback port standing in for an ipc path: a MurmurHash2 of the path
/// folded into `10000..65536`.
pub(crate) fn ipc_port(path: &str) -> u16 {
  const SEED: u32 = 0xc58f_1a7b;
  const M: u32 = 0x5bd1_e995;
  const R: u32 = 24;

  let data = path.as_bytes();
  let mut hash = SEED ^ data.len() as u32;
  let mut chunks = data.chunks_exact(4);
  for chunk in &mut chunks {
    let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    k = k.wrapping_mul(M);
    k ^= k >> R;
    k = k.wrapping_mul(M);
    hash = hash.wrapping_mul(M) ^ k;
  }
  let tail = chunks.remainder();
  if !tail.is_empty() {
    for (i, b) in tail.iter().enumerate() {
      hash ^= (*b as u32) << (8 * i);
    }
    hash = hash.wrapping_mul(M);
  }
  hash ^= hash >> 13;
  hash = hash.wrapping_mul(M);
  hash ^= hash >> 15;

  ((hash as i32).unsigned_abs() % 55536 + 10000) as u16
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_supported_schemes() {
    assert_eq!(
      parse_endpoint("tcp://127.0.0.1:5555").unwrap(),
      Endpoint::Tcp {
        host: "127.0.0.1".into(),
        port: "5555".into()
      }
    );
    assert_eq!(
      parse_endpoint("tcp://[::1]:*").unwrap(),
      Endpoint::Tcp {
        host: "::1".into(),
        port: "*".into()
      }
    );
    assert_eq!(parse_endpoint("ipc:///tmp/feed").unwrap(), Endpoint::Ipc("/tmp/feed".into()));
    assert_eq!(parse_endpoint("inproc://jobs").unwrap(), Endpoint::Inproc("jobs".into()));
  }

  #[test]
  fn rejects_malformed_and_unknown() {
    assert!(matches!(parse_endpoint("tcp//x:1"), Err(ZmqError::InvalidEndpoint(_))));
    assert!(matches!(parse_endpoint("tcp://host"), Err(ZmqError::InvalidEndpoint(_))));
    assert!(matches!(parse_endpoint("tcp://host:99999"), Err(ZmqError::InvalidEndpoint(_))));
    assert!(matches!(parse_endpoint("inproc://"), Err(ZmqError::InvalidEndpoint(_))));
    assert!(matches!(parse_endpoint("pgm://eth0;239.1.1.1:5555"), Err(ZmqError::UnsupportedTransport(_))));
  }

  #[test]
  fn wildcards_resolve_for_bind_only() {
    let ep = parse_endpoint("tcp://*:*").unwrap();
    let addr = ep.resolve_bind("tcp://*:*").unwrap();
    assert!(addr.ip().is_unspecified());
    assert_eq!(addr.port(), 0);
    assert!(ep.resolve_connect("tcp://*:*").is_err());
    let ep = parse_endpoint("tcp://127.0.0.1:0").unwrap();
    assert!(ep.resolve_connect("tcp://127.0.0.1:0").is_err());
  }

  #[test]
  fn ipc_ports_are_stable_and_in_range() {
    let a = ipc_port("/tmp/a.sock");
    assert_eq!(a, ipc_port("/tmp/a.sock"));
    assert!(a >= 10000);
    for path in ["", "x", "ab", "abc", "abcd", "some/longer/path"] {
      assert!(ipc_port(path) >= 10000);
    }
  }
}
