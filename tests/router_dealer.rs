// tests/router_dealer.rs

use rzmq_classic::{Msg, SendFlags, Socket, SocketType, ZmqError, IDENTITY, ROUTER_MANDATORY};
use std::collections::HashMap;
use std::time::Duration;
mod common;

const SHORT_TIMEOUT: Duration = Duration::from_millis(200);
const LONG_TIMEOUT: Duration = Duration::from_secs(5);

fn recv_multipart(socket: &Socket) -> Result<Vec<Msg>, ZmqError> {
  let mut parts = vec![common::recv_timeout(socket, LONG_TIMEOUT)?];
  while parts.last().map_or(false, |m| m.is_more()) {
    parts.push(common::recv_timeout(socket, LONG_TIMEOUT)?);
  }
  Ok(parts)
}

fn send_multipart(socket: &Socket, parts: &[&[u8]]) -> Result<(), ZmqError> {
  let last = parts.len() - 1;
  for (i, part) in parts.iter().enumerate() {
    let flags = if i < last { SendFlags::MORE } else { SendFlags::empty() };
    socket.send_with_flags(Msg::from_vec(part.to_vec()), flags)?;
  }
  Ok(())
}

#[test]
fn test_router_two_dealers_tcp() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let router = ctx.socket(SocketType::Router)?;
  let dealer_a = ctx.socket(SocketType::Dealer)?;
  let dealer_b = ctx.socket(SocketType::Dealer)?;

  dealer_a.set_option(IDENTITY, b"dealer-a")?;
  dealer_b.set_option(IDENTITY, b"dealer-b")?;

  let endpoint = common::bind_socket_resolve(&router, "tcp://127.0.0.1:0")?;
  assert!(!endpoint.ends_with(":0"));
  dealer_a.connect(&endpoint)?;
  dealer_b.connect(&endpoint)?;

  common::send_timeout(&dealer_a, Msg::from_static(b"from a"), LONG_TIMEOUT)?;
  common::send_timeout(&dealer_b, Msg::from_static(b"from b"), LONG_TIMEOUT)?;

  let mut seen = HashMap::new();
  for _ in 0..2 {
    let parts = recv_multipart(&router)?;
    assert_eq!(parts.len(), 2);
    seen.insert(parts[0].data().unwrap().to_vec(), parts[1].data().unwrap().to_vec());
  }
  assert_eq!(seen.get(&b"dealer-a".to_vec()).map(Vec::as_slice), Some(&b"from a"[..]));
  assert_eq!(seen.get(&b"dealer-b".to_vec()).map(Vec::as_slice), Some(&b"from b"[..]));

  // Replies go back by identity.
  send_multipart(&router, &[b"dealer-b", b"reply b"])?;
  send_multipart(&router, &[b"dealer-a", b"reply a"])?;
  assert_eq!(common::recv_timeout(&dealer_a, LONG_TIMEOUT)?.data().unwrap(), b"reply a");
  assert_eq!(common::recv_timeout(&dealer_b, LONG_TIMEOUT)?.data().unwrap(), b"reply b");
  Ok(())
}

#[test]
fn test_router_generates_identity_for_anonymous_peer() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let router = ctx.socket(SocketType::Router)?;
  let dealer = ctx.socket(SocketType::Dealer)?;

  let endpoint = common::bind_socket_resolve(&router, "tcp://127.0.0.1:*")?;
  dealer.connect(&endpoint)?;
  send_multipart(&dealer, &[b"", b"hello"])?;

  let parts = recv_multipart(&router)?;
  assert_eq!(parts.len(), 3);
  let identity = parts[0].data().unwrap().to_vec();
  assert_eq!(identity.len(), 5);
  assert_eq!(identity[0], 0);
  assert_eq!(parts[1].size(), 0);
  assert_eq!(parts[2].data().unwrap(), b"hello");

  send_multipart(&router, &[&identity, b"", b"world"])?;
  let reply = recv_multipart(&dealer)?;
  assert_eq!(reply.len(), 2);
  assert_eq!(reply[1].data().unwrap(), b"world");
  Ok(())
}

#[test]
fn test_router_unknown_identity() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let router = ctx.socket(SocketType::Router)?;
  router.bind("tcp://127.0.0.1:*")?;

  // Dropped silently by default.
  send_multipart(&router, &[b"nobody", b"lost"])?;

  common::set_i32(&router, ROUTER_MANDATORY, 1)?;
  let result = router.send_with_flags(Msg::from_static(b"nobody"), SendFlags::MORE);
  assert!(matches!(result, Err(ZmqError::HostUnreachable(_))), "got {:?}", result);
  Ok(())
}

#[test]
fn test_dealer_fair_queues_inproc() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let dealer = ctx.socket(SocketType::Dealer)?;
  let peer1 = ctx.socket(SocketType::Dealer)?;
  let peer2 = ctx.socket(SocketType::Dealer)?;
  let endpoint = common::unique_inproc_endpoint();

  dealer.bind(&endpoint)?;
  peer1.connect(&endpoint)?;
  peer2.connect(&endpoint)?;

  for i in 0..3u8 {
    peer1.send(Msg::from_vec(vec![b'a', i]))?;
    peer2.send(Msg::from_vec(vec![b'b', i]))?;
  }

  let mut got: Vec<Vec<u8>> = Vec::new();
  for _ in 0..6 {
    got.push(common::recv_timeout(&dealer, LONG_TIMEOUT)?.data().unwrap().to_vec());
  }
  // Per-peer order is kept and neither peer starves the other.
  let from_a: Vec<_> = got.iter().filter(|m| m[0] == b'a').map(|m| m[1]).collect();
  let from_b: Vec<_> = got.iter().filter(|m| m[0] == b'b').map(|m| m[1]).collect();
  assert_eq!(from_a, vec![0, 1, 2]);
  assert_eq!(from_b, vec![0, 1, 2]);
  assert_ne!(got[0][0], got[1][0]);
  assert!(matches!(common::recv_timeout(&dealer, SHORT_TIMEOUT), Err(ZmqError::Timeout)));
  Ok(())
}
