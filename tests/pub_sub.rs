// tests/pub_sub.rs

use rzmq_classic::{Msg, Socket, SocketType, ZmqError, SUBSCRIBE, UNSUBSCRIBE, XPUB_VERBOSE};
use std::time::{Duration, Instant};
mod common;

const SHORT_TIMEOUT: Duration = Duration::from_millis(100);
const LONG_TIMEOUT: Duration = Duration::from_secs(5);

/// Subscriptions travel asynchronously: publish `payload` until `sub` sees
/// it, then return what it received.
fn publish_until_received(publisher: &Socket, sub: &Socket, payload: &'static [u8]) -> Result<Msg, ZmqError> {
  let start = Instant::now();
  loop {
    publisher.send(Msg::from_static(payload))?;
    match common::recv_timeout(sub, SHORT_TIMEOUT) {
      Ok(msg) => return Ok(msg),
      Err(ZmqError::Timeout) if start.elapsed() < LONG_TIMEOUT => {}
      Err(e) => return Err(e),
    }
  }
}

fn drain(sub: &Socket) {
  while common::recv_timeout(sub, SHORT_TIMEOUT).is_ok() {}
}

#[test]
fn test_pub_sub_tcp_basic() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let publisher = ctx.socket(SocketType::Pub)?;
  let subscriber = ctx.socket(SocketType::Sub)?;

  let endpoint = common::bind_socket_resolve(&publisher, "tcp://127.0.0.1:*")?;
  subscriber.connect(&endpoint)?;
  subscriber.set_option(SUBSCRIBE, b"")?;

  let msg = publish_until_received(&publisher, &subscriber, b"Hello Subscriber")?;
  assert_eq!(msg.data().unwrap(), b"Hello Subscriber");
  Ok(())
}

#[test]
fn test_pub_sub_tcp_topic_filter() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let publisher = ctx.socket(SocketType::Pub)?;
  let subscriber = ctx.socket(SocketType::Sub)?;

  let endpoint = common::bind_socket_resolve(&publisher, "tcp://127.0.0.1:*")?;
  subscriber.connect(&endpoint)?;
  subscriber.set_option(SUBSCRIBE, b"TopicA")?;

  publish_until_received(&publisher, &subscriber, b"TopicA: first")?;
  drain(&subscriber);

  publisher.send(Msg::from_static(b"TopicB: ignored"))?;
  publisher.send(Msg::from_static(b"TopicA: wanted"))?;
  let msg = common::recv_timeout(&subscriber, LONG_TIMEOUT)?;
  assert_eq!(msg.data().unwrap(), b"TopicA: wanted");

  subscriber.set_option(UNSUBSCRIBE, b"TopicA")?;
  // Wait until the unsubscription reached the publisher.
  let start = Instant::now();
  loop {
    publisher.send(Msg::from_static(b"TopicA: after"))?;
    match common::recv_timeout(&subscriber, SHORT_TIMEOUT) {
      Err(ZmqError::Timeout) => break,
      Ok(_) if start.elapsed() < LONG_TIMEOUT => {}
      other => panic!("unsubscribe never took effect: {:?}", other),
    }
  }
  Ok(())
}

#[test]
fn test_pub_sub_tcp_multiple_subs() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let publisher = ctx.socket(SocketType::Pub)?;
  let sub1 = ctx.socket(SocketType::Sub)?;
  let sub2 = ctx.socket(SocketType::Sub)?;

  let endpoint = common::bind_socket_resolve(&publisher, "tcp://127.0.0.1:*")?;
  for sub in [&sub1, &sub2] {
    sub.connect(&endpoint)?;
    sub.set_option(SUBSCRIBE, b"")?;
  }
  publish_until_received(&publisher, &sub1, b"warmup")?;
  publish_until_received(&publisher, &sub2, b"warmup")?;
  drain(&sub1);
  drain(&sub2);

  publisher.send(Msg::from_static(b"to everyone"))?;
  for sub in [&sub1, &sub2] {
    let msg = common::recv_timeout(sub, LONG_TIMEOUT)?;
    assert_eq!(msg.data().unwrap(), b"to everyone");
  }
  Ok(())
}

#[test]
fn test_pub_sub_inproc_basic() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let publisher = ctx.socket(SocketType::Pub)?;
  let subscriber = ctx.socket(SocketType::Sub)?;
  let endpoint = common::unique_inproc_endpoint();

  publisher.bind(&endpoint)?;
  subscriber.connect(&endpoint)?;
  subscriber.set_option(SUBSCRIBE, b"news")?;

  let msg = publish_until_received(&publisher, &subscriber, b"news: inproc")?;
  assert_eq!(msg.data().unwrap(), b"news: inproc");
  Ok(())
}

#[test]
fn test_xpub_receives_subscriptions() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let xpub = ctx.socket(SocketType::XPub)?;
  let sub1 = ctx.socket(SocketType::Sub)?;
  let sub2 = ctx.socket(SocketType::Sub)?;
  let endpoint = common::unique_inproc_endpoint();

  xpub.bind(&endpoint)?;
  sub1.connect(&endpoint)?;
  sub2.connect(&endpoint)?;

  sub1.set_option(SUBSCRIBE, b"weather")?;
  let first = common::recv_timeout(&xpub, LONG_TIMEOUT)?;
  assert_eq!(first.data().unwrap(), b"\x01weather");

  // A duplicate subscription is not reported unless verbose.
  sub2.set_option(SUBSCRIBE, b"weather")?;
  assert!(matches!(common::recv_timeout(&xpub, SHORT_TIMEOUT), Err(ZmqError::Timeout)));

  common::set_i32(&xpub, XPUB_VERBOSE, 1)?;
  let sub3 = ctx.socket(SocketType::Sub)?;
  sub3.connect(&endpoint)?;
  sub3.set_option(SUBSCRIBE, b"weather")?;
  let verbose = common::recv_timeout(&xpub, LONG_TIMEOUT)?;
  assert_eq!(verbose.data().unwrap(), b"\x01weather");
  Ok(())
}

#[test]
fn test_xsub_forwards_subscriptions_as_messages() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let publisher = ctx.socket(SocketType::Pub)?;
  let xsub = ctx.socket(SocketType::XSub)?;

  let endpoint = common::bind_socket_resolve(&publisher, "tcp://127.0.0.1:*")?;
  xsub.connect(&endpoint)?;
  xsub.send(Msg::from_static(b"\x01alerts"))?;

  let msg = publish_until_received(&publisher, &xsub, b"alerts: disk full")?;
  assert_eq!(msg.data().unwrap(), b"alerts: disk full");
  publisher.send(Msg::from_static(b"other: ignored"))?;
  assert!(matches!(common::recv_timeout(&xsub, SHORT_TIMEOUT), Err(ZmqError::Timeout)));
  Ok(())
}
