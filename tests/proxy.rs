// tests/proxy.rs

use rzmq_classic::{proxy, Device, DeviceKind, Msg, SendFlags, Socket, SocketType, ZmqError, SUBSCRIBE};
use std::thread;
use std::time::{Duration, Instant};
mod common;

const SHORT_TIMEOUT: Duration = Duration::from_millis(100);
const LONG_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_queue_device_routes_replies_back() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let frontend = common::unique_inproc_endpoint();
  let backend = common::unique_inproc_endpoint();
  let device = Device::bind(&ctx, DeviceKind::Queue, &frontend, &backend)?;
  assert_eq!(device.kind(), DeviceKind::Queue);
  let runner = thread::spawn(move || device.run());

  let worker = ctx.socket(SocketType::Rep)?;
  worker.connect(&backend)?;
  let client = ctx.socket(SocketType::Req)?;
  client.connect(&frontend)?;
  common::no_linger(&worker)?;
  common::no_linger(&client)?;

  for i in 0..3 {
    client.send(Msg::from_vec(format!("job {}", i).into_bytes()))?;
    let job = common::recv_timeout(&worker, LONG_TIMEOUT)?;
    assert_eq!(job.data().unwrap(), format!("job {}", i).as_bytes());
    assert!(!job.is_more());
    worker.send(Msg::from_vec(format!("done {}", i).into_bytes()))?;

    let reply = common::recv_timeout(&client, LONG_TIMEOUT)?;
    assert_eq!(reply.data().unwrap(), format!("done {}", i).as_bytes());
  }

  drop((client, worker));
  ctx.term()?;
  // Termination is a clean stop for a device.
  runner.join().expect("device thread panicked")?;
  Ok(())
}

#[test]
fn test_forwarder_device_carries_subscriptions_upstream() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let frontend = common::unique_inproc_endpoint();
  let backend = common::unique_inproc_endpoint();
  let device = Device::bind(&ctx, DeviceKind::Forwarder, &frontend, &backend)?;
  let runner = thread::spawn(move || device.run());

  let publisher = ctx.socket(SocketType::Pub)?;
  publisher.connect(&frontend)?;
  let subscriber = ctx.socket(SocketType::Sub)?;
  subscriber.connect(&backend)?;
  subscriber.set_option(SUBSCRIBE, b"news")?;
  common::no_linger(&publisher)?;
  common::no_linger(&subscriber)?;

  // The subscription reaches the publisher through the device on its own
  // schedule; keep publishing until it lands.
  let start = Instant::now();
  let got = loop {
    publisher.send(Msg::from_static(b"weather"))?;
    publisher.send(Msg::from_static(b"news today"))?;
    match common::recv_timeout(&subscriber, SHORT_TIMEOUT) {
      Ok(msg) => break msg,
      Err(ZmqError::Timeout) if start.elapsed() < LONG_TIMEOUT => {}
      Err(e) => return Err(e),
    }
  };
  assert_eq!(got.data().unwrap(), b"news today");

  drop((publisher, subscriber));
  ctx.term()?;
  runner.join().expect("device thread panicked")?;
  Ok(())
}

fn recv_parts(socket: &Socket) -> Result<Vec<Vec<u8>>, ZmqError> {
  let mut parts = Vec::new();
  loop {
    let msg = common::recv_timeout(socket, LONG_TIMEOUT)?;
    parts.push(msg.data().unwrap_or_default().to_vec());
    if !msg.is_more() {
      return Ok(parts);
    }
  }
}

#[test]
fn test_proxy_copies_every_part_to_capture() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let inbound = common::unique_inproc_endpoint();
  let outbound = common::unique_inproc_endpoint();
  let tap = common::unique_inproc_endpoint();

  let frontend = ctx.socket(SocketType::Pull)?;
  let backend = ctx.socket(SocketType::Push)?;
  let capture = ctx.socket(SocketType::Pair)?;
  frontend.bind(&inbound)?;
  backend.bind(&outbound)?;
  let monitor = ctx.socket(SocketType::Pair)?;
  monitor.bind(&tap)?;
  capture.connect(&tap)?;

  let consumer = ctx.socket(SocketType::Pull)?;
  consumer.connect(&outbound)?;
  let producer = ctx.socket(SocketType::Push)?;
  producer.connect(&inbound)?;
  for socket in [&consumer, &producer, &monitor] {
    common::no_linger(socket)?;
  }

  let runner = thread::spawn(move || {
    let result = proxy(&frontend, &backend, Some(&capture));
    drop((frontend, backend, capture));
    result
  });

  producer.send_with_flags(Msg::from_static(b"header"), SendFlags::MORE)?;
  producer.send(Msg::from_static(b"body"))?;
  producer.send(Msg::from_static(b"single"))?;

  let expected_first = vec![b"header".to_vec(), b"body".to_vec()];
  assert_eq!(recv_parts(&consumer)?, expected_first);
  assert_eq!(recv_parts(&consumer)?, vec![b"single".to_vec()]);
  assert_eq!(recv_parts(&monitor)?, expected_first);
  assert_eq!(recv_parts(&monitor)?, vec![b"single".to_vec()]);

  drop((consumer, producer, monitor));
  ctx.term()?;
  let result = runner.join().expect("proxy thread panicked");
  assert!(matches!(result, Err(ZmqError::Terminated)), "got {:?}", result);
  Ok(())
}
