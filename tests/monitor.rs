// tests/monitor.rs

use rzmq_classic::{
  Socket, SocketEvent, SocketType, ZmqError, EVENT_ACCEPTED, EVENT_ALL, EVENT_CONNECTED, EVENT_CONNECT_RETRIED,
  EVENT_DISCONNECTED, EVENT_LISTENING, RECONNECT_IVL,
};
use std::time::Duration;
mod common;

const MONITOR_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn attach_monitor(ctx: &rzmq_classic::Context, socket: &Socket, events: i32) -> Result<Socket, ZmqError> {
  let endpoint = common::unique_inproc_endpoint();
  socket.monitor(Some(&endpoint), events)?;
  let monitor = ctx.socket(SocketType::Pair)?;
  monitor.connect(&endpoint)?;
  Ok(monitor)
}

#[test]
fn test_monitor_reports_listener_and_connection_events() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let router = ctx.socket(SocketType::Router)?;
  let dealer = ctx.socket(SocketType::Dealer)?;
  let router_mon = attach_monitor(&ctx, &router, EVENT_ALL)?;
  let dealer_mon = attach_monitor(&ctx, &dealer, EVENT_CONNECTED | EVENT_DISCONNECTED)?;

  let endpoint = common::bind_socket_resolve(&router, "tcp://127.0.0.1:*")?;
  let listening = common::wait_for_monitor_event(&router_mon, MONITOR_EVENT_TIMEOUT, |e| {
    matches!(e, SocketEvent::Listening { .. })
  })
  .map_err(ZmqError::Internal)?;
  assert_eq!(listening.endpoint(), endpoint);
  assert_eq!(listening.event_id(), EVENT_LISTENING);

  dealer.connect(&endpoint)?;
  let connected = common::wait_for_monitor_event(&dealer_mon, MONITOR_EVENT_TIMEOUT, |e| {
    matches!(e, SocketEvent::Connected { .. })
  })
  .map_err(ZmqError::Internal)?;
  assert_eq!(connected.endpoint(), endpoint);
  assert!(connected.value() >= 0);

  let accepted = common::wait_for_monitor_event(&router_mon, MONITOR_EVENT_TIMEOUT, |e| {
    matches!(e, SocketEvent::Accepted { .. })
  })
  .map_err(ZmqError::Internal)?;
  assert_eq!(accepted.event_id(), EVENT_ACCEPTED);

  // The router's accepting session sees the peer go away.
  dealer.close()?;
  common::wait_for_monitor_event(&router_mon, MONITOR_EVENT_TIMEOUT, |e| {
    matches!(e, SocketEvent::Disconnected { .. })
  })
  .map_err(ZmqError::Internal)?;
  Ok(())
}

#[test]
fn test_monitor_reports_connect_retries() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let dealer = ctx.socket(SocketType::Dealer)?;
  common::set_i32(&dealer, RECONNECT_IVL, 50)?;
  let mon = attach_monitor(&ctx, &dealer, EVENT_CONNECT_RETRIED)?;

  let port = {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
  };
  dealer.connect(&format!("tcp://127.0.0.1:{}", port))?;

  for _ in 0..2 {
    let retried = common::wait_for_monitor_event(&mon, MONITOR_EVENT_TIMEOUT, |e| {
      matches!(e, SocketEvent::ConnectRetried { .. })
    })
    .map_err(ZmqError::Internal)?;
    // Base interval plus jitter below it.
    assert!((50..100).contains(&retried.value()), "interval {}", retried.value());
  }
  Ok(())
}

#[test]
fn test_monitor_requires_inproc_endpoint() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let pull = ctx.socket(SocketType::Pull)?;
  assert!(matches!(
    pull.monitor(Some("tcp://127.0.0.1:5999"), EVENT_ALL),
    Err(ZmqError::UnsupportedTransport(_))
  ));
  // Stopping a monitor that never started is fine.
  pull.monitor(None, 0)?;
  Ok(())
}
