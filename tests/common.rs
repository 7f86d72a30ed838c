// tests/common.rs
#![allow(dead_code)] // Not every test file uses every helper

use rzmq_classic::{Context, Msg, Socket, SocketEvent, ZmqError, LAST_ENDPOINT, LINGER, RCVTIMEO, SNDTIMEO};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::{Duration, Instant};

static IPC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);
static INPROC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);

static TRACING_INIT: Once = Once::new();

// Overridable with RUST_LOG.
fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    let default_filter = "rzmq_classic=debug,warn";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_thread_names(true)
      .with_test_writer()
      .finish();

    // Another test binary thread may have won the race; that is fine.
    let _ = tracing::subscriber::set_global_default(subscriber);
  });
}

pub fn test_context() -> Context {
  setup_tracing();
  Context::new().expect("Failed to create test context")
}

pub fn unique_ipc_endpoint() -> String {
  let pid = std::process::id();
  let count = IPC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("ipc:///tmp/rzmq_classic_test_{}_{}", pid, count)
}

pub fn unique_inproc_endpoint() -> String {
  let pid = std::process::id();
  let count = INPROC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("inproc://rzmq_classic_test_{}_{}", pid, count)
}

pub fn set_i32(socket: &Socket, option: i32, value: i32) -> Result<(), ZmqError> {
  socket.set_option(option, &value.to_ne_bytes())
}

pub fn get_i32(socket: &Socket, option: i32) -> Result<i32, ZmqError> {
  let raw = socket.get_option(option)?;
  let bytes: [u8; 4] = raw
    .as_slice()
    .try_into()
    .map_err(|_| ZmqError::Internal(format!("option {} is not an i32", option)))?;
  Ok(i32::from_ne_bytes(bytes))
}

/// Discard pending messages on close so `term` never waits on a dead peer.
pub fn no_linger(socket: &Socket) -> Result<(), ZmqError> {
  set_i32(socket, LINGER, 0)
}

pub fn recv_timeout(socket: &Socket, duration: Duration) -> Result<Msg, ZmqError> {
  set_i32(socket, RCVTIMEO, duration.as_millis() as i32)?;
  socket.recv()
}

pub fn send_timeout(socket: &Socket, msg: Msg, duration: Duration) -> Result<(), ZmqError> {
  set_i32(socket, SNDTIMEO, duration.as_millis() as i32)?;
  socket.send(msg)
}

/// Binds and returns the endpoint actually bound (wildcard ports resolved).
pub fn bind_socket_resolve(socket: &Socket, base_endpoint: &str) -> Result<String, ZmqError> {
  socket.bind(base_endpoint)?;
  let raw = socket.get_option(LAST_ENDPOINT)?;
  String::from_utf8(raw).map_err(|e| ZmqError::Internal(e.to_string()))
}

/// Reads monitor records from `monitor` until one satisfies `check_event`.
pub fn wait_for_monitor_event(
  monitor: &Socket,
  timeout: Duration,
  check_event: impl Fn(&SocketEvent) -> bool,
) -> Result<SocketEvent, String> {
  let start_time = Instant::now();
  loop {
    let elapsed = start_time.elapsed();
    if elapsed > timeout {
      return Err(format!("Timeout waiting for specific monitor event after {:?}", timeout));
    }
    match recv_timeout(monitor, timeout - elapsed) {
      Ok(msg) => {
        let event = SocketEvent::parse(msg.as_slice()).map_err(|e| e.to_string())?;
        println!("Monitor received: {:?}", event);
        if check_event(&event) {
          return Ok(event);
        }
      }
      Err(ZmqError::Timeout) => {}
      Err(e) => return Err(format!("Monitor socket failed: {}", e)),
    }
  }
}
