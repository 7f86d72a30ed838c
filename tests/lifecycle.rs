// tests/lifecycle.rs

use rzmq_classic::{Context, Msg, SocketType, ZmqError, IO_THREADS, LINGER, MAX_SOCKETS};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
mod common;

const SHORT_TIMEOUT: Duration = Duration::from_millis(250);
const LONG_TIMEOUT: Duration = Duration::from_secs(5);

// --- Test: Context termination interrupts blocked calls ---
#[test]
fn test_context_term_interrupts_blocking_recv() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let pull = ctx.socket(SocketType::Pull)?;
  pull.bind(&common::unique_inproc_endpoint())?;

  let (tx, rx) = mpsc::channel();
  let worker = thread::spawn(move || {
    // Blocks without a timeout until the context goes away.
    let result = pull.recv();
    tx.send(()).ok();
    drop(pull);
    result
  });

  thread::sleep(SHORT_TIMEOUT);
  assert!(rx.try_recv().is_err(), "recv returned before termination");
  ctx.term()?;

  let result = worker.join().expect("worker panicked");
  assert!(matches!(result, Err(ZmqError::Terminated)), "got {:?}", result);
  Ok(())
}

#[test]
fn test_operations_after_term_fail() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let push = ctx.socket(SocketType::Push)?;
  drop(push);
  ctx.term()?;
  assert!(matches!(ctx.socket(SocketType::Pull), Err(ZmqError::Terminated)));
  // A second term is a no-op.
  ctx.term()?;
  Ok(())
}

#[test]
fn test_term_without_sockets_returns() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  ctx.term()?;
  Ok(())
}

#[test]
fn test_socket_close_then_use_fails() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let dealer = ctx.socket(SocketType::Dealer)?;
  dealer.close()?;
  assert!(matches!(dealer.send(Msg::from_static(b"x")), Err(ZmqError::InvalidState(_))));
  assert!(matches!(dealer.bind("tcp://127.0.0.1:*"), Err(ZmqError::InvalidState(_))));
  // Closing twice is harmless.
  dealer.close()?;
  Ok(())
}

#[test]
fn test_zero_linger_discards_pending_messages() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let push = ctx.socket(SocketType::Push)?;
  common::set_i32(&push, LINGER, 0)?;

  // Nobody listens here; the messages can never leave.
  let port = {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
  };
  push.connect(&format!("tcp://127.0.0.1:{}", port))?;
  for _ in 0..10 {
    push.send(Msg::from_static(b"stuck"))?;
  }

  let start = Instant::now();
  drop(push);
  ctx.term()?;
  assert!(start.elapsed() < LONG_TIMEOUT);
  Ok(())
}

#[test]
fn test_positive_linger_bounds_termination() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let push = ctx.socket(SocketType::Push)?;
  common::set_i32(&push, LINGER, 200)?;

  let port = {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
  };
  push.connect(&format!("tcp://127.0.0.1:{}", port))?;
  push.send(Msg::from_static(b"stuck"))?;

  let start = Instant::now();
  drop(push);
  ctx.term()?;
  let elapsed = start.elapsed();
  assert!(elapsed >= Duration::from_millis(150), "terminated after {:?}", elapsed);
  assert!(elapsed < LONG_TIMEOUT, "terminated after {:?}", elapsed);
  Ok(())
}

#[test]
fn test_linger_delivers_pending_messages_before_close() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let pull = ctx.socket(SocketType::Pull)?;
  let endpoint = common::bind_socket_resolve(&pull, "tcp://127.0.0.1:*")?;

  {
    let push = ctx.socket(SocketType::Push)?;
    push.connect(&endpoint)?;
    for i in 0..100u8 {
      push.send(Msg::from_vec(vec![i]))?;
    }
    // Closed straight away; the default linger keeps the session sending.
  }

  for i in 0..100u8 {
    let msg = common::recv_timeout(&pull, LONG_TIMEOUT)?;
    assert_eq!(msg.data().unwrap(), &[i]);
  }
  Ok(())
}

#[test]
fn test_context_options() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  assert_eq!(ctx.get_option(IO_THREADS)?, 1);
  ctx.set_option(IO_THREADS, 2)?;
  ctx.set_option(MAX_SOCKETS, 2)?;
  assert_eq!(ctx.get_option(MAX_SOCKETS)?, 2);
  assert!(matches!(ctx.set_option(MAX_SOCKETS, 0), Err(ZmqError::InvalidOptionValue(_))));
  assert!(matches!(ctx.get_option(12345), Err(ZmqError::InvalidOption(_))));

  let a = ctx.socket(SocketType::Pair)?;
  let b = ctx.socket(SocketType::Pair)?;
  assert!(matches!(
    ctx.socket(SocketType::Pair),
    Err(ZmqError::ResourceLimitReached(_))
  ));

  // A reaped socket frees its slot again.
  drop(a);
  let start = Instant::now();
  let c = loop {
    match ctx.socket(SocketType::Pair) {
      Ok(s) => break s,
      Err(ZmqError::ResourceLimitReached(_)) if start.elapsed() < LONG_TIMEOUT => {
        thread::sleep(Duration::from_millis(10))
      }
      Err(e) => return Err(e),
    }
  };
  drop((b, c));
  Ok(())
}

#[test]
fn test_dropping_context_and_sockets_terminates() -> Result<(), ZmqError> {
  let (tx, rx) = mpsc::channel();
  thread::spawn(move || -> Result<(), ZmqError> {
    let ctx: Context = common::test_context();
    let pair_a = ctx.socket(SocketType::Pair)?;
    let pair_b = ctx.socket(SocketType::Pair)?;
    let endpoint = common::unique_inproc_endpoint();
    pair_a.bind(&endpoint)?;
    pair_b.connect(&endpoint)?;
    pair_b.send(Msg::from_static(b"bye"))?;
    assert_eq!(common::recv_timeout(&pair_a, LONG_TIMEOUT)?.data().unwrap(), b"bye");
    drop(pair_a);
    drop(pair_b);
    drop(ctx);
    tx.send(()).ok();
    Ok(())
  });
  rx.recv_timeout(LONG_TIMEOUT).expect("context drop did not finish");
  Ok(())
}
