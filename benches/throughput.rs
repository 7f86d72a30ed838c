// benches/throughput.rs

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rzmq_classic::{
  Context, Msg, Socket, SocketEvent, SocketType, ZmqError, EVENT_ACCEPTED, EVENT_LISTENING, LAST_ENDPOINT, RCVHWM,
  RCVTIMEO, SNDHWM,
};
use std::thread;
use std::time::{Duration, Instant};

// --- Benchmarking Constants ---
const NUM_MESSAGES: usize = 10000;
const EVENT_RECV_TIMEOUT: Duration = Duration::from_secs(4);
const BENCH_HWM: i32 = 100_000;
const MONITOR_ENDPOINT: &str = "inproc://bench-pull-monitor";

// Polls the monitor in short slices until an event passes `check_event`.
fn wait_for_event(monitor: &Socket, check_event: impl Fn(&SocketEvent) -> bool) -> Result<SocketEvent, String> {
  let start_time = Instant::now();
  monitor
    .set_option(RCVTIMEO, &50i32.to_ne_bytes())
    .map_err(|e| e.to_string())?;
  loop {
    if start_time.elapsed() > EVENT_RECV_TIMEOUT {
      return Err(format!("Timeout after {:?}", EVENT_RECV_TIMEOUT));
    }
    match monitor.recv() {
      Ok(msg) => {
        let event = SocketEvent::parse(msg.as_slice()).map_err(|e| e.to_string())?;
        if check_event(&event) {
          return Ok(event);
        }
      }
      Err(ZmqError::Timeout) => {}
      Err(e) => return Err(format!("Monitor socket failed: {}", e)),
    }
  }
}

fn setup_push_pull(ctx: &Context, transport: &str) -> Result<(Socket, Socket), ZmqError> {
  let push = ctx.socket(SocketType::Push)?;
  let pull = ctx.socket(SocketType::Pull)?;
  push.set_option(SNDHWM, &BENCH_HWM.to_ne_bytes())?;
  pull.set_option(RCVHWM, &BENCH_HWM.to_ne_bytes())?;

  if transport == "inproc" {
    pull.bind("inproc://bench-push-pull")?;
    push.connect("inproc://bench-push-pull")?;
    return Ok((push, pull));
  }

  // Know when the connection is up before the clock starts.
  pull.monitor(Some(MONITOR_ENDPOINT), EVENT_LISTENING | EVENT_ACCEPTED)?;
  let monitor = ctx.socket(SocketType::Pair)?;
  monitor.connect(MONITOR_ENDPOINT)?;

  pull.bind("tcp://127.0.0.1:*")?;
  let endpoint = String::from_utf8(pull.get_option(LAST_ENDPOINT)?).map_err(|e| ZmqError::Internal(e.to_string()))?;
  wait_for_event(&monitor, |e| matches!(e, SocketEvent::Listening { .. }))
    .map_err(|e| ZmqError::Internal(format!("PULL Listening event error: {}", e)))?;

  push.connect(&endpoint)?;
  wait_for_event(&monitor, |e| matches!(e, SocketEvent::Accepted { .. }))
    .map_err(|e| ZmqError::Internal(format!("PULL Accepted event error: {}", e)))?;

  pull.monitor(None, 0)?;
  Ok((push, pull))
}

fn run_once(transport: &str, msg_size: usize) -> Duration {
  let ctx = Context::new().expect("Bench context creation failed");
  let (push, pull) = setup_push_pull(&ctx, transport).expect("Bench socket setup failed");
  let payload = vec![0u8; msg_size];

  let start = Instant::now();
  let sender = thread::spawn(move || -> Result<Socket, ZmqError> {
    for _ in 0..NUM_MESSAGES {
      push.send(Msg::from_vec(black_box(payload.clone())))?;
    }
    Ok(push)
  });
  for _ in 0..NUM_MESSAGES {
    let msg = pull.recv().expect("Benchmark receive failed");
    black_box(msg.data());
  }
  let elapsed = start.elapsed();

  let push = sender
    .join()
    .expect("Sender thread panicked")
    .expect("Benchmark send failed");
  drop(push);
  drop(pull);
  ctx.term().expect("Context termination failed");
  elapsed
}

fn push_pull_throughput(c: &mut Criterion) {
  for transport in ["inproc", "tcp"] {
    let mut group = c.benchmark_group(format!("PUSH_PULL_{}_Throughput", transport.to_uppercase()));
    for size in [16usize, 256, 1024, 4096, 16384] {
      group.throughput(Throughput::Bytes((NUM_MESSAGES * size) as u64));
      group.bench_with_input(BenchmarkId::from_parameter(format!("{}B", size)), &size, |b, &msg_size| {
        b.iter_custom(|iters| (0..iters).map(|_| run_once(transport, msg_size)).sum());
      });
    }
    group.finish();
  }
}

criterion_group!(benches, push_pull_throughput);
criterion_main!(benches);
