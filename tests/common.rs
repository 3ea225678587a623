// tests/common.rs
#![allow(dead_code)] // Not every test binary uses every helper

use rnng::{Pipe, PipeEvent, Socket};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

static IPC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);
static INPROC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);

static TRACING_INIT: Once = Once::new();

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(200);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(5);

/// Installs a test-writer subscriber once per test binary. `RUST_LOG`
/// overrides the default filter.
pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rnng=debug"));
    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer()
      .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
  });
}

pub fn unique_ipc_endpoint() -> String {
  let pid = std::process::id();
  let count = IPC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("ipc:///tmp/rnng_test_{}_{}.sock", pid, count)
}

pub fn unique_inproc_endpoint() -> String {
  let pid = std::process::id();
  let count = INPROC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("inproc://rnng_test_{}_{}", pid, count)
}

/// Polls until `socket` has at least `count` pipes attached.
pub fn wait_for_pipes(socket: &Socket, count: usize) {
  let deadline = Instant::now() + LONG_TIMEOUT;
  while socket.pipe_count().unwrap_or(0) < count {
    assert!(Instant::now() < deadline, "timed out waiting for {} pipes", count);
    thread::sleep(Duration::from_millis(5));
  }
}

/// Records every pipe event delivered to a socket's callback.
#[derive(Clone, Default)]
pub struct EventLog {
  events: Arc<Mutex<Vec<(Pipe, PipeEvent)>>>,
}

impl EventLog {
  pub fn attach(socket: &Socket) -> EventLog {
    let log = EventLog::default();
    let sink = log.events.clone();
    socket
      .on_pipe_event(move |pipe, event| sink.lock().unwrap().push((pipe, event)))
      .expect("register pipe callback");
    log
  }

  pub fn count(&self, kind: PipeEvent) -> usize {
    self.events.lock().unwrap().iter().filter(|(_, e)| *e == kind).count()
  }

  pub fn snapshot(&self) -> Vec<(Pipe, PipeEvent)> {
    self.events.lock().unwrap().clone()
  }

  /// Polls until at least `n` events of `kind` have been seen.
  pub fn wait_for(&self, kind: PipeEvent, n: usize) {
    let deadline = Instant::now() + LONG_TIMEOUT;
    while self.count(kind) < n {
      assert!(Instant::now() < deadline, "timed out waiting for {:?} x{}", kind, n);
      thread::sleep(Duration::from_millis(5));
    }
  }
}
