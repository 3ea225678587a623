// src/runtime/mod.rs

//! Process-wide engine state: the worker runtime and the registries that map
//! public handle ids to live objects.
//!
//! The state is created on first use (or by an explicit [`init`]) and torn
//! down by [`fini`]. Blocking public calls hand a future to the worker
//! runtime and park the calling thread until it resolves.

mod guard;
mod queue;
mod registry;

pub(crate) use guard::OpGuard;
pub(crate) use queue::MessageQueue;
pub(crate) use registry::{next_handle, HandleTable};

use crate::context::ContextCore;
use crate::error::{Errno, Error};
use crate::socket::core::SocketCore;
use crate::socket::endpoint::{DialerCore, ListenerCore};
use crate::socket::pipe::PipeCore;
#[cfg(feature = "inproc")]
use crate::transport::inproc::InprocRegistry;

use futures::channel::oneshot;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};

/// Settings for the worker runtime. Only read when the runtime starts.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  /// Number of worker threads driving transports and protocol tasks.
  pub worker_threads: usize,
  pub thread_name: String,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
    Self {
      worker_threads: workers.clamp(2, 8),
      thread_name: "rnng-worker".to_string(),
    }
  }
}

pub(crate) struct Global {
  runtime: Mutex<Option<Runtime>>,
  handle: Handle,
  pub(crate) sockets: HandleTable<Arc<SocketCore>>,
  pub(crate) dialers: HandleTable<Arc<DialerCore>>,
  pub(crate) listeners: HandleTable<Arc<ListenerCore>>,
  pub(crate) contexts: HandleTable<Arc<ContextCore>>,
  pub(crate) pipes: HandleTable<Arc<PipeCore>>,
  #[cfg(feature = "inproc")]
  pub(crate) inproc: InprocRegistry,
}

static GLOBAL: Lazy<Mutex<Option<Arc<Global>>>> = Lazy::new(|| Mutex::new(None));

impl Global {
  fn start(config: &RuntimeConfig) -> Result<Arc<Global>, Errno> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
      .worker_threads(config.worker_threads.max(1))
      .thread_name(config.thread_name.clone())
      .enable_all()
      .build()
      .map_err(|e| {
        tracing::error!(error = %e, "Failed to start worker runtime");
        Errno::from_io(&e)
      })?;
    let handle = runtime.handle().clone();
    tracing::info!(workers = config.worker_threads, "Engine runtime started");
    Ok(Arc::new(Global {
      runtime: Mutex::new(Some(runtime)),
      handle,
      sockets: HandleTable::new(),
      dialers: HandleTable::new(),
      listeners: HandleTable::new(),
      contexts: HandleTable::new(),
      pipes: HandleTable::new(),
      #[cfg(feature = "inproc")]
      inproc: InprocRegistry::new(),
    }))
  }

  /// Runs `fut` on the worker runtime and blocks the calling thread until it
  /// resolves. `ECLOSED` if the runtime goes away first.
  pub(crate) fn block_on<F>(&self, fut: F) -> Result<F::Output, Errno>
  where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
  {
    let (tx, rx) = oneshot::channel();
    self.handle.spawn(async move {
      let _ = tx.send(fut.await);
    });
    futures::executor::block_on(rx).map_err(|_| Errno::ECLOSED)
  }

  pub(crate) fn spawn<F>(&self, fut: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.handle.spawn(fut);
  }

  /// Runs user callbacks off the async workers, so a callback may itself
  /// make blocking calls.
  pub(crate) fn spawn_callback<F>(&self, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.handle.spawn_blocking(f);
  }

  fn shutdown(&self) {
    let sockets = self.sockets.drain();
    tracing::info!(open_sockets = sockets.len(), "Engine shutting down");
    for core in sockets {
      core.shutdown(self);
    }
    if let Some(runtime) = self.runtime.lock().take() {
      runtime.shutdown_background();
    }
  }
}

/// Returns the process-wide state, starting it with defaults if needed.
pub(crate) fn global() -> Result<Arc<Global>, Errno> {
  let mut slot = GLOBAL.lock();
  if let Some(global) = slot.as_ref() {
    return Ok(global.clone());
  }
  let global = Global::start(&RuntimeConfig::default())?;
  *slot = Some(global.clone());
  Ok(global)
}

/// Returns the process-wide state only if it is already running.
pub(crate) fn current() -> Option<Arc<Global>> {
  GLOBAL.lock().clone()
}

/// Starts the engine with explicit settings. Fails with `InvalidState` if it
/// is already running.
pub fn init(config: RuntimeConfig) -> Result<(), Error> {
  let mut slot = GLOBAL.lock();
  if slot.is_some() {
    return Err(Error::InvalidState);
  }
  *slot = Some(Global::start(&config)?);
  Ok(())
}

/// Closes every open socket and stops the worker runtime.
///
/// Safe to call any number of times. Any later use of the library starts a
/// fresh engine; handles from before the call report `Closed`.
pub fn fini() {
  let taken = GLOBAL.lock().take();
  if let Some(global) = taken {
    global.shutdown();
    tracing::info!("Engine finalized");
  }
}

/// Number of currently open sockets.
pub fn socket_count() -> usize {
  current().map(|g| g.sockets.len()).unwrap_or(0)
}
