// src/aio.rs

//! Asynchronous operation handles.
//!
//! An [`Aio`] runs one send, receive or sleep at a time on the engine's
//! workers. Callers either block in [`Aio::wait`] or supply a completion
//! callback, which runs on a worker thread.

use crate::context::Context;
use crate::error::{Errno, Error, Result, SendError};
use crate::handle::ContextId;
use crate::message::Message;
use crate::runtime::{self, Global, OpGuard};
use crate::socket::Socket;

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lifecycle of the operation currently attached to an [`Aio`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AioState {
  /// Nothing has been started yet.
  Idle,
  Running,
  /// The last operation finished, successfully or not.
  Completed,
  /// The last operation was cancelled before finishing.
  Canceled,
}

/// What an aio operation runs against.
#[derive(Debug, Clone, Copy)]
pub enum AioTarget<'a> {
  Socket(&'a Socket),
  Context(&'a Context),
}

impl<'a> From<&'a Socket> for AioTarget<'a> {
  fn from(socket: &'a Socket) -> Self {
    AioTarget::Socket(socket)
  }
}

impl<'a> From<&'a Context> for AioTarget<'a> {
  fn from(ctx: &'a Context) -> Self {
    AioTarget::Context(ctx)
  }
}

/// Invoked once per finished operation. A received message is handed to the
/// callback instead of being stored in the aio.
pub type AioCallback = dyn Fn(Result<Option<Message>>) + Send + Sync;

struct Slot {
  state: AioState,
  result: Option<std::result::Result<(), Errno>>,
  msg: Option<Message>,
  timeout: Option<Duration>,
  cancel: Option<CancellationToken>,
}

struct AioShared {
  slot: Mutex<Slot>,
  done: Condvar,
  callback: Option<Arc<AioCallback>>,
}

impl AioShared {
  /// Records the outcome, wakes waiters and schedules the callback.
  fn finish(&self, global: Option<&Global>, result: std::result::Result<(), Errno>, msg: Option<Message>, recv: bool) {
    let handoff = recv && result.is_ok() && self.callback.is_some();
    let (stored, delivered) = if handoff { (None, msg) } else { (msg, None) };
    self.store(result, stored);
    self.done.notify_all();

    if let Some(callback) = self.callback.clone() {
      let outcome = result.map(|()| delivered).map_err(Error::from);
      match global {
        Some(global) => global.spawn_callback(move || callback(outcome)),
        None => callback(outcome),
      }
    }
  }

  fn store(&self, result: std::result::Result<(), Errno>, msg: Option<Message>) {
    let mut slot = self.slot.lock();
    slot.state = if result == Err(Errno::ECANCELED) {
      AioState::Canceled
    } else {
      AioState::Completed
    };
    slot.result = Some(result);
    if msg.is_some() {
      slot.msg = msg;
    }
    slot.cancel = None;
  }
}

/// Handle for one asynchronous operation at a time.
///
/// Dropping an aio cancels whatever it is running.
pub struct Aio {
  shared: Arc<AioShared>,
}

impl fmt::Debug for Aio {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let slot = self.shared.slot.lock();
    f.debug_struct("Aio")
      .field("state", &slot.state)
      .field("has_msg", &slot.msg.is_some())
      .field("timeout", &slot.timeout)
      .finish()
  }
}

impl Default for Aio {
  fn default() -> Self {
    Self::new()
  }
}

enum Resolved {
  Socket(Arc<Global>, Arc<crate::socket::core::SocketCore>),
  Context(Arc<Global>, Arc<crate::context::ContextCore>),
}

impl Resolved {
  fn resolve(target: AioTarget<'_>) -> Result<Resolved> {
    Ok(match target {
      AioTarget::Socket(socket) => {
        let (global, core) = socket.core()?;
        Resolved::Socket(global, core)
      }
      AioTarget::Context(ctx) => {
        let (global, core) = ctx.core()?;
        Resolved::Context(global, core)
      }
    })
  }

  fn global(&self) -> Arc<Global> {
    match self {
      Resolved::Socket(global, _) | Resolved::Context(global, _) => global.clone(),
    }
  }

  fn guard(&self, cancel: CancellationToken, timeout: Option<Duration>) -> OpGuard {
    let closed = match self {
      Resolved::Socket(_, core) => core.closed_token().clone(),
      Resolved::Context(_, core) => core.closed_token().clone(),
    };
    OpGuard::new(closed).with_cancel(cancel).with_timeout(timeout)
  }
}

impl Aio {
  pub fn new() -> Self {
    Self::build(None)
  }

  /// An aio whose completions are reported to `callback` on a worker thread.
  pub fn with_callback<F>(callback: F) -> Self
  where
    F: Fn(Result<Option<Message>>) + Send + Sync + 'static,
  {
    Self::build(Some(Arc::new(callback)))
  }

  fn build(callback: Option<Arc<AioCallback>>) -> Self {
    Self {
      shared: Arc::new(AioShared {
        slot: Mutex::new(Slot {
          state: AioState::Idle,
          result: None,
          msg: None,
          timeout: None,
          cancel: None,
        }),
        done: Condvar::new(),
        callback,
      }),
    }
  }

  /// Timeout for operations started afterwards. `None` waits forever.
  pub fn set_timeout(&self, timeout: Option<Duration>) {
    self.shared.slot.lock().timeout = timeout;
  }

  /// Attaches the message the next send will transmit. Refused while an
  /// operation is running.
  pub fn set_msg(&self, msg: Message) -> std::result::Result<(), SendError> {
    let mut slot = self.shared.slot.lock();
    if slot.state == AioState::Running {
      return Err(SendError::new(Error::InvalidState, msg));
    }
    slot.msg = Some(msg);
    Ok(())
  }

  /// Takes the attached message: the one received, or one a failed send left
  /// behind.
  pub fn take_msg(&self) -> Option<Message> {
    let mut slot = self.shared.slot.lock();
    if slot.state == AioState::Running {
      return None;
    }
    slot.msg.take()
  }

  pub fn state(&self) -> AioState {
    self.shared.slot.lock().state
  }

  /// Marks the aio running and hands out its cancel token and timeout.
  fn begin(&self, need_msg: bool) -> Result<(CancellationToken, Option<Duration>, Option<Message>)> {
    let mut slot = self.shared.slot.lock();
    if slot.state == AioState::Running {
      return Err(Error::InvalidState);
    }
    let msg = if need_msg {
      Some(slot.msg.take().ok_or(Error::from(Errno::EINVAL))?)
    } else {
      None
    };
    let cancel = CancellationToken::new();
    slot.state = AioState::Running;
    slot.result = None;
    slot.cancel = Some(cancel.clone());
    Ok((cancel, slot.timeout, msg))
  }

  /// Starts sending the attached message. Fails immediately only if an
  /// operation is already running or no message is attached; every other
  /// failure is reported through [`result`](Aio::result).
  pub fn start_send<'a>(&self, target: impl Into<AioTarget<'a>>) -> Result<()> {
    let (cancel, timeout, msg) = self.begin(true)?;
    let shared = self.shared.clone();
    let Some(msg) = msg else {
      shared.finish(None, Err(Errno::EINVAL), None, false);
      return Err(Errno::EINVAL.into());
    };
    let resolved = match Resolved::resolve(target.into()) {
      Ok(resolved) => resolved,
      Err(_) => {
        shared.finish(None, Err(Errno::ECLOSED), Some(msg), false);
        return Ok(());
      }
    };
    let guard = resolved.guard(cancel, timeout);
    let global = resolved.global();
    let task_global = global.clone();
    global.spawn(async move {
      let outcome = match &resolved {
        Resolved::Socket(_, core) => core.send(ContextId::UNBOUND, msg, &guard).await,
        Resolved::Context(_, core) => core.send(msg, &guard).await,
      };
      match outcome {
        Ok(()) => shared.finish(Some(&task_global), Ok(()), None, false),
        Err((errno, msg)) => shared.finish(Some(&task_global), Err(errno), Some(msg), false),
      }
    });
    Ok(())
  }

  /// Starts receiving. The message is available from
  /// [`take_msg`](Aio::take_msg) once the operation completes.
  pub fn start_recv<'a>(&self, target: impl Into<AioTarget<'a>>) -> Result<()> {
    let (cancel, timeout, _) = self.begin(false)?;
    let shared = self.shared.clone();
    let resolved = match Resolved::resolve(target.into()) {
      Ok(resolved) => resolved,
      Err(_) => {
        shared.finish(None, Err(Errno::ECLOSED), None, true);
        return Ok(());
      }
    };
    let guard = resolved.guard(cancel, timeout);
    let global = resolved.global();
    let task_global = global.clone();
    global.spawn(async move {
      let outcome = match &resolved {
        Resolved::Socket(_, core) => core.recv(ContextId::UNBOUND, &guard).await,
        Resolved::Context(_, core) => core.recv(&guard).await,
      };
      match outcome {
        Ok(msg) => shared.finish(Some(&task_global), Ok(()), Some(msg), true),
        Err(errno) => shared.finish(Some(&task_global), Err(errno), None, true),
      }
    });
    Ok(())
  }

  /// Completes successfully after `duration`, unless cancelled first.
  pub fn start_sleep(&self, duration: Duration) -> Result<()> {
    let global = runtime::global()?;
    let (cancel, _, _) = self.begin(false)?;
    let shared = self.shared.clone();
    let task_global = global.clone();
    global.spawn(async move {
      let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Errno::ECANCELED),
        _ = tokio::time::sleep(duration) => Ok(()),
      };
      shared.finish(Some(&task_global), result, None, false);
    });
    Ok(())
  }

  /// Outcome of the last finished operation. `InvalidState` while one is
  /// still running; a cancelled operation reports `Closed`.
  pub fn result(&self) -> Result<()> {
    let slot = self.shared.slot.lock();
    match (slot.state, slot.result) {
      (AioState::Running, _) => Err(Error::InvalidState),
      (_, Some(Err(errno))) => Err(errno.into()),
      _ => Ok(()),
    }
  }

  /// Blocks until the current operation, if any, has finished.
  pub fn wait(&self) {
    let mut slot = self.shared.slot.lock();
    while slot.state == AioState::Running {
      self.shared.done.wait(&mut slot);
    }
  }

  /// Requests cancellation of the running operation without waiting.
  pub fn cancel(&self) {
    if let Some(token) = self.shared.slot.lock().cancel.as_ref() {
      token.cancel();
    }
  }

  /// Cancels the running operation and waits for it to finish.
  pub fn stop(&self) {
    self.cancel();
    self.wait();
  }

  /// Stops the aio and releases it.
  pub fn free(self) {
    self.stop();
  }
}

impl Drop for Aio {
  fn drop(&mut self) {
    self.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fresh_aio_is_idle_and_ok() {
    let aio = Aio::new();
    assert_eq!(aio.state(), AioState::Idle);
    assert!(aio.result().is_ok());
    assert!(aio.take_msg().is_none());
  }

  #[test]
  fn send_without_message_is_rejected() {
    let aio = Aio::new();
    let socket = Socket::new(crate::Protocol::Pair1).unwrap();
    let err = aio.start_send(&socket).unwrap_err();
    assert_eq!(err.code(), Some(Errno::EINVAL.code()));
    assert_eq!(aio.state(), AioState::Idle);
    socket.close().unwrap();
  }

  #[test]
  fn sleep_completes_and_cancel_reports_closed() {
    let aio = Aio::new();
    aio.start_sleep(Duration::from_millis(10)).unwrap();
    aio.wait();
    assert_eq!(aio.state(), AioState::Completed);
    assert!(aio.result().is_ok());

    aio.start_sleep(Duration::from_secs(30)).unwrap();
    assert_eq!(aio.start_sleep(Duration::from_secs(1)).unwrap_err(), Error::InvalidState);
    aio.stop();
    assert_eq!(aio.state(), AioState::Canceled);
    assert_eq!(aio.result().unwrap_err(), Error::Closed);
  }
}
