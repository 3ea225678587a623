// src/context.rs

//! Protocol contexts: independent request/reply (or survey) state machines
//! multiplexed over one socket.

use crate::error::{Errno, Error, Result, SendError};
use crate::handle::ContextId;
use crate::message::{Flags, Message};
use crate::runtime::{self, next_handle, Global, OpGuard};
use crate::socket::core::SocketCore;
use crate::socket::options::{self, OptionValue};
use crate::socket::{op_error, Socket};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
struct Timeouts {
  recv: Option<Duration>,
  send: Option<Duration>,
}

/// Engine side of a context.
#[derive(Debug)]
pub(crate) struct ContextCore {
  pub(crate) id: ContextId,
  pub(crate) socket: Arc<SocketCore>,
  /// Child of the socket's token, so closing the socket closes the context.
  closed: CancellationToken,
  timeouts: Mutex<Timeouts>,
}

impl ContextCore {
  pub(crate) fn closed_token(&self) -> &CancellationToken {
    &self.closed
  }

  pub(crate) fn guard(&self, flags: Flags, send: bool) -> OpGuard {
    let guard = OpGuard::new(self.closed.clone());
    if flags.contains(Flags::NONBLOCK) {
      return guard.nonblocking();
    }
    let timeouts = *self.timeouts.lock();
    guard.with_timeout(if send { timeouts.send } else { timeouts.recv })
  }

  pub(crate) async fn send(&self, msg: Message, guard: &OpGuard) -> std::result::Result<(), (Errno, Message)> {
    if self.closed.is_cancelled() {
      return Err((Errno::ECLOSED, msg));
    }
    self.socket.send(self.id, msg, guard).await
  }

  pub(crate) async fn recv(&self, guard: &OpGuard) -> std::result::Result<Message, Errno> {
    if self.closed.is_cancelled() {
      return Err(Errno::ECLOSED);
    }
    self.socket.recv(self.id, guard).await
  }
}

/// A context on a socket whose protocol supports them (req, rep, surveyor,
/// respondent, cooked only).
///
/// Each context carries its own exchange state, so several requests or
/// surveys can be in flight on one socket at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
  id: ContextId,
}

impl Context {
  /// Opens a new context on `socket`. Fails with a not-supported error for
  /// protocols without contexts and for raw sockets.
  pub fn open(socket: &Socket) -> Result<Context> {
    let (global, core) = socket.core()?;
    if core.raw || !core.protocol.supports_contexts() {
      return Err(Errno::ENOTSUP.into());
    }
    let id = ContextId::new(next_handle());
    core.logic().open_lane(id)?;
    let timeouts = {
      let opts = core.options.read();
      Timeouts {
        recv: opts.recv_timeout,
        send: opts.send_timeout,
      }
    };
    let ctx = Arc::new(ContextCore {
      id,
      socket: core.clone(),
      closed: core.closed_token().child_token(),
      timeouts: Mutex::new(timeouts),
    });
    global.contexts.insert(id.id(), ctx);
    core.add_context(id);
    if core.is_closed() {
      global.contexts.remove(id.id());
      return Err(Error::Closed);
    }
    tracing::debug!(socket_id = %core.id, context_id = %id, "Context opened");
    Ok(Context { id })
  }

  pub fn id(&self) -> ContextId {
    self.id
  }

  pub(crate) fn core(&self) -> Result<(Arc<Global>, Arc<ContextCore>)> {
    let global = runtime::current().ok_or(Error::Closed)?;
    let core = global.contexts.get(self.id.id()).ok_or(Error::Closed)?;
    Ok((global, core))
  }

  /// The socket this context belongs to.
  pub fn socket(&self) -> Result<Socket> {
    Ok(Socket::from_id(self.core()?.1.socket.id))
  }

  pub fn send(&self, data: &[u8]) -> Result<()> {
    self.send_msg(Message::from(data), Flags::empty()).map_err(Error::from)
  }

  pub fn recv(&self) -> Result<Vec<u8>> {
    Ok(self.recv_msg(Flags::empty())?.body().to_vec())
  }

  pub fn send_msg(&self, msg: Message, flags: Flags) -> std::result::Result<(), SendError> {
    let (global, core) = match self.core() {
      Ok(found) => found,
      Err(e) => return Err(SendError::new(e, msg)),
    };
    let guard = core.guard(flags, true);
    match global.block_on(async move { core.send(msg, &guard).await }) {
      Ok(Ok(())) => Ok(()),
      Ok(Err((errno, msg))) => Err(SendError::new(op_error(errno, flags), msg)),
      Err(errno) => Err(SendError::new(errno, Message::new())),
    }
  }

  pub fn recv_msg(&self, flags: Flags) -> Result<Message> {
    let (global, core) = self.core()?;
    let guard = core.guard(flags, false);
    global
      .block_on(async move { core.recv(&guard).await })?
      .map_err(|errno| op_error(errno, flags))
  }

  /// Contexts carry their own `recv-timeout` and `send-timeout`, initialised
  /// from the socket. Other options belong to the socket.
  pub fn get_option(&self, name: &str) -> Result<OptionValue> {
    let spec = options::lookup(name).ok_or_else(|| Error::UnknownOption(name.to_string()))?;
    let (_, core) = self.core()?;
    spec.check_get()?;
    let timeouts = *core.timeouts.lock();
    match name {
      options::RECV_TIMEOUT => Ok(OptionValue::Duration(timeouts.recv)),
      options::SEND_TIMEOUT => Ok(OptionValue::Duration(timeouts.send)),
      _ => Err(Errno::ENOTSUP.into()),
    }
  }

  pub fn set_option(&self, name: &str, value: impl Into<OptionValue>) -> Result<()> {
    let spec = options::lookup(name).ok_or_else(|| Error::UnknownOption(name.to_string()))?;
    let (_, core) = self.core()?;
    let value = value.into();
    spec.check_set(&value)?;
    let mut timeouts = core.timeouts.lock();
    match name {
      options::RECV_TIMEOUT => timeouts.recv = options::duration_of(&value)?,
      options::SEND_TIMEOUT => timeouts.send = options::duration_of(&value)?,
      _ => return Err(Errno::ENOTSUP.into()),
    }
    Ok(())
  }

  /// Closes the context. Operations pending on it fail with `Closed`.
  pub fn close(self) -> Result<()> {
    let global = runtime::current().ok_or(Error::Closed)?;
    let core = global.contexts.remove(self.id.id()).ok_or(Error::Closed)?;
    core.closed.cancel();
    core.socket.forget_context(self.id);
    core.socket.logic().close_lane(self.id);
    tracing::debug!(context_id = %self.id, "Context closed");
    Ok(())
  }
}
