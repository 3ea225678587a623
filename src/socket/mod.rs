// src/socket/mod.rs

pub(crate) mod core;
pub(crate) mod endpoint;
pub mod options;
pub(crate) mod pipe;

pub use endpoint::{Dialer, Listener};
pub use pipe::{Pipe, PipeEvent};

use crate::error::{Errno, Error, Result, SendError};
use crate::handle::{ContextId, SocketId};
use crate::message::{Flags, Message};
use crate::protocol::Protocol;
use crate::runtime::{self, Global};
use self::core::SocketCore;
use options::OptionValue;

use std::sync::Arc;

/// Converts an engine status from a send or receive into the public error.
/// A deadline hit by a non-blocking call is reported as `EAGAIN`.
pub(crate) fn op_error(errno: Errno, flags: Flags) -> Error {
  if errno == Errno::ETIMEDOUT && flags.contains(Flags::NONBLOCK) {
    Errno::EAGAIN.into()
  } else {
    errno.into()
  }
}

/// Public handle to an open socket.
///
/// Handles are plain ids: cloning one does not keep the socket alive, and
/// every operation on a closed socket fails with [`Error::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socket {
  id: SocketId,
}

impl Socket {
  pub(crate) fn from_id(id: SocketId) -> Self {
    Self { id }
  }

  /// Opens a cooked socket speaking `protocol`.
  pub fn new(protocol: Protocol) -> Result<Socket> {
    Self::open(protocol, false)
  }

  /// Opens a raw socket, which exposes routing headers to the caller.
  pub fn new_raw(protocol: Protocol) -> Result<Socket> {
    Self::open(protocol, true)
  }

  pub fn open(protocol: Protocol, raw: bool) -> Result<Socket> {
    let global = runtime::global()?;
    let core = SocketCore::open(&global, protocol, raw);
    Ok(Socket { id: core.id })
  }

  pub fn id(&self) -> SocketId {
    self.id
  }

  pub(crate) fn core(&self) -> Result<(Arc<Global>, Arc<SocketCore>)> {
    let global = runtime::current().ok_or(Error::Closed)?;
    let core = global.sockets.get(self.id.id()).ok_or(Error::Closed)?;
    Ok((global, core))
  }

  pub fn protocol(&self) -> Result<Protocol> {
    Ok(self.core()?.1.protocol)
  }

  pub fn is_raw(&self) -> Result<bool> {
    Ok(self.core()?.1.raw)
  }

  // --- Endpoints ---

  /// Listens on `url`, returning the started listener.
  pub fn listen(&self, url: &str) -> Result<Listener> {
    let listener = Listener::create(self, url)?;
    if let Err(e) = listener.start(false) {
      let _ = listener.close();
      return Err(e);
    }
    Ok(listener)
  }

  /// Dials `url`, blocking until the first connection attempt completes. A
  /// failed attempt closes the dialer and is reported here.
  pub fn dial(&self, url: &str) -> Result<Dialer> {
    let dialer = Dialer::create(self, url)?;
    if let Err(e) = dialer.start(false) {
      let _ = dialer.close();
      return Err(e);
    }
    Ok(dialer)
  }

  /// Dials `url` in the background, retrying until a connection is made.
  pub fn dial_nonblocking(&self, url: &str) -> Result<Dialer> {
    let dialer = Dialer::create(self, url)?;
    if let Err(e) = dialer.start(true) {
      let _ = dialer.close();
      return Err(e);
    }
    Ok(dialer)
  }

  // --- Data path ---

  /// Sends a copy of `data`, blocking while the send buffer is full.
  pub fn send(&self, data: &[u8]) -> Result<()> {
    self.send_msg(Message::from(data), Flags::empty()).map_err(Error::from)
  }

  pub fn try_send(&self, data: &[u8]) -> Result<()> {
    self.send_msg(Message::from(data), Flags::NONBLOCK).map_err(Error::from)
  }

  /// Receives the body of the next message.
  pub fn recv(&self) -> Result<Vec<u8>> {
    Ok(self.recv_msg(Flags::empty())?.body().to_vec())
  }

  pub fn try_recv(&self) -> Result<Vec<u8>> {
    Ok(self.recv_msg(Flags::NONBLOCK)?.body().to_vec())
  }

  /// Sends a message. On failure the message comes back inside the error.
  pub fn send_msg(&self, msg: Message, flags: Flags) -> std::result::Result<(), SendError> {
    let (global, core) = match self.core() {
      Ok(found) => found,
      Err(e) => return Err(SendError::new(e, msg)),
    };
    let guard = core.send_guard(flags);
    let size = msg.len();
    let outcome = global.block_on(async move { core.send(ContextId::UNBOUND, msg, &guard).await });
    match outcome {
      Ok(Ok(())) => {
        tracing::trace!(socket_id = %self.id, size, "Message sent");
        Ok(())
      }
      Ok(Err((errno, msg))) => Err(SendError::new(op_error(errno, flags), msg)),
      Err(errno) => Err(SendError::new(errno, Message::new())),
    }
  }

  pub fn recv_msg(&self, flags: Flags) -> Result<Message> {
    let (global, core) = self.core()?;
    let guard = core.recv_guard(flags);
    global
      .block_on(async move { core.recv(ContextId::UNBOUND, &guard).await })?
      .map_err(|errno| op_error(errno, flags))
  }

  // --- Options ---

  pub fn get_option(&self, name: &str) -> Result<OptionValue> {
    if options::lookup(name).is_none() {
      return Err(Error::UnknownOption(name.to_string()));
    }
    let (_, core) = self.core()?;
    Ok(core.get_option(name)?)
  }

  pub fn set_option(&self, name: &str, value: impl Into<OptionValue>) -> Result<()> {
    if options::lookup(name).is_none() {
      return Err(Error::UnknownOption(name.to_string()));
    }
    let (_, core) = self.core()?;
    let value = value.into();
    core.set_option(name, &value)?;
    tracing::debug!(socket_id = %self.id, option = name, ?value, "Socket option set");
    Ok(())
  }

  /// Registers a callback for pipe lifecycle events. Replaces any earlier
  /// callback. The callback runs on a worker thread and may call back into
  /// the library.
  pub fn on_pipe_event<F>(&self, callback: F) -> Result<()>
  where
    F: Fn(Pipe, PipeEvent) + Send + Sync + 'static,
  {
    let (global, core) = self.core()?;
    core.set_pipe_callback(&global, Arc::new(callback));
    Ok(())
  }

  /// Number of connections currently attached.
  pub fn pipe_count(&self) -> Result<usize> {
    Ok(self.core()?.1.pipe_count())
  }

  /// Closes the socket, its endpoints, contexts and pipes. Blocked calls on
  /// it return [`Error::Closed`].
  pub fn close(self) -> Result<()> {
    let global = runtime::current().ok_or(Error::Closed)?;
    let core = global.sockets.remove(self.id.id()).ok_or(Error::Closed)?;
    core.shutdown(&global);
    Ok(())
  }
}
