// src/socket/core.rs

use crate::error::Errno;
use crate::handle::{ContextId, DialerId, ListenerId, PipeId, SocketId};
use crate::message::{Flags, Message};
use crate::protocol::{make_logic, Protocol, ProtocolLogic};
use crate::runtime::{next_handle, Global, OpGuard};
use crate::socket::options::{
  self, int_in_range, OptionValue, Scope, SharedOptions, SocketOptions, MAX_BUFFER, MAX_TTL,
};
use crate::socket::pipe::{Pipe, PipeCore, PipeEvent, PipeOrigin};
use crate::transport::Link;

use async_channel::Sender;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

pub(crate) type PipeCallback = Arc<dyn Fn(Pipe, PipeEvent) + Send + Sync>;

/// Engine state of one open socket.
///
/// Owns the protocol logic and the set of attached pipes, and keeps the ids
/// of every dialer, listener and context created on it so that closing the
/// socket can take them all down.
pub(crate) struct SocketCore {
  pub(crate) id: SocketId,
  pub(crate) protocol: Protocol,
  pub(crate) raw: bool,
  pub(crate) options: SharedOptions,
  closed: CancellationToken,
  logic: Box<dyn ProtocolLogic>,
  pipes: Mutex<HashMap<PipeId, Arc<PipeCore>>>,
  dialers: Mutex<HashSet<DialerId>>,
  listeners: Mutex<HashSet<ListenerId>>,
  contexts: Mutex<HashSet<ContextId>>,
  /// Feeds the thread that runs the pipe event callback, once one is set.
  events: RwLock<Option<Sender<(PipeId, PipeEvent)>>>,
  global: Weak<Global>,
}

impl std::fmt::Debug for SocketCore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SocketCore")
      .field("id", &self.id)
      .field("protocol", &self.protocol)
      .field("raw", &self.raw)
      .field("closed", &self.closed.is_cancelled())
      .finish()
  }
}

impl SocketCore {
  /// Creates a socket and registers it.
  pub(crate) fn open(global: &Arc<Global>, protocol: Protocol, raw: bool) -> Arc<SocketCore> {
    let id = SocketId::new(next_handle());
    let options: SharedOptions = Arc::new(RwLock::new(SocketOptions::new(id.id())));
    let logic = make_logic(protocol, raw, options.clone());
    let core = Arc::new(SocketCore {
      id,
      protocol,
      raw,
      options,
      closed: CancellationToken::new(),
      logic,
      pipes: Mutex::new(HashMap::new()),
      dialers: Mutex::new(HashSet::new()),
      listeners: Mutex::new(HashSet::new()),
      contexts: Mutex::new(HashSet::new()),
      events: RwLock::new(None),
      global: Arc::downgrade(global),
    });
    global.sockets.insert(id.id(), core.clone());
    tracing::debug!(socket_id = %id, %protocol, raw, "Socket opened");
    core
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.closed.is_cancelled()
  }

  /// Token cancelled when the socket closes. Contexts and endpoints derive
  /// child tokens from it.
  pub(crate) fn closed_token(&self) -> &CancellationToken {
    &self.closed
  }

  pub(crate) fn logic(&self) -> &dyn ProtocolLogic {
    self.logic.as_ref()
  }

  /// Link channel capacity for new pipes.
  pub(crate) fn link_buffer(&self) -> usize {
    SocketOptions::capacity(self.options.read().send_buffer)
  }

  pub(crate) fn send_guard(&self, flags: Flags) -> OpGuard {
    let guard = OpGuard::new(self.closed.clone());
    if flags.contains(Flags::NONBLOCK) {
      guard.nonblocking()
    } else {
      guard.with_timeout(self.options.read().send_timeout)
    }
  }

  pub(crate) fn recv_guard(&self, flags: Flags) -> OpGuard {
    let guard = OpGuard::new(self.closed.clone());
    if flags.contains(Flags::NONBLOCK) {
      guard.nonblocking()
    } else {
      guard.with_timeout(self.options.read().recv_timeout)
    }
  }

  pub(crate) async fn send(&self, lane: ContextId, msg: Message, guard: &OpGuard) -> Result<(), (Errno, Message)> {
    if self.is_closed() {
      return Err((Errno::ECLOSED, msg));
    }
    self.logic.send(lane, msg, guard).await
  }

  pub(crate) async fn recv(&self, lane: ContextId, guard: &OpGuard) -> Result<Message, Errno> {
    if self.is_closed() {
      return Err(Errno::ECLOSED);
    }
    self.logic.recv(lane, guard).await
  }

  // --- Pipes ---

  /// Attaches an established link as a new pipe and starts reading from it.
  pub(crate) fn attach_pipe(
    self: &Arc<Self>,
    global: &Arc<Global>,
    link: Link,
    origin: PipeOrigin,
  ) -> Result<Arc<PipeCore>, Errno> {
    if self.is_closed() {
      link.closed.cancel();
      return Err(Errno::ECLOSED);
    }
    if link.peer != self.protocol.peer().id() {
      tracing::warn!(
        socket_id = %self.id,
        peer = link.peer,
        expected = self.protocol.peer().id(),
        "Rejecting pipe from incompatible protocol"
      );
      link.closed.cancel();
      return Err(Errno::EPROTO);
    }

    let id = PipeId::new(next_handle());
    let pipe = Arc::new(PipeCore::new(id, self.id, origin, link));
    global.pipes.insert(id.id(), pipe.clone());
    self.fire(id, PipeEvent::AddPre);

    if let Err(errno) = self.logic.add_pipe(&pipe) {
      tracing::debug!(socket_id = %self.id, pipe_id = %id, %errno, "Protocol rejected pipe");
      pipe.close();
      global.pipes.remove(id.id());
      // AddPre was already reported, so observers still get the matching removal.
      self.fire(id, PipeEvent::RemovePost);
      return Err(errno);
    }
    self.pipes.lock().insert(id, pipe.clone());

    let socket = self.clone();
    let reader = pipe.clone();
    global.spawn(async move {
      while let Some(mut msg) = reader.recv().await {
        msg.flatten();
        msg.set_pipe_id(reader.id);
        tracing::trace!(pipe_id = %reader.id, size = msg.len(), "Pipe received message");
        socket.logic.pipe_recv(&reader, msg).await;
      }
      match socket.global.upgrade() {
        Some(global) => socket.remove_pipe(&global, reader.id),
        None => reader.close(),
      }
    });

    // Closing may have raced with the attach; make sure the pipe does not
    // outlive the socket.
    if self.is_closed() {
      self.remove_pipe(global, id);
      return Err(Errno::ECLOSED);
    }
    tracing::debug!(socket_id = %self.id, pipe_id = %id, ?origin, "Pipe attached");
    self.fire(id, PipeEvent::AddPost);
    Ok(pipe)
  }

  /// Detaches and closes a pipe. Safe to call more than once.
  pub(crate) fn remove_pipe(&self, global: &Global, id: PipeId) {
    let removed = self.pipes.lock().remove(&id);
    let Some(pipe) = removed else { return };
    pipe.close();
    self.logic.remove_pipe(id);
    global.pipes.remove(id.id());
    tracing::debug!(socket_id = %self.id, pipe_id = %id, "Pipe removed");
    self.fire(id, PipeEvent::RemovePost);
  }

  pub(crate) fn pipe_count(&self) -> usize {
    self.pipes.lock().len()
  }

  /// Installs the pipe event callback, replacing any earlier one. Events are
  /// delivered in order on a dedicated blocking thread.
  pub(crate) fn set_pipe_callback(&self, global: &Global, callback: PipeCallback) {
    let (tx, rx) = async_channel::unbounded::<(PipeId, PipeEvent)>();
    global.spawn_callback(move || {
      while let Ok((id, event)) = rx.recv_blocking() {
        callback(Pipe::from_id(id), event);
      }
    });
    *self.events.write() = Some(tx);
  }

  fn fire(&self, id: PipeId, event: PipeEvent) {
    if let Some(tx) = self.events.read().as_ref() {
      let _ = tx.try_send((id, event));
    }
  }

  // --- Children ---

  pub(crate) fn add_dialer(&self, id: DialerId) {
    self.dialers.lock().insert(id);
  }

  pub(crate) fn forget_dialer(&self, id: DialerId) {
    self.dialers.lock().remove(&id);
  }

  pub(crate) fn add_listener(&self, id: ListenerId) {
    self.listeners.lock().insert(id);
  }

  pub(crate) fn forget_listener(&self, id: ListenerId) {
    self.listeners.lock().remove(&id);
  }

  pub(crate) fn add_context(&self, id: ContextId) {
    self.contexts.lock().insert(id);
  }

  pub(crate) fn forget_context(&self, id: ContextId) {
    self.contexts.lock().remove(&id);
  }

  /// Closes the socket and everything hanging off it. The caller has already
  /// removed it from the socket table.
  pub(crate) fn shutdown(&self, global: &Global) {
    if self.closed.is_cancelled() {
      return;
    }
    tracing::debug!(socket_id = %self.id, "Closing socket");
    self.closed.cancel();
    self.logic.close();

    let dialers: Vec<DialerId> = self.dialers.lock().drain().collect();
    for id in dialers {
      if let Some(dialer) = global.dialers.remove(id.id()) {
        dialer.stop();
      }
    }
    let listeners: Vec<ListenerId> = self.listeners.lock().drain().collect();
    for id in listeners {
      if let Some(listener) = global.listeners.remove(id.id()) {
        listener.stop(global);
      }
    }
    let contexts: Vec<ContextId> = self.contexts.lock().drain().collect();
    for id in contexts {
      global.contexts.remove(id.id());
    }
    let pipes: Vec<PipeId> = self.pipes.lock().keys().copied().collect();
    for id in pipes {
      self.remove_pipe(global, id);
    }
    // Dropping the sender lets the callback thread drain and exit.
    self.events.write().take();
  }

  // --- Options ---

  /// Reads an option. Names missing from the option table are rejected
  /// before this point by the public handles.
  pub(crate) fn get_option(&self, name: &str) -> Result<OptionValue, Errno> {
    let Some(spec) = options::lookup(name) else {
      return Err(Errno::ENOTSUP);
    };
    spec.check_get()?;
    match spec.scope {
      Scope::Socket => self.get_socket_option(name),
      Scope::Transport => self.options.read().transport.get(name),
      Scope::Endpoint => Err(Errno::ENOTSUP),
      Scope::Protocol => self.logic.get_option(name),
    }
  }

  pub(crate) fn set_option(&self, name: &str, value: &OptionValue) -> Result<(), Errno> {
    let Some(spec) = options::lookup(name) else {
      return Err(Errno::ENOTSUP);
    };
    spec.check_set(value)?;
    match spec.scope {
      Scope::Socket => self.set_socket_option(name, value),
      Scope::Transport => self.options.write().transport.set(name, value),
      Scope::Endpoint => Err(Errno::ENOTSUP),
      Scope::Protocol => self.logic.set_option(name, value),
    }
  }

  fn get_socket_option(&self, name: &str) -> Result<OptionValue, Errno> {
    let opts = self.options.read();
    Ok(match name {
      options::SOCKET_NAME => OptionValue::String(opts.name.clone()),
      options::RAW => OptionValue::Bool(self.raw),
      options::PROTOCOL => OptionValue::Int(i32::from(self.protocol.id())),
      options::PROTOCOL_NAME => OptionValue::String(self.protocol.name().to_string()),
      options::PEER => OptionValue::Int(i32::from(self.protocol.peer().id())),
      options::PEER_NAME => OptionValue::String(self.protocol.peer().name().to_string()),
      options::RECV_BUFFER => OptionValue::Int(opts.recv_buffer),
      options::SEND_BUFFER => OptionValue::Int(opts.send_buffer),
      options::RECV_TIMEOUT => OptionValue::Duration(opts.recv_timeout),
      options::SEND_TIMEOUT => OptionValue::Duration(opts.send_timeout),
      options::TTL_MAX => OptionValue::Int(opts.ttl_max),
      _ => return Err(Errno::ENOTSUP),
    })
  }

  fn set_socket_option(&self, name: &str, value: &OptionValue) -> Result<(), Errno> {
    match name {
      options::SOCKET_NAME => {
        let name = value.as_str().ok_or(Errno::EBADTYPE)?;
        // Names are limited to 63 bytes.
        if name.len() > 63 {
          return Err(Errno::EINVAL);
        }
        self.options.write().name = name.to_string();
      }
      options::RECV_BUFFER | options::SEND_BUFFER => {
        let size = int_in_range(value, 0, MAX_BUFFER)?;
        let (send, recv) = {
          let mut opts = self.options.write();
          if name == options::RECV_BUFFER {
            opts.recv_buffer = size;
          } else {
            opts.send_buffer = size;
          }
          (
            SocketOptions::capacity(opts.send_buffer),
            SocketOptions::capacity(opts.recv_buffer),
          )
        };
        self.logic.resize(send, recv);
      }
      options::RECV_TIMEOUT => self.options.write().recv_timeout = options::duration_of(value)?,
      options::SEND_TIMEOUT => self.options.write().send_timeout = options::duration_of(value)?,
      options::TTL_MAX => self.options.write().ttl_max = int_in_range(value, 1, MAX_TTL)?,
      _ => return Err(Errno::ENOTSUP),
    }
    Ok(())
  }
}
