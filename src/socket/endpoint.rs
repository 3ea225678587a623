// src/socket/endpoint.rs

//! Dialers and listeners: the objects that turn addresses into pipes.

use crate::error::{Errno, Error, Result};
use crate::handle::{DialerId, ListenerId, PipeId};
use crate::runtime::{self, next_handle, Global};
use crate::socket::core::SocketCore;
use crate::socket::options::{self, OptionValue, Scope, TransportOptions};
use crate::socket::pipe::{PipeCore, PipeOrigin};
use crate::socket::Socket;
use crate::transport::{self, Acceptor, Address};

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY: Duration = Duration::from_millis(100);

fn next_delay(current: Duration, opts: &TransportOptions) -> Duration {
  if opts.reconnect_max.is_zero() {
    opts.reconnect_min
  } else {
    (current * 2).min(opts.reconnect_max).max(opts.reconnect_min)
  }
}

/// Engine side of a dialer.
#[derive(Debug)]
pub(crate) struct DialerCore {
  pub(crate) id: DialerId,
  socket: Arc<SocketCore>,
  url: String,
  address: Address,
  options: Mutex<TransportOptions>,
  closed: CancellationToken,
  started: AtomicBool,
}

impl DialerCore {
  /// Stops redialing and drops the current connection.
  pub(crate) fn stop(&self) {
    self.closed.cancel();
  }

  async fn connect_once(&self, global: &Arc<Global>) -> std::result::Result<Arc<PipeCore>, Errno> {
    let opts = self.options.lock().clone();
    let buffer = self.socket.link_buffer();
    let link = tokio::select! {
      biased;
      _ = self.closed.cancelled() => return Err(Errno::ECLOSED),
      link = transport::connect(global, &self.address, self.socket.protocol.id(), &opts, buffer) => link?,
    };
    self.socket.attach_pipe(global, link, PipeOrigin::Dialer(self.id))
  }

  /// Keeps one connection up until the dialer closes.
  async fn run(self: Arc<Self>, global: Arc<Global>, mut pipe: Option<Arc<PipeCore>>) {
    let mut delay = self.options.lock().reconnect_min;
    let mut first = pipe.is_none();
    loop {
      if let Some(active) = pipe.take() {
        let dropped = active.closed_token();
        tokio::select! {
          _ = self.closed.cancelled() => {
            self.socket.remove_pipe(&global, active.id);
            break;
          }
          _ = dropped.cancelled() => {}
        }
        tracing::debug!(dialer_id = %self.id, url = %self.url, "Dialed pipe dropped, reconnecting");
        delay = self.options.lock().reconnect_min;
      }

      if !first {
        tokio::select! {
          _ = self.closed.cancelled() => break,
          _ = sleep(delay) => {}
        }
        delay = next_delay(delay, &self.options.lock());
      }
      first = false;

      match self.connect_once(&global).await {
        Ok(established) => {
          tracing::debug!(dialer_id = %self.id, url = %self.url, pipe_id = %established.id, "Dial succeeded");
          pipe = Some(established);
        }
        Err(_) if self.closed.is_cancelled() => break,
        Err(errno) => {
          tracing::debug!(dialer_id = %self.id, url = %self.url, %errno, retry_in = ?delay, "Dial attempt failed");
        }
      }
    }
    tracing::debug!(dialer_id = %self.id, url = %self.url, "Dialer stopped");
  }
}

/// Engine side of a listener.
#[derive(Debug)]
pub(crate) struct ListenerCore {
  pub(crate) id: ListenerId,
  socket: Arc<SocketCore>,
  url: String,
  address: Address,
  options: Mutex<TransportOptions>,
  closed: CancellationToken,
  started: AtomicBool,
  /// Set once the address is actually held by this listener.
  bound: AtomicBool,
  bound_port: Mutex<Option<u16>>,
  pipes: Mutex<HashSet<PipeId>>,
}

impl ListenerCore {
  /// Stops accepting, releases the address and closes accepted pipes.
  pub(crate) fn stop(&self, global: &Global) {
    self.closed.cancel();
    if self.bound.swap(false, Ordering::AcqRel) {
      transport::unbind(global, &self.address, self.id);
    }
    let pipes: Vec<PipeId> = self.pipes.lock().drain().collect();
    for id in pipes {
      self.socket.remove_pipe(global, id);
    }
  }

  async fn accept_loop(self: Arc<Self>, global: Arc<Global>, acceptor: Acceptor) {
    loop {
      let incoming = tokio::select! {
        biased;
        _ = self.closed.cancelled() => break,
        incoming = acceptor.accept() => incoming,
      };
      match incoming {
        Ok(incoming) => {
          let listener = self.clone();
          let global_for_pipe = global.clone();
          global.spawn(async move {
            let opts = listener.options.lock().clone();
            let buffer = listener.socket.link_buffer();
            let protocol = listener.socket.protocol.id();
            let established = tokio::select! {
              biased;
              _ = listener.closed.cancelled() => return,
              link = incoming.establish(protocol, &opts, buffer) => link,
            };
            let attached = established
              .and_then(|link| listener.socket.attach_pipe(&global_for_pipe, link, PipeOrigin::Listener(listener.id)));
            match attached {
              Ok(pipe) => {
                listener.pipes.lock().insert(pipe.id);
                if listener.closed.is_cancelled() {
                  listener.socket.remove_pipe(&global_for_pipe, pipe.id);
                }
                // Forget the pipe once it goes away so a long-lived listener
                // does not collect ids of dead connections.
                let dropped = pipe.closed_token();
                tokio::select! {
                  _ = listener.closed.cancelled() => {}
                  _ = dropped.cancelled() => {}
                }
                listener.pipes.lock().remove(&pipe.id);
              }
              Err(errno) => {
                tracing::debug!(listener_id = %listener.id, url = %listener.url, %errno, "Inbound connection not attached");
              }
            }
          });
        }
        Err(Errno::ECLOSED) => break,
        Err(errno) => {
          tracing::warn!(listener_id = %self.id, url = %self.url, %errno, "Accept failed");
          tokio::select! {
            _ = self.closed.cancelled() => break,
            _ = sleep(ACCEPT_RETRY) => {}
          }
        }
      }
    }
    tracing::debug!(listener_id = %self.id, url = %self.url, "Accept loop finished");
  }
}

/// Rejects option names outside the option table before touching any object.
fn known(name: &str) -> Result<&'static options::OptionSpec> {
  options::lookup(name).ok_or_else(|| Error::UnknownOption(name.to_string()))
}

fn is_reconnect(name: &str) -> bool {
  name == options::RECONNECT_TIME_MIN || name == options::RECONNECT_TIME_MAX
}

/// An outbound endpoint of a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialer {
  id: DialerId,
}

impl Dialer {
  pub(crate) fn from_id(id: DialerId) -> Self {
    Self { id }
  }

  /// Creates an unstarted dialer for `url`. Options may be set before
  /// [`start`](Dialer::start).
  pub fn create(socket: &Socket, url: &str) -> Result<Dialer> {
    let (global, core) = socket.core()?;
    let address = transport::parse_address(url)?;
    let id = DialerId::new(next_handle());
    let dialer = Arc::new(DialerCore {
      id,
      socket: core.clone(),
      url: url.to_string(),
      address,
      options: Mutex::new(core.options.read().transport.clone()),
      closed: core.closed_token().child_token(),
      started: AtomicBool::new(false),
    });
    global.dialers.insert(id.id(), dialer);
    core.add_dialer(id);
    if core.is_closed() {
      global.dialers.remove(id.id());
      return Err(Error::Closed);
    }
    tracing::debug!(socket_id = %core.id, dialer_id = %id, %url, "Dialer created");
    Ok(Dialer { id })
  }

  pub fn id(&self) -> DialerId {
    self.id
  }

  fn core(&self) -> Result<(Arc<Global>, Arc<DialerCore>)> {
    let global = runtime::current().ok_or(Error::Closed)?;
    let core = global.dialers.get(self.id.id()).ok_or(Error::Closed)?;
    Ok((global, core))
  }

  /// Starts connecting. A blocking start waits for the first attempt and
  /// reports its failure; a non-blocking one retries in the background.
  pub fn start(&self, nonblocking: bool) -> Result<()> {
    let (global, core) = self.core()?;
    if core.started.swap(true, Ordering::AcqRel) {
      return Err(Error::InvalidState);
    }
    tracing::debug!(dialer_id = %self.id, url = %core.url, nonblocking, "Starting dialer");
    if nonblocking {
      global.spawn(core.run(global.clone(), None));
      return Ok(());
    }

    let attempt = {
      let core = core.clone();
      let global = global.clone();
      global.clone().block_on(async move { core.connect_once(&global).await })?
    };
    match attempt {
      Ok(pipe) => {
        global.spawn(core.run(global.clone(), Some(pipe)));
        Ok(())
      }
      Err(errno) => {
        tracing::debug!(dialer_id = %self.id, url = %core.url, %errno, "Initial dial failed");
        Err(errno.into())
      }
    }
  }

  pub fn get_option(&self, name: &str) -> Result<OptionValue> {
    let spec = known(name)?;
    let (_, core) = self.core()?;
    spec.check_get()?;
    match (spec.scope, name) {
      (_, options::URL) => Ok(OptionValue::String(core.url.clone())),
      (Scope::Transport, _) => Ok(core.options.lock().get(name)?),
      _ => Err(Errno::ENOTSUP.into()),
    }
  }

  pub fn set_option(&self, name: &str, value: impl Into<OptionValue>) -> Result<()> {
    let spec = known(name)?;
    let (_, core) = self.core()?;
    let value = value.into();
    spec.check_set(&value)?;
    match spec.scope {
      Scope::Transport => Ok(core.options.lock().set(name, &value)?),
      _ => Err(Errno::ENOTSUP.into()),
    }
  }

  /// Closes the dialer and the connection it made.
  pub fn close(self) -> Result<()> {
    let global = runtime::current().ok_or(Error::Closed)?;
    let core = global.dialers.remove(self.id.id()).ok_or(Error::Closed)?;
    core.socket.forget_dialer(self.id);
    core.stop();
    tracing::debug!(dialer_id = %self.id, url = %core.url, "Dialer closed");
    Ok(())
  }
}

/// An inbound endpoint of a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
  id: ListenerId,
}

impl Listener {
  pub(crate) fn from_id(id: ListenerId) -> Self {
    Self { id }
  }

  /// Creates an unstarted listener for `url`.
  pub fn create(socket: &Socket, url: &str) -> Result<Listener> {
    let (global, core) = socket.core()?;
    let address = transport::parse_address(url)?;
    let id = ListenerId::new(next_handle());
    let listener = Arc::new(ListenerCore {
      id,
      socket: core.clone(),
      url: url.to_string(),
      address,
      options: Mutex::new(core.options.read().transport.clone()),
      closed: core.closed_token().child_token(),
      started: AtomicBool::new(false),
      bound: AtomicBool::new(false),
      bound_port: Mutex::new(None),
      pipes: Mutex::new(HashSet::new()),
    });
    global.listeners.insert(id.id(), listener);
    core.add_listener(id);
    if core.is_closed() {
      global.listeners.remove(id.id());
      return Err(Error::Closed);
    }
    tracing::debug!(socket_id = %core.id, listener_id = %id, %url, "Listener created");
    Ok(Listener { id })
  }

  pub fn id(&self) -> ListenerId {
    self.id
  }

  fn core(&self) -> Result<(Arc<Global>, Arc<ListenerCore>)> {
    let global = runtime::current().ok_or(Error::Closed)?;
    let core = global.listeners.get(self.id.id()).ok_or(Error::Closed)?;
    Ok((global, core))
  }

  /// Binds the address and starts accepting. Binding always completes
  /// before this returns; `nonblocking` is accepted for symmetry with
  /// [`Dialer::start`].
  pub fn start(&self, nonblocking: bool) -> Result<()> {
    let (global, core) = self.core()?;
    if core.started.swap(true, Ordering::AcqRel) {
      return Err(Error::InvalidState);
    }
    let bind = {
      let core = core.clone();
      let global = global.clone();
      global.clone().block_on(async move {
        transport::bind(&global, &core.address, core.id, core.socket.protocol.id(), core.socket.link_buffer()).await
      })?
    };
    let acceptor = match bind {
      Ok(acceptor) => acceptor,
      Err(errno) => {
        tracing::debug!(listener_id = %self.id, url = %core.url, %errno, "Bind failed");
        return Err(errno.into());
      }
    };
    core.bound.store(true, Ordering::Release);
    *core.bound_port.lock() = acceptor.bound_port();
    tracing::debug!(listener_id = %self.id, url = %core.url, port = ?acceptor.bound_port(), nonblocking, "Listening");
    global.spawn(core.accept_loop(global.clone(), acceptor));
    Ok(())
  }

  pub fn get_option(&self, name: &str) -> Result<OptionValue> {
    let spec = known(name)?;
    let (_, core) = self.core()?;
    spec.check_get()?;
    match (spec.scope, name) {
      (_, options::URL) => Ok(OptionValue::String(core.url.clone())),
      (_, options::TCP_BOUND_PORT) => match (&core.address, *core.bound_port.lock()) {
        (Address::Tcp { .. }, Some(port)) => Ok(OptionValue::Int(i32::from(port))),
        (Address::Tcp { .. }, None) => Err(Errno::ESTATE.into()),
        _ => Err(Errno::ENOTSUP.into()),
      },
      (Scope::Transport, name) if !is_reconnect(name) => Ok(core.options.lock().get(name)?),
      _ => Err(Errno::ENOTSUP.into()),
    }
  }

  pub fn set_option(&self, name: &str, value: impl Into<OptionValue>) -> Result<()> {
    let spec = known(name)?;
    let (_, core) = self.core()?;
    let value = value.into();
    spec.check_set(&value)?;
    match spec.scope {
      Scope::Transport if !is_reconnect(name) => Ok(core.options.lock().set(name, &value)?),
      _ => Err(Errno::ENOTSUP.into()),
    }
  }

  /// Stops listening, releases the address and closes accepted connections.
  pub fn close(self) -> Result<()> {
    let global = runtime::current().ok_or(Error::Closed)?;
    let core = global.listeners.remove(self.id.id()).ok_or(Error::Closed)?;
    core.socket.forget_listener(self.id);
    core.stop(&global);
    tracing::debug!(listener_id = %self.id, url = %core.url, "Listener closed");
    Ok(())
  }
}
