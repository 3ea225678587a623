// src/transport/inproc.rs

#![cfg(feature = "inproc")]

use crate::error::Errno;
use crate::handle::ListenerId;
use crate::message::Message;
use crate::transport::Link;

use async_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// A name bound by a listener in this process.
#[derive(Debug)]
struct InprocBinding {
  listener: ListenerId,
  protocol: u16,
  /// Capacity of the binder-to-connector direction.
  buffer: usize,
  /// Connector-side code hands the binder its end of each new link here.
  accept_tx: Sender<Link>,
}

/// Process-local name registry for `inproc://` addresses.
#[derive(Debug, Default)]
pub(crate) struct InprocRegistry {
  bindings: Mutex<HashMap<String, InprocBinding>>,
}

impl InprocRegistry {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Registers `name`. The returned receiver yields one link per connector.
  pub(crate) fn bind(&self, name: &str, listener: ListenerId, protocol: u16, buffer: usize) -> Result<Receiver<Link>, Errno> {
    let mut bindings = self.bindings.lock();
    if bindings.contains_key(name) {
      tracing::debug!(name = %name, "Inproc name already bound");
      return Err(Errno::EADDRINUSE);
    }
    let (accept_tx, accept_rx) = unbounded();
    bindings.insert(
      name.to_string(),
      InprocBinding {
        listener,
        protocol,
        buffer: buffer.max(1),
        accept_tx,
      },
    );
    tracing::debug!(name = %name, listener_id = %listener, "Inproc name bound");
    Ok(accept_rx)
  }

  /// Removes `name` if `listener` still owns it.
  pub(crate) fn unbind(&self, name: &str, listener: ListenerId) {
    let mut bindings = self.bindings.lock();
    if bindings.get(name).map(|b| b.listener) == Some(listener) {
      if let Some(binding) = bindings.remove(name) {
        binding.accept_tx.close();
      }
      tracing::debug!(name = %name, listener_id = %listener, "Inproc name unbound");
    }
  }

  /// Creates a crossed pair of channels to the binder of `name` and returns
  /// the connector's end.
  pub(crate) fn connect(&self, name: &str, protocol: u16, buffer: usize) -> Result<Link, Errno> {
    let bindings = self.bindings.lock();
    let binding = bindings.get(name).ok_or_else(|| {
      tracing::debug!(name = %name, "Inproc connect to unbound name");
      Errno::ECONNREFUSED
    })?;

    let (to_binder_tx, to_binder_rx) = bounded::<Message>(buffer.max(1));
    let (to_connector_tx, to_connector_rx) = bounded::<Message>(binding.buffer);

    let binder_end = Link {
      tx: to_connector_tx,
      rx: to_binder_rx,
      peer: protocol,
      closed: CancellationToken::new(),
    };
    binding.accept_tx.try_send(binder_end).map_err(|_| Errno::ECONNREFUSED)?;

    Ok(Link {
      tx: to_binder_tx,
      rx: to_connector_rx,
      peer: binding.protocol,
      closed: CancellationToken::new(),
    })
  }
}
