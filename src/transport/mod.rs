// src/transport/mod.rs

//! Transports turn an address into [`Link`]s: a pair of message channels to
//! one peer plus the peer's protocol id. Everything above this layer is
//! transport-agnostic.

#[cfg(feature = "inproc")]
pub(crate) mod inproc;
#[cfg(all(unix, feature = "ipc"))]
pub(crate) mod ipc;
pub(crate) mod stream;
pub(crate) mod tcp;

use crate::error::Errno;
use crate::handle::ListenerId;
use crate::message::Message;
use crate::runtime::Global;
use crate::socket::options::TransportOptions;

use async_channel::{Receiver, Sender};
#[cfg(all(unix, feature = "ipc"))]
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// One established connection, before it is attached to a socket.
#[derive(Debug)]
pub(crate) struct Link {
  pub(crate) tx: Sender<Message>,
  pub(crate) rx: Receiver<Message>,
  /// Wire id of the peer's protocol.
  pub(crate) peer: u16,
  /// Cancelled on local teardown or a failed write. A peer hang-up only
  /// closes `rx`.
  pub(crate) closed: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
  Any,
  V4,
  V6,
}

/// A parsed `scheme://rest` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Address {
  #[cfg(feature = "inproc")]
  Inproc(String),
  Tcp { host: String, port: u16, family: Family },
  #[cfg(all(unix, feature = "ipc"))]
  Ipc(PathBuf),
}

/// Parses an address string. Malformed input is `EADDRINVAL`; a well-formed
/// address for a transport this build does not carry is `ENOTSUP`.
pub(crate) fn parse_address(url: &str) -> Result<Address, Errno> {
  let (scheme, rest) = url.split_once("://").ok_or(Errno::EADDRINVAL)?;
  if rest.contains('\0') {
    return Err(Errno::EADDRINVAL);
  }

  match scheme {
    "tcp" => parse_tcp(rest, Family::Any),
    "tcp4" => parse_tcp(rest, Family::V4),
    "tcp6" => parse_tcp(rest, Family::V6),

    #[cfg(feature = "inproc")]
    "inproc" => {
      if rest.is_empty() {
        Err(Errno::EADDRINVAL)
      } else {
        Ok(Address::Inproc(rest.to_string()))
      }
    }

    #[cfg(all(unix, feature = "ipc"))]
    "ipc" => {
      if rest.is_empty() {
        Err(Errno::EADDRINVAL)
      } else {
        Ok(Address::Ipc(PathBuf::from(rest)))
      }
    }

    _ => {
      tracing::debug!(url = %url, "Unsupported transport scheme");
      Err(Errno::ENOTSUP)
    }
  }
}

fn parse_tcp(rest: &str, family: Family) -> Result<Address, Errno> {
  let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
    let (host, tail) = bracketed.split_once(']').ok_or(Errno::EADDRINVAL)?;
    let port = tail.strip_prefix(':').ok_or(Errno::EADDRINVAL)?;
    (host, port)
  } else {
    rest.rsplit_once(':').ok_or(Errno::EADDRINVAL)?
  };
  let port = port.parse::<u16>().map_err(|_| Errno::EADDRINVAL)?;
  if host.contains('/') {
    return Err(Errno::EADDRINVAL);
  }
  Ok(Address::Tcp {
    host: host.to_string(),
    port,
    family,
  })
}

/// A bound listening transport.
#[derive(Debug)]
pub(crate) enum Acceptor {
  #[cfg(feature = "inproc")]
  Inproc(Receiver<Link>),
  Tcp(tokio::net::TcpListener),
  #[cfg(all(unix, feature = "ipc"))]
  Ipc(tokio::net::UnixListener),
}

/// An accepted connection that may still need its handshake.
#[derive(Debug)]
pub(crate) enum Incoming {
  Ready(Link),
  Tcp(tokio::net::TcpStream),
  #[cfg(all(unix, feature = "ipc"))]
  Ipc(tokio::net::UnixStream),
}

impl Acceptor {
  /// The local TCP port, once bound.
  pub(crate) fn bound_port(&self) -> Option<u16> {
    match self {
      Acceptor::Tcp(listener) => listener.local_addr().ok().map(|a| a.port()),
      #[allow(unreachable_patterns)]
      _ => None,
    }
  }

  pub(crate) async fn accept(&self) -> Result<Incoming, Errno> {
    match self {
      #[cfg(feature = "inproc")]
      Acceptor::Inproc(rx) => rx.recv().await.map(Incoming::Ready).map_err(|_| Errno::ECLOSED),
      Acceptor::Tcp(listener) => {
        let (stream, peer_addr) = listener.accept().await.map_err(|e| Errno::from_io(&e))?;
        tracing::debug!(%peer_addr, "Accepted TCP connection");
        Ok(Incoming::Tcp(stream))
      }
      #[cfg(all(unix, feature = "ipc"))]
      Acceptor::Ipc(listener) => {
        let (stream, _) = listener.accept().await.map_err(|e| Errno::from_io(&e))?;
        Ok(Incoming::Ipc(stream))
      }
    }
  }
}

impl Incoming {
  /// Completes the connection: handshake and framing for stream transports.
  pub(crate) async fn establish(self, protocol: u16, opts: &TransportOptions, buffer: usize) -> Result<Link, Errno> {
    match self {
      Incoming::Ready(link) => Ok(link),
      Incoming::Tcp(stream) => {
        tcp::configure(&stream, opts);
        stream::establish(stream, protocol, opts, buffer).await
      }
      #[cfg(all(unix, feature = "ipc"))]
      Incoming::Ipc(stream) => stream::establish(stream, protocol, opts, buffer).await,
    }
  }
}

/// Opens one outbound connection.
pub(crate) async fn connect(
  global: &Global,
  address: &Address,
  protocol: u16,
  opts: &TransportOptions,
  buffer: usize,
) -> Result<Link, Errno> {
  #[cfg(not(feature = "inproc"))]
  let _ = global;
  match address {
    #[cfg(feature = "inproc")]
    Address::Inproc(name) => global.inproc.connect(name, protocol, buffer),
    Address::Tcp { host, port, family } => {
      let stream = tcp::connect(host, *port, *family).await?;
      tcp::configure(&stream, opts);
      stream::establish(stream, protocol, opts, buffer).await
    }
    #[cfg(all(unix, feature = "ipc"))]
    Address::Ipc(path) => {
      let stream = ipc::connect(path).await?;
      stream::establish(stream, protocol, opts, buffer).await
    }
  }
}

/// Binds a listening transport.
pub(crate) async fn bind(
  global: &Global,
  address: &Address,
  listener: ListenerId,
  protocol: u16,
  buffer: usize,
) -> Result<Acceptor, Errno> {
  #[cfg(not(feature = "inproc"))]
  let _ = (global, listener, protocol, buffer);
  match address {
    #[cfg(feature = "inproc")]
    Address::Inproc(name) => global.inproc.bind(name, listener, protocol, buffer).map(Acceptor::Inproc),
    Address::Tcp { host, port, family } => tcp::bind(host, *port, *family).await.map(Acceptor::Tcp),
    #[cfg(all(unix, feature = "ipc"))]
    Address::Ipc(path) => ipc::bind(path).map(Acceptor::Ipc),
  }
}

/// Releases whatever a bound address holds outside the process.
pub(crate) fn unbind(global: &Global, address: &Address, listener: ListenerId) {
  #[cfg(not(feature = "inproc"))]
  let _ = (global, listener);
  match address {
    #[cfg(feature = "inproc")]
    Address::Inproc(name) => global.inproc.unbind(name, listener),
    Address::Tcp { .. } => {}
    #[cfg(all(unix, feature = "ipc"))]
    Address::Ipc(path) => ipc::remove_socket_file(path),
  }
}
