// src/socket/pipe.rs

use crate::error::{Errno, Error, Result};
use crate::handle::{DialerId, ListenerId, PipeId, SocketId};
use crate::message::Message;
use crate::runtime::{self, OpGuard};
use crate::socket::endpoint::{Dialer, Listener};
use crate::socket::Socket;
use crate::transport::Link;

use async_channel::{Receiver, Sender, TrySendError};
use tokio_util::sync::CancellationToken;

/// Connection lifecycle notifications delivered to
/// [`Socket::on_pipe_event`](crate::Socket::on_pipe_event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeEvent {
  /// The connection is established but not yet usable by the protocol.
  AddPre,
  /// The connection has been attached and may carry messages.
  AddPost,
  /// The connection has been removed from the socket.
  RemovePost,
}

/// Which endpoint produced a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeOrigin {
  Dialer(DialerId),
  Listener(ListenerId),
}

/// Engine side of one established connection.
#[derive(Debug)]
pub(crate) struct PipeCore {
  pub(crate) id: PipeId,
  pub(crate) socket: SocketId,
  pub(crate) origin: PipeOrigin,
  /// Wire id of the peer's protocol.
  pub(crate) peer: u16,
  tx: Sender<Message>,
  rx: Receiver<Message>,
  closed: CancellationToken,
}

impl PipeCore {
  pub(crate) fn new(id: PipeId, socket: SocketId, origin: PipeOrigin, link: Link) -> Self {
    Self {
      id,
      socket,
      origin,
      peer: link.peer,
      tx: link.tx,
      rx: link.rx,
      closed: link.closed,
    }
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.closed.is_cancelled()
  }

  /// A token cancelled once this pipe is closed.
  pub(crate) fn closed_token(&self) -> CancellationToken {
    self.closed.clone()
  }

  pub(crate) fn guard(&self) -> OpGuard {
    OpGuard::new(self.closed.clone())
  }

  /// Hands a message to the peer, waiting for room. Returns the message if
  /// the pipe is closed.
  pub(crate) async fn send(&self, msg: Message) -> std::result::Result<(), Message> {
    self.tx.send(msg).await.map_err(|e| e.into_inner())
  }

  pub(crate) fn try_send(&self, msg: Message) -> std::result::Result<(), TrySendError<Message>> {
    self.tx.try_send(msg)
  }

  /// Next inbound message, or `None` once the pipe is done. A peer that
  /// hangs up only closes the inbound channel, so anything it sent first is
  /// still handed out; a local close stops delivery at once.
  pub(crate) async fn recv(&self) -> Option<Message> {
    if self.closed.is_cancelled() {
      return None;
    }
    tokio::select! {
      biased;
      received = self.rx.recv() => received.ok(),
      _ = self.closed.cancelled() => None,
    }
  }

  /// Sends on a full pipe, giving up if `guard` fires first. On interruption
  /// the original message is handed back.
  pub(crate) async fn send_guarded(&self, msg: Message, guard: &OpGuard) -> std::result::Result<(), (Errno, Message)> {
    let msg = match self.try_send(msg) {
      Ok(()) => return Ok(()),
      Err(TrySendError::Closed(_)) => return Ok(()),
      Err(TrySendError::Full(msg)) => msg,
    };
    let copy = msg.clone();
    tokio::select! {
      biased;
      errno = guard.interrupted() => Err((errno, msg)),
      _ = self.tx.send(copy) => Ok(()),
    }
  }

  pub(crate) fn close(&self) {
    self.closed.cancel();
    self.tx.close();
    self.rx.close();
  }
}

/// A live connection underlying a socket.
///
/// Pipes are created by the engine when a dial or accept succeeds; callers
/// only observe them, through [`Message::associated_pipe`] or pipe event
/// callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pipe {
  id: PipeId,
}

impl Pipe {
  pub(crate) fn from_id(id: PipeId) -> Self {
    Self { id }
  }

  pub fn id(&self) -> PipeId {
    self.id
  }

  fn core(&self) -> Result<std::sync::Arc<PipeCore>> {
    let global = runtime::current().ok_or(Error::Closed)?;
    global.pipes.get(self.id.id()).ok_or(Error::Closed)
  }

  /// The socket this pipe belongs to.
  pub fn socket(&self) -> Result<Socket> {
    Ok(Socket::from_id(self.core()?.socket))
  }

  /// The dialer that created this pipe, if it was dialed.
  pub fn dialer(&self) -> Result<Option<Dialer>> {
    Ok(match self.core()?.origin {
      PipeOrigin::Dialer(id) => Some(Dialer::from_id(id)),
      PipeOrigin::Listener(_) => None,
    })
  }

  /// The listener that accepted this pipe, if it was accepted.
  pub fn listener(&self) -> Result<Option<Listener>> {
    Ok(match self.core()?.origin {
      PipeOrigin::Listener(id) => Some(Listener::from_id(id)),
      PipeOrigin::Dialer(_) => None,
    })
  }

  /// Closes this one connection. A dialer that owned it will reconnect.
  pub fn close(&self) -> Result<()> {
    let global = runtime::current().ok_or(Error::Closed)?;
    let pipe = global.pipes.get(self.id.id()).ok_or(Error::Closed)?;
    let socket = global.sockets.get(pipe.socket.id()).ok_or(Error::Closed)?;
    socket.remove_pipe(&global, self.id);
    Ok(())
  }
}
