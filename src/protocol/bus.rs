// src/protocol/bus.rs

use crate::error::Errno;
use crate::handle::{ContextId, PipeId};
use crate::message::Message;
use crate::protocol::{PipeSet, ProtocolLogic};
use crate::runtime::{MessageQueue, OpGuard};
use crate::socket::options::{SharedOptions, SocketOptions};
use crate::socket::pipe::PipeCore;

use async_trait::async_trait;
use std::sync::Arc;

/// Every message goes to every directly connected peer.
///
/// In raw mode received messages carry the id of the pipe they came in on as
/// a header word, and a send with such a header skips that pipe, which is
/// what lets a device reflect traffic without echoing it back.
pub(crate) struct Bus {
  raw: bool,
  pipes: PipeSet,
  recv_queue: MessageQueue,
}

impl Bus {
  pub(crate) fn new(raw: bool, options: SharedOptions) -> Self {
    let capacity = SocketOptions::capacity(options.read().recv_buffer);
    Self {
      raw,
      pipes: PipeSet::default(),
      recv_queue: MessageQueue::new(capacity),
    }
  }
}

#[async_trait]
impl ProtocolLogic for Bus {
  fn add_pipe(&self, pipe: &Arc<PipeCore>) -> Result<(), Errno> {
    self.pipes.insert(pipe);
    Ok(())
  }

  fn remove_pipe(&self, pipe: PipeId) {
    self.pipes.remove(pipe);
  }

  async fn pipe_recv(&self, pipe: &Arc<PipeCore>, mut msg: Message) {
    if self.raw {
      msg.insert_header_u32(pipe.id.id());
    }
    if self.recv_queue.try_put(msg).is_err() {
      tracing::debug!(pipe_id = %pipe.id, "Bus receive buffer full, dropping");
    }
  }

  async fn send(&self, _lane: ContextId, mut msg: Message, _guard: &OpGuard) -> Result<(), (Errno, Message)> {
    let origin = if self.raw {
      msg.trim_header_u32().ok().map(PipeId::new)
    } else {
      msg.clear_header();
      None
    };
    let delivered = self.pipes.broadcast(&msg, origin);
    tracing::trace!(delivered, "Bus message sent");
    Ok(())
  }

  async fn recv(&self, _lane: ContextId, guard: &OpGuard) -> Result<Message, Errno> {
    self.recv_queue.get(guard).await
  }

  fn resize(&self, _send: usize, recv: usize) {
    self.recv_queue.resize(recv);
  }

  fn close(&self) {
    self.recv_queue.close();
  }
}
