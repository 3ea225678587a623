// src/protocol/pipeline.rs

use crate::error::Errno;
use crate::handle::{ContextId, PipeId};
use crate::message::Message;
use crate::protocol::{pump, ProtocolLogic};
use crate::runtime::{MessageQueue, OpGuard};
use crate::socket::options::{SharedOptions, SocketOptions};
use crate::socket::pipe::PipeCore;

use async_trait::async_trait;
use std::sync::Arc;

/// Distributes messages across connected pullers. Every pipe runs a pump on
/// the shared queue, so whichever pipe has room takes the next message.
pub(crate) struct Push {
  send_queue: Arc<MessageQueue>,
}

impl Push {
  pub(crate) fn new(options: SharedOptions) -> Self {
    let capacity = SocketOptions::capacity(options.read().send_buffer);
    Self {
      send_queue: Arc::new(MessageQueue::new(capacity)),
    }
  }
}

#[async_trait]
impl ProtocolLogic for Push {
  fn add_pipe(&self, pipe: &Arc<PipeCore>) -> Result<(), Errno> {
    tokio::spawn(pump(self.send_queue.clone(), pipe.clone()));
    Ok(())
  }

  fn remove_pipe(&self, _pipe: PipeId) {}

  async fn pipe_recv(&self, pipe: &Arc<PipeCore>, _msg: Message) {
    tracing::trace!(pipe_id = %pipe.id, "Push socket received a message, dropping");
  }

  async fn send(&self, _lane: ContextId, msg: Message, guard: &OpGuard) -> Result<(), (Errno, Message)> {
    self.send_queue.put(msg, guard).await
  }

  async fn recv(&self, _lane: ContextId, _guard: &OpGuard) -> Result<Message, Errno> {
    Err(Errno::ENOTSUP)
  }

  fn resize(&self, send: usize, _recv: usize) {
    self.send_queue.resize(send);
  }

  fn close(&self) {
    self.send_queue.close();
  }
}

/// Collects messages from every connected pusher, fairly queued.
pub(crate) struct Pull {
  recv_queue: MessageQueue,
}

impl Pull {
  pub(crate) fn new(options: SharedOptions) -> Self {
    let capacity = SocketOptions::capacity(options.read().recv_buffer);
    Self {
      recv_queue: MessageQueue::new(capacity),
    }
  }
}

#[async_trait]
impl ProtocolLogic for Pull {
  fn add_pipe(&self, _pipe: &Arc<PipeCore>) -> Result<(), Errno> {
    Ok(())
  }

  fn remove_pipe(&self, _pipe: PipeId) {}

  async fn pipe_recv(&self, pipe: &Arc<PipeCore>, msg: Message) {
    let _ = self.recv_queue.put(msg, &pipe.guard()).await;
  }

  async fn send(&self, _lane: ContextId, msg: Message, _guard: &OpGuard) -> Result<(), (Errno, Message)> {
    Err((Errno::ENOTSUP, msg))
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
