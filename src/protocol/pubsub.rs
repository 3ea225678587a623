// src/protocol/pubsub.rs

use crate::error::Errno;
use crate::handle::{ContextId, PipeId};
use crate::message::Message;
use crate::protocol::{PipeSet, ProtocolLogic};
use crate::runtime::{MessageQueue, OpGuard};
use crate::socket::options::{OptionValue, SharedOptions, SocketOptions, SUB_SUBSCRIBE, SUB_UNSUBSCRIBE};
use crate::socket::pipe::PipeCore;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// Broadcasts every message to all subscribers. Subscribers that cannot keep
/// up miss messages; the publisher never blocks.
pub(crate) struct Pub {
  pipes: PipeSet,
}

impl Pub {
  pub(crate) fn new() -> Self {
    Self {
      pipes: PipeSet::default(),
    }
  }
}

#[async_trait]
impl ProtocolLogic for Pub {
  fn add_pipe(&self, pipe: &Arc<PipeCore>) -> Result<(), Errno> {
    self.pipes.insert(pipe);
    Ok(())
  }

  fn remove_pipe(&self, pipe: PipeId) {
    self.pipes.remove(pipe);
  }

  async fn pipe_recv(&self, pipe: &Arc<PipeCore>, _msg: Message) {
    tracing::trace!(pipe_id = %pipe.id, "Pub socket received a message, dropping");
  }

  async fn send(&self, _lane: ContextId, msg: Message, _guard: &OpGuard) -> Result<(), (Errno, Message)> {
    let delivered = self.pipes.broadcast(&msg, None);
    tracing::trace!(delivered, "Published message");
    Ok(())
  }

  async fn recv(&self, _lane: ContextId, _guard: &OpGuard) -> Result<Message, Errno> {
    Err(Errno::ENOTSUP)
  }

  fn close(&self) {}
}

/// Receives the published messages whose body starts with one of the
/// subscribed prefixes. Raw subscribers receive everything.
pub(crate) struct Sub {
  raw: bool,
  subscriptions: RwLock<Vec<Vec<u8>>>,
  recv_queue: MessageQueue,
}

impl Sub {
  pub(crate) fn new(raw: bool, options: SharedOptions) -> Self {
    let capacity = SocketOptions::capacity(options.read().recv_buffer);
    Self {
      raw,
      subscriptions: RwLock::new(Vec::new()),
      recv_queue: MessageQueue::new(capacity),
    }
  }

  fn matches(&self, body: &[u8]) -> bool {
    self.subscriptions.read().iter().any(|prefix| body.starts_with(prefix))
  }
}

#[async_trait]
impl ProtocolLogic for Sub {
  fn add_pipe(&self, _pipe: &Arc<PipeCore>) -> Result<(), Errno> {
    Ok(())
  }

  fn remove_pipe(&self, _pipe: PipeId) {}

  async fn pipe_recv(&self, _pipe: &Arc<PipeCore>, msg: Message) {
    if !self.raw && !self.matches(msg.body()) {
      return;
    }
    // Slow subscribers lose their oldest messages rather than stall the pipe.
    let _ = self.recv_queue.put_evicting(msg);
  }

  async fn send(&self, _lane: ContextId, msg: Message, _guard: &OpGuard) -> Result<(), (Errno, Message)> {
    Err((Errno::ENOTSUP, msg))
  }

  async fn recv(&self, _lane: ContextId, guard: &OpGuard) -> Result<Message, Errno> {
    self.recv_queue.get(guard).await
  }

  fn set_option(&self, name: &str, value: &OptionValue) -> Result<(), Errno> {
    if self.raw {
      return Err(Errno::ENOTSUP);
    }
    let topic = value.as_bytes().ok_or(Errno::EBADTYPE)?;
    let mut subs = self.subscriptions.write();
    match name {
      SUB_SUBSCRIBE => {
        if !subs.iter().any(|s| s == topic) {
          subs.push(topic.to_vec());
        }
        Ok(())
      }
      SUB_UNSUBSCRIBE => {
        let before = subs.len();
        subs.retain(|s| s != topic);
        if subs.len() == before {
          Err(Errno::ENOENT)
        } else {
          self.recv_queue.clear();
          Ok(())
        }
      }
      _ => Err(Errno::ENOTSUP),
    }
  }

  fn resize(&self, _send: usize, recv: usize) {
    self.recv_queue.resize(recv);
  }

  fn close(&self) {
    self.recv_queue.close();
  }
}
