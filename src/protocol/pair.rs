// src/protocol/pair.rs

use crate::error::Errno;
use crate::handle::{ContextId, PipeId};
use crate::message::Message;
use crate::protocol::{pump, ProtocolLogic};
use crate::runtime::{MessageQueue, OpGuard};
use crate::socket::options::{SharedOptions, SocketOptions};
use crate::socket::pipe::PipeCore;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// One-to-one messaging. Version 1 prefixes every message with a 32-bit hop
/// count so that loops through devices are cut off at `ttl-max`.
pub(crate) struct Pair {
  v1: bool,
  raw: bool,
  options: SharedOptions,
  peer: Mutex<Option<PipeId>>,
  send_queue: Arc<MessageQueue>,
  recv_queue: MessageQueue,
}

impl Pair {
  pub(crate) fn new(v1: bool, raw: bool, options: SharedOptions) -> Self {
    let (send, recv) = {
      let opts = options.read();
      (
        SocketOptions::capacity(opts.send_buffer),
        SocketOptions::capacity(opts.recv_buffer),
      )
    };
    Self {
      v1,
      raw,
      options,
      peer: Mutex::new(None),
      send_queue: Arc::new(MessageQueue::new(send)),
      recv_queue: MessageQueue::new(recv),
    }
  }

  fn ttl(&self) -> u32 {
    self.options.read().ttl_max as u32
  }
}

#[async_trait]
impl ProtocolLogic for Pair {
  fn add_pipe(&self, pipe: &Arc<PipeCore>) -> Result<(), Errno> {
    let mut peer = self.peer.lock();
    if peer.is_some() {
      tracing::debug!(pipe_id = %pipe.id, "Pair already has a peer, rejecting pipe");
      return Err(Errno::EBUSY);
    }
    *peer = Some(pipe.id);
    tokio::spawn(pump(self.send_queue.clone(), pipe.clone()));
    Ok(())
  }

  fn remove_pipe(&self, pipe: PipeId) {
    let mut peer = self.peer.lock();
    if *peer == Some(pipe) {
      *peer = None;
    }
  }

  async fn pipe_recv(&self, pipe: &Arc<PipeCore>, mut msg: Message) {
    if self.v1 {
      let hops = match msg.trim_body_u32() {
        Ok(h) if h & 0xffff_ff00 == 0 => h + 1,
        _ => {
          tracing::trace!(pipe_id = %pipe.id, "Malformed pair1 hop header, dropping");
          return;
        }
      };
      if hops > self.ttl() {
        tracing::trace!(pipe_id = %pipe.id, hops, "Pair1 hop limit exceeded, dropping");
        return;
      }
      if self.raw {
        msg.append_header_u32(hops);
      }
    }
    let _ = self.recv_queue.put(msg, &pipe.guard()).await;
  }

  async fn send(&self, _lane: ContextId, mut msg: Message, guard: &OpGuard) -> Result<(), (Errno, Message)> {
    if self.v1 {
      if self.raw {
        let hops = match msg.header() {
          [a, b, c, d] => u32::from_be_bytes([*a, *b, *c, *d]),
          _ => u32::MAX,
        };
        if hops >= self.ttl() {
          tracing::trace!("Raw pair1 message without a usable hop header, discarding");
          return Ok(());
        }
      } else {
        msg.clear_header();
        msg.append_header_u32(0);
      }
    }
    match self.send_queue.put(msg, guard).await {
      Ok(()) => Ok(()),
      Err((errno, mut msg)) => {
        if self.v1 && !self.raw {
          msg.clear_header();
        }
        Err((errno, msg))
      }
    }
  }

  async fn recv(&self, _lane: ContextId, guard: &OpGuard) -> Result<Message, Errno> {
    self.recv_queue.get(guard).await
  }

  fn resize(&self, send: usize, recv: usize) {
    self.send_queue.resize(send);
    self.recv_queue.resize(recv);
  }

  fn close(&self) {
    self.send_queue.close();
    self.recv_queue.close();
  }
}
