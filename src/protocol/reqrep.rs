// src/protocol/reqrep.rs

use crate::error::Errno;
use crate::handle::{ContextId, PipeId};
use crate::message::Message;
use crate::protocol::{collect_backtrace, pump, PipeSet, ProtocolLogic, RequestIds};
use crate::runtime::{MessageQueue, OpGuard};
use crate::socket::options::{duration_of, OptionValue, SharedOptions, SocketOptions, REQ_RESEND_TIME};
use crate::socket::pipe::PipeCore;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

const DEFAULT_RESEND: Duration = Duration::from_secs(60);

/// Requester side of request/reply.
///
/// Each lane (the socket itself or one of its contexts) has at most one
/// request outstanding. Replies are matched to lanes by request id; anything
/// unmatched is a late reply to an abandoned request and is dropped.
pub(crate) struct Req {
  raw: bool,
  send_queue: Arc<MessageQueue>,
  recv_queue: MessageQueue,
  state: Mutex<ReqState>,
}

struct ReqState {
  ids: RequestIds,
  resend: Option<Duration>,
  lanes: HashMap<ContextId, ReqLane>,
}

struct ReqLane {
  pending: Option<u32>,
  request: Option<Message>,
  sent_at: Instant,
  reply: Option<Message>,
  wake: Arc<Notify>,
}

impl ReqLane {
  fn new() -> Self {
    Self {
      pending: None,
      request: None,
      sent_at: Instant::now(),
      reply: None,
      wake: Arc::new(Notify::new()),
    }
  }

  fn abandon(&mut self) {
    self.pending = None;
    self.request = None;
    self.reply = None;
  }
}

impl ReqState {
  fn lane(&mut self, lane: ContextId) -> Result<&mut ReqLane, Errno> {
    if lane == ContextId::UNBOUND {
      return Ok(self.lanes.entry(lane).or_insert_with(ReqLane::new));
    }
    self.lanes.get_mut(&lane).ok_or(Errno::ECLOSED)
  }
}

impl Req {
  pub(crate) fn new(raw: bool, options: SharedOptions) -> Self {
    let (send, recv) = {
      let opts = options.read();
      (
        SocketOptions::capacity(opts.send_buffer),
        SocketOptions::capacity(opts.recv_buffer),
      )
    };
    Self {
      raw,
      send_queue: Arc::new(MessageQueue::new(send)),
      recv_queue: MessageQueue::new(recv),
      state: Mutex::new(ReqState {
        ids: RequestIds::new(),
        resend: Some(DEFAULT_RESEND),
        lanes: HashMap::new(),
      }),
    }
  }

  /// Puts the lane's request back on the wire if it is still unanswered.
  fn resend(&self, lane: ContextId) {
    let copy = {
      let mut state = self.state.lock();
      let Ok(entry) = state.lane(lane) else { return };
      if entry.pending.is_none() {
        return;
      }
      entry.sent_at = Instant::now();
      entry.request.clone()
    };
    if let Some(msg) = copy {
      // Still waiting for a pipe; a second copy would be delivered twice.
      if self.send_queue.contains(|queued| queued.header() == msg.header()) {
        tracing::trace!(lane = %lane, "Request still queued, skipping resend");
        return;
      }
      tracing::trace!(lane = %lane, "Resending unanswered request");
      let _ = self.send_queue.try_put(msg);
    }
  }
}

#[async_trait]
impl ProtocolLogic for Req {
  fn add_pipe(&self, pipe: &Arc<PipeCore>) -> Result<(), Errno> {
    tokio::spawn(pump(self.send_queue.clone(), pipe.clone()));
    Ok(())
  }

  fn remove_pipe(&self, _pipe: PipeId) {}

  async fn pipe_recv(&self, pipe: &Arc<PipeCore>, mut msg: Message) {
    if self.raw {
      if msg.shift_body_to_header(4).is_err() {
        tracing::trace!(pipe_id = %pipe.id, "Reply without request id, dropping");
        return;
      }
      let _ = self.recv_queue.put(msg, &pipe.guard()).await;
      return;
    }

    let id = match msg.trim_body_u32() {
      Ok(id) => id,
      Err(_) => {
        tracing::trace!(pipe_id = %pipe.id, "Reply without request id, dropping");
        return;
      }
    };
    let mut state = self.state.lock();
    let matched = state.lanes.values_mut().find(|lane| lane.pending == Some(id));
    match matched {
      Some(lane) => {
        lane.pending = None;
        lane.request = None;
        lane.reply = Some(msg);
        lane.wake.notify_one();
      }
      None => {
        tracing::trace!(pipe_id = %pipe.id, request_id = id, "Unmatched reply, dropping");
      }
    }
  }

  async fn send(&self, lane: ContextId, mut msg: Message, guard: &OpGuard) -> Result<(), (Errno, Message)> {
    if self.raw {
      return self.send_queue.put(msg, guard).await;
    }

    let id = {
      let mut state = self.state.lock();
      let id = state.ids.next_id();
      match state.lane(lane) {
        Ok(entry) => {
          // A new request abandons whatever the lane was waiting for.
          entry.abandon();
          entry.pending = Some(id);
        }
        Err(errno) => return Err((errno, msg)),
      }
      id
    };
    msg.clear_header();
    msg.append_header_u32(id);
    let copy = msg.clone();

    match self.send_queue.put(msg, guard).await {
      Ok(()) => {
        let mut state = self.state.lock();
        if let Ok(entry) = state.lane(lane) {
          if entry.pending == Some(id) {
            entry.request = Some(copy);
            entry.sent_at = Instant::now();
          }
        }
        Ok(())
      }
      Err((errno, mut msg)) => {
        let mut state = self.state.lock();
        if let Ok(entry) = state.lane(lane) {
          if entry.pending == Some(id) {
            entry.pending = None;
          }
        }
        msg.clear_header();
        Err((errno, msg))
      }
    }
  }

  async fn recv(&self, lane: ContextId, guard: &OpGuard) -> Result<Message, Errno> {
    if self.raw {
      return self.recv_queue.get(guard).await;
    }

    loop {
      if guard.is_closed() {
        return Err(Errno::ECLOSED);
      }
      let (wake, resend_at) = {
        let mut state = self.state.lock();
        let resend = state.resend;
        let entry = state.lane(lane)?;
        if let Some(reply) = entry.reply.take() {
          return Ok(reply);
        }
        if entry.pending.is_none() {
          return Err(Errno::ESTATE);
        }
        (entry.wake.clone(), resend.map(|r| entry.sent_at + r))
      };

      let resend_due = async {
        match resend_at {
          Some(at) => tokio::time::sleep_until(at).await,
          None => std::future::pending().await,
        }
      };
      tokio::select! {
        biased;
        _ = wake.notified() => {}
        errno = guard.interrupted() => {
          let mut state = self.state.lock();
          if let Ok(entry) = state.lane(lane) {
            if let Some(reply) = entry.reply.take() {
              return Ok(reply);
            }
            entry.abandon();
          }
          return Err(errno);
        }
        _ = resend_due => self.resend(lane),
      }
    }
  }

  fn open_lane(&self, lane: ContextId) -> Result<(), Errno> {
    if self.raw {
      return Err(Errno::ENOTSUP);
    }
    self.state.lock().lanes.insert(lane, ReqLane::new());
    Ok(())
  }

  fn close_lane(&self, lane: ContextId) {
    if let Some(entry) = self.state.lock().lanes.remove(&lane) {
      entry.wake.notify_one();
    }
  }

  fn set_option(&self, name: &str, value: &OptionValue) -> Result<(), Errno> {
    match name {
      REQ_RESEND_TIME => {
        self.state.lock().resend = duration_of(value)?;
        Ok(())
      }
      _ => Err(Errno::ENOTSUP),
    }
  }

  fn get_option(&self, name: &str) -> Result<OptionValue, Errno> {
    match name {
      REQ_RESEND_TIME => Ok(OptionValue::Duration(self.state.lock().resend)),
      _ => Err(Errno::ENOTSUP),
    }
  }

  fn resize(&self, send: usize, recv: usize) {
    self.send_queue.resize(send);
    self.recv_queue.resize(recv);
  }

  fn close(&self) {
    self.send_queue.close();
    self.recv_queue.close();
    let mut state = self.state.lock();
    for entry in state.lanes.values_mut() {
      entry.abandon();
      entry.wake.notify_one();
    }
  }
}

/// Routing information of the request a lane is currently answering.
#[derive(Debug)]
struct Backtrace {
  pipe: PipeId,
  header: Vec<u8>,
}

/// Replying side shared by rep0 and respondent0.
///
/// Requests are fair-queued from every pipe. Receiving one records where it
/// came from; the next send on the same lane goes back along that route.
pub(crate) struct Replier {
  raw: bool,
  options: SharedOptions,
  pipes: PipeSet,
  recv_queue: MessageQueue,
  lanes: Mutex<HashMap<ContextId, Option<Backtrace>>>,
}

impl Replier {
  pub(crate) fn new(raw: bool, options: SharedOptions) -> Self {
    let capacity = SocketOptions::capacity(options.read().recv_buffer);
    Self {
      raw,
      options,
      pipes: PipeSet::default(),
      recv_queue: MessageQueue::new(capacity),
      lanes: Mutex::new(HashMap::new()),
    }
  }

  fn ttl(&self) -> usize {
    self.options.read().ttl_max.max(1) as usize
  }

  fn store_backtrace(&self, lane: ContextId, backtrace: Backtrace) -> Result<(), Errno> {
    let mut lanes = self.lanes.lock();
    if lane == ContextId::UNBOUND {
      lanes.insert(lane, Some(backtrace));
      return Ok(());
    }
    match lanes.get_mut(&lane) {
      Some(slot) => {
        *slot = Some(backtrace);
        Ok(())
      }
      None => Err(Errno::ECLOSED),
    }
  }

  fn take_backtrace(&self, lane: ContextId) -> Result<Backtrace, Errno> {
    let mut lanes = self.lanes.lock();
    match lanes.get_mut(&lane) {
      Some(slot) => slot.take().ok_or(Errno::ESTATE),
      None if lane == ContextId::UNBOUND => Err(Errno::ESTATE),
      None => Err(Errno::ECLOSED),
    }
  }

  async fn route(&self, pipe: PipeId, msg: Message, guard: &OpGuard) -> Result<(), (Errno, Message)> {
    match self.pipes.get(pipe) {
      Some(target) => target.send_guarded(msg, guard).await,
      None => {
        tracing::trace!(pipe_id = %pipe, "Reply for a vanished pipe, discarding");
        Ok(())
      }
    }
  }
}

#[async_trait]
impl ProtocolLogic for Replier {
  fn add_pipe(&self, pipe: &Arc<PipeCore>) -> Result<(), Errno> {
    self.pipes.insert(pipe);
    Ok(())
  }

  fn remove_pipe(&self, pipe: PipeId) {
    self.pipes.remove(pipe);
  }

  async fn pipe_recv(&self, pipe: &Arc<PipeCore>, mut msg: Message) {
    if !collect_backtrace(&mut msg, self.ttl()) {
      tracing::debug!(pipe_id = %pipe.id, "Request with bad or overlong backtrace, dropping");
      return;
    }
    if self.raw {
      msg.insert_header_u32(pipe.id.id());
    }
    msg.set_pipe_id(pipe.id);
    let _ = self.recv_queue.put(msg, &pipe.guard()).await;
  }

  async fn send(&self, lane: ContextId, mut msg: Message, guard: &OpGuard) -> Result<(), (Errno, Message)> {
    if self.raw {
      let pipe = match msg.trim_header_u32() {
        Ok(id) => PipeId::new(id),
        Err(_) => {
          tracing::trace!("Raw reply without a routing header, discarding");
          return Ok(());
        }
      };
      return self.route(pipe, msg, guard).await;
    }

    let backtrace = match self.take_backtrace(lane) {
      Ok(bt) => bt,
      Err(errno) => return Err((errno, msg)),
    };
    msg.clear_header();
    msg.append_header(&backtrace.header);
    match self.route(backtrace.pipe, msg, guard).await {
      Ok(()) => Ok(()),
      Err((errno, mut msg)) => {
        msg.clear_header();
        let _ = self.store_backtrace(lane, backtrace);
        Err((errno, msg))
      }
    }
  }

  async fn recv(&self, lane: ContextId, guard: &OpGuard) -> Result<Message, Errno> {
    let mut msg = self.recv_queue.get(guard).await?;
    if !self.raw {
      let backtrace = Backtrace {
        pipe: msg.pipe_id(),
        header: msg.header().to_vec(),
      };
      if let Err(errno) = self.store_backtrace(lane, backtrace) {
        self.recv_queue.put_front(msg);
        return Err(errno);
      }
      msg.clear_header();
    }
    Ok(msg)
  }

  fn open_lane(&self, lane: ContextId) -> Result<(), Errno> {
    if self.raw {
      return Err(Errno::ENOTSUP);
    }
    self.lanes.lock().insert(lane, None);
    Ok(())
  }

  fn close_lane(&self, lane: ContextId) {
    self.lanes.lock().remove(&lane);
  }

  fn resize(&self, _send: usize, recv: usize) {
    self.recv_queue.resize(recv);
  }

  fn close(&self) {
    self.recv_queue.close();
    self.lanes.lock().clear();
  }
}
