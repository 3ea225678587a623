// src/protocol/survey.rs

use crate::error::Errno;
use crate::handle::{ContextId, PipeId};
use crate::message::Message;
use crate::protocol::{PipeSet, ProtocolLogic, RequestIds};
use crate::runtime::{MessageQueue, OpGuard};
use crate::socket::options::{duration_of, OptionValue, SharedOptions, SocketOptions, SURVEYOR_SURVEY_TIME};
use crate::socket::pipe::PipeCore;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

const DEFAULT_SURVEY_TIME: Duration = Duration::from_secs(1);

/// Surveyor side of the survey pattern: one question out to every
/// respondent, any number of answers back until the survey expires.
pub(crate) struct Surveyor {
  raw: bool,
  pipes: PipeSet,
  recv_queue: MessageQueue,
  response_cap: AtomicUsize,
  state: Mutex<SurveyState>,
}

struct SurveyState {
  ids: RequestIds,
  survey_time: Option<Duration>,
  lanes: HashMap<ContextId, SurveyLane>,
}

#[derive(Default)]
struct SurveyLane {
  /// Id of the running survey and when it stops accepting answers.
  survey: Option<(u32, Option<Instant>)>,
  responses: VecDeque<Message>,
  wake: Arc<Notify>,
}

impl SurveyState {
  fn lane(&mut self, lane: ContextId) -> Result<&mut SurveyLane, Errno> {
    if lane == ContextId::UNBOUND {
      return Ok(self.lanes.entry(lane).or_default());
    }
    self.lanes.get_mut(&lane).ok_or(Errno::ECLOSED)
  }
}

impl Surveyor {
  pub(crate) fn new(raw: bool, options: SharedOptions) -> Self {
    let capacity = SocketOptions::capacity(options.read().recv_buffer);
    Self {
      raw,
      pipes: PipeSet::default(),
      recv_queue: MessageQueue::new(capacity),
      response_cap: AtomicUsize::new(capacity),
      state: Mutex::new(SurveyState {
        ids: RequestIds::new(),
        survey_time: Some(DEFAULT_SURVEY_TIME),
        lanes: HashMap::new(),
      }),
    }
  }
}

#[async_trait]
impl ProtocolLogic for Surveyor {
  fn add_pipe(&self, pipe: &Arc<PipeCore>) -> Result<(), Errno> {
    self.pipes.insert(pipe);
    Ok(())
  }

  fn remove_pipe(&self, pipe: PipeId) {
    self.pipes.remove(pipe);
  }

  async fn pipe_recv(&self, pipe: &Arc<PipeCore>, mut msg: Message) {
    if self.raw {
      if msg.shift_body_to_header(4).is_ok() {
        let _ = self.recv_queue.put(msg, &pipe.guard()).await;
      }
      return;
    }

    let Ok(id) = msg.trim_body_u32() else {
      tracing::trace!(pipe_id = %pipe.id, "Response without survey id, dropping");
      return;
    };
    let cap = self.response_cap.load(Ordering::Relaxed);
    let mut state = self.state.lock();
    let target = state
      .lanes
      .values_mut()
      .find(|lane| matches!(lane.survey, Some((current, _)) if current == id));
    match target {
      Some(lane) if lane.responses.len() < cap => {
        lane.responses.push_back(msg);
        lane.wake.notify_one();
      }
      Some(_) => tracing::debug!(pipe_id = %pipe.id, "Survey response buffer full, dropping"),
      None => tracing::trace!(pipe_id = %pipe.id, survey_id = id, "Stale survey response, dropping"),
    }
  }

  async fn send(&self, lane: ContextId, mut msg: Message, _guard: &OpGuard) -> Result<(), (Errno, Message)> {
    if !self.raw {
      let id = {
        let mut state = self.state.lock();
        let id = state.ids.next_id();
        let deadline = state.survey_time.map(|t| Instant::now() + t);
        match state.lane(lane) {
          Ok(entry) => {
            entry.survey = Some((id, deadline));
            entry.responses.clear();
          }
          Err(errno) => return Err((errno, msg)),
        }
        id
      };
      msg.clear_header();
      msg.append_header_u32(id);
    }
    let delivered = self.pipes.broadcast(&msg, None);
    tracing::trace!(delivered, "Survey sent");
    Ok(())
  }

  async fn recv(&self, lane: ContextId, guard: &OpGuard) -> Result<Message, Errno> {
    if self.raw {
      return self.recv_queue.get(guard).await;
    }

    loop {
      if guard.is_closed() {
        return Err(Errno::ECLOSED);
      }
      let (wake, deadline) = {
        let mut state = self.state.lock();
        let entry = state.lane(lane)?;
        if let Some(msg) = entry.responses.pop_front() {
          return Ok(msg);
        }
        match entry.survey {
          None => return Err(Errno::ESTATE),
          Some((_, Some(deadline))) if Instant::now() >= deadline => {
            entry.survey = None;
            return Err(Errno::ETIMEDOUT);
          }
          Some((_, deadline)) => (entry.wake.clone(), deadline),
        }
      };

      let expiry = async {
        match deadline {
          Some(at) => tokio::time::sleep_until(at).await,
          None => std::future::pending().await,
        }
      };
      tokio::select! {
        biased;
        _ = wake.notified() => {}
        errno = guard.interrupted() => return Err(errno),
        _ = expiry => {}
      }
    }
  }

  fn open_lane(&self, lane: ContextId) -> Result<(), Errno> {
    if self.raw {
      return Err(Errno::ENOTSUP);
    }
    self.state.lock().lanes.insert(lane, SurveyLane::default());
    Ok(())
  }

  fn close_lane(&self, lane: ContextId) {
    if let Some(entry) = self.state.lock().lanes.remove(&lane) {
      entry.wake.notify_one();
    }
  }

  fn set_option(&self, name: &str, value: &OptionValue) -> Result<(), Errno> {
    match name {
      SURVEYOR_SURVEY_TIME => {
        self.state.lock().survey_time = duration_of(value)?;
        Ok(())
      }
      _ => Err(Errno::ENOTSUP),
    }
  }

  fn get_option(&self, name: &str) -> Result<OptionValue, Errno> {
    match name {
      SURVEYOR_SURVEY_TIME => Ok(OptionValue::Duration(self.state.lock().survey_time)),
      _ => Err(Errno::ENOTSUP),
    }
  }

  fn resize(&self, _send: usize, recv: usize) {
    self.response_cap.store(recv, Ordering::Relaxed);
    self.recv_queue.resize(recv);
  }

  fn close(&self) {
    self.recv_queue.close();
    let mut state = self.state.lock();
    for entry in state.lanes.values_mut() {
      entry.survey = None;
      entry.responses.clear();
      entry.wake.notify_one();
    }
  }
}
