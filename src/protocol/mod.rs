// src/protocol/mod.rs

//! Scalability protocols: the closed set of patterns a socket can speak and
//! the per-socket logic that implements each one.

mod bus;
mod pair;
mod pipeline;
mod pubsub;
mod reqrep;
mod survey;

use crate::error::{Errno, Error};
use crate::handle::{ContextId, PipeId};
use crate::message::Message;
use crate::runtime::{MessageQueue, OpGuard};
use crate::socket::options::{OptionValue, SharedOptions};
use crate::socket::pipe::PipeCore;

use async_channel::TrySendError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A messaging pattern, identified by name when a socket is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
  Pair0,
  Pair1,
  Push0,
  Pull0,
  Pub0,
  Sub0,
  Req0,
  Rep0,
  Surveyor0,
  Respondent0,
  Bus0,
}

impl Protocol {
  pub const ALL: [Protocol; 11] = [
    Protocol::Pair0,
    Protocol::Pair1,
    Protocol::Push0,
    Protocol::Pull0,
    Protocol::Pub0,
    Protocol::Sub0,
    Protocol::Req0,
    Protocol::Rep0,
    Protocol::Surveyor0,
    Protocol::Respondent0,
    Protocol::Bus0,
  ];

  /// The name reported by the `protocol-name` option.
  pub fn name(self) -> &'static str {
    match self {
      Protocol::Pair0 => "pair0",
      Protocol::Pair1 => "pair1",
      Protocol::Push0 => "push",
      Protocol::Pull0 => "pull",
      Protocol::Pub0 => "pub",
      Protocol::Sub0 => "sub",
      Protocol::Req0 => "req",
      Protocol::Rep0 => "rep",
      Protocol::Surveyor0 => "surveyor",
      Protocol::Respondent0 => "respondent",
      Protocol::Bus0 => "bus",
    }
  }

  /// The 16-bit id exchanged during stream handshakes.
  pub fn id(self) -> u16 {
    match self {
      Protocol::Pair0 => 0x10,
      Protocol::Pair1 => 0x11,
      Protocol::Pub0 => 0x20,
      Protocol::Sub0 => 0x21,
      Protocol::Req0 => 0x30,
      Protocol::Rep0 => 0x31,
      Protocol::Push0 => 0x50,
      Protocol::Pull0 => 0x51,
      Protocol::Surveyor0 => 0x62,
      Protocol::Respondent0 => 0x63,
      Protocol::Bus0 => 0x70,
    }
  }

  /// The protocol a socket of this kind connects to.
  pub fn peer(self) -> Protocol {
    match self {
      Protocol::Pair0 => Protocol::Pair0,
      Protocol::Pair1 => Protocol::Pair1,
      Protocol::Push0 => Protocol::Pull0,
      Protocol::Pull0 => Protocol::Push0,
      Protocol::Pub0 => Protocol::Sub0,
      Protocol::Sub0 => Protocol::Pub0,
      Protocol::Req0 => Protocol::Rep0,
      Protocol::Rep0 => Protocol::Req0,
      Protocol::Surveyor0 => Protocol::Respondent0,
      Protocol::Respondent0 => Protocol::Surveyor0,
      Protocol::Bus0 => Protocol::Bus0,
    }
  }

  /// Whether cooked sockets of this protocol can open contexts.
  pub fn supports_contexts(self) -> bool {
    matches!(
      self,
      Protocol::Req0 | Protocol::Rep0 | Protocol::Surveyor0 | Protocol::Respondent0
    )
  }
}

impl FromStr for Protocol {
  type Err = Error;

  /// Accepts versioned names and the unversioned aliases, which resolve to
  /// the latest version.
  fn from_str(name: &str) -> Result<Self, Self::Err> {
    Ok(match name {
      "pair0" => Protocol::Pair0,
      "pair1" | "pair" => Protocol::Pair1,
      "push0" | "push" => Protocol::Push0,
      "pull0" | "pull" => Protocol::Pull0,
      "pub0" | "pub" => Protocol::Pub0,
      "sub0" | "sub" => Protocol::Sub0,
      "req0" | "req" => Protocol::Req0,
      "rep0" | "rep" => Protocol::Rep0,
      "surveyor0" | "surveyor" => Protocol::Surveyor0,
      "respondent0" | "respondent" => Protocol::Respondent0,
      "bus0" | "bus" => Protocol::Bus0,
      _ => return Err(Error::UnknownProtocol(name.to_string())),
    })
  }
}

impl fmt::Display for Protocol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// The pattern-specific half of a socket.
///
/// `lane` selects the context an operation belongs to; the socket itself
/// uses [`ContextId::UNBOUND`]. Implementations must not hold a lock across
/// an `.await`.
#[async_trait]
pub(crate) trait ProtocolLogic: Send + Sync + 'static {
  /// Called when a connection attaches. Returning an error rejects it.
  fn add_pipe(&self, pipe: &Arc<PipeCore>) -> Result<(), Errno>;

  fn remove_pipe(&self, pipe: PipeId);

  /// Handles one inbound message from `pipe`. May wait for buffer space.
  async fn pipe_recv(&self, pipe: &Arc<PipeCore>, msg: Message);

  async fn send(&self, lane: ContextId, msg: Message, guard: &OpGuard) -> Result<(), (Errno, Message)>;

  async fn recv(&self, lane: ContextId, guard: &OpGuard) -> Result<Message, Errno>;

  fn open_lane(&self, _lane: ContextId) -> Result<(), Errno> {
    Err(Errno::ENOTSUP)
  }

  fn close_lane(&self, _lane: ContextId) {}

  fn set_option(&self, _name: &str, _value: &OptionValue) -> Result<(), Errno> {
    Err(Errno::ENOTSUP)
  }

  fn get_option(&self, _name: &str) -> Result<OptionValue, Errno> {
    Err(Errno::ENOTSUP)
  }

  /// Applies new send/receive buffer capacities.
  fn resize(&self, _send: usize, _recv: usize) {}

  /// Wakes every waiter with `ECLOSED` and drops queued traffic.
  fn close(&self);
}

/// Builds the logic for a protocol in cooked or raw mode.
pub(crate) fn make_logic(protocol: Protocol, raw: bool, options: SharedOptions) -> Box<dyn ProtocolLogic> {
  match protocol {
    Protocol::Pair0 => Box::new(pair::Pair::new(false, raw, options)),
    Protocol::Pair1 => Box::new(pair::Pair::new(true, raw, options)),
    Protocol::Push0 => Box::new(pipeline::Push::new(options)),
    Protocol::Pull0 => Box::new(pipeline::Pull::new(options)),
    Protocol::Pub0 => Box::new(pubsub::Pub::new()),
    Protocol::Sub0 => Box::new(pubsub::Sub::new(raw, options)),
    Protocol::Req0 => Box::new(reqrep::Req::new(raw, options)),
    Protocol::Rep0 => Box::new(reqrep::Replier::new(raw, options)),
    Protocol::Surveyor0 => Box::new(survey::Surveyor::new(raw, options)),
    Protocol::Respondent0 => Box::new(reqrep::Replier::new(raw, options)),
    Protocol::Bus0 => Box::new(bus::Bus::new(raw, options)),
  }
}

/// Pipes currently attached to a socket, for protocols that address more
/// than one peer.
#[derive(Debug, Default)]
pub(crate) struct PipeSet {
  pipes: Mutex<HashMap<PipeId, Arc<PipeCore>>>,
}

impl PipeSet {
  pub(crate) fn insert(&self, pipe: &Arc<PipeCore>) {
    self.pipes.lock().insert(pipe.id, pipe.clone());
  }

  pub(crate) fn remove(&self, id: PipeId) {
    self.pipes.lock().remove(&id);
  }

  pub(crate) fn get(&self, id: PipeId) -> Option<Arc<PipeCore>> {
    self.pipes.lock().get(&id).cloned()
  }

  /// Offers a copy of `msg` to every pipe except `except`. Pipes without
  /// room miss the message. Returns how many pipes took it.
  pub(crate) fn broadcast(&self, msg: &Message, except: Option<PipeId>) -> usize {
    let targets: Vec<Arc<PipeCore>> = self.pipes.lock().values().cloned().collect();
    let mut delivered = 0;
    for pipe in targets {
      if Some(pipe.id) == except {
        continue;
      }
      match pipe.try_send(msg.clone()) {
        Ok(()) => delivered += 1,
        Err(TrySendError::Full(_)) => {
          tracing::trace!(pipe_id = %pipe.id, "Pipe full, broadcast message dropped");
        }
        Err(TrySendError::Closed(_)) => {}
      }
    }
    delivered
  }
}

/// Feeds a pipe from a shared send queue until either side closes. Several
/// pumps on one queue share the load between their pipes.
pub(crate) async fn pump(queue: Arc<MessageQueue>, pipe: Arc<PipeCore>) {
  let guard = pipe.guard();
  loop {
    let msg = match queue.get(&guard).await {
      Ok(msg) => msg,
      Err(_) => break,
    };
    if let Err(msg) = pipe.send(msg).await {
      queue.put_front(msg);
      break;
    }
  }
  tracing::trace!(pipe_id = %pipe.id, "Send pump stopped");
}

/// Moves routing entries from the front of the body to the header, up to and
/// including the first one with the high bit set. Fails on a truncated
/// backtrace or one longer than `ttl` hops.
pub(crate) fn collect_backtrace(msg: &mut Message, ttl: usize) -> bool {
  let mut hops = 0;
  loop {
    hops += 1;
    if hops > ttl {
      return false;
    }
    match msg.trim_body_u32() {
      Ok(entry) => {
        msg.append_header_u32(entry);
        if entry & 0x8000_0000 != 0 {
          return true;
        }
      }
      Err(_) => return false,
    }
  }
}

/// Hands out 32-bit exchange ids with the high bit set, starting from a
/// random point.
#[derive(Debug)]
pub(crate) struct RequestIds {
  next: u32,
}

impl RequestIds {
  pub(crate) fn new() -> Self {
    Self { next: rand::random() }
  }

  pub(crate) fn next_id(&mut self) -> u32 {
    let id = self.next | 0x8000_0000;
    self.next = self.next.wrapping_add(1);
    id
  }
}
