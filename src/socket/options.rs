// src/socket/options.rs

//! The option namespace shared by sockets, contexts, dialers and listeners.
//!
//! Names are plain strings. Each known name has exactly one value type; a get
//! or set that uses a different [`OptionValue`] variant is rejected rather
//! than coerced.

use crate::error::Errno;

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

// --- Socket-wide options ---
pub const SOCKET_NAME: &str = "socket-name";
pub const RAW: &str = "raw";
pub const PROTOCOL: &str = "protocol";
pub const PROTOCOL_NAME: &str = "protocol-name";
pub const PEER: &str = "peer";
pub const PEER_NAME: &str = "peer-name";
pub const RECV_BUFFER: &str = "recv-buffer";
pub const SEND_BUFFER: &str = "send-buffer";
pub const RECV_TIMEOUT: &str = "recv-timeout";
pub const SEND_TIMEOUT: &str = "send-timeout";
pub const TTL_MAX: &str = "ttl-max";

// --- Transport options (socket values are defaults for new endpoints) ---
pub const RECV_SIZE_MAX: &str = "recv-size-max";
pub const RECONNECT_TIME_MIN: &str = "reconnect-time-min";
pub const RECONNECT_TIME_MAX: &str = "reconnect-time-max";
pub const TCP_NODELAY: &str = "tcp-nodelay";
pub const TCP_KEEPALIVE: &str = "tcp-keepalive";

// --- Endpoint-only ---
pub const URL: &str = "url";
pub const TCP_BOUND_PORT: &str = "tcp-bound-port";

// --- Protocol-specific ---
pub const SUB_SUBSCRIBE: &str = "sub:subscribe";
pub const SUB_UNSUBSCRIBE: &str = "sub:unsubscribe";
pub const REQ_RESEND_TIME: &str = "req:resend-time";
pub const SURVEYOR_SURVEY_TIME: &str = "surveyor:survey-time";

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
  Bool(bool),
  Int(i32),
  Size(usize),
  U64(u64),
  String(String),
  /// `None` means "wait indefinitely".
  Duration(Option<Duration>),
  Bytes(Vec<u8>),
  Pointer(usize),
}

/// The tag of an [`OptionValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionType {
  Bool,
  Int,
  Size,
  U64,
  String,
  Duration,
  Bytes,
  Pointer,
}

impl OptionValue {
  pub fn option_type(&self) -> OptionType {
    match self {
      OptionValue::Bool(_) => OptionType::Bool,
      OptionValue::Int(_) => OptionType::Int,
      OptionValue::Size(_) => OptionType::Size,
      OptionValue::U64(_) => OptionType::U64,
      OptionValue::String(_) => OptionType::String,
      OptionValue::Duration(_) => OptionType::Duration,
      OptionValue::Bytes(_) => OptionType::Bytes,
      OptionValue::Pointer(_) => OptionType::Pointer,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      OptionValue::Bool(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_int(&self) -> Option<i32> {
    match self {
      OptionValue::Int(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_size(&self) -> Option<usize> {
    match self {
      OptionValue::Size(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_u64(&self) -> Option<u64> {
    match self {
      OptionValue::U64(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      OptionValue::String(v) => Some(v),
      _ => None,
    }
  }

  /// `Some(None)` is an infinite duration.
  pub fn as_duration(&self) -> Option<Option<Duration>> {
    match self {
      OptionValue::Duration(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_bytes(&self) -> Option<&[u8]> {
    match self {
      OptionValue::Bytes(v) => Some(v),
      _ => None,
    }
  }
}

impl From<bool> for OptionValue {
  fn from(v: bool) -> Self {
    OptionValue::Bool(v)
  }
}

impl From<i32> for OptionValue {
  fn from(v: i32) -> Self {
    OptionValue::Int(v)
  }
}

impl From<usize> for OptionValue {
  fn from(v: usize) -> Self {
    OptionValue::Size(v)
  }
}

impl From<u64> for OptionValue {
  fn from(v: u64) -> Self {
    OptionValue::U64(v)
  }
}

impl From<&str> for OptionValue {
  fn from(v: &str) -> Self {
    OptionValue::String(v.to_string())
  }
}

impl From<String> for OptionValue {
  fn from(v: String) -> Self {
    OptionValue::String(v)
  }
}

impl From<Duration> for OptionValue {
  fn from(v: Duration) -> Self {
    OptionValue::Duration(Some(v))
  }
}

impl From<Option<Duration>> for OptionValue {
  fn from(v: Option<Duration>) -> Self {
    OptionValue::Duration(v)
  }
}

impl From<&[u8]> for OptionValue {
  fn from(v: &[u8]) -> Self {
    OptionValue::Bytes(v.to_vec())
  }
}

impl From<Vec<u8>> for OptionValue {
  fn from(v: Vec<u8>) -> Self {
    OptionValue::Bytes(v)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
  ReadWrite,
  ReadOnly,
  WriteOnly,
}

/// Which object family owns an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
  Socket,
  /// Stored on the socket as the default for endpoints created later.
  Transport,
  Endpoint,
  Protocol,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OptionSpec {
  pub name: &'static str,
  pub kind: OptionType,
  pub access: Access,
  pub scope: Scope,
}

const fn spec(name: &'static str, kind: OptionType, access: Access, scope: Scope) -> OptionSpec {
  OptionSpec {
    name,
    kind,
    access,
    scope,
  }
}

static OPTION_TABLE: &[OptionSpec] = &[
  spec(SOCKET_NAME, OptionType::String, Access::ReadWrite, Scope::Socket),
  spec(RAW, OptionType::Bool, Access::ReadOnly, Scope::Socket),
  spec(PROTOCOL, OptionType::Int, Access::ReadOnly, Scope::Socket),
  spec(PROTOCOL_NAME, OptionType::String, Access::ReadOnly, Scope::Socket),
  spec(PEER, OptionType::Int, Access::ReadOnly, Scope::Socket),
  spec(PEER_NAME, OptionType::String, Access::ReadOnly, Scope::Socket),
  spec(RECV_BUFFER, OptionType::Int, Access::ReadWrite, Scope::Socket),
  spec(SEND_BUFFER, OptionType::Int, Access::ReadWrite, Scope::Socket),
  spec(RECV_TIMEOUT, OptionType::Duration, Access::ReadWrite, Scope::Socket),
  spec(SEND_TIMEOUT, OptionType::Duration, Access::ReadWrite, Scope::Socket),
  spec(TTL_MAX, OptionType::Int, Access::ReadWrite, Scope::Socket),
  spec(RECV_SIZE_MAX, OptionType::Size, Access::ReadWrite, Scope::Transport),
  spec(RECONNECT_TIME_MIN, OptionType::Duration, Access::ReadWrite, Scope::Transport),
  spec(RECONNECT_TIME_MAX, OptionType::Duration, Access::ReadWrite, Scope::Transport),
  spec(TCP_NODELAY, OptionType::Bool, Access::ReadWrite, Scope::Transport),
  spec(TCP_KEEPALIVE, OptionType::Bool, Access::ReadWrite, Scope::Transport),
  spec(URL, OptionType::String, Access::ReadOnly, Scope::Endpoint),
  spec(TCP_BOUND_PORT, OptionType::Int, Access::ReadOnly, Scope::Endpoint),
  spec(SUB_SUBSCRIBE, OptionType::Bytes, Access::WriteOnly, Scope::Protocol),
  spec(SUB_UNSUBSCRIBE, OptionType::Bytes, Access::WriteOnly, Scope::Protocol),
  spec(REQ_RESEND_TIME, OptionType::Duration, Access::ReadWrite, Scope::Protocol),
  spec(SURVEYOR_SURVEY_TIME, OptionType::Duration, Access::ReadWrite, Scope::Protocol),
];

/// Looks up a name in the option table.
pub(crate) fn lookup(name: &str) -> Option<&'static OptionSpec> {
  OPTION_TABLE.iter().find(|spec| spec.name == name)
}

impl OptionSpec {
  /// Validates a set request against access and type.
  pub(crate) fn check_set(&self, value: &OptionValue) -> Result<(), Errno> {
    if self.access == Access::ReadOnly {
      return Err(Errno::EREADONLY);
    }
    if value.option_type() == self.kind {
      Ok(())
    } else {
      Err(Errno::EBADTYPE)
    }
  }

  pub(crate) fn check_get(&self) -> Result<(), Errno> {
    if self.access == Access::WriteOnly {
      Err(Errno::EWRITEONLY)
    } else {
      Ok(())
    }
  }
}

pub(crate) const MAX_BUFFER: i32 = 8192;
pub(crate) const MAX_TTL: i32 = 255;

pub(crate) type SharedOptions = Arc<RwLock<SocketOptions>>;

/// Per-socket option values.
#[derive(Debug, Clone)]
pub(crate) struct SocketOptions {
  pub name: String,
  pub recv_buffer: i32,
  pub send_buffer: i32,
  pub recv_timeout: Option<Duration>,
  pub send_timeout: Option<Duration>,
  pub ttl_max: i32,
  pub transport: TransportOptions,
}

/// Options a dialer or listener copies from its socket when created.
#[derive(Debug, Clone)]
pub(crate) struct TransportOptions {
  /// 0 means unlimited.
  pub recv_size_max: usize,
  pub reconnect_min: Duration,
  /// Zero keeps the retry interval fixed at `reconnect_min`.
  pub reconnect_max: Duration,
  pub tcp_nodelay: bool,
  pub tcp_keepalive: bool,
}

impl Default for TransportOptions {
  fn default() -> Self {
    Self {
      recv_size_max: 1024 * 1024,
      reconnect_min: Duration::from_millis(100),
      reconnect_max: Duration::ZERO,
      tcp_nodelay: true,
      tcp_keepalive: false,
    }
  }
}

impl SocketOptions {
  pub(crate) fn new(socket_id: u32) -> Self {
    Self {
      name: socket_id.to_string(),
      recv_buffer: 128,
      send_buffer: 128,
      recv_timeout: None,
      send_timeout: None,
      ttl_max: 8,
      transport: TransportOptions::default(),
    }
  }

  /// Queue capacity for a buffer setting. A zero setting still holds one
  /// message.
  pub(crate) fn capacity(setting: i32) -> usize {
    setting.max(1) as usize
  }
}

impl TransportOptions {
  pub(crate) fn get(&self, name: &str) -> Result<OptionValue, Errno> {
    Ok(match name {
      RECV_SIZE_MAX => OptionValue::Size(self.recv_size_max),
      RECONNECT_TIME_MIN => OptionValue::Duration(Some(self.reconnect_min)),
      RECONNECT_TIME_MAX => OptionValue::Duration(Some(self.reconnect_max)),
      TCP_NODELAY => OptionValue::Bool(self.tcp_nodelay),
      TCP_KEEPALIVE => OptionValue::Bool(self.tcp_keepalive),
      _ => return Err(Errno::ENOTSUP),
    })
  }

  /// `value` has already been type-checked against the option table.
  pub(crate) fn set(&mut self, name: &str, value: &OptionValue) -> Result<(), Errno> {
    match (name, value) {
      (RECV_SIZE_MAX, OptionValue::Size(v)) => self.recv_size_max = *v,
      (RECONNECT_TIME_MIN, OptionValue::Duration(v)) => self.reconnect_min = v.ok_or(Errno::EINVAL)?,
      (RECONNECT_TIME_MAX, OptionValue::Duration(v)) => self.reconnect_max = v.ok_or(Errno::EINVAL)?,
      (TCP_NODELAY, OptionValue::Bool(v)) => self.tcp_nodelay = *v,
      (TCP_KEEPALIVE, OptionValue::Bool(v)) => self.tcp_keepalive = *v,
      _ => return Err(Errno::ENOTSUP),
    }
    Ok(())
  }

  /// Maximum accepted frame length for stream transports.
  pub(crate) fn max_frame(&self) -> usize {
    if self.recv_size_max == 0 {
      usize::MAX
    } else {
      self.recv_size_max
    }
  }
}

/// Reads a duration option, requiring the `Duration` variant.
pub(crate) fn duration_of(value: &OptionValue) -> Result<Option<Duration>, Errno> {
  value.as_duration().ok_or(Errno::EBADTYPE)
}

/// Reads an int option and checks it against an inclusive range.
pub(crate) fn int_in_range(value: &OptionValue, min: i32, max: i32) -> Result<i32, Errno> {
  match value.as_int() {
    Some(v) if (min..=max).contains(&v) => Ok(v),
    Some(_) => Err(Errno::EINVAL),
    None => Err(Errno::EBADTYPE),
  }
}
