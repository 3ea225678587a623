// src/lib.rs

//! rnng - scalability-protocol sockets (pair, pub/sub, req/rep, push/pull,
//! surveyor/respondent, bus) over inproc, TCP and IPC transports, driven by
//! an in-process Tokio engine behind a blocking API.

pub mod aio;
pub mod context;
pub mod device;
pub mod error;
pub mod handle;
pub mod message;
pub mod protocol;
pub mod runtime;
pub mod socket;
pub(crate) mod transport;

// Re-export core types for user convenience
pub use aio::{Aio, AioState, AioTarget};
pub use context::Context;
pub use device::device;
pub use error::{check, strerror, translate, Errno, Error, ErrorCategory, Result, SendError};
pub use handle::{ContextId, DialerId, ListenerId, PipeId, SocketId};
pub use message::{Flags, Message};
pub use protocol::Protocol;
pub use runtime::{fini, init, socket_count, RuntimeConfig};
pub use socket::options::{self, OptionType, OptionValue};
pub use socket::{Dialer, Listener, Pipe, PipeEvent, Socket};

/// Opens a socket by protocol name ("pair", "req0", "sub", ...).
///
/// An unrecognised name fails with [`Error::UnknownProtocol`] without
/// touching the engine.
pub fn open_socket(name: &str, raw: bool) -> Result<Socket> {
  let protocol: Protocol = name.parse()?;
  Socket::open(protocol, raw)
}

// --- Top-Level Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Returns the major version number of the library.
pub fn version_major() -> i32 {
  VERSION_MAJOR
}

/// Returns the minor version number of the library.
pub fn version_minor() -> i32 {
  VERSION_MINOR
}

/// Returns the patch version number of the library.
pub fn version_patch() -> i32 {
  VERSION_PATCH
}
