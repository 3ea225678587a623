// src/error.rs

//! Status codes produced by the engine and the structured errors callers see.
//!
//! The engine reports failures as flat integer codes ([`Errno`]). Nothing
//! outside this crate ever sees a raw code: every public call funnels its
//! non-zero status through [`translate`] before returning.

use crate::message::Message;

use std::fmt;
use std::io;
use thiserror::Error;

/// A flat engine status code. `0` is the success sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
  pub const OK: Errno = Errno(0);
  pub const EINTR: Errno = Errno(1);
  pub const ENOMEM: Errno = Errno(2);
  pub const EINVAL: Errno = Errno(3);
  pub const EBUSY: Errno = Errno(4);
  pub const ETIMEDOUT: Errno = Errno(5);
  pub const ECONNREFUSED: Errno = Errno(6);
  pub const ECLOSED: Errno = Errno(7);
  pub const EAGAIN: Errno = Errno(8);
  pub const ENOTSUP: Errno = Errno(9);
  pub const EADDRINUSE: Errno = Errno(10);
  pub const ESTATE: Errno = Errno(11);
  pub const ENOENT: Errno = Errno(12);
  pub const EPROTO: Errno = Errno(13);
  pub const EUNREACHABLE: Errno = Errno(14);
  pub const EADDRINVAL: Errno = Errno(15);
  pub const EPERM: Errno = Errno(16);
  pub const EMSGSIZE: Errno = Errno(17);
  pub const ECONNABORTED: Errno = Errno(18);
  pub const ECONNRESET: Errno = Errno(19);
  pub const ECANCELED: Errno = Errno(20);
  pub const ENOFILES: Errno = Errno(21);
  pub const ENOSPC: Errno = Errno(22);
  pub const EEXIST: Errno = Errno(23);
  pub const EREADONLY: Errno = Errno(24);
  pub const EWRITEONLY: Errno = Errno(25);
  pub const ECRYPTO: Errno = Errno(26);
  pub const EPEERAUTH: Errno = Errno(27);
  pub const ENOARG: Errno = Errno(28);
  pub const EAMBIGUOUS: Errno = Errno(29);
  pub const EBADTYPE: Errno = Errno(30);
  pub const ECONNSHUT: Errno = Errno(31);
  pub const EINTERNAL: Errno = Errno(1000);

  /// Base for codes that carry an operating system errno in the low bits.
  pub const ESYSERR: i32 = 0x1000_0000;
  /// Base for transport-specific codes.
  pub const ETRANERR: i32 = 0x2000_0000;

  pub const fn code(self) -> i32 {
    self.0
  }

  pub const fn is_ok(self) -> bool {
    self.0 == 0
  }

  pub fn description(self) -> &'static str {
    strerror(self.0)
  }

  /// Folds an I/O failure from a transport into the engine code space.
  pub(crate) fn from_io(e: &io::Error) -> Errno {
    match e.kind() {
      io::ErrorKind::AddrInUse => Errno::EADDRINUSE,
      io::ErrorKind::AddrNotAvailable => Errno::EADDRINVAL,
      io::ErrorKind::ConnectionRefused => Errno::ECONNREFUSED,
      io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => Errno::ECONNRESET,
      io::ErrorKind::ConnectionAborted => Errno::ECONNABORTED,
      io::ErrorKind::UnexpectedEof => Errno::ECONNSHUT,
      io::ErrorKind::TimedOut => Errno::ETIMEDOUT,
      io::ErrorKind::PermissionDenied => Errno::EPERM,
      io::ErrorKind::NotFound => Errno::ENOENT,
      io::ErrorKind::InvalidInput => Errno::EADDRINVAL,
      io::ErrorKind::OutOfMemory => Errno::ENOMEM,
      _ => match e.raw_os_error() {
        Some(os) => Errno(Errno::ESYSERR | (os & 0x0fff_ffff)),
        None => Errno::EINTERNAL,
      },
    }
  }
}

impl fmt::Display for Errno {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} (code: {})", strerror(self.0), self.0)
  }
}

/// Returns the engine's human-readable description of a status code.
pub fn strerror(code: i32) -> &'static str {
  match code {
    0 => "Hunky dory",
    1 => "Interrupted",
    2 => "Out of memory",
    3 => "Invalid argument",
    4 => "Resource busy",
    5 => "Timed out",
    6 => "Connection refused",
    7 => "Object closed",
    8 => "Try again",
    9 => "Not supported",
    10 => "Address in use",
    11 => "Incorrect state",
    12 => "Entry not found",
    13 => "Protocol error",
    14 => "Destination unreachable",
    15 => "Address invalid",
    16 => "Permission denied",
    17 => "Message too large",
    18 => "Connection aborted",
    19 => "Connection reset",
    20 => "Operation canceled",
    21 => "Out of files",
    22 => "Out of space",
    23 => "Resource already exists",
    24 => "Read only resource",
    25 => "Write only resource",
    26 => "Cryptographic error",
    27 => "Peer could not be authenticated",
    28 => "Option requires argument",
    29 => "Ambiguous option",
    30 => "Incorrect type",
    31 => "Connection shutdown",
    1000 => "Internal error detected",
    c if c & Errno::ESYSERR != 0 && c & Errno::ETRANERR == 0 => "System error",
    c if c & Errno::ETRANERR != 0 => "Transport error",
    _ => "Unknown error",
  }
}

/// Broad families of errors, mirroring the exception hierarchy script
/// bindings expose on top of the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
  Connection,
  Timeout,
  Resource,
  Protocol,
  State,
  Request,
  Other,
}

/// Every fallible public operation fails with one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
  #[error("Timed out")]
  Timeout,
  #[error("Connection refused")]
  ConnectionRefused,
  #[error("Connection aborted")]
  ConnectionAborted,
  #[error("Connection reset")]
  ConnectionReset,
  #[error("Object closed")]
  Closed,
  #[error("Address in use")]
  AddressInUse,
  #[error("Out of memory")]
  OutOfMemory,
  #[error("Message too large")]
  MessageTooLarge,
  #[error("Protocol error")]
  ProtocolError,
  #[error("Incorrect state")]
  InvalidState,
  /// Any code without a dedicated kind.
  #[error("{description} (code: {code})")]
  Generic { code: i32, description: &'static str },

  // --- Request validation, raised before the engine is involved ---
  #[error("Unknown protocol: {0}")]
  UnknownProtocol(String),
  #[error("Unknown option: {0}")]
  UnknownOption(String),
}

/// Maps an engine status code to its error. Total and pure.
///
/// `0` is the success sentinel and is filtered by [`check`] before it gets
/// here; passed directly it yields a `Generic` carrying code 0.
pub fn translate(code: i32) -> Error {
  match Errno(code) {
    Errno::ETIMEDOUT => Error::Timeout,
    Errno::ECONNREFUSED => Error::ConnectionRefused,
    Errno::ECONNABORTED => Error::ConnectionAborted,
    Errno::ECONNRESET => Error::ConnectionReset,
    Errno::ECLOSED | Errno::ECANCELED => Error::Closed,
    Errno::EADDRINUSE => Error::AddressInUse,
    Errno::ENOMEM => Error::OutOfMemory,
    Errno::EMSGSIZE => Error::MessageTooLarge,
    Errno::EPROTO | Errno::EBADTYPE => Error::ProtocolError,
    Errno::ESTATE => Error::InvalidState,
    _ => Error::Generic {
      code,
      description: strerror(code),
    },
  }
}

/// Turns a status code into a `Result`, treating `0` as success.
pub fn check(code: i32) -> Result<()> {
  if code == Errno::OK.0 {
    Ok(())
  } else {
    Err(translate(code))
  }
}

impl From<Errno> for Error {
  fn from(errno: Errno) -> Self {
    translate(errno.0)
  }
}

impl Error {
  /// The engine code this error was translated from, if any.
  pub fn code(&self) -> Option<i32> {
    let errno = match self {
      Error::Timeout => Errno::ETIMEDOUT,
      Error::ConnectionRefused => Errno::ECONNREFUSED,
      Error::ConnectionAborted => Errno::ECONNABORTED,
      Error::ConnectionReset => Errno::ECONNRESET,
      Error::Closed => Errno::ECLOSED,
      Error::AddressInUse => Errno::EADDRINUSE,
      Error::OutOfMemory => Errno::ENOMEM,
      Error::MessageTooLarge => Errno::EMSGSIZE,
      Error::ProtocolError => Errno::EPROTO,
      Error::InvalidState => Errno::ESTATE,
      Error::Generic { code, .. } => Errno(*code),
      Error::UnknownProtocol(_) | Error::UnknownOption(_) => return None,
    };
    Some(errno.0)
  }

  pub fn category(&self) -> ErrorCategory {
    match self {
      Error::ConnectionRefused | Error::ConnectionAborted | Error::ConnectionReset => ErrorCategory::Connection,
      Error::Timeout => ErrorCategory::Timeout,
      Error::AddressInUse | Error::OutOfMemory => ErrorCategory::Resource,
      Error::ProtocolError | Error::MessageTooLarge => ErrorCategory::Protocol,
      Error::Closed | Error::InvalidState => ErrorCategory::State,
      Error::UnknownProtocol(_) | Error::UnknownOption(_) => ErrorCategory::Request,
      Error::Generic { .. } => ErrorCategory::Other,
    }
  }

  /// True for the failure a non-blocking call reports when it cannot proceed.
  pub fn is_would_block(&self) -> bool {
    matches!(self, Error::Generic { code, .. } if *code == Errno::EAGAIN.0)
  }

  pub fn is_connection_error(&self) -> bool {
    self.category() == ErrorCategory::Connection
  }
}

/// A failed send. Ownership of the message goes back to the caller.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct SendError {
  pub error: Error,
  pub message: Message,
}

impl SendError {
  pub(crate) fn new(error: impl Into<Error>, message: Message) -> Self {
    Self {
      error: error.into(),
      message,
    }
  }

  pub fn into_message(self) -> Message {
    self.message
  }
}

impl From<SendError> for Error {
  fn from(e: SendError) -> Self {
    e.error
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn translate_maps_dedicated_kinds() {
    assert_eq!(translate(5), Error::Timeout);
    assert_eq!(translate(6), Error::ConnectionRefused);
    assert_eq!(translate(7), Error::Closed);
    assert_eq!(translate(10), Error::AddressInUse);
    assert_eq!(translate(2), Error::OutOfMemory);
    assert_eq!(translate(17), Error::MessageTooLarge);
    assert_eq!(translate(13), Error::ProtocolError);
    assert_eq!(translate(11), Error::InvalidState);
    assert_eq!(translate(18), Error::ConnectionAborted);
    assert_eq!(translate(19), Error::ConnectionReset);
  }

  #[test]
  fn cancellation_is_closed_class() {
    assert_eq!(translate(Errno::ECANCELED.0), Error::Closed);
    assert_eq!(translate(Errno::EBADTYPE.0), Error::ProtocolError);
  }

  #[test]
  fn unmapped_codes_are_generic_with_description() {
    let e = translate(9);
    assert_eq!(
      e,
      Error::Generic {
        code: 9,
        description: "Not supported"
      }
    );
    assert_eq!(e.to_string(), "Not supported (code: 9)");
    assert_eq!(e.code(), Some(9));

    match translate(123_456) {
      Error::Generic { code, description } => {
        assert_eq!(code, 123_456);
        assert_eq!(description, "Unknown error");
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn translate_is_deterministic() {
    for code in -5..2000 {
      assert_eq!(translate(code), translate(code));
    }
  }

  #[test]
  fn check_filters_success() {
    assert!(check(0).is_ok());
    assert_eq!(check(5), Err(Error::Timeout));
  }

  #[test]
  fn would_block_and_categories() {
    assert!(translate(Errno::EAGAIN.0).is_would_block());
    assert!(!Error::Timeout.is_would_block());
    assert!(Error::ConnectionReset.is_connection_error());
    assert_eq!(Error::UnknownOption("x".into()).category(), ErrorCategory::Request);
    assert_eq!(Error::UnknownProtocol("x".into()).code(), None);
  }

  #[test]
  fn io_errors_fold_into_codes() {
    let e = io::Error::new(io::ErrorKind::AddrInUse, "busy");
    assert_eq!(Errno::from_io(&e), Errno::EADDRINUSE);
    let e = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
    assert_eq!(Errno::from_io(&e), Errno::ECONNRESET);
    let e = io::Error::from_raw_os_error(1234);
    let errno = Errno::from_io(&e);
    assert_ne!(errno.0 & Errno::ESYSERR, 0);
    assert_eq!(strerror(errno.0), "System error");
  }
}
