// src/handle.rs

//! Identifier value types for engine objects.
//!
//! Each wraps the 32-bit id the engine hands out. Ids start at 1 and are
//! never handed out twice within one runtime; `0` means "not yet bound".
//! Whether an id is still open is tracked by the engine registries, never by
//! the value itself.

use std::fmt;

macro_rules! handle_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct $name(u32);

    impl $name {
      /// The "not yet bound" id.
      pub const UNBOUND: $name = $name(0);

      pub(crate) const fn new(id: u32) -> Self {
        Self(id)
      }

      pub const fn id(self) -> u32 {
        self.0
      }

      pub const fn is_bound(self) -> bool {
        self.0 != 0
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }
  };
}

handle_id!(
  /// Identifies an open socket.
  SocketId
);
handle_id!(
  /// Identifies an outbound connection endpoint.
  DialerId
);
handle_id!(
  /// Identifies an inbound accept endpoint.
  ListenerId
);
handle_id!(
  /// Identifies a protocol context on a socket.
  ContextId
);
handle_id!(
  /// Identifies one established connection.
  PipeId
);

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn unbound_is_zero_and_default() {
    assert_eq!(SocketId::default(), SocketId::UNBOUND);
    assert!(!PipeId::UNBOUND.is_bound());
    assert!(DialerId::new(4).is_bound());
  }

  #[test]
  fn equality_and_hash_follow_the_id() {
    let mut set = HashSet::new();
    set.insert(ContextId::new(7));
    assert!(set.contains(&ContextId::new(7)));
    assert_ne!(ListenerId::new(1), ListenerId::new(2));
    assert_eq!(ListenerId::new(3).to_string(), "3");
  }
}
