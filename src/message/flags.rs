// src/message/flags.rs

use bitflags::bitflags;

bitflags! {
    /// Flags accepted by the synchronous send and receive calls.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u8 {
        /// Fail immediately with a would-block error instead of waiting.
        const NONBLOCK = 0b10;
    }
}
