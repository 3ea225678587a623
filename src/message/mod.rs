// src/message/mod.rs

//! Message-related types (`Message`, `Flags`).

mod flags;
mod msg;

pub use flags::Flags;
pub use msg::Message;
