// src/message/msg.rs

use crate::error::{Errno, Error, Result};
use crate::handle::PipeId;
use crate::socket::Pipe;

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;

/// One unit of data exchanged between sockets.
///
/// A message owns two independent byte regions: a *header* that protocol
/// layers use for routing metadata (request ids, backtraces) and a *body*
/// carrying the application payload. Operations on one region never touch
/// the other. Lengths are O(1).
///
/// A message is exclusively owned; it is moved into `send` and moved out of
/// `recv`. Dropping it (or calling [`Message::release`]) frees it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Message {
  header: BytesMut,
  body: BytesMut,
  pipe: PipeId,
}

impl Message {
  /// Creates an empty message.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a message whose body is `initial_size` zero bytes. The header
  /// starts empty.
  pub fn with_size(initial_size: usize) -> Self {
    Self {
      body: BytesMut::zeroed(initial_size),
      ..Default::default()
    }
  }

  /// Creates a message with a body copied from `data`.
  pub fn from_slice(data: &[u8]) -> Self {
    Self {
      body: BytesMut::from(data),
      ..Default::default()
    }
  }

  // --- Body ---

  pub fn body(&self) -> &[u8] {
    &self.body
  }

  pub fn body_mut(&mut self) -> &mut [u8] {
    &mut self.body
  }

  /// Length of the body in bytes.
  pub fn len(&self) -> usize {
    self.body.len()
  }

  pub fn is_empty(&self) -> bool {
    self.body.is_empty()
  }

  pub fn append_body(&mut self, data: &[u8]) {
    self.body.extend_from_slice(data);
  }

  pub fn insert_body_front(&mut self, data: &[u8]) {
    prepend(&mut self.body, data);
  }

  /// Removes `n` bytes from the front of the body.
  pub fn trim_body_front(&mut self, n: usize) -> Result<()> {
    trim_front(&mut self.body, n)
  }

  /// Removes `n` bytes from the back of the body.
  pub fn chop_body_back(&mut self, n: usize) -> Result<()> {
    chop_back(&mut self.body, n)
  }

  /// Empties the body, keeping its allocation.
  pub fn clear_body(&mut self) {
    self.body.clear();
  }

  // --- Header ---

  pub fn header(&self) -> &[u8] {
    &self.header
  }

  pub fn header_mut(&mut self) -> &mut [u8] {
    &mut self.header
  }

  pub fn header_len(&self) -> usize {
    self.header.len()
  }

  pub fn append_header(&mut self, data: &[u8]) {
    self.header.extend_from_slice(data);
  }

  pub fn insert_header_front(&mut self, data: &[u8]) {
    prepend(&mut self.header, data);
  }

  pub fn trim_header_front(&mut self, n: usize) -> Result<()> {
    trim_front(&mut self.header, n)
  }

  pub fn chop_header_back(&mut self, n: usize) -> Result<()> {
    chop_back(&mut self.header, n)
  }

  pub fn clear_header(&mut self) {
    self.header.clear();
  }

  // --- Big-endian u32 helpers used by protocol layers ---

  pub fn append_body_u32(&mut self, value: u32) {
    self.append_body(&value.to_be_bytes());
  }

  pub fn insert_body_u32(&mut self, value: u32) {
    self.insert_body_front(&value.to_be_bytes());
  }

  /// Removes and returns the first four body bytes.
  pub fn trim_body_u32(&mut self) -> Result<u32> {
    let value = read_u32(&self.body)?;
    self.body.advance(4);
    Ok(value)
  }

  pub fn append_header_u32(&mut self, value: u32) {
    self.append_header(&value.to_be_bytes());
  }

  pub fn insert_header_u32(&mut self, value: u32) {
    self.insert_header_front(&value.to_be_bytes());
  }

  /// Removes and returns the first four header bytes.
  pub fn trim_header_u32(&mut self) -> Result<u32> {
    let value = read_u32(&self.header)?;
    self.header.advance(4);
    Ok(value)
  }

  /// Removes and returns the last four header bytes.
  pub fn chop_header_u32(&mut self) -> Result<u32> {
    let len = self.header.len();
    if len < 4 {
      return Err(Errno::ESTATE.into());
    }
    let value = read_u32(&self.header[len - 4..])?;
    self.header.truncate(len - 4);
    Ok(value)
  }

  // --- Ownership ---

  /// Deep copy with an independent lifetime.
  pub fn duplicate(&self) -> Message {
    self.clone()
  }

  /// The connection this message arrived on, or will leave through.
  pub fn associated_pipe(&self) -> Option<Pipe> {
    self.pipe.is_bound().then(|| Pipe::from_id(self.pipe))
  }

  pub fn set_associated_pipe(&mut self, pipe: Pipe) {
    self.pipe = pipe.id();
  }

  /// Frees the message. Equivalent to dropping it.
  pub fn release(self) {}

  /// Consumes the message, returning its body.
  pub fn into_body(self) -> Bytes {
    self.body.freeze()
  }

  pub(crate) fn pipe_id(&self) -> PipeId {
    self.pipe
  }

  pub(crate) fn set_pipe_id(&mut self, pipe: PipeId) {
    self.pipe = pipe;
  }

  /// Moves the header in front of the body, leaving the header empty. This
  /// is the form a message takes on the wire.
  pub(crate) fn flatten(&mut self) {
    if !self.header.is_empty() {
      let mut joined = BytesMut::with_capacity(self.header.len() + self.body.len());
      joined.extend_from_slice(&self.header);
      joined.extend_from_slice(&self.body);
      self.body = joined;
      self.header.clear();
    }
  }

  /// Moves `n` bytes from the front of the body to the back of the header.
  pub(crate) fn shift_body_to_header(&mut self, n: usize) -> Result<(), Errno> {
    if self.body.len() < n {
      return Err(Errno::EPROTO);
    }
    let moved = self.body.split_to(n);
    self.header.extend_from_slice(&moved);
    Ok(())
  }
}

fn prepend(region: &mut BytesMut, data: &[u8]) {
  if data.is_empty() {
    return;
  }
  let mut joined = BytesMut::with_capacity(data.len() + region.len());
  joined.extend_from_slice(data);
  joined.extend_from_slice(region);
  *region = joined;
}

fn trim_front(region: &mut BytesMut, n: usize) -> Result<()> {
  if n > region.len() {
    return Err(Error::InvalidState);
  }
  region.advance(n);
  Ok(())
}

fn chop_back(region: &mut BytesMut, n: usize) -> Result<()> {
  let len = region.len();
  if n > len {
    return Err(Error::InvalidState);
  }
  region.truncate(len - n);
  Ok(())
}

fn read_u32(bytes: &[u8]) -> Result<u32> {
  match bytes.get(..4) {
    Some(b) => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
    None => Err(Error::InvalidState),
  }
}

impl From<&[u8]> for Message {
  fn from(data: &[u8]) -> Self {
    Message::from_slice(data)
  }
}

impl<const N: usize> From<&[u8; N]> for Message {
  fn from(data: &[u8; N]) -> Self {
    Message::from_slice(data)
  }
}

impl From<&str> for Message {
  fn from(data: &str) -> Self {
    Message::from_slice(data.as_bytes())
  }
}

impl From<Vec<u8>> for Message {
  fn from(data: Vec<u8>) -> Self {
    Self {
      body: BytesMut::from(&data[..]),
      ..Default::default()
    }
  }
}

impl From<Bytes> for Message {
  fn from(data: Bytes) -> Self {
    Self {
      body: BytesMut::from(&data[..]),
      ..Default::default()
    }
  }
}

impl From<BytesMut> for Message {
  fn from(body: BytesMut) -> Self {
    Self {
      body,
      ..Default::default()
    }
  }
}

impl fmt::Debug for Message {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Message")
      .field("header_len", &self.header.len())
      .field("body_len", &self.body.len())
      .field("pipe", &self.pipe)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn allocate_sizes_body_only() {
    let m = Message::with_size(16);
    assert_eq!(m.len(), 16);
    assert_eq!(m.header_len(), 0);
    assert!(m.body().iter().all(|b| *b == 0));
  }

  #[test]
  fn append_then_chop_restores_body() {
    let mut m = Message::from("payload");
    let original = m.body().to_vec();
    m.append_body(b"-suffix");
    m.chop_body_back(7).unwrap();
    assert_eq!(m.body(), &original[..]);
  }

  #[test]
  fn insert_then_trim_restores_body() {
    let mut m = Message::from("world");
    m.insert_body_front(b"hello ");
    assert_eq!(m.body(), b"hello world");
    m.trim_body_front(6).unwrap();
    assert_eq!(m.body(), b"world");
  }

  #[test]
  fn header_and_body_are_independent() {
    let mut m = Message::from("body");
    m.append_header(b"hdr");
    m.insert_header_front(b">");
    assert_eq!(m.body(), b"body");
    assert_eq!(m.header(), b">hdr");

    m.append_body(b"!");
    m.trim_header_front(1).unwrap();
    assert_eq!(m.header(), b"hdr");
    assert_eq!(m.body(), b"body!");

    m.clear_header();
    assert_eq!(m.header_len(), 0);
    assert_eq!(m.body(), b"body!");

    m.clear_body();
    assert!(m.is_empty());
  }

  #[test]
  fn over_long_trim_and_chop_are_rejected() {
    let mut m = Message::from("abc");
    assert_eq!(m.trim_body_front(4), Err(Error::InvalidState));
    assert_eq!(m.chop_body_back(4), Err(Error::InvalidState));
    assert_eq!(m.trim_header_front(1), Err(Error::InvalidState));
    assert_eq!(m.chop_header_back(1), Err(Error::InvalidState));
    assert_eq!(m.body(), b"abc");
  }

  #[test]
  fn duplicate_is_independent() {
    let mut a = Message::from("same");
    a.append_header(b"h");
    let mut b = a.duplicate();
    b.append_body(b"-changed");
    b.clear_header();
    assert_eq!(a.body(), b"same");
    assert_eq!(a.header(), b"h");
    assert_eq!(b.body(), b"same-changed");
  }

  #[test]
  fn u32_helpers_are_big_endian() {
    let mut m = Message::new();
    m.append_header_u32(0x8000_0001);
    assert_eq!(m.header(), &[0x80, 0, 0, 1]);
    m.insert_body_u32(7);
    assert_eq!(m.trim_body_u32().unwrap(), 7);
    assert_eq!(m.chop_header_u32().unwrap(), 0x8000_0001);
    assert!(m.trim_body_u32().is_err());
  }

  #[test]
  fn flatten_moves_header_in_front() {
    let mut m = Message::from("data");
    m.append_header(b"HD");
    m.flatten();
    assert_eq!(m.header_len(), 0);
    assert_eq!(m.body(), b"HDdata");
    m.shift_body_to_header(2).unwrap();
    assert_eq!(m.header(), b"HD");
    assert_eq!(m.body(), b"data");
  }

  #[test]
  fn pipe_association() {
    let mut m = Message::new();
    assert!(m.associated_pipe().is_none());
    m.set_pipe_id(PipeId::new(9));
    assert_eq!(m.associated_pipe().map(|p| p.id()), Some(PipeId::new(9)));
  }
}
