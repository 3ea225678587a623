// tests/ipc.rs

use rnng::options::{RECV_BUFFER, RECV_TIMEOUT};
use rnng::{Error, Protocol, Socket};
use std::time::Duration;
mod common;

#[test]
fn test_ipc_pair_exchange() -> Result<(), Error> {
  common::setup_tracing();
  let url = common::unique_ipc_endpoint();
  let a = Socket::new(Protocol::Pair1)?;
  let b = Socket::new(Protocol::Pair1)?;
  a.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;
  b.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;
  a.listen(&url)?;
  b.dial(&url)?;

  a.send(b"over a unix socket")?;
  assert_eq!(b.recv()?, b"over a unix socket");
  b.send(b"and back")?;
  assert_eq!(a.recv()?, b"and back");

  a.close()?;
  b.close()?;
  Ok(())
}

#[test]
fn test_ipc_path_is_released_on_close() -> Result<(), Error> {
  common::setup_tracing();
  let url = common::unique_ipc_endpoint();
  let first = Socket::new(Protocol::Pull0)?;
  first.listen(&url)?;
  first.close()?;

  // The same path can be bound again once the first listener is gone.
  let second = Socket::new(Protocol::Pull0)?;
  second.listen(&url)?;
  second.close()?;
  Ok(())
}

#[test]
fn test_ipc_dial_without_listener_is_refused() -> Result<(), Error> {
  common::setup_tracing();
  let socket = Socket::new(Protocol::Push0)?;
  let err = socket.dial(&common::unique_ipc_endpoint()).unwrap_err();
  assert!(err.is_connection_error() || err.code() == Some(rnng::Errno::ENOENT.code()));
  socket.close()?;
  Ok(())
}

#[test]
fn test_ipc_messages_sent_before_hang_up_are_delivered() -> Result<(), Error> {
  common::setup_tracing();
  let pull = Socket::new(Protocol::Pull0)?;
  pull.set_option(RECV_BUFFER, 1)?;
  pull.set_option(RECV_TIMEOUT, Duration::from_millis(500))?;
  let url = common::unique_ipc_endpoint();
  pull.listen(&url)?;

  let push = Socket::new(Protocol::Push0)?;
  push.dial(&url)?;
  for i in 0..5u8 {
    push.send(&[i])?;
  }
  // Let the frames reach the wire, then hang up while most are still unread.
  std::thread::sleep(Duration::from_millis(300));
  push.close()?;

  let mut received = Vec::new();
  while let Ok(body) = pull.recv() {
    received.push(body);
  }
  assert_eq!(received, (0..5u8).map(|i| vec![i]).collect::<Vec<_>>());
  pull.close()?;
  Ok(())
}
