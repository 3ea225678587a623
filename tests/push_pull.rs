// tests/push_pull.rs

use rnng::options::RECV_TIMEOUT;
use rnng::{Error, Protocol, Socket};
use std::collections::HashSet;
use std::time::Duration;
mod common;

#[test]
fn test_push_pull_delivers_in_order() -> Result<(), Error> {
  common::setup_tracing();
  let pull = Socket::new(Protocol::Pull0)?;
  let push = Socket::new(Protocol::Push0)?;
  let url = common::unique_inproc_endpoint();
  pull.listen(&url)?;
  push.dial(&url)?;
  pull.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;

  for i in 0..50u32 {
    push.send(&i.to_be_bytes())?;
  }
  for i in 0..50u32 {
    assert_eq!(pull.recv()?, i.to_be_bytes());
  }

  push.close()?;
  pull.close()?;
  Ok(())
}

#[test]
fn test_push_queues_until_a_peer_arrives() -> Result<(), Error> {
  common::setup_tracing();
  let push = Socket::new(Protocol::Push0)?;
  push.send(b"early")?;

  let pull = Socket::new(Protocol::Pull0)?;
  pull.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;
  let url = common::unique_inproc_endpoint();
  pull.listen(&url)?;
  push.dial(&url)?;
  assert_eq!(pull.recv()?, b"early");

  push.close()?;
  pull.close()?;
  Ok(())
}

#[test]
fn test_push_spreads_work_across_pullers() -> Result<(), Error> {
  common::setup_tracing();
  let push = Socket::new(Protocol::Push0)?;
  let url = common::unique_inproc_endpoint();
  push.listen(&url)?;

  let workers = (0..2)
    .map(|_| -> Result<Socket, Error> {
      let pull = Socket::new(Protocol::Pull0)?;
      pull.set_option(RECV_TIMEOUT, Duration::from_millis(500))?;
      pull.dial(&url)?;
      Ok(pull)
    })
    .collect::<Result<Vec<_>, _>>()?;
  common::wait_for_pipes(&push, 2);

  for i in 0..20u8 {
    push.send(&[i])?;
  }

  let mut seen = HashSet::new();
  for worker in &workers {
    while let Ok(body) = worker.recv() {
      assert!(seen.insert(body[0]), "message delivered twice");
      if seen.len() == 20 {
        break;
      }
    }
  }
  assert_eq!(seen.len(), 20);

  for worker in workers {
    worker.close()?;
  }
  push.close()?;
  Ok(())
}

#[test]
fn test_push_cannot_recv_and_pull_cannot_send() -> Result<(), Error> {
  common::setup_tracing();
  let push = Socket::new(Protocol::Push0)?;
  let pull = Socket::new(Protocol::Pull0)?;
  let not_supported = Some(rnng::Errno::ENOTSUP.code());
  assert_eq!(push.try_recv().unwrap_err().code(), not_supported);
  assert_eq!(pull.try_send(b"x").unwrap_err().code(), not_supported);
  push.close()?;
  pull.close()?;
  Ok(())
}

#[test]
fn test_full_send_buffer_would_block() -> Result<(), Error> {
  common::setup_tracing();
  let push = Socket::new(Protocol::Push0)?;
  push.set_option(rnng::options::SEND_BUFFER, 2)?;
  push.try_send(b"1")?;
  push.try_send(b"2")?;
  let err = push.try_send(b"3").unwrap_err();
  assert!(err.is_would_block());

  push.set_option(rnng::options::SEND_TIMEOUT, Duration::from_millis(20))?;
  assert_eq!(push.send(b"3").unwrap_err(), Error::Timeout);
  push.close()?;
  Ok(())
}
