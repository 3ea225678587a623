// tests/pair.rs

use rnng::{Error, Flags, Message, PipeEvent, Protocol, Socket};
use std::time::Duration;
mod common;

#[test]
fn test_pair1_inproc_exchange() -> Result<(), Error> {
  common::setup_tracing();
  let a = Socket::new(Protocol::Pair1)?;
  let b = Socket::new(Protocol::Pair1)?;
  let url = common::unique_inproc_endpoint();

  a.listen(&url)?;
  b.dial(&url)?;

  a.send(b"x")?;
  assert_eq!(b.recv()?, b"x");
  b.send(b"y")?;
  assert_eq!(a.recv()?, b"y");

  a.close()?;
  b.close()?;
  Ok(())
}

#[test]
fn test_pair_message_path_keeps_body() -> Result<(), Error> {
  common::setup_tracing();
  let a = Socket::new(Protocol::Pair0)?;
  let b = Socket::new(Protocol::Pair0)?;
  let url = common::unique_inproc_endpoint();
  a.listen(&url)?;
  b.dial(&url)?;

  let mut msg = Message::with_size(0);
  msg.append_body(b"hello ");
  msg.append_body(b"world");
  b.send_msg(msg, Flags::empty()).map_err(Error::from)?;

  let received = a.recv_msg(Flags::empty())?;
  assert_eq!(received.body(), b"hello world");
  assert_eq!(received.header_len(), 0);
  assert!(received.associated_pipe().is_some());

  a.close()?;
  b.close()?;
  Ok(())
}

#[test]
fn test_pair_rejects_second_peer() -> Result<(), Error> {
  common::setup_tracing();
  let a = Socket::new(Protocol::Pair1)?;
  let b = Socket::new(Protocol::Pair1)?;
  let c = Socket::new(Protocol::Pair1)?;
  let url = common::unique_inproc_endpoint();
  a.listen(&url)?;
  b.dial(&url)?;
  common::wait_for_pipes(&a, 1);

  // The third socket connects at the transport level but the listener side
  // refuses the pipe, so messages only ever flow between a and b.
  c.dial_nonblocking(&url)?;
  std::thread::sleep(Duration::from_millis(100));
  assert_eq!(a.pipe_count()?, 1);

  b.send(b"only b")?;
  assert_eq!(a.recv()?, b"only b");

  a.close()?;
  b.close()?;
  c.close()?;
  Ok(())
}

#[test]
fn test_refused_peer_still_reports_removal() -> Result<(), Error> {
  common::setup_tracing();
  let a = Socket::new(Protocol::Pair1)?;
  let b = Socket::new(Protocol::Pair1)?;
  let c = Socket::new(Protocol::Pair1)?;
  let log = common::EventLog::attach(&a);
  let url = common::unique_inproc_endpoint();
  a.listen(&url)?;
  b.dial(&url)?;
  log.wait_for(PipeEvent::AddPost, 1);

  c.dial_nonblocking(&url)?;
  log.wait_for(PipeEvent::RemovePost, 1);
  c.close()?;
  std::thread::sleep(Duration::from_millis(100));

  // Every refused pipe saw AddPre then RemovePost, never AddPost.
  assert_eq!(log.count(PipeEvent::AddPost), 1);
  assert_eq!(log.count(PipeEvent::RemovePost), log.count(PipeEvent::AddPre) - 1);
  let events = log.snapshot();
  for (pipe, event) in &events {
    if *event == PipeEvent::AddPre && !events.contains(&(*pipe, PipeEvent::AddPost)) {
      assert!(events.contains(&(*pipe, PipeEvent::RemovePost)), "no removal for {:?}", pipe);
    }
  }

  a.close()?;
  b.close()?;
  Ok(())
}

#[test]
fn test_nonblocking_recv_would_block() -> Result<(), Error> {
  common::setup_tracing();
  let a = Socket::new(Protocol::Pair1)?;
  let err = a.try_recv().unwrap_err();
  assert!(err.is_would_block(), "unexpected {:?}", err);

  a.set_option(rnng::options::RECV_TIMEOUT, Duration::from_millis(30))?;
  assert_eq!(a.recv().unwrap_err(), Error::Timeout);
  a.close()?;
  Ok(())
}

#[test]
fn test_incompatible_peer_is_not_attached() -> Result<(), Error> {
  common::setup_tracing();
  let pair = Socket::new(Protocol::Pair1)?;
  let push = Socket::new(Protocol::Push0)?;
  let url = common::unique_inproc_endpoint();
  pair.listen(&url)?;
  assert_eq!(push.dial(&url).unwrap_err(), Error::ProtocolError);
  assert_eq!(pair.pipe_count()?, 0);
  pair.close()?;
  push.close()?;
  Ok(())
}
