// tests/aio.rs

use rnng::{Aio, AioState, Context, Error, Message, Protocol, Socket};
use std::sync::mpsc;
use std::time::Duration;
mod common;

fn connected_pair() -> Result<(Socket, Socket), Error> {
  let a = Socket::new(Protocol::Pair1)?;
  let b = Socket::new(Protocol::Pair1)?;
  let url = common::unique_inproc_endpoint();
  a.listen(&url)?;
  b.dial(&url)?;
  Ok((a, b))
}

#[test]
fn test_aio_send_and_recv() -> Result<(), Error> {
  common::setup_tracing();
  let (a, b) = connected_pair()?;

  let receiver = Aio::new();
  receiver.set_timeout(Some(common::LONG_TIMEOUT));
  receiver.start_recv(&b)?;
  assert_eq!(receiver.state(), AioState::Running);

  let sender = Aio::new();
  sender.set_msg(Message::from_slice(b"async hello")).map_err(Error::from)?;
  sender.start_send(&a)?;
  sender.wait();
  sender.result()?;
  assert!(sender.take_msg().is_none());

  receiver.wait();
  receiver.result()?;
  assert_eq!(receiver.state(), AioState::Completed);
  let msg = receiver.take_msg().expect("received message");
  assert_eq!(msg.body(), b"async hello");

  a.close()?;
  b.close()?;
  Ok(())
}

#[test]
fn test_aio_recv_times_out() -> Result<(), Error> {
  common::setup_tracing();
  let socket = Socket::new(Protocol::Pull0)?;
  let aio = Aio::new();
  aio.set_timeout(Some(Duration::from_millis(20)));
  aio.start_recv(&socket)?;
  aio.wait();
  assert_eq!(aio.result().unwrap_err(), Error::Timeout);
  assert_eq!(aio.state(), AioState::Completed);
  socket.close()?;
  Ok(())
}

#[test]
fn test_aio_busy_while_running() -> Result<(), Error> {
  common::setup_tracing();
  let socket = Socket::new(Protocol::Pull0)?;
  let aio = Aio::new();
  aio.start_recv(&socket)?;

  assert_eq!(aio.start_recv(&socket).unwrap_err(), Error::InvalidState);
  assert_eq!(aio.result().unwrap_err(), Error::InvalidState);
  let refused = aio.set_msg(Message::from_slice(b"x")).unwrap_err();
  assert_eq!(refused.error, Error::InvalidState);
  assert_eq!(refused.into_message().body(), b"x");

  aio.stop();
  assert_eq!(aio.state(), AioState::Canceled);
  assert_eq!(aio.result().unwrap_err(), Error::Closed);
  socket.close()?;
  Ok(())
}

#[test]
fn test_socket_close_completes_pending_aio() -> Result<(), Error> {
  common::setup_tracing();
  let socket = Socket::new(Protocol::Pull0)?;
  let aio = Aio::new();
  aio.start_recv(&socket)?;
  socket.clone().close()?;
  aio.wait();
  assert_eq!(aio.result().unwrap_err(), Error::Closed);

  // Starting against a closed socket reports through the result.
  aio.start_recv(&socket)?;
  aio.wait();
  assert_eq!(aio.result().unwrap_err(), Error::Closed);
  Ok(())
}

#[test]
fn test_failed_send_returns_message() -> Result<(), Error> {
  common::setup_tracing();
  let push = Socket::new(Protocol::Push0)?;
  push.set_option(rnng::options::SEND_BUFFER, 1)?;
  push.try_send(b"fills-the-buffer")?;

  let aio = Aio::new();
  aio.set_timeout(Some(Duration::from_millis(20)));
  aio.set_msg(Message::from_slice(b"kept")).map_err(Error::from)?;
  aio.start_send(&push)?;
  aio.wait();
  assert_eq!(aio.result().unwrap_err(), Error::Timeout);
  assert_eq!(aio.take_msg().map(|m| m.body().to_vec()), Some(b"kept".to_vec()));
  push.close()?;
  Ok(())
}

#[test]
fn test_aio_callback_receives_message() -> Result<(), Error> {
  common::setup_tracing();
  let (a, b) = connected_pair()?;
  let (tx, rx) = mpsc::channel();
  let aio = Aio::with_callback(move |outcome| {
    let body = outcome.map(|msg| msg.map(|m| m.body().to_vec()));
    let _ = tx.send(body);
  });
  aio.start_recv(&b)?;
  a.send(b"via-callback")?;

  let delivered = rx.recv_timeout(common::LONG_TIMEOUT).expect("callback ran");
  assert_eq!(delivered?, Some(b"via-callback".to_vec()));
  // The callback took ownership of the message.
  assert!(aio.take_msg().is_none());

  a.close()?;
  b.close()?;
  Ok(())
}

#[test]
fn test_aio_on_context() -> Result<(), Error> {
  common::setup_tracing();
  let rep = Socket::new(Protocol::Rep0)?;
  let req = Socket::new(Protocol::Req0)?;
  let url = common::unique_inproc_endpoint();
  rep.listen(&url)?;
  req.dial(&url)?;

  let ctx = Context::open(&rep)?;
  let aio = Aio::new();
  aio.set_timeout(Some(common::LONG_TIMEOUT));
  aio.start_recv(&ctx)?;
  req.send(b"question")?;
  aio.wait();
  aio.result()?;
  let mut request = aio.take_msg().expect("request");
  assert_eq!(request.body(), b"question");

  request.clear_body();
  request.append_body(b"reply");
  aio.set_msg(request).map_err(Error::from)?;
  aio.start_send(&ctx)?;
  aio.wait();
  aio.result()?;
  req.set_option(rnng::options::RECV_TIMEOUT, common::LONG_TIMEOUT)?;
  assert_eq!(req.recv()?, b"reply");

  ctx.close()?;
  req.close()?;
  rep.close()?;
  Ok(())
}

#[test]
fn test_aio_sleep_and_cancel() -> Result<(), Error> {
  common::setup_tracing();
  let aio = Aio::new();
  aio.start_sleep(Duration::from_millis(5))?;
  aio.wait();
  aio.result()?;

  aio.start_sleep(Duration::from_secs(60))?;
  aio.cancel();
  aio.wait();
  assert_eq!(aio.state(), AioState::Canceled);
  assert_eq!(aio.result().unwrap_err(), Error::Closed);
  Ok(())
}
