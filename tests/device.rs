// tests/device.rs

use rnng::options::RECV_TIMEOUT;
use rnng::{device, Error, Protocol, Socket};
use std::thread;
use std::time::Duration;
mod common;

#[test]
fn test_reflector_bounces_bus_traffic() -> Result<(), Error> {
  common::setup_tracing();
  let hub = Socket::new_raw(Protocol::Bus0)?;
  let url = common::unique_inproc_endpoint();
  hub.listen(&url)?;

  let sender = Socket::new(Protocol::Bus0)?;
  let receiver = Socket::new(Protocol::Bus0)?;
  sender.set_option(RECV_TIMEOUT, Duration::from_millis(100))?;
  receiver.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;
  sender.dial(&url)?;
  receiver.dial(&url)?;
  common::wait_for_pipes(&hub, 2);

  let reflector = hub.clone();
  let worker = thread::spawn(move || device(&reflector, None));

  sender.send(b"echo")?;
  assert_eq!(receiver.recv()?, b"echo");
  // Never reflected back to where it came from.
  assert_eq!(sender.recv().unwrap_err(), Error::Timeout);

  hub.close()?;
  let stopped = worker.join().expect("device thread panicked");
  assert_eq!(stopped.unwrap_err(), Error::Closed);

  sender.close()?;
  receiver.close()?;
  Ok(())
}

#[test]
fn test_forwarding_device_relays_requests() -> Result<(), Error> {
  common::setup_tracing();
  let front = Socket::new_raw(Protocol::Rep0)?;
  let back = Socket::new_raw(Protocol::Req0)?;
  let front_url = common::unique_inproc_endpoint();
  let back_url = common::unique_inproc_endpoint();
  front.listen(&front_url)?;
  back.listen(&back_url)?;

  let (dev_front, dev_back) = (front.clone(), back.clone());
  let worker = thread::spawn(move || device(&dev_front, Some(&dev_back)));

  let server = Socket::new(Protocol::Rep0)?;
  server.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;
  server.dial(&back_url)?;
  let client = Socket::new(Protocol::Req0)?;
  client.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;
  client.dial(&front_url)?;
  common::wait_for_pipes(&back, 1);

  client.send(b"ask")?;
  assert_eq!(server.recv()?, b"ask");
  server.send(b"answer")?;
  assert_eq!(client.recv()?, b"answer");

  front.close()?;
  assert!(worker.join().expect("device thread panicked").is_err());
  back.close()?;
  client.close()?;
  server.close()?;
  Ok(())
}

#[test]
fn test_device_rejects_mismatched_sockets() -> Result<(), Error> {
  common::setup_tracing();
  let cooked = Socket::new(Protocol::Pair1)?;
  assert!(device(&cooked, None).is_err());

  let raw_push = Socket::new_raw(Protocol::Push0)?;
  let raw_sub = Socket::new_raw(Protocol::Sub0)?;
  assert!(device(&raw_push, Some(&raw_sub)).is_err());
  assert!(device(&raw_push, None).is_err());

  cooked.close()?;
  raw_push.close()?;
  raw_sub.close()?;
  Ok(())
}
