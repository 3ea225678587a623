// tests/dispatch.rs

use rnng::{open_socket, Error, OptionValue, Protocol};
use serial_test::serial;
mod common;

#[test]
#[serial]
fn test_every_protocol_opens_by_name() -> Result<(), Error> {
  common::setup_tracing();
  for protocol in Protocol::ALL {
    for raw in [false, true] {
      let socket = open_socket(protocol.name(), raw)?;
      assert_eq!(socket.protocol()?, protocol);
      assert_eq!(socket.is_raw()?, raw);
      assert_eq!(socket.get_option(rnng::options::PROTOCOL_NAME)?, OptionValue::String(protocol.name().into()));
      socket.close()?;
    }
  }
  Ok(())
}

#[test]
#[serial]
fn test_unversioned_aliases_pick_latest() -> Result<(), Error> {
  common::setup_tracing();
  let pair = open_socket("pair", false)?;
  assert_eq!(pair.protocol()?, Protocol::Pair1);
  let pair0 = open_socket("pair0", false)?;
  assert_eq!(pair0.protocol()?, Protocol::Pair0);
  let sub = open_socket("sub0", false)?;
  assert_eq!(sub.protocol()?.peer(), Protocol::Pub0);
  pair.close()?;
  pair0.close()?;
  sub.close()?;
  Ok(())
}

#[test]
#[serial]
fn test_unknown_protocol_opens_nothing() -> Result<(), Error> {
  common::setup_tracing();
  let before = rnng::socket_count();
  let err = open_socket("nosuchproto", false).unwrap_err();
  assert_eq!(err, Error::UnknownProtocol("nosuchproto".into()));
  assert_eq!(err.category(), rnng::ErrorCategory::Request);
  assert_eq!(rnng::socket_count(), before);
  Ok(())
}

#[test]
#[serial]
fn test_socket_count_tracks_open_and_close() -> Result<(), Error> {
  common::setup_tracing();
  let before = rnng::socket_count();
  let a = open_socket("bus", false)?;
  let b = open_socket("bus", true)?;
  assert_eq!(rnng::socket_count(), before + 2);
  a.close()?;
  assert_eq!(rnng::socket_count(), before + 1);
  b.close()?;
  assert_eq!(rnng::socket_count(), before);
  Ok(())
}
