// tests/survey.rs

use rnng::options::{RECV_TIMEOUT, SURVEYOR_SURVEY_TIME};
use rnng::{Context, Error, Protocol, Socket};
use std::time::Duration;
mod common;

#[test]
fn test_survey_collects_responses_then_times_out() -> Result<(), Error> {
  common::setup_tracing();
  let surveyor = Socket::new(Protocol::Surveyor0)?;
  surveyor.set_option(SURVEYOR_SURVEY_TIME, Duration::from_millis(300))?;
  let url = common::unique_inproc_endpoint();
  surveyor.listen(&url)?;

  let respondents = (0..2)
    .map(|_| -> Result<Socket, Error> {
      let resp = Socket::new(Protocol::Respondent0)?;
      resp.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;
      resp.dial(&url)?;
      Ok(resp)
    })
    .collect::<Result<Vec<_>, _>>()?;
  common::wait_for_pipes(&surveyor, 2);

  surveyor.send(b"who?")?;
  for (i, resp) in respondents.iter().enumerate() {
    assert_eq!(resp.recv()?, b"who?");
    resp.send(format!("me{}", i).as_bytes())?;
  }

  let mut answers = vec![surveyor.recv()?, surveyor.recv()?];
  answers.sort();
  assert_eq!(answers, vec![b"me0".to_vec(), b"me1".to_vec()]);

  // The survey window closes; after that there is no survey to answer.
  assert_eq!(surveyor.recv().unwrap_err(), Error::Timeout);
  assert_eq!(surveyor.recv().unwrap_err(), Error::InvalidState);

  for resp in respondents {
    resp.close()?;
  }
  surveyor.close()?;
  Ok(())
}

#[test]
fn test_late_response_is_dropped() -> Result<(), Error> {
  common::setup_tracing();
  let surveyor = Socket::new(Protocol::Surveyor0)?;
  surveyor.set_option(SURVEYOR_SURVEY_TIME, Duration::from_millis(300))?;
  let resp = Socket::new(Protocol::Respondent0)?;
  resp.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;
  let url = common::unique_inproc_endpoint();
  surveyor.listen(&url)?;
  resp.dial(&url)?;
  common::wait_for_pipes(&surveyor, 1);

  let early = Context::open(&resp)?;
  early.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;

  surveyor.send(b"first")?;
  assert_eq!(early.recv()?, b"first");
  surveyor.send(b"second")?;
  assert_eq!(resp.recv()?, b"second");

  // The answer to the superseded survey never reaches the surveyor.
  early.send(b"answer-first")?;
  resp.send(b"answer-second")?;
  assert_eq!(surveyor.recv()?, b"answer-second");
  assert_eq!(surveyor.recv().unwrap_err(), Error::Timeout);

  early.close()?;
  resp.close()?;
  surveyor.close()?;
  Ok(())
}

#[test]
fn test_surveyor_contexts_run_independent_surveys() -> Result<(), Error> {
  common::setup_tracing();
  let surveyor = Socket::new(Protocol::Surveyor0)?;
  let resp = Socket::new(Protocol::Respondent0)?;
  resp.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;
  let url = common::unique_inproc_endpoint();
  surveyor.listen(&url)?;
  resp.dial(&url)?;
  common::wait_for_pipes(&surveyor, 1);

  let a = Context::open(&surveyor)?;
  let b = Context::open(&surveyor)?;
  a.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;
  b.set_option(RECV_TIMEOUT, common::LONG_TIMEOUT)?;

  a.send(b"q-a")?;
  b.send(b"q-b")?;
  for _ in 0..2 {
    let question = resp.recv()?;
    resp.send(&[b"ans:".as_slice(), question.as_slice()].concat())?;
  }

  assert_eq!(b.recv()?, b"ans:q-b");
  assert_eq!(a.recv()?, b"ans:q-a");

  a.close()?;
  b.close()?;
  resp.close()?;
  surveyor.close()?;
  Ok(())
}
