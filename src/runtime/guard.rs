// src/runtime/guard.rs

use crate::error::Errno;

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The conditions that end a pending operation early.
///
/// Every blocking engine step selects on [`OpGuard::interrupted`] alongside
/// its real work: the owning object closing yields `ECLOSED`, an explicit
/// cancel yields `ECANCELED` and the deadline yields `ETIMEDOUT`.
#[derive(Debug, Clone)]
pub(crate) struct OpGuard {
  closed: CancellationToken,
  cancel: Option<CancellationToken>,
  deadline: Option<Instant>,
}

impl OpGuard {
  pub(crate) fn new(closed: CancellationToken) -> Self {
    Self {
      closed,
      cancel: None,
      deadline: None,
    }
  }

  pub(crate) fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = Some(cancel);
    self
  }

  /// `None` waits forever; a zero duration only succeeds if the operation
  /// can complete without waiting.
  pub(crate) fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.deadline = timeout.map(|t| Instant::now() + t);
    self
  }

  pub(crate) fn nonblocking(mut self) -> Self {
    self.deadline = Some(Instant::now());
    self
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.closed.is_cancelled()
  }

  /// Resolves once the operation must stop, with the reason.
  pub(crate) async fn interrupted(&self) -> Errno {
    let cancel = async {
      match &self.cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
      }
    };
    let deadline = async {
      match self.deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
      }
    };
    tokio::select! {
      biased;
      _ = self.closed.cancelled() => Errno::ECLOSED,
      _ = cancel => Errno::ECANCELED,
      _ = deadline => Errno::ETIMEDOUT,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn reports_the_first_reason() {
    let closed = CancellationToken::new();
    let cancel = CancellationToken::new();
    let guard = OpGuard::new(closed.clone()).with_cancel(cancel.clone());
    cancel.cancel();
    assert_eq!(guard.interrupted().await, Errno::ECANCELED);
    closed.cancel();
    assert_eq!(guard.interrupted().await, Errno::ECLOSED);
  }

  #[tokio::test]
  async fn deadline_expires() {
    let guard = OpGuard::new(CancellationToken::new()).with_timeout(Some(Duration::from_millis(10)));
    assert_eq!(guard.interrupted().await, Errno::ETIMEDOUT);
    let guard = OpGuard::new(CancellationToken::new()).nonblocking();
    assert_eq!(guard.interrupted().await, Errno::ETIMEDOUT);
  }
}
