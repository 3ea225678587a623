// src/device.rs

use crate::error::{Errno, Error, Result};
use crate::handle::ContextId;
use crate::protocol::Protocol;
use crate::runtime::OpGuard;
use crate::socket::core::SocketCore;
use crate::socket::Socket;

use std::sync::Arc;

/// Moves messages from `from` to `to` until either socket closes.
async fn forward(from: Arc<SocketCore>, to: Arc<SocketCore>) -> Errno {
  let recv_guard = OpGuard::new(from.closed_token().clone()).with_cancel(to.closed_token().clone());
  let send_guard = OpGuard::new(to.closed_token().clone()).with_cancel(from.closed_token().clone());
  loop {
    let msg = match from.recv(ContextId::UNBOUND, &recv_guard).await {
      Ok(msg) => msg,
      Err(errno) => return errno,
    };
    if let Err((errno, _)) = to.send(ContextId::UNBOUND, msg, &send_guard).await {
      return errno;
    }
  }
}

/// Forwards traffic between two raw sockets of peer protocols, or reflects
/// it back out of a single raw pair or bus socket when `b` is `None`.
///
/// Blocks until one of the sockets is closed and returns the error that
/// stopped it.
pub fn device(a: &Socket, b: Option<&Socket>) -> Result<()> {
  let (global, first) = a.core()?;
  let errno = match b {
    None => {
      let reflects = matches!(first.protocol, Protocol::Pair0 | Protocol::Pair1 | Protocol::Bus0);
      if !first.raw || !reflects {
        return Err(Errno::EINVAL.into());
      }
      tracing::debug!(socket_id = %first.id, "Starting reflector device");
      global.block_on(forward(first.clone(), first))?
    }
    Some(b) => {
      let (_, second) = b.core()?;
      if !first.raw || !second.raw || second.protocol != first.protocol.peer() {
        return Err(Errno::EINVAL.into());
      }
      tracing::debug!(front = %first.id, back = %second.id, "Starting forwarding device");
      global.block_on(async move {
        tokio::select! {
          errno = forward(first.clone(), second.clone()) => errno,
          errno = forward(second, first) => errno,
        }
      })?
    }
  };
  tracing::debug!(%errno, "Device stopped");
  Err(Error::from(errno))
}
