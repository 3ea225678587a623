// src/transport/tcp.rs

use crate::error::Errno;
use crate::socket::options::TransportOptions;
use crate::transport::Family;

use socket2::SockRef;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};

fn family_matches(addr: &SocketAddr, family: Family) -> bool {
  match family {
    Family::Any => true,
    Family::V4 => addr.is_ipv4(),
    Family::V6 => addr.is_ipv6(),
  }
}

/// Resolves `host:port` to one address of the requested family. `*` and the
/// empty host mean the wildcard address, which is only valid for binding.
async fn resolve(host: &str, port: u16, family: Family, passive: bool) -> Result<SocketAddr, Errno> {
  if host.is_empty() || host == "*" {
    if !passive {
      return Err(Errno::EADDRINVAL);
    }
    let ip = match family {
      Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
      _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    };
    return Ok(SocketAddr::new(ip, port));
  }

  if let Ok(ip) = host.parse::<IpAddr>() {
    let addr = SocketAddr::new(ip, port);
    return if family_matches(&addr, family) {
      Ok(addr)
    } else {
      Err(Errno::EADDRINVAL)
    };
  }

  let mut candidates = tokio::net::lookup_host((host, port)).await.map_err(|e| {
    tracing::debug!(host = %host, error = %e, "Host lookup failed");
    Errno::EADDRINVAL
  })?;
  candidates.find(|a| family_matches(a, family)).ok_or(Errno::EADDRINVAL)
}

pub(crate) async fn connect(host: &str, port: u16, family: Family) -> Result<TcpStream, Errno> {
  let addr = resolve(host, port, family, false).await?;
  tracing::trace!(%addr, "TCP connect");
  TcpStream::connect(addr).await.map_err(|e| Errno::from_io(&e))
}

pub(crate) async fn bind(host: &str, port: u16, family: Family) -> Result<TcpListener, Errno> {
  let addr = resolve(host, port, family, true).await?;
  let std_listener = std::net::TcpListener::bind(addr).map_err(|e| Errno::from_io(&e))?;
  std_listener.set_nonblocking(true).map_err(|e| Errno::from_io(&e))?;
  let listener = TcpListener::from_std(std_listener).map_err(|e| Errno::from_io(&e))?;
  if let Ok(local) = listener.local_addr() {
    tracing::debug!(%local, "TCP listener bound");
  }
  Ok(listener)
}

/// Applies per-connection socket options. Failures are logged, not fatal.
pub(crate) fn configure(stream: &TcpStream, opts: &TransportOptions) {
  if let Err(e) = stream.set_nodelay(opts.tcp_nodelay) {
    tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
  }
  if let Err(e) = SockRef::from(stream).set_keepalive(opts.tcp_keepalive) {
    tracing::warn!(error = %e, "Failed to set SO_KEEPALIVE");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn wildcard_only_for_bind() {
    assert_eq!(resolve("*", 0, Family::Any, false).await, Err(Errno::EADDRINVAL));
    let addr = resolve("*", 80, Family::V6, true).await.unwrap();
    assert!(addr.is_ipv6());
  }

  #[tokio::test]
  async fn literal_must_match_family() {
    assert_eq!(resolve("127.0.0.1", 1, Family::V6, false).await, Err(Errno::EADDRINVAL));
    assert!(resolve("127.0.0.1", 1, Family::V4, false).await.is_ok());
  }

  #[tokio::test]
  async fn bind_port_zero_picks_a_port() {
    let listener = bind("127.0.0.1", 0, Family::Any).await.unwrap();
    assert_ne!(listener.local_addr().unwrap().port(), 0);
  }
}
