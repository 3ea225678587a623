// src/transport/ipc.rs

#![cfg(all(unix, feature = "ipc"))]

use crate::error::Errno;

use std::io;
use std::path::Path;
use tokio::net::{UnixListener, UnixStream};

/// Binds a unix socket at `path`. A leftover socket file nobody listens on
/// is removed first; a live one is `EADDRINUSE`.
pub(crate) fn bind(path: &Path) -> Result<UnixListener, Errno> {
  if path.exists() {
    match std::os::unix::net::UnixStream::connect(path) {
      Ok(_) => {
        tracing::debug!(path = ?path, "IPC path already has a live listener");
        return Err(Errno::EADDRINUSE);
      }
      Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
        tracing::debug!(path = ?path, "Reclaiming stale IPC socket file");
        remove_socket_file(path);
      }
      Err(e) => return Err(Errno::from_io(&e)),
    }
  }
  let listener = UnixListener::bind(path).map_err(|e| Errno::from_io(&e))?;
  tracing::debug!(path = ?path, "IPC listener bound");
  Ok(listener)
}

pub(crate) async fn connect(path: &Path) -> Result<UnixStream, Errno> {
  UnixStream::connect(path).await.map_err(|e| match e.kind() {
    io::ErrorKind::NotFound => Errno::ECONNREFUSED,
    _ => Errno::from_io(&e),
  })
}

pub(crate) fn remove_socket_file(path: &Path) {
  match std::fs::remove_file(path) {
    Ok(()) => tracing::trace!(path = ?path, "Removed IPC socket file"),
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to remove IPC socket file"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn temp_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("rnng-ipc-unit-{}-{}.sock", tag, std::process::id()))
  }

  #[tokio::test]
  async fn stale_file_is_reclaimed() {
    let path = temp_path("stale");
    remove_socket_file(&path);
    // A socket file whose listener is gone.
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
    assert!(path.exists());
    let listener = bind(&path).unwrap();
    drop(listener);
    remove_socket_file(&path);
  }

  #[tokio::test]
  async fn live_listener_is_in_use() {
    let path = temp_path("live");
    remove_socket_file(&path);
    let _listener = bind(&path).unwrap();
    assert_eq!(bind(&path).unwrap_err(), Errno::EADDRINUSE);
    remove_socket_file(&path);
  }

  #[tokio::test]
  async fn missing_path_is_refused() {
    let path = temp_path("missing");
    remove_socket_file(&path);
    assert_eq!(connect(&path).await.unwrap_err(), Errno::ECONNREFUSED);
  }
}
