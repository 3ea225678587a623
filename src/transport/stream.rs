// src/transport/stream.rs

//! Framing shared by the byte-stream transports (TCP, IPC).
//!
//! A connection opens with an 8-byte header from each side:
//! `00 'S' 'P' 00 proto_hi proto_lo 00 00`. After that every message is a
//! 64-bit big-endian length followed by the message's header and body.

use crate::error::Errno;
use crate::message::Message;
use crate::socket::options::TransportOptions;
use crate::transport::Link;

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const LENGTH_FIELD_BYTES: usize = 8;

pub(crate) fn handshake_header(protocol: u16) -> [u8; 8] {
  let [hi, lo] = protocol.to_be_bytes();
  [0, b'S', b'P', 0, hi, lo, 0, 0]
}

/// Validates a peer header and returns the peer's protocol id.
pub(crate) fn parse_handshake(header: &[u8; 8]) -> Result<u16, Errno> {
  if header[..4] != [0, b'S', b'P', 0] || header[6..] != [0, 0] {
    return Err(Errno::EPROTO);
  }
  Ok(u16::from_be_bytes([header[4], header[5]]))
}

async fn handshake<S>(stream: &mut S, protocol: u16) -> Result<u16, Errno>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  stream
    .write_all(&handshake_header(protocol))
    .await
    .map_err(|e| Errno::from_io(&e))?;
  let mut peer = [0u8; 8];
  stream.read_exact(&mut peer).await.map_err(|e| Errno::from_io(&e))?;
  parse_handshake(&peer)
}

fn codec(max_frame: usize) -> LengthDelimitedCodec {
  LengthDelimitedCodec::builder()
    .length_field_length(LENGTH_FIELD_BYTES)
    .max_frame_length(max_frame)
    .new_codec()
}

/// Runs the handshake and starts the reader and writer tasks.
pub(crate) async fn establish<S>(mut stream: S, protocol: u16, opts: &TransportOptions, buffer: usize) -> Result<Link, Errno>
where
  S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
  let peer = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&mut stream, protocol))
    .await
    .map_err(|_| Errno::ETIMEDOUT)??;
  tracing::trace!(protocol, peer, "Stream handshake complete");

  let (read_half, write_half) = tokio::io::split(stream);
  let mut reader = FramedRead::new(read_half, codec(opts.max_frame()));
  let mut writer = FramedWrite::new(write_half, codec(usize::MAX));

  let (in_tx, in_rx) = async_channel::bounded::<Message>(buffer.max(1));
  let (out_tx, out_rx) = async_channel::bounded::<Message>(buffer.max(1));
  let closed = CancellationToken::new();

  let reader_closed = closed.clone();
  tokio::spawn(async move {
    loop {
      tokio::select! {
        biased;
        _ = reader_closed.cancelled() => break,
        frame = reader.next() => match frame {
          Some(Ok(frame)) => {
            if in_tx.send(Message::from(frame)).await.is_err() {
              break;
            }
          }
          Some(Err(e)) => {
            tracing::debug!(error = %e, "Stream read failed, closing connection");
            break;
          }
          None => break,
        },
      }
    }
    // Remote EOF only ends the inbound side; frames already queued stay
    // readable until the owner closes the pipe.
    in_tx.close();
  });

  let writer_closed = closed.clone();
  tokio::spawn(async move {
    loop {
      tokio::select! {
        biased;
        _ = writer_closed.cancelled() => break,
        next = out_rx.recv() => match next {
          Ok(mut msg) => {
            msg.flatten();
            if let Err(e) = writer.send(msg.into_body()).await {
              tracing::debug!(error = %e, "Stream write failed, closing connection");
              break;
            }
          }
          Err(_) => break,
        },
      }
    }
    writer_closed.cancel();
    out_rx.close();
    let _ = writer.get_mut().shutdown().await;
  });

  Ok(Link {
    tx: out_tx,
    rx: in_rx,
    peer,
    closed,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn handshake_header_layout() {
    assert_eq!(handshake_header(0x0031), [0, b'S', b'P', 0, 0x00, 0x31, 0, 0]);
    assert_eq!(parse_handshake(&handshake_header(0x0063)), Ok(0x0063));
  }

  #[test]
  fn bad_handshake_is_protocol_error() {
    assert_eq!(parse_handshake(b"GET / HT"), Err(Errno::EPROTO));
    assert_eq!(parse_handshake(&[0, b'S', b'P', 0, 0, 0x10, 1, 0]), Err(Errno::EPROTO));
  }

  #[tokio::test]
  async fn frames_round_trip_over_a_duplex() {
    let (a, b) = tokio::io::duplex(4096);
    let opts = TransportOptions::default();
    let (left, right) = tokio::join!(establish(a, 0x10, &opts, 4), establish(b, 0x10, &opts, 4));
    let (left, right) = (left.unwrap(), right.unwrap());
    assert_eq!(left.peer, 0x10);

    let mut msg = Message::from("body");
    msg.append_header(b"HD");
    left.tx.send(msg).await.unwrap();
    let got = right.rx.recv().await.unwrap();
    assert_eq!(got.header_len(), 0);
    assert_eq!(got.body(), b"HDbody");
  }

  #[tokio::test]
  async fn oversized_frame_closes_the_link() {
    let (a, b) = tokio::io::duplex(4096);
    let small = TransportOptions {
      recv_size_max: 8,
      ..TransportOptions::default()
    };
    let defaults = TransportOptions::default();
    let (left, right) = tokio::join!(
      establish(a, 0x10, &defaults, 4),
      establish(b, 0x10, &small, 4)
    );
    let (left, right) = (left.unwrap(), right.unwrap());
    left.tx.send(Message::from("far too long for the limit")).await.unwrap();
    assert!(right.rx.recv().await.is_err());
  }

  #[tokio::test]
  async fn frames_sent_before_eof_stay_readable() {
    let (a, b) = tokio::io::duplex(4096);
    let opts = TransportOptions::default();
    let (left, right) = tokio::join!(establish(a, 0x10, &opts, 4), establish(b, 0x10, &opts, 4));
    let (left, right) = (left.unwrap(), right.unwrap());
    for body in ["one", "two", "three"] {
      left.tx.send(Message::from(body)).await.unwrap();
    }
    // Closing the outbound channel flushes what is queued, then shuts the stream.
    left.tx.close();

    let mut bodies = Vec::new();
    while let Ok(msg) = right.rx.recv().await {
      bodies.push(msg.body().to_vec());
    }
    assert_eq!(bodies, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    assert!(!right.closed.is_cancelled());
  }
}
