//! Stream-level framing: one reader decodes envelopes, one writer task drains queued frames.

use bytes::Bytes;
use daisy_proto::{decode_envelope, encode_frame, Envelope, LENGTH_PREFIX_BYTES};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use crate::TransportError;

pub(crate) const PEER_CLOSED: &str = "connection closed by peer";

/// Encode `envelope` into a complete frame ready for the writer queue.
pub fn encode(envelope: &Envelope) -> Result<Bytes, TransportError> {
    Ok(Bytes::from(encode_frame(envelope)?))
}

/// Read exactly one frame and decode its envelope.
///
/// A clean end of stream before the first prefix byte is an `Io` error; a stream that ends
/// anywhere inside a frame, or a body that does not decode, is a `Protocol` error.
pub async fn read_envelope<R: AsyncRead + Unpin>(r: &mut R) -> Result<Envelope, TransportError> {
    let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
    match read_full(r, &mut prefix).await? {
        0 => {
            return Err(TransportError::Io {
                message: PEER_CLOSED.to_string(),
            })
        }
        LENGTH_PREFIX_BYTES => {}
        n => {
            return Err(TransportError::Protocol {
                message: format!("truncated length prefix: got {n} of {LENGTH_PREFIX_BYTES} bytes"),
            })
        }
    }

    // The prefix caps the body at 64 KiB, so this allocation is bounded.
    let len = u16::from_be_bytes(prefix) as usize;
    let mut body = vec![0u8; len];
    let read = read_full(r, &mut body).await?;
    if read < len {
        return Err(TransportError::Protocol {
            message: format!("truncated frame: expected {len} bytes, got {read}"),
        });
    }

    decode_envelope(&body).map_err(|err| TransportError::Protocol {
        message: err.to_string(),
    })
}

async fn read_full<R: AsyncRead + Unpin>(
    r: &mut R,
    buf: &mut [u8],
) -> Result<usize, TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Drain `rx` into `w` until shutdown is signalled or every sender is gone.
///
/// Each frame is written and flushed whole, so frames never interleave on the wire. A write
/// stalled on a peer that stopped reading is abandoned as soon as shutdown is signalled.
pub(crate) async fn write_loop<W: AsyncWrite + Unpin>(
    w: &mut W,
    rx: &mut mpsc::Receiver<Bytes>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<(), TransportError> {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
            frame = rx.recv() => {
                let Some(frame) = frame else { return Ok(()); };
                let write = async {
                    w.write_all(&frame).await?;
                    w.flush().await
                };
                tokio::select! {
                    written = write => written?,
                    _ = shutdown_rx.changed() => return Ok(()),
                }
            }
        }
    }
}
