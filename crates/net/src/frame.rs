//! Relay wire framing
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! JSON. Lengths of zero or above [`MAX_FRAME_SIZE`] are protocol errors.
//! A stream that ends between frames is a clean close; one that ends inside
//! a frame is not.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::Message;

/// Largest accepted frame body (1 MiB)
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Body length announced by a header, if acceptable
fn body_len(header: [u8; HEADER_LEN]) -> Result<usize> {
    match u32::from_be_bytes(header) {
        0 => Err(Error::Protocol("Empty frame".into())),
        len if len > MAX_FRAME_SIZE => Err(Error::Protocol(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        ))),
        len => Ok(len as usize),
    }
}

fn truncated(e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        Error::Protocol("Stream ended inside a frame".into())
    } else {
        Error::Io(e)
    }
}

/// Header and body in one buffer, so a frame goes out in a single write
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>> {
    let body = msg
        .to_bytes()
        .map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            Error::Protocol(format!(
                "Message too large: {} bytes (max {})",
                body.len(),
                MAX_FRAME_SIZE
            ))
        })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Read the next message
///
/// Returns [`Error::ConnectionClosed`] only when the stream ends on a frame
/// boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut header = [0u8; HEADER_LEN];
    header[0] = match reader.read_u8().await {
        Ok(byte) => byte,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(Error::ConnectionClosed),
        Err(e) => return Err(Error::Io(e)),
    };
    reader.read_exact(&mut header[1..]).await.map_err(truncated)?;

    let mut body = vec![0u8; body_len(header)?];
    reader.read_exact(&mut body).await.map_err(truncated)?;

    Message::from_bytes(&body).map_err(|e| Error::Protocol(format!("Invalid JSON: {}", e)))
}

/// Write one message and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> Result<()> {
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frames_read_back_in_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Message::Ping).await.unwrap();
        write_frame(&mut buf, &Message::Pong).await.unwrap();

        let mut cursor = Cursor::new(buf);
        assert!(matches!(read_frame(&mut cursor).await.unwrap(), Message::Ping));
        assert!(matches!(read_frame(&mut cursor).await.unwrap(), Message::Pong));
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_header_announces_body_length() {
        let frame = encode_frame(&Message::ServerShutdown).unwrap();
        let header: [u8; HEADER_LEN] = frame[..HEADER_LEN].try_into().unwrap();
        assert_eq!(body_len(header).unwrap(), frame.len() - HEADER_LEN);
    }

    #[tokio::test]
    async fn test_bad_lengths_rejected() {
        let mut empty = Cursor::new(vec![0, 0, 0, 0]);
        assert!(matches!(
            read_frame(&mut empty).await,
            Err(Error::Protocol(_))
        ));

        let mut oversized = Cursor::new((MAX_FRAME_SIZE + 1).to_be_bytes().to_vec());
        assert!(matches!(
            read_frame(&mut oversized).await,
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_payload_not_encoded() {
        let msg = Message::Data {
            topic: Some("big".into()),
            payload: vec![7u8; MAX_FRAME_SIZE as usize],
            reliable: true,
            from: None,
        };
        assert!(encode_frame(&msg).is_err());
    }

    #[tokio::test]
    async fn test_stream_ending_inside_frame_is_protocol_error() {
        let mut frame = encode_frame(&Message::Pong).unwrap();
        frame.truncate(frame.len() - 1);
        let mut cursor = Cursor::new(frame);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::Protocol(_))
        ));

        let mut half_header = Cursor::new(vec![0, 0]);
        assert!(matches!(
            read_frame(&mut half_header).await,
            Err(Error::Protocol(_))
        ));
    }
}
