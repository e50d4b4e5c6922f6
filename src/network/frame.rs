//! Link wire frames
//!
//! Frame format on a stream connection:
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ length (u32) │ bincode-encoded LinkFrame    │
//! │ big endian   │ (length bytes)               │
//! └──────────────┴──────────────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::MAX_FRAME_LEN;
use crate::error::TransportError;
use crate::link::LinkMode;

/// One unit of traffic on a link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkFrame {
    /// First frame on every connection, sent by the connecting side
    Hello { node: String, mode: LinkMode },
    /// Control protocol line
    Text(String),
    /// Audio with the sender's receive signal strength
    Voice { rssi: u8, samples: Vec<i16> },
    /// Transmitter key indication
    Key,
    /// Transmitter unkey indication
    Unkey,
}

impl LinkFrame {
    pub fn text(line: impl Into<String>) -> Self {
        LinkFrame::Text(line.into())
    }
}

/// Encode a frame with its length prefix
pub fn encode(frame: &LinkFrame) -> Result<Bytes, TransportError> {
    let body = bincode::serialize(frame)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(body.len()));
    }
    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Decode a frame body (without length prefix)
pub fn decode(body: &[u8]) -> Result<LinkFrame, TransportError> {
    Ok(bincode::deserialize(body)?)
}

/// Write one frame to a stream
pub async fn write_frame<W>(writer: &mut W, frame: &LinkFrame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(frame)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Read one frame from a stream. `Ok(None)` on clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<LinkFrame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_framing() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, &LinkFrame::Hello {
            node: "2000".into(),
            mode: LinkMode::Transceive,
        })
        .await
        .unwrap();
        write_frame(&mut client, &LinkFrame::Voice {
            rssi: 200,
            samples: vec![0, -1, 32767],
        })
        .await
        .unwrap();
        drop(client);

        assert!(matches!(
            read_frame(&mut server).await.unwrap(),
            Some(LinkFrame::Hello { .. })
        ));
        assert_eq!(
            read_frame(&mut server).await.unwrap(),
            Some(LinkFrame::Voice {
                rssi: 200,
                samples: vec![0, -1, 32767]
            })
        );
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_oversized_length() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(MAX_FRAME_LEN as u32 + 1).await.unwrap();
        assert!(matches!(
            read_frame(&mut server).await,
            Err(TransportError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_encode_prefixes_length() {
        let bytes = encode(&LinkFrame::Key).unwrap();
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - 4);
    }
}
