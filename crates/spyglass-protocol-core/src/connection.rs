use crate::codec::{read_varint, varint_len, write_varint};
use anyhow::{anyhow, Result};
use bytes::{Buf, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read as _, Write as _};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

const READ_CHUNK: usize = 4096;

/// Frame codec state shared by both halves of a connection: length
/// prefixing plus optional zlib compression above the negotiated
/// threshold.
#[derive(Debug, Clone, Copy, Default)]
struct Framing {
    compression_threshold: Option<i32>,
}

impl Framing {
    /// Try to slice one complete frame out of the read buffer.
    /// Returns `(packet_id, payload)`, or `None` if more bytes are needed.
    fn try_decode(&self, read_buf: &mut BytesMut) -> Result<Option<(i32, BytesMut)>> {
        if read_buf.is_empty() {
            return Ok(None);
        }

        // Peek the length prefix without consuming, in case the frame is
        // still incomplete.
        let mut peek = read_buf.clone();
        let frame_len = match read_varint(&mut peek) {
            Ok(len) => len as usize,
            Err(_) => return Ok(None),
        };
        if peek.remaining() < frame_len {
            return Ok(None);
        }

        let prefix_len = read_buf.len() - peek.len();
        read_buf.advance(prefix_len);
        let mut frame = read_buf.split_to(frame_len);

        if self.compression_threshold.is_some() {
            let uncompressed_len = read_varint(&mut frame)? as usize;
            if uncompressed_len > 0 {
                let mut inflated = vec![0u8; uncompressed_len];
                ZlibDecoder::new(&frame[..]).read_exact(&mut inflated)?;
                frame = BytesMut::from(&inflated[..]);
            }
        }

        let packet_id = read_varint(&mut frame)?;
        trace!("Read packet id=0x{:02X} len={}", packet_id, frame.len());
        Ok(Some((packet_id, frame)))
    }

    /// Build one wire frame for `packet_id` + `payload`.
    fn encode(&self, packet_id: i32, payload: &[u8]) -> Result<BytesMut> {
        let mut body = BytesMut::with_capacity(varint_len(packet_id) + payload.len());
        write_varint(&mut body, packet_id);
        body.extend_from_slice(payload);

        let mut frame = BytesMut::new();
        match self.compression_threshold {
            Some(threshold) if body.len() as i32 >= threshold => {
                let uncompressed_len = body.len() as i32;
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&body)?;
                let deflated = encoder.finish()?;

                write_varint(
                    &mut frame,
                    (varint_len(uncompressed_len) + deflated.len()) as i32,
                );
                write_varint(&mut frame, uncompressed_len);
                frame.extend_from_slice(&deflated);
            }
            Some(_) => {
                // Below threshold: data-length 0 marks an uncompressed body.
                write_varint(&mut frame, (1 + body.len()) as i32);
                write_varint(&mut frame, 0);
                frame.extend_from_slice(&body);
            }
            None => {
                write_varint(&mut frame, body.len() as i32);
                frame.extend_from_slice(&body);
            }
        }
        Ok(frame)
    }
}

async fn fill_buf(stream: &mut (impl AsyncReadExt + Unpin), read_buf: &mut BytesMut) -> Result<()> {
    let mut tmp = [0u8; READ_CHUNK];
    let n = stream.read(&mut tmp).await?;
    if n == 0 {
        return Err(anyhow!("Connection closed"));
    }
    read_buf.extend_from_slice(&tmp[..n]);
    Ok(())
}

/// A framed protocol connection with optional compression.
pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    framing: Framing,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            framing: Framing::default(),
        }
    }

    /// Enable zlib compression with the given threshold. Must happen
    /// before the connection is split.
    pub fn enable_compression(&mut self, threshold: i32) {
        self.framing.compression_threshold = Some(threshold);
    }

    /// Read a single packet frame, returning (packet_id, payload).
    pub async fn read_packet(&mut self) -> Result<(i32, BytesMut)> {
        loop {
            if let Some(frame) = self.framing.try_decode(&mut self.read_buf)? {
                return Ok(frame);
            }
            fill_buf(&mut self.stream, &mut self.read_buf).await?;
        }
    }

    /// Write a packet with the given ID and payload.
    pub async fn write_packet(&mut self, packet_id: i32, payload: &[u8]) -> Result<()> {
        let frame = self.framing.encode(packet_id, payload)?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    /// Split into read and write halves for concurrent I/O. Framing state
    /// is copied into each half.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            ConnectionReader {
                stream: read_half,
                read_buf: self.read_buf,
                framing: self.framing,
            },
            ConnectionWriter {
                stream: write_half,
                framing: self.framing,
            },
        )
    }
}

/// Read half of a split connection.
pub struct ConnectionReader {
    stream: OwnedReadHalf,
    read_buf: BytesMut,
    framing: Framing,
}

impl ConnectionReader {
    pub async fn read_packet(&mut self) -> Result<(i32, BytesMut)> {
        loop {
            if let Some(frame) = self.framing.try_decode(&mut self.read_buf)? {
                return Ok(frame);
            }
            fill_buf(&mut self.stream, &mut self.read_buf).await?;
        }
    }
}

/// Write half of a split connection.
pub struct ConnectionWriter {
    stream: OwnedWriteHalf,
    framing: Framing,
}

impl ConnectionWriter {
    pub async fn write_packet(&mut self, packet_id: i32, payload: &[u8]) -> Result<()> {
        let frame = self.framing.encode(packet_id, payload)?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip_uncompressed() {
        let framing = Framing::default();
        let frame = framing.encode(0x05, &[1, 2, 3]).unwrap();
        let mut buf = BytesMut::from(&frame[..]);
        let (id, payload) = framing.try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(id, 0x05);
        assert_eq!(&payload[..], &[1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_roundtrip_compressed() {
        let framing = Framing {
            compression_threshold: Some(16),
        };
        let payload = vec![7u8; 512];
        let frame = framing.encode(0x20, &payload).unwrap();
        // 512 repeated bytes deflate well below the raw size.
        assert!(frame.len() < payload.len());

        let mut buf = BytesMut::from(&frame[..]);
        let (id, decoded) = framing.try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(id, 0x20);
        assert_eq!(&decoded[..], &payload[..]);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let framing = Framing::default();
        let frame = framing.encode(0x01, &[9; 32]).unwrap();

        let mut buf = BytesMut::from(&frame[..frame.len() - 1]);
        assert!(framing.try_decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[frame.len() - 1..]);
        let (id, payload) = framing.try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(id, 0x01);
        assert_eq!(payload.len(), 32);
    }

    #[test]
    fn test_below_threshold_stays_uncompressed() {
        let framing = Framing {
            compression_threshold: Some(256),
        };
        let frame = framing.encode(0x02, b"tiny").unwrap();
        let mut buf = BytesMut::from(&frame[..]);
        let (id, payload) = framing.try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(id, 0x02);
        assert_eq!(&payload[..], b"tiny");
    }
}
