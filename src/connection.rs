//! Framing for the inbound sensor wire protocol.
//!
//! Each frame is exactly [`FRAME_LEN`] bytes: a `u16` sensor id in network
//! byte order followed by an `f64` value in native byte order. The reader
//! accumulates socket data in an internal buffer and yields one frame at a
//! time; a peer that hangs up mid-frame is reported as an error, a peer
//! that hangs up on a frame boundary as a clean end of stream.

use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Size of one sensor frame on the wire.
pub const FRAME_LEN: usize = 10;

const READ_BUFFER_SIZE: usize = 256;

/// One decoded sensor frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorFrame {
    pub sensor_id: u16,
    pub value: f64,
}

/// Reads [`SensorFrame`] values from a byte stream.
#[derive(Debug)]
pub struct FrameReader<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S: AsyncRead + Unpin> FrameReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Read a single frame from the connection.
    ///
    /// Waits until a full frame has been buffered. Returns `None` when the
    /// stream ends on a frame boundary; ending mid-frame yields
    /// [`Error::TruncatedFrame`].
    pub async fn read_frame(&mut self) -> Result<Option<SensorFrame>> {
        loop {
            if let Some(frame) = self.parse_frame() {
                debug!(sensor_id = frame.sensor_id, "frame received");
                return Ok(Some(frame));
            }

            // Not enough buffered data for a frame; pull more from the
            // socket. `0` indicates end of stream.
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(Error::TruncatedFrame);
            }
        }
    }

    /// Decode one frame out of the buffer if enough bytes have arrived.
    fn parse_frame(&mut self) -> Option<SensorFrame> {
        if self.buffer.len() < FRAME_LEN {
            return None;
        }
        let sensor_id = self.buffer.get_u16();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.buffer[..8]);
        self.buffer.advance(8);
        // The reference wire format ships the value in the sender's native
        // byte order.
        let value = f64::from_ne_bytes(raw);
        Some(SensorFrame { sensor_id, value })
    }
}

/// Encode a frame exactly as sensors put it on the wire. Used by the
/// simulator binary and the tests.
pub fn encode_frame(sensor_id: u16, value: f64) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    out[..2].copy_from_slice(&sensor_id.to_be_bytes());
    out[2..].copy_from_slice(&value.to_ne_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn reads_a_single_frame() {
        let stream = tokio_test::io::Builder::new()
            .read(&encode_frame(7, 21.5))
            .build();
        let mut reader = FrameReader::new(stream);

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.sensor_id, 7);
        assert_eq!(frame.value, 21.5);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reassembles_a_frame_split_across_reads() {
        let bytes = encode_frame(42, -3.25);
        let stream = tokio_test::io::Builder::new()
            .read(&bytes[..3])
            .read(&bytes[3..])
            .build();
        let mut reader = FrameReader::new(stream);

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.sensor_id, 42);
        assert_eq!(frame.value, -3.25);
    }

    #[tokio::test]
    async fn yields_back_to_back_frames_from_one_read() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode_frame(1, 20.0));
        bytes.extend_from_slice(&encode_frame(2, 25.0));
        let stream = tokio_test::io::Builder::new().read(&bytes).build();
        let mut reader = FrameReader::new(stream);

        assert_eq!(reader.read_frame().await.unwrap().unwrap().sensor_id, 1);
        assert_eq!(reader.read_frame().await.unwrap().unwrap().sensor_id, 2);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_an_error() {
        let bytes = encode_frame(7, 21.5);
        let stream = tokio_test::io::Builder::new().read(&bytes[..6]).build();
        let mut reader = FrameReader::new(stream);

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, Error::TruncatedFrame));
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let stream = tokio_test::io::Builder::new().build();
        let mut reader = FrameReader::new(stream);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[test]
    fn sensor_id_is_big_endian_on_the_wire() {
        let bytes = encode_frame(0x0102, 0.0);
        assert_eq!(&bytes[..2], &[0x01, 0x02]);
    }
}
