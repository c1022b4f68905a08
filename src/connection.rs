use bytes::BytesMut;
use futures::SinkExt;
use std::io;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, FramedWrite};
use uuid::Uuid;

use crate::codec::{CodecError, FrameCodec};
use crate::frame::Frame;

pub struct Connection {
    pub id: Uuid,
    reader: OwnedReadHalf,
    // Data is read from the socket into the read buffer. When a frame is parsed, the corresponding
    // data is removed from the buffer.
    buffer: BytesMut,
    decoder: FrameCodec,
    writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Connection {
        Connection::with_max_frame_size(stream, crate::codec::DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(stream: TcpStream, max_frame_size: usize) -> Connection {
        let (reader, writer) = stream.into_split();

        Connection {
            id: Uuid::new_v4(),
            reader,
            // Allocate the buffer with 4kb of capacity.
            buffer: BytesMut::with_capacity(4096),
            decoder: FrameCodec::new(max_frame_size),
            writer: FramedWrite::new(writer, FrameCodec::new(max_frame_size)),
        }
    }

    /// Reads a single frame, waiting for more data while the buffered bytes don't hold a whole
    /// one.
    ///
    /// Returns `None` when the peer closed the stream between frames. A malformed frame is
    /// returned as `CodecError::Frame` with its bytes already skipped, so the caller may keep
    /// reading from the same connection.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }

            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }

                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection reset by peer",
                )
                .into());
            }
        }
    }

    /// Encodes and flushes a frame. If the frame can't be encoded nothing is written.
    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), CodecError> {
        self.writer.send(frame).await
    }
}
