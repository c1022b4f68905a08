use bytes::{Buf, BytesMut};
use std::io;
use std::io::Cursor;
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::frame::{self, Frame};

pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

#[derive(Debug, ThisError)]
pub enum CodecError {
    /// The underlying stream failed or was closed in the middle of a frame.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The bytes read so far are not a valid frame. The offending bytes were already dropped from
    /// the buffer, decoding can resume with the next frame.
    #[error(transparent)]
    Frame(#[from] frame::Error),
    #[error("frame size exceeds limit of {limit} bytes")]
    FrameTooLarge { limit: usize },
}

pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> FrameCodec {
        FrameCodec { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut cursor = Cursor::new(&src[..]);
        let res = Frame::parse(&mut cursor);
        let position = cursor.position() as usize;

        match res {
            Ok(frame) => {
                // Remove the parsed frame from the buffer.
                src.advance(position);
                Ok(Some(frame))
            }
            // Not enough data to parse a frame. Check the frame size to prevent DoS attacks.
            Err(frame::Error::Incomplete) if src.len() > self.max_frame_size => {
                Err(CodecError::FrameTooLarge {
                    limit: self.max_frame_size,
                })
            }
            Err(frame::Error::Incomplete) => {
                src.reserve(4096);
                Ok(None)
            }
            Err(err) => {
                debug!("Discarding {} bytes of malformed frame: {}", position, err);
                src.advance(position);
                Err(err.into())
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();

        // Never leave half an array in the write buffer.
        frame.encode(dst).map_err(|err| {
            dst.truncate(start);
            CodecError::Frame(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn decode_frames_one_at_a_time() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"+OK\r\n:5\r\n$3\r\nfo"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Simple("OK".to_string()))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Integer(5)));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"$3\r\nfo");

        buf.extend_from_slice(b"o\r\n");

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Bulk(Bytes::from("foo")))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_skips_malformed_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b":abc\r\n+OK\r\n"[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Frame(frame::Error::InvalidInteger(ref s)) if s == "abc"
        ));

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Simple("OK".to_string()))
        );
    }

    #[test]
    fn decode_rejects_oversized_incomplete_frame() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&b"$100\r\nabcdefgh"[..]);

        let err = codec.decode(&mut buf).unwrap_err();

        assert!(matches!(err, CodecError::FrameTooLarge { limit: 8 }));
    }

    #[test]
    fn encode_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();

        codec
            .encode(
                Frame::Array(vec![Frame::Integer(1), Frame::Null]),
                &mut buf,
            )
            .unwrap();

        assert_eq!(&buf[..], b"*2\r\n:1\r\n$-1\r\n");
    }

    #[test]
    fn encode_failure_leaves_buffer_untouched() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"+OK\r\n"[..]);

        let err = codec
            .encode(
                Frame::Array(vec![Frame::Integer(1), Frame::Inline(vec![])]),
                &mut buf,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            CodecError::Frame(frame::Error::Unencodable("inline"))
        ));
        assert_eq!(&buf[..], b"+OK\r\n");
    }
}
