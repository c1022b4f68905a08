// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use std::string::FromUtf8Error;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("protocol error; not a valid integer: {0:?}")]
    InvalidInteger(String),
    #[error("protocol error; {kind} length is not a valid integer: {line:?}")]
    InvalidLength { kind: &'static str, line: String },
    #[error("protocol error; could not parse element in array at position {index}: {source}")]
    InvalidArrayElement { index: usize, source: Box<Error> },
    #[error("protocol error; invalid frame format")]
    InvalidUtf8,
    #[error("{0} frames can't be encoded")]
    Unencodable(&'static str),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// The RESP2 null bulk string, `$-1`.
    Null,
    Array(Vec<Frame>),
    /// The RESP2 null array, `*-1`.
    NullArray,
    /// A line that didn't start with a type byte, split on single spaces. Never encoded.
    Inline(Vec<String>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    /// Parses exactly one frame starting at the cursor position, leaving the cursor right after
    /// the frame's trailing terminator.
    ///
    /// Returns `Error::Incomplete` when the buffer ends before the frame does. Every other error
    /// leaves the cursor after the bytes that were consumed while failing, so the caller can skip
    /// them and keep reading.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;

        let data_type = match DataType::try_from(first_byte) {
            Ok(data_type) => data_type,
            Err(_) => return parse_inline(first_byte, src),
        };

        match data_type {
            DataType::SimpleString => {
                let line = get_line(src)?.to_vec();
                let string = String::from_utf8(line)?;
                Ok(Frame::Simple(string))
            }
            DataType::SimpleError => {
                let line = get_line(src)?.to_vec();
                let string = String::from_utf8(line)?;
                Ok(Frame::Error(string))
            }
            DataType::Integer => {
                let line = get_line(src)?;
                let integer = parse_decimal(line).ok_or_else(|| {
                    Error::InvalidInteger(String::from_utf8_lossy(line).into_owned())
                })?;

                Ok(Frame::Integer(integer))
            }
            // $<length>\r\n<data>\r\n
            DataType::BulkString => {
                let length = get_length(src, "string")?;

                if length == -1 {
                    return Ok(Frame::Null);
                }

                let length = usize::try_from(length).map_err(|_| Error::InvalidLength {
                    kind: "string",
                    line: length.to_string(),
                })?;

                // The two bytes after the body are the terminator. They are skipped, not checked.
                if src.remaining() < length + CRLF.len() {
                    return Err(Error::Incomplete);
                }

                let data = src.copy_to_bytes(length);
                src.advance(CRLF.len());

                Ok(Frame::Bulk(data))
            }
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => {
                let length = get_length(src, "array")?;

                if length == -1 {
                    return Ok(Frame::NullArray);
                }

                let length = usize::try_from(length).map_err(|_| Error::InvalidLength {
                    kind: "array",
                    line: length.to_string(),
                })?;

                // The declared length comes from the client, don't trust it for the allocation.
                let mut frames = Vec::with_capacity(length.min(1024));
                for index in 0..length {
                    match Self::parse(src) {
                        Ok(frame) => frames.push(frame),
                        Err(Error::Incomplete) => return Err(Error::Incomplete),
                        Err(err) => {
                            return Err(Error::InvalidArrayElement {
                                index,
                                source: Box::new(err),
                            })
                        }
                    }
                }

                Ok(Frame::Array(frames))
            }
        }
    }

    /// Writes the wire representation of the frame into `dst`.
    ///
    /// Arrays are written element by element; the first element that fails aborts the rest, and
    /// whatever was already written stays in `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), Error> {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(u8::from(DataType::SimpleString));
                put_line(dst, s);
                dst.put_slice(CRLF);
            }
            Frame::Error(s) => {
                dst.put_u8(u8::from(DataType::SimpleError));
                put_line(dst, s);
                dst.put_slice(CRLF);
            }
            Frame::Integer(i) => {
                dst.put_u8(u8::from(DataType::Integer));
                dst.put_slice(i.to_string().as_bytes());
                dst.put_slice(CRLF);
            }
            Frame::Bulk(bytes) => {
                dst.put_u8(u8::from(DataType::BulkString));
                dst.put_slice(bytes.len().to_string().as_bytes());
                dst.put_slice(CRLF);
                dst.put_slice(bytes);
                dst.put_slice(CRLF);
            }
            Frame::Null => {
                dst.put_u8(u8::from(DataType::BulkString));
                dst.put_slice(b"-1");
                dst.put_slice(CRLF);
            }
            Frame::Array(arr) => {
                dst.put_u8(u8::from(DataType::Array));
                dst.put_slice(arr.len().to_string().as_bytes());
                dst.put_slice(CRLF);
                for frame in arr {
                    frame.encode(dst)?;
                }
            }
            Frame::NullArray => {
                dst.put_u8(u8::from(DataType::Array));
                dst.put_slice(b"-1");
                dst.put_slice(CRLF);
            }
            Frame::Inline(_) => return Err(Error::Unencodable("inline")),
        }

        Ok(())
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = BytesMut::new();
        self.encode(&mut bytes)?;
        Ok(bytes.to_vec())
    }

    /// Human readable name of the frame type, used in error replies.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Simple(_) => "simple string",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::Bulk(_) => "bulk string",
            Frame::Null => "null",
            Frame::Array(_) => "array",
            Frame::NullArray => "null array",
            Frame::Inline(_) => "inline",
        }
    }
}

// Single line, with control characters escaped: the output ends up inside error replies.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s.escape_debug()),
            Frame::Error(s) => write!(f, "-{}", s.escape_debug()),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes).escape_debug()),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "*{} [", arr.len())?;
                for (i, frame) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", frame)?;
                }
                write!(f, "]")
            }
            Frame::NullArray => write!(f, "*-1"),
            Frame::Inline(tokens) => write!(f, "{}", tokens.join(" ").escape_debug()),
        }
    }
}

/// Writes `line` with every CR and LF replaced by a space, so it can't end the frame early.
fn put_line(dst: &mut BytesMut, line: &str) {
    let line_breaks = &['\r', '\n'][..];

    if line.contains(line_breaks) {
        dst.put_slice(line.replace(line_breaks, " ").as_bytes());
    } else {
        dst.put_slice(line.as_bytes());
    }
}

// A line that starts with anything other than a type byte is an inline command: the byte is the
// first character of the line.
fn parse_inline(first_byte: u8, src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
    let mut line = vec![first_byte];

    if first_byte != b'\n' {
        line.extend_from_slice(get_line(src)?);
    }

    let line = String::from_utf8(line)?;
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let tokens = line.split(' ').map(String::from).collect();

    Ok(Frame::Inline(tokens))
}

fn get_length(src: &mut Cursor<&[u8]>, kind: &'static str) -> Result<i64, Error> {
    let line = get_line(src)?;

    parse_decimal(line).ok_or_else(|| Error::InvalidLength {
        kind,
        line: String::from_utf8_lossy(line).into_owned(),
    })
}

fn parse_decimal(line: &[u8]) -> Option<i64> {
    std::str::from_utf8(line).ok()?.parse::<i64>().ok()
}

/// Returns the bytes up to the next `\n`, without the trailing `\r`s, and moves the cursor past
/// the `\n`.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    let line_end = buf[start..]
        .iter()
        .position(|byte| *byte == b'\n')
        .map(|index| start + index)
        .ok_or(Error::Incomplete)?;

    src.set_position((line_end + 1) as u64);

    let mut end = line_end;
    while end > start && buf[end - 1] == b'\r' {
        end -= 1;
    }

    Ok(&buf[start..end])
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(byte),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        Error::InvalidUtf8
    }
}
