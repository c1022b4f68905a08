pub mod echo;
pub mod executable;
pub mod get;
pub mod ping;
pub mod set;

use bytes::Bytes;
use std::{str, vec};
use thiserror::Error as ThisError;

use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

use echo::Echo;
use get::Get;
use ping::Ping;
use set::Set;

#[derive(Debug, PartialEq)]
pub enum Command {
    Echo(Echo),
    Get(Get),
    Ping(Ping),
    Set(Set),
}

impl Executable for Command {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        match self {
            Command::Echo(cmd) => cmd.exec(store),
            Command::Get(cmd) => cmd.exec(store),
            Command::Ping(cmd) => cmd.exec(store),
            Command::Set(cmd) => cmd.exec(store),
        }
    }
}

impl TryFrom<Frame> for Command {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        // Clients send commands to the Redis server as RESP arrays.
        let frames = match frame {
            Frame::Array(array) => array,
            frame => {
                return Err(CommandParserError::UnsupportedRequest { kind: frame.kind() }.into())
            }
        };

        let parser = &mut CommandParser {
            parts: frames.into_iter(),
        };

        let command_name = parser.parse_command_name()?;

        match &command_name[..] {
            "echo" => Echo::try_from(parser).map(Command::Echo),
            "get" => Get::try_from(parser).map(Command::Get),
            "ping" => Ping::try_from(parser).map(Command::Ping),
            "set" => Set::try_from(parser).map(Command::Set),
            _ => Err(CommandParserError::UnknownCommand {
                command: command_name,
            }
            .into()),
        }
    }
}

/// Runs a single request against the store and returns the reply. Failures to parse or run the
/// command become an error reply; they never reach the caller as an `Err`.
pub fn handle(frame: Frame, store: &Store) -> Frame {
    match Command::try_from(frame).and_then(|cmd| cmd.exec(store.clone())) {
        Ok(res) => res,
        Err(err) => Frame::Error(err.to_string()),
    }
}

pub struct CommandParser {
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    fn parse_command_name(&mut self) -> Result<String, CommandParserError> {
        let command_name = self
            .parts
            .next()
            .ok_or(CommandParserError::EndOfStream)?;

        match command_name {
            Frame::Simple(s) => Ok(s.to_lowercase()),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_lowercase())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    fn next_frame(&mut self) -> Result<Frame, CommandParserError> {
        self.parts.next().ok_or(CommandParserError::EndOfStream)
    }

    fn next_string(&mut self) -> Result<String, CommandParserError> {
        let frame = self.next_frame()?;

        match frame {
            // Both `Simple` and `Bulk` representation may be strings. Strings are parsed to UTF-8.
            // While errors are stored as strings, they are considered separate types.
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_string())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    fn next_integer(&mut self) -> Result<i64, CommandParserError> {
        let frame = self.next_frame()?;

        match frame {
            Frame::Integer(i) => Ok(i),
            Frame::Simple(string) => {
                string
                    .parse::<i64>()
                    .map_err(|_| CommandParserError::InvalidFrame {
                        expected: "parseable i64 frame".to_string(),
                        actual: Frame::Simple(string),
                    })
            }
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map_err(CommandParserError::InvalidUTF8String)?
                .parse::<i64>()
                .map_err(|_| CommandParserError::InvalidFrame {
                    expected: "parseable i64 frame".to_string(),
                    actual: Frame::Bulk(bytes),
                }),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "integer".to_string(),
                actual: frame,
            }),
        }
    }

    fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        let frame = self.next_frame()?;

        match frame {
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(bytes) => Ok(bytes),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub(crate) enum CommandParserError {
    #[error("protocol error; request type {kind} not implemented yet")]
    UnsupportedRequest { kind: &'static str },
    #[error("protocol error; invalid frame, expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("protocol error; unknown command {command:?}")]
    UnknownCommand { command: String },
    #[error("protocol error; invalid command argument {command} {argument:?}")]
    InvalidCommandArgument { command: String, argument: String },
    #[error("protocol error; invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
    #[error("protocol error; attempting to extract a value failed due to the frame being fully consumed")]
    EndOfStream,
}
