use crate::commands::executable::Executable;
use crate::commands::CommandParser;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Returns PONG. Any argument is ignored.
///
/// Ref: <https://redis.io/docs/latest/commands/ping>
#[derive(Debug, PartialEq)]
pub struct Ping;

impl Executable for Ping {
    fn exec(self, _store: Store) -> Result<Frame, Error> {
        Ok(Frame::Simple("PONG".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Ping {
    type Error = Error;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
