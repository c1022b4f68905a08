use crate::commands::executable::Executable;
use crate::commands::CommandParser;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Returns `message` exactly as it was received, frame type included.
///
/// Ref: <https://redis.io/docs/latest/commands/echo/>
#[derive(Debug, PartialEq)]
pub struct Echo {
    pub message: Frame,
}

impl Executable for Echo {
    fn exec(self, _store: Store) -> Result<Frame, Error> {
        Ok(self.message)
    }
}

impl TryFrom<&mut CommandParser> for Echo {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let message = parser.next_frame()?;
        Ok(Self { message })
    }
}
