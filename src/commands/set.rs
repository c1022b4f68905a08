use bytes::Bytes;
use tokio::time::Duration;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Set `key` to hold `value`, replacing any previous value and expiration. With `PX <millis>` the
/// key expires that many milliseconds from now.
///
/// Ref: <https://redis.io/docs/latest/commands/set/>
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: String,
    pub value: Bytes,
    pub ttl: Option<Duration>,
}

impl Executable for Set {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        let mut store = store.lock();
        match self.ttl {
            Some(ttl) => store.set_with_ttl(self.key, self.value, ttl)?,
            None => store.set(self.key, self.value),
        }

        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        let value = parser.next_bytes()?;

        // Only `PX` is understood, anything else after the value is ignored.
        let ttl = match parser.next_string() {
            Ok(option) if option.eq_ignore_ascii_case("PX") => {
                let millis = parser.next_integer()?;
                let millis =
                    u64::try_from(millis).map_err(|_| CommandParserError::InvalidCommandArgument {
                        command: "SET".to_string(),
                        argument: millis.to_string(),
                    })?;

                Some(Duration::from_millis(millis))
            }
            _ => None,
        };

        Ok(Self { key, value, ttl })
    }
}
