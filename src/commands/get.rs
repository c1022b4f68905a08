use crate::commands::executable::Executable;
use crate::commands::CommandParser;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Get the value of `key`. If the key does not exist, or has expired, the special value `nil` is
/// returned.
///
/// Ref: <https://redis.io/docs/latest/commands/get/>
#[derive(Debug, PartialEq)]
pub struct Get {
    pub key: String,
}

impl Executable for Get {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        let value = store.lock().get(&self.key);

        match value {
            Some(value) => Ok(Frame::Bulk(value)),
            None => Ok(Frame::Null),
        }
    }
}

impl TryFrom<&mut CommandParser> for Get {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        Ok(Self { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Command, CommandParserError};
    use bytes::Bytes;
    use tokio::time::{self, Duration};

    #[test]
    fn existing_key() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("GET")),
            Frame::Bulk(Bytes::from("key1")),
        ]);
        let cmd = Command::try_from(frame).unwrap();

        assert_eq!(
            cmd,
            Command::Get(Get {
                key: String::from("key1")
            })
        );

        let store = Store::new();
        store.lock().set(String::from("key1"), Bytes::from("1"));

        let result = cmd.exec(store.clone()).unwrap();

        assert_eq!(result, Frame::Bulk(Bytes::from("1")));
    }

    #[test]
    fn missing_key() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("GET")),
            Frame::Bulk(Bytes::from("key1")),
        ]);
        let cmd = Command::try_from(frame).unwrap();

        let store = Store::new();

        let result = cmd.exec(store.clone()).unwrap();

        assert_eq!(result, Frame::Null);
    }

    #[tokio::test]
    async fn expired_key() {
        time::pause();

        let store = Store::new();
        store
            .lock()
            .set_with_ttl(
                String::from("key1"),
                Bytes::from("1"),
                Duration::from_millis(100),
            )
            .unwrap();

        let get = || Get {
            key: String::from("key1"),
        };

        assert_eq!(
            get().exec(store.clone()).unwrap(),
            Frame::Bulk(Bytes::from("1"))
        );

        time::advance(Duration::from_millis(100)).await;

        assert_eq!(get().exec(store.clone()).unwrap(), Frame::Null);
        assert!(store.lock().is_empty());
    }

    #[test]
    fn key_must_be_a_string() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("GET")),
            Frame::Array(vec![]),
        ]);
        let err = Command::try_from(frame).err().unwrap();
        let err = err.downcast_ref::<CommandParserError>().unwrap();

        assert_eq!(
            *err,
            CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: Frame::Array(vec![]),
            }
        );
    }
}
