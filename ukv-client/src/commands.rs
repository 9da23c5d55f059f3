//! # Command Descriptors
//!
//! Purpose: Build one descriptor per store command. Each descriptor encodes
//! its request through `NativeCommands` and converts the reply frame to a
//! typed value, so the same descriptor serves Direct calls and batches.
//!
//! ## Design Principles
//! 1. **Prefix Once**: `Commands` owns the key prefix and applies it to every
//!    key it puts on the wire.
//! 2. **Strict Shapes**: A reply of the wrong type is `UnexpectedResponse`,
//!    never a silent default.
//! 3. **Nulls Stay Null**: Nil replies never reach a converter.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use ukv_common::{KvError, KvResult, ProtocolCommand, Status, Ttl};
use ukv_dispatch::{Command, Converter, Executor, Operation};

use crate::native::NativeCommands;
use crate::resp::RespValue;

/// Descriptor runnable by every binding in this crate.
pub type ClientCommand<P> = Command<dyn NativeCommands, RespValue, P>;

fn request<P, F>(operation: Operation, args: Vec<Bytes>, convert: F) -> ClientCommand<P>
where
    P: 'static,
    F: FnOnce(RespValue) -> KvResult<P> + Send + 'static,
{
    let command = operation.command();
    let executor: Executor<dyn NativeCommands, RespValue> = Executor::new(move |handle: &mut (dyn NativeCommands + 'static)| {
        let args: Vec<&[u8]> = args.iter().map(|arg| arg.as_ref()).collect();
        handle.call(command, &args)
    });
    Command::new(operation, executor, Converter::try_new(convert))
}

fn unexpected(command: ProtocolCommand) -> KvError {
    KvError::UnexpectedResponse { command }
}

fn to_bytes(command: ProtocolCommand) -> impl FnOnce(RespValue) -> KvResult<Bytes> + Send {
    move |reply| match reply {
        RespValue::Bulk(data) | RespValue::Simple(data) => Ok(data),
        _ => Err(unexpected(command)),
    }
}

fn to_text(command: ProtocolCommand) -> impl FnOnce(RespValue) -> KvResult<String> + Send {
    move |reply| match reply {
        RespValue::Bulk(data) | RespValue::Simple(data) => {
            Ok(String::from_utf8_lossy(&data).into_owned())
        }
        _ => Err(unexpected(command)),
    }
}

fn to_integer(command: ProtocolCommand) -> impl FnOnce(RespValue) -> KvResult<i64> + Send {
    move |reply| match reply {
        RespValue::Integer(value) => Ok(value),
        _ => Err(unexpected(command)),
    }
}

fn to_flag(command: ProtocolCommand) -> impl FnOnce(RespValue) -> KvResult<bool> + Send {
    move |reply| to_integer(command)(reply).map(|value| value > 0)
}

fn to_status(command: ProtocolCommand) -> impl FnOnce(RespValue) -> KvResult<Status> + Send {
    move |reply| match reply {
        RespValue::Simple(_) => Ok(Status::Success),
        _ => Err(unexpected(command)),
    }
}

fn to_list(command: ProtocolCommand) -> impl FnOnce(RespValue) -> KvResult<Vec<Bytes>> + Send {
    move |reply| match reply {
        RespValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                RespValue::Bulk(data) => Ok(data),
                _ => Err(unexpected(command)),
            })
            .collect(),
        _ => Err(unexpected(command)),
    }
}

/// Whole seconds, rounding any fraction up so short TTLs never become 0.
fn seconds(ttl: Duration) -> u64 {
    ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
}

/// Descriptor constructors with the client's key prefix applied.
#[derive(Debug, Clone, Default)]
pub struct Commands {
    prefix: Option<Bytes>,
}

impl Commands {
    pub fn new(prefix: Option<&str>) -> Self {
        Commands {
            prefix: prefix
                .filter(|prefix| !prefix.is_empty())
                .map(|prefix| Bytes::copy_from_slice(prefix.as_bytes())),
        }
    }

    /// Key as sent on the wire.
    pub fn raw_key(&self, key: &[u8]) -> Bytes {
        match &self.prefix {
            Some(prefix) => {
                let mut raw = BytesMut::with_capacity(prefix.len() + key.len());
                raw.put_slice(prefix);
                raw.put_slice(key);
                raw.freeze()
            }
            None => Bytes::copy_from_slice(key),
        }
    }

    fn keyed(&self, command: ProtocolCommand, key: &[u8]) -> (Operation, Bytes) {
        let raw = self.raw_key(key);
        (Operation::new(command).with_key(raw.clone()), raw)
    }

    /// GET; `None` when the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientCommand<Bytes> {
        let (op, raw) = self.keyed(ProtocolCommand::Get, key);
        request(op, vec![raw], to_bytes(ProtocolCommand::Get))
    }

    pub fn set(&self, key: &[u8], value: impl Into<Bytes>) -> ClientCommand<Status> {
        let (op, raw) = self.keyed(ProtocolCommand::Set, key);
        request(op, vec![raw, value.into()], to_status(ProtocolCommand::Set))
    }

    /// SETEX with whole seconds.
    pub fn set_ex(&self, key: &[u8], value: impl Into<Bytes>, ttl: Duration) -> ClientCommand<Status> {
        let (op, raw) = self.keyed(ProtocolCommand::SetEx, key);
        let secs = seconds(ttl);
        let op = op.arg("seconds", secs);
        request(
            op,
            vec![raw, Bytes::from(secs.to_string()), value.into()],
            to_status(ProtocolCommand::SetEx),
        )
    }

    /// DEL; true when the key existed.
    pub fn del(&self, key: &[u8]) -> ClientCommand<bool> {
        let (op, raw) = self.keyed(ProtocolCommand::Del, key);
        request(op, vec![raw], to_flag(ProtocolCommand::Del))
    }

    pub fn exists(&self, key: &[u8]) -> ClientCommand<bool> {
        let (op, raw) = self.keyed(ProtocolCommand::Exists, key);
        request(op, vec![raw], to_flag(ProtocolCommand::Exists))
    }

    /// INCRBY; returns the new value.
    pub fn incr_by(&self, key: &[u8], by: i64) -> ClientCommand<i64> {
        let (op, raw) = self.keyed(ProtocolCommand::IncrBy, key);
        let op = op.arg("by", by);
        request(
            op,
            vec![raw, Bytes::from(by.to_string())],
            to_integer(ProtocolCommand::IncrBy),
        )
    }

    /// EXPIRE; true when the timeout was set.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> ClientCommand<bool> {
        let (op, raw) = self.keyed(ProtocolCommand::Expire, key);
        let secs = seconds(ttl);
        let op = op.arg("seconds", secs);
        request(
            op,
            vec![raw, Bytes::from(secs.to_string())],
            to_flag(ProtocolCommand::Expire),
        )
    }

    pub fn ttl(&self, key: &[u8]) -> ClientCommand<Ttl> {
        let (op, raw) = self.keyed(ProtocolCommand::Ttl, key);
        request(op, vec![raw], |reply| {
            to_integer(ProtocolCommand::Ttl)(reply)
                .and_then(|secs| Ttl::from_seconds(secs).ok_or_else(|| unexpected(ProtocolCommand::Ttl)))
        })
    }

    /// PING, optionally echoing `payload`.
    pub fn ping(&self, payload: Option<&[u8]>) -> ClientCommand<Bytes> {
        let args = payload.map(Bytes::copy_from_slice).into_iter().collect();
        request(
            Operation::new(ProtocolCommand::Ping),
            args,
            to_bytes(ProtocolCommand::Ping),
        )
    }

    pub fn info(&self, section: Option<&str>) -> ClientCommand<String> {
        let mut op = Operation::new(ProtocolCommand::Info);
        if let Some(section) = section {
            op = op.arg("section", section);
        }
        let args = section
            .map(|section| Bytes::copy_from_slice(section.as_bytes()))
            .into_iter()
            .collect();
        request(op, args, to_text(ProtocolCommand::Info))
    }

    /// KEYS within the prefix; returned keys have the prefix removed.
    pub fn keys(&self, pattern: &[u8]) -> ClientCommand<Vec<Bytes>> {
        let raw = self.raw_key(pattern);
        let op = Operation::new(ProtocolCommand::Keys).arg("pattern", String::from_utf8_lossy(&raw));
        let strip = self.prefix.as_ref().map_or(0, Bytes::len);
        request(op, vec![raw], move |reply| {
            to_list(ProtocolCommand::Keys)(reply).map(|keys| {
                keys.into_iter()
                    .map(|key| if key.len() >= strip { key.slice(strip..) } else { key })
                    .collect()
            })
        })
    }

    /// CONFIG GET; name/value pairs.
    pub fn config_get(&self, pattern: &str) -> ClientCommand<Vec<(String, String)>> {
        let op = Operation::new(ProtocolCommand::ConfigGet).arg("pattern", pattern);
        let args = vec![Bytes::copy_from_slice(pattern.as_bytes())];
        request(op, args, |reply| {
            let items = to_list(ProtocolCommand::ConfigGet)(reply)?;
            if items.len() % 2 != 0 {
                return Err(unexpected(ProtocolCommand::ConfigGet));
            }
            Ok(items
                .chunks(2)
                .map(|pair| {
                    (
                        String::from_utf8_lossy(&pair[0]).into_owned(),
                        String::from_utf8_lossy(&pair[1]).into_owned(),
                    )
                })
                .collect())
        })
    }

    /// HSET; true when the field is new.
    pub fn hset(&self, key: &[u8], field: &[u8], value: impl Into<Bytes>) -> ClientCommand<bool> {
        let (op, raw) = self.keyed(ProtocolCommand::HSet, key);
        let op = op.arg("field", String::from_utf8_lossy(field));
        request(
            op,
            vec![raw, Bytes::copy_from_slice(field), value.into()],
            to_flag(ProtocolCommand::HSet),
        )
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> ClientCommand<Bytes> {
        let (op, raw) = self.keyed(ProtocolCommand::HGet, key);
        let op = op.arg("field", String::from_utf8_lossy(field));
        request(
            op,
            vec![raw, Bytes::copy_from_slice(field)],
            to_bytes(ProtocolCommand::HGet),
        )
    }

    /// LPUSH; returns the list length.
    pub fn lpush<I, V>(&self, key: &[u8], values: I) -> ClientCommand<i64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bytes>,
    {
        let (op, raw) = self.keyed(ProtocolCommand::LPush, key);
        let mut args = vec![raw];
        args.extend(values.into_iter().map(Into::into));
        let op = op.arg("values", args.len() - 1);
        request(op, args, to_integer(ProtocolCommand::LPush))
    }

    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> ClientCommand<Vec<Bytes>> {
        let (op, raw) = self.keyed(ProtocolCommand::LRange, key);
        let op = op.arg("start", start).arg("stop", stop);
        request(
            op,
            vec![raw, Bytes::from(start.to_string()), Bytes::from(stop.to_string())],
            to_list(ProtocolCommand::LRange),
        )
    }

    /// GET decoded as JSON.
    pub fn get_json<T>(&self, key: &[u8]) -> ClientCommand<T>
    where
        T: DeserializeOwned + 'static,
    {
        let (op, raw) = self.keyed(ProtocolCommand::Get, key);
        request(op, vec![raw], |reply| {
            let data = to_bytes(ProtocolCommand::Get)(reply)?;
            serde_json::from_slice(&data).map_err(|err| KvError::Conversion(err.to_string()))
        })
    }

    /// SET with `value` encoded as JSON.
    pub fn set_json<T>(&self, key: &[u8], value: &T) -> KvResult<ClientCommand<Status>>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_vec(value).map_err(|err| KvError::Conversion(err.to_string()))?;
        Ok(self.set(key, encoded))
    }
}
