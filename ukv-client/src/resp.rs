//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode requests and parse server replies for every connection,
//! batch and sentinel lookup the client opens.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Callers provide buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are kept as `Bytes`.
//! 4. **Explicit Null**: `$-1` and `*-1` decode to `Nil`, the null native result.

use std::io::{BufRead, Read};

use bytes::Bytes;

use ukv_common::{KvError, KvResult, ProtocolCommand};
use ukv_dispatch::NativeResult;

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style replies.
    Simple(Bytes),
    /// -ERR ... replies.
    Error(Bytes),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings.
    Bulk(Bytes),
    /// *... arrays.
    Array(Vec<RespValue>),
    /// $-1 or *-1.
    Nil,
}

/// Largest bulk string accepted from a peer (the server's default `proto-max-bulk-len`).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Largest array header accepted from a peer.
pub const MAX_ARRAY_LEN: i64 = i32::MAX as i64;
/// Up-front allocation limit; larger payloads grow as they arrive.
const PREALLOC_LIMIT: usize = 1024;

impl RespValue {
    /// Splits a reply into the native result the dispatch core expects:
    /// `Nil` is null, error replies are server errors.
    pub fn into_native(self) -> NativeResult<RespValue> {
        match self {
            RespValue::Nil => Ok(None),
            RespValue::Error(message) => Err(server_error(&message)),
            value => Ok(Some(value)),
        }
    }
}

pub(crate) fn server_error(message: &[u8]) -> KvError {
    KvError::Server {
        message: String::from_utf8_lossy(message).into_owned(),
    }
}

/// Encodes a request: the command's wire tokens followed by `args`.
pub fn encode_request(command: ProtocolCommand, args: &[&[u8]], out: &mut Vec<u8>) {
    let wire = command.wire();
    out.push(b'*');
    push_usize(out, wire.len() + args.len());
    out.extend_from_slice(b"\r\n");
    for arg in wire.iter().chain(args.iter()) {
        push_bulk(out, arg);
    }
}

fn push_bulk(out: &mut Vec<u8>, arg: &[u8]) {
    out.push(b'$');
    push_usize(out, arg.len());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(arg);
    out.extend_from_slice(b"\r\n");
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> KvResult<RespValue> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(KvError::Protocol("empty reply line".into()));
    }

    match line_buf[0] {
        b'+' => Ok(RespValue::Simple(Bytes::copy_from_slice(&line_buf[1..]))),
        b'-' => Ok(RespValue::Error(Bytes::copy_from_slice(&line_buf[1..]))),
        b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf)
        }
        other => Err(KvError::Protocol(format!("unknown reply type byte {:#04x}", other))),
    }
}

fn parse_bulk_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> KvResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Nil);
    }
    if len > MAX_BULK_LEN {
        return Err(KvError::Protocol(format!("bulk length {} exceeds limit", len)));
    }
    let len = len as usize;
    let mut data = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    if reader.by_ref().take(len as u64).read_to_end(&mut data)? < len {
        return Err(KvError::Transport("connection closed inside bulk string".into()));
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(KvError::Protocol("bulk string missing CRLF".into()));
    }

    line_buf.clear();
    Ok(RespValue::Bulk(Bytes::from(data)))
}

fn parse_array_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> KvResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Nil);
    }
    if len > MAX_ARRAY_LEN {
        return Err(KvError::Protocol(format!("array length {} exceeds limit", len)));
    }

    let mut items = Vec::with_capacity((len as usize).min(PREALLOC_LIMIT));
    for _ in 0..len {
        items.push(read_response(reader, line_buf)?);
    }
    Ok(RespValue::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> KvResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(KvError::Transport("connection closed by peer".into()));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(KvError::Protocol("reply line missing CRLF".into()));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> KvResult<i64> {
    let invalid = || KvError::Protocol(format!("invalid integer {:?}", String::from_utf8_lossy(data)));
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return Err(invalid()),
    };
    if digits.is_empty() {
        return Err(invalid());
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(invalid());
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }
    Ok(if negative { -value } else { value })
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Digits go through a stack buffer.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}
