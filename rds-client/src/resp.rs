//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode opaque commands and parse server replies into a small
//! sum type, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::fmt;
use std::io::{BufRead, Read};

use crate::error::{ClientError, ClientResult};

/// Largest bulk string accepted from the server (Redis `proto-max-bulk-len`).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Largest array element count accepted from the server.
pub const MAX_ARRAY_LEN: i64 = i32::MAX as i64;

// Upper bound on up-front allocation; the header length is untrusted.
const PREALLOC_LIMIT: usize = 4 * 1024;

/// Reply value returned by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null bulk string or null array.
    Nil,
    /// :123 replies.
    Int(i64),
    /// $... bulk strings.
    Data(Vec<u8>),
    /// +OK or +PONG style replies.
    Status(String),
    /// *... arrays.
    Array(Vec<Value>),
    /// -ERR ... nested inside an array (e.g. EXEC results).
    ///
    /// A top-level error reply never becomes a `Value`; it is returned as
    /// `ClientError::Server` instead.
    Error(String),
}

impl Value {
    /// Returns the payload as bytes for bulk and status replies.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Data(data) => Some(data),
            Value::Status(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    /// Returns the payload as UTF-8 text for bulk and status replies.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "<nil>"),
            Value::Int(value) => write!(f, "{}", value),
            Value::Data(data) => write!(f, "{}", String::from_utf8_lossy(data)),
            Value::Status(text) => write!(f, "{}", text),
            Value::Error(message) => write!(f, "{}", message),
            Value::Array(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Command argument. Arguments are opaque to the client; they are only
/// rendered into bulk strings on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
}

impl Arg {
    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Arg::Bytes(data) => push_bulk(out, data),
            Arg::Int(value) => push_bulk(out, value.to_string().as_bytes()),
            Arg::Float(value) => push_bulk(out, value.to_string().as_bytes()),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Bytes(data) => write!(f, "{}", String::from_utf8_lossy(data)),
            Arg::Int(value) => write!(f, "{}", value),
            Arg::Float(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Bytes(value.as_bytes().to_vec())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Bytes(value.into_bytes())
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg::Bytes(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Int(i64::from(value))
    }
}

macro_rules! arg_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Arg {
            fn from(value: $ty) -> Self {
                Arg::Int(i64::from(value))
            }
        })*
    };
}

arg_from_int!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! arg_from_wide_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Arg {
            fn from(value: $ty) -> Self {
                match i64::try_from(value) {
                    Ok(value) => Arg::Int(value),
                    Err(_) => Arg::Bytes(value.to_string().into_bytes()),
                }
            }
        })*
    };
}

// Values past i64::MAX still go out as their decimal text.
arg_from_wide_int!(u64, usize, isize);

impl From<f32> for Arg {
    fn from(value: f32) -> Self {
        Arg::Float(f64::from(value))
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

/// Renders arguments the way the debug line prints them: `[k v]`.
pub struct ArgList<'a>(pub &'a [Arg]);

impl fmt::Display for ArgList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, arg) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, "]")
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(command: &str, args: &[Arg], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len() + 1);
    out.extend_from_slice(b"\r\n");
    push_bulk(out, command.as_bytes());
    for arg in args {
        arg.write_to(out);
    }
}

/// Reads one RESP value from the buffered reader.
///
/// Error replies are returned as `Value::Error`; the connection layer decides
/// whether that becomes `ClientError::Server`.
pub fn read_response<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
) -> ClientResult<Value> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(ClientError::Protocol);
    }

    match line_buf[0] {
        b'+' => Ok(Value::Status(lossy(&line_buf[1..]))),
        b'-' => Ok(Value::Error(lossy(&line_buf[1..]))),
        b':' => Ok(Value::Int(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf)
        }
        _ => Err(ClientError::Protocol),
    }
}

fn parse_bulk_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> ClientResult<Value> {
    if len < 0 {
        return Ok(Value::Nil);
    }
    if len > MAX_BULK_LEN {
        return Err(ClientError::Protocol);
    }
    let len = len as usize;
    let mut data = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() != len {
        return Err(ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "bulk string truncated",
        )));
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(ClientError::Protocol);
    }

    line_buf.clear();
    Ok(Value::Data(data))
}

fn parse_array_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> ClientResult<Value> {
    if len < 0 {
        return Ok(Value::Nil);
    }
    if len > MAX_ARRAY_LEN {
        return Err(ClientError::Protocol);
    }

    let mut items = Vec::with_capacity((len as usize).min(PREALLOC_LIMIT));
    for _ in 0..len {
        items.push(read_response(reader, line_buf)?);
    }
    Ok(Value::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        )));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(ClientError::Protocol)
}

fn lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn push_bulk(out: &mut Vec<u8>, data: &[u8]) {
    out.push(b'$');
    push_usize(out, data.len());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
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
