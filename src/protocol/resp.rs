//! RESP wire codec: encode/decode the Redis serialization protocol over a
//! byte-stream transport. Decoding is incremental — a partial frame leaves
//! its bytes in the caller's buffer for the next read instead of erroring.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Int(i64),
    Bulk(Option<Bytes>),
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::Simple("OK".to_string())
    }

    pub fn bulk(s: impl Into<Bytes>) -> Self {
        RespValue::Bulk(Some(s.into()))
    }

    pub fn nil() -> Self {
        RespValue::Bulk(None)
    }

    pub fn array_of_bulk<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Bytes>,
    {
        RespValue::Array(items.into_iter().map(RespValue::bulk).collect())
    }

    /// The UTF-8 text of a bulk/simple string, used to read command tokens.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::Bulk(Some(b)) => String::from_utf8(b.to_vec()).ok(),
            RespValue::Simple(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// A single decoded unit from the wire. Only `Command` is dispatched;
/// `Line` and `Rdb` are consumed by the transport layer itself.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A top-level array of bulk strings — a command invocation.
    Command(Vec<Bytes>),
    /// A top-level simple string, logged and otherwise ignored.
    Line(String),
    /// A standalone `$<len>\r\n<bytes>` blob with no trailing CRLF — only
    /// ever seen by a replica consuming the RDB payload after FULLRESYNC.
    Rdb(Bytes),
}

pub fn encode(value: &RespValue, out: &mut BytesMut) {
    match value {
        RespValue::Simple(s) => {
            out.extend_from_slice(b"+");
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Error(s) => {
            out.extend_from_slice(b"-");
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Int(n) => {
            out.extend_from_slice(format!(":{}\r\n", n).as_bytes());
        }
        RespValue::Bulk(None) => {
            out.extend_from_slice(b"$-1\r\n");
        }
        RespValue::Bulk(Some(b)) => {
            out.extend_from_slice(format!("${}\r\n", b.len()).as_bytes());
            out.extend_from_slice(b);
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Array(items) => {
            out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode(item, out);
            }
        }
    }
}

/// Encodes an RDB payload in the wire form used by PSYNC's full resync:
/// length-prefixed, but with no trailing CRLF after the bytes.
pub fn encode_rdb_blob(bytes: &[u8], out: &mut BytesMut) {
    out.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
    out.extend_from_slice(bytes);
}

pub fn to_bytes(value: &RespValue) -> Bytes {
    let mut buf = BytesMut::new();
    encode(value, &mut buf);
    buf.freeze()
}

/// Finds the end of a `\r\n`-terminated line starting at `buf[0]`, returning
/// the line contents (without the terminator) and how many bytes it spans
/// including the terminator. `None` means more data is needed.
fn find_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    for i in 0..buf.len().saturating_sub(1) {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some((&buf[..i], i + 2));
        }
    }
    None
}

fn parse_len(line: &[u8], what: &'static str) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(ProtocolError::BadLength(what))
}

/// Attempts to decode exactly one top-level frame from the front of `buf`.
/// Returns `Ok(None)` if `buf` does not yet hold a complete frame — the
/// caller should read more bytes and retry. On success, returns the frame
/// together with how many bytes it consumed (the caller advances the
/// buffer and may also want the raw slice for verbatim propagation).
pub fn decode_one(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }
    match buf[0] {
        b'*' => decode_array(buf),
        b'+' => match find_line(&buf[1..]) {
            Some((line, used)) => {
                let text = String::from_utf8_lossy(line).to_string();
                Ok(Some((Frame::Line(text), 1 + used)))
            }
            None => Ok(None),
        },
        b'$' => decode_rdb_blob(buf),
        other => Err(ProtocolError::UnknownType(other)),
    }
}

fn decode_array(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let (line, header_len) = match find_line(&buf[1..]) {
        Some(v) => v,
        None => return Ok(None),
    };
    let count = parse_len(line, "array header")?;
    let mut pos = 1 + header_len;
    if count < 0 {
        return Ok(Some((Frame::Command(vec![]), pos)));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if pos >= buf.len() {
            return Ok(None);
        }
        if buf[pos] != b'$' {
            return Err(ProtocolError::NonBulkElement);
        }
        let (bulk_line, bulk_header_len) = match find_line(&buf[pos + 1..]) {
            Some(v) => v,
            None => return Ok(None),
        };
        let len = parse_len(bulk_line, "bulk string length")?;
        if len < 0 {
            return Err(ProtocolError::NonBulkElement);
        }
        let len = len as usize;
        let body_start = pos + 1 + bulk_header_len;
        let body_end = body_start + len;
        let needed = body_end + 2; // trailing CRLF
        if buf.len() < needed {
            return Ok(None);
        }
        if &buf[body_end..needed] != b"\r\n" {
            return Err(ProtocolError::Truncated);
        }
        items.push(Bytes::copy_from_slice(&buf[body_start..body_end]));
        pos = needed;
    }
    Ok(Some((Frame::Command(items), pos)))
}

/// Standalone `$<len>\r\n<bytes>` with no trailing CRLF — the RDB blob form
/// used only in a PSYNC full resync, distinguished from a command's nested
/// bulk strings by appearing at the top level.
fn decode_rdb_blob(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let (line, header_len) = match find_line(&buf[1..]) {
        Some(v) => v,
        None => return Ok(None),
    };
    let len = parse_len(line, "rdb blob length")? as usize;
    let body_start = 1 + header_len;
    let body_end = body_start + len;
    if buf.len() < body_end {
        return Ok(None);
    }
    Ok(Some((
        Frame::Rdb(Bytes::copy_from_slice(&buf[body_start..body_end])),
        body_end,
    )))
}

/// A connection's read/write half pair plus its incremental decode buffer.
/// Owned exclusively by the handler task driving it.
pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Connection {
            stream,
            read_buf: BytesMut::with_capacity(4096),
        }
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    /// Reads and decodes the next frame, returning it together with the raw
    /// bytes it occupied on the wire (needed for verbatim propagation and
    /// for replication offset bookkeeping).
    pub async fn read_frame(&mut self) -> Result<Option<(Frame, Bytes)>, ProtocolError> {
        loop {
            if let Some((frame, used)) = decode_one(&self.read_buf)? {
                let raw = self.read_buf.split_to(used).freeze();
                return Ok(Some((frame, raw)));
            }
            let mut chunk = [0u8; 4096];
            let n = self
                .stream
                .read(&mut chunk)
                .await
                .map_err(|_| ProtocolError::Closed)?;
            if n == 0 {
                if self.read_buf.has_remaining() {
                    return Err(ProtocolError::Truncated);
                }
                return Ok(None);
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub async fn write_value(&mut self, value: &RespValue) -> std::io::Result<usize> {
        let mut out = BytesMut::new();
        encode(value, &mut out);
        let len = out.len();
        self.stream.write_all(&out).await?;
        Ok(len)
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        self.stream.write_all(bytes).await?;
        Ok(bytes.len())
    }
}
