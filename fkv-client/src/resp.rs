//! # RESP Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server responses without
//! external dependencies, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Responses are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.
//!
//! Commands are always sent as RESP2 arrays. Replies accept the RESP2 types
//! plus the RESP3 null (`_`) and map (`%`) so aggregate results from servers
//! speaking either dialect can be flattened.

use std::io::{BufRead, Read};

use fkv_common::{FkvError, FkvResult};

/// RESP response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<RespValue>),
    /// %... maps, in server order.
    Map(Vec<(RespValue, RespValue)>),
    /// _ and *-1 null replies.
    Null,
}

impl RespValue {
    /// Converts an error reply into `FkvError::Server`, passing other values through.
    pub fn into_result(self) -> FkvResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(FkvError::server(&message)),
            other => Ok(other),
        }
    }
}

/// Encodes a RESP array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> FkvResult<RespValue> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(FkvError::Protocol);
    }

    match line_buf[0] {
        b'+' => Ok(RespValue::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(RespValue::Error(line_buf[1..].to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
        b'_' => Ok(RespValue::Null),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf)
        }
        b'%' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_map_len(reader, len, line_buf)
        }
        _ => Err(FkvError::Protocol),
    }
}

fn parse_bulk_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> FkvResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    let mut data = Vec::with_capacity(prealloc(len));
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() as u64 != len as u64 {
        return Err(FkvError::Protocol);
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(FkvError::Protocol);
    }

    line_buf.clear();
    Ok(RespValue::Bulk(Some(data)))
}

// Wire lengths are untrusted; grow past this on demand.
const MAX_PREALLOC: usize = 1024;

fn prealloc(len: i64) -> usize {
    usize::try_from(len).map_or(0, |len| len.min(MAX_PREALLOC))
}

fn parse_array_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> FkvResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Null);
    }

    let mut items = Vec::with_capacity(prealloc(len));
    for _ in 0..len {
        items.push(read_response(reader, line_buf)?);
    }
    Ok(RespValue::Array(items))
}

fn parse_map_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> FkvResult<RespValue> {
    if len < 0 {
        return Err(FkvError::Protocol);
    }

    let mut entries = Vec::with_capacity(prealloc(len));
    for _ in 0..len {
        let key = read_response(reader, line_buf)?;
        let value = read_response(reader, line_buf)?;
        entries.push((key, value));
    }
    Ok(RespValue::Map(entries))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> FkvResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(FkvError::Protocol);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(FkvError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> FkvResult<i64> {
    if data.is_empty() {
        return Err(FkvError::Protocol);
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(FkvError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
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
