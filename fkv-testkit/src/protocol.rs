//! # Server-Side RESP Parsing
//!
//! Incremental parser for command arrays arriving on a socket. Incomplete
//! frames leave the buffer untouched so the caller can read more bytes and
//! try again.

use bytes::{Buf, BytesMut};

/// Parse failure; the connection is answered with an error and closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    Protocol,
}

/// Stateless parser for RESP command arrays.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Parses one command from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On success the frame
    /// is consumed from `buf`.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let mut pos = 0;
        let Some(header) = line_at(buf, pos) else {
            return Ok(None);
        };
        if header.first() != Some(&b'*') {
            return Err(RespError::Protocol);
        }
        let count = parse_usize(&header[1..])?;
        pos += header.len() + 2;

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(line) = line_at(buf, pos) else {
                return Ok(None);
            };
            if line.first() != Some(&b'$') {
                return Err(RespError::Protocol);
            }
            let len = parse_usize(&line[1..])?;
            pos += line.len() + 2;

            if buf.len() < pos + len + 2 {
                return Ok(None);
            }
            if &buf[pos + len..pos + len + 2] != b"\r\n" {
                return Err(RespError::Protocol);
            }
            args.push(buf[pos..pos + len].to_vec());
            pos += len + 2;
        }

        buf.advance(pos);
        Ok(Some(args))
    }
}

fn line_at(buf: &[u8], start: usize) -> Option<&[u8]> {
    let rest = buf.get(start..)?;
    let end = rest.windows(2).position(|window| window == b"\r\n")?;
    Some(&rest[..end])
}

fn parse_usize(data: &[u8]) -> Result<usize, RespError> {
    if data.is_empty() {
        return Err(RespError::Protocol);
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Ok(value)
}
