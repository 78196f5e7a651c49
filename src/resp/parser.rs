//! Streaming RESP2/RESP3 reply decoder.
//!
//! [`parse`] decodes one frame from the front of a buffer and returns the
//! value with the number of bytes it used, or [`Error::Incomplete`] when
//! the frame is not fully buffered yet. Bulk payloads are `slice()`d out of
//! the shared `Bytes` without copying.

use bytes::Bytes;
use memchr::memchr;

use crate::error::{Error, Result};
use crate::resp::types::RespValue;

/// Upper bound on array/map element counts accepted from the wire.
const MAX_AGGREGATE_LEN: i64 = 64 * 1024 * 1024;

/// Parse one RESP value from the front of `buf`.
pub fn parse(buf: &Bytes) -> Result<(RespValue, usize)> {
    parse_at(buf, 0)
}

/// Parse from a plain slice (copies into `Bytes` first).
pub fn parse_slice(buf: &[u8]) -> Result<(RespValue, usize)> {
    parse(&Bytes::copy_from_slice(buf))
}

fn parse_at(buf: &Bytes, pos: usize) -> Result<(RespValue, usize)> {
    let Some(&marker) = buf.get(pos) else {
        return Err(Error::Incomplete);
    };
    let (line, next) = read_line(buf, pos + 1)?;

    match marker {
        b'+' => Ok((RespValue::SimpleString(utf8(line)?), next)),
        b'-' => Ok((RespValue::Error(utf8(line)?), next)),
        b':' => Ok((RespValue::Integer(parse_int(line)?), next)),
        b'_' => Ok((RespValue::Null, next)),
        b'#' => match line {
            b"t" => Ok((RespValue::Boolean(true), next)),
            b"f" => Ok((RespValue::Boolean(false), next)),
            _ => Err(Error::Protocol("invalid boolean frame".into())),
        },
        b',' => {
            let text = utf8(line)?;
            let value = match text.as_str() {
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                other => other
                    .parse()
                    .map_err(|_| Error::Protocol(format!("invalid double: {other}")))?,
            };
            Ok((RespValue::Double(value), next))
        }
        b'(' => Ok((RespValue::BigNumber(utf8(line)?), next)),
        b'$' | b'!' | b'=' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok((RespValue::Null, next));
            }
            let end = next + len as usize;
            if buf.len() < end + 2 {
                return Err(Error::Incomplete);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(Error::Protocol("bulk payload not terminated by CRLF".into()));
            }
            let payload = buf.slice(next..end);
            let value = match marker {
                b'$' => RespValue::BulkString(payload),
                b'!' => RespValue::Error(utf8(&payload)?),
                _ => {
                    let text = utf8(&payload)?;
                    match text.split_once(':') {
                        Some((format, body)) if format.len() == 3 => RespValue::Verbatim {
                            format: format.to_string(),
                            text: body.to_string(),
                        },
                        _ => return Err(Error::Protocol("invalid verbatim string".into())),
                    }
                }
            };
            Ok((value, end + 2))
        }
        b'*' | b'~' | b'>' => {
            let count = parse_int(line)?;
            if count < 0 {
                return Ok((RespValue::Null, next));
            }
            let count = checked_len(count)?;
            let mut items = Vec::with_capacity(count.min(1024));
            let mut cursor = next;
            for _ in 0..count {
                let (item, after) = parse_at(buf, cursor)?;
                items.push(item);
                cursor = after;
            }
            Ok((RespValue::Array(items), cursor))
        }
        b'%' | b'|' => {
            let count = checked_len(parse_int(line)?)?;
            let mut pairs = Vec::with_capacity(count.min(1024));
            let mut cursor = next;
            for _ in 0..count {
                let (key, after_key) = parse_at(buf, cursor)?;
                let (value, after_value) = parse_at(buf, after_key)?;
                pairs.push((key, value));
                cursor = after_value;
            }
            if marker == b'|' {
                // Attributes precede the real reply; they carry no routing data.
                return parse_at(buf, cursor);
            }
            Ok((RespValue::Map(pairs), cursor))
        }
        other => Err(Error::Protocol(format!("unknown RESP type byte: 0x{other:02x}"))),
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Read the line starting at `offset` up to `\r\n`.
/// Returns `(line_bytes, index_after_crlf)`.
#[inline]
fn read_line(buf: &[u8], offset: usize) -> Result<(&[u8], usize)> {
    let search = buf.get(offset..).ok_or(Error::Incomplete)?;
    let cr = memchr(b'\r', search).ok_or(Error::Incomplete)? + offset;
    match buf.get(cr + 1) {
        None => Err(Error::Incomplete),
        Some(b'\n') => Ok((&buf[offset..cr], cr + 2)),
        Some(_) => Err(Error::Protocol("expected \\n after \\r".into())),
    }
}

fn parse_int(bytes: &[u8]) -> Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            Error::Protocol(format!(
                "invalid integer: {:?}",
                String::from_utf8_lossy(bytes)
            ))
        })
}

fn checked_len(count: i64) -> Result<usize> {
    if !(0..=MAX_AGGREGATE_LEN).contains(&count) {
        return Err(Error::Protocol(format!("aggregate length out of range: {count}")));
    }
    Ok(count as usize)
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::Protocol("invalid UTF-8 in reply".into()))
}

// ── Tests ──────────────────────────────────────────────────────────
