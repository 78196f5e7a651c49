//! Normalized replies handed to callers.
//!
//! Wire frames differ between RESP2 and RESP3 (`+OK` vs `#t`, `$-1` vs `_`,
//! flat arrays vs maps); [`Reply`] folds those differences away.

use bytes::Bytes;

use crate::config::ValueMode;
use crate::error::{Error, Result};
use crate::resp::types::RespValue;

/// A reply after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    /// `+OK` and RESP3 booleans.
    Bool(bool),
    Int(i64),
    Double(f64),
    /// Bulk data in [`ValueMode::Bytes`].
    Bytes(Bytes),
    /// Status replies, and bulk data in [`ValueMode::Utf8`].
    Text(String),
    Array(Vec<Reply>),
    Map(Vec<(Reply, Reply)>),
}

impl Reply {
    /// Normalize a wire frame. Error frames, nested or not, become
    /// [`Error::Server`].
    pub fn from_resp(value: RespValue, mode: ValueMode) -> Result<Self> {
        Ok(match value {
            RespValue::SimpleString(s) if s == "OK" => Self::Bool(true),
            RespValue::SimpleString(s) => Self::Text(s),
            RespValue::Boolean(b) => Self::Bool(b),
            RespValue::Null => Self::Nil,
            RespValue::Integer(i) => Self::Int(i),
            RespValue::Double(d) => Self::Double(d),
            RespValue::BigNumber(n) => Self::Text(n),
            RespValue::BulkString(data) => bulk(data, mode),
            RespValue::Verbatim { text, .. } => match mode {
                ValueMode::Utf8 => Self::Text(text),
                ValueMode::Bytes => Self::Bytes(Bytes::from(text)),
            },
            RespValue::Error(msg) => return Err(Error::server(msg)),
            RespValue::Array(items) => Self::Array(
                items
                    .into_iter()
                    .map(|item| Self::from_resp(item, mode))
                    .collect::<Result<_>>()?,
            ),
            RespValue::Map(pairs) => Self::Map(
                pairs
                    .into_iter()
                    .map(|(k, v)| Ok((Self::from_resp(k, mode)?, Self::from_resp(v, mode)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    /// Integer replies, or bulk data holding a decimal integer.
    pub fn into_int(self) -> Result<i64> {
        match self {
            Self::Int(i) => Ok(i),
            Self::Bytes(ref b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| self.unexpected("integer")),
            Self::Text(ref s) => s.parse().map_err(|_| self.unexpected("integer")),
            other => Err(other.unexpected("integer")),
        }
    }

    /// Unsigned 64-bit value, e.g. a scan cursor. Negative integers are a
    /// protocol error.
    pub fn into_uint(self) -> Result<u64> {
        match self {
            Self::Int(i) => {
                u64::try_from(i).map_err(|_| Error::Protocol(format!("expected unsigned integer, got {i}")))
            }
            Self::Bytes(ref b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| self.unexpected("unsigned integer")),
            Self::Text(ref s) => s.parse().map_err(|_| self.unexpected("unsigned integer")),
            other => Err(other.unexpected("unsigned integer")),
        }
    }

    /// `Bool` as is, integers as "non-zero".
    pub fn into_bool(self) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(b),
            Self::Int(i) => Ok(i != 0),
            other => Err(other.unexpected("boolean")),
        }
    }

    pub fn into_f64(self) -> Result<Option<f64>> {
        match self {
            Self::Nil => Ok(None),
            Self::Double(d) => Ok(Some(d)),
            Self::Int(i) => Ok(Some(i as f64)),
            Self::Bytes(ref b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Some)
                .ok_or_else(|| self.unexpected("float")),
            Self::Text(ref s) => s.parse().map(Some).map_err(|_| self.unexpected("float")),
            other => Err(other.unexpected("float")),
        }
    }

    /// Bulk data as bytes, whichever value mode produced it.
    pub fn into_bytes(self) -> Result<Option<Bytes>> {
        match self {
            Self::Nil => Ok(None),
            Self::Bytes(b) => Ok(Some(b)),
            Self::Text(s) => Ok(Some(Bytes::from(s))),
            other => Err(other.unexpected("bulk string")),
        }
    }

    /// Bulk data as text. Invalid UTF-8 is a protocol error.
    pub fn into_string(self) -> Result<Option<String>> {
        match self {
            Self::Nil => Ok(None),
            Self::Text(s) => Ok(Some(s)),
            Self::Bytes(b) => String::from_utf8(b.to_vec())
                .map(Some)
                .map_err(|_| Error::Protocol("reply is not valid UTF-8".into())),
            other => Err(other.unexpected("string")),
        }
    }

    /// Arrays as is, nil as empty.
    pub fn into_array(self) -> Result<Vec<Reply>> {
        match self {
            Self::Array(items) => Ok(items),
            Self::Nil => Ok(Vec::new()),
            other => Err(other.unexpected("array")),
        }
    }

    /// Maps, or flat `[k1, v1, k2, v2, ..]` arrays as RESP2 sends them.
    pub fn into_pairs(self) -> Result<Vec<(Reply, Reply)>> {
        match self {
            Self::Map(pairs) => Ok(pairs),
            Self::Array(items) if items.len() % 2 == 0 => {
                let mut pairs = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    pairs.push((k, v));
                }
                Ok(pairs)
            }
            Self::Nil => Ok(Vec::new()),
            other => Err(other.unexpected("map")),
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        Error::Protocol(format!("expected {expected} reply, got {}", self.type_name()))
    }
}

fn bulk(data: Bytes, mode: ValueMode) -> Reply {
    match mode {
        ValueMode::Bytes => Reply::Bytes(data),
        ValueMode::Utf8 => match std::str::from_utf8(&data) {
            Ok(s) => Reply::Text(s.to_string()),
            Err(_) => Reply::Bytes(data),
        },
    }
}

/// One page of a `SCAN`-family iteration. Iteration is complete when the
/// returned cursor is 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage {
    pub cursor: u64,
    pub items: Vec<Reply>,
}

impl ScanPage {
    pub fn is_last(&self) -> bool {
        self.cursor == 0
    }
}

impl TryFrom<Reply> for ScanPage {
    type Error = Error;

    fn try_from(reply: Reply) -> Result<Self> {
        let mut parts = reply.into_array()?.into_iter();
        let (Some(cursor), Some(items), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::Protocol("scan reply must be [cursor, items]".into()));
        };
        Ok(Self {
            cursor: cursor.into_uint()?,
            items: items.into_array()?,
        })
    }
}
