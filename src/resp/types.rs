use bytes::Bytes;

/// Raw reply frames, RESP2 plus the RESP3 types a server sends after `HELLO 3`.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// +OK\r\n
    SimpleString(String),
    /// -ERR message\r\n  or  !<len>\r\n…  (bulk error)
    Error(String),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n
    BulkString(Bytes),
    /// *2\r\n…  (also RESP3 sets and push frames)
    Array(Vec<RespValue>),
    /// $-1\r\n, *-1\r\n or _\r\n
    Null,
    /// ,3.14\r\n
    Double(f64),
    /// #t\r\n
    Boolean(bool),
    /// %N\r\n…
    Map(Vec<(RespValue, RespValue)>),
    /// (3492890328409238509324850943850943825024385\r\n
    BigNumber(String),
    /// =15\r\ntxt:Some string\r\n
    Verbatim { format: String, text: String },
}

impl RespValue {
    /// Try to interpret this value as a UTF-8 string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::SimpleString(s) => Some(s),
            Self::BulkString(b) => std::str::from_utf8(b).ok(),
            Self::Verbatim { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the error message if this is an error reply.
    pub fn as_error_msg(&self) -> Option<&str> {
        match self {
            Self::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// True for a `+OK` status reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::SimpleString(s) if s == "OK")
    }

    /// Returns the type name as a static string (useful for error messages).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "simple_string",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::BulkString(_) => "bulk_string",
            Self::Array(_) => "array",
            Self::Null => "null",
            Self::Double(_) => "double",
            Self::Boolean(_) => "boolean",
            Self::Map(_) => "map",
            Self::BigNumber(_) => "big_number",
            Self::Verbatim { .. } => "verbatim_string",
        }
    }
}
