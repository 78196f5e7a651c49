use std::io;

use thiserror::Error;

// ── Error taxonomy ─────────────────────────────────────────────────
//
//  Error
//  ├── Configuration          (bad topology / option, fails fast)
//  ├── Connect                (one endpoint unreachable)
//  ├── PoolUnavailable        (no usable primary)
//  ├── Transient              (connection dropped mid-command, retried)
//  ├── Timeout                (read timeout, retried like Transient)
//  ├── InvalidDatabaseIndex   (SELECT rejected)
//  ├── Server                 (store returned an error reply)
//  ├── Protocol               (malformed wire data)
//  └── Command                (context wrapper added by the driver)

/// Structured server error kinds, parsed from the reply prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// Generic ERR
    Err,
    /// WRONGTYPE Operation against a key holding the wrong kind of value
    WrongType,
    /// READONLY You can't write against a read only replica
    ReadOnly,
    /// LOADING Redis is loading the dataset in memory
    Loading,
    /// NOSCRIPT No matching script
    NoScript,
    /// BUSY Redis is busy running a script
    Busy,
    /// NOAUTH Authentication required
    NoAuth,
    /// Any other error prefix
    Other(String),
}

impl ServerErrorKind {
    /// Classify a server error message by its first word.
    pub fn from_message(msg: &str) -> Self {
        let prefix = msg.split_whitespace().next().unwrap_or("UNKNOWN");
        match prefix {
            "ERR" => Self::Err,
            "WRONGTYPE" => Self::WrongType,
            "READONLY" => Self::ReadOnly,
            "LOADING" => Self::Loading,
            "NOSCRIPT" => Self::NoScript,
            "BUSY" => Self::Busy,
            "NOAUTH" => Self::NoAuth,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Flat classification of [`Error`], seen through the `Command` wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connect,
    PoolUnavailable,
    Transient,
    InvalidDatabaseIndex,
    Server,
    Protocol,
}

/// All error variants for kvroute.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed topology or option. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single endpoint could not be reached.
    #[error("cannot connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// No usable primary could be established.
    #[error("pool unavailable: {0}")]
    PoolUnavailable(String),

    /// The connection broke while a command was in flight.
    #[error("connection error: {0}")]
    Transient(#[from] io::Error),

    /// A read did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The store rejected a `SELECT`.
    #[error("invalid database index {index}: {message}")]
    InvalidDatabaseIndex { index: u16, message: String },

    /// The store answered a well-formed command with an error reply.
    #[error("server error: {message}")]
    Server { kind: ServerErrorKind, message: String },

    /// The wire data could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// RESP decoder needs more bytes. Control flow only, never surfaced.
    #[error("incomplete RESP frame")]
    Incomplete,

    /// Context added by the driver for errors it does not retry.
    #[error("{command}: {source}")]
    Command {
        command: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Build a server error from a raw reply message, parsing its kind.
    pub fn server(msg: impl Into<String>) -> Self {
        let message = msg.into();
        Self::Server {
            kind: ServerErrorKind::from_message(&message),
            message,
        }
    }

    /// Attach the failing command name.
    pub fn for_command(self, command: &str) -> Self {
        match self {
            already @ Self::Command { .. } => already,
            other => Self::Command {
                command: command.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, past any `Command` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Self::Command { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Connect { .. } => ErrorKind::Connect,
            Self::PoolUnavailable(_) => ErrorKind::PoolUnavailable,
            Self::Transient(_) | Self::Timeout(_) => ErrorKind::Transient,
            Self::InvalidDatabaseIndex { .. } => ErrorKind::InvalidDatabaseIndex,
            Self::Server { .. } => ErrorKind::Server,
            Self::Protocol(_) | Self::Incomplete => ErrorKind::Protocol,
            Self::Command { .. } => unreachable!("root() never returns a wrapper"),
        }
    }

    /// Whether the driver may recover from this error by reconnecting.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Server error kind, if this is a server reply error.
    pub fn server_kind(&self) -> Option<&ServerErrorKind> {
        match self.root() {
            Self::Server { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Tests ──────────────────────────────────────────────────────────
