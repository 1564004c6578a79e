use thiserror::Error;

/// Malformed or truncated RESP input. Always fatal to the connection that
/// produced it; never propagated to other connections or to replication state.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed length in {0}")]
    BadLength(&'static str),
    #[error("premature end of frame")]
    Truncated,
    #[error("array element is not a bulk string")]
    NonBulkElement,
    #[error("unrecognized frame type {0:?}")]
    UnknownType(u8),
    #[error("connection closed by peer")]
    Closed,
}

/// A command whose arguments are well-formed RESP but semantically invalid
/// for the verb in question. Carries the exact reply text so callers can
/// send it back unchanged (spec error strings are part of the wire contract).
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Reply(String),
}

impl CommandError {
    pub fn reply(msg: impl Into<String>) -> Self {
        CommandError::Reply(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum RdbError {
    #[error("bad magic header")]
    BadMagic,
    #[error("unsupported length encoding byte {0:#04x}")]
    UnsupportedLength(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}
