use bytes::Bytes;
use std::fmt::Display;

use crate::error::ProtocolError;

/// The supported verbs. Dispatch is by the uppercased first array element;
/// anything else is rejected by `parse` and turned into an unknown-command
/// reply by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Echo,
    Set,
    Get,
    Config,
    Keys,
    Info,
    ReplConf,
    Psync,
    Wait,
    Type,
    XAdd,
    XRange,
    XRead,
}

impl Command {
    /// Commands whose effects are propagated to replicas verbatim.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Command::Set | Command::XAdd)
    }

    fn from_token(token: &str) -> Option<Command> {
        Some(match token.to_ascii_uppercase().as_str() {
            "PING" => Command::Ping,
            "ECHO" => Command::Echo,
            "SET" => Command::Set,
            "GET" => Command::Get,
            "CONFIG" => Command::Config,
            "KEYS" => Command::Keys,
            "INFO" => Command::Info,
            "REPLCONF" => Command::ReplConf,
            "PSYNC" => Command::Psync,
            "WAIT" => Command::Wait,
            "TYPE" => Command::Type,
            "XADD" => Command::XAdd,
            "XRANGE" => Command::XRange,
            "XREAD" => Command::XRead,
            _ => return None,
        })
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Command::Ping => "PING",
            Command::Echo => "ECHO",
            Command::Set => "SET",
            Command::Get => "GET",
            Command::Config => "CONFIG",
            Command::Keys => "KEYS",
            Command::Info => "INFO",
            Command::ReplConf => "REPLCONF",
            Command::Psync => "PSYNC",
            Command::Wait => "WAIT",
            Command::Type => "TYPE",
            Command::XAdd => "XADD",
            Command::XRange => "XRANGE",
            Command::XRead => "XREAD",
        };
        write!(f, "{}", s)
    }
}

/// A parsed command invocation: the verb, its string arguments, and the
/// original token list (needed verbatim for "Unknown command <tokens>"
/// replies).
pub struct CommandRequest {
    pub command: Command,
    pub args: Vec<String>,
    pub tokens: Vec<String>,
}

pub fn parse(array: &[Bytes]) -> Result<CommandRequest, ProtocolError> {
    let tokens: Vec<String> = array
        .iter()
        .map(|b| String::from_utf8_lossy(b).to_string())
        .collect();
    let verb = tokens.first().ok_or(ProtocolError::Truncated)?;
    match Command::from_token(verb) {
        Some(command) => Ok(CommandRequest {
            command,
            args: tokens[1..].to_vec(),
            tokens,
        }),
        None => Err(ProtocolError::UnknownType(0)),
    }
}
