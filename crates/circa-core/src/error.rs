//! Error taxonomy.
//!
//! Three layers, raised at three different times:
//!
//! - [`CommandError`]: a command could not be constructed (field out of
//!   range). Raised before anything touches the wire or the state machines.
//! - [`DecodeError`]: received bytes do not parse as a CA message. Always
//!   the peer's fault.
//! - [`ProtocolError`]: a well-formed command is illegal for the current
//!   role or state, or references an unknown identifier. Attributed to one
//!   side by [`fault_for`].

use std::fmt;

use crate::command::Direction;
use crate::state::Role;

/// Field validation failure at command construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Circuit priority must be ≤ 99.
    PriorityOutOfRange(u16),
    /// A string field exceeds its wire limit.
    StringTooLong {
        what: &'static str,
        len: usize,
        max: usize,
    },
    /// More enum states than the wire format can carry.
    TooManyEnumStates(usize),
    /// Channel names must be non-empty.
    EmptyChannelName,
    /// A string field contains an interior NUL byte.
    EmbeddedNul(&'static str),
    /// A DBR value array does not match the command's declared data type.
    DbrTypeMismatch {
        data_type: &'static str,
        value: &'static str,
    },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::PriorityOutOfRange(p) => {
                write!(f, "priority {} out of range (max 99)", p)
            }
            CommandError::StringTooLong { what, len, max } => {
                write!(f, "{} is {} bytes, limit is {}", what, len, max)
            }
            CommandError::TooManyEnumStates(n) => {
                write!(f, "{} enum states, wire format carries at most 16", n)
            }
            CommandError::EmptyChannelName => write!(f, "channel name is empty"),
            CommandError::EmbeddedNul(what) => {
                write!(f, "{} contains an interior NUL byte", what)
            }
            CommandError::DbrTypeMismatch { data_type, value } => {
                write!(f, "{} values cannot be carried as {}", value, data_type)
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// Malformed wire data on the receive path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Command code not in the CA catalogue.
    UnknownCommand(u16),
    /// `data_type` field is not a DBR type code.
    UnknownDbrType(u16),
    /// `data_type` is a valid DBR code but this command cannot carry it.
    UnexpectedDataType { command: u16, data_type: u16 },
    /// Declared payload is too short for the declared element count.
    PayloadTooShort { expected: usize, got: usize },
    /// A wire string is not valid UTF-8.
    InvalidString(&'static str),
    /// The command code exists, but not in the direction this role sends.
    NoSuchCommandForRole { command: u16, sender: Role },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownCommand(code) => write!(f, "unknown command code {}", code),
            DecodeError::UnknownDbrType(code) => write!(f, "unknown DBR type code {}", code),
            DecodeError::UnexpectedDataType { command, data_type } => {
                write!(
                    f,
                    "command {} cannot carry data_type {}",
                    command, data_type
                )
            }
            DecodeError::PayloadTooShort { expected, got } => {
                write!(f, "payload too short: need {} bytes, have {}", expected, got)
            }
            DecodeError::InvalidString(what) => {
                write!(f, "{} is not valid UTF-8", what)
            }
            DecodeError::NoSuchCommandForRole { command, sender } => {
                write!(f, "command {} has no form sent by {}", command, sender)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Which side of the circuit broke the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Local,
    Remote,
}

/// The attribution rule (the only place it is computed): a REQUEST failing
/// validation blames the client role, a RESPONSE blames the server. If our
/// role equals the blamed role the fault is local, otherwise remote.
/// Bidirectional commands blame whoever sent them, which is what
/// `sent_by_us` resolves.
pub fn fault_for(our_role: Role, direction: Direction, sent_by_us: bool) -> Fault {
    let party_at_fault = match direction {
        Direction::Request => Role::Client,
        Direction::Response => Role::Server,
        Direction::Bidirectional => {
            return if sent_by_us { Fault::Local } else { Fault::Remote };
        }
    };
    if our_role == party_at_fault {
        Fault::Local
    } else {
        Fault::Remote
    }
}

/// A protocol violation, attributed to one side.
///
/// `Local` is raised synchronously from `send`/`add_channel`; `Remote` from
/// `recv`. Once raised, the offending state machine is pinned at its error
/// state and further operations on the circuit fail fast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// We violated the protocol.
    Local { reason: String },
    /// The peer violated the protocol.
    Remote { reason: String },
}

impl ProtocolError {
    pub fn new(fault: Fault, reason: impl Into<String>) -> Self {
        match fault {
            Fault::Local => ProtocolError::Local {
                reason: reason.into(),
            },
            Fault::Remote => ProtocolError::Remote {
                reason: reason.into(),
            },
        }
    }

    pub fn local(reason: impl Into<String>) -> Self {
        Self::new(Fault::Local, reason)
    }

    pub fn remote(reason: impl Into<String>) -> Self {
        Self::new(Fault::Remote, reason)
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ProtocolError::Local { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            ProtocolError::Local { reason } | ProtocolError::Remote { reason } => reason,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Local { reason } => {
                write!(f, "local protocol error: {}", reason)
            }
            ProtocolError::Remote { reason } => {
                write!(f, "remote protocol error: {}", reason)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<DecodeError> for ProtocolError {
    fn from(err: DecodeError) -> Self {
        ProtocolError::remote(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_blames_client() {
        assert_eq!(
            fault_for(Role::Client, Direction::Request, true),
            Fault::Local
        );
        assert_eq!(
            fault_for(Role::Server, Direction::Request, false),
            Fault::Remote
        );
    }

    #[test]
    fn response_blames_server() {
        assert_eq!(
            fault_for(Role::Server, Direction::Response, true),
            Fault::Local
        );
        assert_eq!(
            fault_for(Role::Client, Direction::Response, false),
            Fault::Remote
        );
    }

    #[test]
    fn bidirectional_blames_sender() {
        assert_eq!(
            fault_for(Role::Client, Direction::Bidirectional, true),
            Fault::Local
        );
        assert_eq!(
            fault_for(Role::Client, Direction::Bidirectional, false),
            Fault::Remote
        );
    }

    #[test]
    fn decode_error_becomes_remote() {
        let err: ProtocolError = DecodeError::UnknownCommand(99).into();
        assert!(!err.is_local());
        assert!(err.reason().contains("99"));
    }

    #[test]
    fn display_carries_reason() {
        let err = ProtocolError::local("sent VersionResponse as CLIENT");
        let s = format!("{}", err);
        assert!(s.contains("local protocol error"));
        assert!(s.contains("VersionResponse"));
    }
}
