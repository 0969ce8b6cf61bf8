use std::fmt;

use crate::{HandlerRole, Op};

/// Why a value was refused as a presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceViolation {
    Primitive,
    Null,
    Thenable,
}

/// Every failure an eventual send or a resolution can produce.
///
/// Errors are cloned into each dependent promise, so a single rejection can
/// reach every send buffered behind it.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    InvalidHandler { reason: String },
    InvalidPresence(PresenceViolation),
    MissingOperation { role: HandlerRole, op: Op },
    TypeError(String),
    Rejected(String),
    ResolutionCycle,
    BufferFull { limit: usize },
}

impl Error {
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError(message.into())
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            Self::TypeError(_)
                | Self::InvalidHandler { .. }
                | Self::InvalidPresence(_)
                | Self::MissingOperation { .. }
                | Self::ResolutionCycle
        )
    }
}

impl fmt::Display for PresenceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive => f.write_str("presence cannot be a primitive"),
            Self::Null => f.write_str("presence cannot be null"),
            Self::Thenable => f.write_str("presence cannot be a promise or other thenable"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandler { reason } => write!(f, "invalid handler: {reason}"),
            Self::InvalidPresence(violation) => write!(f, "{violation}"),
            Self::MissingOperation { role, op } => {
                write!(f, "{role} handler does not implement {op}")
            }
            Self::TypeError(message) => write!(f, "type error: {message}"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            Self::ResolutionCycle => {
                f.write_str("promise cannot be resolved to itself, directly or through forwarding")
            }
            Self::BufferFull { limit } => {
                write!(f, "postponed send buffer is full ({limit} sends)")
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_piece() {
        insta::assert_snapshot!(
            Error::MissingOperation { role: HandlerRole::Fulfilled, op: Op::Post },
            @"fulfilled handler does not implement POST"
        );
        insta::assert_snapshot!(
            Error::InvalidPresence(PresenceViolation::Thenable),
            @"presence cannot be a promise or other thenable"
        );
        insta::assert_snapshot!(
            Error::BufferFull { limit: 3 },
            @"postponed send buffer is full (3 sends)"
        );
    }

    #[test]
    fn validation_failures_count_as_type_errors() {
        assert!(Error::InvalidPresence(PresenceViolation::Null).is_type_error());
        assert!(Error::type_error("x is not a function").is_type_error());
        assert!(!Error::rejected("boom").is_type_error());
        assert!(!Error::BufferFull { limit: 1 }.is_type_error());
    }
}
