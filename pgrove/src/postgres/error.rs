//! Protocol error and SQLSTATE classification.
use std::{fmt, str::Utf8Error};

use super::BackendMessage;

/// An error when translating a buffer from postgres.
pub enum ProtocolError {
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    UnknownAuth {
        auth: u32,
    },
    Utf8(Utf8Error),
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::Unexpected { expect, found, phase } => {
                let found = BackendMessage::message_name(found);
                match expect {
                    Some(m) => {
                        write!(
                            f,
                            "Expected message `{}` found `{found}`",
                            BackendMessage::message_name(m),
                        )?
                    },
                    None => write!(f, "Unexpected message `{found}`")?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::UnknownAuth { auth } => {
                write!(f, "Unknown authentication request `{auth}`")
            },
            ProtocolError::Utf8(err) => {
                write!(f, "Non utf8 string from postgres: {err}")
            },
        }
    }
}

impl From<Utf8Error> for ProtocolError {
    fn from(err: Utf8Error) -> Self {
        Self::Utf8(err)
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn unknown_auth(auth: u32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }
}

/// Coarse SQLSTATE classification of a server-reported error.
///
/// Only the classes the driver acts upon are distinguished; everything else
/// is [`Other`][SqlState::Other]. The full five-character code stays
/// available on [`ErrorResponse`][super::ErrorResponse].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlState {
    /// Class 08: the backend reports a connection exception.
    ConnectionException,
    /// `25006`: a write was attempted on a read-only transaction or replica.
    ReadOnlyTransaction,
    /// Class 42: syntax error or access rule violation.
    SyntaxOrAccess,
    /// Class 57: operator intervention, including `57014` query_canceled
    /// and server shutdown codes.
    OperatorIntervention,
    /// Any other SQLSTATE.
    Other,
}

impl SqlState {
    pub fn from_code(code: &str) -> SqlState {
        match code.as_bytes() {
            [b'0', b'8', ..] => SqlState::ConnectionException,
            b"25006" => SqlState::ReadOnlyTransaction,
            [b'4', b'2', ..] => SqlState::SyntaxOrAccess,
            [b'5', b'7', ..] => SqlState::OperatorIntervention,
            _ => SqlState::Other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::SqlState;

    #[test]
    fn sql_state_classes() {
        assert_eq!(SqlState::from_code("08006"), SqlState::ConnectionException);
        assert_eq!(SqlState::from_code("25006"), SqlState::ReadOnlyTransaction);
        assert_eq!(SqlState::from_code("42601"), SqlState::SyntaxOrAccess);
        assert_eq!(SqlState::from_code("57P01"), SqlState::OperatorIntervention);
        assert_eq!(SqlState::from_code("23505"), SqlState::Other);
    }
}
