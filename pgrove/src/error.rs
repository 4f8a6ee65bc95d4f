//! `pgrove` error types.
use std::{backtrace::Backtrace, fmt, io, str::Utf8Error};

use crate::{
    common::unit_error,
    connection::{ParseError, startup::UnsupportedAuth},
    fetch::EmptyQueryError,
    oid::OidMapError,
    postgres::{ErrorResponse, ProtocolError, SqlState},
    row::{DecodeError, RowNotFound},
    transaction::TransactionStateError,
};

/// A specialized [`Result`] type for `pgrove` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pgrove` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub(crate) fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Coarse classification used by the failover layer.
    pub fn condition(&self) -> ErrorCondition {
        match &self.kind {
            ErrorKind::Io(_) => ErrorCondition::ConnectionError,
            ErrorKind::Timeout(_) => ErrorCondition::Timeout,
            ErrorKind::Protocol(_)
            | ErrorKind::UnsupportedAuth(_)
            | ErrorKind::TransactionState(_) => ErrorCondition::ProtocolError,
            ErrorKind::Decode(_) => ErrorCondition::TypeMismatch,
            ErrorKind::OidMap(_) => ErrorCondition::IntrospectionError,
            ErrorKind::Database(e) => match e.sql_state() {
                SqlState::ConnectionException => ErrorCondition::ConnectionError,
                SqlState::ReadOnlyTransaction => ErrorCondition::DatabaseReadonly,
                _ => ErrorCondition::ServerError,
            },
            ErrorKind::Config(_)
            | ErrorKind::Utf8(_)
            | ErrorKind::RowNotFound(_)
            | ErrorKind::EmptyQuery(_)
            | ErrorKind::PoolClosed(_)
            | ErrorKind::PoolExhausted(_)
            | ErrorKind::CancelKeyMissing(_) => ErrorCondition::Other,
        }
    }

    pub(crate) fn timeout() -> Error {
        TimeoutError.into()
    }

    pub(crate) fn empty_query() -> Error {
        EmptyQueryError.into()
    }

    pub(crate) fn row_not_found() -> Error {
        RowNotFound.into()
    }

    /// Whether acquiring a fresh connection and repeating the operation
    /// can plausibly succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.condition(),
            ErrorCondition::ConnectionError | ErrorCondition::Timeout,
        )
    }
}

/// The failure classes the driver reacts to.
///
/// Every [`Error`] maps onto exactly one condition; the failover layer
/// keys its retry and fallback decisions off this instead of matching
/// the full error tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCondition {
    /// Transport-level failure, or the server reported a class 08 error.
    ConnectionError,
    /// An operation deadline elapsed.
    Timeout,
    /// The byte stream violated the wire protocol.
    ProtocolError,
    /// A value could not be decoded as the requested type.
    TypeMismatch,
    /// Runtime oid resolution failed.
    IntrospectionError,
    /// A write was rejected by a read-only server.
    DatabaseReadonly,
    /// Any other server-reported error.
    ServerError,
    /// Errors the failover layer never acts on.
    Other,
}

unit_error! {
    /// An error when an operation deadline elapsed.
    pub struct TimeoutError("operation deadline exceeded");
}

unit_error! {
    /// An error when acquiring from a closed pool.
    pub struct PoolClosed("connection pool is closed");
}

unit_error! {
    /// An error when the pool waiter queue is at capacity.
    pub struct PoolExhausted("connection pool waiter queue is full");
}

unit_error! {
    /// An error when cancelling without a `BackendKeyData` from startup.
    pub struct CancelKeyMissing("server did not provide a cancellation key");
}

/// All possible error kind from `pgrove` library.
pub enum ErrorKind {
    Config(ParseError),
    Protocol(ProtocolError),
    Io(io::Error),
    Database(ErrorResponse),
    Utf8(std::str::Utf8Error),
    RowNotFound(RowNotFound),
    EmptyQuery(EmptyQueryError),
    UnsupportedAuth(UnsupportedAuth),
    Decode(DecodeError),
    OidMap(OidMapError),
    Timeout(TimeoutError),
    TransactionState(TransactionStateError),
    PoolClosed(PoolClosed),
    PoolExhausted(PoolExhausted),
    CancelKeyMissing(CancelKeyMissing),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<std::io::Error>e => ErrorKind::Io(e));
from!(<ErrorResponse>e => ErrorKind::Database(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));
from!(<RowNotFound>e => ErrorKind::RowNotFound(e));
from!(<EmptyQueryError>e => ErrorKind::EmptyQuery(e));
from!(<UnsupportedAuth>e => ErrorKind::UnsupportedAuth(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<OidMapError>e => ErrorKind::OidMap(e));
from!(<TimeoutError>e => ErrorKind::Timeout(e));
from!(<TransactionStateError>e => ErrorKind::TransactionState(e));
from!(<PoolClosed>e => ErrorKind::PoolClosed(e));
from!(<PoolExhausted>e => ErrorKind::PoolExhausted(e));
from!(<CancelKeyMissing>e => ErrorKind::CancelKeyMissing(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::UnsupportedAuth(e) => e.fmt(f),
            Self::RowNotFound(e) => e.fmt(f),
            Self::EmptyQuery(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
            Self::OidMap(e) => e.fmt(f),
            Self::Timeout(e) => e.fmt(f),
            Self::TransactionState(e) => e.fmt(f),
            Self::PoolClosed(e) => e.fmt(f),
            Self::PoolExhausted(e) => e.fmt(f),
            Self::CancelKeyMissing(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn io_errors_are_recoverable() {
        let err = Error::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(err.condition(), ErrorCondition::ConnectionError);
        assert!(err.is_recoverable());
    }

    #[test]
    fn timeout_is_recoverable() {
        let err = Error::from(TimeoutError);
        assert_eq!(err.condition(), ErrorCondition::Timeout);
        assert!(err.is_recoverable());
    }

    #[test]
    fn server_errors_are_not_recoverable() {
        let err = Error::from(ErrorResponse::test_frame("ERROR", "42601", "syntax error"));
        assert_eq!(err.condition(), ErrorCondition::ServerError);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn readonly_sql_state_maps_to_its_own_condition() {
        let err = Error::from(ErrorResponse::test_frame("ERROR", "25006", "read-only"));
        assert_eq!(err.condition(), ErrorCondition::DatabaseReadonly);
    }
}
