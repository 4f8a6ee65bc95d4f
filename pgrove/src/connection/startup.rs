//! Connection startup phase.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use std::fmt;

use super::Connection;
use crate::{
    Result,
    common::verbose,
    postgres::{BackendMessage, backend::Authentication, frontend},
    transport::{PgTransport, PgTransportExt},
};

/// Drive the startup exchange until the first `ReadyForQuery`.
pub(super) async fn handshake(conn: &mut Connection) -> Result<()> {
    let (user, dbname, pass) = (
        conn.config.user.clone(),
        conn.config.dbname.clone(),
        conn.config.pass.clone(),
    );

    conn.send_startup(frontend::Startup {
        user: &user,
        database: Some(&dbname),
        replication: None,
    });
    conn.flush().await?;

    loop {
        match conn.recv::<BackendMessage>().await? {
            BackendMessage::Authentication(auth) => match auth {
                Authentication::Ok => {},
                Authentication::CleartextPassword => {
                    conn.send(frontend::PasswordMessage { password: &pass });
                    conn.flush().await?;
                },
                unsupported => return Err(UnsupportedAuth::new(&unsupported).into()),
            },
            BackendMessage::BackendKeyData(key) => {
                conn.backend_key = Some(key);
            },
            BackendMessage::ParameterStatus(_status) => {
                verbose!("{:?}", _status);
            },
            BackendMessage::NegotiateProtocolVersion(_) => {},
            BackendMessage::ReadyForQuery(_) => break,
            message => return Err(message.unexpected("startup").into()),
        }
    }

    Ok(())
}

/// An error when the server requests an authentication scheme the driver
/// does not speak.
pub struct UnsupportedAuth {
    method: &'static str,
}

impl UnsupportedAuth {
    fn new(auth: &Authentication) -> Self {
        let method = match auth {
            Authentication::KerberosV5 => "KerberosV5",
            Authentication::MD5Password { .. } => "MD5Password",
            Authentication::GSS | Authentication::GSSContinue { .. } => "GSS",
            Authentication::SSPI => "SSPI",
            Authentication::SASL { .. }
            | Authentication::SASLContinue { .. }
            | Authentication::SASLFinal { .. } => "SASL",
            Authentication::Ok | Authentication::CleartextPassword => "Unknown",
        };
        Self { method }
    }
}

impl std::error::Error for UnsupportedAuth { }

impl fmt::Display for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "authentication method {} is not supported", self.method)
    }
}

impl fmt::Debug for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
