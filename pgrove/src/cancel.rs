//! Out-of-band query cancellation.
//!
//! A cancel request travels over its own short-lived socket, identified
//! by the backend key captured during startup. The server closes the
//! socket without replying; delivery is best effort.
use crate::{Connection, Error, Result, common::ByteStr, deadline::Deadline, error::CancelKeyMissing};

/// Snapshot of the server address and backend key of one connection.
///
/// Obtained from [`Connection::cancel_handle`], usable after the
/// originating connection is checked back in or even closed.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    target: Target,
    process_id: u32,
    secret_key: u32,
}

#[derive(Clone, Debug)]
enum Target {
    Tcp { host: ByteStr, port: u16 },
    Unix { path: ByteStr },
}

impl CancelHandle {
    pub(crate) fn new(conn: &Connection) -> Result<Self> {
        let Some(key) = conn.backend_key_data() else {
            return Err(CancelKeyMissing.into());
        };

        let config = conn.config();
        let target = match &config.socket {
            Some(path) => Target::Unix { path: path.clone() },
            None if config.host.as_str() == "localhost" => Target::Unix {
                path: format!("/run/postgresql/.s.PGSQL.{}", config.port).into(),
            },
            None => Target::Tcp { host: config.host.clone(), port: config.port },
        };

        Ok(Self {
            target,
            process_id: key.process_id,
            secret_key: key.secret_key,
        })
    }

    /// Request cancellation of whatever the backend is currently running.
    ///
    /// An expired `deadline` fails with a timeout before any socket is
    /// opened. Completion only means the request was written; a query
    /// that already finished is unaffected.
    pub async fn cancel(&self, deadline: Deadline) -> Result<()> {
        if deadline.expired() {
            return Err(Error::timeout());
        }

        #[cfg(feature = "tokio")]
        {
            match deadline.time_left() {
                Some(limit) => match tokio::time::timeout(limit, self.send_request()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout()),
                },
                None => self.send_request().await,
            }
        }

        #[cfg(not(feature = "tokio"))]
        {
            panic!("runtime disabled")
        }
    }

    #[cfg(feature = "tokio")]
    async fn send_request(&self) -> Result<()> {
        use bytes::BytesMut;
        use tokio::io::AsyncWriteExt;

        use crate::{net::Socket, postgres::frontend};

        let mut socket = match &self.target {
            Target::Tcp { host, port } => Socket::connect_tcp(host, *port).await?,
            Target::Unix { path } => Socket::connect_socket(path).await?,
        };

        let mut buf = BytesMut::with_capacity(16);
        frontend::CancelRequest {
            process_id: self.process_id,
            secret_key: self.secret_key,
        }
        .write(&mut buf);

        socket.write_all(&buf).await?;
        socket.flush().await?;
        socket.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::Duration;

    #[tokio::test]
    async fn expired_deadline_fails_without_io() {
        let handle = CancelHandle {
            target: Target::Tcp { host: ByteStr::from_static("db.invalid"), port: 5432 },
            process_id: 7,
            secret_key: 42,
        };

        let err = handle.cancel(Deadline::after(Duration::ZERO)).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Timeout(_)));
    }

    #[tokio::test]
    async fn cancel_request_reaches_the_server() {
        use tokio::{io::AsyncReadExt, net::TcpListener};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let handle = CancelHandle {
            target: Target::Tcp { host: ByteStr::from_static("127.0.0.1"), port },
            process_id: 7,
            secret_key: 42,
        };
        handle.cancel(Deadline::after(Duration::from_secs(5))).await.unwrap();

        let frame = server.await.unwrap();
        assert_eq!(&frame[..4], 16u32.to_be_bytes());
        assert_eq!(&frame[4..8], 80_877_102u32.to_be_bytes());
        assert_eq!(&frame[8..12], 7u32.to_be_bytes());
    }
}
