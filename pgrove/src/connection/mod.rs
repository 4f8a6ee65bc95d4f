//! The [`Connection`] type.
use bytes::{Buf, BytesMut};
use lru::LruCache;
use std::{
    io,
    num::NonZeroUsize,
    task::{Context, Poll, ready},
};

use crate::{
    Result,
    common::verbose,
    net::Socket,
    oid::OidMap,
    postgres::{
        BackendProtocol, FrontendProtocol,
        backend::{self, BackendKeyData},
        frontend,
    },
    statement::StatementName,
    transport::PgTransport,
};

mod config;
pub(crate) mod startup;

pub use config::{Config, ParseError};

const DEFAULT_BUF_CAPACITY: usize = 1024;
const STMT_CACHE_CAPACITY: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Idle,
    Bad,
}

#[derive(Debug)]
enum Health {
    Idle,
    SyncSent,
}

/// A single buffered postgres connection.
#[derive(Debug)]
pub struct Connection {
    socket: Socket,
    read_buf: BytesMut,
    write_buf: BytesMut,
    stmts: LruCache<u64, StatementName>,
    oids: OidMap,
    backend_key: Option<BackendKeyData>,
    status: Status,
    ready_request: bool,
    health: Health,
    terminating: bool,
    error_context: Option<&'static str>,
    config: Config,
}

impl Connection {
    /// Open a connection from an url.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(Config::parse(url)?).await
    }

    /// Open a connection from environment variables.
    ///
    /// See [`Config::from_env`] for the variables read.
    pub async fn connect_env() -> Result<Self> {
        Self::connect_with(Config::from_env()).await
    }

    /// Open a connection with the given config.
    pub async fn connect_with(config: Config) -> Result<Self> {
        let socket = match &config.socket {
            Some(path) => Socket::connect_socket(path).await?,
            None if config.host.as_str() == "localhost" => {
                Socket::connect_socket(&format!("/run/postgresql/.s.PGSQL.{}", config.port)).await?
            },
            None => Socket::connect_tcp(&config.host, config.port).await?,
        };

        let mut conn = Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            stmts: LruCache::new(NonZeroUsize::new(STMT_CACHE_CAPACITY).unwrap()),
            oids: config.oids.clone(),
            backend_key: None,
            status: Status::Idle,
            ready_request: false,
            health: Health::Idle,
            terminating: false,
            error_context: None,
            config,
        };

        startup::handshake(&mut conn).await?;

        Ok(conn)
    }

    /// The config this connection was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `true` once the connection is marked unusable.
    pub fn is_bad(&self) -> bool {
        matches!(self.status, Status::Bad)
    }

    /// Phase description of the last failed query, cleared on success.
    pub fn error_context(&self) -> Option<&'static str> {
        self.error_context
    }

    /// Snapshot the backend key and server address for out-of-band
    /// cancellation.
    ///
    /// Errors with [`CancelKeyMissing`][crate::error::CancelKeyMissing]
    /// when the server sent no `BackendKeyData` during startup.
    pub fn cancel_handle(&self) -> Result<crate::cancel::CancelHandle> {
        crate::cancel::CancelHandle::new(self)
    }

    pub(crate) fn backend_key_data(&self) -> Option<BackendKeyData> {
        self.backend_key
    }

    /// Poll a `Sync` round trip, used as liveness check by the pool.
    pub(crate) fn poll_ready(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        if self.is_bad() {
            return Poll::Ready(Err(broken().into()));
        }
        loop {
            match self.health {
                Health::Idle => {
                    self.send(frontend::Sync);
                    self.health = Health::SyncSent;
                },
                Health::SyncSent => {
                    let result = ready!(self.poll_recv::<backend::ReadyForQuery>(cx));
                    self.health = Health::Idle;
                    return Poll::Ready(result.map(drop));
                },
            }
        }
    }

    /// Poll a graceful close: `Terminate` then socket shutdown.
    pub(crate) fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        #[cfg(feature = "tokio")]
        {
            use std::pin::Pin;
            use tokio::io::AsyncWrite;

            if !self.terminating {
                self.send(frontend::Terminate);
                self.terminating = true;
            }
            // a failed flush still shuts the socket down
            if let Err(_err) = ready!(self.poll_flush(cx)) {
                verbose!("flush on shutdown failed: {_err}");
            }
            Pin::new(&mut self.socket).poll_shutdown(cx)
        }

        #[cfg(not(feature = "tokio"))]
        {
            let _ = cx;
            let _ = self.terminating;
            panic!("runtime disabled")
        }
    }

    /// Read more bytes from the socket into `read_buf`.
    fn poll_read_socket(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        #[cfg(feature = "tokio")]
        {
            use bytes::BufMut;
            use std::pin::Pin;
            use tokio::io::{AsyncRead, ReadBuf};

            let n = {
                let dst = self.read_buf.chunk_mut();
                let dst = unsafe { dst.as_uninit_slice_mut() };
                let mut buf = ReadBuf::uninit(dst);
                let ptr = buf.filled().as_ptr();
                ready!(Pin::new(&mut self.socket).poll_read(cx, &mut buf)?);

                // Ensure the pointer does not change from under us
                assert_eq!(ptr, buf.filled().as_ptr());
                buf.filled().len()
            };

            if n == 0 {
                self.status = Status::Bad;
                return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
            }

            // Safety: This is guaranteed to be the number of initialized (and read)
            // bytes due to the invariants provided by `ReadBuf::filled`.
            unsafe {
                self.read_buf.advance_mut(n);
            }

            Poll::Ready(Ok(()))
        }

        #[cfg(not(feature = "tokio"))]
        {
            let _ = cx;
            panic!("runtime disabled")
        }
    }

    /// Frame one backend message out of `read_buf`.
    fn poll_recv_raw(&mut self, cx: &mut Context) -> Poll<io::Result<(u8, bytes::Bytes)>> {
        loop {
            if let Some(mut header) = self.read_buf.get(..5) {
                let msgtype = header.get_u8();
                let len = header.get_i32() as usize;

                if self.read_buf.len() - 1/*msgtype*/ >= len {
                    self.read_buf.advance(5);
                    let body = self.read_buf.split_to(len - 4).freeze();
                    return Poll::Ready(Ok((msgtype, body)));
                }

                self.read_buf.reserve(1 + len);
            } else {
                self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
            }

            if let Err(err) = ready!(self.poll_read_socket(cx)) {
                self.status = Status::Bad;
                return Poll::Ready(Err(err));
            }
        }
    }
}

fn broken() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connection marked bad")
}

impl PgTransport for Connection {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        #[cfg(feature = "tokio")]
        {
            use std::pin::Pin;
            use tokio::io::AsyncWrite;

            while !self.write_buf.is_empty() {
                let n = match ready!(Pin::new(&mut self.socket).poll_write(cx, self.write_buf.chunk())) {
                    Ok(0) => {
                        self.status = Status::Bad;
                        return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                    },
                    Ok(n) => n,
                    Err(err) => {
                        self.status = Status::Bad;
                        return Poll::Ready(Err(err));
                    },
                };
                self.write_buf.advance(n);
            }

            Pin::new(&mut self.socket).poll_flush(cx)
        }

        #[cfg(not(feature = "tokio"))]
        {
            let _ = cx;
            panic!("runtime disabled")
        }
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        ready!(self.poll_flush(cx))?;

        loop {
            let (msgtype, body) = ready!(self.poll_recv_raw(cx))?;

            // drain after an error or abandoned stream
            if self.ready_request {
                if msgtype == backend::ReadyForQuery::MSGTYPE {
                    self.ready_request = false;
                }
                continue;
            }

            match msgtype {
                backend::NoticeResponse::MSGTYPE => {
                    verbose!("{:?}", crate::ext::FmtExt::lossy(&body[..]));
                },
                backend::ParameterStatus::MSGTYPE => {},
                crate::postgres::ErrorResponse::MSGTYPE => {
                    let err = crate::postgres::ErrorResponse::decode(msgtype, body)?;
                    match err.is_fatal() {
                        true => self.status = Status::Bad,
                        false => self.ready_request = true,
                    }
                    return Poll::Ready(Err(err.into()));
                },
                _ => return Poll::Ready(B::decode(msgtype, body).map_err(Into::into)),
            }
        }
    }

    fn ready_request(&mut self) {
        self.ready_request = true;
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        frontend::write(message, &mut self.write_buf);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        startup.write(&mut self.write_buf);
    }

    fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        self.stmts.get(&sql).cloned()
    }

    fn add_stmt(&mut self, sql: u64, id: StatementName) {
        self.stmts.put(sql, id);
    }

    fn oids(&self) -> &OidMap {
        &self.oids
    }

    fn oids_mut(&mut self) -> &mut OidMap {
        &mut self.oids
    }

    fn mark_bad(&mut self) {
        self.status = Status::Bad;
    }

    fn backend_key(&self) -> Option<BackendKeyData> {
        self.backend_key
    }

    fn set_error_context(&mut self, context: Option<&'static str>) {
        self.error_context = context;
    }
}
