//! The [`Executor`] trait.
use std::{future::Ready, pin::Pin};

use crate::{Config, Connection, Result, connection::ParseError, transport::PgTransport};

/// A source of [`PgTransport`].
///
/// Borrowed connections resolve immediately; pools and failover
/// decorators perform real work in [`Executor::Future`].
pub trait Executor: Unpin {
    /// The returned transport.
    type Transport: PgTransport;

    /// Future that resolve to [`Executor::Transport`].
    type Future: Future<Output = Result<Self::Transport>> + Unpin;

    /// Acquire the transport.
    fn connection(self) -> Self::Future;
}

impl<T: PgTransport> Executor for &mut T {
    type Transport = Self;

    type Future = Ready<Result<Self>>;

    fn connection(self) -> Self::Future {
        std::future::ready(Ok(self))
    }
}

/// Single connection factory.
///
/// Each acquisition opens a fresh [`Connection`] and hands over full
/// ownership; nothing is reclaimed on drop.
#[derive(Clone, Debug)]
pub struct Connector {
    config: Config,
}

impl Connector {
    /// Create a factory from a config.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Create a factory from an url.
    pub fn from_url(url: &str) -> Result<Self, ParseError> {
        Ok(Self { config: Config::parse(url)? })
    }

    /// The config used for every opened connection.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

type ConnectorFuture = Pin<Box<dyn Future<Output = Result<Connection>> + Send + Sync>>;

impl Executor for Connector {
    type Transport = Connection;

    type Future = ConnectorFuture;

    fn connection(self) -> Self::Future {
        Box::pin(Connection::connect_with(self.config))
    }
}

impl Executor for &Connector {
    type Transport = Connection;

    type Future = ConnectorFuture;

    fn connection(self) -> Self::Future {
        Box::pin(Connection::connect_with(self.config.clone()))
    }
}

#[cfg(test)]
mod test {
    use super::Executor;
    use crate::query::query;

    #[allow(unused, reason = "type assertion")]
    async fn assert_type<E: Executor>(e: E) {
        let _ = query::<_, _, ()>("", e).fetch_all().await;
    }

    #[allow(unused, reason = "type assertion")]
    async fn assert_reborrow<E: Executor>(e: E) {
        let mut e = e.connection().await.unwrap();
        let _ = query::<_, _, ()>("", &mut e).fetch_all().await;
        let _ = query::<_, _, ()>("", &mut e).fetch_all().await;
    }
}
