//! Failover connection providers.
//!
//! [`Retry`] and [`RoleBased`] wrap any [`Executor`][crate::executor::Executor]
//! and implement it themselves, so they compose over each other,
//! [`Connector`][crate::executor::Connector] and [`Pool`][crate::Pool].
use std::time::Duration;

mod retry;
mod role_based;

pub use retry::{Retry, RetryConnect};
pub use role_based::{RoleBased, RoleConnect};

/// Time budget for one attempt out of `tries_left` within `total`.
///
/// An unbounded `total` keeps every attempt unbounded; a non-positive
/// `tries_left` yields a zero budget.
pub(crate) fn get_try_time_constraint(total: Option<Duration>, tries_left: i32) -> Option<Duration> {
    if tries_left <= 0 {
        return Some(Duration::ZERO);
    }
    total.map(|time| time / tries_left as u32)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{
        io,
        sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        },
        task::{Context, Poll},
    };

    use crate::{
        Result,
        executor::Executor,
        oid::OidMap,
        postgres::{BackendProtocol, ErrorResponse, FrontendProtocol, backend, frontend},
        statement::StatementName,
        transport::PgTransport,
    };

    /// A transport that answers every receive with `ReadyForQuery`.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        oids: OidMap,
    }

    impl PgTransport for MockTransport {
        fn poll_flush(&mut self, _: &mut Context) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_recv<B: BackendProtocol>(&mut self, _: &mut Context) -> Poll<Result<B>> {
            let frame = B::decode(backend::ReadyForQuery::MSGTYPE, bytes::Bytes::from_static(b"I"));
            Poll::Ready(frame.map_err(Into::into))
        }

        fn ready_request(&mut self) { }

        fn send<F: FrontendProtocol>(&mut self, _: F) { }

        fn send_startup(&mut self, _: frontend::Startup) { }

        fn get_stmt(&mut self, _: u64) -> Option<StatementName> {
            None
        }

        fn add_stmt(&mut self, _: u64, _: StatementName) { }

        fn oids(&self) -> &OidMap {
            &self.oids
        }

        fn oids_mut(&mut self) -> &mut OidMap {
            &mut self.oids
        }

        fn mark_bad(&mut self) { }

        fn backend_key(&self) -> Option<backend::BackendKeyData> {
            None
        }
    }

    enum Failure {
        Io,
        ServerError,
    }

    struct Inner {
        attempts: AtomicU32,
        failures_left: AtomicU32,
        failure: Failure,
    }

    /// A provider that fails its first acquisitions, then succeeds.
    #[derive(Clone)]
    pub(crate) struct FlakySource {
        inner: Arc<Inner>,
    }

    impl FlakySource {
        /// Fail the first `n` acquisitions with an io error.
        pub(crate) fn failing(n: u32) -> Self {
            Self {
                inner: Arc::new(Inner {
                    attempts: AtomicU32::new(0),
                    failures_left: AtomicU32::new(n),
                    failure: Failure::Io,
                }),
            }
        }

        /// Fail the first `n` acquisitions with a server syntax error.
        pub(crate) fn rejecting(n: u32) -> Self {
            Self {
                inner: Arc::new(Inner {
                    attempts: AtomicU32::new(0),
                    failures_left: AtomicU32::new(n),
                    failure: Failure::ServerError,
                }),
            }
        }
    }

    pub(crate) fn attempt_count(source: &FlakySource) -> u32 {
        source.inner.attempts.load(Ordering::Relaxed)
    }

    impl Executor for FlakySource {
        type Transport = MockTransport;

        type Future = std::future::Ready<Result<MockTransport>>;

        fn connection(self) -> Self::Future {
            self.inner.attempts.fetch_add(1, Ordering::Relaxed);

            let failed = self
                .inner
                .failures_left
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();

            let result = match (failed, &self.inner.failure) {
                (false, _) => Ok(MockTransport::default()),
                (true, Failure::Io) => {
                    Err(io::Error::from(io::ErrorKind::ConnectionRefused).into())
                },
                (true, Failure::ServerError) => {
                    Err(ErrorResponse::test_frame("ERROR", "42601", "syntax error").into())
                },
            };

            std::future::ready(result)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn try_time_splits_budget_evenly() {
        assert_eq!(
            get_try_time_constraint(Some(Duration::from_secs(1)), 3),
            Some(Duration::from_secs(1) / 3),
        );
        assert_eq!(
            get_try_time_constraint(Some(Duration::from_secs(1)), 1),
            Some(Duration::from_secs(1)),
        );
    }

    #[test]
    fn try_time_is_zero_for_non_positive_tries() {
        assert_eq!(get_try_time_constraint(Some(Duration::from_secs(1)), 0), Some(Duration::ZERO));
        assert_eq!(get_try_time_constraint(None, -1), Some(Duration::ZERO));
    }

    #[test]
    fn try_time_unbounded_stays_unbounded() {
        assert_eq!(get_try_time_constraint(None, 4), None);
    }
}
