use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use super::get_try_time_constraint;
use crate::{
    Error, Result,
    deadline::Deadline,
    error::ErrorCondition,
    executor::Executor,
    postgres::{backend, frontend},
    transport::PgTransport,
};

type RetryObserver = Arc<dyn Fn(&Error) + Send + Sync>;

/// An [`Executor`] which retries failed acquisitions.
///
/// Each attempt acquires from the wrapped provider, bounded by an even
/// share of the remaining time budget, then vets the connection with a
/// `Sync` round trip. A vetted failure marks the connection bad before
/// it returns to its provider, so the provider closes it instead of
/// handing it out again.
pub struct Retry<E> {
    exe: E,
    tries: u32,
    conditions: Vec<ErrorCondition>,
    close_connection: bool,
    deadline: Deadline,
    on_retry: Option<RetryObserver>,
}

impl<E> Retry<E> {
    /// Wrap a provider, single attempt by default.
    pub fn new(exe: E) -> Self {
        Self {
            exe,
            tries: 1,
            conditions: Vec::new(),
            close_connection: true,
            deadline: Deadline::None,
            on_retry: None,
        }
    }

    /// Total number of attempts, the first one included.
    pub fn tries(mut self, tries: u32) -> Self {
        self.tries = tries.max(1);
        self
    }

    /// Restrict retries to the given condition.
    ///
    /// Without any, every [recoverable][Error::is_recoverable] error is
    /// retried.
    pub fn on_condition(mut self, condition: ErrorCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Keep failed connections usable instead of marking them bad.
    pub fn keep_connection(mut self) -> Self {
        self.close_connection = false;
        self
    }

    /// Total time budget across all attempts.
    pub fn deadline(mut self, deadline: impl Into<Deadline>) -> Self {
        self.deadline = deadline.into();
        self
    }

    /// Same as [`deadline`][Retry::deadline], measured from now.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Deadline::after(timeout);
        self
    }

    /// Observe each error about to be retried.
    pub fn on_retry(mut self, observer: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }
}

impl<E: Clone> Clone for Retry<E> {
    fn clone(&self) -> Self {
        Self {
            exe: self.exe.clone(),
            tries: self.tries,
            conditions: self.conditions.clone(),
            close_connection: self.close_connection,
            deadline: self.deadline,
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> std::fmt::Debug for Retry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry")
            .field("tries", &self.tries)
            .field("conditions", &self.conditions)
            .field("close_connection", &self.close_connection)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl<E> Executor for Retry<E>
where
    E: Executor + Clone,
{
    type Transport = E::Transport;

    type Future = RetryConnect<E>;

    fn connection(self) -> Self::Future {
        RetryConnect {
            exe: self.exe,
            tries_left: self.tries,
            conditions: self.conditions,
            close_connection: self.close_connection,
            deadline: self.deadline,
            on_retry: self.on_retry,
            state: RetryState::Begin,
            #[cfg(feature = "tokio")]
            timer: None,
        }
    }
}

/// Future returned from [`Retry`] implementation of [`Executor::connection`].
pub struct RetryConnect<E: Executor> {
    exe: E,
    tries_left: u32,
    conditions: Vec<ErrorCondition>,
    close_connection: bool,
    deadline: Deadline,
    on_retry: Option<RetryObserver>,
    state: RetryState<E>,
    #[cfg(feature = "tokio")]
    timer: Option<Pin<Box<tokio::time::Sleep>>>,
}

enum RetryState<E: Executor> {
    Begin,
    Connect(E::Future),
    Vet(Option<E::Transport>),
}

impl<E: Executor> RetryConnect<E> {
    fn retryable(&self, err: &Error) -> bool {
        match self.conditions.is_empty() {
            true => err.is_recoverable(),
            false => self.conditions.contains(&err.condition()),
        }
    }

    /// Account one failed attempt, `Some` when no attempt remains.
    fn fail(&mut self, err: Error) -> Option<Error> {
        self.tries_left = self.tries_left.saturating_sub(1);

        if self.tries_left == 0 || !self.retryable(&err) {
            return Some(err);
        }

        if let Some(observer) = &self.on_retry {
            observer(&err);
        }

        #[cfg(feature = "tokio")]
        {
            self.timer = None;
        }
        self.state = RetryState::Begin;
        None
    }

    /// Drop the attempt's connection, marking it bad first by default.
    fn discard(&mut self, mut io: E::Transport) {
        if self.close_connection {
            io.mark_bad();
        }
        drop(io);
    }
}

impl<E> Future for RetryConnect<E>
where
    E: Executor + Clone,
{
    type Output = Result<E::Transport>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();

        loop {
            #[cfg(feature = "tokio")]
            if let Some(timer) = me.timer.as_mut() {
                if timer.as_mut().poll(cx).is_ready() {
                    if let RetryState::Vet(slot) = &mut me.state {
                        if let Some(io) = slot.take() {
                            me.discard(io);
                        }
                    }
                    match me.fail(Error::timeout()) {
                        Some(err) => return Poll::Ready(Err(err)),
                        None => continue,
                    }
                }
            }

            match &mut me.state {
                RetryState::Begin => {
                    let budget = get_try_time_constraint(
                        me.deadline.time_left(),
                        me.tries_left as i32,
                    );
                    let attempt = match budget {
                        None => Deadline::None,
                        Some(time) => Deadline::after(time),
                    };
                    if attempt.expired() {
                        return Poll::Ready(Err(Error::timeout()));
                    }
                    #[cfg(feature = "tokio")]
                    {
                        me.timer = attempt.sleep();
                    }
                    me.state = RetryState::Connect(me.exe.clone().connection());
                },
                RetryState::Connect(f) => match Pin::new(f).poll(cx) {
                    Poll::Ready(Ok(mut io)) => {
                        io.send(frontend::Sync);
                        me.state = RetryState::Vet(Some(io));
                    },
                    Poll::Ready(Err(err)) => {
                        if let Some(err) = me.fail(err) {
                            return Poll::Ready(Err(err));
                        }
                    },
                    Poll::Pending => return Poll::Pending,
                },
                RetryState::Vet(slot) => {
                    let io = slot.as_mut().unwrap();
                    match io.poll_recv::<backend::ReadyForQuery>(cx) {
                        Poll::Ready(Ok(_)) => {
                            let io = slot.take().unwrap();
                            #[cfg(feature = "tokio")]
                            {
                                me.timer = None;
                            }
                            return Poll::Ready(Ok(io));
                        },
                        Poll::Ready(Err(err)) => {
                            let io = slot.take().unwrap();
                            me.discard(io);
                            if let Some(err) = me.fail(err) {
                                return Poll::Ready(Err(err));
                            }
                        },
                        Poll::Pending => return Poll::Pending,
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use crate::failover::test_support::{FlakySource, attempt_count};

    #[tokio::test]
    async fn second_try_succeeds_after_recoverable_failure() {
        let source = FlakySource::failing(1);
        let io = Retry::new(source.clone()).tries(2).connection().await.unwrap();
        drop(io);
        assert_eq!(attempt_count(&source), 2);
    }

    #[tokio::test]
    async fn single_try_surfaces_the_failure() {
        let source = FlakySource::failing(1);
        let err = Retry::new(source.clone()).connection().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
        assert_eq!(attempt_count(&source), 1);
    }

    #[tokio::test]
    async fn server_errors_are_not_retried() {
        let source = FlakySource::rejecting(2);
        let err = Retry::new(source.clone()).tries(3).connection().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Database(_)));
        assert_eq!(attempt_count(&source), 1);
    }

    #[tokio::test]
    async fn retry_observer_sees_each_failure() {
        use std::sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        };

        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = seen.clone();

        let source = FlakySource::failing(2);
        Retry::new(source)
            .tries(3)
            .on_retry(move |_| {
                seen2.fetch_add(1, Ordering::Relaxed);
            })
            .connection()
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn condition_filter_limits_retries() {
        let source = FlakySource::failing(1);
        let err = Retry::new(source.clone())
            .tries(3)
            .on_condition(ErrorCondition::Timeout)
            .connection()
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
        assert_eq!(attempt_count(&source), 1);
    }
}
