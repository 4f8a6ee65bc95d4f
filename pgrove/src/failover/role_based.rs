use std::{
    collections::VecDeque,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use crate::{Error, Result, error::ErrorCondition, executor::Executor};

type FallbackObserver = Arc<dyn Fn(&Error, &str) + Send + Sync>;

/// An [`Executor`] which falls back between named roles.
///
/// Roles are tried in registration order. Only connectivity-class
/// failures move on to the next role; a server error such as a syntax
/// error surfaces directly, since every role would reject it the same
/// way. A readonly rejection also falls back, a later role may be the
/// writable primary.
pub struct RoleBased<E> {
    roles: VecDeque<(String, E)>,
    on_fallback: Option<FallbackObserver>,
}

impl<E> RoleBased<E> {
    /// Create with the first role to try.
    pub fn new(name: impl Into<String>, exe: E) -> Self {
        let mut roles = VecDeque::with_capacity(2);
        roles.push_back((name.into(), exe));
        Self { roles, on_fallback: None }
    }

    /// Append a role to fall back to.
    pub fn fallback(mut self, name: impl Into<String>, exe: E) -> Self {
        self.roles.push_back((name.into(), exe));
        self
    }

    /// Observe each failure about to fall back, with the next role name.
    pub fn on_fallback(mut self, observer: impl Fn(&Error, &str) + Send + Sync + 'static) -> Self {
        self.on_fallback = Some(Arc::new(observer));
        self
    }
}

impl<E: Clone> Clone for RoleBased<E> {
    fn clone(&self) -> Self {
        Self {
            roles: self.roles.clone(),
            on_fallback: self.on_fallback.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RoleBased<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleBased")
            .field("roles", &self.roles.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn fallback_worthy(condition: ErrorCondition) -> bool {
    matches!(
        condition,
        ErrorCondition::ConnectionError
            | ErrorCondition::Timeout
            | ErrorCondition::DatabaseReadonly,
    )
}

impl<E> Executor for RoleBased<E>
where
    E: Executor,
{
    type Transport = E::Transport;

    type Future = RoleConnect<E>;

    fn connection(self) -> Self::Future {
        RoleConnect {
            roles: self.roles,
            on_fallback: self.on_fallback,
            fut: None,
        }
    }
}

/// Future returned from [`RoleBased`] implementation of [`Executor::connection`].
pub struct RoleConnect<E: Executor> {
    roles: VecDeque<(String, E)>,
    on_fallback: Option<FallbackObserver>,
    fut: Option<E::Future>,
}

impl<E> Future for RoleConnect<E>
where
    E: Executor,
{
    type Output = Result<E::Transport>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();

        loop {
            match &mut me.fut {
                None => {
                    // `roles` is never empty by construction
                    let (_, exe) = me.roles.pop_front().unwrap();
                    me.fut = Some(exe.connection());
                },
                Some(f) => match Pin::new(f).poll(cx) {
                    Poll::Ready(Ok(io)) => return Poll::Ready(Ok(io)),
                    Poll::Ready(Err(err)) => {
                        me.fut = None;
                        match me.roles.front() {
                            Some((next, _)) if fallback_worthy(err.condition()) => {
                                if let Some(observer) = &me.on_fallback {
                                    observer(&err, next);
                                }
                            },
                            _ => return Poll::Ready(Err(err)),
                        }
                    },
                    Poll::Pending => return Poll::Pending,
                },
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::ErrorKind;
    use crate::failover::test_support::{FlakySource, attempt_count};

    #[tokio::test]
    async fn connectivity_failure_falls_back_to_replica() {
        let primary = FlakySource::failing(u32::MAX);
        let replica = FlakySource::failing(0);

        let fallbacks = Arc::new(Mutex::new(Vec::new()));
        let observed = fallbacks.clone();

        let io = RoleBased::new("primary", primary.clone())
            .fallback("replica", replica.clone())
            .on_fallback(move |_, next| {
                observed.lock().unwrap().push(next.to_string());
            })
            .connection()
            .await
            .unwrap();
        drop(io);

        assert_eq!(attempt_count(&primary), 1);
        assert_eq!(attempt_count(&replica), 1);
        assert_eq!(*fallbacks.lock().unwrap(), ["replica"]);
    }

    #[tokio::test]
    async fn server_error_does_not_fall_back()  {
        let primary = FlakySource::rejecting(1);
        let replica = FlakySource::failing(0);

        let err = RoleBased::new("primary", primary)
            .fallback("replica", replica.clone())
            .connection()
            .await
            .unwrap_err();

        assert!(matches!(err.kind(), ErrorKind::Database(_)));
        assert_eq!(attempt_count(&replica), 0);
    }

    #[tokio::test]
    async fn exhausted_roles_surface_the_last_error() {
        let primary = FlakySource::failing(u32::MAX);
        let replica = FlakySource::failing(u32::MAX);

        let err = RoleBased::new("primary", primary)
            .fallback("replica", replica)
            .connection()
            .await
            .unwrap_err();

        assert!(matches!(err.kind(), ErrorKind::Io(_)));
    }
}
