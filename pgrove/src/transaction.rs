//! The [`Transaction`] type.
use std::io;

use crate::{
    Result,
    common::unit_error,
    executor::Executor,
    oid::OidMap,
    postgres::{
        BackendProtocol, backend,
        backend::BackendKeyData,
        frontend::{self, FrontendProtocol},
    },
    statement::StatementName,
    transport::{PgTransport, PgTransportExt},
};

unit_error! {
    /// An error when the backend reports an unexpected transaction status.
    ///
    /// `BEGIN` must leave the session in a transaction block and `COMMIT`
    /// must leave it idle; a session already inside a transaction, or one
    /// sitting in a failed transaction block, reports otherwise.
    pub struct TransactionStateError("session is in an unexpected transaction state");
}

/// Begin a transaction on the acquired connection.
pub async fn begin<E: Executor>(exe: E) -> Result<Transaction<E::Transport>> {
    let mut io = exe.connection().await?;
    io.send(frontend::Query { sql: "BEGIN" });
    io.flush().await?;
    io.recv::<backend::CommandComplete>().await?;
    let ready = io.recv::<backend::ReadyForQuery>().await?;
    if ready.tx_status != b'T' {
        return Err(TransactionStateError.into());
    }
    Ok(Transaction::new(io))
}

/// An RAII implementation of transaction scope.
///
/// To begin a transaction, use the [`begin`] function.
///
/// To commit transaction, use [`Transaction::commit`].
///
/// If not commited, when this structure is dropped, transaction will be rolled back.
///
/// # Example
///
/// ```no_run
/// # async fn test(mut conn: pgrove::Connection) -> pgrove::Result<()> {
/// let mut tx = pgrove::transaction::begin(&mut conn).await?;
///
/// pgrove::execute("insert into post(name) values('foo')", &mut tx)
///     .execute()
///     .await?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Transaction<IO: PgTransport> {
    io: IO,
    commited: bool,
}

impl<IO> Transaction<IO>
where
    IO: PgTransport
{
    pub(crate) fn new(io: IO) -> Self {
        Self { io, commited: false }
    }

    /// Commit transaction.
    pub async fn commit(mut self) -> Result<()> {
        self.io.send(frontend::Query { sql: "COMMIT" });
        self.io.flush().await?;
        self.io.recv::<backend::CommandComplete>().await?;
        let r = self.io.recv::<backend::ReadyForQuery>().await?;
        if r.tx_status != b'I' {
            return Err(TransactionStateError.into());
        }
        self.commited = true;
        Ok(())
    }
}

impl<IO> Drop for Transaction<IO>
where
    IO: PgTransport
{
    fn drop(&mut self) {
        if !self.commited {
            self.io.send(frontend::Query { sql: "ROLLBACK" });
            self.io.ready_request();
        }
    }
}

impl<IO> PgTransport for Transaction<IO>
where
    IO: PgTransport
{
    fn poll_flush(&mut self, cx: &mut std::task::Context) -> std::task::Poll<io::Result<()>> {
        IO::poll_flush(&mut self.io, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut std::task::Context) -> std::task::Poll<Result<B>> {
        IO::poll_recv(&mut self.io, cx)
    }

    fn ready_request(&mut self) {
        IO::ready_request(&mut self.io)
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        IO::send(&mut self.io, message)
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        IO::send_startup(&mut self.io, startup)
    }

    fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        IO::get_stmt(&mut self.io, sql)
    }

    fn add_stmt(&mut self, sql: u64, id: StatementName) {
        IO::add_stmt(&mut self.io, sql, id)
    }

    fn oids(&self) -> &OidMap {
        IO::oids(&self.io)
    }

    fn oids_mut(&mut self) -> &mut OidMap {
        IO::oids_mut(&mut self.io)
    }

    fn mark_bad(&mut self) {
        IO::mark_bad(&mut self.io)
    }

    fn backend_key(&self) -> Option<BackendKeyData> {
        IO::backend_key(&self.io)
    }

    fn set_error_context(&mut self, context: Option<&'static str>) {
        IO::set_error_context(&mut self.io, context)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{error::ErrorKind, oid::OidMap, test_support::ScriptedTransport};

    #[tokio::test]
    async fn begin_inside_a_failed_transaction_block_errors() {
        // the backend stays in status `E` after BEGIN
        let mut io = ScriptedTransport::new(OidMap::new())
            .frame(b'C', &b"BEGIN\0"[..])
            .frame(b'Z', &b"E"[..]);

        let err = begin(&mut io).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::TransactionState(_)));
    }

    #[tokio::test]
    async fn commit_expects_an_idle_session() {
        let mut io = ScriptedTransport::new(OidMap::new())
            .frame(b'C', &b"BEGIN\0"[..])
            .frame(b'Z', &b"T"[..])
            .frame(b'C', &b"COMMIT\0"[..])
            .frame(b'Z', &b"T"[..]);

        let tx = begin(&mut io).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::TransactionState(_)));
    }
}
