//! The extended query pipeline.
//!
//! One round trip carries `Parse`, `Bind`, `Describe`, `Execute` and
//! `Sync`; rows stream back until `ReadyForQuery`. Parameters bound by a
//! registered type name trigger a one-off oid introspection round trip
//! over the simple query protocol before the statement is parsed.
use futures_core::Stream;
use std::{
    hash::{DefaultHasher, Hash, Hasher},
    marker::PhantomData,
    mem,
    pin::Pin,
    task::{
        Context,
        Poll::{self, *},
        ready,
    },
};

use crate::{
    Error, FromRow, Result, Row,
    common::unit_error,
    deadline::Deadline,
    encode::Encoded,
    ext::UsizeExt,
    oid::{self, OidMapError},
    postgres::{
        Oid, PgFormat,
        backend::{self, CommandComplete},
        frontend,
    },
    row::RowResult,
    sql::Sql,
    statement::{PortalName, StatementName},
    transport::PgTransport,
};

unit_error! {
    /// An error when the query string is empty.
    pub struct EmptyQueryError("empty query string");
}

#[derive(Debug)]
pub struct PrepareData {
    pub sqlid: u64,
    pub stmt: StatementName,
    pub cache_hit: bool,
    /// this field intended to be edited by caller for `portal` params.
    pub max_row: u32,
}

/// Write Prepare statement to `io`.
///
/// If cache hit, no further action is required.
///
/// If cache miss, flushing is required, with responses possible:
/// - `ParseComplete` from `Parse`
///
/// Also caller might want to cache the returned statement.
fn prepare(
    sql: &impl Sql,
    params: &[Encoded],
    mut io: impl PgTransport,
) -> PrepareData {
    let persist = sql.persistent();
    let sql = sql.sql().trim();

    let sqlid = {
        let mut buf = DefaultHasher::new();
        sql.hash(&mut buf);
        buf.finish()
    };

    if persist {
        if let Some(stmt) = io.get_stmt(sqlid) {
            return PrepareData { sqlid, stmt, cache_hit: true, max_row: 0 };
        }
    }

    let stmt = match persist {
        true => StatementName::next(),
        false => StatementName::unnamed(),
    };

    io.send(frontend::Parse {
        prepare_name: stmt.as_str(),
        sql,
        oids_len: params.len() as _,
        oids: params.iter().map(Encoded::oid),
    });
    io.send(frontend::Flush);

    PrepareData { sqlid, stmt, cache_hit: false, max_row: 0 }
}

/// Write Bind, Describe, Execute and Sync to `io`.
///
/// Flushing is required after call.
///
/// Responses possible:
/// - `BindComplete` from `Bind`
/// - `RowDescription` or `NoData` from `Describe`
/// - `DataRow` from `Execute`
/// - `Execute` phase is always terminated by the appearance of exactly one of these messages:
///   - `CommandComplete`
///   - `EmptyQueryResponse`
///   - `ErrorResponse`
///   - `PortalSuspended`
/// - `ReadyForQuery` from `Sync`
fn portal(data: &PrepareData, params: &mut Vec<Encoded>, mut io: impl PgTransport) {
    let portal = PortalName::unnamed();

    io.send(frontend::Bind {
        portal_name: portal.as_str(),
        stmt_name: data.stmt.as_str(),
        param_formats_len: 1,
        param_formats: [PgFormat::Binary],
        params_len: params.len().to_u16(),
        params_size_hint: params
            .iter()
            .fold(0, |acc, n| acc + n.data_frame_size().to_u32()),
        params: mem::take(params).into_iter(),
        result_formats_len: 1,
        result_formats: [PgFormat::Binary],
    });
    io.send(frontend::Describe {
        kind: b'P',
        name: portal.as_str(),
    });
    io.send(frontend::Execute {
        portal_name: portal.as_str(),
        max_row: data.max_row,
    });
    io.send(frontend::Sync);
}

/// Decode the affected row count from [`CommandComplete`][1].
///
/// [1]: backend::CommandComplete
fn command_complete(cmd: backend::CommandComplete) -> u64 {
    let mut whs = cmd.tag.split_whitespace();
    let Some(tag) = whs.next() else {
        return 0;
    };
    let Some(rows) = whs.next() else {
        return 0;
    };
    match tag {
        "INSERT" => whs.next().unwrap_or_default(),
        "SELECT" => rows,
        "UPDATE" => rows,
        "DELETE" => rows,
        "MERGE" => rows,
        "FETCH" => rows,
        "MOVE" => rows,
        "COPY" => rows,
        _ => return 0,
    }
    .parse()
    .unwrap_or_default()
}

/// Decode one row of the oid introspection query.
///
/// Simple query results arrive in text format: two integer cells,
/// the type oid and its array oid.
fn introspection_row(dr: backend::DataRow) -> Result<(Oid, Oid)> {
    use bytes::Buf;

    let err = || {
        Error::from(crate::postgres::ProtocolError::unexpected_phase(
            backend::DataRow::MSGTYPE,
            "oid introspection",
        ))
    };

    if dr.column_len != 2 {
        return Err(err());
    }
    let mut body = dr.body;

    let mut cell = || -> Option<Oid> {
        if body.remaining() < 4 {
            return None;
        }
        let len = body.get_i32();
        if len < 0 || body.remaining() < len as usize {
            return None;
        }
        let raw = body.split_to(len as usize);
        oid::parse_text_oid(&raw)
    };

    match (cell(), cell()) {
        (Some(oid), Some(array_oid)) => Ok((oid, array_oid)),
        _ => Err(err()),
    }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct FetchStream<'val, SQL, ExeFut, IO, R> {
    sql: SQL,
    io: Option<IO>,
    data: Option<PrepareData>,
    phase: Phase<ExeFut>,
    params: Vec<Encoded<'val>>,
    max_row: u32,
    cmd: Option<CommandComplete>,
    deadline: Deadline,
    #[cfg(feature = "tokio")]
    timer: Option<Pin<Box<tokio::time::Sleep>>>,
    _p: PhantomData<R>,
}

#[derive(Debug)]
enum Phase<ExeFut> {
    Connect { f: ExeFut },
    Resolve,
    ResolveRow { pairs: Vec<(Oid, Oid)> },
    Prepare,
    PrepareComplete,
    Portal,
    BindComplete,
    Complete,
    RowDescription,
    DataRow(Row),
    ReadyForQuery,
}

impl<'val, SQL, ExeFut, IO, R> FetchStream<'val, SQL, ExeFut, IO, R> {
    pub fn new(
        sql: SQL,
        exe: ExeFut,
        params: Vec<Encoded<'val>>,
        max_row: u32,
        deadline: Deadline,
    ) -> Self {
        Self {
            sql,
            io: None,
            data: None,
            phase: Phase::Connect { f: exe },
            params,
            max_row,
            cmd: None,
            deadline,
            #[cfg(feature = "tokio")]
            timer: None,
            _p: PhantomData,
        }
    }
}

/// Short description of the work in flight, recorded as the
/// connection's error context on failure.
fn phase_context<F>(phase: &Phase<F>) -> &'static str {
    match phase {
        Phase::Connect { .. } => "acquiring connection",
        Phase::Resolve | Phase::ResolveRow { .. } => "resolving parameter types",
        Phase::Prepare | Phase::PrepareComplete => "preparing statement",
        Phase::Portal | Phase::BindComplete => "binding parameters",
        Phase::RowDescription => "reading row description",
        Phase::DataRow(_) => "fetching rows",
        Phase::ReadyForQuery => "finishing query",
        Phase::Complete => "completed query",
    }
}

impl<SQL, ExeFut, IO, R> Stream for FetchStream<'_, SQL, ExeFut, IO, R>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport + Unpin,
    R: FromRow + Unpin,
{
    type Item = Result<R>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();

        let context = phase_context(&me.phase);
        let result = me.poll_next_inner(cx);

        match &result {
            Ready(Some(Err(_))) => if let Some(io) = me.io.as_mut() {
                io.set_error_context(Some(context));
            },
            Ready(None) => if let Some(io) = me.io.as_mut() {
                io.set_error_context(None);
            },
            _ => {},
        }

        result
    }
}

impl<SQL, ExeFut, IO, R> FetchStream<'_, SQL, ExeFut, IO, R>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport + Unpin,
    R: FromRow + Unpin,
{
    fn poll_next_inner(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<R>>> {
        let me = self;

        if !matches!(me.phase, Phase::Complete) {
            let mut timed_out = me.deadline.expired();

            #[cfg(feature = "tokio")]
            if !timed_out {
                if me.timer.is_none() {
                    me.timer = me.deadline.sleep();
                }
                if let Some(timer) = me.timer.as_mut() {
                    timed_out = timer.as_mut().poll(cx).is_ready();
                }
            }

            if timed_out {
                // mid-protocol state is unrecoverable
                if let Some(io) = me.io.as_mut() {
                    io.mark_bad();
                }
                me.phase = Phase::Complete;
                return Ready(Some(Err(Error::timeout())));
            }
        }

        loop {
            match &mut me.phase {
                Phase::Connect { f } => {
                    let io = ready!(Pin::new(f).poll(cx)?);
                    me.io = Some(io);
                    me.phase = Phase::Resolve;
                },
                Phase::Resolve => {
                    let io = me.io.as_mut().unwrap();

                    for param in &mut me.params {
                        param.resolve(io.oids());
                    }

                    let unresolved = me.params.iter().find_map(Encoded::type_name);
                    match unresolved {
                        None => me.phase = Phase::Prepare,
                        Some(name) => {
                            if !io.oids().type_names().any(|n| n == name) {
                                me.phase = Phase::Complete;
                                return Ready(Some(Err(
                                    OidMapError::Unregistered { name }.into(),
                                )));
                            }
                            let sql = io.oids().introspection_sql();
                            io.send(frontend::Query { sql: &sql });
                            me.phase = Phase::ResolveRow { pairs: Vec::new() };
                        },
                    }
                },
                Phase::ResolveRow { pairs } => {
                    use backend::BackendMessage::*;
                    let io = me.io.as_mut().unwrap();
                    match ready!(io.poll_recv(cx)?) {
                        RowDescription(_) | CommandComplete(_) => {},
                        DataRow(dr) => match introspection_row(dr) {
                            Ok(pair) => pairs.push(pair),
                            Err(err) => {
                                io.ready_request();
                                me.phase = Phase::Complete;
                                return Ready(Some(Err(err)));
                            },
                        },
                        ReadyForQuery(_) => {
                            if let Err(err) = io.oids_mut().set_oids(pairs) {
                                me.phase = Phase::Complete;
                                return Ready(Some(Err(err.into())));
                            }
                            for param in &mut me.params {
                                param.resolve(io.oids());
                            }
                            me.phase = Phase::Prepare;
                        },
                        f => {
                            let err = f.unexpected("oid introspection");
                            me.phase = Phase::Complete;
                            return Ready(Some(Err(err.into())));
                        },
                    }
                },
                Phase::Prepare => {
                    me.data = Some(prepare(&me.sql, &me.params, me.io.as_mut().unwrap()));
                    me.phase = match me.data.as_ref().unwrap().cache_hit {
                        true => Phase::Portal,
                        false => Phase::PrepareComplete,
                    };
                },
                Phase::PrepareComplete => {
                    let io = me.io.as_mut().unwrap();
                    let data = me.data.as_ref().unwrap();
                    ready!(io.poll_recv::<backend::ParseComplete>(cx)?);
                    io.add_stmt(data.sqlid, data.stmt.clone());
                    me.phase = Phase::Portal;
                },
                Phase::Portal => {
                    let data = me.data.as_mut().unwrap();
                    data.max_row = me.max_row;
                    portal(data, &mut me.params, me.io.as_mut().unwrap());
                    me.phase = Phase::BindComplete;
                },
                Phase::BindComplete => {
                    ready!(me.io.as_mut().unwrap().poll_recv::<backend::BindComplete>(cx)?);
                    me.phase = Phase::RowDescription;
                }
                Phase::RowDescription => {
                    use backend::BackendMessage::*;
                    match ready!(me.io.as_mut().unwrap().poll_recv(cx)?) {
                        NoData(_) => { },
                        // Received after `NoData`
                        CommandComplete(cmd) => {
                            me.cmd = Some(cmd);
                            me.phase = Phase::ReadyForQuery;
                        },

                        RowDescription(rd) => {
                            me.phase = Phase::DataRow(Row::new(rd));
                        },
                        f => {
                            let err = f.unexpected("description recv");
                            me.phase = Phase::Complete;
                            return Ready(Some(Err(err.into())));
                        },
                    }
                },
                Phase::DataRow(row) => {
                    use backend::BackendMessage::*;
                    match ready!(me.io.as_mut().unwrap().poll_recv(cx)?) {
                        DataRow(dr) => {
                            let row = row.inner_clone(dr);
                            let result = row.decode();
                            if result.is_err() {
                                me.io.as_mut().unwrap().ready_request();
                                me.phase = Phase::Complete;
                            }
                            return Ready(Some(result.map_err(Into::into)));
                        },

                        // `Execute` phase terminations:
                        CommandComplete(cmd) => {
                            me.cmd = Some(cmd);
                        },
                        PortalSuspended(_) => { },
                        EmptyQueryResponse(_) => {
                            me.phase = Phase::Complete;
                            return Ready(Some(Err(Error::empty_query())));
                        },
                        f => {
                            let err = f.unexpected("fetching data rows");
                            me.phase = Phase::Complete;
                            return Ready(Some(Err(err.into())));
                        },
                    }

                    me.phase = Phase::ReadyForQuery;
                },
                Phase::ReadyForQuery => {
                    ready!(me.io.as_mut().unwrap().poll_recv::<backend::ReadyForQuery>(cx)?);
                    me.phase = Phase::Complete;
                },
                Phase::Complete => return Ready(None),
            }
        }
    }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct FetchAll<'val, SQL, ExeFut, IO, R> {
    fetch: FetchStream<'val, SQL, ExeFut, IO, R>,
    output: Vec<R>,
}

impl<'val, SQL, ExeFut, IO, R> FetchAll<'val, SQL, ExeFut, IO, R> {
    pub fn new(sql: SQL, exe: ExeFut, params: Vec<Encoded<'val>>, deadline: Deadline) -> Self {
        Self {
            fetch: FetchStream::new(sql, exe, params, 0, deadline),
            output: vec![],
        }
    }
}

impl<SQL, ExeFut, IO, R> Future for FetchAll<'_, SQL, ExeFut, IO, R>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport + Unpin,
    R: FromRow + Unpin,
{
    type Output = Result<Vec<R>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while let Some(r) = ready!(Pin::new(&mut me.fetch).poll_next(cx)?) {
            me.output.push(r);
        }

        Poll::Ready(Ok(std::mem::take(&mut me.output)))
    }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct FetchOne<'val, SQL, ExeFut, IO, R> {
    fetch: FetchStream<'val, SQL, ExeFut, IO, R>,
    output: Option<R>,
}

impl<'val, SQL, ExeFut, IO, R> FetchOne<'val, SQL, ExeFut, IO, R> {
    pub fn new(sql: SQL, exe: ExeFut, params: Vec<Encoded<'val>>, deadline: Deadline) -> Self {
        Self {
            fetch: FetchStream::new(sql, exe, params, 1, deadline),
            output: None,
        }
    }
}

impl<SQL, ExeFut, IO, R> Future for FetchOne<'_, SQL, ExeFut, IO, R>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport + Unpin,
    R: FromRow + Unpin,
{
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while let Some(r) = ready!(Pin::new(&mut me.fetch).poll_next(cx)?) {
            me.output = Some(r);
        }

        match me.output.take() {
            Some(row) => Poll::Ready(Ok(row)),
            None => Ready(Err(Error::row_not_found())),
        }
    }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct FetchOptional<'val, SQL, ExeFut, IO, R> {
    fetch: FetchStream<'val, SQL, ExeFut, IO, R>,
    output: Option<R>,
}

impl<'val, SQL, ExeFut, IO, R> FetchOptional<'val, SQL, ExeFut, IO, R> {
    pub fn new(sql: SQL, exe: ExeFut, params: Vec<Encoded<'val>>, deadline: Deadline) -> Self {
        Self {
            fetch: FetchStream::new(sql, exe, params, 1, deadline),
            output: None,
        }
    }
}

impl<SQL, ExeFut, IO, R> Future for FetchOptional<'_, SQL, ExeFut, IO, R>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport + Unpin,
    R: FromRow + Unpin,
{
    type Output = Result<Option<R>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while let Some(r) = ready!(Pin::new(&mut me.fetch).poll_next(cx)?) {
            me.output = Some(r);
        }

        Poll::Ready(Ok(me.output.take()))
    }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Execute<'val, SQL, ExeFut, IO> {
    fetch: FetchStream<'val, SQL, ExeFut, IO, ()>,
}

impl<'val, SQL, ExeFut, IO> Execute<'val, SQL, ExeFut, IO> {
    pub fn new(sql: SQL, exe: ExeFut, params: Vec<Encoded<'val>>, deadline: Deadline) -> Self {
        Self {
            fetch: FetchStream::new(sql, exe, params, 0, deadline),
        }
    }
}

impl<SQL, ExeFut, IO> Future for Execute<'_, SQL, ExeFut, IO>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport + Unpin,
{
    type Output = Result<RowResult>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while ready!(Pin::new(&mut me.fetch).poll_next(cx)?).is_some() { }

        let rows_affected = me.fetch.cmd.take().map(command_complete).unwrap_or_default();
        Poll::Ready(Ok(RowResult { rows_affected }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::ByteStr;

    fn tag(s: &str) -> CommandComplete {
        CommandComplete { tag: ByteStr::copy_from_str(s) }
    }

    #[test]
    fn command_tags_expose_affected_rows() {
        assert_eq!(command_complete(tag("SELECT 5")), 5);
        assert_eq!(command_complete(tag("UPDATE 2")), 2);
        assert_eq!(command_complete(tag("INSERT 0 3")), 3);
        assert_eq!(command_complete(tag("CREATE TABLE")), 0);
    }

    #[test]
    fn introspection_rows_parse_text_cells() {
        use bytes::BufMut;

        let mut body = bytes::BytesMut::new();
        body.put_i32(5);
        body.put_slice(b"16384");
        body.put_i32(5);
        body.put_slice(b"16385");
        let dr = backend::DataRow { column_len: 2, body: body.freeze() };

        let (oid, array_oid) = introspection_row(dr).unwrap();
        assert_eq!((oid, array_oid), (16384, 16385));
    }

    #[test]
    fn malformed_introspection_rows_are_protocol_errors() {
        use bytes::BufMut;

        let mut body = bytes::BytesMut::new();
        body.put_i32(2);
        body.put_slice(b"xy");
        let dr = backend::DataRow { column_len: 1, body: body.freeze() };

        assert!(introspection_row(dr).is_err());
    }

    use std::time::Duration;

    use crate::{error::ErrorKind, oid::OidMap, postgres::PgName, test_support::ScriptedTransport};

    struct Mood;

    impl PgName for Mood {
        const NAME: &'static str = "mood";
    }

    /// Drain the stream, discarding rows, surfacing the first error.
    async fn drain<SQL, ExeFut, IO, R>(
        stream: &mut FetchStream<'_, SQL, ExeFut, IO, R>,
    ) -> Result<()>
    where
        SQL: Sql + Unpin,
        ExeFut: Future<Output = Result<IO>> + Unpin,
        IO: PgTransport + Unpin,
        R: FromRow + Unpin,
    {
        std::future::poll_fn(|cx| {
            loop {
                match ready!(Pin::new(&mut *stream).poll_next(cx)) {
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Ready(Err(err)),
                    None => return Ready(Ok(())),
                }
            }
        })
        .await
    }

    fn introspection_data_row() -> bytes::Bytes {
        use bytes::BufMut;

        let mut body = bytes::BytesMut::new();
        body.put_u16(2);
        body.put_i32(5);
        body.put_slice(b"16400");
        body.put_i32(5);
        body.put_slice(b"16401");
        body.freeze()
    }

    #[tokio::test]
    async fn named_parameters_resolve_before_prepare() {
        let io = ScriptedTransport::new(OidMap::new().register::<Mood>())
            // simple query introspection round trip
            .frame(b'T', &b"\x00\x02"[..])
            .frame(b'D', introspection_data_row())
            .frame(b'C', &b"SELECT 1\0"[..])
            .frame(b'Z', &b"I"[..])
            // extended query round trip
            .frame(b'1', &b""[..])
            .frame(b'2', &b""[..])
            .frame(b'n', &b""[..])
            .frame(b'C', &b"SELECT 1\0"[..])
            .frame(b'Z', &b"I"[..]);

        let params = vec![Encoded::named("ok", "mood")];
        let mut stream = FetchStream::<_, _, _, ()>::new(
            "SELECT set_mood($1)",
            std::future::ready(Ok::<_, Error>(io)),
            params,
            0,
            Deadline::None,
        );

        drain(&mut stream).await.unwrap();

        let io = stream.io.take().unwrap();
        assert_eq!(io.oids().oid_of("mood"), Some(16400));
        // the introspection Query goes out before Parse
        assert_eq!(io.sent(), [b'Q', b'P', b'H', b'B', b'D', b'E', b'S']);
        assert_eq!(io.error_context(), None);
    }

    #[tokio::test]
    async fn unregistered_parameter_type_fails_before_any_round_trip() {
        let io = ScriptedTransport::new(OidMap::new());
        let params = vec![Encoded::named("ok", "mood")];
        let mut stream = FetchStream::<_, _, _, ()>::new(
            "SELECT set_mood($1)",
            std::future::ready(Ok::<_, Error>(io)),
            params,
            0,
            Deadline::None,
        );

        let err = drain(&mut stream).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::OidMap(_)));
        assert!(stream.io.take().unwrap().sent().is_empty());
    }

    #[tokio::test]
    async fn deadline_expiry_marks_the_transport_bad() {
        // the script never answers Parse, the deadline fires mid-protocol
        let io = ScriptedTransport::new(OidMap::new());
        let mut stream = FetchStream::<_, _, _, ()>::new(
            "SELECT pg_sleep(10)",
            std::future::ready(Ok::<_, Error>(io)),
            Vec::new(),
            0,
            Deadline::after(Duration::from_millis(10)),
        );

        let err = drain(&mut stream).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Timeout(_)));

        let io = stream.io.take().unwrap();
        assert!(io.is_bad());
        assert_eq!(io.error_context(), Some("preparing statement"));
    }
}
