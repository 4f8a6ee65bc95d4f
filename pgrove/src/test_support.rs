//! Scripted transport for exercising protocol state machines.
use std::{
    collections::VecDeque,
    io,
    task::{Context, Poll},
};

use bytes::Bytes;

use crate::{
    Result,
    oid::OidMap,
    postgres::{BackendProtocol, FrontendProtocol, backend::BackendKeyData, frontend},
    statement::StatementName,
    transport::PgTransport,
};

/// A transport that replays a queue of backend frames.
///
/// An exhausted script leaves the caller pending, like a quiet socket.
/// Sent message types are recorded in order.
#[derive(Debug)]
pub(crate) struct ScriptedTransport {
    oids: OidMap,
    frames: VecDeque<(u8, Bytes)>,
    sent: Vec<u8>,
    bad: bool,
    error_context: Option<&'static str>,
}

impl ScriptedTransport {
    pub(crate) fn new(oids: OidMap) -> Self {
        Self {
            oids,
            frames: VecDeque::new(),
            sent: Vec::new(),
            bad: false,
            error_context: None,
        }
    }

    pub(crate) fn frame(mut self, msgtype: u8, body: impl Into<Bytes>) -> Self {
        self.frames.push_back((msgtype, body.into()));
        self
    }

    pub(crate) fn is_bad(&self) -> bool {
        self.bad
    }

    pub(crate) fn sent(&self) -> &[u8] {
        &self.sent
    }

    pub(crate) fn error_context(&self) -> Option<&'static str> {
        self.error_context
    }
}

impl PgTransport for ScriptedTransport {
    fn poll_flush(&mut self, _: &mut Context) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_recv<B: BackendProtocol>(&mut self, _: &mut Context) -> Poll<Result<B>> {
        match self.frames.pop_front() {
            Some((msgtype, body)) => Poll::Ready(B::decode(msgtype, body).map_err(Into::into)),
            None => Poll::Pending,
        }
    }

    fn ready_request(&mut self) { }

    fn send<F: FrontendProtocol>(&mut self, _: F) {
        self.sent.push(F::MSGTYPE);
    }

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

    fn mark_bad(&mut self) {
        self.bad = true;
    }

    fn backend_key(&self) -> Option<BackendKeyData> {
        None
    }

    fn set_error_context(&mut self, context: Option<&'static str>) {
        self.error_context = context;
    }
}
