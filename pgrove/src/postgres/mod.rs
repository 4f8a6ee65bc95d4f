//! Postgres Frontend and Backend Protocol.
//!
//! All communication is through a stream of messages. The first byte of a
//! message identifies the message type, and the next four bytes specify the
//! length of the rest of the message (this length count includes itself, but
//! not the message-type byte).
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        u32        ┃ [u8] ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! For historical reasons, the very first message sent by the client (the
//! startup message) has no initial message-type byte, and neither does the
//! out-of-band cancel request.
//!
//! <https://www.postgresql.org/docs/17/protocol-overview.html>

mod pg_type;
mod pg_format;

pub mod frontend;
pub mod backend;

mod error;

pub use pg_type::{Oid, PgType, PgName};
pub use pg_format::PgFormat;

pub use frontend::{BindParam, FrontendProtocol};
pub use backend::{BackendMessage, BackendProtocol, ErrorResponse, NoticeResponse};
pub use error::{ProtocolError, SqlState};
