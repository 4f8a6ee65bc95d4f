/// Postgres data transmission format.
///
/// Parameter values and result columns each carry a format code. This
/// library transmits everything in [`Binary`][PgFormat::Binary], except the
/// oid introspection round-trip which uses the simple query protocol and
/// therefore receives [`Text`][PgFormat::Text].
///
/// <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgFormat {
    /// Text has format code zero.
    ///
    /// No trailing null character; embedded nulls are not allowed.
    Text,
    /// Binary has format code one.
    ///
    /// Integers use network byte order (most significant byte first).
    Binary,
}

impl PgFormat {
    /// Return format code for current format.
    pub fn format_code(&self) -> u16 {
        match self {
            PgFormat::Text => 0,
            PgFormat::Binary => 1,
        }
    }
}
