/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

/// A type with a fixed, well-known postgres oid.
pub trait PgType {
    const OID: Oid;

    /// Oid of the one-dimensional array over this type.
    const ARRAY_OID: Oid;
}

/// A custom type known to the server by name.
///
/// The numeric oid of such a type is assigned by the server and must be
/// resolved at runtime through an [`OidMap`][crate::oid::OidMap].
pub trait PgName {
    /// Type name as found in `pg_type.typname`.
    const NAME: &'static str;
}

macro_rules! oid {
    ($ty:ty, $oid:literal, $array_oid:literal $(, $doc:literal)? ) => {
        impl PgType for $ty {
            $(#[doc = $doc])?
            const OID: Oid = $oid;
            const ARRAY_OID: Oid = $array_oid;
        }
    };
}

impl<T: PgType> PgType for Option<T> {
    const OID: Oid = T::OID;
    const ARRAY_OID: Oid = T::ARRAY_OID;
}

oid!(bool, 16, 1000);
oid!(char, 18, 1002);
oid!(i64, 20, 1016, "`int8` ~18 digit integer, 8-byte storage");
oid!(i16, 21, 1005, "`int2` -32 thousand to 32 thousand, 2-byte storage");
oid!(i32, 23, 1007, "`int4` -2 billion to 2 billion integer, 4-byte storage");
oid!(str, 25, 1009, "`text` variable-length string, no limit specified");
oid!(String, 25, 1009, "`text` variable-length string, no limit specified");
oid!(f32, 700, 1021, "`float4` single-precision floating point number, 4-byte storage");
oid!(f64, 701, 1022, "`float8` double-precision floating point number, 8-byte storage");
oid!([u8], 17, 1001, "`bytea` variable-length string, binary values escaped");
oid!(Vec<u8>, 17, 1001, "`bytea` variable-length string, binary values escaped");
