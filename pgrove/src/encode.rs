//! Binary parameter encoding.
use bytes::Bytes;

use crate::{
    oid::OidMap,
    postgres::{BindParam, Oid, PgType},
    value::ValueRef,
};

/// How an [`Encoded`] parameter learns its oid.
///
/// Built-in types carry a fixed oid; user-defined types carry the
/// `pg_type.typname` they were registered under and get their oid from
/// the connection's [`OidMap`] before `Parse` is sent.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ParamOid {
    Fixed(Oid),
    Named(&'static str),
}

/// An encoded query parameter frame.
pub struct Encoded<'q> {
    value: ValueRef<'q>,
    oid: ParamOid,
    is_null: bool,
}

impl<'q> Encoded<'q> {
    pub(crate) fn new(value: impl Into<ValueRef<'q>>, oid: Oid) -> Self {
        Self { value: value.into(), oid: ParamOid::Fixed(oid), is_null: false }
    }

    pub(crate) fn named(value: impl Into<ValueRef<'q>>, name: &'static str) -> Self {
        Self { value: value.into(), oid: ParamOid::Named(name), is_null: false }
    }

    pub(crate) fn null(oid: Oid) -> Self {
        Self { value: ValueRef::Slice(&[]), oid: ParamOid::Fixed(oid), is_null: true }
    }

    pub(crate) fn null_named(name: &'static str) -> Self {
        Self { value: ValueRef::Slice(&[]), oid: ParamOid::Named(name), is_null: true }
    }

    /// The parameter oid, or `0` when a named oid is not yet resolved.
    ///
    /// Zero is protocol-legal in `Parse` and means "unspecified", the
    /// pipeline resolves named oids before that point.
    pub(crate) fn oid(&self) -> Oid {
        match self.oid {
            ParamOid::Fixed(oid) => oid,
            ParamOid::Named(_) => 0,
        }
    }

    /// The registered type name, when the oid is not fixed.
    pub(crate) fn type_name(&self) -> Option<&'static str> {
        match self.oid {
            ParamOid::Fixed(_) => None,
            ParamOid::Named(name) => Some(name),
        }
    }

    /// Replace a named oid with its value from `oids`.
    ///
    /// Leaves the parameter untouched when the name is not in the map.
    pub(crate) fn resolve(&mut self, oids: &OidMap) {
        if let ParamOid::Named(name) = self.oid {
            if let Some(oid) = oids.oid_of(name) {
                self.oid = ParamOid::Fixed(oid);
            }
        }
    }

    pub(crate) fn is_null(&self) -> bool {
        self.is_null
    }

    /// Payload length in bytes, excluding the length field.
    pub(crate) fn len(&self) -> usize {
        match self.is_null {
            true => 0,
            false => self.value.len(),
        }
    }

    /// Full wire size of this frame: the 4-byte length field plus the
    /// payload. A NULL frame is the length field alone.
    pub(crate) fn data_frame_size(&self) -> usize {
        4 + self.len()
    }
}

impl bytes::Buf for Encoded<'_> {
    fn remaining(&self) -> usize {
        match self.is_null {
            true => 0,
            false => self.value.remaining(),
        }
    }

    fn chunk(&self) -> &[u8] {
        match self.is_null {
            true => &[],
            false => self.value.chunk(),
        }
    }

    fn advance(&mut self, cnt: usize) {
        self.value.advance(cnt)
    }
}

impl BindParam for Encoded<'_> {
    fn size(&self) -> i32 {
        match self.is_null {
            true => -1,
            false => i32::try_from(self.value.len()).expect("parameter value too large for postgres"),
        }
    }
}

impl std::fmt::Debug for Encoded<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.is_null {
            true => f.write_str("NULL"),
            false => self.value.fmt(f),
        }
    }
}

/// A type which can be encoded as a postgres binary parameter.
pub trait Encode<'q> {
    fn encode(self) -> Encoded<'q>;
}

macro_rules! encode {
    (<$lf:lifetime> $ty:ty as $as:ty) => {
        impl<$lf> Encode<$lf> for $ty {
            fn encode(self) -> Encoded<$lf> {
                Encoded::new(self, <$as as PgType>::OID)
            }
        }
    };
    ($ty:ty as $as:ty) => {
        impl Encode<'_> for $ty {
            fn encode(self) -> Encoded<'static> {
                Encoded::new(self, <$as as PgType>::OID)
            }
        }
    };
    ($ty:ty) => { encode!($ty as $ty); };
}

macro_rules! encode_copy {
    ($($ty:ty),*) => {$(
        encode!($ty);
        impl<'q> Encode<'q> for &'q $ty {
            fn encode(self) -> Encoded<'q> {
                (*self).encode()
            }
        }
    )*};
}

encode_copy!(bool, i16, i32, i64, f32, f64);
encode!(String);
encode!(<'q> &'q str as str);
encode!(<'q> &'q String as str);
encode!(<'q> &'q [u8] as [u8]);

impl<'q> Encode<'q> for &'q Vec<u8> {
    fn encode(self) -> Encoded<'q> {
        Encoded::new(&self[..], <[u8] as PgType>::OID)
    }
}

impl Encode<'_> for Bytes {
    fn encode(self) -> Encoded<'static> {
        Encoded::new(self, <[u8] as PgType>::OID)
    }
}

impl<'q, T> Encode<'q> for Option<T>
where
    T: Encode<'q> + PgType,
{
    fn encode(self) -> Encoded<'q> {
        match self {
            Some(value) => value.encode(),
            None => Encoded::null(T::OID),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn data_frame_is_length_prefix_plus_payload() {
        assert_eq!(4i32.encode().data_frame_size(), 4 + 4);
        assert_eq!(7i64.encode().data_frame_size(), 4 + 8);
        assert_eq!("abc".encode().data_frame_size(), 4 + 3);
        assert_eq!("".encode().data_frame_size(), 4);
    }

    #[test]
    fn null_frame_is_length_field_alone() {
        let none = Option::<i32>::None.encode();
        assert_eq!(none.data_frame_size(), 4);
        assert_eq!(none.size(), -1);
        assert_eq!(none.oid(), 23);
    }

    #[test]
    fn borrowed_str_keeps_text_oid() {
        let owned = String::from("hi");
        let frame = (&owned).encode();
        assert_eq!(frame.oid(), 25);
        assert_eq!(frame.size(), 2);
    }
}
