//! One-dimensional array frames.
//!
//! Layout after the outer length field:
//! dimension count, null flag, element oid, then per dimension the size
//! and lower bound, then the flattened element frames. An empty array is
//! sent with zero dimensions and no dimension headers.
use bytes::{Buf, BufMut, BytesMut};

use crate::{
    encode::{Encode, Encoded},
    ext::UsizeExt,
    postgres::{Oid, PgType},
    row::{Column, Decode, DecodeError, check_oid},
};

const LOWER_BOUND: i32 = 1;

pub(crate) fn encode_slice<'q, T>(items: &'q [T]) -> Encoded<'q>
where
    T: PgType,
    &'q T: Encode<'q>,
{
    let frames = items.iter().map(|item| item.encode()).collect();
    encode_frames(frames, T::OID, T::ARRAY_OID)
}

/// Like [`encode_slice`], with `None` elements sent as NULL frames.
pub(crate) fn encode_option_slice<'q, T>(items: &'q [Option<T>]) -> Encoded<'q>
where
    T: PgType,
    &'q T: Encode<'q>,
{
    let frames = items
        .iter()
        .map(|item| match item {
            Some(value) => value.encode(),
            None => Encoded::null(T::OID),
        })
        .collect();
    encode_frames(frames, T::OID, T::ARRAY_OID)
}

fn encode_frames<'q>(frames: Vec<Encoded<'q>>, elem_oid: Oid, array_oid: Oid) -> Encoded<'q> {
    let mut buf = BytesMut::new();

    if frames.is_empty() {
        buf.put_i32(0);
        buf.put_i32(0);
        buf.put_u32(elem_oid);
        return Encoded::new(buf, array_oid);
    }

    let has_null = frames.iter().any(Encoded::is_null);

    buf.put_i32(1);
    buf.put_i32(has_null as i32);
    buf.put_u32(elem_oid);
    buf.put_i32(frames.len().to_u32() as i32);
    buf.put_i32(LOWER_BOUND);

    for frame in frames {
        buf.put_i32(crate::postgres::BindParam::size(&frame));
        buf.put(frame);
    }

    Encoded::new(buf, array_oid)
}

pub(crate) fn decode_vec<T: Decode>(col: Column, array_oid: Oid) -> Result<Vec<T>, DecodeError> {
    check_oid(col.oid(), &[array_oid])?;
    let mut body = col.try_into_value()?;

    ensure(&body, 12)?;
    let ndim = body.get_i32();
    let _flags = body.get_i32();
    let elem_oid = body.get_u32();

    if ndim == 0 {
        return Ok(Vec::new());
    }
    if ndim != 1 {
        return Err(DecodeError::Dimensions(ndim));
    }

    ensure(&body, 8)?;
    let size = body.get_i32();
    let _lower_bound = body.get_i32();

    let mut items = Vec::with_capacity(size.max(0) as usize);
    for _ in 0..size {
        ensure(&body, 4)?;
        let len = body.get_i32();
        let value = match len {
            -1 => None,
            len => {
                ensure(&body, len as usize)?;
                Some(body.split_to(len as usize))
            },
        };
        items.push(Column::nested(elem_oid, value).decode()?);
    }

    Ok(items)
}

fn ensure(body: &bytes::Bytes, len: usize) -> Result<(), DecodeError> {
    match body.remaining() < len {
        true => Err(DecodeError::Range { expected: len, found: body.remaining() }),
        false => Ok(()),
    }
}

macro_rules! array {
    ($($ty:ty),*) => {$(
        impl<'q> Encode<'q> for &'q [$ty] {
            fn encode(self) -> Encoded<'q> {
                encode_slice(self)
            }
        }

        impl<'q> Encode<'q> for &'q Vec<$ty> {
            fn encode(self) -> Encoded<'q> {
                encode_slice(self)
            }
        }

        impl Decode for Vec<$ty> {
            fn decode(column: Column) -> Result<Self, DecodeError> {
                decode_vec(column, <$ty as PgType>::ARRAY_OID)
            }
        }
    )*};
}

array!(bool, i16, i32, i64, f32, f64, String);

macro_rules! array_option {
    ($($ty:ty),*) => {$(
        impl<'q> Encode<'q> for &'q [Option<$ty>] {
            fn encode(self) -> Encoded<'q> {
                encode_option_slice(self)
            }
        }

        impl<'q> Encode<'q> for &'q Vec<Option<$ty>> {
            fn encode(self) -> Encoded<'q> {
                encode_option_slice(self)
            }
        }

        impl Decode for Vec<Option<$ty>> {
            fn decode(column: Column) -> Result<Self, DecodeError> {
                decode_vec(column, <$ty as PgType>::ARRAY_OID)
            }
        }
    )*};
}

array_option!(bool, i16, i32, i64, f32, f64, String);

#[cfg(test)]
mod test {
    use bytes::Buf;

    use super::*;
    use crate::encode::Encode;

    fn frame_bytes(mut frame: Encoded) -> bytes::Bytes {
        frame.copy_to_bytes(frame.remaining())
    }

    #[test]
    fn empty_array_has_zero_dimensions() {
        let items: Vec<i32> = Vec::new();
        let frame = (&items).encode();
        assert_eq!(frame.oid(), 1007);

        let bytes = frame_bytes(frame);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], 0i32.to_be_bytes());

        let back: Vec<i32> = Column::nested(1007, Some(bytes)).decode().unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn int_array_round_trips() {
        let items = vec![3i64, -1, 42];
        let bytes = frame_bytes((&items).encode());

        // header + one dim + 3 * (4 + 8)
        assert_eq!(bytes.len(), 12 + 8 + 3 * 12);
        // dim size
        assert_eq!(&bytes[12..16], 3i32.to_be_bytes());

        let back: Vec<i64> = Column::nested(1016, Some(bytes)).decode().unwrap();
        assert_eq!(back, items);
    }

    #[test]
    fn null_elements_set_flag_and_round_trip() {
        let items = vec![Some(1i32), None, Some(3)];
        let bytes = frame_bytes((&items[..]).encode());

        // null flag
        assert_eq!(&bytes[4..8], 1i32.to_be_bytes());

        let back: Vec<Option<i32>> = Column::nested(1007, Some(bytes)).decode().unwrap();
        assert_eq!(back, items);
    }

    #[test]
    fn all_null_elements_round_trip() {
        let items: Vec<Option<i64>> = vec![None, None];
        let bytes = frame_bytes((&items).encode());

        // header + one dim + two bare length fields
        assert_eq!(bytes.len(), 12 + 8 + 2 * 4);
        assert_eq!(&bytes[20..24], (-1i32).to_be_bytes());

        let back: Vec<Option<i64>> = Column::nested(1016, Some(bytes)).decode().unwrap();
        assert_eq!(back, items);
    }

    #[test]
    fn text_array_round_trips() {
        let items = vec![String::from("a"), String::from("bc")];
        let bytes = frame_bytes((&items).encode());

        let back: Vec<String> = Column::nested(1009, Some(bytes)).decode().unwrap();
        assert_eq!(back, items);
    }

    #[test]
    fn truncated_frame_is_a_range_error() {
        let items = vec![1i32, 2];
        let bytes = frame_bytes((&items).encode());
        let cut = bytes.slice(..bytes.len() - 2);

        let err = Column::nested(1007, Some(cut)).decode::<Vec<i32>>().unwrap_err();
        assert!(matches!(err, DecodeError::Range { .. }));
    }

    #[test]
    fn array_oid_is_checked() {
        let items = vec![1i32];
        let bytes = frame_bytes((&items).encode());

        let err = Column::nested(1016, Some(bytes)).decode::<Vec<i32>>().unwrap_err();
        assert!(matches!(err, DecodeError::OidMismatch { .. }));
    }
}
