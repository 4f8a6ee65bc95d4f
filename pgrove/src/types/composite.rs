//! Composite (row type) frames.
//!
//! Layout after the outer length field: field count, then per field the
//! member oid, the member length (`-1` for NULL) and the member payload.
use bytes::{Buf, BufMut, BytesMut};

use crate::{
    encode::{Encode, Encoded},
    ext::UsizeExt,
    postgres::{BindParam, Oid},
    row::{Column, Decode, DecodeError},
};

/// Builds the binary frame of a composite value field by field.
///
/// The frame is bound as a parameter through [`finish`][CompositeBuilder::finish],
/// which ties it to the registered type name so the oid is filled in
/// from the connection before the statement is parsed.
#[derive(Debug, Default)]
pub struct CompositeBuilder {
    buf: BytesMut,
    count: usize,
}

impl CompositeBuilder {
    pub fn new() -> Self {
        let mut buf = BytesMut::new();
        // field count slot, patched in finish
        buf.put_u32(0);
        Self { buf, count: 0 }
    }

    /// Append one member frame.
    pub fn field<'q>(mut self, value: impl Encode<'q>) -> Self {
        let frame = value.encode();
        self.buf.put_u32(frame.oid());
        self.buf.put_i32(frame.size());
        self.buf.put(frame);
        self.count += 1;
        self
    }

    /// Finish as a parameter of the custom type registered under `name`.
    pub fn finish(self, name: &'static str) -> Encoded<'static> {
        Encoded::named(self.seal(), name)
    }

    /// Finish as a parameter with a known oid.
    pub fn finish_with_oid(self, oid: Oid) -> Encoded<'static> {
        Encoded::new(self.seal(), oid)
    }

    fn seal(mut self) -> BytesMut {
        let count = self.count.to_u32();
        self.buf[..4].copy_from_slice(&count.to_be_bytes());
        self.buf
    }
}

/// Reads the member frames of a composite value in order.
pub struct CompositeReader {
    body: bytes::Bytes,
    field_len: u32,
    read: u32,
}

impl CompositeReader {
    /// Parse the frame header of a composite column.
    pub fn new(column: Column) -> Result<Self, DecodeError> {
        let mut body = column.try_into_value()?;
        if body.remaining() < 4 {
            return Err(DecodeError::Range { expected: 4, found: body.remaining() });
        }
        let field_len = body.get_u32();
        Ok(Self { body, field_len, read: 0 })
    }

    /// Like [`new`][CompositeReader::new], but fail early when the frame
    /// does not carry exactly `expected` fields.
    pub fn with_len(column: Column, expected: u32) -> Result<Self, DecodeError> {
        let reader = Self::new(column)?;
        match reader.field_len == expected {
            true => Ok(reader),
            false => Err(DecodeError::FieldCount { expected, found: reader.field_len }),
        }
    }

    /// Number of fields in the frame.
    pub fn len(&self) -> u32 {
        self.field_len
    }

    pub fn is_empty(&self) -> bool {
        self.field_len == 0
    }

    /// Decode the next member.
    pub fn field<T: Decode>(&mut self) -> Result<T, DecodeError> {
        if self.read == self.field_len {
            return Err(DecodeError::IndexOutOfBounds(self.read as usize));
        }
        if self.body.remaining() < 8 {
            return Err(DecodeError::Range { expected: 8, found: self.body.remaining() });
        }

        let oid = self.body.get_u32();
        let len = self.body.get_i32();
        let value = match len {
            -1 => None,
            len => {
                let len = len as usize;
                if self.body.remaining() < len {
                    return Err(DecodeError::Range { expected: len, found: self.body.remaining() });
                }
                Some(self.body.split_to(len))
            },
        };
        self.read += 1;

        Column::nested(oid, value).decode()
    }
}

impl std::fmt::Debug for CompositeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CompositeReader")
            .field("field_len", &self.field_len)
            .field("read", &self.read)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use bytes::Buf;

    use super::*;

    fn frame_bytes(mut frame: Encoded) -> bytes::Bytes {
        frame.copy_to_bytes(frame.remaining())
    }

    #[test]
    fn frame_size_is_count_plus_member_frames() {
        let frame = CompositeBuilder::new()
            .field(7i32)
            .field("ab")
            .finish_with_oid(0);

        // count + (oid + len + int4) + (oid + len + "ab")
        assert_eq!(frame.data_frame_size(), 4 + 4 + (4 + 4 + 4) + (4 + 4 + 2));
    }

    #[test]
    fn members_round_trip_in_order() {
        let frame = CompositeBuilder::new()
            .field(7i32)
            .field(Option::<String>::None)
            .field("hello")
            .finish_with_oid(0);

        let col = Column::nested(0, Some(frame_bytes(frame)));
        let mut reader = CompositeReader::with_len(col, 3).unwrap();

        assert_eq!(reader.field::<i32>().unwrap(), 7);
        assert_eq!(reader.field::<Option<String>>().unwrap(), None);
        assert_eq!(reader.field::<String>().unwrap(), "hello");
        assert!(matches!(
            reader.field::<i32>(),
            Err(DecodeError::IndexOutOfBounds(3)),
        ));
    }

    #[test]
    fn field_count_is_validated_up_front() {
        let frame = CompositeBuilder::new().field(1i16).finish_with_oid(0);
        let col = Column::nested(0, Some(frame_bytes(frame)));

        let err = CompositeReader::with_len(col, 2).unwrap_err();
        assert!(matches!(err, DecodeError::FieldCount { expected: 2, found: 1 }));
    }

    #[test]
    fn truncated_member_is_a_range_error() {
        let frame = CompositeBuilder::new().field(1i64).finish_with_oid(0);
        let bytes = frame_bytes(frame);
        let cut = bytes.slice(..bytes.len() - 3);

        let mut reader = CompositeReader::new(Column::nested(0, Some(cut))).unwrap();
        assert!(matches!(reader.field::<i64>(), Err(DecodeError::Range { .. })));
    }

    #[test]
    fn named_frame_resolves_through_oid_map() {
        let frame = CompositeBuilder::new().field(1i32).finish("point2d");
        assert_eq!(frame.oid(), 0);
        assert_eq!(frame.type_name(), Some("point2d"));
    }
}
