use bytes::{Buf, Bytes, BytesMut};

const INLINE_LEN: usize = 15;

/// Payload bytes of one encoded value.
///
/// Scalars small enough to fit inline avoid any allocation; borrowed
/// slices avoid copying; owned [`Bytes`] back composite and array frames
/// built at encode time.
pub(crate) enum ValueRef<'a> {
    Slice(&'a [u8]),
    Inline {
        offset: usize,
        value: [u8; INLINE_LEN],
    },
    Bytes(Bytes),
}

impl ValueRef<'_> {
    pub fn inline(slice: &[u8]) -> ValueRef<'static> {
        let len = slice.len();
        assert!(len < INLINE_LEN, "inline slice is too large");
        let mut value = [0u8; INLINE_LEN];
        value[INLINE_LEN - len..].copy_from_slice(slice);
        ValueRef::Inline { offset: INLINE_LEN - len, value }
    }

    pub fn len(&self) -> usize {
        match self {
            ValueRef::Slice(items) => items.len(),
            ValueRef::Inline { offset, .. } => INLINE_LEN - offset,
            ValueRef::Bytes(bytes) => bytes.len(),
        }
    }
}

impl Buf for ValueRef<'_> {
    fn remaining(&self) -> usize {
        match self {
            ValueRef::Slice(items) => Buf::remaining(items),
            ValueRef::Inline { offset, .. } => INLINE_LEN - offset,
            ValueRef::Bytes(bytes) => Buf::remaining(bytes),
        }
    }

    fn chunk(&self) -> &[u8] {
        match self {
            ValueRef::Slice(items) => Buf::chunk(items),
            ValueRef::Inline { offset, value } => &value[*offset..],
            ValueRef::Bytes(bytes) => Buf::chunk(bytes),
        }
    }

    fn advance(&mut self, cnt: usize) {
        match self {
            ValueRef::Slice(items) => Buf::advance(items, cnt),
            ValueRef::Inline { offset, .. } => *offset += cnt,
            ValueRef::Bytes(bytes) => Buf::advance(bytes, cnt),
        }
    }
}

impl<'a> From<&'a [u8]> for ValueRef<'a> {
    fn from(value: &'a [u8]) -> Self {
        ValueRef::Slice(value)
    }
}

impl<'a> From<&'a str> for ValueRef<'a> {
    fn from(value: &'a str) -> Self {
        ValueRef::Slice(value.as_bytes())
    }
}

impl<'a> From<&'a String> for ValueRef<'a> {
    fn from(value: &'a String) -> Self {
        ValueRef::Slice(value.as_bytes())
    }
}

impl From<String> for ValueRef<'static> {
    fn from(value: String) -> Self {
        ValueRef::Bytes(Bytes::from(value.into_bytes()))
    }
}

impl From<Bytes> for ValueRef<'static> {
    fn from(value: Bytes) -> Self {
        ValueRef::Bytes(value)
    }
}

impl From<BytesMut> for ValueRef<'static> {
    fn from(value: BytesMut) -> Self {
        ValueRef::Bytes(value.freeze())
    }
}

macro_rules! inline {
    ($($ty:ty),*) => {$(
        impl From<$ty> for ValueRef<'static> {
            fn from(value: $ty) -> Self {
                ValueRef::inline(&value.to_be_bytes()[..])
            }
        }
    )*};
}

inline!(i16, i32, i64, u32, f32, f64);

impl From<bool> for ValueRef<'static> {
    fn from(value: bool) -> Self {
        ValueRef::inline(&[value as u8])
    }
}

impl std::fmt::Debug for ValueRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        use crate::ext::FmtExt;
        self.chunk().lossy().fmt(f)
    }
}
