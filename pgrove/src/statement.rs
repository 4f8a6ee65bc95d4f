//! Server-side statement and portal names.
use std::sync::atomic::Ordering;

type AtomicId = std::sync::atomic::AtomicU16;

/// A short generated protocol name.
///
/// The empty name selects the unnamed statement or portal, which the
/// server overwrites on the next use.
#[derive(Clone, PartialEq, Eq)]
pub struct Id([u8; 6]);

impl Id {
    pub(crate) fn unnamed() -> Self {
        Self([b'?'; 6])
    }

    pub(crate) fn next(prefix: u8, atomic: &AtomicId) -> Self {
        let id = atomic.fetch_add(1, Ordering::SeqCst);
        let mut buf = [prefix, b'0', b'0', b'0', b'0', b'0'];
        let len = buf.len();

        let mut b = itoa::Buffer::new();
        let digits = b.format(id).as_bytes();
        buf[len - digits.len()..].copy_from_slice(digits);

        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        if self.is_unnamed() {
            return "";
        }
        // SAFETY: string only construction and is immutable
        unsafe { std::str::from_utf8_unchecked(&self.0[..]) }
    }

    pub fn is_unnamed(&self) -> bool {
        self.0[0] == b'?'
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.as_str()).finish()
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

macro_rules! delegate {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, PartialEq, Eq)]
        pub struct $name(Id);

        impl $name {
            pub(crate) fn unnamed() -> Self {
                Self(Id::unnamed())
            }

            pub(crate) fn next() -> Self {
                static ID: AtomicId = AtomicId::new(0);
                Self(Id::next($prefix, &ID))
            }
        }

        impl std::ops::Deref for $name {
            type Target = Id;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.as_str()).finish()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

delegate!(StatementName, b's');
delegate!(PortalName, b'p');

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unnamed_id_is_the_empty_protocol_name() {
        assert_eq!(StatementName::unnamed().as_str(), "");
        assert!(PortalName::unnamed().is_unnamed());
    }

    #[test]
    fn generated_names_are_distinct() {
        let a = StatementName::next();
        let b = StatementName::next();
        assert_ne!(a.as_str(), b.as_str());
        assert!(a.as_str().starts_with('s'));
    }
}
