/// A value which may map to SQL `NULL`.
///
/// `is_null_recursive` unwraps nested nullable layers, an
/// `Option<Option<T>>` that is `Some(None)` still counts as `NULL` on
/// the wire.
pub trait Nullable {
    fn is_null(&self) -> bool;

    fn is_null_recursive(&self) -> bool {
        self.is_null()
    }
}

impl<T: Nullable> Nullable for Option<T> {
    fn is_null(&self) -> bool {
        self.is_none()
    }

    fn is_null_recursive(&self) -> bool {
        match self {
            None => true,
            Some(inner) => inner.is_null_recursive(),
        }
    }
}

impl<T: Nullable> Nullable for Box<T> {
    fn is_null(&self) -> bool {
        (**self).is_null()
    }

    fn is_null_recursive(&self) -> bool {
        (**self).is_null_recursive()
    }
}

impl<T: Nullable> Nullable for &T {
    fn is_null(&self) -> bool {
        (**self).is_null()
    }

    fn is_null_recursive(&self) -> bool {
        (**self).is_null_recursive()
    }
}

macro_rules! never_null {
    ($($ty:ty),*) => {$(
        impl Nullable for $ty {
            fn is_null(&self) -> bool { false }
        }
    )*};
}

never_null!(bool, i16, i32, i64, f32, f64, str, String, [u8], Vec<u8>);

#[cfg(test)]
mod test {
    use super::Nullable;

    #[test]
    fn scalar_is_never_null() {
        assert!(!7i32.is_null());
        assert!(!7i32.is_null_recursive());
    }

    #[test]
    fn nested_option_unwraps_recursively() {
        let missing: Option<Option<i32>> = None;
        let inner_missing: Option<Option<i32>> = Some(None);
        let present: Option<Option<i32>> = Some(Some(1));

        assert!(missing.is_null_recursive());
        assert!(inner_missing.is_null_recursive());
        assert!(!present.is_null_recursive());

        // the shallow check stops at the outer layer
        assert!(!inner_missing.is_null());
    }

    #[test]
    fn boxed_nullable_delegates() {
        let boxed: Box<Option<i32>> = Box::new(None);
        assert!(boxed.is_null_recursive());
    }
}
