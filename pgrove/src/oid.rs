//! Runtime oid resolution for user-defined types.
//!
//! Custom composites and enums are known to the server by name; their
//! numeric oids are assigned per database. Types are registered up front
//! by name, and a connection resolves the whole map against `pg_type`
//! once during startup. Until then every registered entry reads as
//! unresolved.
use std::fmt;

use crate::postgres::{Oid, PgName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    name: &'static str,
    oid: Oid,
    array_oid: Oid,
}

/// Registry of user-defined type names and their resolved oids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OidMap {
    entries: Vec<Entry>,
}

impl OidMap {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register `T` by its declared type name.
    ///
    /// Registering the same name twice is a no-op.
    pub fn register<T: PgName>(mut self) -> Self {
        self.insert::<T>();
        self
    }

    /// In-place version of [`register`][OidMap::register].
    pub fn insert<T: PgName>(&mut self) {
        if self.entries.iter().all(|e| e.name != T::NAME) {
            self.entries.push(Entry { name: T::NAME, oid: 0, array_oid: 0 });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether every registered entry has an oid from the server.
    pub fn is_resolved(&self) -> bool {
        self.entries.iter().all(|e| e.oid != 0)
    }

    /// The resolved oid of `name`, [`None`] while unresolved or unregistered.
    pub fn oid_of(&self, name: &str) -> Option<Oid> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.oid)
            .filter(|oid| *oid != 0)
    }

    /// The resolved oid of the array over `name`.
    pub fn array_oid_of(&self, name: &str) -> Option<Oid> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.array_oid)
            .filter(|oid| *oid != 0)
    }

    /// The resolved oid of a registered type.
    pub fn type_oid<T: PgName>(&self) -> Option<Oid> {
        self.oid_of(T::NAME)
    }

    pub(crate) fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.name)
    }

    /// The query which maps every registered name to its oid pair.
    ///
    /// One row per name in registration order; a name unknown to the
    /// server comes back as `(0, 0)` through the outer join.
    pub(crate) fn introspection_sql(&self) -> String {
        let mut sql = String::from(
            "SELECT COALESCE(t.oid, 0)::int8, COALESCE(t.typarray, 0)::int8 \
             FROM unnest(ARRAY[",
        );
        for (i, name) in self.type_names().enumerate() {
            if i > 0 {
                sql.push(',');
            }
            sql.push('\'');
            sql.push_str(name);
            sql.push('\'');
        }
        sql.push_str(
            "]::text[]) WITH ORDINALITY AS names(typname, ord) \
             LEFT JOIN pg_type t ON t.typname = names.typname \
             ORDER BY names.ord",
        );
        sql
    }

    /// Store the `(oid, array_oid)` pairs returned by introspection.
    ///
    /// Pairs follow registration order. The update is atomic: on any
    /// error the map is left untouched.
    pub fn set_oids(&mut self, oids: &[(Oid, Oid)]) -> Result<(), OidMapError> {
        if oids.len() != self.entries.len() {
            return Err(OidMapError::LengthMismatch {
                expected: self.entries.len(),
                found: oids.len(),
            });
        }

        for (entry, (oid, _)) in self.entries.iter().zip(oids) {
            if *oid == 0 {
                return Err(OidMapError::UnknownType { name: entry.name });
            }
        }

        for (entry, (oid, array_oid)) in self.entries.iter_mut().zip(oids) {
            entry.oid = *oid;
            entry.array_oid = *array_oid;
        }

        Ok(())
    }
}

/// Parse a text-format integer cell from an introspection row.
pub(crate) fn parse_text_oid(bytes: &[u8]) -> Option<Oid> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// An error when storing introspected oids.
#[derive(Debug, PartialEq, Eq)]
pub enum OidMapError {
    /// The server returned a different number of rows than there are
    /// registered names.
    LengthMismatch {
        expected: usize,
        found: usize,
    },
    /// A registered name has no `pg_type` row in the target database.
    UnknownType {
        name: &'static str,
    },
    /// A parameter was bound by a type name that was never registered.
    Unregistered {
        name: &'static str,
    },
}

impl fmt::Display for OidMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LengthMismatch { expected, found } => {
                write!(f, "oid introspection returned {found} rows for {expected} registered types")
            },
            Self::UnknownType { name } => {
                write!(f, "type {name:?} is not defined in the target database")
            },
            Self::Unregistered { name } => {
                write!(f, "type {name:?} is not registered in the oid map")
            },
        }
    }
}

impl std::error::Error for OidMapError { }

#[cfg(test)]
mod test {
    use super::*;

    struct Shift;

    impl PgName for Shift {
        const NAME: &'static str = "shift";
    }

    struct Badge;

    impl PgName for Badge {
        const NAME: &'static str = "badge";
    }

    fn map() -> OidMap {
        OidMap::new().register::<Shift>().register::<Badge>()
    }

    #[test]
    fn registered_types_start_unresolved() {
        let map = map();
        assert_eq!(map.len(), 2);
        assert!(!map.is_resolved());
        assert_eq!(map.type_oid::<Shift>(), None);
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let map = map().register::<Shift>();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn set_oids_resolves_in_registration_order() {
        let mut map = map();
        map.set_oids(&[(16384, 16385), (16400, 16401)]).unwrap();

        assert!(map.is_resolved());
        assert_eq!(map.type_oid::<Shift>(), Some(16384));
        assert_eq!(map.array_oid_of("shift"), Some(16385));
        assert_eq!(map.type_oid::<Badge>(), Some(16400));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut map = map();
        let err = map.set_oids(&[(16384, 16385)]).unwrap_err();
        assert_eq!(err, OidMapError::LengthMismatch { expected: 2, found: 1 });
    }

    #[test]
    fn unknown_type_is_rejected_and_map_unchanged() {
        let mut map = map();
        map.set_oids(&[(16384, 16385), (16400, 16401)]).unwrap();

        let before = map.clone();
        let err = map.set_oids(&[(16500, 16501), (0, 0)]).unwrap_err();
        assert_eq!(err, OidMapError::UnknownType { name: "badge" });
        assert_eq!(map, before);
    }

    #[test]
    fn introspection_sql_lists_names_in_order() {
        let sql = map().introspection_sql();
        assert!(sql.contains("ARRAY['shift','badge']"));
        assert!(sql.contains("LEFT JOIN pg_type"));
        assert!(sql.contains("ORDER BY names.ord"));
    }
}
