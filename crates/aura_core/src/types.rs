//! Core type definitions.

use std::fmt;

/// Unique identifier for a coordinated transaction.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// The set of collections a transaction covers.
///
/// Duplicates are removed; order is kept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scope(Vec<String>);

impl Scope {
    /// Creates a scope from collection names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut collections: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !collections.contains(&name) {
                collections.push(name);
            }
        }
        Self(collections)
    }

    /// Returns the collection names.
    #[must_use]
    pub fn collections(&self) -> &[String] {
        &self.0
    }

    /// Returns true if the scope names no collection.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if the scope contains the collection.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|collection| collection == name)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

impl From<&str> for Scope {
    fn from(name: &str) -> Self {
        Self::new([name])
    }
}

impl From<String> for Scope {
    fn from(name: String) -> Self {
        Self::new([name])
    }
}

impl<const N: usize> From<[&str; N]> for Scope {
    fn from(names: [&str; N]) -> Self {
        Self::new(names)
    }
}

impl From<&[&str]> for Scope {
    fn from(names: &[&str]) -> Self {
        Self::new(names.iter().copied())
    }
}

impl From<Vec<String>> for Scope {
    fn from(names: Vec<String>) -> Self {
        Self::new(names)
    }
}

impl From<Vec<&str>> for Scope {
    fn from(names: Vec<&str>) -> Self {
        Self::new(names)
    }
}
