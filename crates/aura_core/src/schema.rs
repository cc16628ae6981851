//! Schema descriptor.
//!
//! A [`Schema`] declares the collections of the database, each with a key
//! path, an optional key generator and secondary indexes. It is validated
//! once when built and applied inside the engine's upgrade callback.

use crate::error::{StoreError, StoreResult};
use aura_storage::{EngineResult, KeyPath, SchemaEditor, VersionChange};
use std::collections::HashSet;
use tracing::info;

/// A secondary index declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    /// Index name, unique within its collection.
    pub name: String,
    /// Indexed path.
    pub path: KeyPath,
    /// Whether at most one record may hold each index key.
    pub unique: bool,
}

impl IndexDescriptor {
    /// Declares a non-unique index.
    pub fn new(name: impl Into<String>, path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            unique: false,
        }
    }

    /// Declares a unique index.
    pub fn unique(name: impl Into<String>, path: impl Into<KeyPath>) -> Self {
        Self {
            unique: true,
            ..Self::new(name, path)
        }
    }
}

/// A collection declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDescriptor {
    /// Collection name, unique within the schema.
    pub name: String,
    /// Path of the primary key.
    pub key_path: KeyPath,
    /// Whether the engine generates keys for records that lack one.
    pub auto_key: bool,
    /// Secondary indexes.
    pub indexes: Vec<IndexDescriptor>,
}

impl CollectionDescriptor {
    /// Declares a collection without a key generator.
    pub fn new(name: impl Into<String>, key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            auto_key: false,
            indexes: Vec::new(),
        }
    }

    /// Enables the key generator.
    #[must_use]
    pub fn auto_key(mut self) -> Self {
        self.auto_key = true;
        self
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    /// Looks up an index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|index| index.name == name)
    }

    fn validate(&self) -> StoreResult<()> {
        if self.name.is_empty() {
            return Err(StoreError::invalid_schema("collection name is empty"));
        }
        if self.auto_key && (self.key_path.is_composite() || self.key_path.field() == Some("")) {
            return Err(StoreError::invalid_schema(format!(
                "collection {} cannot generate keys for key path {}",
                self.name, self.key_path
            )));
        }
        let mut names = HashSet::new();
        for index in &self.indexes {
            if !names.insert(index.name.as_str()) {
                return Err(StoreError::invalid_schema(format!(
                    "collection {} declares index {} twice",
                    self.name, index.name
                )));
            }
        }
        Ok(())
    }
}

/// The declared collections of a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    collections: Vec<CollectionDescriptor>,
}

impl Schema {
    /// Builds and validates a schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if a collection name repeats, a collection
    /// with a key generator has a composite key path, or an index name
    /// repeats within a collection.
    pub fn new(collections: Vec<CollectionDescriptor>) -> StoreResult<Self> {
        let mut names = HashSet::new();
        for collection in &collections {
            collection.validate()?;
            if !names.insert(collection.name.as_str()) {
                return Err(StoreError::invalid_schema(format!(
                    "collection {} declared twice",
                    collection.name
                )));
            }
        }
        Ok(Self { collections })
    }

    /// Returns every collection declaration.
    #[must_use]
    pub fn collections(&self) -> &[CollectionDescriptor] {
        &self.collections
    }

    /// Looks up a collection by name.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionDescriptor> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Looks up a collection by name, failing with `UnknownCollection`.
    pub(crate) fn require(&self, name: &str) -> StoreResult<&CollectionDescriptor> {
        self.collection(name)
            .ok_or_else(|| StoreError::unknown_collection(name))
    }

    /// Creates the declared collections and indexes.
    ///
    /// Existing collections and indexes are kept. With `reset`, every
    /// existing collection is dropped first.
    pub fn apply(
        &self,
        editor: &mut dyn SchemaEditor,
        change: VersionChange,
        reset: bool,
    ) -> EngineResult<()> {
        if reset {
            for name in editor.collection_names() {
                editor.delete_collection(&name)?;
            }
        }

        let existing = editor.collection_names();
        let mut created = 0usize;
        for collection in &self.collections {
            if !existing.contains(&collection.name) {
                editor.create_collection(&collection.name, &collection.key_path, collection.auto_key)?;
                created += 1;
            }
            let indexes = editor.index_names(&collection.name)?;
            for index in &collection.indexes {
                if !indexes.contains(&index.name) {
                    editor.create_index(&collection.name, &index.name, &index.path, index.unique)?;
                }
            }
        }

        info!(
            old_version = change.old_version,
            new_version = change.new_version,
            reset,
            created,
            "schema applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter() -> CollectionDescriptor {
        CollectionDescriptor::new("chapter", ["bookId", "id"])
            .with_index(IndexDescriptor::new("book_id", "bookId"))
    }

    #[test]
    fn lookup_by_name() {
        let schema = Schema::new(vec![chapter()]).unwrap();
        let chapter = schema.collection("chapter").unwrap();
        assert!(chapter.key_path.is_composite());
        assert!(!chapter.index("book_id").unwrap().unique);
        assert!(schema.collection("book").is_none());
        assert!(matches!(
            schema.require("book"),
            Err(StoreError::UnknownCollection { .. })
        ));
    }

    #[test]
    fn composite_auto_key_is_rejected() {
        let err = Schema::new(vec![chapter().auto_key()]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidSchema { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        assert!(Schema::new(vec![chapter(), chapter()]).is_err());

        let twice = CollectionDescriptor::new("book", "id")
            .with_index(IndexDescriptor::new("genre_id", "genreId"))
            .with_index(IndexDescriptor::unique("genre_id", "hash"));
        assert!(Schema::new(vec![twice]).is_err());
    }
}
