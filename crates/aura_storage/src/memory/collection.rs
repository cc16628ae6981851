//! Records and indexes of one in-memory collection.

use crate::error::{EngineError, EngineResult};
use crate::key::{Key, KeyPath};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Smallest possible key, used as the lower bound of an index range.
const MIN_KEY: Key = Key::Integer(i64::MIN);

#[derive(Debug, Clone)]
pub(crate) struct Collection {
    key_path: KeyPath,
    auto_increment: bool,
    /// Last generated (or explicitly used) integer key.
    generator: i64,
    indexes: BTreeMap<String, IndexData>,
    records: BTreeMap<Key, Value>,
}

#[derive(Debug, Clone)]
struct IndexData {
    key_path: KeyPath,
    unique: bool,
    /// (index key, primary key)
    entries: BTreeSet<(Key, Key)>,
}

impl IndexData {
    fn matching<'a>(&'a self, key: &'a Key) -> impl Iterator<Item = &'a Key> + 'a {
        self.entries
            .range((key.clone(), MIN_KEY)..)
            .take_while(move |(index_key, _)| index_key == key)
            .map(|(_, primary)| primary)
    }
}

impl Collection {
    pub(crate) fn new(key_path: &KeyPath, auto_increment: bool) -> EngineResult<Self> {
        if auto_increment && (key_path.is_composite() || key_path.field() == Some("")) {
            return Err(EngineError::invalid_access(format!(
                "key generator requires a single non-empty key path, got {key_path}"
            )));
        }
        Ok(Self {
            key_path: key_path.clone(),
            auto_increment,
            generator: 0,
            indexes: BTreeMap::new(),
            records: BTreeMap::new(),
        })
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    pub(crate) fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    pub(crate) fn create_index(
        &mut self,
        name: &str,
        key_path: &KeyPath,
        unique: bool,
    ) -> EngineResult<()> {
        if self.indexes.contains_key(name) {
            return Err(EngineError::constraint(format!("index {name} already exists")));
        }
        let mut index = IndexData {
            key_path: key_path.clone(),
            unique,
            entries: BTreeSet::new(),
        };
        for (primary, record) in &self.records {
            let Some(index_key) = key_path.evaluate(record) else {
                continue;
            };
            if unique && index.matching(&index_key).next().is_some() {
                return Err(EngineError::constraint(format!(
                    "existing records violate unique index {name} at {index_key}"
                )));
            }
            index.entries.insert((index_key, primary.clone()));
        }
        self.indexes.insert(name.to_string(), index);
        Ok(())
    }

    /// Stores a record, generating its key when needed.
    ///
    /// Nothing changes when an error is returned.
    pub(crate) fn write(&mut self, mut record: Value, overwrite: bool) -> EngineResult<Key> {
        let key = match self.key_path.evaluate(&record) {
            Some(key) => key,
            None if self.auto_increment && !self.key_path.is_present(&record) => {
                let next = self
                    .generator
                    .checked_add(1)
                    .ok_or_else(|| EngineError::constraint("key generator exhausted"))?;
                let key = Key::Integer(next);
                if !self.key_path.inject(&mut record, &key) {
                    return Err(EngineError::data(format!(
                        "generated key cannot be stored at {}",
                        self.key_path
                    )));
                }
                key
            }
            None => {
                return Err(EngineError::data(format!(
                    "record has no valid key at {}",
                    self.key_path
                )))
            }
        };

        if !overwrite && self.records.contains_key(&key) {
            return Err(EngineError::constraint(format!(
                "a record with key {key} already exists"
            )));
        }

        let index_keys: Vec<(String, Option<Key>)> = self
            .indexes
            .iter()
            .map(|(name, index)| (name.clone(), index.key_path.evaluate(&record)))
            .collect();
        for (name, index_key) in &index_keys {
            let (Some(index), Some(index_key)) = (self.indexes.get(name), index_key) else {
                continue;
            };
            if index.unique && index.matching(index_key).any(|primary| primary != &key) {
                return Err(EngineError::constraint(format!(
                    "unique index {name} already contains {index_key}"
                )));
            }
        }

        self.unindex(&key);
        for (name, index_key) in index_keys {
            if let (Some(index), Some(index_key)) = (self.indexes.get_mut(&name), index_key) {
                index.entries.insert((index_key, key.clone()));
            }
        }
        self.records.insert(key.clone(), record);

        if self.auto_increment {
            if let Key::Integer(n) = key {
                self.generator = self.generator.max(n);
            }
        }
        Ok(key)
    }

    pub(crate) fn get(&self, key: &Key) -> Option<Value> {
        self.records.get(key).cloned()
    }

    pub(crate) fn all(&self) -> Vec<Value> {
        self.records.values().cloned().collect()
    }

    pub(crate) fn delete(&mut self, key: &Key) {
        self.unindex(key);
        self.records.remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.records.len() as u64
    }

    pub(crate) fn index_get(&self, index: &str, key: &Key) -> EngineResult<Option<Value>> {
        let index = self.index(index)?;
        Ok(index
            .matching(key)
            .next()
            .and_then(|primary| self.records.get(primary).cloned()))
    }

    pub(crate) fn index_get_all(&self, index: &str, key: &Key) -> EngineResult<Vec<Value>> {
        let index = self.index(index)?;
        Ok(index
            .matching(key)
            .filter_map(|primary| self.records.get(primary).cloned())
            .collect())
    }

    /// Next record in `index` whose index key equals `only`, strictly after
    /// the primary key `after`.
    pub(crate) fn index_next(
        &self,
        index: &str,
        only: &Key,
        after: Option<&Key>,
    ) -> EngineResult<Option<(Key, Value)>> {
        let index = self.index(index)?;
        let lower = match after {
            Some(primary) => Bound::Excluded((only.clone(), primary.clone())),
            None => Bound::Included((only.clone(), MIN_KEY)),
        };
        Ok(index
            .entries
            .range((lower, Bound::Unbounded))
            .take_while(|(index_key, _)| index_key == only)
            .find_map(|(_, primary)| {
                self.records
                    .get(primary)
                    .map(|record| (primary.clone(), record.clone()))
            }))
    }

    fn index(&self, name: &str) -> EngineResult<&IndexData> {
        self.indexes
            .get(name)
            .ok_or_else(|| EngineError::not_found(format!("index {name} does not exist")))
    }

    fn unindex(&mut self, key: &Key) {
        let Some(old) = self.records.get(key) else {
            return;
        };
        for index in self.indexes.values_mut() {
            if let Some(index_key) = index.key_path.evaluate(old) {
                index.entries.remove(&(index_key, key.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn books() -> Collection {
        let mut books = Collection::new(&KeyPath::single("id"), true).unwrap();
        books
            .create_index("genre_id", &KeyPath::single("genreId"), false)
            .unwrap();
        books
    }

    #[test]
    fn generates_and_injects_keys() {
        let mut books = books();
        let key = books.write(json!({ "title": "A" }), false).unwrap();
        assert_eq!(key, Key::Integer(1));
        assert_eq!(books.get(&key), Some(json!({ "id": 1, "title": "A" })));
    }

    #[test]
    fn present_null_key_is_rejected() {
        let mut books = books();
        let err = books.write(json!({ "id": null }), false).unwrap_err();
        assert!(matches!(err, EngineError::Data { .. }));
        assert_eq!(books.count(), 0);
    }

    #[test]
    fn fractional_key_is_rejected() {
        let mut books = books();
        let err = books.write(json!({ "id": 1.5 }), true).unwrap_err();
        assert!(matches!(err, EngineError::Data { .. }));
        assert_eq!(books.count(), 0);
    }

    #[test]
    fn explicit_keys_advance_the_generator() {
        let mut books = books();
        books.write(json!({ "id": 10 }), false).unwrap();
        let key = books.write(json!({}), false).unwrap();
        assert_eq!(key, Key::Integer(11));
    }

    #[test]
    fn add_rejects_existing_key_and_put_replaces() {
        let mut books = books();
        books.write(json!({ "id": 1, "genreId": 1 }), false).unwrap();
        assert!(matches!(
            books.write(json!({ "id": 1 }), false),
            Err(EngineError::Constraint { .. })
        ));

        books.write(json!({ "id": 1, "genreId": 2 }), true).unwrap();
        assert!(books.index_get_all("genre_id", &Key::Integer(1)).unwrap().is_empty());
        assert_eq!(books.index_get_all("genre_id", &Key::Integer(2)).unwrap().len(), 1);
    }

    #[test]
    fn unique_index_rejects_second_holder() {
        let mut settings = Collection::new(&KeyPath::single("id"), false).unwrap();
        settings
            .create_index("name", &KeyPath::single("name"), true)
            .unwrap();
        settings.write(json!({ "id": "a", "name": "x" }), false).unwrap();
        // Rewriting the same record keeps its own index entry.
        settings.write(json!({ "id": "a", "name": "x" }), true).unwrap();

        let err = settings.write(json!({ "id": "b", "name": "x" }), false).unwrap_err();
        assert!(matches!(err, EngineError::Constraint { .. }));
        assert_eq!(settings.count(), 1);
    }

    #[test]
    fn unique_index_creation_checks_existing_records() {
        let mut books = books();
        books.write(json!({ "hash": "h" }), false).unwrap();
        books.write(json!({ "hash": "h" }), false).unwrap();
        assert!(books.create_index("hash", &KeyPath::single("hash"), true).is_err());
        assert!(!books.has_index("hash"));
    }

    #[test]
    fn composite_auto_key_is_invalid() {
        let err = Collection::new(&KeyPath::from(["bookId", "id"]), true).unwrap_err();
        assert!(matches!(err, EngineError::InvalidAccess { .. }));
    }

    #[test]
    fn index_walk_survives_deletes() {
        let mut books = books();
        for genre in [1, 2, 1, 1] {
            books.write(json!({ "genreId": genre }), false).unwrap();
        }
        let only = Key::Integer(1);
        let mut seen = Vec::new();
        let mut cursor = books.index_next("genre_id", &only, None).unwrap();
        while let Some((primary, _)) = cursor {
            books.delete(&primary);
            seen.push(primary.clone());
            cursor = books.index_next("genre_id", &only, Some(&primary)).unwrap();
        }
        assert_eq!(seen, vec![Key::Integer(1), Key::Integer(3), Key::Integer(4)]);
        assert_eq!(books.count(), 1);
    }
}
