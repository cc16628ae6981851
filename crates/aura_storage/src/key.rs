//! Keys and key paths.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A primary or index key.
///
/// Keys are totally ordered: every integer sorts before every text key, and
/// every text key sorts before every array key. Arrays compare element by
/// element, shorter prefixes first. Text compares by UTF-8 bytes, which
/// agrees with code point order.
///
/// Booleans, null and objects are not valid keys. Numbers are keys only
/// when integral: the browser engine also accepts fractional numbers, but
/// every key this store generates or indexes is an integer, so a fractional
/// number is rejected as a `DataError` rather than rounded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Integer key.
    Integer(i64),
    /// Text key.
    Text(String),
    /// Composite key.
    Array(Vec<Key>),
}

impl Key {
    /// Converts a JSON value into a key.
    ///
    /// Returns `None` when the value is not a valid key. Numbers are accepted
    /// when they are integral and fit in an `i64`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => {
                if let Some(n) = number.as_i64() {
                    return Some(Key::Integer(n));
                }
                let float = number.as_f64()?;
                if float.fract() == 0.0 && float >= i64::MIN as f64 && float < i64::MAX as f64 {
                    Some(Key::Integer(float as i64))
                } else {
                    None
                }
            }
            Value::String(text) => Some(Key::Text(text.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            Value::Null | Value::Bool(_) | Value::Object(_) => None,
        }
    }

    /// Converts the key into a JSON value.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Key::Integer(n) => Value::from(*n),
            Key::Text(text) => Value::String(text.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_json).collect()),
        }
    }

    /// Returns the integer value, if this is an integer key.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Key::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Integer(n) => write!(f, "{n}"),
            Key::Text(text) => write!(f, "{text:?}"),
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Integer(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Integer(i64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Integer(i64::from(n))
    }
}

impl From<&str> for Key {
    fn from(text: &str) -> Self {
        Key::Text(text.to_string())
    }
}

impl From<String> for Key {
    fn from(text: String) -> Self {
        Key::Text(text)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

/// The field, or ordered list of fields, that yields a key from a record.
///
/// A single path may be dotted (`meta.id`) to reach into nested objects. An
/// empty single path denotes the record itself.
///
/// Serializes the way the engine spells key paths: a string, or an array of
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    /// One field.
    Single(String),
    /// Several fields forming a composite key.
    Composite(Vec<String>),
}

impl KeyPath {
    /// Creates a single-field key path.
    pub fn single(path: impl Into<String>) -> Self {
        KeyPath::Single(path.into())
    }

    /// Creates a composite key path.
    pub fn composite<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath::Composite(paths.into_iter().map(Into::into).collect())
    }

    /// Returns true for composite key paths.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self, KeyPath::Composite(_))
    }

    /// Returns the field path of a single-field key path.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            KeyPath::Single(path) => Some(path),
            KeyPath::Composite(_) => None,
        }
    }

    /// Evaluates the key path against a record.
    ///
    /// Returns `None` unless every component resolves to a valid key.
    #[must_use]
    pub fn evaluate(&self, record: &Value) -> Option<Key> {
        match self {
            KeyPath::Single(path) => resolve(record, path).and_then(Key::from_json),
            KeyPath::Composite(paths) => paths
                .iter()
                .map(|path| resolve(record, path).and_then(Key::from_json))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Returns true when the record holds no value, or null, at this path.
    ///
    /// Composite paths are unset when any component is unset.
    #[must_use]
    pub fn is_unset(&self, record: &Value) -> bool {
        let unset = |path: &str| resolve(record, path).map_or(true, Value::is_null);
        match self {
            KeyPath::Single(path) => unset(path),
            KeyPath::Composite(paths) => paths.iter().any(|path| unset(path)),
        }
    }

    /// Returns true when every component of the path is present in the
    /// record. A present null still counts as present.
    #[must_use]
    pub fn is_present(&self, record: &Value) -> bool {
        match self {
            KeyPath::Single(path) => resolve(record, path).is_some(),
            KeyPath::Composite(paths) => paths.iter().all(|path| resolve(record, path).is_some()),
        }
    }

    /// Removes the field at a single-field key path.
    ///
    /// Returns true when a field was removed. Composite paths are left
    /// untouched.
    pub fn remove(&self, record: &mut Value) -> bool {
        let Some(path) = self.field() else {
            return false;
        };
        let (parent, last) = match path.rsplit_once('.') {
            Some((parent, last)) => (resolve_mut(record, parent), last),
            None => (Some(record), path),
        };
        parent
            .and_then(Value::as_object_mut)
            .map_or(false, |object| object.remove(last).is_some())
    }

    /// Writes a key into the record at a single-field key path.
    ///
    /// Missing intermediate objects are created. Returns false when the path
    /// is composite or crosses a non-object value.
    pub fn inject(&self, record: &mut Value, key: &Key) -> bool {
        let Some(path) = self.field() else {
            return false;
        };
        if path.is_empty() {
            return false;
        }
        let mut current = record;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let Some(object) = current.as_object_mut() else {
                return false;
            };
            if segments.peek().is_none() {
                object.insert(segment.to_string(), key.to_json());
                return true;
            }
            current = object
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        false
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Single(path) => write!(f, "{path}"),
            KeyPath::Composite(paths) => write!(f, "[{}]", paths.join(", ")),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::single(path)
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::Single(path)
    }
}

impl<const N: usize> From<[&str; N]> for KeyPath {
    fn from(paths: [&str; N]) -> Self {
        KeyPath::composite(paths)
    }
}

fn resolve<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(record);
    }
    path.split('.')
        .try_fold(record, |value, segment| value.as_object()?.get(segment))
}

fn resolve_mut<'a>(record: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    if path.is_empty() {
        return Some(record);
    }
    path.split('.')
        .try_fold(record, |value, segment| value.as_object_mut()?.get_mut(segment))
}
