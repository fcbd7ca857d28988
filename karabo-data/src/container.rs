//! The Container: an ordered, typed, attributed recursive key/value map.
//! This is the universal payload of the RPC runtime -- every header and
//! body is one of these.

use indexmap::IndexMap;

use crate::error::{DataError, DataResult};
use crate::types::Value;

/// Validate a container key against the wire grammar: non-empty, first
/// character a letter or underscore, remaining characters letters, digits
/// or underscores, and at most 255 bytes (the wire's key-length prefix is a
/// single byte).
pub fn validate_key(key: &str) -> DataResult<()> {
    if key.len() > 255 {
        return Err(DataError::KeyTooLong { key: key.to_owned(), len: key.len() });
    }
    let mut chars = key.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.clone().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !first_ok || !rest_ok {
        return Err(DataError::InvalidKey { key: key.to_owned() });
    }
    Ok(())
}

/// One entry of a [`Container`]: a value plus its ordered attribute map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(pub IndexMap<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    value: Value,
    attributes: Attributes,
}

/// An ordered mapping from string key to typed value, preserving insertion
/// order, with a per-entry attribute map. Nested containers are allowed;
/// cycles are rejected (see [`crate::binary`]'s recursion-depth guard, which
/// is where this is actually enforced rather than at insertion time, since
/// safe Rust's ownership already makes an owned-container cycle
/// unconstructible -- only the recursive encode/decode path can ever be fed
/// pathologically deep input).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Container {
    entries: IndexMap<String, Entry>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value at `key`, preserving position on
    /// overwrite and appending on first insertion. Fails if `key` violates
    /// the wire grammar.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> DataResult<()> {
        let key = key.into();
        validate_key(&key)?;
        match self.entries.get_mut(&key) {
            Some(entry) => entry.value = value.into(),
            None => {
                self.entries.insert(key, Entry { value: value.into(), attributes: Attributes::new() });
            }
        }
        Ok(())
    }

    /// Like [`Self::set`] but panics on an invalid key. Convenient for
    /// literal, statically-known keys (header construction, `a1..aN`
    /// argument packing) where a validation failure is a programming error.
    pub fn set_unchecked(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.set(key, value).expect("statically-known container key must be valid")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key).map(|e| e.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn attributes(&self, key: &str) -> Option<&Attributes> {
        self.entries.get(key).map(|e| &e.attributes)
    }

    pub fn attributes_mut(&mut self, key: &str) -> Option<&mut Attributes> {
        self.entries.get_mut(key).map(|e| &mut e.attributes)
    }

    pub fn set_attribute(&mut self, key: &str, attr: impl Into<String>, value: impl Into<Value>) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.attributes.set(attr, value);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value, &Attributes)> {
        self.entries.iter().map(|(k, e)| (k, &e.value, &e.attributes))
    }

    /// Dotted-path lookup (`"topologyCheck.interval"`), recursing through
    /// nested containers. Returns `None` if any segment is missing or not a
    /// container.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut value = self.get(first)?;
        for segment in segments {
            value = value.as_container()?.get(segment)?;
        }
        Some(value)
    }

    /// Dotted-path insertion, creating intermediate containers as needed.
    pub fn set_path(&mut self, path: &str, value: impl Into<Value>) -> DataResult<()> {
        let mut segments = path.split('.').peekable();
        let first = segments.next().ok_or_else(|| DataError::InvalidKey { key: path.to_owned() })?;
        if segments.peek().is_none() {
            return self.set(first, value);
        }
        validate_key(first)?;
        if !matches!(self.get(first), Some(Value::Container(_))) {
            self.set(first, Container::new())?;
        }
        let Value::Container(child) = self.get_mut(first).unwrap() else { unreachable!() };
        let rest = path[first.len() + 1..].to_string();
        child.set_path(&rest, value)
    }
}

impl IntoIterator for Container {
    type Item = (String, Value, Attributes);
    type IntoIter = std::vec::IntoIter<(String, Value, Attributes)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries
            .into_iter()
            .map(|(k, e)| (k, e.value, e.attributes))
            .collect::<Vec<_>>()
            .into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_grammar() {
        assert!(validate_key("foo").is_ok());
        assert!(validate_key("_foo123").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("1foo").is_err());
        assert!(validate_key("foo-bar").is_err());
        assert!(validate_key(&"a".repeat(255)).is_ok());
        assert!(validate_key(&"a".repeat(256)).is_err());
    }

    #[test]
    fn set_get_roundtrip() {
        let mut c = Container::new();
        c.set("n", 42i32).unwrap();
        c.set("s", "hi").unwrap();
        assert_eq!(c.get("n"), Some(&Value::Int32(42)));
        assert_eq!(c.get("s").and_then(Value::as_str), Some("hi"));
    }

    #[test]
    fn overwrite_preserves_position() {
        let mut c = Container::new();
        c.set("a", 1i32).unwrap();
        c.set("b", 2i32).unwrap();
        c.set("a", 3i32).unwrap();
        let keys: Vec<&String> = c.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(c.get("a"), Some(&Value::Int32(3)));
    }

    #[test]
    fn nested_dotted_path() {
        let mut c = Container::new();
        c.set_path("topologyCheck.interval", 15i32).unwrap();
        c.set_path("topologyCheck.toleranceLogged", 60i32).unwrap();
        assert_eq!(c.get_path("topologyCheck.interval"), Some(&Value::Int32(15)));
        assert_eq!(c.get_path("topologyCheck.toleranceLogged"), Some(&Value::Int32(60)));
        assert!(c.get_path("topologyCheck.missing").is_none());
    }

    #[test]
    fn attributes_roundtrip() {
        let mut c = Container::new();
        c.set("v", 1.5f64).unwrap();
        c.set_attribute("v", "unit", "meter");
        assert_eq!(c.attributes("v").unwrap().get("unit").and_then(Value::as_str), Some("meter"));
    }
}
