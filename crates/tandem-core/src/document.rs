//! Document tree and path operations

use crate::error::{Error, Result};
use crate::path::{split_last, PathSegment};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum nesting depth
pub const MAX_NESTING_DEPTH: usize = 64;

/// A reorder instruction carried by sort events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortEntry {
    pub id: String,
    pub order: i64,
}

/// The path-addressed document tree held by a session.
///
/// The root is always a JSON object. Values below it are arbitrary JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Value,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing value. Non-object roots are replaced by an empty object.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => Self { root: value },
            _ => Self::default(),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Get a value at a path (e.g., "items[0].name"). The empty path is the root.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in PathSegment::parse(path) {
            current = match segment {
                PathSegment::Key(key) => current.as_object()?.get(key)?,
                PathSegment::Index(idx) => current.as_array()?.get(idx)?,
            };
        }
        Some(current)
    }

    fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut current = &mut self.root;
        for segment in PathSegment::parse(path) {
            current = match segment {
                PathSegment::Key(key) => current.as_object_mut()?.get_mut(key)?,
                PathSegment::Index(idx) => current.as_array_mut()?.get_mut(idx)?,
            };
        }
        Some(current)
    }

    /// Get the text stored at a path
    pub fn text(&self, path: &str) -> Result<&str> {
        match self.get(path) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(Error::NotText(path.to_string())),
            None => Err(Error::PathNotFound(path.to_string())),
        }
    }

    /// Replace the text stored at a path. The path must already hold text.
    pub fn set_text(&mut self, path: &str, text: String) -> Result<()> {
        match self.get_mut(path) {
            Some(value) if value.is_string() => {
                *value = Value::String(text);
                Ok(())
            }
            Some(_) => Err(Error::NotText(path.to_string())),
            None => Err(Error::PathNotFound(path.to_string())),
        }
    }

    /// Set a value at a path, creating intermediate objects/arrays as needed.
    ///
    /// A list index may address an existing element or append one past the end.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let segments: Vec<PathSegment> = PathSegment::parse(path).collect();
        if segments.is_empty() {
            return match value {
                Value::Object(_) => {
                    self.root = value;
                    Ok(())
                }
                _ => Err(Error::InvalidPath("document root must be an object".into())),
            };
        }
        if segments.len() > MAX_NESTING_DEPTH {
            return Err(Error::InvalidPath(format!("{} exceeds nesting depth", path)));
        }

        let mut current = &mut self.root;
        let last = segments.len() - 1;

        for (i, segment) in segments.iter().enumerate() {
            let is_last = i == last;

            match segment {
                PathSegment::Key(key) => {
                    if !current.is_object() {
                        *current = Value::Object(Map::new());
                    }
                    if let Value::Object(map) = current {
                        if is_last {
                            map.insert(key.to_string(), value);
                            return Ok(());
                        } else {
                            current = map.entry(key.to_string()).or_insert(Value::Null);
                        }
                    }
                }
                PathSegment::Index(idx) => {
                    if !current.is_array() {
                        *current = Value::Array(Vec::new());
                    }
                    if let Value::Array(arr) = current {
                        // Only the slot one past the end may be filled in
                        if *idx > arr.len() {
                            return Err(Error::IndexOutOfBounds {
                                path: path.to_string(),
                                index: *idx,
                                len: arr.len(),
                            });
                        }
                        if *idx == arr.len() {
                            arr.push(Value::Null);
                        }
                        if is_last {
                            arr[*idx] = value;
                            return Ok(());
                        } else {
                            current = &mut arr[*idx];
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Create a list or map entry.
    ///
    /// If the path holds a list the value is appended. Otherwise the final
    /// segment names the new entry: an index is inserted into the parent
    /// list, a key is inserted into the parent map.
    pub fn create(&mut self, path: &str, value: Value) -> Result<()> {
        if let Some(Value::Array(arr)) = self.get_mut(path) {
            arr.push(value);
            return Ok(());
        }

        let (parent, last) = split_last(path).ok_or_else(|| Error::InvalidPath(path.to_string()))?;
        let container = self
            .get_mut(parent)
            .ok_or_else(|| Error::PathNotFound(parent.to_string()))?;

        match (container, last) {
            (Value::Array(arr), PathSegment::Index(idx)) => {
                if idx > arr.len() {
                    return Err(Error::IndexOutOfBounds {
                        path: path.to_string(),
                        index: idx,
                        len: arr.len(),
                    });
                }
                arr.insert(idx, value);
                Ok(())
            }
            (Value::Object(map), PathSegment::Key(key)) => {
                map.insert(key.to_string(), value);
                Ok(())
            }
            (Value::Array(_), PathSegment::Key(_)) => Err(Error::WrongContainer {
                path: parent.to_string(),
                expected: "map",
            }),
            (_, _) => Err(Error::WrongContainer {
                path: parent.to_string(),
                expected: "list",
            }),
        }
    }

    /// Remove a list or map entry, returning the removed value.
    pub fn delete(&mut self, path: &str) -> Result<Value> {
        let (parent, last) = split_last(path).ok_or_else(|| Error::InvalidPath(path.to_string()))?;
        let container = self
            .get_mut(parent)
            .ok_or_else(|| Error::PathNotFound(parent.to_string()))?;

        match (container, last) {
            (Value::Array(arr), PathSegment::Index(idx)) => {
                if idx >= arr.len() {
                    return Err(Error::IndexOutOfBounds {
                        path: path.to_string(),
                        index: idx,
                        len: arr.len(),
                    });
                }
                Ok(arr.remove(idx))
            }
            (Value::Object(map), PathSegment::Key(key)) => map
                .remove(key)
                .ok_or_else(|| Error::PathNotFound(path.to_string())),
            _ => Err(Error::InvalidPath(path.to_string())),
        }
    }

    /// Apply a batch reorder below `path`.
    ///
    /// Entries live either in a map keyed by id or in a list of objects
    /// carrying an `id` field; each matching entry gets its `order` set.
    /// Unknown ids are skipped.
    pub fn sort(&mut self, path: &str, entries: &[SortEntry]) -> Result<()> {
        let container = self
            .get_mut(path)
            .ok_or_else(|| Error::PathNotFound(path.to_string()))?;

        for entry in entries {
            let target = match &mut *container {
                Value::Object(map) => map.get_mut(&entry.id),
                Value::Array(arr) => arr
                    .iter_mut()
                    .find(|item| item.get("id").and_then(Value::as_str) == Some(entry.id.as_str())),
                _ => {
                    return Err(Error::WrongContainer {
                        path: path.to_string(),
                        expected: "list or map",
                    })
                }
            };
            if let Some(Value::Object(item)) = target {
                item.insert("order".to_string(), Value::from(entry.order));
            }
        }
        Ok(())
    }
}
