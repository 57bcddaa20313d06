//! Host settings surface.
//!
//! The host hands the engine a nested JSON tree of options. [`Settings`]
//! wraps that tree with key-path lookup and typed accessors; missing or
//! mistyped entries yield `None` so the typed configuration layer can fall
//! back to its defaults (the host's merged-settings semantics).

use serde_json::Value;

/// Nested key-path settings lookup.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    root: Value,
}

impl Settings {
    /// Wrap a settings tree.
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Parse a settings tree from a JSON string.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// Raw lookup of a nested value.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let mut node = &self.root;
        for key in path {
            node = node.as_object()?.get(*key)?;
        }
        Some(node)
    }

    /// Integer accessor. JSON floats with an integral value do not coerce.
    pub fn get_int(&self, path: &[&str]) -> Option<i64> {
        self.get(path)?.as_i64()
    }

    /// Float accessor. Integer entries coerce to float.
    pub fn get_float(&self, path: &[&str]) -> Option<f64> {
        self.get(path)?.as_f64()
    }

    /// String accessor.
    pub fn get_str(&self, path: &[&str]) -> Option<&str> {
        self.get(path)?.as_str()
    }

    /// Boolean accessor.
    pub fn get_bool(&self, path: &[&str]) -> Option<bool> {
        self.get(path)?.as_bool()
    }
}
