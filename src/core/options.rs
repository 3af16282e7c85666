//! Purpose: Ordered key/value engine options (aria2 `KeyVals`).
//! Exports: `Options`.
//! Role: Session-creation and per-download options passed through to the engine.
//! Invariants: Insertion order is preserved; duplicate keys are kept (aria2 allows repeats).
//! Invariants: Keys are non-empty and never contain `=`.
use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Options {
    pairs: Vec<(String, String)>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// Parses a `key=value` pair; the value may itself contain `=`.
    pub fn push_pair(&mut self, raw: &str) -> Result<(), Error> {
        let (key, value) = raw.split_once('=').ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("option `{raw}` is missing `=`"))
                .with_hint("Options are written as key=value, e.g. max-connection-per-server=4.")
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("option `{raw}` has an empty key")));
        }
        self.push(key, value);
        Ok(())
    }

    pub fn parse_pairs<'a, I>(raw: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut options = Self::new();
        for pair in raw {
            options.push_pair(pair)?;
        }
        Ok(options)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// JSON object form used by aria2's RPC interface; later keys win.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in &self.pairs {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Value::Object(map)
    }
}
