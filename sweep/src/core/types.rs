//! Configuration values shared by the expander, oracle, and dispatcher.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single parameter value.
///
/// Serialized as the bare JSON/TOML value. Integers and floats are distinct:
/// `1` and `1.0` never compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(value) => Some(*value as f64),
            Scalar::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Int(value) => write!(f, "{value}"),
            Scalar::Float(value) => write!(f, "{value}"),
            Scalar::Str(value) => f.write_str(value),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(i64::from(value))
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Scalar::Int(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

/// One trial configuration: parameter name to scalar value, sorted by name.
///
/// Two configurations describe the same run iff their canonical JSON forms
/// are identical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    fields: BTreeMap<String, Scalar>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Config::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a field, returning the previous value if any.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Option<Scalar> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.fields.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Scalar::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Scalar::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Scalar::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Scalar::as_bool)
    }

    pub fn remove(&mut self, key: &str) -> Option<Scalar> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.fields.iter()
    }

    /// Fails if any field is a NaN or infinite float. JSON has no spelling for
    /// those, so such a configuration could never be matched after a restart.
    pub fn ensure_finite(&self) -> Result<()> {
        for (key, value) in &self.fields {
            if let Scalar::Float(float) = value
                && !float.is_finite()
            {
                bail!("parameter {key:?} is {float}; only finite floats can be persisted");
            }
        }
        Ok(())
    }

    /// Compact JSON with keys in sorted order. Errors on non-finite floats.
    pub fn canonical_json(&self) -> Result<String> {
        self.ensure_finite()?;
        serde_json::to_string(&self.fields).context("serialize config")
    }

    /// Canonical JSON after dropping `ignore_keys`.
    pub fn canonical_json_without(&self, ignore_keys: &[String]) -> Result<String> {
        if ignore_keys.is_empty() {
            return self.canonical_json();
        }
        self.ensure_finite()?;
        let kept: BTreeMap<&String, &Scalar> = self
            .fields
            .iter()
            .filter(|(key, _)| !ignore_keys.contains(key))
            .collect();
        serde_json::to_string(&kept).context("serialize config")
    }

    /// Lowercase hex SHA-256 of the canonical JSON.
    pub fn content_hash(&self) -> Result<String> {
        let canonical = self.canonical_json()?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(hex::encode(digest))
    }

    /// True if both configurations describe the same run, ignoring `ignore_keys`.
    pub fn same_run(&self, other: &Config, ignore_keys: &[String]) -> Result<bool> {
        Ok(self.canonical_json_without(ignore_keys)? == other.canonical_json_without(ignore_keys)?)
    }
}

impl<K: Into<String>, V: Into<Scalar>> FromIterator<(K, V)> for Config {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut config = Config::new();
        for (key, value) in iter {
            config.set(key, value);
        }
        config
    }
}

impl<K: Into<String>, V: Into<Scalar>> Extend<(K, V)> for Config {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

/// Everything an entrypoint receives for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    /// The user configuration, unmodified by the dispatcher.
    pub config: Config,
    /// Unique identifier, also the output directory name.
    pub run_id: String,
    /// Directory the entrypoint must write its artifacts into.
    pub output_dir: PathBuf,
}
