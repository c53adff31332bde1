//! Benchmark setup files: plain-text `KEY = value` pairs.
//!
//! Keys are case-insensitive and may contain spaces (`POLYNOMIAL DEGREE`).
//! Lines starting with `#` and blank lines are ignored.

use eyre::{bail, eyre, WrapErr};
use rustc_hash::FxHashMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Default, Clone)]
pub struct Setup {
    entries: FxHashMap<String, String>,
}

fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

impl Setup {
    pub fn from_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("cannot read setup file {}", path.display()))?;
        Self::parse(&text).wrap_err_with(|| format!("in setup file {}", path.display()))
    }

    pub fn parse(text: &str) -> eyre::Result<Self> {
        let mut entries = FxHashMap::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bail!("line {}: expected KEY = value, got {:?}", lineno + 1, line);
            };
            let key = normalize_key(key);
            if key.is_empty() {
                bail!("line {}: empty key", lineno + 1);
            }
            entries.insert(key, value.trim().to_string());
        }
        Ok(Self { entries })
    }

    pub fn set(&mut self, key: &str, value: impl Display) {
        self.entries.insert(normalize_key(key), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> eyre::Result<&str> {
        self.get(key)
            .ok_or_else(|| eyre!("setup key {:?} is required", normalize_key(key)))
    }

    /// Case-insensitive comparison of a key's value, absent keys compare
    /// unequal to everything.
    pub fn compare(&self, key: &str, value: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case(value))
            .unwrap_or(false)
    }

    /// `TRUE`/`YES`/`1` (case-insensitive) count as set.
    pub fn flag(&self, key: &str) -> bool {
        self.compare(key, "TRUE") || self.compare(key, "YES") || self.compare(key, "1")
    }

    /// Parses a required key's value.
    pub fn parsed<F: FromStr>(&self, key: &str) -> eyre::Result<F> {
        let value = self.require(key)?;
        value
            .parse()
            .map_err(|_| eyre!("setup key {:?} has invalid value {:?}", normalize_key(key), value))
    }

    /// Parses an optional key's value, falling back to `default` when the
    /// key is absent.
    pub fn parsed_or<F: FromStr>(&self, key: &str, default: F) -> eyre::Result<F> {
        match self.get(key) {
            Some(value) => value.parse().map_err(|_| {
                eyre!("setup key {:?} has invalid value {:?}", normalize_key(key), value)
            }),
            None => Ok(default),
        }
    }
}
