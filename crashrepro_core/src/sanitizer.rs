use crate::error::ReproError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sanitizer {
    Asan,
    Ubsan,
    Lsan,
    Tsan,
    Msan,
}

impl Sanitizer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sanitizer::Asan => "ASAN",
            Sanitizer::Ubsan => "UBSAN",
            Sanitizer::Lsan => "LSAN",
            Sanitizer::Tsan => "TSAN",
            Sanitizer::Msan => "MSAN",
        }
    }

    /// Name of the variable pointing the runtime at the symbolizer binary.
    pub fn symbolizer_variable(&self) -> String {
        format!("{}_SYMBOLIZER_PATH", self.as_str())
    }
}

impl fmt::Display for Sanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sanitizer {
    type Err = ReproError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASAN" => Ok(Sanitizer::Asan),
            "UBSAN" => Ok(Sanitizer::Ubsan),
            "LSAN" => Ok(Sanitizer::Lsan),
            "TSAN" => Ok(Sanitizer::Tsan),
            "MSAN" => Ok(Sanitizer::Msan),
            _ => Err(ReproError::SanitizerNotProvided),
        }
    }
}

/// Bundled suppression list name for a `*_OPTIONS` variable, if there is one.
pub fn suppressions_name(variable: &str) -> Option<&'static str> {
    match variable {
        "UBSAN_OPTIONS" => Some("ubsan"),
        "LSAN_OPTIONS" => Some("lsan"),
        "TSAN_OPTIONS" => Some("tsan"),
        _ => None,
    }
}

/// A sanitizer option string such as `symbolize=1:suppressions=/a.txt`,
/// held as key/value pairs in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizerOptions {
    entries: Vec<(String, String)>,
}

impl SanitizerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a colon-separated `key=value` list.
    ///
    /// Empty segments carry no option and are skipped, so extra colons
    /// (`:a=1::b=2:`) are accepted. Any other segment without `=` is rejected.
    /// A repeated key keeps its first position and takes the last value.
    pub fn parse(options: &str) -> Result<Self, ReproError> {
        let mut parsed = Self::new();
        for segment in options.split(':') {
            if segment.is_empty() {
                continue;
            }
            let (key, value) =
                segment
                    .split_once('=')
                    .ok_or_else(|| ReproError::SanitizerOptions {
                        options: options.to_string(),
                        segment: segment.to_string(),
                    })?;
            parsed.set(key, value);
        }
        Ok(parsed)
    }

    pub fn serialize(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
