// Token stream - whitespace-delimited `*KEY value ...` text records

use std::str::FromStr;

use crate::error::{Result, ZoneError};

/// One `*KEY` token and the plain tokens that follow it
#[derive(Clone, Debug, PartialEq)]
pub struct Record<'a> {
    pub key: &'a str,
    pub values: Vec<&'a str>,
}

impl<'a> Record<'a> {
    /// Parse value `index` as `T`
    pub fn value<T: FromStr>(&self, index: usize) -> Result<T> {
        let raw = self.values.get(index).ok_or_else(|| {
            ZoneError::format(format!("{} is missing value {}", self.key, index))
        })?;
        raw.parse::<T>()
            .map_err(|_| ZoneError::format(format!("{}: bad value '{}'", self.key, raw)))
    }

    pub fn text(&self) -> &'a str {
        self.values.first().copied().unwrap_or("")
    }

    pub fn vec3(&self) -> Result<[f32; 3]> {
        Ok([self.value(0)?, self.value(1)?, self.value(2)?])
    }
}

/// All tokens of a text entry
pub fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace()
}

/// Group tokens into records. Tokens before the first `*KEY` are dropped.
pub fn records(text: &str) -> Vec<Record<'_>> {
    let mut out: Vec<Record<'_>> = Vec::new();
    for token in tokens(text) {
        if token.starts_with('*') {
            out.push(Record {
                key: token,
                values: Vec::new(),
            });
        } else if let Some(last) = out.last_mut() {
            last.values.push(token);
        }
    }
    out
}

/// Decode an entry as text, tolerating stray non-UTF-8 bytes
pub fn entry_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
