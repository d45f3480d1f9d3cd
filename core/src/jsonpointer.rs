//! RFC 6901 JSON Pointer used to address branches of the flow configuration.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct JsonPointer {
    tokens: Vec<String>,
}

impl JsonPointer {
    /// The empty pointer, which addresses the whole document.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn first_token(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn push(&self, token: impl ToString) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token.to_string());
        Self { tokens }
    }

    /// Pointer to the `idx`-th branch of a `one_of` list.
    pub fn one_of(&self, idx: usize) -> Self {
        self.push("one_of").push(idx)
    }

    /// Pointer to the `idx`-th entry of a `steps` list.
    pub fn steps(&self, idx: usize) -> Self {
        self.push("steps").push(idx)
    }

    pub fn traverse<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.tokens
            .iter()
            .try_fold(document, |current, token| match current {
                Value::Object(map) => map.get(token),
                Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }
}

fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

impl fmt::Display for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            write!(f, "/{}", escape(token))?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid json pointer: {0}")]
pub struct InvalidPointer(String);

impl FromStr for JsonPointer {
    type Err = InvalidPointer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = s.strip_prefix('/') else {
            return Err(InvalidPointer(s.to_string()));
        };
        Ok(Self {
            tokens: rest.split('/').map(unescape).collect(),
        })
    }
}

impl Serialize for JsonPointer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for JsonPointer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
