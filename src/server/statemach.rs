//! The in-memory key-value store, mutated only by applying Put/Append.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::utils::PbkvError;

use serde::{Serialize, Deserialize};

/// Write operation kind. Put and Append are the only two writes; any other
/// name is rejected at parse time.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum WriteOp {
    /// Replace the key's value.
    Put,

    /// Concatenate onto the key's value, treating a missing key as empty.
    Append,
}

impl WriteOp {
    /// Parse an operation name into WriteOp enum.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "Put" => Some(Self::Put),
            "Append" => Some(Self::Append),
            _ => None,
        }
    }
}

impl FromStr for WriteOp {
    type Err = PbkvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_name(s).ok_or_else(|| {
            PbkvError::msg(format!("write op name '{}' unrecognized", s))
        })
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// State is simply a `HashMap` from `String` key -> `String` value.
pub type KvSnapshot = HashMap<String, String>;

/// The local volatile key-value store.
#[derive(Debug, Default)]
pub(crate) struct KvStore {
    state: KvSnapshot,
}

impl KvStore {
    /// Creates a new empty store.
    pub(crate) fn new() -> Self {
        KvStore {
            state: KvSnapshot::new(),
        }
    }

    /// Looks up the value of given key.
    pub(crate) fn get(&self, key: &str) -> Option<&String> {
        self.state.get(key)
    }

    /// Applies a write, returning the key's value afterwards.
    pub(crate) fn apply(
        &mut self,
        op: WriteOp,
        key: &str,
        value: &str,
    ) -> &String {
        let entry = self.state.entry(key.to_string()).or_default();
        match op {
            WriteOp::Put => {
                entry.clear();
                entry.push_str(value);
            }
            WriteOp::Append => entry.push_str(value),
        }
        entry
    }

    /// Copies out the whole mapping.
    pub(crate) fn snapshot(&self) -> KvSnapshot {
        self.state.clone()
    }

    /// Discards current contents and takes over the given mapping.
    pub(crate) fn replace(&mut self, state: KvSnapshot) {
        self.state = state;
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.len()
    }
}
