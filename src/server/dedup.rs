//! Duplicate-suppression table: remembers every request identifier a server
//! has handled so that client retransmissions are not applied twice.

use std::collections::HashMap;

use crate::server::WriteOp;

use serde::{Serialize, Deserialize};

/// Client-generated request identifier type.
pub type RequestId = u64;

/// Kind of a recorded operation.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum OpKind {
    Get,
    Put,
    Append,
}

impl From<WriteOp> for OpKind {
    fn from(op: WriteOp) -> Self {
        match op {
            WriteOp::Put => OpKind::Put,
            WriteOp::Append => OpKind::Append,
        }
    }
}

/// What a request identifier was first seen carrying.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub key: String,

    /// Empty for reads.
    pub value: String,

    pub kind: OpKind,
}

impl RequestRecord {
    /// Record of a read.
    pub fn get(key: impl Into<String>) -> Self {
        RequestRecord {
            key: key.into(),
            value: String::new(),
            kind: OpKind::Get,
        }
    }

    /// Record of a write.
    pub fn write(
        op: WriteOp,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        RequestRecord {
            key: key.into(),
            value: value.into(),
            kind: op.into(),
        }
    }
}

/// Full copy of the table, as shipped in a state transfer.
pub type TableSnapshot = HashMap<RequestId, RequestRecord>;

/// Append-only map from request ID -> record. Entries are never evicted nor
/// overwritten; the table only shrinks when a state transfer replaces it.
#[derive(Debug, Default)]
pub(crate) struct RequestTable {
    records: TableSnapshot,
}

impl RequestTable {
    /// Creates a new empty table.
    pub(crate) fn new() -> Self {
        RequestTable {
            records: TableSnapshot::new(),
        }
    }

    /// Is this Get a retry of one already handled? Reads match on key only.
    pub(crate) fn is_duplicate_get(&self, id: RequestId, key: &str) -> bool {
        self.records.get(&id).is_some_and(|rec| rec.key == key)
    }

    /// Is this write a retry of one already applied? Writes must match on
    /// key, value, and kind.
    pub(crate) fn is_duplicate_write(
        &self,
        id: RequestId,
        key: &str,
        value: &str,
        op: WriteOp,
    ) -> bool {
        self.records.get(&id).is_some_and(|rec| {
            rec.key == key
                && rec.value == value
                && rec.kind == OpKind::from(op)
        })
    }

    /// Records the first sighting of `id`. Returns false and leaves the
    /// table untouched if `id` was already recorded.
    pub(crate) fn record(&mut self, id: RequestId, rec: RequestRecord) -> bool {
        if self.records.contains_key(&id) {
            return false;
        }
        self.records.insert(id, rec);
        true
    }

    /// Copies out the whole table.
    pub(crate) fn snapshot(&self) -> TableSnapshot {
        self.records.clone()
    }

    /// Discards current contents and takes over the given table.
    pub(crate) fn replace(&mut self, records: TableSnapshot) {
        self.records = records;
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
