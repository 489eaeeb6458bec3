//! Server RPC message types, shared by clients and peer servers.

use crate::server::{KvSnapshot, RequestId, TableSnapshot, WriteOp};

use serde::{Serialize, Deserialize};

/// Outcome status carried in every reply.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Status {
    Ok,

    /// Get addressed a key with no recorded value.
    NoKey,

    /// Receiver does not hold the role the caller expects of it.
    WrongServer,
}

/// Get call arguments. `forward` is set on client-originated calls and clear
/// on primary -> backup forwards.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct GetArgs {
    pub id: RequestId,
    pub key: String,
    pub forward: bool,
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct GetReply {
    pub status: Status,

    /// Empty unless status is `Ok`.
    pub value: String,
}

impl GetReply {
    pub(crate) fn with_status(status: Status) -> Self {
        GetReply {
            status,
            value: String::new(),
        }
    }
}

/// PutAppend call arguments.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct PutAppendArgs {
    pub id: RequestId,
    pub key: String,
    pub value: String,
    pub op: WriteOp,
    pub forward: bool,
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct PutAppendReply {
    pub status: Status,

    /// The replier's stored value of the key after handling the call. A
    /// primary compares this against its own to detect a diverged backup.
    pub value: String,
}

impl PutAppendReply {
    pub(crate) fn with_status(status: Status) -> Self {
        PutAppendReply {
            status,
            value: String::new(),
        }
    }
}

/// Full-state transfer from primary to backup.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct SyncArgs {
    pub store: KvSnapshot,
    pub table: TableSnapshot,
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct SyncReply {
    pub status: Status,
}

/// Request accepted by a server's listener.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    Get(GetArgs),
    PutAppend(PutAppendArgs),
    SyncKeyValue(SyncArgs),
}

/// Reply to an `RpcRequest`, always of the matching variant.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum RpcReply {
    Get(GetReply),
    PutAppend(PutAppendReply),
    SyncKeyValue(SyncReply),
}

impl RpcRequest {
    /// Short name of the call, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            RpcRequest::Get(_) => "Get",
            RpcRequest::PutAppend(_) => "PutAppend",
            RpcRequest::SyncKeyValue(_) => "SyncKeyValue",
        }
    }
}
