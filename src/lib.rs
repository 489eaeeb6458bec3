//! Primary-backup replicated key-value service core.
//!
//! Two replicas, a primary and a backup, are kept consistent under the role
//! assignment handed out by an external view authority. The primary applies
//! client operations and synchronously forwards them to the backup;
//! retransmitted operations are suppressed by request ID; a newly assigned
//! backup receives the primary's full state on the next view poll.

#[macro_use]
mod utils;

mod server;
mod client;

pub use utils::{PbkvError, logger_init};

pub use server::{
    PbServer, ReplicaConfig, View, ViewNum, ServerName, ViewService,
    ViewClerk, ViewRequest, ViewReply, WriteOp, KvSnapshot, RequestId, OpKind,
    RequestRecord, TableSnapshot, Status, GetArgs, GetReply, PutAppendArgs,
    PutAppendReply, SyncArgs, SyncReply, RpcRequest, RpcReply,
};

pub use client::{ClientApiStub, gen_request_id};
