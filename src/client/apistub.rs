//! Client API communication stub implementation.

use crate::utils::PbkvError;
use crate::server::{
    call_server, GetArgs, GetReply, PutAppendArgs, PutAppendReply, RequestId,
    RpcReply, RpcRequest, WriteOp,
};

use tokio::time::Duration;

/// Generates a random request ID. A client must reuse the same ID when
/// retrying the same logical operation.
pub fn gen_request_id() -> RequestId {
    rand::random()
}

/// Client API stub issuing single client-originated calls.
#[derive(Debug, Clone)]
pub struct ClientApiStub {
    /// Timeout of each call.
    timeout: Duration,
}

impl ClientApiStub {
    /// Creates a new API stub.
    pub fn new(timeout: Duration) -> Self {
        ClientApiStub { timeout }
    }

    /// Sends a Get to `server`.
    pub async fn get(
        &self,
        server: &str,
        id: RequestId,
        key: &str,
    ) -> Result<GetReply, PbkvError> {
        let req = RpcRequest::Get(GetArgs {
            id,
            key: key.into(),
            forward: true,
        });
        match call_server(server, &req, self.timeout).await? {
            RpcReply::Get(reply) => Ok(reply),
            _ => Err(PbkvError::msg("mismatched reply to Get")),
        }
    }

    /// Sends a Put or Append to `server`.
    pub async fn put_append(
        &self,
        server: &str,
        id: RequestId,
        op: WriteOp,
        key: &str,
        value: &str,
    ) -> Result<PutAppendReply, PbkvError> {
        let req = RpcRequest::PutAppend(PutAppendArgs {
            id,
            key: key.into(),
            value: value.into(),
            op,
            forward: true,
        });
        match call_server(server, &req, self.timeout).await? {
            RpcReply::PutAppend(reply) => Ok(reply),
            _ => Err(PbkvError::msg("mismatched reply to PutAppend")),
        }
    }

    /// Sends a Put to `server`.
    pub async fn put(
        &self,
        server: &str,
        id: RequestId,
        key: &str,
        value: &str,
    ) -> Result<PutAppendReply, PbkvError> {
        self.put_append(server, id, WriteOp::Put, key, value).await
    }

    /// Sends an Append to `server`.
    pub async fn append(
        &self,
        server: &str,
        id: RequestId,
        key: &str,
        value: &str,
    ) -> Result<PutAppendReply, PbkvError> {
        self.put_append(server, id, WriteOp::Append, key, value).await
    }
}
