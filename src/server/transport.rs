//! Server-side RPC transport: accepts one connection per call, reads one
//! request, and writes back one reply. Also simulates an unreliable network
//! when asked to.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::server::{PbReplica, RpcRequest, RpcReply};
use crate::utils::{PbkvError, read_frame, write_frame, tcp_call};

use rand::Rng;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;

/// Calls a server at `addr` and checks that the reply variant matches the
/// request's.
pub(crate) async fn call_server(
    addr: &str,
    req: &RpcRequest,
    timeout: Duration,
) -> Result<RpcReply, PbkvError> {
    let reply: RpcReply = tcp_call(addr, req, timeout).await?;
    match (req, &reply) {
        (RpcRequest::Get(_), RpcReply::Get(_))
        | (RpcRequest::PutAppend(_), RpcReply::PutAppend(_))
        | (RpcRequest::SyncKeyValue(_), RpcReply::SyncKeyValue(_)) => Ok(reply),
        _ => Err(PbkvError::msg(format!(
            "mismatched reply to {} from {}",
            req.name(),
            addr
        ))),
    }
}

/// Rolls a `permille`-in-1000 chance.
fn roll_permille(permille: u16) -> bool {
    rand::thread_rng().gen_range(0..1000) < permille
}

// PbReplica connection acceptor thread implementation
impl PbReplica {
    /// Connection acceptor thread function.
    pub(super) async fn acceptor_thread(
        replica: Arc<PbReplica>,
        listener: TcpListener,
    ) {
        pf_debug!(replica.me; "acceptor thread spawned");

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    pf_warn!(replica.me; "error accepting connection: {}", e);
                    continue;
                }
            };
            if replica.is_dead() {
                break;
            }

            let mut drop_reply = false;
            if replica.is_unreliable() {
                if roll_permille(replica.config.drop_req_permille) {
                    // discard the request unread; dropping closes the stream
                    pf_trace!(replica.me; "dropping request from {}", addr);
                    continue;
                }
                drop_reply = roll_permille(replica.config.drop_reply_permille);
            }

            tokio::spawn(Self::servant_thread(
                replica.clone(),
                stream,
                addr,
                drop_reply,
            ));
        }

        pf_debug!(replica.me; "acceptor thread exited");
    }

    /// Per-connection servant thread function: serves exactly one call.
    async fn servant_thread(
        replica: Arc<PbReplica>,
        mut stream: TcpStream,
        addr: SocketAddr,
        drop_reply: bool,
    ) {
        let req: RpcRequest = match read_frame(&mut stream).await {
            Ok(req) => req,
            Err(e) => {
                pf_debug!(
                    replica.me;
                    "error reading request from {}: {}",
                    addr,
                    e
                );
                return;
            }
        };
        pf_trace!(replica.me; "got {} from {}", req.name(), addr);

        let reply = replica.handle_rpc(req).await;
        if drop_reply {
            // processed, but the caller never hears back
            pf_trace!(replica.me; "dropping reply to {}", addr);
            return;
        }

        if let Err(e) = write_frame(&reply, &mut stream).await {
            pf_debug!(replica.me; "error writing reply to {}: {}", addr, e);
        }
    }
}
