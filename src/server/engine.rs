//! Replication engine: Get / PutAppend / SyncKeyValue handlers.
//!
//! A client-originated call (`forward == true`) is served only by the
//! primary, which applies it locally and then synchronously forwards it to
//! the backup while still holding its lock. A forwarded call is served only
//! by the backup. Forwarding problems never fail the client's call; they
//! only clear the primary's sync flag so the next tick pushes full state.

use super::*;

// PbReplica request handlers
impl PbReplica {
    /// Dispatches an incoming RPC to its handler.
    pub(super) async fn handle_rpc(&self, req: RpcRequest) -> RpcReply {
        match req {
            RpcRequest::Get(args) => RpcReply::Get(self.handle_get(args).await),
            RpcRequest::PutAppend(args) => {
                RpcReply::PutAppend(self.handle_put_append(args).await)
            }
            RpcRequest::SyncKeyValue(args) => {
                RpcReply::SyncKeyValue(self.handle_sync_key_value(args).await)
            }
        }
    }

    /// Handler of Get call.
    ///
    /// A forwarded call takes my lock too. If two replicas each believe the
    /// other is their backup, each holds its own lock while forwarding to the
    /// other; both forwards then stall until `rpc_timeout_ms` expires and
    /// count as failed, after which both clients get their replies.
    pub(super) async fn handle_get(&self, args: GetArgs) -> GetReply {
        let mut state = self.state.lock().await;
        if !state.role_admits(&self.me, args.forward) {
            pf_debug!(
                self.me;
                "rejecting Get {} forward {} in view {}",
                args.id,
                args.forward,
                state.view
            );
            return GetReply::with_status(Status::WrongServer);
        }

        // a retried read answers with the key's current value, not the one
        // seen the first time
        if state.table.is_duplicate_get(args.id, &args.key) {
            pf_trace!(self.me; "duplicate Get {} key '{}'", args.id, args.key);
            return match state.store.get(&args.key) {
                Some(value) => GetReply {
                    status: Status::Ok,
                    value: value.clone(),
                },
                None => GetReply::with_status(Status::NoKey),
            };
        }

        let reply = match state.store.get(&args.key) {
            Some(value) => GetReply {
                status: Status::Ok,
                value: value.clone(),
            },
            None => GetReply::with_status(Status::NoKey),
        };
        state.table.record(args.id, RequestRecord::get(args.key.as_str()));
        pf_trace!(self.me; "Get {} key '{}' -> {:?}", args.id, args.key, reply.status);

        if !args.forward || reply.status != Status::Ok {
            return reply;
        }
        let Some(backup) = state.view.backup.clone() else {
            return reply;
        };

        // check the read against the backup; the client gets my answer
        // regardless
        let fwd_req = RpcRequest::Get(GetArgs {
            forward: false,
            ..args
        });
        match call_server(&backup, &fwd_req, self.rpc_timeout()).await {
            Ok(RpcReply::Get(fwd_reply))
                if fwd_reply.status == Status::Ok
                    && fwd_reply.value == reply.value => {}
            Ok(fwd_reply) => {
                pf_warn!(
                    self.me;
                    "backup {} diverged on Get: {:?}",
                    backup,
                    fwd_reply
                );
                state.is_sync = false;
            }
            Err(e) => {
                pf_warn!(self.me; "error forwarding Get to {}: {}", backup, e);
                state.is_sync = false;
            }
        }

        reply
    }

    /// Handler of PutAppend call. Locking on forwarded calls behaves as in
    /// `handle_get`: a mutual-forward stall is bounded by `rpc_timeout_ms`.
    pub(super) async fn handle_put_append(
        &self,
        args: PutAppendArgs,
    ) -> PutAppendReply {
        let mut state = self.state.lock().await;
        if !state.role_admits(&self.me, args.forward) {
            pf_debug!(
                self.me;
                "rejecting PutAppend {} forward {} in view {}",
                args.id,
                args.forward,
                state.view
            );
            return PutAppendReply::with_status(Status::WrongServer);
        }

        // a retried write is acknowledged without being applied again
        if state.table.is_duplicate_write(
            args.id,
            &args.key,
            &args.value,
            args.op,
        ) {
            pf_trace!(
                self.me;
                "duplicate {} {} key '{}'",
                args.op,
                args.id,
                args.key
            );
            let value = state.store.get(&args.key).cloned().unwrap_or_default();
            return PutAppendReply {
                status: Status::Ok,
                value,
            };
        }

        let value = state.store.apply(args.op, &args.key, &args.value).clone();
        state.table.record(
            args.id,
            RequestRecord::write(args.op, args.key.as_str(), args.value.as_str()),
        );
        pf_trace!(self.me; "applied {} {} key '{}'", args.op, args.id, args.key);
        let reply = PutAppendReply {
            status: Status::Ok,
            value,
        };

        if !args.forward {
            return reply;
        }
        let Some(backup) = state.view.backup.clone() else {
            return reply;
        };

        // the write already took effect here; forwarding outcome only
        // decides whether I still consider the backup in sync
        let fwd_req = RpcRequest::PutAppend(PutAppendArgs {
            forward: false,
            ..args
        });
        match call_server(&backup, &fwd_req, self.rpc_timeout()).await {
            Ok(RpcReply::PutAppend(fwd_reply))
                if fwd_reply.status == Status::Ok
                    && fwd_reply.value == reply.value => {}
            Ok(fwd_reply) => {
                pf_warn!(
                    self.me;
                    "backup {} diverged on PutAppend: {:?}",
                    backup,
                    fwd_reply
                );
                state.is_sync = false;
            }
            Err(e) => {
                pf_warn!(
                    self.me;
                    "error forwarding PutAppend to {}: {}",
                    backup,
                    e
                );
                state.is_sync = false;
            }
        }

        reply
    }

    /// Handler of SyncKeyValue call: wholesale replacement of my store and
    /// request table by the pushed snapshot, accepted only if the view
    /// authority currently names me backup.
    pub(super) async fn handle_sync_key_value(&self, args: SyncArgs) -> SyncReply {
        // ask the authority directly instead of trusting my own view, which
        // may lag behind the pusher's
        let viewnum = self.state.lock().await.view.viewnum;
        let recognized = match self.ping_view_service(viewnum).await {
            Ok(view) => view.is_backup(&self.me),
            Err(e) => {
                pf_warn!(self.me; "view ping during sync failed: {}", e);
                false
            }
        };
        if !recognized {
            pf_warn!(self.me; "rejecting state transfer: not backup");
            return SyncReply {
                status: Status::WrongServer,
            };
        }

        let mut state = self.state.lock().await;
        let (num_keys, num_records) = (args.store.len(), args.table.len());
        state.store.replace(args.store);
        state.table.replace(args.table);
        pf_info!(
            self.me;
            "installed state transfer: {} keys {} records",
            num_keys,
            num_records
        );

        SyncReply { status: Status::Ok }
    }
}
