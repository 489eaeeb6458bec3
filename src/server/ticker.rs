//! View polling and state transfer to a newly assigned backup.

use super::*;

use tokio::time::{self, Instant, MissedTickBehavior};

// PbReplica view ticker
impl PbReplica {
    /// Pings the view authority, bounded by the RPC timeout.
    pub(super) async fn ping_view_service(
        &self,
        viewnum: ViewNum,
    ) -> Result<View, PbkvError> {
        time::timeout(
            self.rpc_timeout(),
            self.view_service.ping(&self.me, viewnum),
        )
        .await?
    }

    /// One view poll step, run holding my lock throughout:
    ///   1. poll the authority; on failure keep my view and give up this
    ///      round
    ///   2. as primary facing a new non-empty backup, clear the sync flag
    ///   3. as primary out of sync, push full state to the backup and set
    ///      the flag only if the backup acknowledges
    ///   4. adopt the polled view, whatever happened in step 3
    pub(super) async fn tick(&self) {
        if self.is_dead() {
            return;
        }
        let mut state = self.state.lock().await;

        let view = match self.ping_view_service(state.view.viewnum).await {
            Ok(view) => view,
            Err(e) => {
                pf_debug!(self.me; "view ping failed: {}", e);
                return;
            }
        };
        if view.viewnum < state.view.viewnum {
            pf_warn!(
                self.me;
                "ignoring older view {} than mine {}",
                view,
                state.view
            );
            return;
        }

        let am_primary = view.is_primary(&self.me);
        let backup_changed =
            view.backup.is_some() && view.backup != state.view.backup;
        if am_primary && backup_changed {
            pf_info!(self.me; "new backup in view {}", view);
            state.is_sync = false;
        }

        if am_primary && !state.is_sync {
            if let Some(backup) = view.backup.as_deref() {
                if self.push_state(&state, backup).await {
                    state.is_sync = true;
                }
            }
        }

        if view != state.view {
            pf_info!(self.me; "adopting view {} (was {})", view, state.view);
        }
        state.view = view;
    }

    /// Sends my whole store and request table to `backup`. Returns true if
    /// the backup installed it.
    async fn push_state(&self, state: &ReplicaState, backup: &str) -> bool {
        let req = RpcRequest::SyncKeyValue(SyncArgs {
            store: state.store.snapshot(),
            table: state.table.snapshot(),
        });
        match call_server(backup, &req, self.rpc_timeout()).await {
            Ok(RpcReply::SyncKeyValue(SyncReply {
                status: Status::Ok,
            })) => {
                pf_info!(self.me; "pushed full state to backup {}", backup);
                true
            }
            Ok(reply) => {
                pf_warn!(
                    self.me;
                    "backup {} refused state transfer: {:?}",
                    backup,
                    reply
                );
                false
            }
            Err(e) => {
                pf_warn!(self.me; "error pushing state to {}: {}", backup, e);
                false
            }
        }
    }

    /// View ticker thread function.
    pub(super) async fn ticker_thread(replica: Arc<PbReplica>) {
        pf_debug!(replica.me; "ticker thread spawned");

        let period = Duration::from_millis(replica.config.tick_interval_ms);
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !replica.is_dead() {
            interval.tick().await;
            replica.tick().await;
        }

        pf_debug!(replica.me; "ticker thread exited");
    }
}
