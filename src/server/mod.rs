//! Primary-backup replica server: role-gated Get/PutAppend handling with
//! synchronous forwarding to the backup, duplicate suppression, and periodic
//! view polling that drives full-state transfer to a new backup.

mod view;
mod statemach;
mod dedup;
mod messages;
mod engine;
mod ticker;
mod transport;

#[cfg(test)]
mod testkit;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::utils::PbkvError;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;

pub use view::{
    View, ViewNum, ServerName, ViewService, ViewClerk, ViewRequest, ViewReply,
};
pub use statemach::{WriteOp, KvSnapshot};
pub use dedup::{RequestId, OpKind, RequestRecord, TableSnapshot};
pub use messages::{
    Status, GetArgs, GetReply, PutAppendArgs, PutAppendReply, SyncArgs,
    SyncReply, RpcRequest, RpcReply,
};

pub(crate) use transport::call_server;

use statemach::KvStore;
use dedup::RequestTable;

/// Configuration parameters struct.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Interval of polling the view authority in millisecs.
    pub tick_interval_ms: u64,

    /// Timeout of one outbound RPC (forward, state push, view ping) in
    /// millisecs.
    pub rpc_timeout_ms: u64,

    /// Chance in 1000 of dropping an incoming request unprocessed while
    /// unreliable.
    pub drop_req_permille: u16,

    /// Chance in 1000 of processing an incoming request but discarding its
    /// reply while unreliable.
    pub drop_reply_permille: u16,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        ReplicaConfig {
            tick_interval_ms: 100,
            rpc_timeout_ms: 1000,
            drop_req_permille: 100,
            drop_reply_permille: 200,
        }
    }
}

impl ReplicaConfig {
    /// Parses config fields from an optional TOML string and validates them.
    pub fn parse(config_str: Option<&str>) -> Result<Self, PbkvError> {
        let config = parsed_config!(config_str => ReplicaConfig;
                                    tick_interval_ms, rpc_timeout_ms,
                                    drop_req_permille, drop_reply_permille)?;
        if config.tick_interval_ms == 0 {
            return logged_err!(
                "invalid config.tick_interval_ms '{}'",
                config.tick_interval_ms
            );
        }
        if config.rpc_timeout_ms == 0 {
            return logged_err!(
                "invalid config.rpc_timeout_ms '{}'",
                config.rpc_timeout_ms
            );
        }
        if config.drop_req_permille > 1000 {
            return logged_err!(
                "invalid config.drop_req_permille '{}'",
                config.drop_req_permille
            );
        }
        if config.drop_reply_permille > 1000 {
            return logged_err!(
                "invalid config.drop_reply_permille '{}'",
                config.drop_reply_permille
            );
        }
        Ok(config)
    }
}

/// Everything guarded by the server's single lock.
#[derive(Debug)]
pub(crate) struct ReplicaState {
    /// Latest view adopted from the view authority.
    view: View,

    /// As primary, do I believe my backup holds the same state as me?
    is_sync: bool,

    /// Key-value store.
    store: KvStore,

    /// Request ID -> record table for duplicate suppression.
    table: RequestTable,
}

impl ReplicaState {
    fn new() -> Self {
        ReplicaState {
            view: View::default(),
            is_sync: true,
            store: KvStore::new(),
            table: RequestTable::new(),
        }
    }

    /// A client-originated call needs me to be primary; a forwarded call
    /// needs me to be backup.
    fn role_admits(&self, me: &str, forward: bool) -> bool {
        if forward {
            self.view.is_primary(me)
        } else {
            self.view.is_backup(me)
        }
    }
}

/// Replica core shared among the listener's servant tasks and the ticker.
pub(crate) struct PbReplica {
    /// My server identity, i.e., my listening address.
    me: ServerName,

    /// Configuration parameters struct.
    config: ReplicaConfig,

    /// View authority stub.
    view_service: Arc<dyn ViewService>,

    /// The single lock serializing request handling and view polling.
    state: Mutex<ReplicaState>,

    /// Set once killed.
    dead: AtomicBool,

    /// Simulated network unreliability switch.
    unreliable: AtomicBool,
}

impl PbReplica {
    fn new(
        me: ServerName,
        config: ReplicaConfig,
        view_service: Arc<dyn ViewService>,
    ) -> Self {
        PbReplica {
            me,
            config,
            view_service,
            state: Mutex::new(ReplicaState::new()),
            dead: AtomicBool::new(false),
            unreliable: AtomicBool::new(false),
        }
    }

    #[inline]
    fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.config.rpc_timeout_ms)
    }

    #[inline]
    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    #[inline]
    fn is_unreliable(&self) -> bool {
        self.unreliable.load(Ordering::SeqCst)
    }
}

/// Handle to a running replica server.
pub struct PbServer {
    /// Shared replica core.
    replica: Arc<PbReplica>,

    /// Join handle of the connection acceptor thread.
    acceptor_handle: Option<JoinHandle<()>>,

    /// Join handle of the view ticker thread.
    ticker_handle: Option<JoinHandle<()>>,
}

impl PbServer {
    /// Binds a listener on `bind_addr`, takes its local address as my server
    /// identity, and spawns the connection acceptor thread and the view
    /// ticker thread. Must be called within a tokio runtime.
    pub async fn new_and_setup(
        bind_addr: SocketAddr,
        view_service: Arc<dyn ViewService>,
        config_str: Option<&str>,
    ) -> Result<Self, PbkvError> {
        let config = ReplicaConfig::parse(config_str)?;

        let listener = TcpListener::bind(bind_addr).await?;
        let me: ServerName = listener.local_addr()?.to_string();
        pf_info!(me; "listening on '{}'", me);

        let replica = Arc::new(PbReplica::new(me, config, view_service));

        let acceptor_handle = tokio::spawn(PbReplica::acceptor_thread(
            replica.clone(),
            listener,
        ));
        let ticker_handle =
            tokio::spawn(PbReplica::ticker_thread(replica.clone()));

        Ok(PbServer {
            replica,
            acceptor_handle: Some(acceptor_handle),
            ticker_handle: Some(ticker_handle),
        })
    }

    /// My server identity.
    pub fn me(&self) -> &str {
        &self.replica.me
    }

    /// Runs one view poll step right now, exactly as the ticker would.
    pub async fn tick(&self) {
        self.replica.tick().await;
    }

    /// Shuts the server down: stops accepting connections and polling.
    pub fn kill(&mut self) {
        self.replica.dead.store(true, Ordering::SeqCst);
        if let Some(handle) = self.acceptor_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.ticker_handle.take() {
            handle.abort();
        }
        pf_info!(self.replica.me; "killed");
    }

    pub fn is_dead(&self) -> bool {
        self.replica.is_dead()
    }

    /// Turns simulated request/reply dropping on or off.
    pub fn set_unreliable(&self, unreliable: bool) {
        self.replica.unreliable.store(unreliable, Ordering::SeqCst);
    }

    pub fn is_unreliable(&self) -> bool {
        self.replica.is_unreliable()
    }

    /// Currently adopted view.
    pub async fn view(&self) -> View {
        self.replica.state.lock().await.view.clone()
    }

    /// Current value of the sync flag.
    pub async fn is_sync(&self) -> bool {
        self.replica.state.lock().await.is_sync
    }

    /// Copy of the key-value store.
    pub async fn store_snapshot(&self) -> KvSnapshot {
        self.replica.state.lock().await.store.snapshot()
    }

    /// Copy of the request record table.
    pub async fn table_snapshot(&self) -> TableSnapshot {
        self.replica.state.lock().await.table.snapshot()
    }
}

impl Drop for PbServer {
    fn drop(&mut self) {
        if !self.is_dead() {
            self.kill();
        }
    }
}
