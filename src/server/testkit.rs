//! Test helpers: a scripted in-process view authority, and end-to-end
//! scenarios over real local sockets.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::server::{PbServer, View, ViewNum, ViewService};
use crate::utils::PbkvError;

use async_trait::async_trait;

/// View authority whose answers are set by the test. Every `assign()` bumps
/// the view number.
pub(crate) struct TestViewService {
    view: Mutex<View>,
    failing: AtomicBool,
}

impl TestViewService {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(TestViewService {
            view: Mutex::new(View::default()),
            failing: AtomicBool::new(false),
        })
    }

    /// Moves to the next view with given roles; returns it.
    pub(crate) fn assign(
        &self,
        primary: Option<&str>,
        backup: Option<&str>,
    ) -> View {
        let mut view = self.view.lock().unwrap();
        *view = View::new(
            view.viewnum + 1,
            primary.map(String::from),
            backup.map(String::from),
        );
        view.clone()
    }

    /// Answers with exactly `view` from now on.
    pub(crate) fn set_view(&self, view: View) {
        *self.view.lock().unwrap() = view;
    }

    /// Makes pings fail (or succeed again).
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ViewService for TestViewService {
    async fn ping(
        &self,
        _me: &str,
        _viewnum: ViewNum,
    ) -> Result<View, PbkvError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PbkvError::msg("view service unreachable"));
        }
        let view = self.view.lock().unwrap().clone();
        Ok(view)
    }
}

/// Starts a server on a free local port. The background ticker is parked on
/// a very long interval so tests drive every tick themselves.
pub(crate) async fn start_server(
    vs: &Arc<TestViewService>,
    extra_config: &str,
) -> Result<PbServer, PbkvError> {
    start_ticking_server(vs, 3600000, extra_config).await
}

/// Starts a server on a free local port whose background ticker polls every
/// `tick_interval_ms`.
pub(crate) async fn start_ticking_server(
    vs: &Arc<TestViewService>,
    tick_interval_ms: u64,
    extra_config: &str,
) -> Result<PbServer, PbkvError> {
    let config = format!(
        "tick_interval_ms = {}\nrpc_timeout_ms = 500\n{}",
        tick_interval_ms, extra_config
    );
    PbServer::new_and_setup("127.0.0.1:0".parse()?, vs.clone(), Some(&config))
        .await
}

#[cfg(test)]
mod scenario_tests {
    use super::*;
    use crate::client::ClientApiStub;
    use crate::server::{
        GetReply, KvSnapshot, PutAppendArgs, RequestRecord, Status, WriteOp,
    };
    use tokio::time::{self, Duration, Instant};

    fn stub() -> ClientApiStub {
        ClientApiStub::new(Duration::from_secs(2))
    }

    fn kv(pairs: &[(&str, &str)]) -> KvSnapshot {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Brings up P as primary holding `a = x`, then B as its synced backup.
    async fn primary_with_backup(
        vs: &Arc<TestViewService>,
        backup_config: &str,
    ) -> Result<(PbServer, PbServer), PbkvError> {
        let p = start_server(vs, "").await?;
        let b = start_server(vs, backup_config).await?;
        vs.assign(Some(p.me()), None);
        p.tick().await;
        stub().put(p.me(), 1, "a", "x").await?;
        vs.assign(Some(p.me()), Some(b.me()));
        p.tick().await;
        b.tick().await;
        Ok((p, b))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn new_backup_gets_full_state() -> Result<(), PbkvError> {
        let vs = TestViewService::new();
        let p = start_server(&vs, "").await?;
        let b = start_server(&vs, "").await?;
        let stub = stub();

        vs.assign(Some(p.me()), None);
        p.tick().await;
        assert_eq!(stub.put(p.me(), 1, "a", "x").await?.status, Status::Ok);
        assert_eq!(
            stub.get(p.me(), 2, "a").await?,
            GetReply {
                status: Status::Ok,
                value: "x".into()
            }
        );

        // assigning a backup makes the next tick push everything
        vs.assign(Some(p.me()), Some(b.me()));
        p.tick().await;
        assert!(p.is_sync().await);
        assert_eq!(b.store_snapshot().await, kv(&[("a", "x")]));
        assert_eq!(b.table_snapshot().await, p.table_snapshot().await);

        // once the backup knows its role, appends flow through to it
        b.tick().await;
        assert!(b.view().await.is_backup(b.me()));
        assert_eq!(stub.append(p.me(), 3, "a", "y").await?.status, Status::Ok);
        assert_eq!(p.store_snapshot().await, kv(&[("a", "xy")]));
        assert_eq!(b.store_snapshot().await, kv(&[("a", "xy")]));
        assert!(p.is_sync().await);

        // clients must not talk to the backup directly
        assert_eq!(
            stub.get(b.me(), 4, "a").await?.status,
            Status::WrongServer
        );
        assert_eq!(
            stub.put(b.me(), 5, "a", "q").await?.status,
            Status::WrongServer
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_forward_repaired_by_tick() -> Result<(), PbkvError> {
        let vs = TestViewService::new();
        let (p, b) = primary_with_backup(
            &vs,
            "drop_req_permille = 1000\ndrop_reply_permille = 0",
        )
        .await?;
        assert!(p.is_sync().await);

        // backup swallows every request: the client still succeeds
        b.set_unreliable(true);
        let reply = stub().put(p.me(), 10, "k", "v").await?;
        assert_eq!(reply.status, Status::Ok);
        assert!(!p.is_sync().await);
        assert!(!b.store_snapshot().await.contains_key("k"));

        // a successful forward alone does not repair the flag
        b.set_unreliable(false);
        stub().append(p.me(), 11, "a", "z").await?;
        assert!(!p.is_sync().await);

        // the next tick re-pushes full state
        p.tick().await;
        assert!(p.is_sync().await);
        assert_eq!(b.store_snapshot().await, p.store_snapshot().await);
        assert_eq!(b.table_snapshot().await, p.table_snapshot().await);
        assert_eq!(b.store_snapshot().await, kv(&[("a", "xz"), ("k", "v")]));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn retry_after_lost_reply() -> Result<(), PbkvError> {
        let vs = TestViewService::new();
        let p = start_server(
            &vs,
            "drop_req_permille = 0\ndrop_reply_permille = 1000",
        )
        .await?;
        let b = start_server(&vs, "").await?;
        vs.assign(Some(p.me()), Some(b.me()));
        p.tick().await;
        b.tick().await;

        // applied and forwarded, but the reply never arrives
        p.set_unreliable(true);
        assert!(stub().append(p.me(), 20, "a", "x").await.is_err());

        // the retry under the same ID must not append twice
        p.set_unreliable(false);
        let reply = stub().append(p.me(), 20, "a", "x").await?;
        assert_eq!(reply.status, Status::Ok);
        assert_eq!(reply.value, "x");
        assert_eq!(p.store_snapshot().await, kv(&[("a", "x")]));
        assert_eq!(b.store_snapshot().await, kv(&[("a", "x")]));
        assert!(p.is_sync().await);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn diverged_backup_read() -> Result<(), PbkvError> {
        let vs = TestViewService::new();
        let (p, b) = primary_with_backup(&vs, "").await?;

        // sneak a write into the backup behind the primary's back
        b.replica
            .handle_put_append(PutAppendArgs {
                id: 99,
                key: "a".into(),
                value: "zzz".into(),
                op: WriteOp::Put,
                forward: false,
            })
            .await;

        // the client still gets the primary's answer
        let reply = stub().get(p.me(), 30, "a").await?;
        assert_eq!(reply.value, "x");
        assert_eq!(reply.status, Status::Ok);
        assert!(!p.is_sync().await);

        p.tick().await;
        assert!(p.is_sync().await);
        assert_eq!(b.store_snapshot().await, kv(&[("a", "x")]));
        assert!(!b.table_snapshot().await.contains_key(&99));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_primary_steps_down() -> Result<(), PbkvError> {
        let vs = TestViewService::new();
        let (p, b) = primary_with_backup(&vs, "").await?;

        // authority promotes B; P has not heard yet
        vs.assign(Some(b.me()), None);
        b.tick().await;

        // P still serves, but B refuses its forward
        let reply = stub().put(p.me(), 40, "a", "old").await?;
        assert_eq!(reply.status, Status::Ok);
        assert!(!p.is_sync().await);
        assert_eq!(b.store_snapshot().await, kv(&[("a", "x")]));

        // after polling P knows better and leaves B's state alone
        p.tick().await;
        assert!(!p.view().await.is_primary(p.me()));
        assert_eq!(
            stub().put(p.me(), 41, "a", "older").await?.status,
            Status::WrongServer
        );
        let reply = stub().get(b.me(), 42, "a").await?;
        assert_eq!(reply.value, "x");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dead_backup_keeps_unsynced() -> Result<(), PbkvError> {
        let vs = TestViewService::new();
        let (p, mut b) = primary_with_backup(&vs, "").await?;

        b.kill();
        assert!(b.is_dead());
        let reply = stub().append(p.me(), 50, "a", "y").await?;
        assert_eq!(reply.status, Status::Ok);
        assert_eq!(reply.value, "xy");
        assert!(!p.is_sync().await);

        p.tick().await;
        assert!(!p.is_sync().await);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_same_order() -> Result<(), PbkvError> {
        let vs = TestViewService::new();
        let (p, b) = primary_with_backup(&vs, "").await?;

        let mut handles = Vec::new();
        for i in 0..10u64 {
            let addr = p.me().to_string();
            handles.push(tokio::spawn(async move {
                stub().append(&addr, 100 + i, "c", &i.to_string()).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await??.status, Status::Ok);
        }

        let value = p.store_snapshot().await["c"].clone();
        assert_eq!(value.len(), 10);
        assert_eq!(b.store_snapshot().await, p.store_snapshot().await);
        assert!(p.is_sync().await);
        assert_eq!(
            b.table_snapshot().await.get(&105),
            Some(&RequestRecord::write(WriteOp::Append, "c", "5"))
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn background_ticker_syncs_new_backup() -> Result<(), PbkvError> {
        let vs = TestViewService::new();
        let p = start_ticking_server(&vs, 20, "").await?;
        let b = start_ticking_server(&vs, 20, "").await?;

        // no manual ticks anywhere: only the timers poll
        vs.assign(Some(p.me()), None);
        for _ in 0..100 {
            if p.view().await.is_primary(p.me()) {
                break;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
        assert!(p.view().await.is_primary(p.me()));
        assert_eq!(stub().put(p.me(), 1, "a", "x").await?.status, Status::Ok);

        vs.assign(Some(p.me()), Some(b.me()));
        for _ in 0..100 {
            if p.is_sync().await
                && b.store_snapshot().await.contains_key("a")
                && b.view().await.is_backup(b.me())
            {
                break;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
        assert!(p.is_sync().await);
        assert_eq!(b.store_snapshot().await, kv(&[("a", "x")]));
        assert_eq!(b.table_snapshot().await, p.table_snapshot().await);

        // and writes keep flowing to the timer-installed backup
        stub().append(p.me(), 2, "a", "y").await?;
        assert_eq!(b.store_snapshot().await, kv(&[("a", "xy")]));
        assert!(p.is_sync().await);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn replaced_backup_gets_full_state() -> Result<(), PbkvError> {
        let vs = TestViewService::new();
        let (p, b) = primary_with_backup(&vs, "").await?;
        stub().put(p.me(), 60, "k", "v").await?;
        assert!(p.is_sync().await);
        assert_eq!(b.store_snapshot().await, kv(&[("a", "x"), ("k", "v")]));

        // C replaces B but swallows requests at first
        let c = start_server(
            &vs,
            "drop_req_permille = 1000\ndrop_reply_permille = 0",
        )
        .await?;
        c.set_unreliable(true);
        vs.assign(Some(p.me()), Some(c.me()));
        p.tick().await;
        assert!(!p.is_sync().await);
        assert_eq!(p.view().await.backup.as_deref(), Some(c.me()));
        assert!(c.store_snapshot().await.is_empty());

        // once C is reachable the next tick pushes everything
        c.set_unreliable(false);
        p.tick().await;
        assert!(p.is_sync().await);
        assert_eq!(c.store_snapshot().await, p.store_snapshot().await);
        assert_eq!(c.table_snapshot().await, p.table_snapshot().await);

        c.tick().await;
        stub().append(p.me(), 61, "k", "w").await?;
        assert_eq!(c.store_snapshot().await["k"], "vw");
        assert!(p.is_sync().await);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn mutual_forward_stall_is_bounded() -> Result<(), PbkvError> {
        let vs = TestViewService::new();
        let p = start_server(&vs, "").await?;
        let b = start_server(&vs, "").await?;

        // each believes it is primary with the other as backup
        let (pn, bn) = (p.me().to_string(), b.me().to_string());
        p.replica.state.lock().await.view =
            View::new(1, Some(pn.clone()), Some(bn.clone()));
        b.replica.state.lock().await.view =
            View::new(2, Some(bn.clone()), Some(pn.clone()));

        let (stub_p, stub_b) = (stub(), stub());
        let start = Instant::now();
        let (reply_p, reply_b) = tokio::join!(
            stub_p.put(&pn, 70, "a", "from-p"),
            stub_b.put(&bn, 71, "a", "from-b"),
        );
        let elapsed = start.elapsed();

        assert_eq!(reply_p?.status, Status::Ok);
        assert_eq!(reply_b?.status, Status::Ok);
        assert!(elapsed < Duration::from_millis(1500));
        assert!(!p.is_sync().await);
        assert!(!b.is_sync().await);
        assert_eq!(p.store_snapshot().await, kv(&[("a", "from-p")]));
        assert_eq!(b.store_snapshot().await, kv(&[("a", "from-b")]));
        Ok(())
    }
}
