//! Poll scheduler, cache and resync working together, with scripted
//! protocol clients and a recording presentation sink.

use async_trait::async_trait;
use governor::Quota;
use gsmon::models::server::{MonitoredServer, QueryResult, ServerKey, ServerStatus};
use gsmon::protocols::{ProtocolRegistry, QueryClient, QueryError};
use gsmon::resync::{ResyncController, ResyncWorker, SyncState, Trigger};
use gsmon::scheduler::{Cadence, CycleReport, PollScheduler, TickOutcome};
use gsmon::sink::{PresentationSink, Presenter, RenderHandle, ServerView, SinkError};
use gsmon::storage::memory::ServerCache;
use gsmon::storage::servers::ServerList;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const INTERVAL: Duration = Duration::from_secs(5);

static NEXT_HARNESS: AtomicUsize = AtomicUsize::new(0);

/// Answers from a per-port script instead of the network.
#[derive(Default)]
struct ScriptedClient {
    answers: SyncMutex<HashMap<u16, Result<QueryResult, QueryError>>>,
    delays: SyncMutex<HashMap<u16, Duration>>,
}

impl ScriptedClient {
    fn set(&self, port: u16, answer: Result<QueryResult, QueryError>) {
        self.answers.lock().insert(port, answer);
    }

    /// Makes `port` take `delay` before answering, ignoring the query timeout.
    fn stall(&self, port: u16, delay: Duration) {
        self.delays.lock().insert(port, delay);
    }
}

#[async_trait]
impl QueryClient for ScriptedClient {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    async fn query(&self, _addr: &str, port: u16, _timeout: Duration) -> Result<QueryResult, QueryError> {
        let delay = self.delays.lock().get(&port).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.answers
            .lock()
            .get(&port)
            .cloned()
            .unwrap_or(Err(QueryError::Timeout))
    }
}

#[derive(Default)]
struct RecordingSink {
    failing: AtomicBool,
    next_id: AtomicU64,
    posts: SyncMutex<Vec<ServerView>>,
    edits: SyncMutex<Vec<(RenderHandle, ServerView)>>,
    deletes: SyncMutex<Vec<RenderHandle>>,
}

impl RecordingSink {
    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SinkError::EditFailed("message deleted".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PresentationSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn post(&self, _target: u64, view: &ServerView) -> Result<RenderHandle, SinkError> {
        self.check()?;
        self.posts.lock().push(view.clone());
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst).to_string())
    }

    async fn edit(&self, handle: &RenderHandle, view: &ServerView) -> Result<(), SinkError> {
        self.check()?;
        self.edits.lock().push((handle.clone(), view.clone()));
        Ok(())
    }

    async fn delete(&self, handle: &RenderHandle) -> Result<(), SinkError> {
        self.deletes.lock().push(handle.clone());
        Ok(())
    }
}

fn server(port: u16, protocol: &str) -> MonitoredServer {
    MonitoredServer {
        protocol: protocol.to_string(),
        game: "ut3".to_string(),
        addr: "127.0.0.1".to_string(),
        port,
        target: 1000 + u64::from(port),
        custom: None,
        country: None,
    }
}

fn online(players: u32, max_players: u32, bots: u32) -> Result<QueryResult, QueryError> {
    Ok(QueryResult {
        name: "Deck Party".to_string(),
        map: "DM-Deck".to_string(),
        game: "UT3".to_string(),
        players,
        max_players,
        bots,
        addr: "127.0.0.1".to_string(),
        port: 7777,
        ..QueryResult::default()
    })
}

struct Harness {
    client: Arc<ScriptedClient>,
    sink: Arc<RecordingSink>,
    cache: Arc<ServerCache>,
    controller: Arc<ResyncController>,
    presenter: Arc<Mutex<Presenter>>,
    servers: Arc<ServerList>,
    scheduler: PollScheduler,
    start: Instant,
}

impl Harness {
    fn new(servers: Vec<MonitoredServer>) -> Self {
        let client = Arc::new(ScriptedClient::default());
        let mut registry = ProtocolRegistry::new();
        registry.register("Scripted", Arc::clone(&client) as Arc<dyn QueryClient>);

        let sink = Arc::new(RecordingSink::default());
        let quota = Quota::per_second(NonZeroU32::new(10_000).unwrap());
        let presenter = Arc::new(Mutex::new(Presenter::new(
            Arc::clone(&sink) as Arc<dyn PresentationSink>,
            quota,
        )));

        let cache = Arc::new(ServerCache::new());
        let controller = Arc::new(ResyncController::new(10));
        let path = std::env::temp_dir().join(format!(
            "gsmon-harness-{}-{}.json",
            std::process::id(),
            NEXT_HARNESS.fetch_add(1, Ordering::SeqCst)
        ));
        let servers = Arc::new(ServerList::with_servers(path, servers));

        let scheduler = PollScheduler::new(
            Cadence::new(INTERVAL, INTERVAL),
            Duration::from_millis(250),
            Arc::new(registry),
            Arc::clone(&cache),
            Arc::clone(&servers),
            Arc::clone(&presenter),
            Arc::clone(&controller),
        );

        Self {
            client,
            sink,
            cache,
            controller,
            presenter,
            servers,
            scheduler,
            start: Instant::now(),
        }
    }

    fn at(&self, secs: u64) -> Instant {
        self.start + Duration::from_secs(secs)
    }

    fn worker(&self) -> ResyncWorker {
        ResyncWorker::new(
            Arc::clone(&self.controller),
            Arc::clone(&self.presenter),
            Arc::clone(&self.cache),
            Arc::clone(&self.servers),
        )
    }

    async fn tick(&mut self, secs: u64) -> TickOutcome {
        let now = self.at(secs);
        self.scheduler.tick(now).await
    }

    async fn polled(&mut self, secs: u64) -> CycleReport {
        match self.tick(secs).await {
            TickOutcome::Polled(report) => report,
            other => panic!("expected a poll cycle at {}s, got {:?}", secs, other),
        }
    }
}

/// POLLING AND CHANGE DETECTION
mod polling_tests {
    use super::*;

    #[tokio::test]
    async fn first_cycle_posts_and_unchanged_cycles_stay_quiet() {
        let mut h = Harness::new(vec![server(1, "Scripted"), server(2, "Scripted")]);
        h.client.set(1, online(20, 32, 2));
        h.client.set(2, online(3, 16, 0));

        let report = h.polled(0).await;
        assert_eq!(report, CycleReport { queried: 2, online: 2, updated: 2, failed: 0 });
        assert_eq!(h.sink.posts.lock().len(), 2);

        assert_eq!(h.tick(1).await, TickOutcome::NotDue);

        let report = h.polled(5).await;
        assert_eq!(report.updated, 0);
        assert!(h.sink.edits.lock().is_empty());

        h.client.set(2, online(4, 16, 0));
        let report = h.polled(10).await;
        assert_eq!(report.updated, 1);
        let edits = h.sink.edits.lock();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].1.players, "4/16");
    }

    #[tokio::test]
    async fn offline_server_shows_zero_players() {
        let mut h = Harness::new(vec![server(1, "Scripted")]);
        h.client.set(1, online(20, 32, 2));
        h.polled(0).await;
        assert_eq!(h.sink.posts.lock()[0].players, "20 (2)/32");

        h.client.set(1, Err(QueryError::Timeout));
        let report = h.polled(5).await;
        assert_eq!(report.online, 0);
        assert_eq!(report.updated, 1);

        let edits = h.sink.edits.lock();
        assert_eq!(edits[0].1.players, "0/32");
        assert_eq!(edits[0].1.status, Some(ServerStatus::Offline));
        assert_eq!(edits[0].1.title, "Deck Party");
    }

    #[tokio::test]
    async fn unknown_protocol_is_stored_offline() {
        let mut h = Harness::new(vec![server(1, "Quake3"), server(2, "Scripted")]);
        h.client.set(2, online(1, 8, 0));

        let report = h.polled(0).await;
        assert_eq!(report.queried, 2);
        assert_eq!(report.online, 1);

        let entry = h.cache.get_snapshot(&ServerKey::new("127.0.0.1", 1)).unwrap();
        assert_eq!(entry.status, ServerStatus::Offline);
        assert!(entry.last_error.unwrap().contains("Quake3"));
        assert!(h.sink.posts.lock().iter().any(|view| view.status.is_none()));
    }

    #[tokio::test]
    async fn overrun_does_not_fire_twice() {
        let mut h = Harness::new(vec![server(1, "Scripted")]);
        h.client.set(1, online(1, 8, 0));

        h.polled(0).await;
        // A tick arriving long after several missed periods runs one cycle only.
        h.polled(23).await;
        assert_eq!(h.tick(24).await, TickOutcome::NotDue);
        assert_eq!(h.scheduler.cadence().next_due(), Some(h.at(25)));
    }

    #[tokio::test]
    async fn slow_servers_do_not_hold_up_the_others() {
        let mut h = Harness::new((1..=4).map(|port| server(port, "Scripted")).collect());
        for port in 1..=4 {
            h.client.set(port, online(port.into(), 8, 0));
        }
        // Three servers answer slowly but within the cycle's limit, one never does.
        for port in 1..=3 {
            h.client.stall(port, Duration::from_millis(300));
        }
        h.client.stall(4, Duration::from_secs(30));

        let started = Instant::now();
        let report = h.polled(0).await;
        let elapsed = started.elapsed();

        // One after another this would take at least 900ms plus the hung server.
        assert!(elapsed < Duration::from_millis(800), "cycle took {:?}", elapsed);
        assert_eq!(report, CycleReport { queried: 4, online: 3, updated: 4, failed: 0 });

        for port in 1..=3 {
            let entry = h.cache.get_snapshot(&ServerKey::new("127.0.0.1", port)).unwrap();
            assert_eq!(entry.status, ServerStatus::Online);
        }
        let hung = h.cache.get_snapshot(&ServerKey::new("127.0.0.1", 4)).unwrap();
        assert_eq!(hung.status, ServerStatus::Offline);
        assert_eq!(hung.last_error.as_deref(), Some("Timed out waiting for a response"));
        assert_eq!(h.sink.posts.lock().len(), 4);
    }

    #[tokio::test]
    async fn removed_servers_leave_the_cache() {
        let mut h = Harness::new(vec![server(1, "Scripted"), server(2, "Scripted")]);
        h.client.set(1, online(1, 8, 0));
        h.client.set(2, online(1, 8, 0));
        h.polled(0).await;
        assert_eq!(h.cache.len(), 2);

        h.servers.remove(1).unwrap();
        h.polled(5).await;
        assert_eq!(h.cache.len(), 1);
    }
}

/// RESYNC POLICY
mod resync_tests {
    use super::*;

    fn ten_servers() -> Vec<MonitoredServer> {
        (1..=10).map(|port| server(port, "Scripted")).collect()
    }

    #[tokio::test]
    async fn ten_failed_updates_trigger_resync_and_suspend_polling() {
        let mut h = Harness::new(ten_servers());
        for port in 1..=10 {
            h.client.set(port, online(1, 8, 0));
        }
        h.sink.fail(true);

        let report = h.polled(0).await;
        assert_eq!(report.failed, 10);
        assert_eq!(h.controller.state(), SyncState::Resyncing(Trigger::FailureThreshold));
        assert_eq!(h.tick(5).await, TickOutcome::Suspended);

        h.sink.fail(false);
        let rendered = h.worker().resync(Trigger::FailureThreshold).await;
        assert_eq!(rendered, 10);
        assert_eq!(h.controller.failures(), 0);
        assert_eq!(h.controller.state(), SyncState::Idle);
        assert_eq!(h.sink.posts.lock().len(), 10);

        // Everything was rendered by the rebuild, nothing left to update.
        let report = h.polled(10).await;
        assert_eq!(report.updated, 0);
    }

    #[tokio::test]
    async fn resync_discards_previous_views() {
        let mut h = Harness::new(vec![server(1, "Scripted"), server(2, "Scripted")]);
        h.client.set(1, online(1, 8, 0));
        h.client.set(2, online(2, 8, 0));
        h.polled(0).await;

        assert!(h.controller.request(Trigger::Admin));
        assert!(!h.controller.request(Trigger::Admin));
        h.worker().resync(Trigger::Admin).await;

        let mut deleted = h.sink.deletes.lock().clone();
        deleted.sort();
        assert_eq!(deleted, vec!["0".to_string(), "1".to_string()]);
        assert_eq!(h.sink.posts.lock().len(), 4);
        assert_eq!(h.presenter.lock().await.handles(), 2);
    }

    #[tokio::test]
    async fn worker_task_completes_requested_resync() {
        let mut h = Harness::new(vec![server(1, "Scripted")]);
        h.client.set(1, online(1, 8, 0));
        h.polled(0).await;

        let mut state = h.controller.subscribe();
        tokio::spawn(h.worker().run());

        assert!(h.controller.request(Trigger::Admin));
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == SyncState::Idle))
            .await
            .expect("resync did not finish")
            .unwrap();

        assert_eq!(h.sink.deletes.lock().len(), 1);
        assert!(matches!(h.polled(5).await, CycleReport { updated: 0, .. }));
    }

    #[tokio::test]
    async fn failures_below_threshold_keep_polling() {
        let mut h = Harness::new((1..=9).map(|port| server(port, "Scripted")).collect());
        for port in 1..=9 {
            h.client.set(port, online(1, 8, 0));
        }
        h.sink.fail(true);

        let report = h.polled(0).await;
        assert_eq!(report.failed, 9);
        assert!(!h.controller.is_resyncing());

        // Unrendered servers are retried on the next cycle.
        h.sink.fail(false);
        let report = h.polled(5).await;
        assert_eq!(report.updated, 9);
        assert_eq!(h.controller.failures(), 9);
    }
}
