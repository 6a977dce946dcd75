//! Lane manager — priority- and concurrency-bounded work scheduling.
//!
//! Each lane is a named FIFO queue with a concurrency cap and its own
//! worker set; lanes never share workers, so cross-lane starvation is
//! impossible by construction. Admission derives a child cancellation
//! token from the caller's; `cancel_active` cancels exactly the tokens
//! that are executing at call time and leaves the queue alone.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use nebo_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lane names
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The named execution lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// User chat and owner-originated messages. cap=1 so turns serialize;
    /// the UI merges streamed output in order.
    Main,
    /// Periodic proactive ticks.
    Heartbeat,
    /// Scheduled jobs and reminders.
    Events,
    /// External-agent DMs and channel traffic.
    Comm,
    /// Orchestrated sub-tasks. Unbounded.
    Subagent,
    /// Tool-spawned nested calls.
    Nested,
    /// GUI-exclusive operations (mouse, windows). cap=1 so inputs do not
    /// interleave.
    Desktop,
    /// Developer-tooling sessions.
    Dev,
}

impl Lane {
    pub const ALL: [Lane; 8] = [
        Lane::Main,
        Lane::Heartbeat,
        Lane::Events,
        Lane::Comm,
        Lane::Subagent,
        Lane::Nested,
        Lane::Desktop,
        Lane::Dev,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Main => "main",
            Lane::Heartbeat => "heartbeat",
            Lane::Events => "events",
            Lane::Comm => "comm",
            Lane::Subagent => "subagent",
            Lane::Nested => "nested",
            Lane::Desktop => "desktop",
            Lane::Dev => "dev",
        }
    }

    pub fn parse(s: &str) -> Result<Lane> {
        Lane::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| Error::UnknownLane(s.to_owned()))
    }

    /// Default concurrency cap. 0 = unbounded.
    pub fn default_cap(self) -> usize {
        match self {
            Lane::Main => 1,
            Lane::Heartbeat => 1,
            Lane::Events => 2,
            Lane::Comm => 5,
            Lane::Subagent => 0,
            Lane::Nested => 3,
            Lane::Desktop => 1,
            Lane::Dev => 1,
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events & stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneEventKind {
    Enqueued,
    Started,
    Completed,
    Cancelled,
    Errored,
}

/// An observable lane transition, delivered synchronously to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct LaneEvent {
    pub kind: LaneEventKind,
    pub lane: Lane,
    pub task_id: u64,
    pub description: String,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Observational snapshot of one lane.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LaneStats {
    pub active: usize,
    pub queued: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Work & options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A unit of lane work. Receives the task's cancellation token; blocking
/// awaits inside must observe it.
pub type LaneWork = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send>;

/// Enqueue options.
#[derive(Default)]
pub struct EnqueueOptions {
    pub description: String,
    /// Parent cancellation token; the task runs on a child of it.
    pub parent: Option<CancellationToken>,
}

impl EnqueueOptions {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct QueuedTask {
    id: u64,
    description: String,
    work: LaneWork,
    token: CancellationToken,
    done: Option<oneshot::Sender<Result<()>>>,
}

struct ActiveTask {
    description: String,
    token: CancellationToken,
}

struct LaneSlot {
    cap: usize,
    queue: VecDeque<QueuedTask>,
    active: HashMap<u64, ActiveTask>,
}

impl LaneSlot {
    fn admissible(&self) -> bool {
        self.cap == 0 || self.active.len() < self.cap
    }
}

type Subscriber = Arc<dyn Fn(&LaneEvent) + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lane manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LaneManager {
    slots: HashMap<Lane, Arc<Mutex<LaneSlot>>>,
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_task_id: AtomicU64,
}

impl LaneManager {
    /// Build the manager with default caps, then apply config overrides
    /// keyed by lane name.
    pub fn new(cap_overrides: &BTreeMap<String, usize>) -> Arc<Self> {
        let mut slots = HashMap::new();
        for lane in Lane::ALL {
            let cap = cap_overrides
                .get(lane.as_str())
                .copied()
                .unwrap_or_else(|| lane.default_cap());
            slots.insert(
                lane,
                Arc::new(Mutex::new(LaneSlot {
                    cap,
                    queue: VecDeque::new(),
                    active: HashMap::new(),
                })),
            );
        }
        Arc::new(Self {
            slots,
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_task_id: AtomicU64::new(1),
        })
    }

    /// Register an event sink. Called synchronously at every transition;
    /// keep it cheap.
    pub fn subscribe(&self, f: impl Fn(&LaneEvent) + Send + Sync + 'static) {
        self.subscribers.write().push(Arc::new(f));
    }

    /// Enqueue and wait for the work to finish. The work's error (or
    /// cancellation of the parent token) is propagated.
    pub async fn enqueue(
        self: &Arc<Self>,
        lane: Lane,
        opts: EnqueueOptions,
        work: LaneWork,
    ) -> Result<()> {
        let parent = opts.parent.clone();
        let (tx, rx) = oneshot::channel();
        self.admit(lane, opts, work, Some(tx));

        match parent {
            Some(parent) => tokio::select! {
                result = rx => result.unwrap_or(Err(Error::Cancelled)),
                _ = parent.cancelled() => Err(Error::Cancelled),
            },
            None => rx.await.unwrap_or(Err(Error::Cancelled)),
        }
    }

    /// Fire-and-forget enqueue: returns once the task is admitted or
    /// queued. Work errors surface only through lane events.
    pub fn enqueue_async(self: &Arc<Self>, lane: Lane, opts: EnqueueOptions, work: LaneWork) {
        self.admit(lane, opts, work, None);
    }

    /// Adjust a lane's cap at runtime. Raising the cap drains the queue;
    /// lowering it below the active count only gates future admissions.
    pub fn set_concurrency(self: &Arc<Self>, lane: Lane, cap: usize) {
        let slot = &self.slots[&lane];
        let to_start = {
            let mut slot = slot.lock();
            slot.cap = cap;
            self.drain_admissible(&mut slot)
        };
        for task in to_start {
            self.spawn_task(lane, task);
        }
    }

    /// Cancel the tokens of currently executing tasks on a lane. Queued
    /// tasks are untouched. Returns the count cancelled.
    pub fn cancel_active(&self, lane: Lane) -> usize {
        let slot = self.slots[&lane].lock();
        for task in slot.active.values() {
            task.token.cancel();
        }
        let count = slot.active.len();
        tracing::debug!(lane = %lane, count, "cancelled active lane tasks");
        count
    }

    /// Drop queued (not yet started) tasks. Returns the count dropped.
    ///
    /// Not used by the Main hot path: run frames arrive on independent
    /// handler tasks, so clearing races with in-flight enqueues and the
    /// upstream UI keeps its own outstanding-message queue.
    pub fn clear_lane(&self, lane: Lane) -> usize {
        let dropped: Vec<QueuedTask> = {
            let mut slot = self.slots[&lane].lock();
            slot.queue.drain(..).collect()
        };
        let count = dropped.len();
        for mut task in dropped {
            task.token.cancel();
            self.emit(LaneEvent {
                kind: LaneEventKind::Cancelled,
                lane,
                task_id: task.id,
                description: task.description.clone(),
                at: Utc::now(),
                error: None,
            });
            if let Some(done) = task.done.take() {
                let _ = done.send(Err(Error::Cancelled));
            }
        }
        if count > 0 {
            tracing::debug!(lane = %lane, count, "cleared queued lane tasks");
        }
        count
    }

    /// Observational snapshot of every lane.
    pub fn stats(&self) -> BTreeMap<Lane, LaneStats> {
        let mut out = BTreeMap::new();
        for lane in Lane::ALL {
            let slot = self.slots[&lane].lock();
            out.insert(
                lane,
                LaneStats {
                    active: slot.active.len(),
                    queued: slot.queue.len(),
                },
            );
        }
        out
    }

    // ── internals ──────────────────────────────────────────────────

    fn admit(
        self: &Arc<Self>,
        lane: Lane,
        opts: EnqueueOptions,
        work: LaneWork,
        done: Option<oneshot::Sender<Result<()>>>,
    ) {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let token = match &opts.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let task = QueuedTask {
            id,
            description: opts.description,
            work,
            token,
            done,
        };

        self.emit(LaneEvent {
            kind: LaneEventKind::Enqueued,
            lane,
            task_id: id,
            description: task.description.clone(),
            at: Utc::now(),
            error: None,
        });

        let start_now = {
            let mut slot = self.slots[&lane].lock();
            if slot.admissible() {
                slot.active.insert(
                    task.id,
                    ActiveTask {
                        description: task.description.clone(),
                        token: task.token.clone(),
                    },
                );
                true
            } else {
                slot.queue.push_back(task);
                return;
            }
        };

        if start_now {
            self.spawn_task(lane, task);
        }
    }

    /// Admit queued tasks while the lane has headroom. Caller spawns the
    /// returned tasks outside the lock.
    fn drain_admissible(&self, slot: &mut LaneSlot) -> Vec<QueuedTask> {
        let mut out = Vec::new();
        while slot.admissible() {
            let Some(task) = slot.queue.pop_front() else {
                break;
            };
            slot.active.insert(
                task.id,
                ActiveTask {
                    description: task.description.clone(),
                    token: task.token.clone(),
                },
            );
            out.push(task);
        }
        out
    }

    fn spawn_task(self: &Arc<Self>, lane: Lane, mut task: QueuedTask) {
        let manager = Arc::clone(self);
        let id = task.id;
        let description = task.description.clone();
        let token = task.token.clone();
        let done = task.done.take();
        let work = task.work;

        tokio::spawn(async move {
            manager.emit(LaneEvent {
                kind: LaneEventKind::Started,
                lane,
                task_id: id,
                description: description.clone(),
                at: Utc::now(),
                error: None,
            });

            let result = work(token.clone()).await;

            // Remove from the active set and admit successors.
            let successors = {
                let mut slot = manager.slots[&lane].lock();
                slot.active.remove(&id);
                manager.drain_admissible(&mut slot)
            };
            for next in successors {
                manager.spawn_task(lane, next);
            }

            let kind = match &result {
                _ if token.is_cancelled() => LaneEventKind::Cancelled,
                Ok(()) => LaneEventKind::Completed,
                Err(_) => LaneEventKind::Errored,
            };
            manager.emit(LaneEvent {
                kind,
                lane,
                task_id: id,
                description,
                at: Utc::now(),
                error: result.as_ref().err().map(|e| e.to_string()),
            });

            if let Some(done) = done {
                let _ = done.send(result);
            }
        });
    }

    fn emit(&self, event: LaneEvent) {
        let subscribers = self.subscribers.read();
        for sub in subscribers.iter() {
            sub(&event);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn manager() -> Arc<LaneManager> {
        LaneManager::new(&BTreeMap::new())
    }

    fn manager_with(lane: &str, cap: usize) -> Arc<LaneManager> {
        let mut overrides = BTreeMap::new();
        overrides.insert(lane.to_owned(), cap);
        LaneManager::new(&overrides)
    }

    /// Work that sleeps until its token is cancelled or the timer fires.
    fn sleepy(ms: u64) -> LaneWork {
        Box::new(move |token: CancellationToken| {
            Box::pin(async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
                    _ = token.cancelled() => Err(Error::Cancelled),
                }
            })
        })
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn lane_parse_roundtrip() {
        for lane in Lane::ALL {
            assert_eq!(Lane::parse(lane.as_str()).unwrap(), lane);
        }
        assert!(matches!(Lane::parse("bogus"), Err(Error::UnknownLane(_))));
    }

    #[tokio::test]
    async fn cap_bounds_active_set() {
        let mgr = manager(); // Nested cap = 3
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let peak = peak.clone();
            let current = current.clone();
            let mgr2 = mgr.clone();
            handles.push(tokio::spawn(async move {
                mgr2.enqueue(
                    Lane::Nested,
                    EnqueueOptions::described("bounded"),
                    Box::new(move |_| {
                        Box::pin(async move {
                            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            current.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                    }),
                )
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3, "cap exceeded");
    }

    #[tokio::test]
    async fn fifo_within_single_worker_lane() {
        let mgr = manager(); // Main cap = 1
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            mgr.enqueue_async(
                Lane::Main,
                EnqueueOptions::described(format!("task-{i}")),
                Box::new(move |_| {
                    Box::pin(async move {
                        order.lock().push(i);
                        Ok(())
                    })
                }),
            );
        }

        wait_until(|| order.lock().len() == 5).await;
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn cancel_active_spares_the_queue() {
        let mgr = manager(); // Main cap = 1
        let second_ran = Arc::new(AtomicUsize::new(0));

        // First task runs until cancelled.
        mgr.enqueue_async(
            Lane::Main,
            EnqueueOptions::described("long"),
            sleepy(60_000),
        );
        wait_until(|| mgr.stats()[&Lane::Main].active == 1).await;

        // Second task waits in the queue.
        let ran = second_ran.clone();
        mgr.enqueue_async(
            Lane::Main,
            EnqueueOptions::described("queued"),
            Box::new(move |_| {
                Box::pin(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );
        assert_eq!(mgr.stats()[&Lane::Main].queued, 1);

        // Cancel cancels exactly the active set.
        assert_eq!(mgr.cancel_active(Lane::Main), 1);

        // The queued task is admitted after the cancelled one exits.
        wait_until(|| second_ran.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn zero_cap_is_unbounded() {
        let mgr = manager(); // Subagent cap = 0
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let current = current.clone();
            let peak = peak.clone();
            mgr.enqueue_async(
                Lane::Subagent,
                EnqueueOptions::described("parallel"),
                Box::new(move |_| {
                    Box::pin(async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            );
        }

        wait_until(|| peak.load(Ordering::SeqCst) == 8).await;
        assert_eq!(mgr.stats()[&Lane::Subagent].queued, 0);
    }

    #[tokio::test]
    async fn raising_cap_drains_queue() {
        let mgr = manager_with("comm", 1);
        for _ in 0..4 {
            mgr.enqueue_async(
                Lane::Comm,
                EnqueueOptions::described("held"),
                sleepy(60_000),
            );
        }
        wait_until(|| mgr.stats()[&Lane::Comm].active == 1).await;
        assert_eq!(mgr.stats()[&Lane::Comm].queued, 3);

        mgr.set_concurrency(Lane::Comm, 4);
        wait_until(|| mgr.stats()[&Lane::Comm].active == 4).await;
        assert_eq!(mgr.stats()[&Lane::Comm].queued, 0);

        mgr.cancel_active(Lane::Comm);
    }

    #[tokio::test]
    async fn lowering_cap_does_not_cancel_active() {
        let mgr = manager(); // Comm cap = 5
        for _ in 0..3 {
            mgr.enqueue_async(
                Lane::Comm,
                EnqueueOptions::described("running"),
                sleepy(60_000),
            );
        }
        wait_until(|| mgr.stats()[&Lane::Comm].active == 3).await;

        mgr.set_concurrency(Lane::Comm, 1);
        // Still 3 active; the cap only gates future admissions.
        assert_eq!(mgr.stats()[&Lane::Comm].active, 3);

        mgr.cancel_active(Lane::Comm);
    }

    #[tokio::test]
    async fn clear_lane_drops_only_queued() {
        let mgr = manager(); // Main cap = 1
        mgr.enqueue_async(Lane::Main, EnqueueOptions::described("active"), sleepy(60_000));
        wait_until(|| mgr.stats()[&Lane::Main].active == 1).await;

        mgr.enqueue_async(Lane::Main, EnqueueOptions::described("queued-1"), sleepy(1));
        mgr.enqueue_async(Lane::Main, EnqueueOptions::described("queued-2"), sleepy(1));
        assert_eq!(mgr.stats()[&Lane::Main].queued, 2);

        assert_eq!(mgr.clear_lane(Lane::Main), 2);
        assert_eq!(mgr.stats()[&Lane::Main].queued, 0);
        assert_eq!(mgr.stats()[&Lane::Main].active, 1);

        mgr.cancel_active(Lane::Main);
    }

    #[tokio::test]
    async fn work_errors_emit_events_and_leave_lane_healthy() {
        let mgr = manager();
        let events: Arc<Mutex<Vec<LaneEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        mgr.subscribe(move |e| sink.lock().push(e.clone()));

        let result = mgr
            .enqueue(
                Lane::Events,
                EnqueueOptions::described("exploding"),
                Box::new(|_| Box::pin(async { Err(Error::Other("boom".into())) })),
            )
            .await;
        assert!(result.is_err());

        // Errored event was emitted with the message.
        let seen = events.lock();
        assert!(seen
            .iter()
            .any(|e| e.kind == LaneEventKind::Errored && e.error.as_deref() == Some("boom")));
        drop(seen);

        // The lane still processes work.
        mgr.enqueue(
            Lane::Events,
            EnqueueOptions::described("healthy"),
            Box::new(|_| Box::pin(async { Ok(()) })),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn parent_cancellation_unblocks_sync_enqueue() {
        let mgr = manager();
        let parent = CancellationToken::new();
        let parent2 = parent.clone();

        let mgr2 = mgr.clone();
        let handle = tokio::spawn(async move {
            mgr2.enqueue(
                Lane::Main,
                EnqueueOptions::described("cancellable").with_parent(parent2),
                sleepy(60_000),
            )
            .await
        });

        wait_until(|| mgr.stats()[&Lane::Main].active == 1).await;
        parent.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        // The child token observed the parent: the task exits too.
        wait_until(|| mgr.stats()[&Lane::Main].active == 0).await;
    }

    #[tokio::test]
    async fn observability_snapshot_matches_s6() {
        let mgr = manager(); // comm cap 5, heartbeat cap 1
        for _ in 0..5 {
            mgr.enqueue_async(Lane::Comm, EnqueueOptions::described("comm"), sleepy(60_000));
        }
        mgr.enqueue_async(
            Lane::Heartbeat,
            EnqueueOptions::described("tick"),
            sleepy(60_000),
        );
        wait_until(|| {
            let stats = mgr.stats();
            stats[&Lane::Comm].active == 5 && stats[&Lane::Heartbeat].active == 1
        })
        .await;

        let stats = mgr.stats();
        assert_eq!(stats[&Lane::Comm].queued, 0);

        // A sixth comm task queues.
        mgr.enqueue_async(Lane::Comm, EnqueueOptions::described("overflow"), sleepy(1));
        let stats = mgr.stats();
        assert_eq!(stats[&Lane::Comm].active, 5);
        assert_eq!(stats[&Lane::Comm].queued, 1);

        mgr.cancel_active(Lane::Comm);
        mgr.cancel_active(Lane::Heartbeat);
    }
}
