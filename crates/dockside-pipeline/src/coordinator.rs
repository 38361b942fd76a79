//! The event coordinator.
//!
//! Three sources feed one pool of pipeline workers:
//!
//! - a one-shot **full scan** of the object store at startup,
//! - the long-running **queue subscription**, and
//! - the periodic **reconciliation sweep**, which deletes index keys
//!   whose objects are gone. Reconciliation never creates; uploads and
//!   scans own creation.
//!
//! Events for the same storage key are routed to the same worker lane
//! (hash of the key modulo the worker count), so per-key ordering holds
//! while distinct keys process in parallel.
//!
//! Every outcome flows through a single reducer task: it keeps the
//! aggregate totals, logs per-batch summaries, and is the only place
//! queue messages are deleted. A message is acknowledged once all of its
//! events reached a terminal outcome, unless one of them failed in a way
//! that deserves redelivery.
//!
//! Shutdown: a watch channel stops the sources, the lane channels close,
//! workers finish in-flight events under a drain deadline, and messages
//! not yet acknowledged stay in the queue for redelivery after restart.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use dockside_core::{
    Error, EventKind, EventOrigin, EventQueue, Outcome, PhaseTimings, WorkEvent,
};

use crate::pipeline::{process_event, Services};

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Pipeline worker (lane) count.
    pub workers: usize,
    /// Bounded capacity of each worker lane.
    pub lane_capacity: usize,
    /// Run a full bucket scan before entering queue mode.
    pub scan_on_start: bool,
    /// Key prefixes for the scan; empty means the whole bucket.
    pub scan_prefixes: Vec<String>,
    /// Run the periodic reconciliation sweep.
    pub reconcile_enabled: bool,
    /// Time between sweeps.
    pub reconcile_interval: Duration,
    /// Deliveries after which a permanently failing message is
    /// acknowledged anyway, leaving dead-lettering to the queue.
    pub queue_max_receives: u32,
    /// Pause after a failed queue receive.
    pub queue_error_backoff: Duration,
    /// How long workers may keep finishing in-flight events at shutdown.
    pub drain_deadline: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            lane_capacity: 64,
            scan_on_start: false,
            scan_prefixes: Vec::new(),
            reconcile_enabled: true,
            reconcile_interval: Duration::from_secs(6 * 3600),
            queue_max_receives: 3,
            queue_error_backoff: Duration::from_secs(5),
            drain_deadline: Duration::from_secs(30),
        }
    }
}

/// Aggregate outcome counts. Updated only by the reducer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeTotals {
    pub indexed: u64,
    pub duplicates: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub empty: u64,
    pub failed: u64,
}

impl OutcomeTotals {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Indexed { .. } => self.indexed += 1,
            Outcome::Duplicate { .. } => self.duplicates += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Deleted { .. } => self.deleted += 1,
            Outcome::Empty => self.empty += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Total events recorded.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.indexed + self.duplicates + self.unchanged + self.deleted + self.empty + self.failed
    }
}

/// One queue message's outstanding work. The reducer acknowledges the
/// message when `pending` reaches zero, unless `redeliver` was set.
struct MessageTicket {
    receipt: String,
    receive_count: u32,
    pending: AtomicUsize,
    redeliver: AtomicBool,
}

/// Progress of one scan or sweep; completion produces a summary log.
struct BatchTracker {
    label: &'static str,
    remaining: AtomicUsize,
    totals: Mutex<OutcomeTotals>,
    started: Instant,
}

impl BatchTracker {
    fn new(label: &'static str, expected: usize) -> Self {
        Self {
            label,
            remaining: AtomicUsize::new(expected),
            totals: Mutex::new(OutcomeTotals::default()),
            started: Instant::now(),
        }
    }

    /// Record one outcome; returns the batch totals once complete.
    fn record(&self, outcome: &Outcome) -> Option<OutcomeTotals> {
        let totals = {
            let mut totals = self.totals.lock().expect("tracker lock");
            totals.record(outcome);
            *totals
        };
        (self.remaining.fetch_sub(1, Ordering::SeqCst) == 1).then_some(totals)
    }
}

struct WorkItem {
    event: WorkEvent,
    ticket: Option<Arc<MessageTicket>>,
    batch: Option<Arc<BatchTracker>>,
}

struct OutcomeReport {
    outcome: Outcome,
    #[allow(dead_code)]
    timings: PhaseTimings,
    ticket: Option<Arc<MessageTicket>>,
    batch: Option<Arc<BatchTracker>>,
}

/// Routes work items to lanes by key hash.
#[derive(Clone)]
struct Lanes {
    senders: Vec<mpsc::Sender<WorkItem>>,
}

impl Lanes {
    /// Send to the key's lane; false once the lane is closed.
    async fn dispatch(&self, item: WorkItem) -> bool {
        let lane = lane_for(&item.event.storage_key, self.senders.len());
        self.senders[lane].send(item).await.is_ok()
    }
}

fn lane_for(storage_key: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    storage_key.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

/// Control handle for a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    shutdown: Arc<watch::Sender<bool>>,
    totals: Arc<RwLock<OutcomeTotals>>,
}

impl CoordinatorHandle {
    /// Ask the coordinator to stop accepting work and drain.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Snapshot of the lifetime totals.
    pub async fn totals(&self) -> OutcomeTotals {
        *self.totals.read().await
    }
}

/// Drives the pipeline from its three event sources.
pub struct Coordinator {
    services: Arc<Services>,
    queue: Option<Arc<dyn EventQueue>>,
    config: CoordinatorConfig,
    shutdown: Arc<watch::Sender<bool>>,
    totals: Arc<RwLock<OutcomeTotals>>,
}

impl Coordinator {
    /// Create a coordinator. `queue` may be absent for scan-only runs.
    pub fn new(
        services: Arc<Services>,
        queue: Option<Arc<dyn EventQueue>>,
        config: CoordinatorConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            services,
            queue,
            config,
            shutdown: Arc::new(shutdown),
            totals: Arc::new(RwLock::new(OutcomeTotals::default())),
        }
    }

    /// Handle for shutdown and inspection; valid before and during `run`.
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            shutdown: Arc::clone(&self.shutdown),
            totals: Arc::clone(&self.totals),
        }
    }

    /// Run until every configured source finishes (or shutdown is
    /// requested), then drain the workers and the reducer.
    pub async fn run(self) -> dockside_core::Result<()> {
        let workers = self.config.workers.max(1);
        info!(
            workers,
            scan = self.config.scan_on_start,
            queue = self.queue.is_some(),
            reconcile = self.config.reconcile_enabled,
            "coordinator starting"
        );

        let (report_tx, report_rx) = mpsc::channel::<OutcomeReport>(256);
        let reducer = tokio::spawn(reducer_loop(
            report_rx,
            self.queue.clone(),
            Arc::clone(&self.totals),
            self.config.queue_max_receives,
        ));

        // Worker lanes. Same key -> same lane -> per-key ordering.
        let mut senders = Vec::with_capacity(workers);
        let mut worker_set: JoinSet<()> = JoinSet::new();
        for lane in 0..workers {
            let (tx, mut rx) = mpsc::channel::<WorkItem>(self.config.lane_capacity);
            senders.push(tx);
            let services = Arc::clone(&self.services);
            let report_tx = report_tx.clone();
            worker_set.spawn(async move {
                while let Some(item) = rx.recv().await {
                    let (outcome, timings) = process_event(&services, &item.event).await;
                    let report = OutcomeReport {
                        outcome,
                        timings,
                        ticket: item.ticket,
                        batch: item.batch,
                    };
                    if report_tx.send(report).await.is_err() {
                        break;
                    }
                }
                debug!(lane, "worker lane drained");
            });
        }
        drop(report_tx);
        let lanes = Lanes { senders };

        // Sources. A configured scan completes before queue consumption
        // starts; reconciliation runs on its own timer, orthogonal to
        // both.
        let mut sources: JoinSet<()> = JoinSet::new();
        match (self.config.scan_on_start, self.queue.clone()) {
            (true, Some(queue)) => {
                let services = Arc::clone(&self.services);
                let scan_lanes = lanes.clone();
                let queue_lanes = lanes.clone();
                let prefixes = self.config.scan_prefixes.clone();
                let scan_shutdown = self.shutdown.subscribe();
                let queue_shutdown = self.shutdown.subscribe();
                let backoff = self.config.queue_error_backoff;
                sources.spawn(async move {
                    scan_source(services, scan_lanes, prefixes, scan_shutdown).await;
                    queue_source(queue, queue_lanes, queue_shutdown, backoff).await;
                });
            }
            (true, None) => {
                sources.spawn(scan_source(
                    Arc::clone(&self.services),
                    lanes.clone(),
                    self.config.scan_prefixes.clone(),
                    self.shutdown.subscribe(),
                ));
            }
            (false, Some(queue)) => {
                sources.spawn(queue_source(
                    queue,
                    lanes.clone(),
                    self.shutdown.subscribe(),
                    self.config.queue_error_backoff,
                ));
            }
            (false, None) => {}
        }
        if self.config.reconcile_enabled {
            sources.spawn(reconcile_source(
                Arc::clone(&self.services),
                lanes.clone(),
                self.config.reconcile_interval,
                self.shutdown.subscribe(),
            ));
        }

        while sources.join_next().await.is_some() {}
        drop(lanes);

        // Drain in-flight work, then cut it loose.
        let timed_out = tokio::time::timeout(self.config.drain_deadline, async {
            while worker_set.join_next().await.is_some() {}
        })
        .await
        .is_err();
        if timed_out {
            warn!(
                deadline_secs = self.config.drain_deadline.as_secs(),
                "drain deadline exceeded, abandoning in-flight work"
            );
            worker_set.abort_all();
            while worker_set.join_next().await.is_some() {}
        }

        let _ = reducer.await;

        let totals = *self.totals.read().await;
        info!(
            indexed = totals.indexed,
            duplicates = totals.duplicates,
            unchanged = totals.unchanged,
            deleted = totals.deleted,
            empty = totals.empty,
            failed = totals.failed,
            "coordinator stopped"
        );
        Ok(())
    }
}

// ============================================================================
// Sources
// ============================================================================

/// One-shot full scan: every object under the configured prefixes
/// becomes a CREATE event.
async fn scan_source(
    services: Arc<Services>,
    lanes: Lanes,
    prefixes: Vec<String>,
    shutdown: watch::Receiver<bool>,
) {
    info!(prefixes = ?prefixes, "full scan starting");

    let prefixes = if prefixes.is_empty() {
        vec![String::new()]
    } else {
        prefixes
    };

    let mut keys = Vec::new();
    for prefix in &prefixes {
        match services.store.list(prefix).await {
            Ok(objects) => keys.extend(objects.into_iter().map(|o| o.storage_key)),
            Err(e) => error!(prefix, error = %e, "scan listing failed"),
        }
    }
    keys.sort();
    keys.dedup();

    if keys.is_empty() {
        info!("full scan found no objects");
        return;
    }

    let tracker = Arc::new(BatchTracker::new("scan", keys.len()));
    let total = keys.len();
    for key in keys {
        if *shutdown.borrow() {
            info!("full scan interrupted by shutdown");
            return;
        }
        let item = WorkItem {
            event: WorkEvent::new(EventKind::Create, key, EventOrigin::Scan),
            ticket: None,
            batch: Some(Arc::clone(&tracker)),
        };
        if !lanes.dispatch(item).await {
            return;
        }
    }
    info!(events = total, "full scan enqueued");
}

/// Long-running queue subscription.
async fn queue_source(
    queue: Arc<dyn EventQueue>,
    lanes: Lanes,
    mut shutdown: watch::Receiver<bool>,
    error_backoff: Duration,
) {
    info!("queue subscription started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = queue.receive() => received,
        };

        match received {
            Ok(messages) => {
                for message in messages {
                    if message.events.is_empty() {
                        // Test events and undecodable bodies carry no
                        // work; acknowledge them here.
                        if let Err(e) = queue.delete(&message.receipt).await {
                            warn!(error = %e, "failed to delete empty message");
                        }
                        continue;
                    }

                    let ticket = Arc::new(MessageTicket {
                        receipt: message.receipt,
                        receive_count: message.receive_count,
                        pending: AtomicUsize::new(message.events.len()),
                        redeliver: AtomicBool::new(false),
                    });
                    for event in message.events {
                        debug!(key = %event.storage_key, kind = ?event.kind, "queue event");
                        let item = WorkItem {
                            event,
                            ticket: Some(Arc::clone(&ticket)),
                            batch: None,
                        };
                        if !lanes.dispatch(item).await {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "queue receive failed, backing off");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = tokio::time::sleep(error_backoff) => {}
                }
            }
        }
    }
    info!("queue subscription stopped");
}

/// Periodic reconciliation: delete index keys whose objects are gone.
async fn reconcile_source(
    services: Arc<Services>,
    lanes: Lanes,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "reconciliation timer started");
    loop {
        if let Err(e) = reconcile_sweep(&services, &lanes).await {
            error!(error = %e, "reconciliation sweep failed");
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(interval) => {}
        }
        if *shutdown.borrow() {
            break;
        }
    }
    info!("reconciliation timer stopped");
}

/// One sweep: set-difference the index against the store and enqueue
/// DELETE events for the orphans. Creation is owned by the queue and the
/// scan; a sweep only collects garbage.
async fn reconcile_sweep(services: &Services, lanes: &Lanes) -> Result<(), Error> {
    let started = Instant::now();

    let store_keys: HashSet<String> = services
        .store
        .list("")
        .await?
        .into_iter()
        .map(|o| o.storage_key)
        .collect();
    let index_keys = services.index.list_storage_keys().await?;
    let index_total = index_keys.len();

    let orphans: Vec<String> = index_keys
        .into_iter()
        .filter(|key| !store_keys.contains(key))
        .collect();

    if orphans.is_empty() {
        info!(
            store_objects = store_keys.len(),
            index_keys = index_total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reconciliation found no orphans"
        );
        return Ok(());
    }

    info!(
        store_objects = store_keys.len(),
        index_keys = index_total,
        orphans = orphans.len(),
        "reconciliation deleting orphaned documents"
    );

    let tracker = Arc::new(BatchTracker::new("reconcile", orphans.len()));
    for key in orphans {
        let item = WorkItem {
            event: WorkEvent::new(EventKind::Delete, key, EventOrigin::Reconcile),
            ticket: None,
            batch: Some(Arc::clone(&tracker)),
        };
        if !lanes.dispatch(item).await {
            break;
        }
    }
    Ok(())
}

// ============================================================================
// Reducer
// ============================================================================

/// Sole reader of worker outcomes: updates totals, closes out batch
/// trackers, and owns queue acknowledgement.
async fn reducer_loop(
    mut reports: mpsc::Receiver<OutcomeReport>,
    queue: Option<Arc<dyn EventQueue>>,
    totals: Arc<RwLock<OutcomeTotals>>,
    max_receives: u32,
) {
    while let Some(report) = reports.recv().await {
        {
            let mut totals = totals.write().await;
            totals.record(&report.outcome);
        }

        if let Some(batch) = &report.batch {
            if let Some(summary) = batch.record(&report.outcome) {
                info!(
                    batch = batch.label,
                    total = summary.total(),
                    indexed = summary.indexed,
                    duplicates = summary.duplicates,
                    unchanged = summary.unchanged,
                    deleted = summary.deleted,
                    empty = summary.empty,
                    failed = summary.failed,
                    elapsed_ms = batch.started.elapsed().as_millis() as u64,
                    "batch complete"
                );
            }
        }

        if let Some(ticket) = &report.ticket {
            let keep = match &report.outcome {
                Outcome::Failed { transient: true, .. } => true,
                Outcome::Failed {
                    transient: false, ..
                } => ticket.receive_count < max_receives,
                _ => false,
            };
            if keep {
                ticket.redeliver.store(true, Ordering::SeqCst);
            }

            if ticket.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                if ticket.redeliver.load(Ordering::SeqCst) {
                    info!(
                        receive_count = ticket.receive_count,
                        "leaving message for redelivery"
                    );
                } else if let Some(queue) = &queue {
                    if let Err(e) = queue.delete(&ticket.receipt).await {
                        warn!(error = %e, "message delete failed, it will redeliver");
                    }
                }
            }
        }
    }
    debug!("reducer drained");
}
