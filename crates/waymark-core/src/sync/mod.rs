//! Sync manager
//!
//! Orchestrates the three flows between the local store and the remote:
//!
//! - **drain**: deliver outbox entries in order while online
//! - **pull**: fetch owned and shared records and merge them (LWW)
//! - **live merge**: apply change-feed events for authorized records
//!
//! The manager does not own connectivity polling; the composition root
//! starts the [`ConnectivityMonitor`] and hands it in.

mod events;
mod invite;
mod merge;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SyncSettings;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};
use crate::models::{
    membership_key, Membership, OutboxOp, OutboxOperation, Record, DEFAULT_INVITE_MAX_USES,
    DEFAULT_INVITE_TTL_SECS,
};
use crate::observer::{Listeners, Subscription};
use crate::outbox::OutboxQueue;
use crate::records::RecordService;
use crate::remote::{ChangeFeed, ChangeKind, RemoteApi, RemoteChangeEvent, RemoteError};
use crate::state::SyncStatus;
use crate::store::{CascadeReport, Collection, LocalStore};
use crate::util::timestamp_now;

pub use events::{DrainOutcome, DrainReport, PullReport, SyncEvent};
pub use merge::{resolve, shallow_merge, MergeDecision};

use merge::merge_in;

/// Collection the manager synchronizes.
const PRIMARY: Collection = Collection::Plans;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Periodic pull cadence while online; `None` pulls only on connect
    pub pull_interval: Option<Duration>,
    pub invite_ttl: chrono::Duration,
    pub invite_max_uses: u32,
    /// Delay before resubscribing after the change feed ends
    pub feed_retry_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            pull_interval: None,
            invite_ttl: chrono::Duration::seconds(
                i64::try_from(DEFAULT_INVITE_TTL_SECS).unwrap_or(i64::MAX),
            ),
            invite_max_uses: DEFAULT_INVITE_MAX_USES,
            feed_retry_delay: Duration::from_secs(5),
        }
    }
}

impl From<&SyncSettings> for SyncOptions {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            pull_interval: settings.pull_interval(),
            invite_ttl: settings.invite_ttl(),
            invite_max_uses: settings.invite_max_uses,
            ..Self::default()
        }
    }
}

/// Shared sync manager handle.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

struct Inner {
    records: RecordService,
    connectivity: ConnectivityMonitor,
    remote: Arc<dyn RemoteApi>,
    feed: Arc<dyn ChangeFeed>,
    options: SyncOptions,
    session: tokio::sync::Mutex<Option<Session>>,
    subject: RwLock<Option<String>>,
    draining: AtomicBool,
    drain_requested: AtomicBool,
    pulled: AtomicBool,
    listeners: Listeners<SyncEvent>,
    last_pull_at: Mutex<Option<String>>,
    last_drain_at: Mutex<Option<String>>,
}

/// Resources owned by one `start(subject)`.
struct Session {
    subject_id: String,
    _connectivity: Subscription,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Clears the in-flight flag when a drain pass ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncManager {
    pub fn new(
        records: RecordService,
        connectivity: ConnectivityMonitor,
        remote: Arc<dyn RemoteApi>,
        feed: Arc<dyn ChangeFeed>,
        options: SyncOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                records,
                connectivity,
                remote,
                feed,
                options,
                session: tokio::sync::Mutex::new(None),
                subject: RwLock::new(None),
                draining: AtomicBool::new(false),
                drain_requested: AtomicBool::new(false),
                pulled: AtomicBool::new(false),
                listeners: Listeners::new(),
                last_pull_at: Mutex::new(None),
                last_drain_at: Mutex::new(None),
            }),
        }
    }

    fn from_weak(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub fn records(&self) -> &RecordService {
        &self.inner.records
    }

    pub fn store(&self) -> &LocalStore {
        self.inner.records.store()
    }

    pub fn outbox(&self) -> &OutboxQueue {
        self.inner.records.outbox()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Subject the manager was started for.
    pub fn current_subject(&self) -> Option<String> {
        self.inner
            .subject
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self, callback: impl Fn(&SyncEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.listeners.subscribe(callback)
    }

    fn emit(&self, event: SyncEvent) {
        self.inner.listeners.emit(&event);
    }

    /// Begin syncing for `subject_id`.
    ///
    /// Starting again for the same subject does nothing; a different
    /// subject tears the previous session down first. When already online
    /// this pulls and drains before returning.
    pub async fn start(&self, subject_id: &str) -> Result<()> {
        let subject_id = subject_id.trim();
        if subject_id.is_empty() {
            return Err(Error::InvalidInput("subject id must not be empty".to_string()));
        }

        {
            let mut session = self.inner.session.lock().await;
            if session
                .as_ref()
                .is_some_and(|session| session.subject_id == subject_id)
            {
                return Ok(());
            }
            if let Some(previous) = session.take() {
                tracing::info!(
                    previous = %previous.subject_id,
                    subject_id,
                    "Switching sync subject"
                );
            }

            *self
                .inner
                .subject
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(subject_id.to_string());
            self.inner.pulled.store(false, Ordering::SeqCst);

            let weak = Arc::downgrade(&self.inner);
            let runtime = tokio::runtime::Handle::current();
            let connectivity = self.inner.connectivity.subscribe(move |online| {
                if !online {
                    return;
                }
                if let Some(manager) = Self::from_weak(&weak) {
                    runtime.spawn(async move { manager.handle_online().await });
                }
            });

            let mut tasks = vec![self.spawn_feed_task(subject_id.to_string())];
            if let Some(interval) = self.inner.options.pull_interval {
                tasks.push(self.spawn_pull_loop(interval));
            }

            *session = Some(Session {
                subject_id: subject_id.to_string(),
                _connectivity: connectivity,
                tasks,
            });
        }
        tracing::info!(subject_id, "Sync manager started");

        if self.is_online() {
            self.handle_online().await;
        }
        Ok(())
    }

    /// Tear down subscriptions and background tasks. Safe to repeat.
    pub async fn stop(&self) {
        let session = self.inner.session.lock().await.take();
        *self
            .inner
            .subject
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        if let Some(session) = session {
            tracing::info!(subject_id = %session.subject_id, "Sync manager stopped");
        }
    }

    /// Connectivity came back: pull once per session, then drain.
    async fn handle_online(&self) {
        if self.current_subject().is_none() {
            return;
        }
        if !self.inner.pulled.load(Ordering::SeqCst) {
            self.pull_remote().await;
        }
        self.drain_queue().await;
    }

    fn spawn_feed_task(&self, subject_id: String) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let feed = Arc::clone(&self.inner.feed);
        let retry_delay = self.inner.options.feed_retry_delay;

        tokio::spawn(async move {
            loop {
                match feed.subscribe(PRIMARY).await {
                    Ok(mut subscription) => {
                        while let Some(event) = subscription.next().await {
                            let Some(manager) = Self::from_weak(&weak) else {
                                return;
                            };
                            if let Err(error) = manager.apply_remote_change(&subject_id, &event).await
                            {
                                tracing::warn!(
                                    record_id = %event.record.id,
                                    "Failed to apply remote change: {error}"
                                );
                                manager.emit(SyncEvent::error("live_merge", &error));
                            }
                        }
                        tracing::debug!("Change feed ended");
                    }
                    Err(error) => {
                        tracing::warn!("Change feed subscription failed: {error}");
                    }
                }
                if weak.strong_count() == 0 {
                    return;
                }
                tokio::time::sleep(retry_delay).await;
            }
        })
    }

    fn spawn_pull_loop(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; connect already pulls.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = Self::from_weak(&weak) else {
                    return;
                };
                if manager.is_online() {
                    manager.pull_remote().await;
                }
            }
        })
    }

    /// Store a record and queue its upload.
    ///
    /// Records without an owner are assigned to the current subject.
    pub async fn save_record(&self, mut record: Record) -> Result<Record> {
        if record.owner_id.is_none() {
            record.owner_id = self.current_subject();
        }
        let record = self.inner.records.save_record(record).await?;
        self.kick_drain();
        Ok(record)
    }

    pub async fn delete_record(&self, record_id: &str) -> Result<CascadeReport> {
        let report = self.inner.records.delete_record(record_id).await?;
        self.kick_drain();
        Ok(report)
    }

    pub async fn update_label(&self, record_id: &str, label: &str) -> Result<Record> {
        let record = self.inner.records.update_label(record_id, label).await?;
        self.kick_drain();
        Ok(record)
    }

    /// Queue an upsert unless one is already pending for the record.
    pub async fn enqueue_upsert(&self, record_id: &str) -> Result<Option<OutboxOp>> {
        self.enqueue_op(record_id, OutboxOperation::Upsert).await
    }

    pub async fn enqueue_delete(&self, record_id: &str) -> Result<Option<OutboxOp>> {
        self.enqueue_op(record_id, OutboxOperation::Delete).await
    }

    pub async fn enqueue_op(
        &self,
        record_id: &str,
        op: OutboxOperation,
    ) -> Result<Option<OutboxOp>> {
        let queued = self.inner.records.enqueue_op(record_id, op).await?;
        self.kick_drain();
        Ok(queued)
    }

    /// Fire-and-forget drain when online.
    fn kick_drain(&self) {
        if !self.is_online() || self.current_subject().is_none() {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            manager.drain_queue().await;
        });
    }

    /// Deliver pending outbox entries in order.
    ///
    /// Only one pass runs at a time; a request that arrives mid-pass is
    /// served by one more pass once the current one ends. A pass stops as
    /// soon as connectivity is lost. After a failure, later entries for
    /// the same record wait for the next pass so per-record order holds.
    pub async fn drain_queue(&self) -> DrainOutcome {
        let Some(subject_id) = self.current_subject() else {
            return DrainOutcome::NotStarted;
        };
        if !self.is_online() {
            return DrainOutcome::Offline;
        }

        self.inner.drain_requested.store(true, Ordering::SeqCst);
        let mut total: Option<DrainReport> = None;
        loop {
            if self
                .inner
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return total.map_or(DrainOutcome::AlreadyRunning, DrainOutcome::Completed);
            }
            self.inner.drain_requested.store(false, Ordering::SeqCst);
            let report = {
                let _guard = DrainGuard(&self.inner.draining);
                self.drain_pass(&subject_id).await
            };

            let sum = total.get_or_insert_with(DrainReport::default);
            sum.delivered += report.delivered;
            sum.failed += report.failed;
            sum.interrupted = report.interrupted;

            if report.interrupted
                || !self.is_online()
                || !self.inner.drain_requested.load(Ordering::SeqCst)
            {
                return DrainOutcome::Completed(*sum);
            }
        }
    }

    async fn drain_pass(&self, subject_id: &str) -> DrainReport {
        self.emit(SyncEvent::DrainStart);
        let report = self.drain_pending(subject_id).await;
        *self
            .inner
            .last_drain_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(timestamp_now());

        if report.delivered > 0 || report.failed > 0 || report.interrupted {
            tracing::info!(
                delivered = report.delivered,
                failed = report.failed,
                interrupted = report.interrupted,
                "Outbox drain finished"
            );
        }
        self.emit(report.into());
        report
    }

    async fn drain_pending(&self, subject_id: &str) -> DrainReport {
        let mut report = DrainReport::default();
        let ops = match self.outbox().pending_ops().await {
            Ok(ops) => ops,
            Err(error) => {
                tracing::warn!("Failed to read outbox: {error}");
                self.emit(SyncEvent::error("drain", &error));
                return report;
            }
        };

        let mut blocked: HashSet<String> = HashSet::new();
        for op in ops {
            if !self.is_online() {
                report.interrupted = true;
                break;
            }
            if blocked.contains(&op.record_id) {
                continue;
            }

            match self.deliver(&op, subject_id).await {
                Ok(()) => {
                    report.delivered += 1;
                    if let Err(error) = self.outbox().remove(op.id).await {
                        tracing::warn!(op_id = op.id, "Failed to remove delivered op: {error}");
                    }
                    tracing::debug!(
                        op_id = op.id,
                        record_id = %op.record_id,
                        kind = op.kind().label(),
                        "Delivered outbox operation"
                    );
                }
                Err(error) => {
                    report.failed += 1;
                    blocked.insert(op.record_id.clone());
                    tracing::warn!(
                        op_id = op.id,
                        record_id = %op.record_id,
                        kind = op.kind().label(),
                        retries = op.retries,
                        "Outbox delivery failed: {error}"
                    );
                    let message = error.to_string();
                    let marked = if error.is_permanent_remote() {
                        self.outbox().dead_letter(op.id, &message).await
                    } else {
                        self.outbox().mark_failed(op.id, &message).await
                    };
                    if let Err(mark_error) = marked {
                        tracing::warn!(op_id = op.id, "Failed to record delivery failure: {mark_error}");
                    }
                    self.emit(SyncEvent::error(
                        format!("drain:{}", op.kind().label()),
                        &error,
                    ));

                    if matches!(error, Error::Remote(RemoteError::Transport(_)))
                        && !self.inner.connectivity.refresh().await
                    {
                        report.interrupted = true;
                        break;
                    }
                }
            }
        }
        report
    }

    async fn deliver(&self, op: &OutboxOp, subject_id: &str) -> Result<()> {
        let remote = &self.inner.remote;
        match &op.op {
            OutboxOperation::Upsert => {
                let record: Option<Record> = self.store().get(PRIMARY, &op.record_id).await?;
                let Some(record) = record else {
                    tracing::debug!(
                        record_id = %op.record_id,
                        "Record no longer exists locally; dropping upsert"
                    );
                    return Ok(());
                };
                let mut payload = record.for_remote();
                if payload.owner_id.is_none() {
                    payload.owner_id = Some(subject_id.to_string());
                }
                remote.upsert_record(PRIMARY, &payload).await?;
            }
            OutboxOperation::Delete => {
                remote
                    .delete_record(PRIMARY, &op.record_id, subject_id)
                    .await?;
            }
            OutboxOperation::LabelUpdate { label } => {
                remote.update_label(PRIMARY, &op.record_id, label).await?;
            }
            OutboxOperation::InviteCreate { invite } => {
                remote.create_invite(invite).await?;
            }
            OutboxOperation::InviteRedeem { code } => {
                remote.increment_invite_uses(code).await?;
            }
        }
        Ok(())
    }

    /// Fetch owned and shared records and merge them locally.
    ///
    /// Failures are reported through a [`SyncEvent::Error`] and `None`.
    pub async fn pull_remote(&self) -> Option<PullReport> {
        let subject_id = self.current_subject()?;
        match self.try_pull(&subject_id).await {
            Ok(report) => {
                self.inner.pulled.store(true, Ordering::SeqCst);
                *self
                    .inner
                    .last_pull_at
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(timestamp_now());
                tracing::info!(
                    merged = report.merged,
                    skipped = report.skipped,
                    "Pulled remote records"
                );
                self.emit(report.into());
                Some(report)
            }
            Err(error) => {
                tracing::warn!("Remote pull failed: {error}");
                self.emit(SyncEvent::error("pull", &error));
                None
            }
        }
    }

    async fn try_pull(&self, subject_id: &str) -> Result<PullReport> {
        let remote = &self.inner.remote;
        let memberships = remote.list_memberships(subject_id).await?;
        let owned = remote.list_owned(PRIMARY, subject_id).await?;
        let shared = remote.list_by_membership(PRIMARY, subject_id).await?;

        self.store()
            .with_transaction(&[PRIMARY, Collection::Memberships], |tx| {
                for (key, cached) in tx.entries::<Membership>(Collection::Memberships)? {
                    if cached.subject_id == subject_id {
                        tx.delete(Collection::Memberships, &key)?;
                    }
                }
                for membership in &memberships {
                    tx.put(Collection::Memberships, membership, Some(&membership.key()))?;
                }

                let mut report = PullReport::default();
                let mut seen = HashSet::new();
                for record in owned.iter().chain(&shared) {
                    if !seen.insert(record.id.as_str()) {
                        continue;
                    }
                    if merge_in(tx, record)?.writes() {
                        report.merged += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
                Ok(report)
            })
            .await
    }

    /// Apply one live change for `subject_id`.
    ///
    /// Events for records the subject neither owns nor is a member of are
    /// dropped. Returns whether the local store changed.
    pub async fn apply_remote_change(
        &self,
        subject_id: &str,
        event: &RemoteChangeEvent,
    ) -> Result<bool> {
        let record = &event.record;
        if !self.is_authorized(subject_id, record).await? {
            tracing::debug!(record_id = %record.id, "Dropped change for unauthorized record");
            return Ok(false);
        }

        let applied = match event.kind {
            ChangeKind::Delete => {
                self.store()
                    .delete_record_cascade(&record.id)
                    .await?
                    .removed_primary
            }
            ChangeKind::Insert | ChangeKind::Update => self
                .store()
                .with_transaction(&[PRIMARY], |tx| merge_in(tx, record))
                .await?
                .writes(),
        };

        if applied {
            self.emit(SyncEvent::RemoteApplied {
                record_id: record.id.clone(),
            });
        }
        Ok(applied)
    }

    async fn is_authorized(&self, subject_id: &str, record: &Record) -> Result<bool> {
        if record.is_owned_by(subject_id) {
            return Ok(true);
        }
        let local: Option<Record> = self.store().get(PRIMARY, &record.id).await?;
        if local.is_some_and(|local| local.is_owned_by(subject_id)) {
            return Ok(true);
        }
        let membership: Option<Membership> = self
            .store()
            .get(
                Collection::Memberships,
                &membership_key(&record.id, subject_id),
            )
            .await?;
        Ok(membership.is_some())
    }

    /// Snapshot for status indicators.
    pub async fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            online: self.is_online(),
            draining: self.is_draining(),
            pending: self.outbox().pending_count().await?,
            dead_letters: self.outbox().dead_letter_count().await?,
            last_pull_at: self
                .inner
                .last_pull_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            last_drain_at: self
                .inner
                .last_drain_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        })
    }

    fn require_online(&self) -> Result<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(Error::Offline)
        }
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("subject", &self.current_subject())
            .field("online", &self.is_online())
            .field("draining", &self.is_draining())
            .finish_non_exhaustive()
    }
}
