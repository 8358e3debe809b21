//! In-memory doubles for the remote API and health probe.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::connectivity::HealthProbe;
use crate::models::{Invite, Membership, Record};
use crate::observer::Subscription;
use crate::remote::{RemoteApi, RemoteError, RemoteResult};
use crate::store::Collection;
use crate::sync::{SyncEvent, SyncManager};

type UpsertHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct RemoteState {
    records: HashMap<String, Record>,
    memberships: Vec<Membership>,
    invites: HashMap<String, Invite>,
    upserted: Vec<String>,
    deleted: Vec<String>,
    labels: Vec<(String, String)>,
    failing: Option<RemoteError>,
    failing_records: HashMap<String, RemoteError>,
    fail_increment: bool,
}

/// Remote store kept in memory, with failure injection.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<RemoteState>,
    unreachable: AtomicBool,
    upsert_calls: AtomicUsize,
    on_upsert: Mutex<Option<UpsertHook>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn insert_record(&self, record: Record) {
        self.state().records.insert(record.id.clone(), record);
    }

    pub fn insert_membership(&self, membership: Membership) {
        self.state().memberships.push(membership);
    }

    pub fn insert_invite(&self, invite: Invite) {
        self.state().invites.insert(invite.code.clone(), invite);
    }

    /// Fail every call until cleared with `None`.
    pub fn fail_all(&self, error: Option<RemoteError>) {
        self.state().failing = error;
    }

    /// Fail mutations of one record.
    pub fn fail_record(&self, record_id: &str, error: RemoteError) {
        self.state()
            .failing_records
            .insert(record_id.to_string(), error);
    }

    pub fn fail_increment(&self, fail: bool) {
        self.state().fail_increment = fail;
    }

    /// Called with the record id at the start of every upsert.
    pub fn on_upsert(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_upsert.lock().unwrap() = Some(Box::new(hook));
    }

    /// Make every upsert wait for a notification on `gate`.
    pub fn set_gate(&self, gate: Arc<Notify>) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn upserted(&self) -> Vec<String> {
        self.state().upserted.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    pub fn labels(&self) -> Vec<(String, String)> {
        self.state().labels.clone()
    }

    pub fn record(&self, record_id: &str) -> Option<Record> {
        self.state().records.get(record_id).cloned()
    }

    pub fn invite(&self, code: &str) -> Option<Invite> {
        self.state().invites.get(code).cloned()
    }

    pub fn memberships(&self) -> Vec<Membership> {
        self.state().memberships.clone()
    }

    fn check(&self, record_id: Option<&str>) -> RemoteResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("connection refused".to_string()));
        }
        let state = self.state();
        if let Some(error) = &state.failing {
            return Err(error.clone());
        }
        if let Some(error) = record_id.and_then(|id| state.failing_records.get(id)) {
            return Err(error.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn health(&self) -> RemoteResult<()> {
        self.check(None)
    }

    async fn upsert_record(&self, _collection: Collection, record: &Record) -> RemoteResult<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_upsert.lock().unwrap().as_ref() {
            hook(&record.id);
        }
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check(Some(&record.id))?;

        let mut state = self.state();
        state.upserted.push(record.id.clone());
        state.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_record(
        &self,
        _collection: Collection,
        record_id: &str,
        _subject_id: &str,
    ) -> RemoteResult<()> {
        self.check(Some(record_id))?;
        let mut state = self.state();
        state.deleted.push(record_id.to_string());
        state.records.remove(record_id);
        Ok(())
    }

    async fn update_label(
        &self,
        _collection: Collection,
        record_id: &str,
        label: &str,
    ) -> RemoteResult<()> {
        self.check(Some(record_id))?;
        self.state()
            .labels
            .push((record_id.to_string(), label.to_string()));
        Ok(())
    }

    async fn list_owned(
        &self,
        _collection: Collection,
        subject_id: &str,
    ) -> RemoteResult<Vec<Record>> {
        self.check(None)?;
        let mut records: Vec<Record> = self
            .state()
            .records
            .values()
            .filter(|record| record.is_owned_by(subject_id))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn list_by_membership(
        &self,
        _collection: Collection,
        subject_id: &str,
    ) -> RemoteResult<Vec<Record>> {
        self.check(None)?;
        let state = self.state();
        let shared: HashSet<&str> = state
            .memberships
            .iter()
            .filter(|membership| membership.subject_id == subject_id)
            .map(|membership| membership.record_id.as_str())
            .collect();
        let mut records: Vec<Record> = state
            .records
            .values()
            .filter(|record| shared.contains(record.id.as_str()))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn list_memberships(&self, subject_id: &str) -> RemoteResult<Vec<Membership>> {
        self.check(None)?;
        Ok(self
            .state()
            .memberships
            .iter()
            .filter(|membership| membership.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn add_membership(&self, membership: &Membership) -> RemoteResult<()> {
        self.check(None)?;
        self.state().memberships.push(membership.clone());
        Ok(())
    }

    async fn create_invite(&self, invite: &Invite) -> RemoteResult<()> {
        self.check(None)?;
        self.insert_invite(invite.clone());
        Ok(())
    }

    async fn find_invite(&self, code: &str) -> RemoteResult<Option<Invite>> {
        self.check(None)?;
        Ok(self.invite(code))
    }

    async fn increment_invite_uses(&self, code: &str) -> RemoteResult<u32> {
        self.check(None)?;
        let mut state = self.state();
        if state.fail_increment {
            return Err(RemoteError::Server {
                status: 503,
                message: "invite counter unavailable".to_string(),
            });
        }
        let invite = state
            .invites
            .get_mut(code)
            .ok_or_else(|| RemoteError::Server {
                status: 404,
                message: "invite not found".to_string(),
            })?;
        invite.uses += 1;
        Ok(invite.uses)
    }
}

/// Health probe with a switchable answer.
#[derive(Debug, Default)]
pub struct StaticProbe {
    reachable: AtomicBool,
    calls: AtomicUsize,
}

impl StaticProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn probe(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Forward every sync event into a channel.
pub fn collect_events(manager: &SyncManager) -> (Subscription, mpsc::UnboundedReceiver<SyncEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let subscription = manager.subscribe(move |event| {
        let _ = sender.send(event.clone());
    });
    (subscription, receiver)
}

/// Wait for the first event matching `predicate`, discarding others.
pub async fn wait_for_event(
    receiver: &mut mpsc::UnboundedReceiver<SyncEvent>,
    predicate: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = receiver.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for sync event")
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
