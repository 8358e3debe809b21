use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use waymark_core::connectivity::ManualTransport;
use waymark_core::remote::{
    BroadcastChangeFeed, ChangeFeed, HttpRemoteApi, RemoteApi, RemoteHealthProbe, WsChangeFeed,
};
use waymark_core::util::{compact_text, normalize_text_option};
use waymark_core::{
    ConnectivityMonitor, LocalStore, OutboxOp, OutboxQueue, Record, RecordService, SyncEvent,
    SyncManager, SyncOptions, SyncSettings, SyncStatus,
};

use crate::error::CliError;

const LABEL_PREVIEW_CHARS: usize = 40;

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("WAYMARK_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("waymark")
        .join("waymark.db")
}

pub fn resolve_subject(cli_subject: Option<String>) -> Option<String> {
    normalize_text_option(cli_subject.or_else(|| env::var("WAYMARK_SUBJECT").ok()))
}

pub fn require_subject(subject: Option<&str>) -> Result<&str, CliError> {
    subject.ok_or(CliError::SubjectRequired)
}

pub fn normalize_record_id(id: &str) -> Result<String, CliError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(CliError::EmptyRecordId);
    }
    Ok(id.to_string())
}

pub fn normalize_label(words: &[String]) -> Option<String> {
    normalize_text_option(Some(words.join(" ")))
}

/// Split `NAME=VALUE`. JSON values keep their type; anything else is a string.
pub fn parse_field(assignment: &str) -> Result<(String, Value), CliError> {
    let (name, raw) = assignment
        .split_once('=')
        .ok_or_else(|| CliError::InvalidField(assignment.to_string()))?;
    let name = name.trim();
    if name.is_empty() || name == "id" {
        return Err(CliError::InvalidField(assignment.to_string()));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

pub fn load_settings() -> Result<SyncSettings, CliError> {
    Ok(SyncSettings::from_env()?)
}

pub async fn open_records(db_path: &Path, settings: &SyncSettings) -> Result<RecordService, CliError> {
    let store = LocalStore::open(db_path).await?;
    let outbox = OutboxQueue::new(store.clone()).with_max_retries(settings.max_retries);
    Ok(RecordService::new(store, outbox))
}

pub async fn find_record(records: &RecordService, id: &str) -> Result<Record, CliError> {
    records
        .get(id)
        .await?
        .ok_or_else(|| CliError::RecordNotFound(id.to_string()))
}

/// Sync manager wired to the configured backend, not yet started.
pub struct SyncContext {
    pub manager: SyncManager,
    pub connectivity: ConnectivityMonitor,
}

pub async fn open_sync(db_path: &Path, settings: &SyncSettings) -> Result<SyncContext, CliError> {
    tracing::debug!(?settings, db_path = %db_path.display(), "Opening sync context");
    let remote = HttpRemoteApi::from_settings(settings)?.ok_or(CliError::SyncNotConfigured)?;
    let remote: Arc<dyn RemoteApi> = Arc::new(remote);
    let feed: Arc<dyn ChangeFeed> = match &settings.feed_url {
        Some(url) => Arc::new(WsChangeFeed::new(url.clone(), settings.api_token.clone())?),
        None => Arc::new(BroadcastChangeFeed::new()),
    };
    let connectivity = ConnectivityMonitor::new(
        Arc::new(RemoteHealthProbe::new(Arc::clone(&remote))),
        Arc::new(ManualTransport::default()),
        settings.connectivity(),
    );
    let records = open_records(db_path, settings).await?;
    let manager = SyncManager::new(
        records,
        connectivity.clone(),
        remote,
        feed,
        SyncOptions::from(settings),
    );
    Ok(SyncContext {
        manager,
        connectivity,
    })
}

/// Start syncing for `subject`, failing early when the backend is down.
pub async fn start_online(context: &SyncContext, subject: &str) -> Result<(), CliError> {
    if !context.connectivity.refresh().await {
        return Err(CliError::Unreachable);
    }
    context.manager.start(subject).await?;
    Ok(())
}

pub fn label_preview(record: &Record) -> String {
    let label = record.label().map(compact_text).unwrap_or_default();
    if label.chars().count() <= LABEL_PREVIEW_CHARS {
        return label;
    }
    let mut preview: String = label.chars().take(LABEL_PREVIEW_CHARS - 3).collect();
    preview.push_str("...");
    preview
}

pub fn format_record_lines(records: &[Record], current: Option<&str>) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let marker = if current == Some(record.id.as_str()) {
                '*'
            } else {
                ' '
            };
            let updated = record.updated_at.as_deref().unwrap_or("-");
            let preview = label_preview(record);
            if preview.is_empty() {
                format!("{marker} {}  {updated}", record.id)
            } else {
                format!("{marker} {}  {preview}  {updated}", record.id)
            }
        })
        .collect()
}

pub fn format_outbox_lines(ops: &[OutboxOp]) -> Vec<String> {
    ops.iter()
        .map(|op| {
            let mut line = format!(
                "#{} {} {} queued={} retries={}",
                op.id,
                op.kind().label(),
                op.record_id,
                op.created_at,
                op.retries
            );
            if let Some(error) = &op.last_error {
                line.push_str(&format!(" error=\"{}\"", compact_text(error)));
            }
            line
        })
        .collect()
}

pub fn format_status_lines(status: &SyncStatus) -> Vec<String> {
    vec![
        format!("state: {}", status.state().label()),
        format!("online: {}", if status.online { "yes" } else { "no" }),
        format!("pending: {}", status.pending),
        format!("dead letters: {}", status.dead_letters),
        format!(
            "last pull: {}",
            status.last_pull_at.as_deref().unwrap_or("never")
        ),
        format!(
            "last drain: {}",
            status.last_drain_at.as_deref().unwrap_or("never")
        ),
    ]
}

pub fn format_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::DrainStart => "drain started".to_string(),
        SyncEvent::DrainEnd {
            delivered,
            failed,
            interrupted,
        } => {
            let mut line = format!("drain finished: {delivered} delivered, {failed} failed");
            if *interrupted {
                line.push_str(" (interrupted)");
            }
            line
        }
        SyncEvent::PullComplete { merged, skipped } => {
            format!("pull finished: {merged} merged, {skipped} kept local")
        }
        SyncEvent::RemoteApplied { record_id } => format!("remote change applied: {record_id}"),
        SyncEvent::Error { context, message } => format!("error [{context}]: {message}"),
    }
}
