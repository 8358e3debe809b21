use std::path::Path;

use waymark_core::SyncStatus;

use crate::commands::common::{format_status_lines, load_settings, open_records, open_sync};
use crate::error::CliError;

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let settings = load_settings()?;
    let status = if settings.is_remote_configured() {
        let context = open_sync(db_path, &settings).await?;
        context.connectivity.refresh().await;
        context.manager.status().await?
    } else {
        let records = open_records(db_path, &settings).await?;
        SyncStatus {
            pending: records.outbox().pending_count().await?,
            dead_letters: records.outbox().dead_letter_count().await?,
            ..SyncStatus::default()
        }
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }
    Ok(())
}
