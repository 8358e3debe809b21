use std::path::Path;

use crate::commands::common::{
    label_preview, load_settings, normalize_label, normalize_record_id, open_records,
};
use crate::error::CliError;

pub async fn run_label(id: &str, words: &[String], db_path: &Path) -> Result<(), CliError> {
    let id = normalize_record_id(id)?;
    let label = normalize_label(words).ok_or(CliError::EmptyLabel)?;
    let records = open_records(db_path, &load_settings()?).await?;

    let record = records
        .update_label(&id, &label)
        .await
        .map_err(|error| match error {
            waymark_core::Error::NotFound(_) => CliError::RecordNotFound(id.clone()),
            other => other.into(),
        })?;
    println!("{}  {}", record.id, label_preview(&record));
    Ok(())
}
