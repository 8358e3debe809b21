use std::path::Path;

use crate::commands::common::{format_record_lines, load_settings, open_records};
use crate::error::CliError;

pub async fn run_list(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let records = open_records(db_path, &load_settings()?).await?;
    let mut listed = records.list().await?;
    listed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    listed.truncate(limit);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }

    if listed.is_empty() {
        println!("No records yet.");
        return Ok(());
    }
    let current = records.store().current_record().await?;
    for line in format_record_lines(&listed, current.as_deref()) {
        println!("{line}");
    }
    Ok(())
}
