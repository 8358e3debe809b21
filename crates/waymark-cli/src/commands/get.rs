use std::path::Path;

use crate::commands::common::{find_record, load_settings, normalize_record_id, open_records};
use crate::error::CliError;

pub async fn run_get(id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let id = normalize_record_id(id)?;
    let records = open_records(db_path, &load_settings()?).await?;
    let record = find_record(&records, &id).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("id: {}", record.id);
    println!("owner: {}", record.owner_id.as_deref().unwrap_or("-"));
    println!("updated: {}", record.updated_at.as_deref().unwrap_or("-"));
    for (name, value) in &record.fields {
        println!("{name}: {value}");
    }
    Ok(())
}
