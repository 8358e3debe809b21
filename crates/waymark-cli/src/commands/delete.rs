use std::path::Path;

use crate::commands::common::{find_record, load_settings, normalize_record_id, open_records};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let id = normalize_record_id(id)?;
    let records = open_records(db_path, &load_settings()?).await?;
    find_record(&records, &id).await?;

    let report = records.delete_record(&id).await?;
    println!("{id}");
    if report.packs_removed > 0 || report.ancillary_removed > 0 {
        println!(
            "removed {} packs and {} attachments",
            report.packs_removed, report.ancillary_removed
        );
    }
    Ok(())
}
