use std::path::Path;

use crate::commands::common::{find_record, load_settings, normalize_record_id, open_records};
use crate::error::CliError;

pub async fn run_current(id: Option<&str>, clear: bool, db_path: &Path) -> Result<(), CliError> {
    let records = open_records(db_path, &load_settings()?).await?;
    let store = records.store();

    if clear {
        store.set_current_record(None).await?;
        return Ok(());
    }

    if let Some(id) = id {
        let id = normalize_record_id(id)?;
        find_record(&records, &id).await?;
        store.set_current_record(Some(&id)).await?;
        println!("{id}");
        return Ok(());
    }

    match store.current_record().await? {
        Some(current) => println!("{current}"),
        None => println!("No current record."),
    }
    Ok(())
}
