use std::path::Path;

use crate::commands::common::{format_outbox_lines, load_settings, open_records};
use crate::error::CliError;

pub async fn run_outbox(dead: bool, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let records = open_records(db_path, &load_settings()?).await?;
    let outbox = records.outbox();
    let ops = if dead {
        outbox.dead_letters().await?
    } else {
        outbox.pending_ops().await?
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&ops)?);
        return Ok(());
    }

    if ops.is_empty() {
        println!(
            "{}",
            if dead {
                "No dead-lettered operations."
            } else {
                "Outbox is empty."
            }
        );
        return Ok(());
    }
    for line in format_outbox_lines(&ops) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_purge_dead(db_path: &Path) -> Result<(), CliError> {
    let records = open_records(db_path, &load_settings()?).await?;
    let purged = records.outbox().purge_dead_letter().await?;
    println!("Purged {purged} dead-lettered operations");
    Ok(())
}
