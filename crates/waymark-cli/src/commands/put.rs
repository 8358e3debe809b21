use std::path::Path;

use waymark_core::Record;

use crate::commands::common::{
    format_record_lines, load_settings, normalize_record_id, open_records, parse_field,
};
use crate::error::CliError;

pub struct PutArgs {
    pub id: Option<String>,
    pub label: Option<String>,
    pub fields: Vec<String>,
    pub owner: Option<String>,
}

/// Build the record to save, layering changes over `existing`.
pub fn build_record(args: PutArgs, existing: Option<Record>) -> Result<Record, CliError> {
    let mut record = match (existing, args.id) {
        (Some(existing), _) => existing,
        (None, Some(id)) => Record::new(id),
        (None, None) => Record::with_generated_id(),
    };
    if record.owner_id.is_none() {
        record.owner_id = args.owner;
    }
    if let Some(label) = args.label {
        let label = label.trim();
        if label.is_empty() {
            return Err(CliError::EmptyLabel);
        }
        record = record.with_field(waymark_core::models::LABEL_FIELD, label);
    }
    for assignment in &args.fields {
        let (name, value) = parse_field(assignment)?;
        record = record.with_field(name, value);
    }
    Ok(record)
}

pub async fn run_put(mut args: PutArgs, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    args.id = args.id.as_deref().map(normalize_record_id).transpose()?;
    let settings = load_settings()?;
    let records = open_records(db_path, &settings).await?;

    let existing = match &args.id {
        Some(id) => records.get(id).await?,
        None => None,
    };
    let record = records.save_record(build_record(args, existing)?).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        for line in format_record_lines(std::slice::from_ref(&record), None) {
            println!("{line}");
        }
    }
    Ok(())
}
