use std::path::Path;

use crate::commands::common::{
    load_settings, normalize_record_id, open_sync, require_subject, start_online,
};
use crate::error::CliError;

pub async fn run_invite_create(
    id: &str,
    subject: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let id = normalize_record_id(id)?;
    let subject = require_subject(subject)?;
    let context = open_sync(db_path, &load_settings()?).await?;
    start_online(&context, subject).await?;

    let invite = context.manager.create_invite(&id).await;
    context.manager.stop().await;
    let invite = invite?;

    println!("{}", invite.code);
    println!(
        "expires {}, {} uses",
        invite.expires_at.format("%Y-%m-%d %H:%M UTC"),
        invite.max_uses
    );
    Ok(())
}

pub async fn run_invite_redeem(
    code: &str,
    subject: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let subject = require_subject(subject)?;
    let context = open_sync(db_path, &load_settings()?).await?;
    start_online(&context, subject).await?;

    let record_id = context.manager.redeem_invite(code).await;
    context.manager.stop().await;
    println!("{}", record_id?);
    Ok(())
}
