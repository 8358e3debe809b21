use std::path::Path;

use crate::commands::common::{
    format_event, format_status_lines, load_settings, open_sync, require_subject, start_online,
};
use crate::error::CliError;

pub async fn run_sync(subject: Option<&str>, watch: bool, db_path: &Path) -> Result<(), CliError> {
    let subject = require_subject(subject)?;
    let settings = load_settings()?;
    let context = open_sync(db_path, &settings).await?;

    let _events = context
        .manager
        .subscribe(|event| println!("{}", format_event(event)));

    if watch {
        context.connectivity.start();
        context.manager.start(subject).await?;
        println!("Watching for changes as {subject}; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        context.manager.stop().await;
        context.connectivity.stop();
        return Ok(());
    }

    start_online(&context, subject).await?;
    context.manager.stop().await;

    for line in format_status_lines(&context.manager.status().await?) {
        println!("{line}");
    }
    Ok(())
}
