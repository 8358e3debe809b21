use std::path::PathBuf;

use clap::Parser;
use pretty_assertions::assert_eq;
use serde_json::json;
use waymark_core::models::OpKind;
use waymark_core::{OutboxOp, OutboxOperation, Record, SyncEvent, SyncSettings, SyncStatus};

use crate::cli::{Cli, Commands, CompletionShell, InviteCommands};
use crate::commands::common::{
    format_event, format_outbox_lines, format_record_lines, format_status_lines, label_preview,
    normalize_label, normalize_record_id, open_records, parse_field,
};
use crate::commands::completions::{render_completions, run_completions};
use crate::commands::current::run_current;
use crate::commands::delete::run_delete;
use crate::commands::put::{build_record, run_put, PutArgs};
use crate::commands::sync::run_sync;
use crate::error::CliError;

fn put_args(id: Option<&str>, label: Option<&str>, fields: &[&str]) -> PutArgs {
    PutArgs {
        id: id.map(str::to_string),
        label: label.map(str::to_string),
        fields: fields.iter().map(|field| (*field).to_string()).collect(),
        owner: Some("alice".to_string()),
    }
}

#[test]
fn cli_parses_put_with_repeated_fields() {
    let cli = Cli::try_parse_from([
        "waymark",
        "--subject",
        "alice",
        "put",
        "p1",
        "--label",
        "Ridge loop",
        "-f",
        "distance_km=12",
        "--field",
        "tags=[\"hike\"]",
    ])
    .unwrap();

    assert_eq!(cli.subject.as_deref(), Some("alice"));
    match cli.command {
        Some(Commands::Put {
            id, label, fields, ..
        }) => {
            assert_eq!(id.as_deref(), Some("p1"));
            assert_eq!(label.as_deref(), Some("Ridge loop"));
            assert_eq!(fields, vec!["distance_km=12", "tags=[\"hike\"]"]);
        }
        _ => panic!("expected put command"),
    }
}

#[test]
fn cli_parses_invite_redeem_and_global_db_path() {
    let cli = Cli::try_parse_from(["waymark", "invite", "redeem", "abc234", "--db-path", "x.db"])
        .unwrap();
    assert_eq!(cli.db_path, Some(PathBuf::from("x.db")));
    assert!(matches!(
        cli.command,
        Some(Commands::Invite {
            command: InviteCommands::Redeem { code }
        }) if code == "abc234"
    ));
}

#[test]
fn cli_rejects_current_with_id_and_clear() {
    assert!(Cli::try_parse_from(["waymark", "current", "p1", "--clear"]).is_err());
}

#[test]
fn parse_field_keeps_json_types() {
    assert_eq!(
        parse_field("distance_km=12.5").unwrap(),
        ("distance_km".to_string(), json!(12.5))
    );
    assert_eq!(
        parse_field("done=true").unwrap(),
        ("done".to_string(), json!(true))
    );
    assert_eq!(
        parse_field("note=pack water").unwrap(),
        ("note".to_string(), json!("pack water"))
    );
    assert_eq!(
        parse_field("expr=a=b").unwrap(),
        ("expr".to_string(), json!("a=b"))
    );
}

#[test]
fn parse_field_rejects_missing_name_or_separator() {
    for input in ["novalue", "=12", "id=other"] {
        assert!(
            matches!(parse_field(input), Err(CliError::InvalidField(_))),
            "input {input}"
        );
    }
}

#[test]
fn normalize_record_id_rejects_empty() {
    assert!(matches!(
        normalize_record_id(" \n "),
        Err(CliError::EmptyRecordId)
    ));
    assert_eq!(normalize_record_id("  p1  ").unwrap(), "p1");
}

#[test]
fn normalize_label_joins_words() {
    let words = vec!["Ridge".to_string(), "loop".to_string()];
    assert_eq!(normalize_label(&words).as_deref(), Some("Ridge loop"));
    assert_eq!(normalize_label(&[" ".to_string()]), None);
}

#[test]
fn build_record_layers_over_existing() {
    let existing = Record::new("p1")
        .owned_by("bob")
        .with_field("label", "Old")
        .with_field("distance_km", 3);

    let record = build_record(
        put_args(Some("p1"), Some(" New "), &["elevation=250"]),
        Some(existing),
    )
    .unwrap();

    assert_eq!(record.owner_id.as_deref(), Some("bob"));
    assert_eq!(record.label(), Some("New"));
    assert_eq!(record.field("distance_km"), Some(&json!(3)));
    assert_eq!(record.field("elevation"), Some(&json!(250)));
}

#[test]
fn build_record_generates_id_and_sets_owner() {
    let record = build_record(put_args(None, None, &[]), None).unwrap();
    assert!(!record.id.is_empty());
    assert_eq!(record.owner_id.as_deref(), Some("alice"));

    assert!(matches!(
        build_record(put_args(Some("p1"), Some("  "), &[]), None),
        Err(CliError::EmptyLabel)
    ));
}

#[test]
fn label_preview_truncates_with_ellipsis() {
    let record = Record::new("p1").with_field("label", "a".repeat(60));
    let preview = label_preview(&record);
    assert_eq!(preview.chars().count(), 40);
    assert!(preview.ends_with("..."));
}

#[test]
fn format_record_lines_marks_current() {
    let records = vec![
        Record::new("p1")
            .with_field("label", "Ridge")
            .updated("2024-05-01T10:00:00Z"),
        Record::new("p2"),
    ];

    let lines = format_record_lines(&records, Some("p2"));

    assert_eq!(
        lines,
        vec![
            "  p1  Ridge  2024-05-01T10:00:00Z".to_string(),
            "* p2  -".to_string()
        ]
    );
}

#[test]
fn format_outbox_lines_include_error() {
    let ops = vec![OutboxOp {
        id: 7,
        record_id: "p1".to_string(),
        op: OutboxOperation::LabelUpdate {
            label: "x".to_string(),
        },
        created_at: "2024-05-01T10:00:00.000000Z".to_string(),
        retries: 2,
        last_error: Some("Server error: boom (500)".to_string()),
    }];
    assert_eq!(ops[0].kind(), OpKind::LabelUpdate);

    let lines = format_outbox_lines(&ops);

    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("#7 label_update p1"));
    assert!(lines[0].contains("retries=2"));
    assert!(lines[0].contains("error=\"Server error: boom (500)\""));
}

#[test]
fn format_status_lines_show_state() {
    let status = SyncStatus {
        online: true,
        pending: 2,
        ..SyncStatus::default()
    };
    let lines = format_status_lines(&status);
    assert_eq!(lines[0], "state: syncing");
    assert_eq!(lines[2], "pending: 2");
    assert_eq!(lines[4], "last pull: never");
}

#[test]
fn format_event_describes_interrupted_drain() {
    let event = SyncEvent::DrainEnd {
        delivered: 3,
        failed: 1,
        interrupted: true,
    };
    assert_eq!(
        format_event(&event),
        "drain finished: 3 delivered, 1 failed (interrupted)"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn put_then_delete_queues_both_operations() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("waymark.db");

    run_put(put_args(Some("p1"), Some("Ridge"), &[]), true, &db_path)
        .await
        .unwrap();
    run_delete("p1", &db_path).await.unwrap();

    let records = open_records(&db_path, &SyncSettings::default())
        .await
        .unwrap();
    assert!(records.get("p1").await.unwrap().is_none());
    let kinds: Vec<_> = records
        .outbox()
        .pending_ops()
        .await
        .unwrap()
        .iter()
        .map(OutboxOp::kind)
        .collect();
    assert_eq!(kinds, vec![OpKind::Upsert, OpKind::Delete]);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_and_current_reject_missing_record() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("waymark.db");

    assert!(matches!(
        run_delete("ghost", &db_path).await,
        Err(CliError::RecordNotFound(_))
    ));
    assert!(matches!(
        run_current(Some("ghost"), false, &db_path).await,
        Err(CliError::RecordNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn current_can_be_set_and_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("waymark.db");
    run_put(put_args(Some("p1"), None, &[]), true, &db_path)
        .await
        .unwrap();

    run_current(Some("p1"), false, &db_path).await.unwrap();
    let records = open_records(&db_path, &SyncSettings::default())
        .await
        .unwrap();
    assert_eq!(
        records.store().current_record().await.unwrap().as_deref(),
        Some("p1")
    );

    run_current(None, true, &db_path).await.unwrap();
    assert_eq!(records.store().current_record().await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_requires_subject() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("waymark.db");

    let error = run_sync(None, false, &db_path).await.unwrap_err();
    assert!(matches!(error, CliError::SubjectRequired));
}

#[test]
fn bash_completions_name_the_binary() {
    let mut buffer = Vec::new();
    render_completions(CompletionShell::Bash, &mut buffer);
    let script = String::from_utf8(buffer).unwrap();
    assert!(script.contains("_waymark()"));
    assert!(script.contains("complete -F _waymark"));
}

#[test]
fn run_completions_writes_script_file() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("waymark.fish");

    run_completions(CompletionShell::Fish, Some(&output_path)).unwrap();

    let script = std::fs::read_to_string(&output_path).unwrap();
    assert!(script.contains("complete -c waymark"));
}
