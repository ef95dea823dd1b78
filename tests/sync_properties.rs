//! End-to-end properties of the sync engine against in-memory doubles:
//! acknowledgment only after durable persistence, per-record and per-form
//! failure isolation, and safe crash-and-retry via the destination's unique
//! key on the record id.

use serde_json::json;
use tempfile::TempDir;

use forms_sync::testing::{MemoryRowWriter, MockFormsApi};
use forms_sync::{FormTemplate, RecordId, SyncOrchestrator};

const COMBUSTION_MAPPING: &str = r#"{
    "id | int": "id",
    "col_x | int": "x",
    "col_a | int": "a",
    "o2_level | double": "o2"
}"#;

fn combustion_template() -> FormTemplate {
    FormTemplate {
        name: "controlecombustion".to_string(),
        form_id: "353517".to_string(),
    }
}

fn mapping_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("controlecombustion.json"),
        COMBUSTION_MAPPING,
    )
    .unwrap();
    dir
}

fn submission(id: i64) -> serde_json::Value {
    json!({
        "id": id.to_string(),
        "x": 10,
        "fields": {
            "a": {"value": 1},
            "o2": {"value": "3"}
        }
    })
}

#[tokio::test]
async fn test_persisted_records_are_acknowledged() {
    let dir = mapping_dir();
    let mut source = MockFormsApi::new();
    source.add_submission("353517", submission(42));
    source.add_submission("353517", submission(43));

    let mut orchestrator = SyncOrchestrator::new(
        source,
        MemoryRowWriter::new(),
        dir.path().to_path_buf(),
        false,
    );
    let report = orchestrator.run(&[combustion_template()]).await.unwrap();
    let (source, writer) = orchestrator.into_parts();

    assert_eq!(report.total_persisted(), 2);
    assert_eq!(report.forms[0].acknowledged, 2);
    assert_eq!(writer.row_count("controlecombustion"), 2);
    assert!(source.is_read("353517", 42));
    assert!(source.is_read("353517", 43));
    assert_eq!(source.unread_count("353517"), 0);

    // Values were bound by declared tag, not by JSON shape: "3" for a
    // double column landed as 3.0.
    let row = writer.get_row("controlecombustion", 42).unwrap();
    assert_eq!(row.get("o2_level"), Some(&mysql_async::Value::Double(3.0)));
    assert_eq!(row.get("col_a"), Some(&mysql_async::Value::Int(1)));
    assert_eq!(row.get("col_x"), Some(&mysql_async::Value::Int(10)));
}

#[tokio::test]
async fn test_mapping_failure_isolates_single_record() {
    let dir = mapping_dir();
    let mut source = MockFormsApi::new();
    source.add_submission("353517", submission(42));
    // Missing the mapped "x" field entirely.
    source.add_submission(
        "353517",
        json!({
            "id": "43",
            "fields": {
                "a": {"value": 1},
                "o2": {"value": "2.5"}
            }
        }),
    );

    let mut orchestrator = SyncOrchestrator::new(
        source,
        MemoryRowWriter::new(),
        dir.path().to_path_buf(),
        false,
    );
    let report = orchestrator.run(&[combustion_template()]).await.unwrap();
    let (source, writer) = orchestrator.into_parts();

    let form = &report.forms[0];
    assert_eq!(form.fetched, 2);
    assert_eq!(form.persisted, 1);
    assert_eq!(form.acknowledged, 1);
    assert_eq!(form.failures.len(), 1);
    assert_eq!(form.failures[0].record_id, Some(RecordId(43)));
    assert!(form.failures[0].error.contains("'x'"));
    assert!(form.failures[0].error.contains("'col_x'"));

    // The healthy sibling went through; the failed one stays unread for
    // the next run.
    assert_eq!(writer.row_count("controlecombustion"), 1);
    assert!(source.is_read("353517", 42));
    assert!(!source.is_read("353517", 43));
}

#[tokio::test]
async fn test_write_failure_isolates_single_record() {
    let dir = mapping_dir();
    let mut source = MockFormsApi::new();
    source.add_submission("353517", submission(42));
    source.add_submission("353517", submission(43));

    let mut writer = MemoryRowWriter::new();
    writer.fail_ids.insert(43);

    let mut orchestrator =
        SyncOrchestrator::new(source, writer, dir.path().to_path_buf(), false);
    let report = orchestrator.run(&[combustion_template()]).await.unwrap();
    let (source, writer) = orchestrator.into_parts();

    let form = &report.forms[0];
    assert_eq!(form.persisted, 1);
    assert_eq!(form.failures.len(), 1);
    assert_eq!(form.failures[0].record_id, Some(RecordId(43)));
    assert_eq!(writer.row_count("controlecombustion"), 1);
    assert!(source.is_read("353517", 42));
    assert!(!source.is_read("353517", 43));
}

#[tokio::test]
async fn test_auth_failure_aborts_before_any_other_call() {
    let dir = mapping_dir();
    let mut source = MockFormsApi::new();
    source.add_submission("353517", submission(42));
    source.fail_auth = true;

    let mut orchestrator = SyncOrchestrator::new(
        source,
        MemoryRowWriter::new(),
        dir.path().to_path_buf(),
        false,
    );
    let err = orchestrator
        .run(&[combustion_template()])
        .await
        .unwrap_err();
    let (source, writer) = orchestrator.into_parts();

    assert!(err.to_string().contains("authentication failed"));
    assert_eq!(source.calls, vec!["authenticate".to_string()]);
    assert_eq!(writer.attempts, 0);
    assert_eq!(source.unread_count("353517"), 1);
}

#[tokio::test]
async fn test_idempotent_retry_after_ack_failure() {
    let dir = mapping_dir();
    let mut source = MockFormsApi::new();
    source.add_submission("353517", submission(42));
    source.fail_mark_read = 1;

    // Run 1: the row is durably written but the acknowledgment call dies.
    let mut orchestrator = SyncOrchestrator::new(
        source,
        MemoryRowWriter::new(),
        dir.path().to_path_buf(),
        false,
    );
    let report = orchestrator.run(&[combustion_template()]).await.unwrap();
    let (source, writer) = orchestrator.into_parts();

    assert_eq!(report.forms[0].persisted, 1);
    assert_eq!(report.forms[0].acknowledged, 0);
    assert!(report.forms[0].ack_error.is_some());
    assert_eq!(writer.row_count("controlecombustion"), 1);
    assert!(!source.is_read("353517", 42));

    // Run 2 against the pre-seeded destination: the record is re-fetched,
    // the re-insert is absorbed by the unique key, and the acknowledgment
    // finally lands. Exactly one row for id 42.
    let mut orchestrator =
        SyncOrchestrator::new(source, writer, dir.path().to_path_buf(), false);
    let report = orchestrator.run(&[combustion_template()]).await.unwrap();
    let (source, writer) = orchestrator.into_parts();

    assert_eq!(report.forms[0].fetched, 1);
    assert_eq!(report.forms[0].persisted, 1);
    assert_eq!(report.forms[0].acknowledged, 1);
    assert_eq!(writer.attempts, 2);
    assert_eq!(writer.row_count("controlecombustion"), 1);
    assert!(source.is_read("353517", 42));
    assert_eq!(source.unread_count("353517"), 0);
}

#[tokio::test]
async fn test_fetch_failure_isolates_form_template() {
    let dir = mapping_dir();
    std::fs::write(
        dir.path().join("intervention.json"),
        r#"{"id | int": "id", "col_x | int": "x"}"#,
    )
    .unwrap();

    let mut source = MockFormsApi::new();
    source.add_submission("353517", submission(42));
    source.add_submission(
        "401882",
        json!({"id": "7", "x": 5, "fields": {"a": {"value": 1}}}),
    );
    source.fail_fetch.insert("353517".to_string());

    let templates = vec![
        combustion_template(),
        FormTemplate {
            name: "intervention".to_string(),
            form_id: "401882".to_string(),
        },
    ];

    let mut orchestrator = SyncOrchestrator::new(
        source,
        MemoryRowWriter::new(),
        dir.path().to_path_buf(),
        false,
    );
    let report = orchestrator.run(&templates).await.unwrap();
    let (source, writer) = orchestrator.into_parts();

    assert!(report.forms[0].skipped.is_some());
    assert_eq!(report.forms[1].persisted, 1);
    assert_eq!(writer.row_count("intervention"), 1);
    assert!(source.is_read("401882", 7));
    assert_eq!(source.unread_count("353517"), 1);
}

#[tokio::test]
async fn test_missing_mapping_file_skips_template() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = MockFormsApi::new();
    source.add_submission("353517", submission(42));

    let mut orchestrator = SyncOrchestrator::new(
        source,
        MemoryRowWriter::new(),
        dir.path().to_path_buf(),
        false,
    );
    let report = orchestrator.run(&[combustion_template()]).await.unwrap();
    let (source, writer) = orchestrator.into_parts();

    assert!(report.forms[0].skipped.is_some());
    assert_eq!(writer.attempts, 0);
    // The fetch never happened for the skipped template.
    assert_eq!(source.calls, vec!["authenticate".to_string()]);
}

#[tokio::test]
async fn test_list_forms_reports_remote_models() {
    use forms_sync::FormsSource;

    let mut source = MockFormsApi::new();
    source.add_form("353517", "controlecombustion");
    source.add_form("401882", "intervention");

    source.authenticate().await.unwrap();
    let forms = source.list_forms().await.unwrap();
    assert_eq!(forms.len(), 2);
    assert_eq!(forms[0].id, "353517");
    assert_eq!(forms[0].name, "controlecombustion");
}

#[tokio::test]
async fn test_dry_run_writes_and_acknowledges_nothing() {
    let dir = mapping_dir();
    let mut source = MockFormsApi::new();
    source.add_submission("353517", submission(42));

    let mut orchestrator = SyncOrchestrator::new(
        source,
        MemoryRowWriter::new(),
        dir.path().to_path_buf(),
        true,
    );
    let report = orchestrator.run(&[combustion_template()]).await.unwrap();
    let (source, writer) = orchestrator.into_parts();

    assert_eq!(report.forms[0].fetched, 1);
    assert_eq!(report.forms[0].persisted, 0);
    assert_eq!(writer.attempts, 0);
    assert!(!source.is_read("353517", 42));
}
