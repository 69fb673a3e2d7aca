use std::sync::Arc;

use formtrace::mapper::VendorFieldMap;
use formtrace::replay::{parse_script, run_script, ReplayOptions};
use formtrace::store::SampleStore;
use formtrace::{ChangeOp, Operation};

const FIELD_MAP: &str = r#"{
    "fortigate": {
        "firewall_policy": {
            "identity_field": "policyid",
            "canonical_fields": ["policy_id", "name", "source_interface", "action"],
            "field_map": { "policyid": "policy_id", "srcintf": "source_interface" }
        }
    }
}"#;

async fn replay(script: &str) -> formtrace::recorder::RecorderSummary {
    let steps = parse_script(script).unwrap();
    run_script(&steps, ReplayOptions::default()).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn new_record_is_captured_as_create() {
    let summary = replay(
        r#"
{"op": "render", "container": "dlg-new", "record_type": "firewall_policy", "fields": {"name": "", "srcintf": ""}}
{"op": "poll"}
{"op": "poll"}
{"op": "set", "key": "name", "value": "Allow HTTPS"}
{"op": "set", "key": "srcintf", "value": "port1"}
{"op": "save"}
{"op": "wait", "ms": 400}
"#,
    )
    .await;

    assert_eq!(summary.emitted, 1);
    let sample = &summary.samples[0];
    assert_eq!(sample.metadata.operation, Operation::Create);
    assert!(sample.data.before.is_empty());
    assert_eq!(sample.changes.len(), 2);
    assert!(sample.changes.iter().all(|change| change.op == ChangeOp::Add));
}

#[tokio::test(start_paused = true)]
async fn existing_record_is_captured_as_edit() {
    let summary = replay(
        r#"
{"op": "render", "container": "dlg-42", "record_type": "firewall_policy", "fields": {"id": "42", "name": "Allow HTTP"}}
{"op": "poll", "count": 3}
{"op": "set", "key": "name", "value": "Allow HTTPS"}
{"op": "save"}
{"op": "wait", "ms": 400}
"#,
    )
    .await;

    assert_eq!(summary.emitted, 1);
    let sample = &summary.samples[0];
    assert_eq!(sample.metadata.operation, Operation::Edit);
    assert_eq!(sample.data.before.len(), 2);
    assert_eq!(sample.changes.len(), 1);
    assert_eq!(sample.changes[0].field, "name");
    assert_eq!(sample.changes[0].op, ChangeOp::Set);
}

#[tokio::test(start_paused = true)]
async fn validation_errors_block_the_sample() {
    let summary = replay(
        r#"
{"op": "render", "container": "dlg-new", "record_type": "address", "fields": {"name": ""}}
{"op": "poll"}
{"op": "set", "key": "name", "value": "lan"}
{"op": "save"}
{"op": "validation", "errors": true}
{"op": "wait", "ms": 400}
"#,
    )
    .await;

    assert_eq!(summary.emitted, 0);
    assert_eq!(summary.suppressed.get("validation_blocked"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn resubmit_after_fixing_errors_emits() {
    let summary = replay(
        r#"
{"op": "render", "container": "dlg-new", "record_type": "address", "fields": {"name": ""}}
{"op": "poll"}
{"op": "set", "key": "name", "value": "lan"}
{"op": "save"}
{"op": "validation", "errors": true}
{"op": "wait", "ms": 400}
{"op": "validation", "errors": false}
{"op": "set", "key": "subnet", "value": "10.0.0.0/24"}
{"op": "save"}
{"op": "wait", "ms": 400}
"#,
    )
    .await;

    assert_eq!(summary.suppressed.get("validation_blocked"), Some(&1));
    assert_eq!(summary.emitted, 1);
}

#[tokio::test(start_paused = true)]
async fn unload_during_grace_finalizes_once() {
    let summary = replay(
        r#"
{"op": "render", "container": "dlg-new", "record_type": "address", "fields": {"name": ""}}
{"op": "poll"}
{"op": "set", "key": "name", "value": "lan"}
{"op": "save"}
{"op": "validation", "errors": true}
{"op": "unload"}
{"op": "wait", "ms": 6000}
"#,
    )
    .await;

    // Unload skips the validation check and the grace timer never fires after it.
    assert_eq!(summary.emitted, 1);
    assert!(summary.suppressed.is_empty());
}

#[tokio::test(start_paused = true)]
async fn script_end_flushes_pending_commit() {
    let summary = replay(
        r#"
{"op": "render", "container": "dlg-new", "record_type": "address", "fields": {"name": ""}}
{"op": "set", "key": "name", "value": "lan"}
{"op": "save"}
"#,
    )
    .await;
    assert_eq!(summary.emitted, 1);
}

#[tokio::test(start_paused = true)]
async fn unchanged_save_is_a_no_op() {
    let summary = replay(
        r#"
{"op": "render", "container": "dlg-42", "record_type": "firewall_policy", "fields": {"id": "42", "name": "Allow HTTP"}}
{"op": "poll", "count": 3}
{"op": "save"}
{"op": "wait", "ms": 400}
"#,
    )
    .await;

    assert_eq!(summary.emitted, 0);
    assert_eq!(summary.suppressed.get("no_op_commit"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn late_hydration_before_freeze_stays_in_baseline() {
    let summary = replay(
        r#"
{"op": "render", "container": "dlg-42", "record_type": "firewall_policy", "fields": {"id": "42"}}
{"op": "poll"}
{"op": "hydrate", "key": "name", "value": "Allow HTTP"}
{"op": "hydrate", "key": "action", "value": "accept"}
{"op": "poll", "count": 3}
{"op": "set", "key": "action", "value": "deny"}
{"op": "save"}
{"op": "wait", "ms": 400}
"#,
    )
    .await;

    let sample = &summary.samples[0];
    assert_eq!(sample.metadata.operation, Operation::Edit);
    assert_eq!(sample.data.before.len(), 3);
    assert_eq!(sample.changes.len(), 1);
    assert_eq!(sample.changes[0].field, "action");
}

#[tokio::test(start_paused = true)]
async fn live_loop_freezes_without_explicit_polls() {
    let steps = parse_script(
        r#"
{"op": "render", "container": "dlg-42", "record_type": "firewall_policy", "fields": {"id": "42", "name": "Allow HTTP"}}
{"op": "wait", "ms": 2000}
{"op": "set", "key": "name", "value": "Allow HTTPS"}
{"op": "save"}
{"op": "wait", "ms": 400}
"#,
    )
    .unwrap();
    let summary = run_script(
        &steps,
        ReplayOptions {
            live: true,
            ..ReplayOptions::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(summary.emitted, 1);
    assert_eq!(summary.samples[0].metadata.operation, Operation::Edit);
}

#[tokio::test(start_paused = true)]
async fn mapped_samples_land_in_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = SampleStore::open(dir.path().join("samples.db")).unwrap();
    let field_map = VendorFieldMap::from_json(FIELD_MAP).unwrap();

    let mut options = ReplayOptions {
        store: Some(store.clone()),
        ..ReplayOptions::default()
    };
    options
        .settings
        .merge_identity_fields(field_map.identity_fields("fortigate"));
    options.field_map = Arc::new(field_map);

    let steps = parse_script(
        r#"
{"op": "render", "container": "dlg-7", "record_type": "firewall_policy", "fields": {"policyid": "7", "name": "web", "srcintf": "port1", "q_origin_key": "7"}}
{"op": "poll", "count": 3}
{"op": "set", "key": "srcintf", "value": "port2"}
{"op": "save"}
{"op": "wait", "ms": 400}
"#,
    )
    .unwrap();
    let summary = run_script(&steps, options).await.unwrap();
    assert_eq!(summary.emitted, 1);

    let stored = store.list_samples(None).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].label, "FIREWALL_POLICY EDIT");
    let keys: Vec<&String> = stored[0].sample.data.before.keys().collect();
    assert_eq!(keys, vec!["name", "policy_id", "source_interface"]);
    assert_eq!(stored[0].sample.changes[0].field, "source_interface");

    let out = dir.path().join("export.json");
    assert_eq!(store.export_json(&out).await.unwrap(), 1);
}
