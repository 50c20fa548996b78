use doc_verify::model::{JobSnapshot, JobStatus};
use doc_verify::progress::normalize;

fn job(value: serde_json::Value) -> JobSnapshot {
    serde_json::from_value(value).expect("snapshot")
}

#[test]
fn processed_over_total_wins() {
    let j = job(serde_json::json!({
        "status": "processing",
        "processedFiles": 1,
        "totalFiles": 3,
        "results": [{"status": "valid"}],
        "files": [{}, {}],
        "progress": 90,
    }));
    assert_eq!(normalize(&j, 0), 33);
}

#[test]
fn zero_total_falls_through_without_dividing() {
    let j = job(serde_json::json!({
        "status": "processing",
        "processedFiles": 0,
        "totalFiles": 0,
        "results": [{"status": "valid"}],
        "files": [{}, {}],
    }));
    assert_eq!(normalize(&j, 7), 50);

    let j = job(serde_json::json!({
        "status": "processing",
        "processedFiles": 0,
        "totalFiles": 0,
        "progress": 40,
    }));
    assert_eq!(normalize(&j, 7), 40);

    let j = job(serde_json::json!({
        "status": "processing",
        "processedFiles": 0,
        "totalFiles": 0,
    }));
    assert_eq!(normalize(&j, 7), 7);
}

#[test]
fn results_over_files_needs_non_empty_files() {
    let j = job(serde_json::json!({
        "status": "processing",
        "results": [],
        "files": [],
        "progress": 12.6,
    }));
    assert_eq!(normalize(&j, 0), 13);
}

#[test]
fn no_signal_keeps_previous_value() {
    let j = JobSnapshot::new("J1", JobStatus::Processing);
    assert_eq!(normalize(&j, 64), 64);
}

#[test]
fn rounds_half_up_and_clamps() {
    let j = job(serde_json::json!({"status": "processing", "processedFiles": 1, "totalFiles": 8}));
    assert_eq!(normalize(&j, 0), 13);

    let j = job(serde_json::json!({"status": "processing", "progress": 250}));
    assert_eq!(normalize(&j, 0), 100);

    let j = job(serde_json::json!({"status": "processing", "progress": -3}));
    assert_eq!(normalize(&j, 50), 0);
}

#[test]
fn non_decreasing_across_a_cycle() {
    let polls = [
        serde_json::json!({"status": "pending"}),
        serde_json::json!({"status": "processing", "processedFiles": 0, "totalFiles": 4}),
        serde_json::json!({"status": "processing", "processedFiles": 1, "totalFiles": 4}),
        serde_json::json!({"status": "processing"}),
        serde_json::json!({"status": "processing", "results": [{}, {}, {}], "files": [{}, {}, {}, {}]}),
        serde_json::json!({"status": "completed", "processedFiles": 4, "totalFiles": 4}),
    ];

    let mut pct = 0;
    let mut seen = Vec::new();
    for p in polls {
        pct = normalize(&job(p), pct);
        seen.push(pct);
    }
    assert_eq!(seen, vec![0, 0, 25, 25, 75, 100]);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
}
