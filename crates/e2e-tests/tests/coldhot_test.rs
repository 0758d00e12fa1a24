//! Cold/hot builds indexed through the manager's indexer selection.

use pretty_assertions::assert_eq;
use serde_json::json;

use e2e_tests::{default_mapping, TestHarness, ENV};
use hub_indexing::{IndexRequest, IndexerError};
use hub_types::{BuildConfig, IndexMode, IndexSteps, JobStatus};

async fn cold_hot(harness: &TestHarness) {
    harness.add_build("genes_cold", "g", 30).await;
    harness
        .add_build_with(
            "genes_hot",
            "g",
            10,
            BuildConfig {
                cold_collection: Some("genes_cold".to_string()),
                ..BuildConfig::default()
            },
            json!({"symbol": {"type": "text"}, "expression": {"type": "float"}}),
        )
        .await;
    harness
        .storage
        .put_documents(
            "genes_cold",
            &[json!({"_id": "g00001", "symbol": "COLD", "cold_only": true})
                .as_object()
                .cloned()
                .unwrap()],
        )
        .unwrap();
    harness
        .storage
        .put_documents(
            "genes_hot",
            &[json!({"_id": "g00001", "symbol": "HOT", "expression": 2.5})
                .as_object()
                .cloned()
                .unwrap()],
        )
        .unwrap();
}

#[tokio::test]
async fn test_hot_build_merges_over_cold() {
    let harness = TestHarness::new();
    cold_hot(&harness).await;

    let report = harness
        .manager
        .index(ENV, IndexRequest::new("genes_hot").with_batch_size(7))
        .await
        .unwrap()
        .await
        .unwrap()
        .unwrap();

    // 30 cold writes, then 10 hot merges
    assert_eq!(report.count, 40);
    assert_eq!(report.index_name, "genes_hot");
    assert_eq!(harness.engine.doc_count("genes_hot"), 30);

    let merged = harness.engine.doc("genes_hot", "g00001").unwrap();
    assert_eq!(merged["symbol"], json!("HOT"));
    assert_eq!(merged["expression"], json!(2.5));
    assert_eq!(merged["cold_only"], json!(true));
    let cold_only = harness.engine.doc("genes_hot", "g00025").unwrap();
    assert_eq!(cold_only["symbol"], json!("SYMg00025"));

    let mapping = harness.engine.index("genes_hot").unwrap().mapping;
    assert_eq!(mapping["properties"]["symbol"], json!({"type": "text"}));
    assert_eq!(mapping["properties"]["name"], default_mapping()["name"]);
    assert_eq!(mapping["properties"]["expression"], json!({"type": "float"}));
    assert_eq!(mapping["_meta"]["build_version"], json!("genes_hot_v1"));

    let hot = harness.build("genes_hot").await;
    assert_eq!(hot.last_job().unwrap().status, JobStatus::Success);
    assert_eq!(hot.index["genes_hot"].count, Some(40));
    let cold = harness.build("genes_cold").await;
    assert!(cold.jobs.is_empty());
    assert!(cold.index.is_empty());
}

#[tokio::test]
async fn test_cold_failure_stops_before_hot() {
    let engine = hub_search::MemoryEngine::new().with_failing_ids(["g00020"]);
    let harness = TestHarness::with_engine(engine);
    cold_hot(&harness).await;

    let err = harness
        .manager
        .index(
            ENV,
            IndexRequest::new("genes_hot")
                .with_batch_size(10)
                .with_steps(IndexSteps::index_only()),
        )
        .await
        .unwrap()
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, IndexerError::BatchFailure { .. }));
    // the hot value never reached the index
    let doc = harness.engine.doc("genes_hot", "g00001").unwrap();
    assert_eq!(doc["symbol"], json!("COLD"));
    let hot = harness.build("genes_hot").await;
    let job = hot.last_job().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.err.is_some());
}

#[tokio::test]
async fn test_resume_repeats_only_hot_merge() {
    let harness = TestHarness::new();
    cold_hot(&harness).await;
    let request = || {
        IndexRequest::new("genes_hot")
            .with_index_name("genes_current")
            .with_mode(IndexMode::Resume)
            .with_steps(IndexSteps::index_only())
    };

    let first = harness
        .manager
        .index(ENV, request())
        .await
        .unwrap()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.count, 40);

    let second = harness
        .manager
        .index(ENV, request())
        .await
        .unwrap()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.count, 10);
    assert_eq!(harness.engine.doc_count("genes_current"), 30);
}
