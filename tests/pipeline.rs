//! End-to-end behaviour of the generation pipeline against in-memory
//! collaborators.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use serde_json::json;

use designmypdf::application::pipeline::{PipelineError, ResolutionError};
use designmypdf::application::quota::AdmissionError;
use designmypdf::domain::generation_logs::UNRESOLVED_ID;
use designmypdf::domain::page_format::PageFormat;

use support::{
    CDN_BASE, CountingEngine, FailingEngine, FailingRasterizer, FailingStorage, FakeRasterizer,
    Harness, KEY_ID, KEY_VALUE, LateRasterizer, MemoryKeys, MemoryLogs, MemoryStorage, PDF_MAGIC,
    SlowStorage, StallingEngine, StallingRasterizer, TEMPLATE_ID, access_key,
};

#[tokio::test]
async fn hello_name_is_rendered_exported_and_published() {
    let mut harness = Harness::new(10);
    let rasterizer = Arc::new(FakeRasterizer::default());
    let storage = Arc::new(MemoryStorage::default());
    harness.rasterizer = rasterizer.clone();
    harness.storage = storage.clone();
    let pipeline = harness.build();

    let artifact = pipeline
        .generate(harness.command(r#"{"name":"World"}"#))
        .await
        .expect("generation succeeds");

    assert!(!artifact.cached);
    assert!(artifact.url.starts_with(&format!("{CDN_BASE}templates/")));
    assert!(artifact.url.ends_with(".pdf"));

    let remote = artifact.url.trim_start_matches(CDN_BASE);
    let object = storage.object(remote).await.expect("object uploaded");
    assert!(object.starts_with(PDF_MAGIC));
    let html = String::from_utf8_lossy(&object);
    assert!(html.contains("<p>Hello World</p>"));
    assert!(html.contains("size: A4"));
    assert_eq!(rasterizer.formats(), vec![PageFormat::A4]);

    pipeline.tasks().settle().await;
    assert_eq!(harness.keys.usage(KEY_VALUE).await, 1);

    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 200);
    assert_eq!(logs[0].key_id, KEY_ID);
    assert_eq!(logs[0].template_id, TEMPLATE_ID);
    assert_eq!(logs[0].response_body, json!({ "path": artifact.url }));
    assert_eq!(logs[0].request_body, r#"{"name":"World"}"#);
    assert!(logs[0].error_message.is_empty());
}

#[tokio::test]
async fn published_artifact_is_removed_locally_after_the_grace_delay() {
    let harness = Harness::new(10);
    let pipeline = harness.build();

    pipeline
        .generate(harness.command(r#"{"name":"World"}"#))
        .await
        .expect("generation succeeds");

    pipeline.tasks().settle().await;
    assert!(harness.work_files().is_empty());
}

#[tokio::test]
async fn identical_request_is_served_from_the_cache() {
    let mut harness = Harness::new(10);
    let engine = Arc::new(CountingEngine::default());
    let rasterizer = Arc::new(FakeRasterizer::default());
    let storage = Arc::new(MemoryStorage::default());
    harness.engine = engine.clone();
    harness.rasterizer = rasterizer.clone();
    harness.storage = storage.clone();
    let pipeline = harness.build();

    let first = pipeline
        .generate(harness.command(r#"{"name":"World","n":1}"#))
        .await
        .expect("first generation");
    // Same payload, different key order.
    let second = pipeline
        .generate(harness.command(r#"{"n":1,"name":"World"}"#))
        .await
        .expect("second generation");

    assert!(second.cached);
    assert_eq!(first.url, second.url);
    assert_eq!(engine.calls(), 1);
    assert_eq!(rasterizer.calls(), 1);
    assert_eq!(storage.uploads(), 1);

    pipeline.tasks().settle().await;
    assert_eq!(harness.keys.usage(KEY_VALUE).await, 2);

    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|entry| entry.status_code == 200));
}

#[tokio::test]
async fn different_format_is_a_cache_miss() {
    let mut harness = Harness::new(10);
    let engine = Arc::new(CountingEngine::default());
    harness.engine = engine.clone();
    let pipeline = harness.build();

    pipeline
        .generate(harness.command(r#"{"name":"World"}"#))
        .await
        .expect("a4");
    let mut letter = harness.command(r#"{"name":"World"}"#);
    letter.format = Some("Letter".to_string());
    let artifact = pipeline.generate(letter).await.expect("letter");

    assert!(!artifact.cached);
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn exhausted_quota_skips_every_stage() {
    let mut harness = Harness::new(3);
    harness.keys = Arc::new(MemoryKeys::with([access_key(KEY_ID, KEY_VALUE, 3, 3)]));
    let engine = Arc::new(CountingEngine::default());
    let rasterizer = Arc::new(FakeRasterizer::default());
    let storage = Arc::new(MemoryStorage::default());
    harness.engine = engine.clone();
    harness.rasterizer = rasterizer.clone();
    harness.storage = storage.clone();
    let pipeline = harness.build();

    let err = pipeline
        .generate(harness.command(r#"{"name":"World"}"#))
        .await
        .expect_err("quota exhausted");

    assert!(matches!(
        err,
        PipelineError::Admission(AdmissionError::QuotaExceeded { .. })
    ));
    assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(err.public_message(), "Key usage limit reached");
    assert_eq!(engine.calls(), 0);
    assert_eq!(rasterizer.calls(), 0);
    assert_eq!(storage.uploads(), 0);

    pipeline.tasks().settle().await;
    assert_eq!(harness.keys.usage(KEY_VALUE).await, 3);
    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 429);
    assert_eq!(logs[0].key_id, KEY_ID);
    assert_eq!(logs[0].template_id, UNRESOLVED_ID);
}

#[tokio::test]
async fn stalled_render_times_out_within_margin() {
    let mut harness = Harness::new(10);
    harness.engine = Arc::new(StallingEngine {
        delay: Duration::from_millis(800),
    });
    harness.config.render_timeout = Duration::from_millis(50);
    let rasterizer = Arc::new(FakeRasterizer::default());
    harness.rasterizer = rasterizer.clone();
    let pipeline = harness.build();

    let started = Instant::now();
    let err = pipeline
        .generate(harness.command("{}"))
        .await
        .expect_err("render stalls");

    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(matches!(err, PipelineError::RenderTimeout(_)));
    assert_eq!(err.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(rasterizer.calls(), 0);

    pipeline.tasks().settle().await;
    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 408);
    assert_eq!(
        logs[0].response_body,
        json!({ "message": "Template rendering timeout" })
    );
    assert_eq!(harness.keys.usage(KEY_VALUE).await, 0);
}

#[tokio::test]
async fn stalled_export_times_out_and_leaves_no_file() {
    let mut harness = Harness::new(10);
    harness.rasterizer = Arc::new(StallingRasterizer {
        delay: Duration::from_millis(300),
    });
    harness.config.export_timeout = Duration::from_millis(50);
    let pipeline = harness.build();

    let err = pipeline
        .generate(harness.command("{}"))
        .await
        .expect_err("export stalls");

    assert!(matches!(err, PipelineError::ExportTimeout(_)));
    assert_eq!(err.public_message(), "PDF generation timeout");
    pipeline.tasks().settle().await;
    assert!(harness.work_files().is_empty());

    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 408);
    assert_eq!(
        logs[0].response_body,
        json!({ "message": "PDF generation timeout" })
    );
    assert_eq!(harness.keys.usage(KEY_VALUE).await, 0);
}

#[tokio::test]
async fn late_write_after_export_timeout_is_removed() {
    let mut harness = Harness::new(10);
    harness.rasterizer = Arc::new(LateRasterizer {
        delay: Duration::from_millis(200),
    });
    harness.config.export_timeout = Duration::from_millis(30);
    let pipeline = harness.build();

    let err = pipeline
        .generate(harness.command("{}"))
        .await
        .expect_err("export is too slow");
    assert!(matches!(err, PipelineError::ExportTimeout(_)));

    pipeline.tasks().settle().await;
    assert!(harness.work_files().is_empty());
    assert!(pipeline.cache().is_empty());
}

#[tokio::test]
async fn request_deadline_bounds_the_whole_run() {
    let mut harness = Harness::new(10);
    harness.rasterizer = Arc::new(StallingRasterizer {
        delay: Duration::from_millis(400),
    });
    harness.config.request_deadline = Duration::from_millis(100);
    let pipeline = harness.build();

    let err = pipeline
        .generate(harness.command("{}"))
        .await
        .expect_err("deadline expires");

    assert!(matches!(err, PipelineError::DeadlineExceeded(_)));
    assert_eq!(err.status(), StatusCode::REQUEST_TIMEOUT);

    pipeline.tasks().settle().await;
    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 408);
    assert_eq!(logs[0].key_id, KEY_ID);
    assert_eq!(logs[0].template_id, TEMPLATE_ID);
    assert!(harness.work_files().is_empty());
}

#[tokio::test]
async fn deadline_during_upload_leaves_no_local_file() {
    let mut harness = Harness::new(10);
    let storage = Arc::new(SlowStorage::new(Duration::from_millis(400)));
    harness.storage = storage.clone();
    harness.config.request_deadline = Duration::from_millis(150);
    let pipeline = harness.build();

    let started = Instant::now();
    let err = pipeline
        .generate(harness.command(r#"{"name":"World"}"#))
        .await
        .expect_err("upload outlives the deadline");
    assert!(started.elapsed() < Duration::from_millis(350));
    assert!(matches!(err, PipelineError::DeadlineExceeded(_)));
    assert_eq!(err.public_message(), "Request deadline exceeded");

    // The upload still finishes, and its grace cleanup runs after it.
    pipeline.tasks().settle().await;
    assert!(harness.work_files().is_empty());
    assert_eq!(storage.inner.uploads(), 1);
    assert_eq!(pipeline.cache().len(), 1);

    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 408);
    // The artifact was produced, so the request is billed.
    assert_eq!(harness.keys.usage(KEY_VALUE).await, 1);
}

#[tokio::test]
async fn engine_failures_keep_detail_out_of_the_public_message() {
    let mut harness = Harness::new(10);
    harness.engine = Arc::new(FailingEngine);
    let pipeline = harness.build();

    let err = pipeline
        .generate(harness.command("{}"))
        .await
        .expect_err("engine fails");
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.public_message(), "Template rendering failed");

    pipeline.tasks().settle().await;
    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].error_message.contains("unclosed block helper"));
}

#[tokio::test]
async fn rasterizer_failure_is_an_export_error() {
    let mut harness = Harness::new(10);
    harness.rasterizer = Arc::new(FailingRasterizer);
    let pipeline = harness.build();

    let err = pipeline
        .generate(harness.command("{}"))
        .await
        .expect_err("rasterizer fails");
    assert!(matches!(err, PipelineError::ExportError(_)));
    assert_eq!(err.public_message(), "PDF generation failed");

    pipeline.tasks().settle().await;
    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 500);
    assert_eq!(
        logs[0].response_body,
        json!({ "message": "PDF generation failed" })
    );
    assert!(logs[0].error_message.contains("chromium exited with status 1"));
    assert!(harness.work_files().is_empty());
    assert_eq!(harness.keys.usage(KEY_VALUE).await, 0);
}

#[tokio::test]
async fn upload_failure_removes_the_local_file() {
    let mut harness = Harness::new(10);
    harness.storage = Arc::new(FailingStorage);
    let pipeline = harness.build();

    let err = pipeline
        .generate(harness.command(r#"{"name":"World"}"#))
        .await
        .expect_err("upload fails");

    assert!(matches!(err, PipelineError::UploadError(_)));
    assert_eq!(err.public_message(), "Failed to upload PDF");
    assert!(harness.work_files().is_empty());
    assert!(pipeline.cache().is_empty());

    pipeline.tasks().settle().await;
    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 500);
    assert!(logs[0].error_message.contains("403 Forbidden"));
}

#[tokio::test]
async fn accounting_failure_does_not_fail_the_request() {
    let mut harness = Harness::new(10);
    harness.keys = Arc::new(
        MemoryKeys::with([access_key(KEY_ID, KEY_VALUE, 0, 10)]).failing_increment(),
    );
    let pipeline = harness.build();

    let artifact = pipeline
        .generate(harness.command(r#"{"name":"World"}"#))
        .await
        .expect("generation succeeds");
    assert!(!artifact.cached);
    assert_eq!(pipeline.cache().len(), 1);

    pipeline.tasks().settle().await;
    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 200);
    assert_eq!(logs[0].response_body, json!({ "path": artifact.url }));
    assert_eq!(harness.keys.usage(KEY_VALUE).await, 0);
}

#[tokio::test]
async fn audit_failure_does_not_fail_the_request() {
    let mut harness = Harness::new(10);
    harness.logs = Arc::new(MemoryLogs::failing_append());
    let pipeline = harness.build();

    let artifact = pipeline
        .generate(harness.command(r#"{"name":"World"}"#))
        .await
        .expect("generation succeeds");
    assert!(!artifact.cached);
    assert_eq!(pipeline.cache().len(), 1);

    pipeline.tasks().settle().await;
    assert!(harness.logs.entries().await.is_empty());
    assert_eq!(harness.keys.usage(KEY_VALUE).await, 1);

    let again = pipeline
        .generate(harness.command(r#"{"name":"World"}"#))
        .await
        .expect("served from the cache");
    assert!(again.cached);
    assert_eq!(again.url, artifact.url);
}

#[tokio::test]
async fn nul_bytes_are_dropped_from_the_audited_body() {
    let harness = Harness::new(10);
    let pipeline = harness.build();

    pipeline
        .generate(harness.command("{\"name\":\"Wor\0ld\"}"))
        .await
        .expect_err("raw NUL is not valid JSON");

    pipeline.tasks().settle().await;
    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 400);
    assert!(!logs[0].request_body.contains('\0'));
    assert_eq!(logs[0].request_body, r#"{"name":"World"}"#);
}

#[tokio::test]
async fn key_store_outage_is_a_server_error() {
    let mut harness = Harness::new(10);
    harness.keys = Arc::new(MemoryKeys::default().failing_lookup());
    let pipeline = harness.build();

    let err = pipeline
        .generate(harness.command("{}"))
        .await
        .expect_err("key store down");
    assert!(matches!(
        err,
        PipelineError::Admission(AdmissionError::Unavailable(_))
    ));
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

    pipeline.tasks().settle().await;
    let logs = harness.logs.entries().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 500);
    assert_eq!(
        logs[0].response_body,
        json!({ "message": "Key store unavailable" })
    );
    assert_eq!(logs[0].key_id, UNRESOLVED_ID);
    assert_eq!(logs[0].template_id, UNRESOLVED_ID);
}

#[tokio::test]
async fn every_rejection_is_audited_once_with_its_status() {
    let harness = Harness::new(10);
    let pipeline = harness.build();

    let mut missing_key = harness.command("{}");
    missing_key.key_value = None;
    let mut unknown_key = harness.command("{}");
    unknown_key.key_value = Some("dmp_unknown".to_string());
    let mut missing_template = harness.command("{}");
    missing_template.template_id = None;
    let mut unknown_template = harness.command("{}");
    unknown_template.template_id = Some(uuid::Uuid::new_v4().to_string());
    let mut not_a_uuid = harness.command("{}");
    not_a_uuid.template_id = Some("invoice".to_string());
    let malformed = harness.command("[1,2,3]");
    let mut bad_format = harness.command("{}");
    bad_format.format = Some("B5".to_string());

    let cases = [
        (missing_key, 401, "No key provided", UNRESOLVED_ID, UNRESOLVED_ID),
        (unknown_key, 401, "Invalid key", UNRESOLVED_ID, UNRESOLVED_ID),
        (missing_template, 400, "No template provided", KEY_ID, UNRESOLVED_ID),
        (unknown_template, 404, "Template not found", KEY_ID, UNRESOLVED_ID),
        (not_a_uuid, 404, "Template not found", KEY_ID, UNRESOLVED_ID),
        (malformed, 400, "Invalid request body", KEY_ID, TEMPLATE_ID),
        (bad_format, 400, "Unsupported page format", KEY_ID, TEMPLATE_ID),
    ];
    let expected = cases.len();

    for (command, status, message, key_id, template_id) in cases {
        let err = pipeline.generate(command).await.expect_err(message);
        assert_eq!(err.status().as_u16(), status, "{message}");
        assert_eq!(err.public_message(), message);

        pipeline.tasks().settle().await;
        let logs = harness.logs.entries().await;
        let entry = logs.last().expect("audit entry");
        assert_eq!(entry.status_code, status, "{message}");
        assert_eq!(entry.response_body, json!({ "message": message }));
        assert_eq!(entry.key_id, key_id, "{message}");
        assert_eq!(entry.template_id, template_id, "{message}");
    }

    assert_eq!(harness.logs.entries().await.len(), expected);
    assert_eq!(harness.keys.usage(KEY_VALUE).await, 0);
}

#[tokio::test]
async fn resolution_errors_are_typed() {
    let harness = Harness::new(10);
    let pipeline = harness.build();

    let mut command = harness.command("{}");
    command.template_id = Some("   ".to_string());
    let err = pipeline.generate(command).await.expect_err("blank id");
    assert!(matches!(
        err,
        PipelineError::Resolution(ResolutionError::MissingTemplateId)
    ));
}

#[tokio::test]
async fn format_query_is_case_insensitive() {
    let mut harness = Harness::new(10);
    let rasterizer = Arc::new(FakeRasterizer::default());
    harness.rasterizer = rasterizer.clone();
    let pipeline = harness.build();

    let mut command = harness.command("{}");
    command.format = Some("legal".to_string());
    pipeline.generate(command).await.expect("legal format");

    assert_eq!(rasterizer.formats(), vec![PageFormat::Legal]);
}
