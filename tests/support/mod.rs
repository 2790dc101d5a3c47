#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use designmypdf::application::background::BackgroundTasks;
use designmypdf::application::export::Rasterizer;
use designmypdf::application::pipeline::{
    GenerateCommand, GenerationPipeline, PipelineConfig, PipelineDeps,
};
use designmypdf::application::publish::{ObjectStorage, StorageError};
use designmypdf::application::render::{HandlebarsEngine, TemplateEngine};
use designmypdf::application::repos::{
    AccessKeysRepo, GenerationLogsRepo, RepoError, TemplatesRepo,
};
use designmypdf::application::stage::EngineError;
use designmypdf::cache::CacheConfig;
use designmypdf::domain::access_keys::AccessKeyRecord;
use designmypdf::domain::generation_logs::NewGenerationLog;
use designmypdf::domain::page_format::PageFormat;
use designmypdf::domain::templates::TemplateRecord;

pub const KEY_VALUE: &str = "dmp_live_key";
pub const KEY_ID: i64 = 11;
pub const TEMPLATE_ID: i64 = 42;
pub const PDF_MAGIC: &[u8] = b"%PDF-1.4\n";

pub fn access_key(id: i64, value: &str, usage_count: i64, usage_limit: i64) -> AccessKeyRecord {
    AccessKeyRecord {
        id,
        name: format!("key-{id}"),
        value: value.to_string(),
        usage_count,
        usage_limit,
        owner_id: 1,
        created_at: OffsetDateTime::UNIX_EPOCH,
        updated_at: OffsetDateTime::UNIX_EPOCH,
    }
}

pub fn template(id: i64, content: &str) -> TemplateRecord {
    TemplateRecord {
        id,
        uuid: Uuid::new_v4(),
        name: format!("template-{id}"),
        content: content.to_string(),
        fonts: Vec::new(),
        namespace_id: None,
        created_at: OffsetDateTime::UNIX_EPOCH,
        updated_at: OffsetDateTime::UNIX_EPOCH,
    }
}

#[derive(Default)]
pub struct MemoryKeys {
    keys: Mutex<HashMap<String, AccessKeyRecord>>,
    fail_increment: bool,
    fail_lookup: bool,
}

impl MemoryKeys {
    pub fn with(records: impl IntoIterator<Item = AccessKeyRecord>) -> Self {
        Self {
            keys: Mutex::new(
                records
                    .into_iter()
                    .map(|record| (record.value.clone(), record))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn failing_increment(mut self) -> Self {
        self.fail_increment = true;
        self
    }

    pub fn failing_lookup(mut self) -> Self {
        self.fail_lookup = true;
        self
    }

    pub async fn usage(&self, value: &str) -> i64 {
        self.keys
            .lock()
            .await
            .get(value)
            .map(|record| record.usage_count)
            .unwrap_or_default()
    }
}

#[async_trait]
impl AccessKeysRepo for MemoryKeys {
    async fn find_by_value(&self, value: &str) -> Result<Option<AccessKeyRecord>, RepoError> {
        if self.fail_lookup {
            return Err(RepoError::Timeout);
        }
        Ok(self.keys.lock().await.get(value).cloned())
    }

    async fn increment_usage(&self, id: i64) -> Result<(), RepoError> {
        if self.fail_increment {
            return Err(RepoError::from_persistence("connection reset"));
        }
        let mut keys = self.keys.lock().await;
        let record = keys
            .values_mut()
            .find(|record| record.id == id)
            .ok_or(RepoError::NotFound)?;
        record.usage_count += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTemplates {
    templates: Vec<TemplateRecord>,
}

impl MemoryTemplates {
    pub fn with(templates: impl IntoIterator<Item = TemplateRecord>) -> Self {
        Self {
            templates: templates.into_iter().collect(),
        }
    }
}

#[async_trait]
impl TemplatesRepo for MemoryTemplates {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<TemplateRecord>, RepoError> {
        Ok(self
            .templates
            .iter()
            .find(|template| template.uuid == uuid)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryLogs {
    entries: Mutex<Vec<NewGenerationLog>>,
    fail_append: bool,
}

impl MemoryLogs {
    pub fn failing_append() -> Self {
        Self {
            fail_append: true,
            ..Self::default()
        }
    }

    pub async fn entries(&self) -> Vec<NewGenerationLog> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl GenerationLogsRepo for MemoryLogs {
    async fn append(&self, entry: NewGenerationLog) -> Result<(), RepoError> {
        if self.fail_append {
            return Err(RepoError::from_persistence("relation \"generation_logs\" is locked"));
        }
        self.entries.lock().await.push(entry);
        Ok(())
    }
}

/// Handlebars behind a call counter.
#[derive(Default)]
pub struct CountingEngine {
    inner: HandlebarsEngine,
    calls: AtomicUsize,
}

impl CountingEngine {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TemplateEngine for CountingEngine {
    fn render(&self, content: &str, data: &Value) -> Result<String, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.render(content, data)
    }
}

/// Blocks its worker thread for `delay` before answering.
pub struct StallingEngine {
    pub delay: Duration,
}

impl TemplateEngine for StallingEngine {
    fn render(&self, content: &str, _data: &Value) -> Result<String, EngineError> {
        std::thread::sleep(self.delay);
        Ok(content.to_string())
    }
}

pub struct FailingEngine;

impl TemplateEngine for FailingEngine {
    fn render(&self, _content: &str, _data: &Value) -> Result<String, EngineError> {
        Err(EngineError::new("unclosed block helper"))
    }
}

/// Writes a small PDF containing the rendered html so tests can inspect it.
#[derive(Default)]
pub struct FakeRasterizer {
    calls: AtomicUsize,
    formats: std::sync::Mutex<Vec<PageFormat>>,
}

impl FakeRasterizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn formats(&self) -> Vec<PageFormat> {
        self.formats
            .lock()
            .map(|formats| formats.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        html: &str,
        format: PageFormat,
        output: &Path,
    ) -> Result<(), EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut formats) = self.formats.lock() {
            formats.push(format);
        }
        let mut bytes = PDF_MAGIC.to_vec();
        bytes.extend_from_slice(html.as_bytes());
        tokio::fs::write(output, bytes)
            .await
            .map_err(|err| EngineError::new(err.to_string()))
    }
}

pub struct StallingRasterizer {
    pub delay: Duration,
}

#[async_trait]
impl Rasterizer for StallingRasterizer {
    async fn rasterize(
        &self,
        _html: &str,
        _format: PageFormat,
        _output: &Path,
    ) -> Result<(), EngineError> {
        tokio::time::sleep(self.delay).await;
        Err(EngineError::new("stalled rasterizer gave up"))
    }
}

/// Writes the PDF, but only after `delay`.
pub struct LateRasterizer {
    pub delay: Duration,
}

#[async_trait]
impl Rasterizer for LateRasterizer {
    async fn rasterize(
        &self,
        _html: &str,
        _format: PageFormat,
        output: &Path,
    ) -> Result<(), EngineError> {
        tokio::time::sleep(self.delay).await;
        tokio::fs::write(output, PDF_MAGIC)
            .await
            .map_err(|err| EngineError::new(err.to_string()))
    }
}

pub struct FailingRasterizer;

#[async_trait]
impl Rasterizer for FailingRasterizer {
    async fn rasterize(
        &self,
        _html: &str,
        _format: PageFormat,
        _output: &Path,
    ) -> Result<(), EngineError> {
        Err(EngineError::new("chromium exited with status 1"))
    }
}

/// Keeps uploaded objects in memory and hands out fake CDN URLs.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: AtomicUsize,
}

impl MemoryStorage {
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub async fn object(&self, remote: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(remote).cloned()
    }

    pub async fn remotes(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }
}

pub const CDN_BASE: &str = "https://cdn.test/";

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(&self, local: &Path, remote: &str) -> Result<String, StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let bytes = tokio::fs::read(local).await?;
        self.objects.lock().await.insert(remote.to_string(), bytes);
        Ok(format!("{CDN_BASE}{remote}"))
    }
}

/// Memory storage behind a slow link.
pub struct SlowStorage {
    pub delay: Duration,
    pub inner: MemoryStorage,
}

impl SlowStorage {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: MemoryStorage::default(),
        }
    }
}

#[async_trait]
impl ObjectStorage for SlowStorage {
    async fn upload(&self, local: &Path, remote: &str) -> Result<String, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.upload(local, remote).await
    }
}

pub struct FailingStorage;

#[async_trait]
impl ObjectStorage for FailingStorage {
    async fn upload(&self, _local: &Path, _remote: &str) -> Result<String, StorageError> {
        Err(StorageError::Rejected("403 Forbidden".to_string()))
    }
}

/// A pipeline wired to in-memory collaborators. Swap any of the `Arc`s before
/// calling [`Harness::build`].
pub struct Harness {
    pub keys: Arc<MemoryKeys>,
    pub templates: Arc<MemoryTemplates>,
    pub logs: Arc<MemoryLogs>,
    pub engine: Arc<dyn TemplateEngine>,
    pub rasterizer: Arc<dyn Rasterizer>,
    pub storage: Arc<dyn ObjectStorage>,
    pub config: PipelineConfig,
    pub work_dir: TempDir,
    pub template: TemplateRecord,
}

impl Harness {
    /// One key with `usage_limit` and one "Hello {{name}}" template.
    pub fn new(usage_limit: i64) -> Self {
        let template = template(TEMPLATE_ID, "<p>Hello {{name}}</p>");
        let work_dir = tempfile::tempdir().expect("work dir");
        let config = PipelineConfig {
            render_timeout: Duration::from_secs(2),
            export_timeout: Duration::from_secs(2),
            request_deadline: Duration::from_secs(10),
            cleanup_delay: Duration::from_millis(10),
            work_dir: work_dir.path().join("template"),
            cache: CacheConfig::default(),
        };
        Self {
            keys: Arc::new(MemoryKeys::with([access_key(
                KEY_ID, KEY_VALUE, 0, usage_limit,
            )])),
            templates: Arc::new(MemoryTemplates::with([template.clone()])),
            logs: Arc::new(MemoryLogs::default()),
            engine: Arc::new(HandlebarsEngine::new()),
            rasterizer: Arc::new(FakeRasterizer::default()),
            storage: Arc::new(MemoryStorage::default()),
            config,
            work_dir,
            template,
        }
    }

    pub fn build(&self) -> GenerationPipeline {
        GenerationPipeline::new(
            PipelineDeps {
                keys: self.keys.clone(),
                templates: self.templates.clone(),
                logs: self.logs.clone(),
                engine: self.engine.clone(),
                rasterizer: self.rasterizer.clone(),
                storage: self.storage.clone(),
            },
            self.config.clone(),
            BackgroundTasks::new(),
        )
    }

    pub fn command(&self, body: &str) -> GenerateCommand {
        GenerateCommand {
            key_value: Some(KEY_VALUE.to_string()),
            template_id: Some(self.template.uuid.to_string()),
            format: None,
            body: body.to_string().into(),
            request_id: Some("test-request".to_string()),
        }
    }

    /// Files currently sitting in the pipeline work directory.
    pub fn work_files(&self) -> Vec<std::path::PathBuf> {
        match std::fs::read_dir(&self.config.work_dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
