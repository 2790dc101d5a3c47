//! Orchestrates one PDF generation request.
//!
//! States run in order: admitting the key, resolving the template, parsing the
//! payload, checking the fingerprint cache, then either serving the cached URL
//! or rendering, exporting and publishing. Every exit, successful or not,
//! produces exactly one audit record. The whole run is bounded by the request
//! deadline.

mod error;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheConfig, ContentFingerprint, FingerprintCache};
use crate::domain::generation_logs::{NewGenerationLog, UNRESOLVED_ID};
use crate::domain::page_format::PageFormat;
use crate::domain::templates::TemplateRecord;

use super::audit::AuditSink;
use super::background::BackgroundTasks;
use super::export::{ExportStage, Rasterizer};
use super::publish::{ObjectStorage, PublishStage};
use super::quota::{KeyHandle, QuotaGate};
use super::render::{RenderStage, TemplateEngine};
use super::repos::{AccessKeysRepo, GenerationLogsRepo, TemplatesRepo};
use super::stage::StageError;

pub use error::{PipelineError, ResolutionError};

const SOURCE: &str = "application::pipeline";

pub(crate) const METRIC_PIPELINE_REQUESTS: &str = "designmypdf_pipeline_requests_total";
pub(crate) const METRIC_PIPELINE_STAGE_MS: &str = "designmypdf_pipeline_stage_ms";

/// Collaborators the pipeline drives.
#[derive(Clone)]
pub struct PipelineDeps {
    pub keys: Arc<dyn AccessKeysRepo>,
    pub templates: Arc<dyn TemplatesRepo>,
    pub logs: Arc<dyn GenerationLogsRepo>,
    pub engine: Arc<dyn TemplateEngine>,
    pub rasterizer: Arc<dyn Rasterizer>,
    pub storage: Arc<dyn ObjectStorage>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub render_timeout: Duration,
    pub export_timeout: Duration,
    pub request_deadline: Duration,
    pub cleanup_delay: Duration,
    pub work_dir: PathBuf,
    pub cache: CacheConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            render_timeout: Duration::from_secs(5),
            export_timeout: Duration::from_secs(15),
            request_deadline: Duration::from_secs(30),
            cleanup_delay: Duration::from_millis(500),
            work_dir: PathBuf::from("uploads/template"),
            cache: CacheConfig::default(),
        }
    }
}

/// One generation request as received from the transport.
#[derive(Debug, Clone, Default)]
pub struct GenerateCommand {
    pub key_value: Option<String>,
    pub template_id: Option<String>,
    pub format: Option<String>,
    pub body: Bytes,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub url: String,
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    AdmittingKey,
    ResolvingTemplate,
    ParsingPayload,
    CheckingCache,
    CacheHit,
    Rendering,
    Exporting,
    Publishing,
    Done,
    Failed,
}

impl PipelineState {
    fn as_str(self) -> &'static str {
        match self {
            Self::AdmittingKey => "admitting_key",
            Self::ResolvingTemplate => "resolving_template",
            Self::ParsingPayload => "parsing_payload",
            Self::CheckingCache => "checking_cache",
            Self::CacheHit => "cache_hit",
            Self::Rendering => "rendering",
            Self::Exporting => "exporting",
            Self::Publishing => "publishing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Ids resolved so far, recorded in the audit entry whatever the outcome.
#[derive(Debug, Clone, Copy)]
struct AuditTrail {
    key_id: i64,
    template_id: i64,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self {
            key_id: UNRESOLVED_ID,
            template_id: UNRESOLVED_ID,
        }
    }
}

#[derive(Clone)]
pub struct GenerationPipeline {
    quota: QuotaGate,
    templates: Arc<dyn TemplatesRepo>,
    cache: Arc<FingerprintCache>,
    render: RenderStage,
    export: ExportStage,
    publish: PublishStage,
    audit: AuditSink,
    tasks: BackgroundTasks,
    deadline: Duration,
}

impl GenerationPipeline {
    pub fn new(deps: PipelineDeps, config: PipelineConfig, tasks: BackgroundTasks) -> Self {
        let quota = QuotaGate::new(deps.keys);
        let cache = Arc::new(FingerprintCache::new(&config.cache));
        Self {
            render: RenderStage::new(deps.engine, config.render_timeout),
            export: ExportStage::new(
                deps.rasterizer,
                config.export_timeout,
                config.work_dir,
                tasks.clone(),
            ),
            publish: PublishStage::new(
                deps.storage,
                quota.clone(),
                cache.clone(),
                tasks.clone(),
                config.cleanup_delay,
            ),
            audit: AuditSink::new(deps.logs, tasks.clone()),
            templates: deps.templates,
            quota,
            cache,
            tasks,
            deadline: config.request_deadline,
        }
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.cache
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Run the pipeline under the request deadline and audit the outcome.
    pub async fn generate(
        &self,
        command: GenerateCommand,
    ) -> Result<GeneratedArtifact, PipelineError> {
        let started_at = Instant::now();
        let called_at = OffsetDateTime::now_utc();
        let request_id = command.request_id.clone().unwrap_or_default();
        let mut trail = AuditTrail::default();

        let outcome =
            match tokio::time::timeout(self.deadline, self.run(&command, &mut trail)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(PipelineError::DeadlineExceeded(self.deadline)),
            };

        let entry = match &outcome {
            Ok(artifact) => {
                self.transition(&request_id, PipelineState::Done);
                NewGenerationLog {
                    key_id: trail.key_id,
                    template_id: trail.template_id,
                    called_at,
                    request_body: audit_body(&command.body),
                    response_body: json!({ "path": artifact.url }),
                    status_code: 200,
                    error_message: String::new(),
                }
            }
            Err(err) => {
                self.transition(&request_id, PipelineState::Failed);
                NewGenerationLog {
                    key_id: trail.key_id,
                    template_id: trail.template_id,
                    called_at,
                    request_body: audit_body(&command.body),
                    response_body: json!({ "message": err.public_message() }),
                    status_code: err.status().as_u16(),
                    error_message: err.detail(),
                }
            }
        };
        let status = entry.status_code;
        self.audit.record(entry);

        counter!(METRIC_PIPELINE_REQUESTS, "status" => status.to_string()).increment(1);
        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        match &outcome {
            Ok(artifact) => info!(
                target = SOURCE,
                op = "generate",
                result = "ok",
                request_id = %request_id,
                key_id = trail.key_id,
                template_id = trail.template_id,
                cached = artifact.cached,
                elapsed_ms,
                "PDF generated"
            ),
            Err(err) => warn!(
                target = SOURCE,
                op = "generate",
                result = "error",
                request_id = %request_id,
                key_id = trail.key_id,
                template_id = trail.template_id,
                status,
                error_kind = err.kind(),
                error = %err.detail(),
                elapsed_ms,
                "PDF generation failed"
            ),
        }

        outcome
    }

    async fn run(
        &self,
        command: &GenerateCommand,
        trail: &mut AuditTrail,
    ) -> Result<GeneratedArtifact, PipelineError> {
        let request_id = command.request_id.as_deref().unwrap_or_default();

        self.transition(request_id, PipelineState::AdmittingKey);
        let key = match self.quota.admit(command.key_value.as_deref()).await {
            Ok(key) => key,
            Err(err) => {
                if let Some(key_id) = err.key_id() {
                    trail.key_id = key_id;
                }
                return Err(err.into());
            }
        };
        trail.key_id = key.key_id;

        self.transition(request_id, PipelineState::ResolvingTemplate);
        let template = self.resolve_template(command.template_id.as_deref()).await?;
        trail.template_id = template.id;

        self.transition(request_id, PipelineState::ParsingPayload);
        let payload = parse_payload(&command.body)?;
        let format =
            PageFormat::parse_or_default(command.format.as_deref()).map_err(ResolutionError::Format)?;

        self.transition(request_id, PipelineState::CheckingCache);
        let fingerprint = ContentFingerprint::compute(&template.content, &payload, format);
        if let Some(url) = self.cache.lookup(&fingerprint) {
            self.transition(request_id, PipelineState::CacheHit);
            self.record_usage_detached(key);
            return Ok(GeneratedArtifact { url, cached: true });
        }

        self.transition(request_id, PipelineState::Rendering);
        let stage_started = Instant::now();
        let html = self
            .render
            .render(&template, &payload, format)
            .await
            .map_err(|err| match err {
                StageError::Timeout(limit) => PipelineError::RenderTimeout(limit),
                StageError::Failed(engine) => PipelineError::RenderError(engine),
            })?;
        record_stage("render", stage_started);

        self.transition(request_id, PipelineState::Exporting);
        let stage_started = Instant::now();
        let artifact = self
            .export
            .export(html, format)
            .await
            .map_err(|err| match err {
                StageError::Timeout(limit) => PipelineError::ExportTimeout(limit),
                StageError::Failed(engine) => PipelineError::ExportError(engine),
            })?;
        record_stage("export", stage_started);

        self.transition(request_id, PipelineState::Publishing);
        let stage_started = Instant::now();
        let url = self
            .publish
            .publish(artifact, key, fingerprint)
            .await
            .map_err(PipelineError::UploadError)?;
        record_stage("publish", stage_started);

        Ok(GeneratedArtifact { url, cached: false })
    }

    async fn resolve_template(
        &self,
        template_id: Option<&str>,
    ) -> Result<TemplateRecord, ResolutionError> {
        let raw = template_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ResolutionError::MissingTemplateId)?;
        // An id that is not a uuid cannot name any template.
        let uuid =
            Uuid::parse_str(raw).map_err(|_| ResolutionError::TemplateNotFound(raw.to_string()))?;

        self.templates
            .find_by_uuid(uuid)
            .await
            .map_err(ResolutionError::Store)?
            .ok_or_else(|| ResolutionError::TemplateNotFound(raw.to_string()))
    }

    fn record_usage_detached(&self, key: KeyHandle) {
        let quota = self.quota.clone();
        self.tasks.spawn("cache_hit_usage", async move {
            if let Err(err) = quota.record_usage(&key).await {
                warn!(
                    target = SOURCE,
                    op = "record_usage",
                    result = "error",
                    key_id = key.key_id,
                    error = %err,
                    "failed to record key usage for cached artifact"
                );
            }
        });
    }

    fn transition(&self, request_id: &str, state: PipelineState) {
        debug!(
            target = SOURCE,
            request_id = %request_id,
            state = state.as_str(),
            "pipeline transition"
        );
    }
}

/// Request body as stored text. Invalid UTF-8 is replaced and NUL bytes are
/// dropped, since Postgres `TEXT` rejects them.
fn audit_body(body: &[u8]) -> String {
    String::from_utf8_lossy(body).replace('\0', "")
}

/// The body must be a JSON object; an empty body counts as `{}`.
fn parse_payload(body: &[u8]) -> Result<Map<String, Value>, ResolutionError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ResolutionError::MalformedBody(format!(
            "expected an object, found {}",
            json_kind(&other)
        ))),
        Err(err) => Err(ResolutionError::MalformedBody(err.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn record_stage(stage: &'static str, started_at: Instant) {
    histogram!(METRIC_PIPELINE_STAGE_MS, "stage" => stage)
        .record(started_at.elapsed().as_secs_f64() * 1000.0);
}
