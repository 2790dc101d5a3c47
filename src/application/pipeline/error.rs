use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::application::error::{ErrorReport, error_chain};
use crate::application::publish::StorageError;
use crate::application::quota::AdmissionError;
use crate::application::repos::RepoError;
use crate::application::stage::EngineError;
use crate::domain::error::DomainError;

const SOURCE: &str = "application::pipeline";

/// Failures while locating the template or reading the request.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no template id provided")]
    MissingTemplateId,
    #[error("template `{0}` not found")]
    TemplateNotFound(String),
    #[error("template store unavailable")]
    Store(#[source] RepoError),
    #[error("request body is not a JSON object: {0}")]
    MalformedBody(String),
    #[error(transparent)]
    Format(DomainError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("template rendering timed out after {} ms", .0.as_millis())]
    RenderTimeout(Duration),
    #[error("template rendering failed")]
    RenderError(#[source] EngineError),
    #[error("PDF generation timed out after {} ms", .0.as_millis())]
    ExportTimeout(Duration),
    #[error("PDF generation failed")]
    ExportError(#[source] EngineError),
    #[error("failed to upload PDF")]
    UploadError(#[source] StorageError),
    #[error("request deadline of {} ms exceeded", .0.as_millis())]
    DeadlineExceeded(Duration),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Admission(AdmissionError::MissingKey | AdmissionError::KeyNotFound) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Admission(AdmissionError::QuotaExceeded { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Self::Admission(AdmissionError::Unavailable(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Resolution(ResolutionError::TemplateNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Resolution(ResolutionError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Resolution(_) => StatusCode::BAD_REQUEST,
            Self::RenderTimeout(_) | Self::ExportTimeout(_) | Self::DeadlineExceeded(_) => {
                StatusCode::REQUEST_TIMEOUT
            }
            Self::RenderError(_) | Self::ExportError(_) | Self::UploadError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Fixed summary returned to callers. Engine detail stays in logs and the
    /// audit record.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Admission(AdmissionError::MissingKey) => "No key provided",
            Self::Admission(AdmissionError::KeyNotFound) => "Invalid key",
            Self::Admission(AdmissionError::QuotaExceeded { .. }) => "Key usage limit reached",
            Self::Admission(AdmissionError::Unavailable(_)) => "Key store unavailable",
            Self::Resolution(ResolutionError::MissingTemplateId) => "No template provided",
            Self::Resolution(ResolutionError::TemplateNotFound(_)) => "Template not found",
            Self::Resolution(ResolutionError::Store(_)) => "Failed to get template",
            Self::Resolution(ResolutionError::MalformedBody(_)) => "Invalid request body",
            Self::Resolution(ResolutionError::Format(_)) => "Unsupported page format",
            Self::RenderTimeout(_) => "Template rendering timeout",
            Self::RenderError(_) => "Template rendering failed",
            Self::ExportTimeout(_) => "PDF generation timeout",
            Self::ExportError(_) => "PDF generation failed",
            Self::UploadError(_) => "Failed to upload PDF",
            Self::DeadlineExceeded(_) => "Request deadline exceeded",
        }
    }

    /// Full cause chain, used as the audit `error_message`.
    pub fn detail(&self) -> String {
        error_chain(self).join(": ")
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Admission(_) => "admission",
            Self::Resolution(_) => "resolution",
            Self::RenderTimeout(_) => "render_timeout",
            Self::RenderError(_) => "render_error",
            Self::ExportTimeout(_) => "export_timeout",
            Self::ExportError(_) => "export_error",
            Self::UploadError(_) => "upload_error",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status();
        let report = ErrorReport::from_error(SOURCE, &self);
        let mut response =
            (status, Json(json!({ "message": self.public_message() }))).into_response();
        report.attach(&mut response);
        response
    }
}
