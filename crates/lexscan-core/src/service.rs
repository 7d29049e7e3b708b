use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::types::{JobStatus, ResultRow, UploadedFile};

/// Failures talking to the analysis or highlight service.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum AnalysisError {
    /// Request could not be sent, or timed out.
    #[error("network error: {0}")]
    Network(String),

    #[error("service returned {status}: {body}")]
    Service { status: u16, body: String },

    /// Success status but the body lacks an expected field.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("analysis job {job_id} failed")]
    AnalysisFailed { job_id: String },
}

/// The external contract-analysis collaborator.
///
/// Implementations carry no retry policy; each call is one request/response.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Submit a document; returns the service-side job id.
    async fn submit(&self, file: &UploadedFile) -> Result<String, AnalysisError>;

    async fn poll_status(&self, job_id: &str) -> Result<JobStatus, AnalysisError>;

    async fn fetch_result(&self, job_id: &str) -> Result<Vec<ResultRow>, AnalysisError>;

    /// Returns a copy of the PDF with each of `clause_texts` highlighted.
    async fn highlight_document(
        &self,
        file: &UploadedFile,
        clause_texts: &[String],
    ) -> Result<Bytes, AnalysisError>;
}
