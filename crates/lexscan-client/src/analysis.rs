use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lexscan_core::{
    config::Config,
    service::{AnalysisError, AnalysisService},
    JobStatus, ResultRow, UploadedFile,
};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{info, warn};

/// Talks to the contract-analysis service and the PDF highlight service
/// over HTTP.
///
/// One request per call, no retries. Transport failures become
/// `AnalysisError::Network`, non-2xx replies `AnalysisError::Service` with the
/// response body, and bodies missing expected fields
/// `AnalysisError::MalformedResponse`.
pub struct HttpAnalysisClient {
    pub analysis_url: String,
    pub highlight_url: String,
    pub timeout_secs: u64,
}

impl HttpAnalysisClient {
    pub fn new(analysis_url: impl Into<String>, highlight_url: impl Into<String>) -> Self {
        Self {
            analysis_url: analysis_url.into(),
            highlight_url: highlight_url.into(),
            timeout_secs: 120,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.analysis_api_url, &config.highlight_api_url)
            .with_timeout(config.request_timeout_s)
    }

    fn analysis_endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.analysis_url.trim_end_matches('/'), path)
    }

    fn highlight_endpoint(&self) -> String {
        format!("{}/highlight-pdf/", self.highlight_url.trim_end_matches('/'))
    }

    fn http(&self) -> Result<reqwest::Client, AnalysisError> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| AnalysisError::Network(format!("could not build http client: {e}")))
    }

    fn send_error(&self, url: &str, e: reqwest::Error) -> AnalysisError {
        if e.is_timeout() {
            warn!(url, timeout_secs = self.timeout_secs, "request timed out");
            AnalysisError::Network(format!("request timed out after {}s", self.timeout_secs))
        } else {
            warn!(url, "request failed: {}", e);
            AnalysisError::Network(e.to_string())
        }
    }

    /// Pass 2xx responses through; turn anything else into `Service`.
    async fn check(
        &self,
        url: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, AnalysisError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(url, status = %status, "service returned non-success: {}", body);
        Err(AnalysisError::Service {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, AnalysisError> {
        let response = self
            .http()?
            .get(url)
            .send()
            .await
            .map_err(|e| self.send_error(url, e))?;
        let response = self.check(url, response).await?;
        parse_json(url, response).await
    }
}

async fn parse_json<T: for<'de> Deserialize<'de>>(
    url: &str,
    response: reqwest::Response,
) -> Result<T, AnalysisError> {
    let body = response
        .bytes()
        .await
        .map_err(|e| AnalysisError::Network(e.to_string()))?;
    serde_json::from_slice(&body).map_err(|e| {
        warn!(url, "failed to parse response: {}", e);
        AnalysisError::MalformedResponse(e.to_string())
    })
}

fn pdf_part(file: &UploadedFile) -> Result<Part, AnalysisError> {
    Part::bytes(file.bytes.to_vec())
        .file_name(file.name.clone())
        .mime_str("application/pdf")
        .map_err(|e| AnalysisError::Network(format!("invalid multipart part: {e}")))
}

#[derive(Deserialize)]
struct SubmitResponse {
    job_id: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: Option<JobStatus>,
}

#[derive(Deserialize)]
struct ResultResponse {
    result: Option<Vec<ResultRow>>,
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    async fn submit(&self, file: &UploadedFile) -> Result<String, AnalysisError> {
        let url = self.analysis_endpoint("analyze");
        info!(url = %url, file = %file.name, size = file.bytes.len(), "submitting document");

        let form = Form::new().part("file", pdf_part(file)?);
        let response = self
            .http()?
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.send_error(&url, e))?;
        let response = self.check(&url, response).await?;
        let parsed: SubmitResponse = parse_json(&url, response).await?;

        let job_id = parsed
            .job_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AnalysisError::MalformedResponse("missing job_id".into()))?;
        info!(job_id = %job_id, file = %file.name, "document accepted");
        Ok(job_id)
    }

    async fn poll_status(&self, job_id: &str) -> Result<JobStatus, AnalysisError> {
        let url = self.analysis_endpoint(&format!("status/{}", urlencoding::encode(job_id)));
        let parsed: StatusResponse = self.get_json(&url).await?;
        parsed
            .status
            .ok_or_else(|| AnalysisError::MalformedResponse("missing status".into()))
    }

    async fn fetch_result(&self, job_id: &str) -> Result<Vec<ResultRow>, AnalysisError> {
        let url = self.analysis_endpoint(&format!("result/{}", urlencoding::encode(job_id)));
        let parsed: ResultResponse = self.get_json(&url).await?;
        let rows = parsed
            .result
            .ok_or_else(|| AnalysisError::MalformedResponse("missing result".into()))?;
        info!(job_id, rows = rows.len(), "analysis result fetched");
        Ok(rows)
    }

    async fn highlight_document(
        &self,
        file: &UploadedFile,
        clause_texts: &[String],
    ) -> Result<Bytes, AnalysisError> {
        let url = self.highlight_endpoint();
        info!(url = %url, file = %file.name, sentences = clause_texts.len(), "requesting highlighted copy");

        let mut form = Form::new().part("file", pdf_part(file)?);
        for text in clause_texts {
            form = form.text("sentences", text.clone());
        }
        let response = self
            .http()?
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.send_error(&url, e))?;
        let response = self.check(&url, response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AnalysisError::Network(e.to_string()))?;
        if bytes.is_empty() {
            return Err(AnalysisError::MalformedResponse(
                "empty highlighted document".into(),
            ));
        }
        info!(file = %file.name, size = bytes.len(), "highlighted copy received");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_tolerate_trailing_slash() {
        let c = HttpAnalysisClient::new("http://a:8000/", "http://h:8001");
        assert_eq!(c.analysis_endpoint("status/abc"), "http://a:8000/status/abc");
        assert_eq!(c.highlight_endpoint(), "http://h:8001/highlight-pdf/");
    }

    #[test]
    fn from_config_copies_urls_and_timeout() {
        let config = Config::from_lookup(|k| match k {
            "ANALYSIS_API_URL" => Some("http://analysis".into()),
            "REQUEST_TIMEOUT_S" => Some("7".into()),
            _ => None,
        });
        let c = HttpAnalysisClient::from_config(&config);
        assert_eq!(c.analysis_url, "http://analysis");
        assert_eq!(c.highlight_url, "http://127.0.0.1:8001");
        assert_eq!(c.timeout_secs, 7);
    }
}
