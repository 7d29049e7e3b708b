use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Identifiers ──────────────────────────────────────────────────────────

/// Client-side identifier of a registered document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Tag shared by every transcript message one analysis run produces.
///
/// Not the service-side job id: that one is only known after submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Uploads & Sources ────────────────────────────────────────────────────

/// A document as selected by the user: name plus raw bytes.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn file_ref(&self) -> FileRef {
        FileRef {
            name: self.name.clone(),
            size: self.bytes.len(),
        }
    }
}

/// Attachment chip shown under a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub size: usize,
}

/// A document registered for viewing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub upload_time: DateTime<Utc>,
    /// Object URL of the in-memory bytes (`blob:lexscan/<uuid>`).
    pub url: String,
    /// True for the copy returned by the highlight service.
    pub highlighted: bool,
}

// ── Chat Transcript ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    /// Rotating "thinking" placeholder for an in-flight job.
    Progress { phrase: String },
    Analysis { summary: AnalysisSummary },
    Error { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub body: MessageBody,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attached_files: Vec<FileRef>,
    /// Run that produced this message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobId>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>, attached_files: Vec<FileRef>) -> Self {
        Self {
            id: MessageId::new(),
            sender: Sender::User,
            body: MessageBody::Text { text: text.into() },
            attached_files,
            job: None,
            created_at: Utc::now(),
        }
    }

    pub fn bot(body: MessageBody, job: Option<JobId>) -> Self {
        Self {
            id: MessageId::new(),
            sender: Sender::Bot,
            body,
            attached_files: Vec::new(),
            job,
            created_at: Utc::now(),
        }
    }

    pub fn is_progress_placeholder(&self) -> bool {
        matches!(self.body, MessageBody::Progress { .. })
    }

    /// Plain-text view of the body, used for logs and tests.
    pub fn plain_text(&self) -> String {
        match &self.body {
            MessageBody::Text { text } | MessageBody::Error { text } => text.clone(),
            MessageBody::Progress { phrase } => phrase.clone(),
            MessageBody::Analysis { summary } => summary
                .red_flags
                .iter()
                .map(|c| format!("{}: {} ({})", c.label, c.excerpt, c.risk_percent))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

// ── Analysis Job ─────────────────────────────────────────────────────────

/// Status reported by `GET /status/{job_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Orchestrator state of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    AwaitingSubmission,
    Polling,
    RetrievingResult,
    HighlightingDocument,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

// ── Risk Clauses ─────────────────────────────────────────────────────────

/// One row of the `result` array returned by `GET /result/{job_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub clause_text: String,
    pub predicted_label: String,
    /// Risk as a fraction in 0..1.
    pub final_risk: f64,
    pub x_coordinate: f64,
    pub y_coordinate: f64,
    pub risk_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Case-insensitive parse of the service's `risk_level` string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn is_red_flag(self) -> bool {
        matches!(self, Self::Medium | Self::High)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskClause {
    pub clause_text: String,
    pub predicted_label: String,
    /// Percentage in [0, 100].
    pub risk_score: f64,
    pub coordinate_x: f64,
    pub coordinate_y: f64,
    pub risk_level: RiskLevel,
}

/// Full derived result of one completed analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub clauses: Vec<RiskClause>,
    /// Medium/High clauses, High first, descending score within a level.
    pub red_flags: Vec<RiskClause>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseSummary {
    pub label: String,
    pub excerpt: String,
    pub risk_level: RiskLevel,
    /// Formatted percentage, e.g. "90.0%".
    pub risk_percent: String,
}

/// Structured body of the terminal analysis message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub document: String,
    pub red_flags: Vec<ClauseSummary>,
}

/// One point of the risk scatter chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub x: f64,
    pub y: f64,
    pub clause: String,
    pub label: String,
    pub risk_score: f64,
}

// ── Session Events ───────────────────────────────────────────────────────

/// Broadcast after each session state change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    MessageAppended { message: ChatMessage },
    MessageUpdated { message: ChatMessage },
    MessageRemoved { id: MessageId },
    SourcesChanged,
    SelectionChanged { selected: Option<SourceId> },
    JobStateChanged { job: JobId, state: JobState },
}

impl SessionEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::MessageAppended { .. } => "message_appended",
            Self::MessageUpdated { .. } => "message_updated",
            Self::MessageRemoved { .. } => "message_removed",
            Self::SourcesChanged => "sources_changed",
            Self::SelectionChanged { .. } => "selection_changed",
            Self::JobStateChanged { .. } => "job_state_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn job_status_wire_format_is_lowercase() {
        let s: JobStatus = serde_json::from_value(json!("processing")).unwrap();
        assert_eq!(s, JobStatus::Processing);
        assert!(serde_json::from_value::<JobStatus>(json!("Processing")).is_err());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn ids_serialize_as_bare_uuids() {
        let id = SourceId::new();
        assert_eq!(serde_json::to_value(id).unwrap(), json!(id.to_string()));
        let back: SourceId = serde_json::from_value(json!(id.to_string())).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn events_carry_type_and_body_kind_tags() {
        let msg = ChatMessage::bot(
            MessageBody::Progress {
                phrase: "Reading".into(),
            },
            Some(JobId::new()),
        );
        let v = serde_json::to_value(SessionEvent::MessageAppended { message: msg }).unwrap();
        assert_eq!(v["type"], "message_appended");
        assert_eq!(v["message"]["sender"], "bot");
        assert_eq!(v["message"]["body"]["kind"], "progress");
        assert_eq!(v["message"]["body"]["phrase"], "Reading");

        let v = serde_json::to_value(SessionEvent::SourcesChanged).unwrap();
        assert_eq!(v, json!({ "type": "sources_changed" }));
    }

    #[test]
    fn risk_level_parse_is_case_insensitive() {
        assert_eq!(RiskLevel::parse("HIGH"), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse(" medium "), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::parse("critical"), None);
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(!RiskLevel::Low.is_red_flag());
    }
}
