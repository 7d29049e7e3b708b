use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use anyhow::Result;
use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::{
    config::Config,
    orchestrator::Orchestrator,
    redflag,
    registry::SourceRegistry,
    service::AnalysisService,
    transcript::Transcript,
    types::{
        Analysis, ChartPoint, ChatMessage, FileRef, JobId, JobState, MessageBody, SessionEvent,
        Source, SourceId, UploadedFile,
    },
};

/// Shown by the chat view while the transcript is empty.
pub const EMPTY_STATE_TEXT: &str = "Welcome to Legal Document Analyzer";

/// How many finished jobs keep a queryable state.
pub const MAX_FINISHED_JOBS: usize = 256;

/// Per-job lifecycle state. Live jobs are always kept; finished ones are
/// evicted oldest first once more than `MAX_FINISHED_JOBS` have ended.
#[derive(Debug)]
pub(crate) struct JobTable {
    states: HashMap<JobId, JobState>,
    finished: VecDeque<JobId>,
    cap: usize,
}

impl JobTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_FINISHED_JOBS)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            states: HashMap::new(),
            finished: VecDeque::new(),
            cap,
        }
    }

    pub fn set(&mut self, job: JobId, next: JobState) {
        let was_terminal = self.states.insert(job, next).is_some_and(|s| s.is_terminal());
        if next.is_terminal() && !was_terminal {
            self.finished.push_back(job);
            while self.finished.len() > self.cap {
                if let Some(old) = self.finished.pop_front() {
                    self.states.remove(&old);
                }
            }
        }
    }

    pub fn get(&self, job: JobId) -> Option<JobState> {
        self.states.get(&job).copied()
    }
}

/// State shared between the session and its running jobs.
pub(crate) struct SessionState {
    pub registry: Mutex<SourceRegistry>,
    pub transcript: Mutex<Transcript>,
    pub job_states: Mutex<JobTable>,
    pub latest_analysis: Mutex<Option<Analysis>>,
    pub event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionState {
    pub fn emit(&self, event: SessionEvent) {
        debug!(kind = event.kind(), "session event");
        let _ = self.event_tx.send(event);
    }

    pub async fn append(&self, message: ChatMessage) {
        self.transcript.lock().await.push(message.clone());
        self.emit(SessionEvent::MessageAppended { message });
    }
}

/// One user's chat session: transcript, document registry and analysis runs.
///
/// Constructed explicitly and handed to whatever needs it; dropping or
/// calling `shutdown` ends every run and releases all document bytes.
pub struct Session {
    state: Arc<SessionState>,
    orchestrator: Orchestrator,
    text_reply: String,
}

impl Session {
    pub fn new(service: Arc<dyn AnalysisService>, config: &Config) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let state = Arc::new(SessionState {
            registry: Mutex::new(SourceRegistry::new()),
            transcript: Mutex::new(Transcript::new()),
            job_states: Mutex::new(JobTable::new()),
            latest_analysis: Mutex::new(None),
            event_tx,
        });
        let orchestrator = Orchestrator::new(
            service,
            Arc::clone(&state),
            config.poll_interval(),
            config.thinking_phrases.clone(),
        );
        Self {
            state,
            orchestrator,
            text_reply: config.text_reply.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.state.event_tx.subscribe()
    }

    /// Handle chat input. Starts one analysis run per attached file and
    /// returns their job ids. Blank input with no files is ignored.
    pub async fn send(&self, text: &str, files: Vec<UploadedFile>) -> Vec<JobId> {
        let text = text.trim();
        if text.is_empty() && files.is_empty() {
            return Vec::new();
        }

        let refs: Vec<FileRef> = files.iter().map(UploadedFile::file_ref).collect();
        self.state.append(ChatMessage::user(text, refs)).await;

        if files.is_empty() {
            let reply = ChatMessage::bot(
                MessageBody::Text {
                    text: self.text_reply.clone(),
                },
                None,
            );
            self.state.append(reply).await;
            return Vec::new();
        }

        let mut jobs = Vec::with_capacity(files.len());
        for file in files {
            info!(file = %file.name, size = file.bytes.len(), "starting analysis");
            jobs.push(self.orchestrator.start(file).await);
        }
        jobs
    }

    pub async fn upload(&self, file: UploadedFile) -> Option<JobId> {
        self.send("", vec![file]).await.into_iter().next()
    }

    pub async fn transcript(&self) -> Vec<ChatMessage> {
        self.state.transcript.lock().await.messages().to_vec()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.transcript.lock().await.is_empty()
    }

    pub async fn sources(&self) -> Vec<Source> {
        self.state.registry.lock().await.sources().to_vec()
    }

    pub async fn selected_source(&self) -> Option<Source> {
        self.state.registry.lock().await.selected().cloned()
    }

    pub async fn select_source(&self, id: Option<SourceId>) -> Result<()> {
        self.state.registry.lock().await.select_source(id)?;
        self.state.emit(SessionEvent::SelectionChanged { selected: id });
        Ok(())
    }

    pub async fn source_bytes(&self, id: SourceId) -> Option<(Source, Bytes)> {
        let registry = self.state.registry.lock().await;
        let source = registry.get(id)?.clone();
        let bytes = registry.bytes(id)?;
        Some((source, bytes))
    }

    pub async fn job_state(&self, job: JobId) -> Option<JobState> {
        self.state.job_states.lock().await.get(job)
    }

    pub async fn latest_analysis(&self) -> Option<Analysis> {
        self.state.latest_analysis.lock().await.clone()
    }

    pub async fn chart_points(&self) -> Vec<ChartPoint> {
        self.latest_analysis()
            .await
            .map(|a| redflag::chart_points(&a))
            .unwrap_or_default()
    }

    /// Stop a run. Its placeholder is removed and no result is posted.
    pub async fn cancel(&self, job: JobId) -> bool {
        self.orchestrator.cancel(job).await
    }

    /// Number of runs that have not yet reached a terminal state.
    pub async fn active_jobs(&self) -> usize {
        self.orchestrator.active_count().await
    }

    /// Wait for a run to reach a terminal state (or be cancelled).
    pub async fn wait(&self, job: JobId) {
        self.orchestrator.wait(job).await;
    }

    /// Cancel all runs, wait for them to stop, then release document bytes.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        self.state.registry.lock().await.release_all();
        self.state.emit(SessionEvent::SourcesChanged);
        info!("session shut down");
    }

    pub async fn released_url_count(&self) -> usize {
        self.state.registry.lock().await.released_url_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_jobs_are_evicted_oldest_first() {
        let mut table = JobTable::with_capacity(2);
        let jobs: Vec<JobId> = (0..4).map(|_| JobId::new()).collect();
        for job in &jobs {
            table.set(*job, JobState::Polling);
            table.set(*job, JobState::Done);
        }
        assert_eq!(table.get(jobs[0]), None);
        assert_eq!(table.get(jobs[1]), None);
        assert_eq!(table.get(jobs[2]), Some(JobState::Done));
        assert_eq!(table.get(jobs[3]), Some(JobState::Done));
    }

    #[test]
    fn live_jobs_are_never_evicted() {
        let mut table = JobTable::with_capacity(1);
        let live = JobId::new();
        table.set(live, JobState::Polling);
        let ended: Vec<JobId> = (0..5).map(|_| JobId::new()).collect();
        for job in &ended {
            table.set(*job, JobState::Failed);
        }
        assert_eq!(table.get(live), Some(JobState::Polling));
        assert_eq!(table.get(ended[3]), None);
        assert_eq!(table.get(ended[4]), Some(JobState::Failed));
    }

    #[test]
    fn repeated_terminal_state_counts_once() {
        let mut table = JobTable::with_capacity(1);
        let a = JobId::new();
        table.set(a, JobState::Failed);
        table.set(a, JobState::Failed);
        assert_eq!(table.finished.len(), 1);
        assert_eq!(table.get(a), Some(JobState::Failed));
    }
}
