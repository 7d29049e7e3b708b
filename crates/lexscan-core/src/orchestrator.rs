//! Upload/analysis state machine.
//!
//! Each uploaded file gets its own run:
//!
//! ```text
//! Idle → AwaitingSubmission → Polling → RetrievingResult → HighlightingDocument → Done
//!                 └──────────────┴──────────────┴──→ Failed
//! ```
//!
//! A run is one spawned task with one cancellation token. Status checks are
//! sequential: the next check is scheduled only after the previous one has
//! been handled. Every transcript message a run touches is addressed by id.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::DEFAULT_THINKING_PHRASES,
    redflag,
    service::{AnalysisError, AnalysisService},
    session::SessionState,
    types::{
        Analysis, ChatMessage, JobId, JobState, JobStatus, MessageBody, MessageId, SessionEvent,
        SourceId, UploadedFile,
    },
};

pub const PROCESSING_ERROR_TEXT: &str =
    "Sorry, there was an error processing your file. Please try again.";

/// A live run. The entry stays in the table until the run has ended, so
/// cancellation and shutdown can always reach it.
struct RunHandle {
    cancel: CancellationToken,
    /// Flips to `true` once the run has ended and left the table.
    done: watch::Receiver<bool>,
    /// Resolves to `true` when the run stopped because it was cancelled.
    task: JoinHandle<bool>,
}

pub struct Orchestrator {
    service: Arc<dyn AnalysisService>,
    state: Arc<SessionState>,
    poll_interval: Duration,
    phrases: Arc<Vec<String>>,
    runs: Arc<Mutex<HashMap<JobId, RunHandle>>>,
}

impl Orchestrator {
    pub(crate) fn new(
        service: Arc<dyn AnalysisService>,
        state: Arc<SessionState>,
        poll_interval: Duration,
        phrases: Vec<String>,
    ) -> Self {
        let phrases = if phrases.is_empty() {
            DEFAULT_THINKING_PHRASES.iter().map(|p| p.to_string()).collect()
        } else {
            phrases
        };
        Self {
            service,
            state,
            poll_interval,
            phrases: Arc::new(phrases),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `Idle → AwaitingSubmission`: register and show the document, post the
    /// first progress phrase, and spawn the run.
    pub async fn start(&self, file: UploadedFile) -> JobId {
        let job = JobId::new();
        set_state(&self.state, job, JobState::Idle).await;

        let source = {
            let mut registry = self.state.registry.lock().await;
            let source = registry.register_upload(&file);
            // Freshly registered, so selection cannot fail.
            let _ = registry.select_source(Some(source.id));
            source
        };
        self.state.emit(SessionEvent::SourcesChanged);
        self.state.emit(SessionEvent::SelectionChanged {
            selected: Some(source.id),
        });

        let placeholder = self
            .state
            .transcript
            .lock()
            .await
            .push_placeholder(job, &self.phrases[0]);
        let placeholder_id = placeholder.id;
        self.state.emit(SessionEvent::MessageAppended {
            message: placeholder,
        });

        set_state(&self.state, job, JobState::AwaitingSubmission).await;

        let cancel = CancellationToken::new();
        let run = JobRun {
            job,
            file,
            source: source.id,
            placeholder: placeholder_id,
            phrase_idx: 0,
            phrases: Arc::clone(&self.phrases),
            poll_interval: self.poll_interval,
            service: Arc::clone(&self.service),
            state: Arc::clone(&self.state),
        };

        // Hold the map lock across spawn so the run's own removal at exit
        // cannot race ahead of this insert.
        let mut runs = self.runs.lock().await;
        let token = cancel.clone();
        let runs_ref = Arc::clone(&self.runs);
        let (done_tx, done) = watch::channel(false);
        let task = tokio::spawn(async move {
            let cancelled = run.run(token).await;
            runs_ref.lock().await.remove(&job);
            let _ = done_tx.send(true);
            cancelled
        });
        runs.insert(job, RunHandle { cancel, done, task });
        job
    }

    /// Returns `true` only if the run was stopped by this call. A run that
    /// had already produced its outcome finishes normally and yields `false`.
    pub async fn cancel(&self, job: JobId) -> bool {
        let Some(handle) = self.runs.lock().await.remove(&job) else {
            return false;
        };
        handle.cancel.cancel();
        match handle.task.await {
            Ok(true) => {
                info!(%job, "analysis cancelled");
                true
            },
            Ok(false) => {
                debug!(%job, "cancel arrived after the run had finished");
                false
            },
            Err(e) => {
                error!(%job, "analysis task panicked: {e}");
                false
            },
        }
    }

    /// Resolves once the run has ended. The run stays cancellable meanwhile.
    pub async fn wait(&self, job: JobId) {
        let done = self.runs.lock().await.get(&job).map(|h| h.done.clone());
        if let Some(mut done) = done {
            // A dropped sender means the task is gone as well.
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    pub async fn shutdown(&self) {
        let handles: Vec<(JobId, RunHandle)> = self.runs.lock().await.drain().collect();
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        for (job, handle) in handles {
            if let Err(e) = handle.task.await {
                error!(%job, "analysis task panicked: {e}");
            }
        }
    }

    pub async fn active_count(&self) -> usize {
        self.runs.lock().await.len()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Ok(runs) = self.runs.try_lock() {
            for handle in runs.values() {
                handle.cancel.cancel();
            }
        }
    }
}

async fn set_state(state: &SessionState, job: JobId, next: JobState) {
    state.job_states.lock().await.set(job, next);
    debug!(%job, state = ?next, "job state");
    state.emit(SessionEvent::JobStateChanged { job, state: next });
}

/// Everything one run needs, moved into its task.
struct JobRun {
    job: JobId,
    file: UploadedFile,
    source: SourceId,
    placeholder: MessageId,
    phrase_idx: usize,
    phrases: Arc<Vec<String>>,
    poll_interval: Duration,
    service: Arc<dyn AnalysisService>,
    state: Arc<SessionState>,
}

impl JobRun {
    /// Returns whether the run was cut short by `cancel`.
    async fn run(mut self, cancel: CancellationToken) -> bool {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.drive() => Some(result),
        };
        match outcome {
            Some(Ok(analysis)) => self.finish(analysis).await,
            Some(Err(e)) => self.fail(e).await,
            None => {
                self.abandon().await;
                return true;
            },
        }
        false
    }

    async fn drive(&mut self) -> Result<Analysis, AnalysisError> {
        let service_job = self.service.submit(&self.file).await?;
        info!(job = %self.job, service_job = %service_job, file = %self.file.name, "document submitted");
        set_state(&self.state, self.job, JobState::Polling).await;
        self.advance_phrase().await;

        loop {
            tokio::time::sleep(self.poll_interval).await;
            let status = self.service.poll_status(&service_job).await?;
            match status {
                JobStatus::Completed => break,
                JobStatus::Failed => {
                    return Err(AnalysisError::AnalysisFailed {
                        job_id: service_job,
                    })
                },
                JobStatus::Pending | JobStatus::Processing => {
                    debug!(job = %self.job, %status, "analysis still running");
                    self.advance_phrase().await;
                },
            }
        }

        set_state(&self.state, self.job, JobState::RetrievingResult).await;
        let rows = self.service.fetch_result(&service_job).await?;
        let analysis = redflag::analyze(&rows);
        info!(
            job = %self.job,
            clauses = analysis.clauses.len(),
            red_flags = analysis.red_flags.len(),
            "analysis result received"
        );

        set_state(&self.state, self.job, JobState::HighlightingDocument).await;
        self.highlight(&analysis).await;
        Ok(analysis)
    }

    /// Show the next phrase, wrapping after the last. Called once when the
    /// submission is accepted and once per non-terminal status.
    async fn advance_phrase(&mut self) {
        self.phrase_idx = (self.phrase_idx + 1) % self.phrases.len();
        let phrase = &self.phrases[self.phrase_idx];
        let updated = self
            .state
            .transcript
            .lock()
            .await
            .set_phrase(self.placeholder, phrase);
        if let Some(message) = updated {
            self.state.emit(SessionEvent::MessageUpdated { message });
        }
    }

    /// Swap the viewer to a highlighted copy. Failure leaves the original
    /// selected and does not fail the run.
    async fn highlight(&self, analysis: &Analysis) {
        let texts = redflag::highlight_texts(analysis);
        if texts.is_empty() {
            debug!(job = %self.job, "no red flags, skipping highlight");
            return;
        }

        let bytes = match self.service.highlight_document(&self.file, &texts).await {
            Ok(b) => b,
            Err(e) => {
                warn!(job = %self.job, "highlight failed, keeping original document: {e}");
                return;
            },
        };

        let selected = {
            let mut registry = self.state.registry.lock().await;
            let highlighted = registry.register_bytes(&self.file.name, bytes, true);
            let id = highlighted.id;
            match registry.supersede(self.source, highlighted.clone()) {
                Ok(()) => registry.select_source(Some(id)).ok().map(|_| id),
                Err(e) => {
                    warn!(job = %self.job, "could not replace original document: {e}");
                    registry.discard(&highlighted);
                    None
                },
            }
        };
        if let Some(id) = selected {
            info!(job = %self.job, source = %id, "showing highlighted document");
            self.state.emit(SessionEvent::SourcesChanged);
            self.state.emit(SessionEvent::SelectionChanged { selected: Some(id) });
        }
    }

    async fn remove_placeholder(&self) {
        let removed = self.state.transcript.lock().await.remove(self.placeholder);
        if removed.is_some() {
            self.state.emit(SessionEvent::MessageRemoved {
                id: self.placeholder,
            });
        }
    }

    async fn finish(self, analysis: Analysis) {
        self.remove_placeholder().await;
        let summary = redflag::summarize(&self.file.name, &analysis);
        *self.state.latest_analysis.lock().await = Some(analysis);
        self.state
            .append(ChatMessage::bot(MessageBody::Analysis { summary }, Some(self.job)))
            .await;
        set_state(&self.state, self.job, JobState::Done).await;
        info!(job = %self.job, "analysis done");
    }

    async fn fail(self, e: AnalysisError) {
        warn!(job = %self.job, "analysis failed: {e}");
        self.remove_placeholder().await;
        self.state
            .append(ChatMessage::bot(
                MessageBody::Error {
                    text: PROCESSING_ERROR_TEXT.to_string(),
                },
                Some(self.job),
            ))
            .await;
        set_state(&self.state, self.job, JobState::Failed).await;
    }

    async fn abandon(self) {
        self.remove_placeholder().await;
        set_state(&self.state, self.job, JobState::Failed).await;
    }
}
