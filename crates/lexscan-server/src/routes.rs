use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
};
use lexscan_core::{
    render, session::EMPTY_STATE_TEXT, ChatMessage, JobId, SessionEvent, SourceId, UploadedFile,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, WatchStream},
    Stream, StreamExt,
};
use tracing::{debug, info, warn};

use crate::AppState;

// ── Error helpers ─────────────────────────────────────────────────────────

pub(crate) fn internal(e: impl std::fmt::Display) -> StatusCode {
    tracing::error!("internal error: {e}");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn bad_request(e: impl std::fmt::Display) -> StatusCode {
    warn!("bad request: {e}");
    StatusCode::BAD_REQUEST
}

// ── Request body types ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(crate) struct PostMessageBody {
    pub text: String,
}

#[derive(Deserialize)]
pub(crate) struct SelectSourceBody {
    pub id: Option<SourceId>,
}

// ── Serializable wrappers ─────────────────────────────────────────────────

#[derive(Serialize)]
struct MessageJson {
    #[serde(flatten)]
    message: ChatMessage,
    html: String,
}

impl From<ChatMessage> for MessageJson {
    fn from(message: ChatMessage) -> Self {
        Self {
            html: render::message_html(&message),
            message,
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

pub(crate) async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_s": state.start_time.elapsed().as_secs(),
        "active_jobs": state.session.active_jobs().await,
    }))
}

// Chat

pub(crate) async fn get_transcript(State(state): State<Arc<AppState>>) -> Json<Value> {
    let messages: Vec<MessageJson> = state
        .session
        .transcript()
        .await
        .into_iter()
        .map(MessageJson::from)
        .collect();
    let empty_state = messages.is_empty().then_some(EMPTY_STATE_TEXT);
    Json(json!({ "messages": messages, "empty_state": empty_state }))
}

pub(crate) async fn post_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PostMessageBody>,
) -> Result<StatusCode, StatusCode> {
    if body.text.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    state.session.send(&body.text, Vec::new()).await;
    Ok(StatusCode::CREATED)
}

pub(crate) async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let mut files = Vec::new();
    let mut text = String::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("upload rejected: {e}");
        e.status()
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| "document.pdf".into());
                let data = field.bytes().await.map_err(|e| {
                    warn!(file = %file_name, "upload rejected: {e}");
                    e.status()
                })?;
                if data.is_empty() {
                    warn!(file = %file_name, "ignoring empty upload");
                    continue;
                }
                files.push(UploadedFile::new(file_name, data));
            },
            "text" => text = field.text().await.map_err(bad_request)?,
            other => debug!(field = other, "ignoring multipart field"),
        }
    }

    if files.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    info!(files = files.len(), "upload received");
    let jobs = state.session.send(&text, files).await;
    Ok((StatusCode::ACCEPTED, Json(json!({ "jobs": jobs }))))
}

// Jobs

pub(crate) async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> Result<Json<Value>, StatusCode> {
    let job_state = state
        .session
        .job_state(id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!({
        "id": id,
        "state": job_state,
        "terminal": job_state.is_terminal(),
    })))
}

pub(crate) async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> StatusCode {
    if state.session.cancel(id).await {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

// Documents

pub(crate) async fn list_sources(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sources = state.session.sources().await;
    let selected = state.session.selected_source().await.map(|s| s.id);
    Json(json!({ "sources": sources, "selected": selected }))
}

pub(crate) async fn select_source(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SelectSourceBody>,
) -> Result<StatusCode, StatusCode> {
    state.session.select_source(body.id).await.map_err(|e| {
        warn!("select failed: {e}");
        StatusCode::NOT_FOUND
    })?;
    Ok(StatusCode::OK)
}

pub(crate) async fn source_pdf(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SourceId>,
) -> Result<impl IntoResponse, StatusCode> {
    let (source, bytes) = state
        .session
        .source_bytes(id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    let file_name = source.name.replace(['"', '\\', '\r', '\n'], "_");
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    ))
}

// Chart

pub(crate) async fn get_chart(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    let points = state.session.chart_points().await;
    Ok(Json(serde_json::to_value(points).map_err(internal)?))
}

// SSE

enum Feed {
    Session(Result<SessionEvent, BroadcastStreamRecvError>),
    Shutdown(bool),
}

pub(crate) async fn sse_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = BroadcastStream::new(state.session.subscribe()).map(Feed::Session);
    let stop = WatchStream::new(state.shutdown.subscribe()).map(Feed::Shutdown);
    let stream = events
        .merge(stop)
        .take_while(|feed| !matches!(feed, Feed::Shutdown(true)))
        .filter_map(|feed| match feed {
            Feed::Session(Ok(evt)) => Event::default()
                .event(evt.kind())
                .json_data(&evt)
                .map_err(|e| warn!("failed to encode event: {e}"))
                .ok()
                .map(Ok),
            Feed::Session(Err(BroadcastStreamRecvError::Lagged(n))) => {
                warn!(skipped = n, "event stream lagged");
                None
            },
            Feed::Shutdown(_) => None,
        });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("ping"),
    )
}
