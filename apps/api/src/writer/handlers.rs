//! Axum route handlers for the AI Writer API.

use anyhow::anyhow;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{AppError, GENERATION_FAILED_MESSAGE};
use crate::state::AppState;
use crate::stream::{assemble, AssembleError, AssembledText};
use crate::writer::models::{CancelResponse, CoverLetterRequest, CoverLetterResponse, WriterEvent};
use crate::writer::session::{ActiveGeneration, GenerationState, GenerationTracker};
use crate::writer_client::prompts::build_cover_letter_prompt;
use crate::writer_client::WriterError;

type Outcome = Result<AssembledText, AssembleError>;

/// Events buffered per SSE client before the generation waits for it.
const EVENT_BUFFER: usize = 64;

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/writer/generate
///
/// Streams the cover letter as server-sent events: one `snapshot` per
/// appended payload, then a single `done` or `failed`.
/// Upstream rejections are returned as plain JSON errors before streaming starts.
pub async fn handle_generate_stream(
    State(state): State<AppState>,
    Json(request): Json<CoverLetterRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let (tx, rx) = mpsc::channel::<WriterEvent>(EVENT_BUFFER);
    let (generation, _task) = launch(&state, &request, Some(tx)).await?;
    info!(
        session_id = %generation.session_id,
        generation_id = %generation.generation_id,
        "streaming cover letter"
    );

    let events = ReceiverStream::new(rx).map(|event: WriterEvent| {
        Event::default().event(event.name()).json_data(&event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// POST /api/v1/writer/generate/complete
///
/// Same input as the streaming endpoint; waits for the whole letter.
pub async fn handle_generate_complete(
    State(state): State<AppState>,
    Json(request): Json<CoverLetterRequest>,
) -> Result<Json<CoverLetterResponse>, AppError> {
    let (generation, task) = launch(&state, &request, None).await?;

    let assembled = match task.await {
        Ok(outcome) => outcome?,
        Err(e) => {
            let reason = format!("generation task failed: {e}");
            record(
                &state.sessions,
                &generation,
                &Err(AssembleError::Transport(reason.clone())),
            );
            return Err(AppError::Internal(anyhow!(reason)));
        }
    };

    Ok(Json(CoverLetterResponse {
        generation_id: generation.generation_id,
        partial: assembled.is_partial(),
        updates: assembled.updates,
        text: assembled.text,
    }))
}

/// GET /api/v1/writer/sessions/:session_id
pub async fn handle_session_state(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Json<GenerationState> {
    Json(state.sessions.state(session_id))
}

/// POST /api/v1/writer/sessions/:session_id/cancel
///
/// Stops reading the active stream. Text already received is kept.
pub async fn handle_cancel(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.sessions.cancel(session_id),
    })
}

/// DELETE /api/v1/writer/sessions/:session_id
///
/// Forgets a finished generation. 409 while one is streaming.
pub async fn handle_reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.sessions.reset(session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ────────────────────────────────────────────────────────────────────────────
// Generation task
// ────────────────────────────────────────────────────────────────────────────

/// Validates, claims the session and starts the background task.
/// Returns once the upstream stream is open (or has been rejected).
async fn launch(
    state: &AppState,
    request: &CoverLetterRequest,
    events: Option<mpsc::Sender<WriterEvent>>,
) -> Result<(ActiveGeneration, JoinHandle<Outcome>), AppError> {
    request.validate()?;
    let generation = state.sessions.begin(request.session_id)?;
    let prompt = build_cover_letter_prompt(request);

    let (opened_tx, opened_rx) = oneshot::channel();
    let task = tokio::spawn(run_generation(
        state.clone(),
        generation.clone(),
        prompt,
        events,
        opened_tx,
    ));

    match opened_rx.await {
        Ok(Ok(())) => Ok((generation, task)),
        Ok(Err(e)) => Err(AppError::Upstream(e)),
        Err(_) => {
            let reason = "generation task ended before the stream opened";
            record(
                &state.sessions,
                &generation,
                &Err(AssembleError::Transport(reason.to_string())),
            );
            Err(AppError::Internal(anyhow!(reason)))
        }
    }
}

/// Opens the upstream body and assembles it. Runs detached from the request,
/// so the outcome is recorded even if the HTTP client goes away.
async fn run_generation(
    state: AppState,
    generation: ActiveGeneration,
    prompt: String,
    events: Option<mpsc::Sender<WriterEvent>>,
    opened: oneshot::Sender<Result<(), WriterError>>,
) -> Outcome {
    let body = match state.writer.open_stream(&prompt).await {
        Ok(body) => {
            let _ = opened.send(Ok(()));
            body
        }
        Err(e) => {
            let outcome = Err(AssembleError::Transport(format!("opening stream: {e}")));
            record(&state.sessions, &generation, &outcome);
            let _ = opened.send(Err(e));
            return outcome;
        }
    };

    let finished = CancellationToken::new();
    let _finished_guard = finished.clone().drop_guard();
    if let Some(tx) = &events {
        watch_disconnect(tx.clone(), generation.cancel.clone(), finished);
    }

    let outcome = assemble(body, state.line_framing, &generation.cancel, |text: String| {
        let tx = events.clone();
        async move {
            if let Some(tx) = tx {
                // A closed channel is picked up by the disconnect watcher.
                let _ = tx.send(WriterEvent::Snapshot { text }).await;
            }
        }
    })
    .await;

    record(&state.sessions, &generation, &outcome);
    if let Some(tx) = &events {
        let _ = tx.send(terminal_event(&outcome)).await;
    }
    outcome
}

/// Cancels the generation when the SSE client disconnects.
fn watch_disconnect(
    tx: mpsc::Sender<WriterEvent>,
    cancel: CancellationToken,
    finished: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tx.closed() => {
                debug!("event stream client went away");
                cancel.cancel();
            }
            _ = finished.cancelled() => {}
        }
    });
}

fn record(sessions: &GenerationTracker, generation: &ActiveGeneration, outcome: &Outcome) {
    if let Err(e) = sessions.complete(generation, outcome) {
        warn!(
            session_id = %generation.session_id,
            generation_id = %generation.generation_id,
            "could not record generation outcome: {e}"
        );
    }
}

fn terminal_event(outcome: &Outcome) -> WriterEvent {
    match outcome {
        Ok(assembled) => WriterEvent::Done {
            text: assembled.text.clone(),
            partial: assembled.is_partial(),
        },
        Err(_) => WriterEvent::Failed {
            message: GENERATION_FAILED_MESSAGE.to_string(),
        },
    }
}
