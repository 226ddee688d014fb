//! Generation state per client session.
//!
//! One session can have at most one generation streaming at a time.
//! State changes go through `GenerationState` transitions so illegal moves
//! (starting twice, completing a stale generation) are rejected explicitly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::stream::{AssembleError, AssembledText};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("a generation is already streaming for this session")]
    AlreadyStreaming,

    #[error("no generation is streaming for this session")]
    NotStreaming,

    #[error("generation {0} is no longer the active one")]
    StaleGeneration(Uuid),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GenerationState {
    Idle,
    Streaming {
        generation_id: Uuid,
        started_at: DateTime<Utc>,
    },
    Succeeded {
        generation_id: Uuid,
        finished_at: DateTime<Utc>,
        text: String,
        /// Kept after an interrupted or cancelled stream.
        partial: bool,
    },
    Failed {
        generation_id: Uuid,
        finished_at: DateTime<Utc>,
        reason: String,
    },
}

impl GenerationState {
    pub fn is_streaming(&self) -> bool {
        matches!(self, GenerationState::Streaming { .. })
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self {
            GenerationState::Succeeded { finished_at, .. }
            | GenerationState::Failed { finished_at, .. } => Some(*finished_at),
            GenerationState::Idle | GenerationState::Streaming { .. } => None,
        }
    }

    /// Idle | Succeeded | Failed → Streaming
    pub fn begin(&self, generation_id: Uuid) -> Result<GenerationState, TransitionError> {
        if self.is_streaming() {
            return Err(TransitionError::AlreadyStreaming);
        }
        Ok(GenerationState::Streaming {
            generation_id,
            started_at: Utc::now(),
        })
    }

    /// Streaming → Succeeded | Failed
    pub fn complete(
        &self,
        generation_id: Uuid,
        outcome: &Result<AssembledText, AssembleError>,
    ) -> Result<GenerationState, TransitionError> {
        let GenerationState::Streaming {
            generation_id: active,
            ..
        } = self
        else {
            return Err(TransitionError::NotStreaming);
        };
        if *active != generation_id {
            return Err(TransitionError::StaleGeneration(generation_id));
        }

        let finished_at = Utc::now();
        Ok(match outcome {
            Ok(assembled) => GenerationState::Succeeded {
                generation_id,
                finished_at,
                text: assembled.text.clone(),
                partial: assembled.is_partial(),
            },
            Err(e) => GenerationState::Failed {
                generation_id,
                finished_at,
                reason: e.to_string(),
            },
        })
    }

    /// Succeeded | Failed | Idle → Idle
    pub fn reset(&self) -> Result<GenerationState, TransitionError> {
        if self.is_streaming() {
            return Err(TransitionError::AlreadyStreaming);
        }
        Ok(GenerationState::Idle)
    }
}

/// Handle returned when a generation starts.
#[derive(Debug, Clone)]
pub struct ActiveGeneration {
    pub session_id: Uuid,
    pub generation_id: Uuid,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
struct SessionSlot {
    state: GenerationState,
    cancel: Option<CancellationToken>,
}

/// How long a finished generation stays readable through the status endpoint.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 60);

/// Per-session generation states, shared across handlers.
///
/// Finished sessions are kept for `retention` after they end and then
/// evicted; streaming sessions are never evicted.
#[derive(Debug)]
pub struct GenerationTracker {
    sessions: DashMap<Uuid, SessionSlot>,
    retention: Duration,
}

impl Default for GenerationTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl GenerationTracker {
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            retention,
        }
    }

    /// Number of sessions currently held, finished or streaming.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Drops finished sessions that ended more than `retention` before `now`.
    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return 0;
        };
        let cutoff = now - retention;
        let before = self.len();
        self.sessions.retain(|_, slot| match slot.state.finished_at() {
            Some(finished_at) => finished_at > cutoff,
            None => !matches!(slot.state, GenerationState::Idle),
        });
        let evicted = before.saturating_sub(self.len());
        if evicted > 0 {
            debug!(evicted, "evicted finished generation sessions");
        }
        evicted
    }

    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    /// Sweeps expired sessions every `every` until the runtime shuts down.
    pub fn spawn_eviction(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.evict_expired();
            }
        })
    }

    pub fn state(&self, session_id: Uuid) -> GenerationState {
        self.sessions
            .get(&session_id)
            .map(|slot| slot.state.clone())
            .unwrap_or(GenerationState::Idle)
    }

    /// Moves the session into `Streaming`. Fails if one is already in flight.
    pub fn begin(&self, session_id: Uuid) -> Result<ActiveGeneration, TransitionError> {
        let generation_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        match self.sessions.entry(session_id) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.state = slot.state.begin(generation_id)?;
                slot.cancel = Some(cancel.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(SessionSlot {
                    state: GenerationState::Idle.begin(generation_id)?,
                    cancel: Some(cancel.clone()),
                });
            }
        }

        info!(%session_id, %generation_id, "generation started");
        Ok(ActiveGeneration {
            session_id,
            generation_id,
            cancel,
        })
    }

    /// Records the terminal outcome of `generation`.
    pub fn complete(
        &self,
        generation: &ActiveGeneration,
        outcome: &Result<AssembledText, AssembleError>,
    ) -> Result<(), TransitionError> {
        let mut slot = self
            .sessions
            .get_mut(&generation.session_id)
            .ok_or(TransitionError::NotStreaming)?;

        slot.state = slot.state.complete(generation.generation_id, outcome)?;
        slot.cancel = None;

        match outcome {
            Ok(assembled) => info!(
                session_id = %generation.session_id,
                generation_id = %generation.generation_id,
                chars = assembled.text.chars().count(),
                partial = assembled.is_partial(),
                "generation succeeded"
            ),
            Err(e) => warn!(
                session_id = %generation.session_id,
                generation_id = %generation.generation_id,
                "generation failed: {e}"
            ),
        }
        Ok(())
    }

    /// Triggers cancellation of the active generation, if any.
    pub fn cancel(&self, session_id: Uuid) -> bool {
        let Some(slot) = self.sessions.get(&session_id) else {
            return false;
        };
        match &slot.cancel {
            Some(token) if slot.state.is_streaming() => {
                debug!(%session_id, "cancelling generation");
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Forgets a finished session. Rejected while streaming.
    pub fn reset(&self, session_id: Uuid) -> Result<(), TransitionError> {
        if let Some(slot) = self.sessions.get(&session_id) {
            slot.state.reset()?;
        }
        self.sessions
            .remove_if(&session_id, |_, slot| !slot.state.is_streaming());
        Ok(())
    }
}
