use std::sync::Arc;

use crate::stream::LineFraming;
use crate::writer::session::GenerationTracker;
use crate::writer_client::WriterSource;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Upstream stream source. `WriterClient` in production.
    pub writer: Arc<dyn WriterSource>,
    /// At most one streaming generation per session.
    pub sessions: Arc<GenerationTracker>,
    pub line_framing: LineFraming,
}
