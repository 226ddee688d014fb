//! Streaming text assembler: reassembles writer stream lines into display text.
//!
//! The sync core (`StreamingTextAssembler`) owns the accumulated text and is
//! driven one chunk at a time. `assemble` is the async read loop around it.

use std::fmt::Display;
use std::future::Future;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::stream::framing::{LineFraming, LineSplitter};
use crate::stream::protocol::{parse_line, ProtocolLine};
use crate::stream::utf8::Utf8Decoder;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssembleError {
    #[error("response has no readable body")]
    MissingStream,

    #[error("stream read failed: {0}")]
    Transport(String),

    #[error("stream ended without generated content")]
    EmptyResult,

    #[error("generation cancelled before any content arrived")]
    Cancelled,
}

/// How a successful assembly ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Completion {
    /// Normal end of stream.
    Finished,
    /// A read failed after text had already arrived; the text so far is kept.
    Interrupted { reason: String },
    /// Cancelled after text had already arrived; the text so far is kept.
    Cancelled,
}

/// Final result of one streaming request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssembledText {
    pub text: String,
    /// Number of snapshots published while streaming.
    pub updates: usize,
    pub completion: Completion,
}

impl AssembledText {
    /// True when the text is a partial result promoted to success.
    pub fn is_partial(&self) -> bool {
        self.completion != Completion::Finished
    }
}

/// Accumulates payload text from a chunked writer stream.
///
/// The accumulated text only grows: payloads are appended in arrival order
/// and never reordered or truncated.
#[derive(Debug)]
pub struct StreamingTextAssembler {
    decoder: Utf8Decoder,
    splitter: LineSplitter,
    text: String,
    updates: usize,
}

impl StreamingTextAssembler {
    pub fn new(framing: LineFraming) -> Self {
        Self {
            decoder: Utf8Decoder::new(),
            splitter: LineSplitter::new(framing),
            text: String::new(),
            updates: 0,
        }
    }

    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Processes one chunk. `on_update` receives the full accumulated text
    /// after every non-empty payload append.
    pub fn feed<F>(&mut self, chunk: &[u8], on_update: &mut F)
    where
        F: FnMut(&str),
    {
        let decoded = self.decoder.decode(chunk);
        for line in self.splitter.push(&decoded) {
            self.apply_line(&line, on_update);
        }
    }

    /// Normal end of stream. Flushes held bytes and any unterminated line.
    pub fn finish<F>(mut self, on_update: &mut F) -> Result<AssembledText, AssembleError>
    where
        F: FnMut(&str),
    {
        if self.decoder.has_pending() {
            debug!("stream ended inside a multi-byte sequence");
        }
        let tail = self.decoder.finish();
        for line in self.splitter.push(&tail) {
            self.apply_line(&line, on_update);
        }
        if let Some(line) = self.splitter.finish() {
            self.apply_line(&line, on_update);
        }

        if self.text.trim().is_empty() {
            return Err(AssembleError::EmptyResult);
        }
        Ok(self.into_result(Completion::Finished))
    }

    /// A read failed. Text already produced wins over the error, even if it
    /// is only whitespace: the caller has already been shown it.
    pub fn interrupt(mut self, reason: String) -> Result<AssembledText, AssembleError> {
        self.discard_tail();
        if self.text.is_empty() {
            return Err(AssembleError::Transport(reason));
        }
        warn!(
            chars = self.text.chars().count(),
            "stream interrupted after partial output, keeping it: {reason}"
        );
        Ok(self.into_result(Completion::Interrupted { reason }))
    }

    /// The caller stopped the request. Text already produced is kept.
    pub fn cancel(mut self) -> Result<AssembledText, AssembleError> {
        self.discard_tail();
        if self.text.is_empty() {
            return Err(AssembleError::Cancelled);
        }
        Ok(self.into_result(Completion::Cancelled))
    }

    fn apply_line<F>(&mut self, line: &str, on_update: &mut F)
    where
        F: FnMut(&str),
    {
        match parse_line(line) {
            ProtocolLine::TextPayload(payload) => {
                if payload.is_empty() {
                    return;
                }
                self.text.push_str(&payload);
                self.updates += 1;
                on_update(&self.text);
            }
            ProtocolLine::Completion(body) => debug!(body, "stream completion marker"),
            ProtocolLine::Metadata(body) => debug!(body, "stream metadata marker"),
            ProtocolLine::Unknown => {
                if !line.trim().is_empty() {
                    trace!(line, "ignoring unrecognised stream line");
                }
            }
        }
    }

    fn discard_tail(&mut self) {
        let dropped = self.splitter.discard();
        if dropped > 0 {
            debug!(bytes = dropped, "dropping unterminated stream line");
        }
    }

    fn into_result(self, completion: Completion) -> AssembledText {
        AssembledText {
            text: self.text,
            updates: self.updates,
            completion,
        }
    }
}

/// Reads `body` to the end, publishing snapshots through `on_update`.
///
/// `on_update` is awaited before the next chunk is read, so a slow consumer
/// applies backpressure to the upstream body instead of queueing snapshots.
/// No retries and no timeouts: a single failed read ends the loop.
/// Cancellation stops reading and drops the body, releasing the connection.
pub async fn assemble<S, B, E, F, Fut>(
    body: Option<S>,
    framing: LineFraming,
    cancel: &CancellationToken,
    mut on_update: F,
) -> Result<AssembledText, AssembleError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    let Some(mut body) = body else {
        return Err(AssembleError::MissingStream);
    };

    let mut assembler = StreamingTextAssembler::new(framing);
    let mut pending: Vec<String> = Vec::new();
    let mut chunks = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(chunks, "stream cancelled");
                return assembler.cancel();
            }
            next = body.next() => next,
        };

        match next {
            None => {
                debug!(chunks, updates = assembler.updates(), "stream ended");
                let result = assembler.finish(&mut |text: &str| pending.push(text.to_owned()));
                for snapshot in pending.drain(..) {
                    on_update(snapshot).await;
                }
                return result;
            }
            Some(Ok(chunk)) => {
                chunks += 1;
                assembler.feed(chunk.as_ref(), &mut |text: &str| {
                    pending.push(text.to_owned())
                });
                for snapshot in pending.drain(..) {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!(chunks, "stream cancelled while publishing");
                            return assembler.cancel();
                        }
                        _ = on_update(snapshot) => {}
                    }
                }
            }
            Some(Err(e)) => {
                warn!(chunks, "stream read failed: {e}");
                return assembler.interrupt(e.to_string());
            }
        }
    }
}
