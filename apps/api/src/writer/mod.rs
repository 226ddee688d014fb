// AI Writer: cover letter generation streamed from the upstream writer.
// Handlers own the HTTP surface; decoding lives in crate::stream and the
// upstream call in crate::writer_client.

pub mod handlers;
pub mod models;
pub mod session;
