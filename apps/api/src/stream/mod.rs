// AI Writer stream decoding.
// Turns a chunked upstream body into a growing display string.
// Shared by every generation surface. No HTTP or UI types in here.

pub mod assembler;
pub mod framing;
pub mod protocol;
pub mod utf8;

pub use assembler::{assemble, AssembleError, AssembledText};
pub use framing::LineFraming;
