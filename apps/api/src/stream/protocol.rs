//! Line classification for the writer stream format.
//!
//! Each line carries a one-character tag and a colon:
//! `0:"<escaped text>"` is a text payload, `e:` and `d:` are completion and
//! metadata markers. Everything else is ignored.

/// A classified protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolLine<'a> {
    /// Payload text after quote stripping and unescaping. May be empty.
    TextPayload(String),
    /// `e:` marker, raw content after the tag.
    Completion(&'a str),
    /// `d:` marker, raw content after the tag.
    Metadata(&'a str),
    Unknown,
}

/// Classifies a single decoded line. Surrounding whitespace is trimmed first.
pub fn parse_line(line: &str) -> ProtocolLine<'_> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("0:") {
        ProtocolLine::TextPayload(decode_payload(rest))
    } else if let Some(rest) = line.strip_prefix("e:") {
        ProtocolLine::Completion(rest)
    } else if let Some(rest) = line.strip_prefix("d:") {
        ProtocolLine::Metadata(rest)
    } else {
        ProtocolLine::Unknown
    }
}

/// Strips one pair of enclosing quotes, then unescapes.
///
/// Unescaping is three whole-string passes in a fixed order:
/// `\n` → newline, `\"` → `"`, `\\` → `\`. The order is observable,
/// e.g. `\\n` becomes a backslash followed by a newline.
pub fn decode_payload(raw: &str) -> String {
    let inner = strip_quote_pair(raw);
    inner
        .replace("\\n", "\n")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}

fn strip_quote_pair(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
}
