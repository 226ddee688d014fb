//! Splitting decoded text into protocol lines.

use std::str::FromStr;

use serde::Deserialize;

/// How decoded text is cut into lines across chunk boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineFraming {
    /// A trailing fragment without a newline is held until the next chunk
    /// and flushed as a final line at end of stream.
    #[default]
    Buffered,
    /// Every chunk is split on its own. A line spread over two chunks is
    /// seen as two separate fragments.
    PerChunk,
}

impl FromStr for LineFraming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffered" => Ok(LineFraming::Buffered),
            "per_chunk" | "per-chunk" => Ok(LineFraming::PerChunk),
            other => Err(format!(
                "unknown line framing '{other}' (expected 'buffered' or 'per_chunk')"
            )),
        }
    }
}

#[derive(Debug)]
pub struct LineSplitter {
    framing: LineFraming,
    partial: String,
}

impl LineSplitter {
    pub fn new(framing: LineFraming) -> Self {
        Self {
            framing,
            partial: String::new(),
        }
    }

    /// Returns the lines completed by `text`, in order.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        match self.framing {
            LineFraming::PerChunk => text.split('\n').map(str::to_owned).collect(),
            LineFraming::Buffered => {
                self.partial.push_str(text);
                let Some(last_newline) = self.partial.rfind('\n') else {
                    return Vec::new();
                };
                let remainder = self.partial.split_off(last_newline + 1);
                let complete = std::mem::replace(&mut self.partial, remainder);
                complete[..last_newline]
                    .split('\n')
                    .map(str::to_owned)
                    .collect()
            }
        }
    }

    /// Takes the held fragment, if any. Always `None` for per-chunk framing.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }

    /// Drops any held fragment.
    pub fn discard(&mut self) -> usize {
        let dropped = self.partial.len();
        self.partial.clear();
        dropped
    }
}
