//! Document loading and chunking for question answering.

mod loader;
mod splitter;

pub use loader::{DocumentFormat, extract_text};
pub use splitter::TextSplitter;

use serde::{Deserialize, Serialize};

/// Result of loading a document into a session's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Indexed { name: String, chunks: usize },
    /// The document contained no text; the previous index is kept.
    NoContent { name: String },
}

impl LoadOutcome {
    pub fn chunks(&self) -> usize {
        match self {
            LoadOutcome::Indexed { chunks, .. } => *chunks,
            LoadOutcome::NoContent { .. } => 0,
        }
    }
}
