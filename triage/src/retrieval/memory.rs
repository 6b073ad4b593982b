//! Knowledge memory accumulated across retrieval iterations.

/// Marker a model reply must contain to be kept as knowledge.
pub const MEMORY_MARKER: &str = "##MEMORY##";

/// Concatenation of marked per-iteration replies plus the final conclusion.
#[derive(Clone, Debug, Default)]
pub struct KnowledgeMemory {
    entries: Vec<String>,
}

impl KnowledgeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the reply when it carries the memory marker.
    pub fn observe(&mut self, reply: &str) {
        if reply.contains(MEMORY_MARKER) {
            self.entries.push(reply.trim().to_string());
        }
    }

    /// Appends the loop's final conclusion, if any.
    pub fn conclude(&mut self, conclusion: &str) {
        if !conclusion.is_empty() {
            self.entries.push(conclusion.trim().to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The accumulated memory, entries separated by blank lines.
    pub fn render(&self) -> String {
        self.entries.join("\n\n")
    }
}
