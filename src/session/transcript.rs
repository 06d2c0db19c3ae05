use crate::protocol::TranscriptFragment;

/// Merges transcript fragments into one appendable text stream.
///
/// Finalized text is append-only. The trailing partial span is replaced
/// wholesale by every partial fragment and cleared by every final one, so
/// the displayed text is always `committed + pending_partial`. Fragments
/// are applied strictly in arrival order; the transport preserves send
/// order, so there is no reordering buffer.
#[derive(Debug, Clone, Default)]
pub struct TranscriptAssembler {
    committed: String,
    pending_partial: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fragment.
    pub fn apply(&mut self, fragment: &TranscriptFragment) {
        if fragment.is_partial {
            self.pending_partial = fragment.text.clone();
        } else {
            self.committed.push_str(&fragment.text);
            self.committed.push(' ');
            self.pending_partial.clear();
        }
    }

    /// Finalized text, append-only
    pub fn committed(&self) -> &str {
        &self.committed
    }

    /// Best-effort text for audio the backend has not finalized yet
    pub fn pending_partial(&self) -> &str {
        &self.pending_partial
    }

    /// Committed text followed by the trailing partial span
    pub fn display_text(&self) -> String {
        format!("{}{}", self.committed, self.pending_partial)
    }

    pub fn clear(&mut self) {
        self.committed.clear();
        self.pending_partial.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.pending_partial.is_empty()
    }
}
