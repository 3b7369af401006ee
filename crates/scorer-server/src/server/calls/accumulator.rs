use scorer_core::types::DELIMITER;

/// Ordered prompts of the batch currently being built by a streaming call.
///
/// A flush renders the start marker followed by every pending prompt, each
/// preceded by [`DELIMITER`], then the end marker, and leaves the accumulator
/// empty again. The accumulator belongs to a single call and is never shared.
#[derive(Debug, Clone)]
pub struct BatchAccumulator {
    start: &'static str,
    end: &'static str,
    prompts: Vec<String>,
}

impl BatchAccumulator {
    pub const fn new(start: &'static str, end: &'static str) -> Self {
        Self {
            start,
            end,
            prompts: Vec::new(),
        }
    }

    pub fn push(&mut self, prompt: String) {
        self.prompts.push(prompt);
    }

    /// Number of prompts received since the last flush.
    pub fn pending(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Closes the current batch and resets to an empty one.
    pub fn flush(&mut self) -> String {
        let prompts = core::mem::take(&mut self.prompts);
        let body: usize = prompts.iter().map(|p| p.len() + DELIMITER.len()).sum();
        let mut out = String::with_capacity(self.start.len() + body + self.end.len());
        out.push_str(self.start);
        for prompt in &prompts {
            out.push_str(DELIMITER);
            out.push_str(prompt);
        }
        out.push_str(self.end);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorer_core::types::{BATCH_END_MARKER, BATCH_START_MARKER, END_MARKER, START_MARKER};

    #[test]
    fn flush_preserves_arrival_order() {
        let mut batch = BatchAccumulator::new(START_MARKER, END_MARKER);
        for prompt in ["c", "a", "b"] {
            batch.push(prompt.to_string());
        }
        assert_eq!(batch.pending(), 3);
        assert_eq!(batch.flush(), "START __c__a__b END");
    }

    #[test]
    fn empty_flush_contains_only_markers() {
        let mut batch = BatchAccumulator::new(START_MARKER, END_MARKER);
        assert!(batch.is_empty());
        assert_eq!(batch.flush(), "START  END");
    }

    #[test]
    fn flush_resets_for_the_next_batch() {
        let mut batch = BatchAccumulator::new(BATCH_START_MARKER, BATCH_END_MARKER);
        batch.push("0".into());
        assert_eq!(batch.flush(), "BATCH START __0 BATCH END");
        assert!(batch.is_empty());

        batch.push("1".into());
        batch.push("4".into());
        assert_eq!(batch.flush(), "BATCH START __1__4 BATCH END");
    }
}
