/// Tallies accumulated over a whole build and reported at the end.
///
/// Passed explicitly through every pipeline stage that counts something.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildStats {
    pub audio_examples: usize,
    pub diagrams: usize,
    pub diagrams_rendered: usize,
    pub code_blocks: usize,
    pub documents: usize,
    pub chapters: usize,
    pub warnings: Vec<String>,
}

impl BuildStats {
    /// Record a recovered problem and log it.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.warnings.push(message);
    }
}
