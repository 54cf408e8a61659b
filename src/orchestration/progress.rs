//! Progress-marker parsing for renderer output.
//!
//! The renderer prints free-form text on stdout. Every `print_iter`
//! iterations it emits a line such as
//!
//! ```text
//! Iteration 250 / 1000
//! ```
//!
//! followed by the per-layer losses. [`ProgressTracker`] is fed raw stdout
//! chunks and reports the most recent iteration seen, handling markers
//! split across chunk boundaries.
//!
//! ## Example
//!
//! ```
//! use stylize::orchestration::ProgressTracker;
//!
//! let mut tracker = ProgressTracker::new();
//! assert_eq!(tracker.feed("Iteration 10 / 1000\n  Content 1 loss: 12.5\n"), Some(10));
//! assert_eq!(tracker.feed("Itera"), None);
//! assert_eq!(tracker.feed("tion 20 / 1000\n"), Some(20));
//! ```

use regex::Regex;
use std::sync::LazyLock;

/// Regex for the renderer's progress marker.
static ITERATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Iteration (\d+) / \d+").unwrap());

/// Upper bound on the unterminated line kept between chunks.
const MAX_PENDING_BYTES: usize = 4096;

/// Extract the latest iteration marker in `text`, if any.
pub fn latest_iteration(text: &str) -> Option<u32> {
    ITERATION_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .last()
}

/// Incremental scanner over a stdout stream.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    /// Text after the last newline seen so far.
    pending: String,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stdout chunk.
    ///
    /// Returns the latest iteration found in the text completed by this
    /// chunk, or `None` if the chunk contained no complete marker.
    pub fn feed(&mut self, chunk: &str) -> Option<u32> {
        self.pending.push_str(chunk);
        let found = latest_iteration(&self.pending);

        match self.pending.rfind('\n') {
            Some(pos) => {
                self.pending.drain(..=pos);
            }
            None if found.is_some() => self.pending.clear(),
            None => {}
        }
        self.trim_pending();
        found
    }

    fn trim_pending(&mut self) {
        if self.pending.len() <= MAX_PENDING_BYTES {
            return;
        }
        let mut cut = self.pending.len() - MAX_PENDING_BYTES;
        while !self.pending.is_char_boundary(cut) {
            cut += 1;
        }
        self.pending.drain(..cut);
    }
}
