//! Per-send accumulator for one live gateway stream.

use crate::dedupe::dedupe;
use crate::merge::merge_overlap;
use crate::sanitize::{filter_sentinels, strip_control_text};
use crate::typewriter::Typewriter;

/// Transient state for one outgoing message's response stream.
///
/// `raw_accumulated` only grows for the lifetime of the session. `clean` is
/// recomputed on every chunk and feeds the typewriter, whose revealed text
/// never exceeds `clean` and converges to it when the reveal drains.
#[derive(Debug, Default)]
pub struct StreamSession {
    raw_accumulated: String,
    merged: String,
    clean: String,
    typewriter: Typewriter,
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests one raw gateway chunk: appends it to the raw log, folds the
    /// marker-stripped text through the overlap merge, and recomputes the
    /// cleaned target. Returns true when the cleaned text changed and the
    /// typewriter was retargeted.
    pub fn push_chunk(&mut self, chunk: &str) -> bool {
        self.raw_accumulated.push_str(chunk);

        // Markers are stripped per chunk (without trimming, which would eat
        // inter-chunk spacing) so the overlap merge compares display text, not
        // control noise. The full filter runs again over the merged text to
        // catch markers split across chunk boundaries.
        self.merged = merge_overlap(&self.merged, &strip_control_text(chunk));
        let next_clean = dedupe(&filter_sentinels(&self.merged));

        if next_clean == self.clean {
            return false;
        }

        self.clean = next_clean;
        self.typewriter.set_target(&self.clean);
        true
    }

    /// Cleaned, authoritative text computed so far.
    pub fn clean(&self) -> &str {
        &self.clean
    }

    /// Raw text received so far, exactly as delivered.
    pub fn raw_accumulated(&self) -> &str {
        &self.raw_accumulated
    }

    pub fn typewriter(&self) -> &Typewriter {
        &self.typewriter
    }

    pub fn typewriter_mut(&mut self) -> &mut Typewriter {
        &mut self.typewriter
    }

    /// Consumes the session and returns the final authoritative content.
    /// Callers must drain the typewriter first so a stale reveal cannot
    /// clobber the final text.
    pub fn into_final_content(self) -> String {
        self.clean
    }
}
