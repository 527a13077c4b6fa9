//! Incremental character reveal for streamed assistant messages.
//!
//! The struct is deliberately synchronous: it tracks what has been revealed
//! against the latest target and exposes one-character steps. The tick cadence
//! lives in the driver loop that owns it, so reveal behavior stays fully
//! testable without timers.

/// Outcome of retargeting the typewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetUpdate {
    /// Target equals the previous one; nothing to do.
    Unchanged,
    /// Target extends the revealed text; the reveal resumes from the current
    /// prefix without restarting or skipping characters.
    Extended,
    /// Target diverged from the revealed prefix; the revealed text was
    /// snapped forward to the full target in one step.
    Rewritten,
}

/// Per-session reveal state. `displayed` is always a prefix of `target` and
/// converges to it as `reveal_next` is driven.
#[derive(Debug, Default)]
pub struct Typewriter {
    displayed: String,
    target: String,
}

impl Typewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text revealed so far.
    pub fn displayed(&self) -> &str {
        &self.displayed
    }

    /// Latest target supplied by the session.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// True while revealed text still trails the target.
    pub fn pending(&self) -> bool {
        self.displayed != self.target
    }

    /// Updates the reveal target. Calls with the current target coalesce into
    /// a no-op, extensions resume from the revealed prefix, and a target that
    /// no longer starts with the revealed text snaps the reveal forward
    /// (corrections are rare and must never leave stale text on screen).
    pub fn set_target(&mut self, target: &str) -> TargetUpdate {
        if target == self.target {
            return TargetUpdate::Unchanged;
        }

        if target.starts_with(&self.displayed) {
            self.target = target.to_string();
            return TargetUpdate::Extended;
        }

        self.target = target.to_string();
        self.displayed = target.to_string();
        TargetUpdate::Rewritten
    }

    /// Reveals one more character of the outstanding delta and returns the
    /// updated text, or `None` when the reveal has drained.
    pub fn reveal_next(&mut self) -> Option<&str> {
        if !self.pending() {
            return None;
        }

        let next = self.target[self.displayed.len()..].chars().next()?;
        self.displayed.push(next);
        Some(&self.displayed)
    }

    /// Reveals the entire outstanding delta at once.
    pub fn snap_to_target(&mut self) {
        self.displayed = self.target.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reveals_monotonic_prefixes_until_drained() {
        let mut typewriter = Typewriter::new();
        assert_eq!(typewriter.set_target("Hello"), TargetUpdate::Extended);

        let mut seen = Vec::new();
        while let Some(displayed) = typewriter.reveal_next() {
            seen.push(displayed.to_string());
        }

        assert_eq!(seen, vec!["H", "He", "Hel", "Hell", "Hello"]);
        for window in seen.windows(2) {
            assert!(window[1].len() > window[0].len());
            assert!("Hello".starts_with(window[1].as_str()));
        }
        assert!(!typewriter.pending());
    }

    #[test]
    fn equal_target_coalesces() {
        let mut typewriter = Typewriter::new();
        typewriter.set_target("Hi");
        assert_eq!(typewriter.set_target("Hi"), TargetUpdate::Unchanged);
    }

    #[test]
    fn longer_target_mid_flight_resumes_without_restart() {
        let mut typewriter = Typewriter::new();
        typewriter.set_target("Hel");
        typewriter.reveal_next();
        typewriter.reveal_next();
        assert_eq!(typewriter.displayed(), "He");

        assert_eq!(typewriter.set_target("Hello there!"), TargetUpdate::Extended);
        assert_eq!(typewriter.displayed(), "He");

        while typewriter.reveal_next().is_some() {}
        assert_eq!(typewriter.displayed(), "Hello there!");
    }

    #[test]
    fn diverging_target_snaps_forward() {
        let mut typewriter = Typewriter::new();
        typewriter.set_target("I am fine.");
        while typewriter.reveal_next().is_some() {}

        // The dedupe layer can replace an accepted sentence with a longer
        // restatement; the revealed text is then no longer a prefix of the
        // target and the reveal snaps forward in one step.
        assert_eq!(
            typewriter.set_target("I am fine and happy."),
            TargetUpdate::Rewritten
        );
        assert_eq!(typewriter.displayed(), "I am fine and happy.");
        assert!(!typewriter.pending());
    }

    #[test]
    fn reveal_steps_on_char_boundaries() {
        let mut typewriter = Typewriter::new();
        typewriter.set_target("héllo");
        assert_eq!(typewriter.reveal_next(), Some("h"));
        assert_eq!(typewriter.reveal_next(), Some("hé"));
        assert_eq!(typewriter.reveal_next(), Some("hél"));
    }
}
