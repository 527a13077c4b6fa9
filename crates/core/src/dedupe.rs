//! Collapses retransmitted sentence overlaps in streamed assistant text.
//!
//! The upstream generator can resend spans it already delivered when it
//! reconnects or corrects itself. Rather than a full diff, the cleaned text is
//! split into sentence-like units and units subsumed by another unit are
//! dropped.

/// Units at or below this trimmed length are always kept; containment checks
/// on tiny fragments ("Ok.", "No!") produce false positives.
const MIN_COMPARABLE_CHARS: usize = 5;

/// Removes sentence units that are contained in, or made redundant by, a
/// longer unit elsewhere in `text`.
///
/// Units are accepted greedily in original order. A new unit that is contained
/// in an accepted unit is dropped; a new unit that contains an accepted unit
/// replaces it, so the longer restatement wins. Containment ignores trailing
/// terminator punctuation, otherwise `"I am fine."` would never match inside
/// `"I am fine and happy."`.
///
/// Idempotent: once accepted, no unit subsumes another.
pub fn dedupe(text: &str) -> String {
    let mut accepted: Vec<&str> = Vec::new();

    for unit in split_units(text) {
        let key = containment_key(unit);

        if key.chars().count() < MIN_COMPARABLE_CHARS {
            accepted.push(unit);
            continue;
        }

        if accepted
            .iter()
            .any(|kept| is_comparable(kept) && containment_key(kept).contains(key))
        {
            continue;
        }

        // The longer restatement supersedes every accepted unit it contains.
        accepted.retain(|kept| !(is_comparable(kept) && key.contains(containment_key(kept))));
        accepted.push(unit);
    }

    accepted.join(" ").trim().to_string()
}

fn is_comparable(unit: &str) -> bool {
    containment_key(unit).chars().count() >= MIN_COMPARABLE_CHARS
}

/// Comparison key for one unit: trimmed, trailing `.`/`!`/`?` removed.
fn containment_key(unit: &str) -> &str {
    unit.trim().trim_end_matches(['.', '!', '?'])
}

/// Splits `text` into sentence-like units on boundaries following `.`, `!` or
/// `?` plus whitespace. Units come back trimmed and non-empty, terminator
/// punctuation included.
fn split_units(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let bytes = text.as_bytes();
    let mut unit_start = 0;
    let mut index = 0;

    while index < bytes.len() {
        if matches!(bytes[index], b'.' | b'!' | b'?') {
            // Consume the full terminator run ("?!", "...").
            while index < bytes.len() && matches!(bytes[index], b'.' | b'!' | b'?') {
                index += 1;
            }
            if index < bytes.len() && bytes[index].is_ascii_whitespace() {
                push_unit(&mut units, &text[unit_start..index]);
                while index < bytes.len() && bytes[index].is_ascii_whitespace() {
                    index += 1;
                }
                unit_start = index;
            }
        } else {
            index += 1;
        }
    }

    push_unit(&mut units, &text[unit_start..]);
    units
}

fn push_unit<'a>(units: &mut Vec<&'a str>, raw: &'a str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        units.push(trimmed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longer_restatement_replaces_subsumed_unit() {
        assert_eq!(
            dedupe("I am fine. I am fine and happy."),
            "I am fine and happy."
        );
    }

    #[test]
    fn later_substring_unit_is_dropped() {
        assert_eq!(
            dedupe("I am fine and happy. I am fine."),
            "I am fine and happy."
        );
    }

    #[test]
    fn unrelated_units_are_kept_in_order() {
        assert_eq!(
            dedupe("First thought here. Second thought here. Third one now."),
            "First thought here. Second thought here. Third one now."
        );
    }

    #[test]
    fn short_units_are_always_kept() {
        assert_eq!(dedupe("Ok. Ok. You are doing well."), "Ok. Ok. You are doing well.");
    }

    #[test]
    fn exact_duplicate_sentence_collapses() {
        assert_eq!(
            dedupe("You are doing well. You are doing well."),
            "You are doing well."
        );
    }

    #[test]
    fn is_idempotent() {
        let inputs = [
            "I am fine. I am fine and happy.",
            "One step at a time. One step. Keep going! Keep going today!",
            "Ok. Ok. No!",
            "Single sentence without terminator",
            "",
        ];

        for text in inputs {
            let once = dedupe(text);
            assert_eq!(dedupe(&once), once, "not idempotent for {text:?}");
        }
    }

    #[test]
    fn splits_on_every_terminator_kind() {
        assert_eq!(
            split_units("One. Two! Three? Four"),
            vec!["One.", "Two!", "Three?", "Four"]
        );
    }

    #[test]
    fn does_not_split_without_following_whitespace() {
        assert_eq!(split_units("about 3.5 miles today"), vec!["about 3.5 miles today"]);
    }
}
