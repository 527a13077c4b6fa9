//! Removal of embedded control markers from raw gateway text.
//!
//! The chat gateway interleaves structured control messages of the shape
//! `{"type": "<identifier>"}` (timeout notices and similar) into the same
//! text stream as assistant output. They must never reach the screen.

/// Strips every control marker from `raw`, rewrites literal `\n` escape
/// sequences into real line breaks, and trims surrounding whitespace.
///
/// Idempotent: applying it to its own output is a no-op.
pub fn filter_sentinels(raw: &str) -> String {
    strip_control_text(raw).trim().to_string()
}

/// The untrimmed marker strip. Chunk-at-a-time callers need leading/trailing
/// whitespace preserved so inter-chunk spacing survives merging.
pub fn strip_control_text(raw: &str) -> String {
    let mut current = raw.to_string();

    // Removing a marker can splice the surrounding fragments into a fresh
    // marker (or a fresh `\n` escape), so both rewrites run to a fixpoint.
    loop {
        let next = strip_markers(&current.replace("\\n", "\n"));
        if next == current {
            break;
        }
        current = next;
    }

    current
}

fn strip_markers(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('{') {
        let (head, tail) = rest.split_at(start);
        output.push_str(head);

        match marker_len(tail) {
            Some(len) => rest = &tail[len..],
            None => {
                output.push('{');
                rest = &tail[1..];
            }
        }
    }

    output.push_str(rest);
    output
}

/// Returns the byte length of a control marker starting at the first byte of
/// `tail`, or `None` when `tail` does not begin with one.
///
/// Keep the parser lightweight: the marker grammar is fixed, so a scanner is
/// enough and nothing resembling JSON (extra keys, nesting) is ever consumed.
fn marker_len(tail: &str) -> Option<usize> {
    let bytes = tail.as_bytes();
    let mut index = 0;

    let expect = |token: &str, at: usize| -> Option<usize> {
        if tail[at..].starts_with(token) {
            Some(at + token.len())
        } else {
            None
        }
    };

    index = expect("{", index)?;
    index = skip_whitespace(bytes, index);
    index = expect("\"type\"", index)?;
    index = skip_whitespace(bytes, index);
    index = expect(":", index)?;
    index = skip_whitespace(bytes, index);
    index = expect("\"", index)?;

    let identifier_start = index;
    while index < bytes.len() && is_identifier_byte(bytes[index]) {
        index += 1;
    }
    if index == identifier_start {
        return None;
    }

    index = expect("\"", index)?;
    index = skip_whitespace(bytes, index);
    index = expect("}", index)?;

    Some(index)
}

fn skip_whitespace(bytes: &[u8], mut index: usize) -> usize {
    while index < bytes.len() && bytes[index].is_ascii_whitespace() {
        index += 1;
    }
    index
}

fn is_identifier_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-'
}
