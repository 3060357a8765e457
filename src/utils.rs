use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

/// Process-wide counter used for auto-gensyms and fresh local ids.
pub fn next_id() -> usize {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// `*name*`
pub fn is_earmuffed(name: &str) -> bool {
    name.len() > 2 && name.starts_with('*') && name.ends_with('*')
}

/// Calculates the byte offset of a 1-based line and column in the source text.
/// Only called when an error is rendered, so it walks the text from the start.
pub fn offset_at(source: &str, line: usize, column: usize) -> usize {
    let mut current_line = 1;
    let mut current_column = 1;
    for (offset, c) in source.char_indices() {
        if current_line == line && current_column == column {
            return offset;
        }
        if c == '\n' {
            if current_line == line {
                return offset;
            }
            current_line += 1;
            current_column = 1;
        } else {
            current_column += 1;
        }
    }
    source.len()
}
