//! Boundary-seeking text chunker
//!
//! Splits rendered session text into overlapping passages, preferring to
//! cut at sentence ends, then newlines, then spaces, before accepting a
//! hard cut at the size limit.

/// Split `text` into overlapping passages of roughly `chunk_size` chars.
///
/// A break point is only accepted in the back half of the window so short
/// tail fragments don't starve the chunk. Adjacent chunks share roughly
/// `overlap` characters when a break point is found.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    if len <= chunk_size {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return vec![];
        }
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = start + chunk_size;
        if end >= len {
            push_trimmed(&mut chunks, &chars[start..]);
            break;
        }

        let floor = start + chunk_size / 2;
        let cut = match find_break(&chars, floor, end) {
            Some(p) => p + 1,
            None => end,
        };

        push_trimmed(&mut chunks, &chars[start..cut]);

        let next = cut.saturating_sub(overlap);
        // A break point always lands past the window midpoint, so this
        // only trips on degenerate overlap >= chunk_size / 2 settings.
        start = if next > start { next } else { cut };
    }

    chunks
}

/// Find the last break position in `[floor, end)`, by preference:
/// sentence end, newline, space. Returns the index of the break char.
fn find_break(chars: &[char], floor: usize, end: usize) -> Option<usize> {
    let mut newline = None;
    let mut space = None;

    let mut i = end;
    while i > floor {
        i -= 1;
        if chars[i] == '.' && i + 1 < chars.len() && chars[i + 1] == ' ' {
            return Some(i);
        }
        if newline.is_none() && chars[i] == '\n' {
            newline = Some(i);
        }
        if space.is_none() && chars[i] == ' ' {
            space = Some(i);
        }
    }

    newline.or(space)
}

fn push_trimmed(chunks: &mut Vec<String>, slice: &[char]) {
    let s: String = slice.iter().collect();
    let trimmed = s.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}
