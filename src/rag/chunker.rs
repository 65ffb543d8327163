use serde::{Deserialize, Serialize};

/// A slice of the document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    /// Character offset of the chunk in the source text.
    pub start_offset: usize,
    pub chunk_index: usize,
}

/// Splits text into overlapping windows of at most `chunk_size` characters.
///
/// A window that does not reach the end of the text is cut back to the last
/// paragraph, line or sentence break in its second half, so chunks rarely end
/// mid-sentence. The next window starts `chunk_overlap` characters before the
/// previous cut.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let chunk_size = chunk_size.max(1);
    let overlap = chunk_overlap.min(chunk_size - 1);

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let hard_end = (start + chunk_size).min(total);
        let end = if hard_end < total {
            find_break(&chars[start..hard_end])
                .map(|cut| start + cut)
                .unwrap_or(hard_end)
        } else {
            hard_end
        };

        let raw: String = chars[start..end].iter().collect();
        let leading = raw.chars().take_while(|c| c.is_whitespace()).count();
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            chunks.push(TextChunk {
                text: trimmed.to_string(),
                start_offset: start + leading,
                chunk_index: chunks.len(),
            });
        }

        if end >= total {
            break;
        }
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    chunks
}

/// Position just after the last break in the back half of `window`.
fn find_break(window: &[char]) -> Option<usize> {
    let min = window.len() / 2;
    let last_matching = |is_break: fn(&[char], usize) -> bool| {
        (min..window.len())
            .rev()
            .find(|&i| is_break(window, i))
            .map(|i| i + 1)
    };

    last_matching(is_paragraph_break)
        .or_else(|| last_matching(is_line_break))
        .or_else(|| last_matching(is_sentence_end))
        .or_else(|| last_matching(is_space))
}

fn is_paragraph_break(window: &[char], i: usize) -> bool {
    window[i] == '\n' && i > 0 && window[i - 1] == '\n'
}

fn is_line_break(window: &[char], i: usize) -> bool {
    window[i] == '\n'
}

fn is_sentence_end(window: &[char], i: usize) -> bool {
    matches!(window[i], '.' | '!' | '?' | '。')
        && window.get(i + 1).map(|c| c.is_whitespace()).unwrap_or(false)
}

fn is_space(window: &[char], i: usize) -> bool {
    window[i] == ' '
}
