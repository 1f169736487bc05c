//! Nested curly-brace scanning for LaTeX command arguments.
//!
//! Regexes cannot follow nested `{...}` groups, so command bodies such as
//! `\footnote{see \emph{this}}` are delimited with this scanner instead.

/// Find the end of the first balanced `{...}` group in `text`.
///
/// Returns the byte offset just past the closing brace. Braces preceded by
/// an odd number of backslashes (`\{`, `\}`) are literal and not counted.
/// Returns `None` when no brace opens or the group never closes.
pub fn matching_brace_end(text: &str) -> Option<usize> {
    matching_brace_end_skipping(text, |_| None)
}

/// [`matching_brace_end`] with a hook for spans the scanner must step over.
///
/// At every unescaped position `skip` sees the remaining text; returning
/// `Some(len)` jumps `len` bytes ahead without counting braces in between.
/// `len` must land on a char boundary.
pub fn matching_brace_end_skipping(text: &str, skip: impl Fn(&str) -> Option<usize>) -> Option<usize> {
    let mut depth = 0usize;
    let mut opened = false;
    let mut backslashes = 0usize;
    let mut idx = 0;

    while let Some(c) = text[idx..].chars().next() {
        let escaped = backslashes % 2 == 1;
        if !escaped {
            if let Some(len) = skip(&text[idx..]).filter(|len| *len > 0) {
                idx += len;
                backslashes = 0;
                continue;
            }
        }
        idx += c.len_utf8();

        if c == '\\' {
            backslashes += 1;
            continue;
        }
        backslashes = 0;
        if escaped {
            continue;
        }

        match c {
            '{' => {
                depth += 1;
                opened = true;
            }
            '}' if opened => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }

    None
}

/// Split a brace group starting exactly at `text[0] == '{'` into its inner
/// body and the remainder after the closing brace.
pub fn split_group(text: &str) -> Option<(&str, &str)> {
    if !text.starts_with('{') {
        return None;
    }
    let end = matching_brace_end(text)?;
    Some((&text[1..end - 1], &text[end..]))
}
