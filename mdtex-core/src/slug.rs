//! Cross-reference label generation for headings and link fragments.

/// Turn a heading or link fragment into a `\label` identifier.
///
/// Whitespace runs become hyphens, everything outside ASCII letters and `-`
/// is dropped, hyphen runs collapse to one, and the result is lowercased.
/// Digits are dropped too, so `"1. Intro"` and `"Intro"` share a label.
///
/// ```
/// assert_eq!(mdtex_core::slugify("Lyd & Rum"), "lyd-rum");
/// ```
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut in_whitespace = false;

    for c in name.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                push_hyphen(&mut slug);
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;

        if c == '-' {
            push_hyphen(&mut slug);
        } else if c.is_ascii_alphabetic() {
            slug.push(c.to_ascii_lowercase());
        }
    }

    slug
}

fn push_hyphen(slug: &mut String) {
    if !slug.ends_with('-') {
        slug.push('-');
    }
}
