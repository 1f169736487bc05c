//! Escape directives carried through the typeset engine.
//!
//! The preprocessor cannot write LaTeX into markdown: the engine would escape
//! it. Instead it writes directives of the form
//!
//! ```text
//! !!!KIND!!!
//! !!!KIND:field:field!!!
//! ```
//!
//! which the postprocessor replaces with final LaTeX. `!!!` followed directly
//! by an uppercase letter never occurs in the source dialect (admonitions are
//! `!!! type`). Field bytes outside `[A-Za-z0-9 ]` are written as `=XX` hex
//! pairs so no markdown or LaTeX special character ever reaches the engine.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Delimiter wrapped around every directive.
pub const TOKEN: &str = "!!!";

static DIRECTIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!!!([A-Z][A-Z_]*)((?::[A-Za-z0-9 =]*)*)!!!").unwrap());

/// Icons available to [`Directive::Icon`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    Link,
    Headphones,
}

impl Icon {
    fn name(self) -> &'static str {
        match self {
            Icon::Link => "faLink",
            Icon::Headphones => "faHeadphones",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "faLink" => Some(Icon::Link),
            "faHeadphones" => Some(Icon::Headphones),
            _ => None,
        }
    }
}

/// A directive written by the preprocessor or assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    NewPage,
    ResetPageColor,
    /// Page color for a special document type, keyed by the type name.
    PageColor(String),
    /// Cross-reference anchor for a heading.
    Label(String),
    Icon(Icon),
    /// Audio example without its own caption; carries the media path.
    Audio(String),
    /// Audio example with a caption block and an anchor id on the web page.
    CaptionedAudio { id: String, caption: String },
}

impl Directive {
    pub fn kind(&self) -> &'static str {
        match self {
            Directive::NewPage => "NEWPAGE",
            Directive::ResetPageColor => "RESETPAGECOLOR",
            Directive::PageColor(_) => "PAGECOLOR",
            Directive::Label(_) => "LABEL",
            Directive::Icon(_) => "ICON",
            Directive::Audio(_) => "AUDIO",
            Directive::CaptionedAudio { .. } => "CAPTIONEDAUDIO",
        }
    }

    fn fields(&self) -> Vec<&str> {
        match self {
            Directive::NewPage | Directive::ResetPageColor => Vec::new(),
            Directive::PageColor(doc_type) => vec![doc_type],
            Directive::Label(slug) => vec![slug],
            Directive::Icon(icon) => vec![icon.name()],
            Directive::Audio(path) => vec![path],
            Directive::CaptionedAudio { id, caption } => vec![id, caption],
        }
    }

    /// Serialize into engine-safe text.
    pub fn escape(&self) -> String {
        let mut out = String::from(TOKEN);
        out.push_str(self.kind());
        for field in self.fields() {
            out.push(':');
            out.push_str(&encode_field(field));
        }
        out.push_str(TOKEN);
        out
    }

    /// Rebuild a directive from its kind and decoded fields.
    ///
    /// Returns `None` for unknown kinds or a field count that does not fit.
    pub fn from_parts(kind: &str, fields: &[String]) -> Option<Self> {
        let directive = match (kind, fields) {
            ("NEWPAGE", []) => Directive::NewPage,
            ("RESETPAGECOLOR", []) => Directive::ResetPageColor,
            ("PAGECOLOR", [doc_type]) => Directive::PageColor(doc_type.clone()),
            ("LABEL", [slug]) => Directive::Label(slug.clone()),
            ("ICON", [name]) => Directive::Icon(Icon::from_name(name)?),
            ("AUDIO", [path]) => Directive::Audio(path.clone()),
            ("CAPTIONEDAUDIO", [id, caption]) => Directive::CaptionedAudio {
                id: id.clone(),
                caption: caption.clone(),
            },
            _ => return None,
        };
        Some(directive)
    }

    fn from_captures(caps: &Captures<'_>) -> Option<Self> {
        let fields: Vec<String> = caps[2]
            .split(':')
            .skip(1)
            .map(decode_field)
            .collect();
        Self::from_parts(&caps[1], &fields)
    }
}

/// Every directive in `text` with its byte range. Unknown kinds are skipped.
pub fn find_all(text: &str) -> Vec<(Range<usize>, Directive)> {
    DIRECTIVE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let range = caps.get(0)?.range();
            Directive::from_captures(&caps).map(|d| (range, d))
        })
        .collect()
}

/// Replace directives for which `expand_one` returns a replacement.
///
/// Directives it declines, and unknown kinds, are left in place. Replaced
/// text loses its delimiters, so expanding the output again is a no-op.
pub fn expand(text: &str, mut expand_one: impl FnMut(&Directive) -> Option<String>) -> String {
    DIRECTIVE_RE
        .replace_all(text, |caps: &Captures<'_>| {
            Directive::from_captures(caps)
                .and_then(|d| expand_one(&d))
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Raw text of every directive-shaped marker still present, known or not.
pub fn leftovers(text: &str) -> Vec<&str> {
    DIRECTIVE_RE.find_iter(text).map(|m| m.as_str()).collect()
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b' '
}

fn encode_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for &byte in field.as_bytes() {
        if is_plain(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("={byte:02X}"));
        }
    }
    out
}

fn decode_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'=' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_kinds_have_no_fields() {
        assert_eq!(Directive::NewPage.escape(), "!!!NEWPAGE!!!");
        assert_eq!(Directive::ResetPageColor.escape(), "!!!RESETPAGECOLOR!!!");
    }

    #[test]
    fn special_characters_are_hex_encoded() {
        let escaped = Directive::Audio("lyd/sinus_1.mp3".into()).escape();
        assert_eq!(escaped, "!!!AUDIO:lyd=2Fsinus=5F1=2Emp3!!!");
    }

    #[test]
    fn non_ascii_survives_encoding() {
        let directive = Directive::PageColor("Øvelser".into());
        let escaped = directive.escape();
        assert!(escaped.is_ascii());
        assert_eq!(find_all(&escaped), vec![(0..escaped.len(), directive)]);
    }

    #[test]
    fn captioned_audio_keeps_colons_in_caption() {
        let directive = Directive::CaptionedAudio {
            id: "ex_1".into(),
            caption: "Lyd: sinus & støj".into(),
        };
        let text = format!("before {} after", directive.escape());
        let found = find_all(&text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, directive);
        assert_eq!(&text[found[0].0.clone()], directive.escape());
    }

    #[test]
    fn expand_replaces_accepted_and_keeps_declined() {
        let text = format!(
            "{}\n{}\n{}",
            Directive::NewPage.escape(),
            Directive::Label("intro".into()).escape(),
            Directive::Audio("a.mp3".into()).escape(),
        );
        let out = expand(&text, |d| match d {
            Directive::NewPage => Some(r"\newpage".into()),
            Directive::Label(slug) => Some(format!(r"\label{{{slug}}}")),
            _ => None,
        });
        assert_eq!(
            out,
            format!("\\newpage\n\\label{{intro}}\n{}", Directive::Audio("a.mp3".into()).escape())
        );
    }

    #[test]
    fn expansion_is_idempotent() {
        let text = Directive::Label("intro".into()).escape();
        let once = expand(&text, |_| Some("X".into()));
        let twice = expand(&once, |_| Some("Y".into()));
        assert_eq!(once, "X");
        assert_eq!(twice, "X");
    }

    #[test]
    fn unknown_kinds_are_untouched_but_reported() {
        let text = "a !!!SPARKLE:x!!! b";
        assert_eq!(expand(text, |_| Some(String::new())), text);
        assert!(find_all(text).is_empty());
        assert_eq!(leftovers(text), vec!["!!!SPARKLE:x!!!"]);
    }

    #[test]
    fn admonition_markers_are_not_directives() {
        let text = "!!! note \"Husk\"\n    body\n";
        assert!(leftovers(text).is_empty());
    }

    #[test]
    fn wrong_field_count_is_not_a_known_directive() {
        assert!(find_all("!!!LABEL!!!").is_empty());
        assert!(find_all("!!!NEWPAGE:x!!!").is_empty());
    }

    #[test]
    fn malformed_hex_is_kept_literally() {
        assert_eq!(decode_field("a=ZZb="), "a=ZZb=");
        assert_eq!(decode_field("=41=42"), "AB");
    }
}
