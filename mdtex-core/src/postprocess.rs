//! Rewrite passes over an assembled chapter.
//!
//! Runs once per chapter, after every section has been through the engine.
//! Expands the escape directives, attaches audio examples to their captions,
//! cleans up footnotes and turns internal links into cross-references.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::brackets::{matching_brace_end_skipping, split_group};
use crate::config::PipelineConfig;
use crate::directive::{self, Directive, Icon};
use crate::engine::{escape_latex, is_external_url, unescape_latex};
use crate::error::{Error, Result};
use crate::rules::{Rule, run_rules};
use crate::slug::slugify;
use crate::stats::BuildStats;

const LINK_ICON: &str = r"\faLink";
const AUDIO_SUFFIX: &str = r"\enskip\faHeadphones";
const FOOTNOTE: &str = r"\footnote";
const MINTINLINE: &str = r"\mintinline";
const MINTED_BEGIN: &str = r"\begin{minted}";
const MINTED_END: &str = r"\end{minted}";

static FILE_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\\label\{[^}\n]+?\.md\}%(.*)$").unwrap());
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^@\n{}]+?)\]\((.*?)\)").unwrap());

pub struct PostprocessContext<'a> {
    pub config: &'a PipelineConfig,
    pub stats: &'a mut BuildStats,
}

/// Passes in the order they run.
pub fn rules<'a>() -> [Rule<PostprocessContext<'a>>; 9] {
    [
        Rule::new("tabs", expand_tabs),
        Rule::new("directives", expand_directives),
        Rule::new("media-paths", rewrite_media_paths),
        Rule::new("link-fixups", apply_link_fixups),
        Rule::new("audio-captions", stitch_audio),
        Rule::new("captioned-audio", stitch_captioned_audio),
        Rule::new("footnote-code", plain_code_in_footnotes),
        Rule::new("internal-links", resolve_links),
        Rule::new("leftovers", reject_leftovers),
    ]
}

/// Turn an assembled chapter into final LaTeX.
pub fn postprocess(tex: &str, ctx: &mut PostprocessContext<'_>) -> Result<String> {
    run_rules(&rules(), tex, ctx)
}

fn expand_tabs(text: &str, ctx: &mut PostprocessContext<'_>) -> Result<String> {
    Ok(text.replace('\t', &" ".repeat(ctx.config.tab_width)))
}

fn expand_directives(text: &str, ctx: &mut PostprocessContext<'_>) -> Result<String> {
    let config = ctx.config;
    let stats = &mut *ctx.stats;
    let text = directive::expand(text, |d| match d {
        Directive::NewPage => Some(r"\newpage".to_string()),
        Directive::ResetPageColor => Some(r"\pagecolor{normal}".to_string()),
        Directive::PageColor(doc_type) => {
            let color = config.page_color(doc_type).unwrap_or_else(|| {
                stats.warn(format!("no page color configured for document type '{doc_type}'"));
                "normal"
            });
            Some(format!(r"\pagecolor{{{color}}}"))
        }
        Directive::Label(slug) => Some(format!(r"\label{{{slug}}}")),
        Directive::Icon(Icon::Link) => Some(LINK_ICON.to_string()),
        Directive::Icon(Icon::Headphones) => Some(r"\faHeadphones*".to_string()),
        // Stitched onto captions by later passes.
        Directive::Audio(_) | Directive::CaptionedAudio { .. } => None,
    });

    let mut text = text;
    for (name, color) in &config.special_types {
        let name = escape_latex(name);
        text = text.replace(
            &format!(r"\item[{name}]"),
            &format!(r"\item[\colorbox{{{color}}}{{{name}}}]"),
        );
    }
    Ok(text)
}

fn rewrite_media_paths(text: &str, ctx: &mut PostprocessContext<'_>) -> Result<String> {
    Ok(match &ctx.config.media_target {
        Some(target) if !ctx.config.media_prefix.is_empty() => text.replace(&ctx.config.media_prefix, target),
        _ => text.to_string(),
    })
}

fn apply_link_fixups(text: &str, ctx: &mut PostprocessContext<'_>) -> Result<String> {
    let mut text = text.to_string();
    for fixup in &ctx.config.link_fixups {
        text = text.replace(&fixup.from, &fixup.to);
    }
    Ok(text)
}

/// Start of the window made of the line `text` ends in plus the `lines`
/// lines before it.
fn window_start(text: &str, lines: usize) -> usize {
    text.rmatch_indices('\n')
        .nth(lines)
        .map_or(0, |(idx, _)| idx + 1)
}

fn first_audio(text: &str) -> Option<(std::ops::Range<usize>, String)> {
    directive::find_all(text).into_iter().find_map(|(range, d)| match d {
        Directive::Audio(path) => Some((range, path)),
        _ => None,
    })
}

fn first_captioned_audio(text: &str) -> Option<(std::ops::Range<usize>, String, String)> {
    directive::find_all(text).into_iter().find_map(|(range, d)| match d {
        Directive::CaptionedAudio { id, caption } => Some((range, id, caption)),
        _ => None,
    })
}

/// Mark the link icon of the caption just above each bare audio example and
/// drop the marker.
fn stitch_audio(text: &str, ctx: &mut PostprocessContext<'_>) -> Result<String> {
    let mut text = text.to_string();

    while let Some((range, path)) = first_audio(&text) {
        let before = &text[..range.start];
        let start = window_start(before, ctx.config.audio_caption_window);
        let icon = before[start..]
            .rfind(r"\caption")
            .map(|caption| start + caption)
            .and_then(|caption| before[caption..].find(LINK_ICON).map(|icon| caption + icon));

        text = match icon {
            Some(icon) => {
                let after_icon = icon + LINK_ICON.len();
                let suffix = if text[after_icon..].starts_with(AUDIO_SUFFIX) { "" } else { AUDIO_SUFFIX };
                format!(
                    "{}{suffix}{}{}",
                    &text[..after_icon],
                    &text[after_icon..range.start],
                    &text[range.end..]
                )
            }
            None => {
                ctx.stats.warn(format!("audio example '{path}' has no caption above it, dropped"));
                format!("{}{}", &text[..range.start], &text[range.end..])
            }
        };
    }

    Ok(text)
}

/// Replace each captioned audio example with its caption and a link to the
/// example on the web page the enclosing section came from.
fn stitch_captioned_audio(text: &str, ctx: &mut PostprocessContext<'_>) -> Result<String> {
    let mut text = text.to_string();

    while let Some((range, id, caption)) = first_captioned_audio(&text) {
        let before = &text[..range.start];
        // The label line, the line after it, then up to the window.
        let start = window_start(before, ctx.config.audio_label_window + 2);
        let page_url = FILE_LABEL_RE
            .captures_iter(&before[start..])
            .last()
            .map(|caps| caps[1].trim().to_string());

        let caption = escape_latex(&caption);
        let replacement = match page_url {
            Some(url) => format!(r"{caption}: \href{{{url}\#{id}}}{{\faHeadphones}}"),
            None => {
                ctx.stats.warn(format!("audio example '{id}' has no page label above it, link dropped"));
                caption
            }
        };
        text = format!("{}{replacement}{}", &text[..range.start], &text[range.end..]);
    }

    Ok(text)
}

/// `\mintinline` does not work inside `\footnote`; use `\texttt` there.
fn plain_code_in_footnotes(text: &str, _ctx: &mut PostprocessContext<'_>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(idx) = rest.find(FOOTNOTE) {
        let body_start = idx + FOOTNOTE.len();
        out.push_str(&rest[..body_start]);
        rest = &rest[body_start..];
        if let Some(len) = footnote_group_len(rest) {
            out.push('{');
            out.push_str(&plain_inline_code(&rest[1..len - 1]));
            out.push('}');
            rest = &rest[len..];
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Length of the `{...}` group opening `text`, stepping over `\mintinline`
/// arguments, whose delimited form holds unbalanced braces.
fn footnote_group_len(text: &str) -> Option<usize> {
    if !text.starts_with('{') {
        return None;
    }
    matching_brace_end_skipping(text, |rest| {
        let (_, after) = rest.strip_prefix(MINTINLINE).and_then(parse_mintinline)?;
        Some(rest.len() - after.len())
    })
}

fn plain_inline_code(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(idx) = rest.find(MINTINLINE) {
        out.push_str(&rest[..idx]);
        let command = &rest[idx..];
        match parse_mintinline(&command[MINTINLINE.len()..]) {
            Some((code, after)) => {
                out.push_str(&format!(r"\texttt{{{}}}", escape_latex(code)));
                rest = after;
            }
            None => {
                out.push_str(MINTINLINE);
                rest = &command[MINTINLINE.len()..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Split `{lexer}{code}rest` or `{lexer}|code|rest` into code and rest.
fn parse_mintinline(args: &str) -> Option<(&str, &str)> {
    let (_lexer, rest) = split_group(args)?;
    if rest.starts_with('{') {
        return split_group(rest);
    }
    let delim = rest.chars().next()?;
    let code_start = delim.len_utf8();
    let code_len = rest[code_start..].find(delim)?;
    let code_end = code_start + code_len;
    Some((&rest[code_start..code_end], &rest[code_end + delim.len_utf8()..]))
}

/// Rewrite `[text](page.md#anchor)` into `text (se \ref{anchor})`.
fn resolve_links(text: &str, ctx: &mut PostprocessContext<'_>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    // Code listings are verbatim; brackets there are program text.
    while let Some(begin) = rest.find(MINTED_BEGIN) {
        out.push_str(&resolve_links_in(&rest[..begin], ctx));
        let verbatim = &rest[begin..];
        let end = verbatim
            .find(MINTED_END)
            .map_or(verbatim.len(), |end| end + MINTED_END.len());
        out.push_str(&verbatim[..end]);
        rest = &verbatim[end..];
    }

    out.push_str(&resolve_links_in(rest, ctx));
    Ok(out)
}

fn resolve_links_in(text: &str, ctx: &mut PostprocessContext<'_>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in LINK_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        // Image syntax never reaches this point as markdown, but a literal
        // `![..](..)` in running text is not a link either.
        if text[..whole.start()].ends_with('!') {
            continue;
        }
        let dest = unescape_latex(&caps[2]);
        if is_external_url(&dest) {
            continue;
        }

        let label = link_label(&dest, ctx.stats);
        out.push_str(&text[last..whole.start()]);
        out.push_str(&format!(r"{} ({} \ref{{{label}}})", &caps[1], ctx.config.see_phrase));
        last = whole.end();
    }

    out.push_str(&text[last..]);
    out
}

/// The label an internal link points at: the slugified anchor when there
/// is one, else the target's file name.
fn link_label(dest: &str, stats: &mut BuildStats) -> String {
    let (path, anchor) = match dest.split_once('#') {
        Some((path, anchor)) => (path, Some(anchor)),
        None => (dest, None),
    };
    let file_name = path.rsplit('/').next().unwrap_or(path);

    if !file_name.ends_with(".md") {
        stats.warn(format!("Unsupported link: {dest}, resolved on a best-effort basis"));
    }

    match anchor {
        Some(anchor) if !anchor.is_empty() => slugify(anchor),
        _ => file_name.to_string(),
    }
}

fn reject_leftovers(text: &str, _ctx: &mut PostprocessContext<'_>) -> Result<String> {
    let leftovers = directive::leftovers(text);
    match leftovers.first() {
        Some(first) => Err(Error::UnexpandedDirective {
            count: leftovers.len(),
            first: first.to_string(),
        }),
        None => Ok(text.to_string()),
    }
}
