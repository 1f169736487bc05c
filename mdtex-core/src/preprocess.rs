//! Rewrites MkDocs material markdown into plain markdown plus directives.
//!
//! Passes, in order:
//!
//! 1. content tabs → emphasized label + dedented body
//! 2. frontmatter → page break and page color for special document types
//! 3. first `abstract` admonition → plain intro paragraph
//! 4. audio examples → `AUDIO` / `CAPTIONEDAUDIO` directives
//! 5. captioned mermaid blocks → rendered image references
//! 6. headings → `LABEL` directive on the following line

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;

use crate::config::PipelineConfig;
use crate::diagram::DiagramBridge;
use crate::directive::Directive;
use crate::error::{Error, Result};
use crate::rules::{Rule, run_rules};
use crate::slug::slugify;
use crate::stats::BuildStats;

static TAB_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^===[!+]?[ \t]+".*"[ \t]*$(?:\n(?:[ \t]*$|    .*$))+"#).unwrap()
});
static TAB_LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?m)^===[!+]?[ \t]+"(.+)"[ \t]*$"#).unwrap());
static INDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^    ").unwrap());

static FRONTMATTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)\A---[ \t]*\n(?s:(.+?))^(?:\.{3}|-{3})").unwrap());

static ABSTRACT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?:!{3}|\?{3}\+?) abstract.*\n((?:\s.*\n+)+?)^#").unwrap());

static CAPTIONED_AUDIO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[type:audio\]\(.+?\)\n/{3} caption\n {4}attrs: \{id: (\w+?)\}\n(.*)\n/{3}").unwrap()
});
static AUDIO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[type:audio\]\((.+?)\)").unwrap());

static MERMAID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?ms)^```\s*mermaid\s*(.+?)\s*```\s*///\s*caption\s*(.+?)\s*///").unwrap()
});

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,10} +(.*)$").unwrap());

/// State shared by the preprocessing passes of one document.
pub struct PreprocessContext<'a, 'b> {
    /// Source path, for error messages.
    pub path: &'a str,
    pub config: &'a PipelineConfig,
    pub diagrams: &'a mut DiagramBridge<'b>,
    pub stats: &'a mut BuildStats,
}

#[derive(Debug, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// The preprocessing passes in application order.
pub fn rules<'a, 'b>() -> [Rule<PreprocessContext<'a, 'b>>; 6] {
    [
        Rule::new("content-tabs", flatten_content_tabs),
        Rule::new("frontmatter", interpret_frontmatter),
        Rule::new("abstract", flatten_abstract),
        Rule::new("audio", escape_audio),
        Rule::new("diagrams", substitute_diagrams),
        Rule::new("heading-labels", label_headings),
    ]
}

/// Run every preprocessing pass over one document.
pub fn preprocess(markdown: &str, ctx: &mut PreprocessContext<'_, '_>) -> Result<String> {
    // Normalise CRLF → LF; every pass matches on `\n`.
    let normalised = markdown.replace("\r\n", "\n");
    let out = run_rules(&rules(), &normalised, ctx)?;
    ctx.stats.documents += 1;
    Ok(out)
}

fn flatten_content_tabs(text: &str, _ctx: &mut PreprocessContext<'_, '_>) -> Result<String> {
    Ok(TAB_BLOCK_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let block = TAB_LABEL_RE.replace_all(&caps[0], "*${1}*");
            INDENT_RE.replace_all(&block, "").into_owned()
        })
        .into_owned())
}

fn interpret_frontmatter(text: &str, ctx: &mut PreprocessContext<'_, '_>) -> Result<String> {
    let Some(caps) = FRONTMATTER_RE.captures(text) else {
        return Ok(text.to_string());
    };

    let front: FrontMatter = serde_yaml::from_str(&caps[1]).map_err(|e| Error::FrontMatter {
        path: ctx.path.to_string(),
        message: e.to_string(),
    })?;
    let doc_type = front
        .tags
        .and_then(|tags| tags.into_iter().next())
        .ok_or_else(|| Error::MissingTags {
            path: ctx.path.to_string(),
        })?;

    let prefix = if ctx.config.page_color(&doc_type).is_some() {
        format!(
            "{}\n{}",
            Directive::NewPage.escape(),
            Directive::PageColor(doc_type).escape()
        )
    } else {
        String::new()
    };

    let end = caps.get(0).map_or(0, |m| m.end());
    Ok(format!("{prefix}{}", &text[end..]))
}

fn flatten_abstract(text: &str, _ctx: &mut PreprocessContext<'_, '_>) -> Result<String> {
    let Some(caps) = ABSTRACT_RE.captures(text) else {
        return Ok(text.to_string());
    };
    let Some(whole) = caps.get(0) else {
        return Ok(text.to_string());
    };

    let intro: Vec<&str> = caps[1].split('\n').map(str::trim).collect();
    Ok(format!(
        "{}{}#{}",
        &text[..whole.start()],
        intro.join("\n"),
        &text[whole.end()..]
    ))
}

fn escape_audio(text: &str, ctx: &mut PreprocessContext<'_, '_>) -> Result<String> {
    let mut count = 0;
    let text = CAPTIONED_AUDIO_RE.replace_all(text, |caps: &Captures<'_>| {
        count += 1;
        Directive::CaptionedAudio {
            id: caps[1].to_string(),
            caption: caps[2].trim().to_string(),
        }
        .escape()
    });
    let text = AUDIO_RE.replace_all(&text, |caps: &Captures<'_>| {
        count += 1;
        Directive::Audio(caps[1].to_string()).escape()
    });
    ctx.stats.audio_examples += count;
    Ok(text.into_owned())
}

fn substitute_diagrams(text: &str, ctx: &mut PreprocessContext<'_, '_>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in MERMAID_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let caption = &caps[2];
        let image = ctx.diagrams.resolve(&caps[1], caption, ctx.stats)?;

        out.push_str(&text[last..whole.start()]);
        out.push_str(&format!("![{caption}]({image})"));
        last = whole.end();
    }

    out.push_str(&text[last..]);
    Ok(out)
}

fn label_headings(text: &str, _ctx: &mut PreprocessContext<'_, '_>) -> Result<String> {
    let mut lines = Vec::new();
    let mut fence: Option<&str> = None;

    for line in text.split('\n') {
        let trimmed = line.trim_start();
        let marker = ["```", "~~~"].into_iter().find(|m| trimmed.starts_with(m));
        match (fence, marker) {
            (None, Some(m)) => fence = Some(m),
            (Some(open), Some(m)) if open == m => fence = None,
            _ => {}
        }
        if fence.is_some() || marker.is_some() {
            lines.push(line.to_string());
            continue;
        }

        match HEADING_RE.captures(line) {
            Some(caps) => {
                let name = caps[1].trim_end().trim_end_matches('#').trim_end();
                let label = Directive::Label(slugify(name)).escape();
                lines.push(format!("{line}\n{label}\n"));
            }
            None => lines.push(line.to_string()),
        }
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::test_support::RecordingRenderer;
    use crate::diagram::{DiagramCache, MemoryDiagramCache};
    use crate::directive::find_all;
    use pretty_assertions::assert_eq;

    fn run(md: &str) -> Result<String> {
        let config = PipelineConfig::default();
        let mut cache = MemoryDiagramCache::new("tex/diagrams");
        let mut renderer = RecordingRenderer::default();
        let mut bridge = DiagramBridge::new(&mut cache, &mut renderer, "tex");
        let mut stats = BuildStats::default();
        let mut ctx = PreprocessContext {
            path: "test.md",
            config: &config,
            diagrams: &mut bridge,
            stats: &mut stats,
        };
        preprocess(md, &mut ctx)
    }

    fn apply(rule: fn(&str, &mut PreprocessContext<'_, '_>) -> Result<String>, md: &str) -> String {
        let config = PipelineConfig::default();
        let mut cache = MemoryDiagramCache::new("d");
        let mut renderer = RecordingRenderer::default();
        let mut bridge = DiagramBridge::new(&mut cache, &mut renderer, "");
        let mut stats = BuildStats::default();
        let mut ctx = PreprocessContext {
            path: "test.md",
            config: &config,
            diagrams: &mut bridge,
            stats: &mut stats,
        };
        rule(md, &mut ctx).unwrap()
    }

    #[test]
    fn content_tabs_are_flattened_independently() {
        let md = "Intro\n\n=== \"Mac\"\n\n    brew install\n\n=== \"Linux\"\n\n    apt install\n\nEnd\n";
        assert_eq!(
            apply(flatten_content_tabs, md),
            "Intro\n\n*Mac*\n\nbrew install\n\n*Linux*\n\napt install\n\nEnd\n"
        );
    }

    #[test]
    fn setext_underline_is_not_a_tab() {
        let md = "Title\n===\n\n    code\n";
        assert_eq!(apply(flatten_content_tabs, md), md);
    }

    #[test]
    fn special_type_frontmatter_becomes_page_break_and_color() {
        let md = "---\ntags:\n  - Øvelser\n---\n# Opgave\n";
        let out = apply(interpret_frontmatter, md);
        assert_eq!(
            out,
            format!(
                "{}\n{}\n# Opgave\n",
                Directive::NewPage.escape(),
                Directive::PageColor("Øvelser".into()).escape()
            )
        );
    }

    #[test]
    fn crlf_sources_are_normalised() {
        let out = run("---\r\ntags:\r\n  - Øvelser\r\n---\r\n\r\n# Lyd og rum\r\n\r\nTekst.\r\n").unwrap();
        assert!(
            out.starts_with(&format!(
                "{}\n{}\n",
                Directive::NewPage.escape(),
                Directive::PageColor("Øvelser".into()).escape()
            )),
            "{out}"
        );
        assert!(!out.contains('\r'));
        assert!(!out.contains("tags"));
        assert!(out.contains(&Directive::Label("lyd-og-rum".into()).escape()));
    }

    #[test]
    fn ordinary_frontmatter_is_deleted() {
        let md = "---\ntitle: Lyd\ntags: [Noter, Lyd]\n...\n# Lyd\n";
        assert_eq!(apply(interpret_frontmatter, md), "\n# Lyd\n");
    }

    #[test]
    fn frontmatter_without_tags_is_fatal() {
        let err = run("---\ntitle: Lyd\n---\n# Lyd\n").unwrap_err();
        assert!(matches!(err, Error::MissingTags { ref path } if path == "test.md"));
    }

    #[test]
    fn frontmatter_with_empty_tags_is_fatal() {
        let err = run("---\ntags: []\n---\n").unwrap_err();
        assert!(matches!(err, Error::MissingTags { .. }));
    }

    #[test]
    fn malformed_frontmatter_is_fatal() {
        let err = run("---\ntags: [unclosed\n---\n").unwrap_err();
        assert!(matches!(err, Error::FrontMatter { .. }));
    }

    #[test]
    fn first_abstract_becomes_intro() {
        let md = "!!! abstract \"Resumé\"\n    Første linje\n    anden linje\n\n# Emne\n\n!!! abstract \"Igen\"\n    Bliver\n\n## Under\n";
        assert_eq!(
            apply(flatten_abstract, md),
            "Første linje\nanden linje\n\n# Emne\n\n!!! abstract \"Igen\"\n    Bliver\n\n## Under\n"
        );
    }

    #[test]
    fn captioned_and_bare_audio_become_directives() {
        let md = "![type:audio](a.mp3)\n/// caption\n    attrs: {id: ex1}\n    Sinus\n///\n\n![type:audio](b.mp3)\n";
        let out = apply(escape_audio, md);
        let found: Vec<Directive> = find_all(&out).into_iter().map(|(_, d)| d).collect();
        assert_eq!(
            found,
            vec![
                Directive::CaptionedAudio {
                    id: "ex1".into(),
                    caption: "Sinus".into()
                },
                Directive::Audio("b.mp3".into()),
            ]
        );
        assert!(!out.contains("type:audio"));
    }

    #[test]
    fn mermaid_block_becomes_image_reference() {
        let md = "Før\n\n```mermaid\ngraph LR\n  A --> B\n```\n/// caption\nSignalflow\n///\n\nEfter\n";
        let config = PipelineConfig::default();
        let mut cache = MemoryDiagramCache::new("tex/diagrams");
        let mut renderer = RecordingRenderer::default();
        let mut stats = BuildStats::default();
        let out = {
            let mut bridge = DiagramBridge::new(&mut cache, &mut renderer, "tex");
            let mut ctx = PreprocessContext {
                path: "test.md",
                config: &config,
                diagrams: &mut bridge,
                stats: &mut stats,
            };
            substitute_diagrams(md, &mut ctx).unwrap()
        };
        assert_eq!(out, "Før\n\n![Signalflow](diagrams/Signalflow.png)\n\nEfter\n");
        assert_eq!(renderer.calls.len(), 1);
        assert_eq!(stats.diagrams, 1);
        assert_eq!(cache.get("Signalflow").unwrap().unwrap().source, "graph LR\n  A --> B");
    }

    #[test]
    fn every_heading_gets_exactly_one_label() {
        let md = "# Lyd & Rum\n\nTekst\n\n## Lyd & Rum\n\n```\n# not a heading\n```\n### Closing ###\n";
        let out = apply(label_headings, md);
        let labels: Vec<Directive> = find_all(&out).into_iter().map(|(_, d)| d).collect();
        assert_eq!(
            labels,
            vec![
                Directive::Label("lyd-rum".into()),
                Directive::Label("lyd-rum".into()),
                Directive::Label("closing".into()),
            ]
        );
        assert!(out.starts_with(&format!("# Lyd & Rum\n{}\n\n", Directive::Label("lyd-rum".into()).escape())));
    }

    #[test]
    fn full_pass_counts_document() {
        let config = PipelineConfig::default();
        let mut cache = MemoryDiagramCache::new("d");
        let mut renderer = RecordingRenderer::default();
        let mut bridge = DiagramBridge::new(&mut cache, &mut renderer, "");
        let mut stats = BuildStats::default();
        let mut ctx = PreprocessContext {
            path: "test.md",
            config: &config,
            diagrams: &mut bridge,
            stats: &mut stats,
        };
        preprocess("# A\n", &mut ctx).unwrap();
        preprocess("# B\n", &mut ctx).unwrap();
        assert_eq!(stats.documents, 2);
    }
}
