//! Per-file conversion and chapter assembly.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::PipelineConfig;
use crate::diagram::DiagramBridge;
use crate::directive::{Directive, Icon};
use crate::engine::{TypesetEngine, escape_latex};
use crate::error::{Error, Result};
use crate::postprocess::{PostprocessContext, postprocess};
use crate::preprocess::{PreprocessContext, preprocess};
use crate::stats::BuildStats;

static SECTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\section\{.+?\}\n").unwrap());
static LISTING_CAPTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\caption\{(.+?)\}(\s*)\\end\{listing\}").unwrap());
static ORDINAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.?\s+").unwrap());

/// One source page.
#[derive(Debug, Clone)]
pub struct Document {
    /// Where the text was read from, for messages.
    pub source_path: PathBuf,
    /// Path relative to the docs root, e.g. `lyd/synths.md`. Determines the
    /// page's web URL and its file label.
    pub page_path: String,
    pub text: String,
}

impl Document {
    /// File label other pages link to: the page's file name.
    pub fn label(&self) -> &str {
        self.page_path.rsplit('/').next().unwrap_or(&self.page_path)
    }

    /// Web URL of the page, following MkDocs directory URLs.
    pub fn page_url(&self, base_url: &str) -> String {
        let stem = self.page_path.strip_suffix(".md").unwrap_or(&self.page_path);
        let dir = match stem.strip_suffix("index") {
            Some(parent) if parent.is_empty() || parent.ends_with('/') => parent.to_string(),
            _ => format!("{stem}/"),
        };
        format!("{base_url}{dir}")
    }
}

/// An ordered group of documents rendered into one output file.
#[derive(Debug, Clone)]
pub struct Chapter {
    /// Sequential index; the output file is named from it, never the title.
    pub index: usize,
    pub title: String,
    pub documents: Vec<Document>,
}

impl Chapter {
    pub fn file_name(&self) -> String {
        format!("chap{:02}.tex", self.index)
    }

    /// Title without a leading ordinal such as `"1. "`; LaTeX numbers chapters.
    pub fn display_title(&self) -> String {
        ORDINAL_RE.replace(&self.title, "").into_owned()
    }
}

/// Runs documents through preprocessing, the engine and labelling.
pub struct Assembler<'a, 'b> {
    pub config: &'a PipelineConfig,
    pub engine: &'a dyn TypesetEngine,
    pub diagrams: &'a mut DiagramBridge<'b>,
}

impl<'a, 'b> Assembler<'a, 'b> {
    pub fn new(
        config: &'a PipelineConfig,
        engine: &'a dyn TypesetEngine,
        diagrams: &'a mut DiagramBridge<'b>,
    ) -> Self {
        Self {
            config,
            engine,
            diagrams,
        }
    }

    /// Convert one document into a labelled LaTeX section.
    pub fn convert_section(&mut self, doc: &Document, stats: &mut BuildStats) -> Result<String> {
        log::info!("processing source: {}", doc.source_path.display());
        let display_path = doc.source_path.display().to_string();

        let markdown = {
            let mut ctx = PreprocessContext {
                path: &display_path,
                config: self.config,
                diagrams: &mut *self.diagrams,
                stats: &mut *stats,
            };
            preprocess(&doc.text, &mut ctx)?
        };

        let tex = self
            .engine
            .convert(&markdown, &self.config.engine_config())
            .map_err(|message| Error::Engine {
                path: display_path.clone(),
                message,
            })?;

        let page_url = doc.page_url(&self.config.base_url);
        let tex = insert_file_label(&tex, doc.label(), &page_url, &display_path, stats);
        Ok(link_listings(&tex, &page_url, stats))
    }

    /// Concatenate a chapter's sections under its heading, before postprocessing.
    pub fn assemble_chapter(&mut self, chapter: &Chapter, stats: &mut BuildStats) -> Result<String> {
        let title = escape_latex(&chapter.display_title());
        let mut tex = format!(
            "\\chapter{{{title}}}\n\\label{{chap:{title}}}\n{}",
            Directive::ResetPageColor.escape()
        );

        for doc in &chapter.documents {
            tex.push('\n');
            tex.push_str(&self.convert_section(doc, stats)?);
        }

        stats.chapters += 1;
        Ok(tex)
    }

    /// Assemble and postprocess a chapter into its final text.
    pub fn make_chapter(&mut self, chapter: &Chapter, stats: &mut BuildStats) -> Result<String> {
        let tex = self.assemble_chapter(chapter, stats)?;
        let mut ctx = PostprocessContext {
            config: self.config,
            stats,
        };
        postprocess(&tex, &mut ctx)
    }
}

/// Put `\label{<file>}%<url>` right after the first `\section{...}` line.
///
/// The URL rides along in the comment so captioned audio examples further
/// down can link back to the web page.
fn insert_file_label(tex: &str, label: &str, page_url: &str, path: &str, stats: &mut BuildStats) -> String {
    let line = format!("\\label{{{label}}}%{page_url}\n");
    match SECTION_RE.find(tex) {
        Some(section) => format!("{}{line}{}", &tex[..section.end()], &tex[section.end()..]),
        None => {
            stats.warn(format!("{path}: no top-level heading, file label placed at start"));
            format!("{line}{tex}")
        }
    }
}

/// Add a web-link icon to every listing caption and keep the plain caption
/// as the short form for `\listoflistings`.
fn link_listings(tex: &str, page_url: &str, stats: &mut BuildStats) -> String {
    let mut index = 0usize;
    let icon = Directive::Icon(Icon::Link).escape();
    LISTING_CAPTION_RE
        .replace_all(tex, |caps: &Captures<'_>| {
            let caption = &caps[1];
            let url = format!("{page_url}\\#__code_{index}");
            index += 1;
            stats.code_blocks += 1;
            format!(
                "\\caption[{{{caption}}}]{{{caption}\\hfill\\href{{{url}}}{{{icon}}}}}{}\\end{{listing}}",
                &caps[2]
            )
        })
        .into_owned()
}
