use std::collections::BTreeMap;

use serde::Deserialize;

use crate::engine::EngineConfig;

/// Settings shared by the preprocessor, assembler and postprocessor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Root of the web edition; section labels record `baseUrl + page/`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Document types (first frontmatter tag) that start on a new, colored
    /// page, mapped to the LaTeX color name.
    #[serde(default = "default_special_types")]
    pub special_types: BTreeMap<String, String>,

    /// Word placed before `\ref` when an internal link is rewritten.
    #[serde(default = "default_see_phrase")]
    pub see_phrase: String,

    #[serde(default = "default_media_prefix")]
    pub media_prefix: String,

    /// Replacement for `media_prefix`; media paths are left alone when unset.
    #[serde(default)]
    pub media_target: Option<String>,

    /// Literal replacements applied to the final text.
    #[serde(default = "default_link_fixups")]
    pub link_fixups: Vec<LinkFixup>,

    /// Pygments lexer passed to minted for every code block.
    #[serde(default = "default_highlight_lexer")]
    pub highlight_lexer: String,

    /// Use `highlight_lexer` even when a fence names its own language.
    #[serde(default = "default_true")]
    pub override_language: bool,

    #[serde(default = "default_tab_width")]
    pub tab_width: usize,

    /// Lines after a `\caption` in which a bare audio marker attaches to it.
    #[serde(default = "default_audio_caption_window")]
    pub audio_caption_window: usize,

    /// Lines after a page label in which a captioned audio marker finds it.
    #[serde(default = "default_audio_label_window")]
    pub audio_label_window: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkFixup {
    pub from: String,
    pub to: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            special_types: default_special_types(),
            see_phrase: default_see_phrase(),
            media_prefix: default_media_prefix(),
            media_target: None,
            link_fixups: default_link_fixups(),
            highlight_lexer: default_highlight_lexer(),
            override_language: true,
            tab_width: default_tab_width(),
            audio_caption_window: default_audio_caption_window(),
            audio_label_window: default_audio_label_window(),
        }
    }
}

impl PipelineConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            lexer: self.highlight_lexer.clone(),
            override_language: self.override_language,
        }
    }

    /// Page color for a document type, if it is one of the special types.
    pub fn page_color(&self, doc_type: &str) -> Option<&str> {
        self.special_types.get(doc_type).map(String::as_str)
    }
}

fn default_base_url() -> String {
    "https://sc.anderseskildsen.eu/".to_string()
}

fn default_special_types() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Øvelser".to_string(), "exercise".to_string()),
        ("Cheat sheets".to_string(), "cheatsheet".to_string()),
    ])
}

fn default_see_phrase() -> String {
    "se".to_string()
}

fn default_media_prefix() -> String {
    "../media/".to_string()
}

fn default_link_fixups() -> Vec<LinkFixup> {
    vec![LinkFixup {
        from: "href{https://sparkletop.github.io/./tex/preface/".to_string(),
        to: "href{https://sparkletop.github.io/".to_string(),
    }]
}

fn default_highlight_lexer() -> String {
    "./sc_lexer.py:SuperColliderLexer -x".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tab_width() -> usize {
    4
}

fn default_audio_caption_window() -> usize {
    5
}

fn default_audio_label_window() -> usize {
    50
}
