use anyhow::{Context, Result};
use mdtex_core::{PipelineConfig, RendererConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the optional project config file.
pub const CONFIG_FILE: &str = "mkdocs-tex.json";

/// Top-level mkdocs-tex.json schema.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// MkDocs project directory (holds `mkdocs.yml`), relative to the root.
    #[serde(default = "default_mkdocs_root")]
    pub mkdocs_root: String,

    /// Docs directory inside the MkDocs project.
    #[serde(default = "default_docs_dir")]
    pub docs_dir: String,

    #[serde(default = "default_ignore_list")]
    pub ignore_list: String,

    #[serde(default = "default_solo_list")]
    pub solo_list: String,

    /// Preface page, relative to the MkDocs project. Built as its own chapter.
    #[serde(default = "default_preface_file")]
    pub preface_file: Option<String>,

    #[serde(default = "default_preface_title")]
    pub preface_title: String,

    #[serde(default = "default_preface_index")]
    pub preface_index: usize,

    /// Directory LaTeX runs from; image paths are written relative to it.
    #[serde(default = "default_tex_root")]
    pub tex_root: String,

    #[serde(default = "default_chapters_dir")]
    pub chapters_dir: String,

    #[serde(default = "default_diagram_dir")]
    pub diagram_dir: String,

    #[serde(default)]
    pub renderer: RendererConfig,

    #[serde(flatten)]
    pub pipeline: PipelineConfig,
}

fn default_mkdocs_root() -> String {
    "komposition-og-lydproduktion-med-supercollider".to_string()
}
fn default_docs_dir() -> String {
    "docs".to_string()
}
fn default_ignore_list() -> String {
    "build_scripts/ignored_MD_files.txt".to_string()
}
fn default_solo_list() -> String {
    "build_scripts/soloed_MD_files.txt".to_string()
}
fn default_preface_file() -> Option<String> {
    Some("book-preface.md".to_string())
}
fn default_preface_title() -> String {
    "Forord".to_string()
}
fn default_preface_index() -> usize {
    99
}
fn default_tex_root() -> String {
    "tex".to_string()
}
fn default_chapters_dir() -> String {
    "tex/chapters".to_string()
}
fn default_diagram_dir() -> String {
    "tex/diagrams".to_string()
}

impl BuildConfig {
    /// Resolved locations for a project rooted at `root`.
    pub fn paths(&self, root: &Path) -> ProjectPaths {
        let mkdocs_root = root.join(&self.mkdocs_root);
        ProjectPaths {
            mkdocs_yml: mkdocs_root.join("mkdocs.yml"),
            docs_dir: mkdocs_root.join(&self.docs_dir),
            preface: self.preface_file.as_ref().map(|p| mkdocs_root.join(p)),
            ignore_list: root.join(&self.ignore_list),
            solo_list: root.join(&self.solo_list),
            tex_root: root.join(&self.tex_root),
            chapters_dir: root.join(&self.chapters_dir),
            diagram_dir: root.join(&self.diagram_dir),
            mkdocs_root,
        }
    }

    /// Media files live next to the docs; chapters reach them from the tex root.
    fn default_media_target(&self) -> String {
        let parts = [self.mkdocs_root.as_str(), self.docs_dir.as_str(), "media"];
        let joined: Vec<&str> = parts.iter().map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()).collect();
        format!("../{}/", joined.join("/"))
    }
}

/// Absolute (root-joined) paths derived from a [`BuildConfig`].
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub mkdocs_root: PathBuf,
    pub mkdocs_yml: PathBuf,
    pub docs_dir: PathBuf,
    pub preface: Option<PathBuf>,
    pub ignore_list: PathBuf,
    pub solo_list: PathBuf,
    pub tex_root: PathBuf,
    pub chapters_dir: PathBuf,
    pub diagram_dir: PathBuf,
}

/// Load config from `explicit` or `<root>/mkdocs-tex.json`, or return defaults if missing.
pub fn load_config(root: &Path, explicit: Option<&Path>) -> Result<BuildConfig> {
    let config_path = explicit.map_or_else(|| root.join(CONFIG_FILE), Path::to_path_buf);

    let mut config: BuildConfig = if config_path.exists() {
        let raw = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", config_path.display()))?
    } else if explicit.is_some() {
        anyhow::bail!("Config file {} does not exist", config_path.display());
    } else {
        serde_json::from_str("{}").context("Failed to build default config")?
    };

    if config.pipeline.media_target.is_none() {
        config.pipeline.media_target = Some(config.default_media_target());
    }

    Ok(config)
}
