//! Chapter structure: the `nav` of `mkdocs.yml`, or the docs directory layout.

use anyhow::{Context, Result};
use serde_yaml::Value;
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

/// A chapter title and its pages, relative to the docs directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavChapter {
    pub title: String,
    pub pages: Vec<String>,
}

/// Load the chapter list for a project.
///
/// Uses the `nav` section of `mkdocs.yml` when there is one, skipping its
/// first entry (the site index). Otherwise every subdirectory of the docs
/// directory becomes a chapter of its `.md` files, both in name order.
pub fn load_chapters(mkdocs_yml: &Path, docs_dir: &Path) -> Result<Vec<NavChapter>> {
    let raw = std::fs::read_to_string(mkdocs_yml)
        .with_context(|| format!("Failed to read {}", mkdocs_yml.display()))?;

    match nav_section(&raw) {
        Some(section) => {
            parse_nav(section).with_context(|| format!("Failed to parse nav in {}", mkdocs_yml.display()))
        }
        None => chapters_from_dirs(docs_dir),
    }
}

/// Text from the first line starting with `nav:` to the end of the file.
///
/// Earlier parts of `mkdocs.yml` may use custom YAML tags (`!!python/name`)
/// that a plain YAML parser rejects, so only the tail is parsed.
fn nav_section(raw: &str) -> Option<&str> {
    raw.match_indices("nav:")
        .find(|(idx, _)| *idx == 0 || raw[..*idx].ends_with('\n'))
        .map(|(idx, _)| &raw[idx..])
}

fn parse_nav(section: &str) -> Result<Vec<NavChapter>> {
    let doc: Value = serde_yaml::from_str(section)?;
    let Some(entries) = doc.get("nav").and_then(Value::as_sequence) else {
        anyhow::bail!("`nav` is not a list");
    };

    let mut chapters = Vec::new();
    for entry in entries.iter().skip(1) {
        let Some(mapping) = entry.as_mapping() else {
            log::warn!("skipping nav entry without a title: {entry:?}");
            continue;
        };
        for (title, value) in mapping {
            let title = match title {
                Value::String(s) => s.clone(),
                other => format!("{other:?}"),
            };
            let mut pages = Vec::new();
            collect_pages(value, &mut pages);
            chapters.push(NavChapter { title, pages });
        }
    }

    Ok(chapters)
}

/// Flatten a nav value (a path, a list of pages or a titled page) into paths, in order.
fn collect_pages(value: &Value, pages: &mut Vec<String>) {
    match value {
        Value::String(path) => pages.push(path.clone()),
        Value::Sequence(items) => items.iter().for_each(|item| collect_pages(item, pages)),
        Value::Mapping(mapping) => mapping.values().for_each(|item| collect_pages(item, pages)),
        _ => {}
    }
}

fn chapters_from_dirs(docs_dir: &Path) -> Result<Vec<NavChapter>> {
    let mut chapters = Vec::new();

    for dir in WalkDir::new(docs_dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let dir = dir.with_context(|| format!("Failed to list {}", docs_dir.display()))?;
        if !dir.file_type().is_dir() {
            continue;
        }
        let title = dir.file_name().to_string_lossy().to_string();

        let mut pages = Vec::new();
        for file in WalkDir::new(dir.path()).min_depth(1).max_depth(1).sort_by_file_name() {
            let file = file.with_context(|| format!("Failed to list {}", dir.path().display()))?;
            let name = file.file_name().to_string_lossy();
            if file.file_type().is_file() && name.ends_with(".md") {
                pages.push(format!("{title}/{name}"));
            }
        }

        chapters.push(NavChapter { title, pages });
    }

    Ok(chapters)
}

/// Ignore and solo lists, one file name per line.
#[derive(Debug, Default)]
pub struct Inclusion {
    ignored: HashSet<String>,
    soloed: HashSet<String>,
}

impl Inclusion {
    /// Read both lists. Either file missing is an error.
    pub fn load(ignore_list: &Path, solo_list: &Path) -> Result<Self> {
        let ignored = std::fs::read_to_string(ignore_list)
            .with_context(|| format!("Failed to read ignore list {}", ignore_list.display()))?;
        let soloed = std::fs::read_to_string(solo_list)
            .with_context(|| format!("Failed to read solo list {}", solo_list.display()))?;
        Ok(Self::from_lists(&ignored, &soloed))
    }

    pub fn from_lists(ignored: &str, soloed: &str) -> Self {
        let names = |list: &str| -> HashSet<String> {
            list.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        };
        Self {
            ignored: names(ignored),
            soloed: names(soloed),
        }
    }

    /// A non-empty solo list admits only its files; otherwise everything not
    /// ignored is included. Matching is by file name.
    pub fn includes(&self, path: &str) -> bool {
        let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        if self.soloed.is_empty() {
            !self.ignored.contains(name)
        } else {
            self.soloed.contains(name)
        }
    }

    /// Drop excluded pages, then chapters left without pages.
    pub fn filter(&self, chapters: Vec<NavChapter>) -> Vec<NavChapter> {
        chapters
            .into_iter()
            .filter_map(|mut chapter| {
                chapter.pages.retain(|page| self.includes(page));
                (!chapter.pages.is_empty()).then_some(chapter)
            })
            .collect()
    }
}
