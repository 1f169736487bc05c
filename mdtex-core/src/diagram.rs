//! Mermaid diagram caching and rendering.
//!
//! Each captioned diagram is keyed by a filename-safe version of its caption.
//! The cached source text is compared byte-for-byte with the current block;
//! the external renderer only runs when they differ or no entry exists.
//!
//! Two diagrams whose captions sanitize to the same key share one cache entry
//! and overwrite each other. Captions must be unique across the book.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::stats::BuildStats;

/// Diagram source as last rendered, and where its image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub source: String,
    pub image: PathBuf,
}

/// Storage for rendered diagram sources.
pub trait DiagramCache {
    /// Path the renderer reads the diagram source from.
    fn source_path(&self, key: &str) -> PathBuf;

    /// Path the renderer writes the image to.
    fn image_path(&self, key: &str) -> PathBuf;

    fn get(&self, key: &str) -> Result<Option<CachedEntry>>;

    fn put(&mut self, key: &str, entry: &CachedEntry) -> Result<()>;
}

/// Renders a diagram source file into an image file.
pub trait DiagramRenderer {
    fn render(&mut self, source: &Path, image: &Path) -> Result<()>;
}

/// Cache backed by `<dir>/<key>.mmd` files next to `<dir>/<key>.png` images.
#[derive(Debug, Clone)]
pub struct FsDiagramCache {
    dir: PathBuf,
}

impl FsDiagramCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DiagramCache for FsDiagramCache {
    fn source_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.mmd"))
    }

    fn image_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.png"))
    }

    fn get(&self, key: &str) -> Result<Option<CachedEntry>> {
        let path = self.source_path(key);
        match fs::read_to_string(&path) {
            Ok(source) => Ok(Some(CachedEntry {
                source,
                image: self.image_path(key),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io("read", path, e)),
        }
    }

    fn put(&mut self, key: &str, entry: &CachedEntry) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io("create", &self.dir, e))?;
        let path = self.source_path(key);
        fs::write(&path, &entry.source).map_err(|e| Error::io("write", path, e))
    }
}

/// In-memory cache, for callers that keep state elsewhere and for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryDiagramCache {
    dir: PathBuf,
    entries: HashMap<String, CachedEntry>,
}

impl MemoryDiagramCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DiagramCache for MemoryDiagramCache {
    fn source_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.mmd"))
    }

    fn image_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.png"))
    }

    fn get(&self, key: &str) -> Result<Option<CachedEntry>> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, entry: &CachedEntry) -> Result<()> {
        self.entries.insert(key.to_string(), entry.clone());
        Ok(())
    }
}

/// External renderer invocation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RendererConfig {
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments; `{input}` and `{output}` are replaced with the source and
    /// image paths.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_program() -> String {
    "./node_modules/.bin/mmdc".to_string()
}

fn default_args() -> Vec<String> {
    [
        "--input",
        "{input}",
        "--output",
        "{output}",
        "--backgroundColor",
        "transparent",
        "--scale",
        "2",
        "--configFile",
        "./mermaid-config.json",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_timeout_secs() -> u64 {
    120
}

/// Runs an external program such as mermaid-cli, with a timeout.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    config: RendererConfig,
}

impl CommandRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    fn args_for(&self, source: &Path, image: &Path) -> Vec<String> {
        let input = source.to_string_lossy();
        let output = image.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

impl DiagramRenderer for CommandRenderer {
    fn render(&mut self, source: &Path, image: &Path) -> Result<()> {
        let fail = |message: String| Error::Render {
            source_path: source.to_path_buf(),
            message,
        };

        let mut child = Command::new(&self.config.program)
            .args(self.args_for(source, image))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| fail(format!("could not start {}: {e}", self.config.program)))?;

        let deadline = Instant::now() + Duration::from_secs(self.config.timeout_secs);
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => return Err(fail(format!("exited with {status}"))),
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(fail(format!(
                        "timed out after {}s",
                        self.config.timeout_secs
                    )));
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(e) => return Err(fail(format!("could not wait for renderer: {e}"))),
            }
        }
    }
}

/// Derive the cache key for a diagram caption.
///
/// Characters not allowed in file names are removed, trailing dots and
/// spaces trimmed, and spaces replaced by underscores.
pub fn cache_key(caption: &str) -> String {
    let cleaned: String = caption
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let key = cleaned.trim().trim_end_matches(['.', ' ']).replace(' ', "_");
    if key.is_empty() {
        "diagram".to_string()
    } else {
        key
    }
}

/// Connects the preprocessor to a cache and a renderer.
pub struct DiagramBridge<'a> {
    cache: &'a mut dyn DiagramCache,
    renderer: &'a mut dyn DiagramRenderer,
    link_root: PathBuf,
}

impl<'a> DiagramBridge<'a> {
    /// `link_root` is the directory image references are written relative
    /// to, normally the directory LaTeX is run from.
    pub fn new(
        cache: &'a mut dyn DiagramCache,
        renderer: &'a mut dyn DiagramRenderer,
        link_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache,
            renderer,
            link_root: link_root.into(),
        }
    }

    /// Ensure an up-to-date image exists for `source` and return the path
    /// to reference it by.
    pub fn resolve(&mut self, source: &str, caption: &str, stats: &mut BuildStats) -> Result<String> {
        let key = cache_key(caption);
        let image = self.cache.image_path(&key);

        let fresh = match self.cache.get(&key)? {
            Some(entry) => entry.source == source,
            None => false,
        };

        if fresh {
            log::debug!("diagram '{key}' unchanged, reusing {}", image.display());
        } else {
            let entry = CachedEntry {
                source: source.to_string(),
                image: image.clone(),
            };
            self.cache.put(&key, &entry)?;
            log::info!("rendering diagram '{key}' to {}", image.display());
            self.renderer.render(&self.cache.source_path(&key), &image)?;
            stats.diagrams_rendered += 1;
        }

        stats.diagrams += 1;
        let relative = image.strip_prefix(&self.link_root).unwrap_or(&image);
        Ok(relative.to_string_lossy().replace('\\', "/"))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingRenderer;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cache_key_sanitizes_caption() {
        assert_eq!(cache_key("Signal flow: synth -> bus"), "Signal_flow_synth_-_bus");
        assert_eq!(cache_key("What is a UGen?"), "What_is_a_UGen");
        assert_eq!(cache_key("Trailing dots..."), "Trailing_dots");
        assert_eq!(cache_key("///"), "diagram");
    }

    #[test]
    fn first_encounter_renders_and_returns_relative_path() {
        let mut cache = MemoryDiagramCache::new("tex/diagrams");
        let mut renderer = RecordingRenderer::default();
        let mut stats = BuildStats::default();

        let path = DiagramBridge::new(&mut cache, &mut renderer, "tex")
            .resolve("graph LR\nA-->B", "Flow", &mut stats)
            .unwrap();

        assert_eq!(path, "diagrams/Flow.png");
        assert_eq!(
            renderer.calls,
            vec![(PathBuf::from("tex/diagrams/Flow.mmd"), PathBuf::from("tex/diagrams/Flow.png"))]
        );
        assert_eq!(stats.diagrams, 1);
        assert_eq!(stats.diagrams_rendered, 1);
    }

    #[test]
    fn unchanged_source_is_not_rerendered() {
        let mut cache = MemoryDiagramCache::new("d");
        let mut renderer = RecordingRenderer::default();
        let mut stats = BuildStats::default();

        let mut bridge = DiagramBridge::new(&mut cache, &mut renderer, "");
        bridge.resolve("graph LR\nA-->B", "Flow", &mut stats).unwrap();
        bridge.resolve("graph LR\nA-->B", "Flow", &mut stats).unwrap();

        assert_eq!(renderer.calls.len(), 1);
        assert_eq!(stats.diagrams, 2);
    }

    #[test]
    fn one_character_change_renders_exactly_once_more() {
        let mut cache = MemoryDiagramCache::new("d");
        let mut renderer = RecordingRenderer::default();
        let mut stats = BuildStats::default();

        let mut bridge = DiagramBridge::new(&mut cache, &mut renderer, "");
        bridge.resolve("graph LR\nA-->B", "Flow", &mut stats).unwrap();
        bridge.resolve("graph LR\nA-->C", "Flow", &mut stats).unwrap();
        bridge.resolve("graph LR\nA-->C", "Flow", &mut stats).unwrap();

        assert_eq!(renderer.calls.len(), 2);
    }

    #[test]
    fn renderer_failure_is_fatal() {
        let mut cache = MemoryDiagramCache::new("d");
        let mut renderer = RecordingRenderer {
            fail: true,
            ..Default::default()
        };
        let mut stats = BuildStats::default();

        let err = DiagramBridge::new(&mut cache, &mut renderer, "")
            .resolve("graph LR", "Broken", &mut stats)
            .unwrap_err();
        assert!(matches!(err, Error::Render { .. }));
        assert_eq!(stats.diagrams, 0);
    }

    #[test]
    fn fs_cache_round_trips_source_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FsDiagramCache::new(dir.path().join("diagrams"));
        assert_eq!(cache.get("Flow").unwrap(), None);

        let entry = CachedEntry {
            source: "graph TD\n  A --> B".into(),
            image: cache.image_path("Flow"),
        };
        cache.put("Flow", &entry).unwrap();

        assert_eq!(cache.get("Flow").unwrap(), Some(entry));
        assert!(dir.path().join("diagrams/Flow.mmd").exists());
    }

    #[cfg(unix)]
    #[test]
    fn command_renderer_reports_non_zero_exit() {
        let mut renderer = CommandRenderer::new(RendererConfig {
            program: "false".into(),
            args: Vec::new(),
            timeout_secs: 10,
        });
        let err = renderer.render(Path::new("a.mmd"), Path::new("a.png")).unwrap_err();
        assert!(matches!(err, Error::Render { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn command_renderer_substitutes_paths() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.mmd");
        let image = dir.path().join("a.png");
        fs::write(&source, "graph LR").unwrap();

        let mut renderer = CommandRenderer::new(RendererConfig {
            program: "cp".into(),
            args: vec!["{input}".into(), "{output}".into()],
            timeout_secs: 10,
        });
        renderer.render(&source, &image).unwrap();
        assert_eq!(fs::read_to_string(&image).unwrap(), "graph LR");
    }
}
