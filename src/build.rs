//! `mkdocs-tex build`: convert the whole book into chapter files.

use anyhow::{Context, Result};
use colored::Colorize;
use mdtex_core::diagram::CachedEntry;
use mdtex_core::postprocess::{PostprocessContext, postprocess};
use mdtex_core::{
    Assembler, BuildStats, Chapter, CommandRenderer, DiagramBridge, DiagramCache, DiagramRenderer, Document,
    FsDiagramCache, LatexEngine, MemoryDiagramCache,
};
use notify::{EventKind, RecursiveMode, Watcher};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::config::{self, BuildConfig, ProjectPaths};
use crate::nav::{self, Inclusion};

/// Options passed from CLI to the build.
pub struct BuildOpts {
    pub root: PathBuf,
    pub config: Option<PathBuf>,
    pub dry_run: bool,
    pub verbose: bool,
    pub quiet: bool,
}

/// Aggregate report from one build.
#[derive(Default)]
pub struct BuildReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub stats: BuildStats,
}

impl BuildReport {
    pub fn print_summary(&self) {
        println!();
        println!("{}", "========================================".dimmed());
        println!("{}", "Build complete!".green().bold());
        println!();

        let mut parts = Vec::new();
        if self.created > 0 {
            parts.push(format!("{} created", self.created));
        }
        if self.updated > 0 {
            parts.push(format!("{} regenerated", self.updated));
        }
        if self.unchanged > 0 {
            parts.push(format!("{} unchanged", self.unchanged));
        }
        if !parts.is_empty() {
            println!("Chapter files: {}", parts.join(", "));
        }

        let stats = &self.stats;
        println!("Stats:");
        println!("- {} audio examples", stats.audio_examples);
        println!(
            "- {} mermaid diagrams ({} rendered)",
            stats.diagrams, stats.diagrams_rendered
        );
        println!("- {} code blocks with captions", stats.code_blocks);
        println!("- {} markdown documents", stats.documents);
        println!("- {} chapters", stats.chapters);

        for w in &stats.warnings {
            println!("{} {}", "WARNING:".yellow(), w);
        }
    }
}

/// Reads the on-disk diagram cache but keeps new entries in memory, so a
/// dry run leaves the cache as it found it.
struct DryRunCache {
    disk: FsDiagramCache,
    pending: MemoryDiagramCache,
}

impl DiagramCache for DryRunCache {
    fn source_path(&self, key: &str) -> PathBuf {
        self.disk.source_path(key)
    }

    fn image_path(&self, key: &str) -> PathBuf {
        self.disk.image_path(key)
    }

    fn get(&self, key: &str) -> mdtex_core::Result<Option<CachedEntry>> {
        match self.pending.get(key)? {
            Some(entry) => Ok(Some(entry)),
            None => self.disk.get(key),
        }
    }

    fn put(&mut self, key: &str, entry: &CachedEntry) -> mdtex_core::Result<()> {
        self.pending.put(key, entry)
    }
}

struct DryRunRenderer;

impl DiagramRenderer for DryRunRenderer {
    fn render(&mut self, source: &Path, image: &Path) -> mdtex_core::Result<()> {
        println!(
            "  {} {} (dry run)",
            "Would render".yellow(),
            image.display()
        );
        log::debug!("skipped rendering {}", source.display());
        Ok(())
    }
}

/// Load a page from disk, naming it by its path under the docs directory.
fn read_document(path: &Path, docs_dir: &Path, fallback_root: &Path) -> Result<Document> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let relative = path
        .strip_prefix(docs_dir)
        .or_else(|_| path.strip_prefix(fallback_root))
        .unwrap_or(path);
    Ok(Document {
        source_path: path.to_path_buf(),
        page_path: relative.to_string_lossy().replace('\\', "/"),
        text,
    })
}

/// Every chapter to build, preface first, with its pages loaded.
fn collect_chapters(config: &BuildConfig, paths: &ProjectPaths) -> Result<Vec<Chapter>> {
    let inclusion = Inclusion::load(&paths.ignore_list, &paths.solo_list)?;
    let mut chapters = Vec::new();

    if let Some(preface) = &paths.preface {
        if inclusion.includes(&preface.to_string_lossy()) {
            chapters.push(Chapter {
                index: config.preface_index,
                title: config.preface_title.clone(),
                documents: vec![read_document(preface, &paths.docs_dir, &paths.mkdocs_root)?],
            });
        }
    }

    let nav = inclusion.filter(nav::load_chapters(&paths.mkdocs_yml, &paths.docs_dir)?);
    for (index, entry) in nav.into_iter().enumerate() {
        let documents = entry
            .pages
            .iter()
            .map(|page| read_document(&paths.docs_dir.join(page), &paths.docs_dir, &paths.mkdocs_root))
            .collect::<Result<Vec<_>>>()?;
        chapters.push(Chapter {
            index,
            title: entry.title,
            documents,
        });
    }

    Ok(chapters)
}

/// Write `tex` unless the file already holds exactly that text.
fn write_chapter(path: &Path, tex: &str, opts: &BuildOpts, report: &mut BuildReport) -> Result<()> {
    let existing = match fs::read_to_string(path) {
        Ok(old) => Some(old),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    let label = match existing {
        Some(old) if old == tex => {
            if opts.verbose && !opts.quiet {
                println!("  {} {}", path.display(), "(unchanged)".dimmed());
            }
            report.unchanged += 1;
            return Ok(());
        }
        Some(_) => {
            report.updated += 1;
            "Regenerating".cyan()
        }
        None => {
            report.created += 1;
            "Creating".green()
        }
    };

    if !opts.dry_run {
        fs::write(path, tex).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    if !opts.quiet {
        println!(
            "  {} {} {}",
            label,
            path.display(),
            if opts.dry_run { "(dry run)" } else { "" }
        );
    }
    Ok(())
}

/// Run the full build.
pub fn run_build(opts: &BuildOpts) -> Result<BuildReport> {
    let config = config::load_config(&opts.root, opts.config.as_deref())?;
    let paths = config.paths(&opts.root);

    if !opts.quiet {
        println!(
            "{} {}",
            "mkdocs-tex".bold(),
            format!("({})", paths.mkdocs_root.display()).dimmed()
        );
        println!("{}", "================================".dimmed());
        if opts.dry_run {
            println!("{}", "[DRY RUN] No files will be written.".yellow());
        }
    }

    let chapters = collect_chapters(&config, &paths)?;
    if !opts.dry_run {
        fs::create_dir_all(&paths.chapters_dir)
            .with_context(|| format!("Failed to create {}", paths.chapters_dir.display()))?;
    }

    let mut fs_cache;
    let mut dry_cache;
    let mut command_renderer;
    let mut dry_renderer;
    let (cache, renderer): (&mut dyn DiagramCache, &mut dyn DiagramRenderer) = if opts.dry_run {
        dry_cache = DryRunCache {
            disk: FsDiagramCache::new(&paths.diagram_dir),
            pending: MemoryDiagramCache::new(&paths.diagram_dir),
        };
        dry_renderer = DryRunRenderer;
        (&mut dry_cache, &mut dry_renderer)
    } else {
        fs_cache = FsDiagramCache::new(&paths.diagram_dir);
        command_renderer = CommandRenderer::new(config.renderer.clone());
        (&mut fs_cache, &mut command_renderer)
    };

    let mut bridge = DiagramBridge::new(cache, renderer, &paths.tex_root);
    let mut assembler = Assembler::new(&config.pipeline, &LatexEngine, &mut bridge);
    let mut report = BuildReport::default();

    for chapter in &chapters {
        if !opts.quiet {
            println!();
            println!(
                "{}",
                format!("[{}] {}", chapter.file_name(), chapter.display_title()).bold()
            );
        }
        let tex = assembler
            .make_chapter(chapter, &mut report.stats)
            .with_context(|| format!("Failed to build chapter '{}'", chapter.title))?;
        write_chapter(&paths.chapters_dir.join(chapter.file_name()), &tex, opts, &mut report)?;
    }

    Ok(report)
}

/// Convert a single page and return the finished LaTeX.
pub fn convert_file(file: &Path, root: &Path, config_path: Option<&Path>) -> Result<String> {
    let config = config::load_config(root, config_path)?;
    let paths = config.paths(root);
    let doc = read_document(file, &paths.docs_dir, &paths.mkdocs_root)?;

    let mut cache = FsDiagramCache::new(&paths.diagram_dir);
    let mut renderer = CommandRenderer::new(config.renderer.clone());
    let mut bridge = DiagramBridge::new(&mut cache, &mut renderer, &paths.tex_root);
    let mut stats = BuildStats::default();

    let section = Assembler::new(&config.pipeline, &LatexEngine, &mut bridge)
        .convert_section(&doc, &mut stats)
        .with_context(|| format!("Failed to convert {}", file.display()))?;
    let tex = postprocess(
        &section,
        &mut PostprocessContext {
            config: &config.pipeline,
            stats: &mut stats,
        },
    )?;
    Ok(tex)
}

/// Watch the docs for changes and rebuild on each save.
///
/// Debounces rapid events (e.g. editors that write in stages) with a 200ms window.
/// Ctrl+C exits cleanly.
pub fn watch_and_rebuild(opts: &BuildOpts) -> Result<()> {
    let config = config::load_config(&opts.root, opts.config.as_deref())?;
    let paths = config.paths(&opts.root);

    rebuild(opts);

    println!(
        "{} {} for changes (Ctrl+C to stop)",
        "Watching".cyan().bold(),
        paths.mkdocs_root.display()
    );

    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            let _ = tx.send(event);
        }
    })?;

    watcher.watch(&paths.docs_dir, RecursiveMode::Recursive)?;
    watcher.watch(&paths.mkdocs_yml, RecursiveMode::NonRecursive)?;
    if let Some(preface) = paths.preface.as_ref().filter(|p| !p.starts_with(&paths.docs_dir)) {
        watcher.watch(preface, RecursiveMode::NonRecursive)?;
    }

    let mut last_rebuild = Instant::now();
    let debounce = Duration::from_millis(200);

    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(event) => {
                let relevant_kind = matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                );
                let affects_sources = event.paths.iter().any(|p| {
                    matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("md" | "yml" | "yaml")
                    )
                });

                if relevant_kind && affects_sources && last_rebuild.elapsed() > debounce {
                    // Small delay to let the editor finish writing
                    std::thread::sleep(Duration::from_millis(50));
                    rebuild(opts);
                    last_rebuild = Instant::now();
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}

fn rebuild(opts: &BuildOpts) {
    match run_build(opts) {
        Ok(report) => {
            if !opts.quiet {
                report.print_summary();
            }
        }
        Err(e) => eprintln!("{} {:#}", "Build error:".red().bold(), e),
    }
}
