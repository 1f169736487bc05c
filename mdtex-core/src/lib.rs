//! `mdtex-core` converts MkDocs-material markdown into LaTeX chapters.
//!
//! Conversion runs in two phases around a typeset engine. The preprocessor
//! rewrites extension syntax (content tabs, frontmatter, abstracts, audio
//! examples, mermaid diagrams) into plain markdown plus escape directives
//! the engine leaves alone. The postprocessor runs on each assembled
//! chapter: it expands the directives into LaTeX, attaches audio examples to
//! captions and resolves internal links into `\ref`s.
//!
//! # Quick start
//!
//! ```
//! use mdtex_core::directive::{self, Directive};
//!
//! let marker = Directive::Label(mdtex_core::slugify("Lyd & Rum")).escape();
//! let tex = directive::expand(&marker, |d| match d {
//!     Directive::Label(slug) => Some(format!("\\label{{{slug}}}")),
//!     _ => None,
//! });
//! assert_eq!(tex, "\\label{lyd-rum}");
//! ```

pub mod assemble;
pub mod brackets;
pub mod config;
pub mod diagram;
pub mod directive;
pub mod engine;
pub mod error;
pub mod postprocess;
pub mod preprocess;
pub mod rules;
pub mod slug;
pub mod stats;

pub use assemble::{Assembler, Chapter, Document};
pub use config::{LinkFixup, PipelineConfig};
pub use diagram::{
    CommandRenderer, DiagramBridge, DiagramCache, DiagramRenderer, FsDiagramCache, MemoryDiagramCache,
    RendererConfig,
};
pub use engine::{EngineConfig, LatexEngine, TypesetEngine};
pub use error::{Error, Result};
pub use slug::slugify;
pub use stats::BuildStats;
