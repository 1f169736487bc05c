//! Property-based tests using proptest.

use mdtex_core::directive::{self, Directive};
use mdtex_core::preprocess::{PreprocessContext, preprocess};
use mdtex_core::{
    Assembler, BuildStats, Chapter, DiagramBridge, DiagramRenderer, Document, LatexEngine, MemoryDiagramCache,
    PipelineConfig, Result, slugify,
};
use proptest::prelude::*;

struct NoopRenderer;

impl DiagramRenderer for NoopRenderer {
    fn render(&mut self, _source: &std::path::Path, _image: &std::path::Path) -> Result<()> {
        Ok(())
    }
}

proptest! {
    /// Slugs only hold lowercase ASCII letters and single hyphens, and
    /// slugifying a slug changes nothing.
    #[test]
    fn slugify_is_stable(name in "\\PC{0,60}") {
        let slug = slugify(&name);
        prop_assert_eq!(slugify(&slug), slug.clone());
        prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c == '-'));
        prop_assert!(!slug.contains("--"));
    }

    /// Case and spacing variants of the same words share a slug.
    #[test]
    fn slugify_ignores_case_and_spacing(words in prop::collection::vec("[a-zA-Z]{1,8}", 1..5)) {
        let spaced = words.join(" ");
        let shouted = words.join("   ").to_uppercase();
        prop_assert_eq!(slugify(&spaced), slugify(&shouted));
    }

    /// Any field survives escaping, and the escaped form holds nothing the
    /// engine would treat as markup.
    #[test]
    fn directive_fields_survive_escaping(id in "\\PC{0,30}", caption in "\\PC{0,80}") {
        let directive = Directive::CaptionedAudio { id, caption };
        let escaped = directive.escape();
        prop_assert!(escaped.chars().all(|c| c.is_ascii_alphanumeric() || " !:=_".contains(c)));
        let found = directive::find_all(&escaped);
        prop_assert_eq!(found.len(), 1);
        prop_assert_eq!(&found[0].1, &directive);
    }

    /// Preprocessing never panics, whatever the input.
    #[test]
    fn preprocess_no_panic(input in "\\PC{0,400}") {
        let config = PipelineConfig::default();
        let mut cache = MemoryDiagramCache::new("d");
        let mut renderer = NoopRenderer;
        let mut bridge = DiagramBridge::new(&mut cache, &mut renderer, "");
        let mut stats = BuildStats::default();
        let mut ctx = PreprocessContext {
            path: "fuzz.md",
            config: &config,
            diagrams: &mut bridge,
            stats: &mut stats,
        };
        let _ = preprocess(&input, &mut ctx);
    }

    /// Every directive the preprocessor writes is gone from the chapter.
    #[test]
    fn round_trip_leaves_no_sentinel(
        headings in prop::collection::vec("[A-Za-z][A-Za-z ]{0,20}", 1..4),
        body in "[A-Za-z0-9 .,]{0,60}",
        with_audio in any::<bool>(),
    ) {
        let mut md = String::new();
        for heading in &headings {
            md.push_str(&format!("# {heading}\n\n{body}\n\n"));
        }
        if with_audio {
            md.push_str("```sc title=\"Eksempel\"\n1 + 1\n```\n\n![type:audio](lyd.mp3)\n");
        }

        let config = PipelineConfig::default();
        let mut cache = MemoryDiagramCache::new("d");
        let mut renderer = NoopRenderer;
        let mut bridge = DiagramBridge::new(&mut cache, &mut renderer, "");
        let mut stats = BuildStats::default();
        let chapter = Chapter {
            index: 0,
            title: "Kapitel".into(),
            documents: vec![Document {
                source_path: "docs/a/side.md".into(),
                page_path: "a/side.md".into(),
                text: md,
            }],
        };
        let tex = Assembler::new(&config, &LatexEngine, &mut bridge)
            .make_chapter(&chapter, &mut stats)
            .unwrap();
        prop_assert!(!tex.contains(directive::TOKEN));
        for heading in &headings {
            let label = format!("\\label{{{}}}", slugify(heading.trim()));
            prop_assert!(tex.contains(&label));
        }
    }
}
