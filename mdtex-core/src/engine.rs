//! Markdown → LaTeX conversion.
//!
//! The pipeline only relies on the [`TypesetEngine`] contract. [`LatexEngine`]
//! is the built-in implementation: a `pulldown-cmark` event walk producing an
//! article-class LaTeX fragment with `minted` listings. Links to other pages
//! are not resolved here; they stay as literal `[text](target)` for the
//! postprocessor.

use std::collections::HashMap;

use pulldown_cmark::{Alignment, CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

/// Engine settings fixed for a whole build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Pygments lexer handed to minted.
    pub lexer: String,
    /// Ignore fence languages and always use `lexer`.
    pub override_language: bool,
}

/// Converts preprocessed markdown into typeset source.
pub trait TypesetEngine {
    fn convert(&self, markdown: &str, config: &EngineConfig) -> Result<String, String>;
}

/// Built-in markdown → LaTeX engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatexEngine;

impl TypesetEngine for LatexEngine {
    fn convert(&self, markdown: &str, config: &EngineConfig) -> Result<String, String> {
        Ok(markdown_to_latex(markdown, config))
    }
}

/// Footnotes may reference other footnotes; stop expanding past this depth.
const MAX_FOOTNOTE_DEPTH: usize = 4;

pub fn markdown_to_latex(markdown: &str, config: &EngineConfig) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_DEFINITION_LIST);

    // Footnote bodies are pulled out first so references can inline them.
    let mut footnotes: HashMap<String, Vec<Event<'_>>> = HashMap::new();
    let mut body = Vec::new();
    let mut definition: Option<(String, Vec<Event<'_>>)> = None;

    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Start(Tag::FootnoteDefinition(label)) => {
                definition = Some((label.to_string(), Vec::new()));
            }
            Event::End(TagEnd::FootnoteDefinition) => {
                if let Some((label, events)) = definition.take() {
                    footnotes.insert(label, events);
                }
            }
            other => match definition.as_mut() {
                Some((_, events)) => events.push(other),
                None => body.push(other),
            },
        }
    }

    let mut writer = LatexWriter::new(config, &footnotes, 0);
    writer.write_all(body);
    writer.finish()
}

/// Escape LaTeX special characters in running text.
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        match c {
            '\\' => out.push_str(r"\textbackslash{}"),
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            '{' | '}' | '#' | '$' | '%' | '&' | '_' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Reverse [`escape_latex`].
pub fn unescape_latex(text: &str) -> String {
    let text = text
        .replace(r"\textbackslash{}", "\u{0}")
        .replace(r"\textasciitilde{}", "~")
        .replace(r"\textasciicircum{}", "^");

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '{' | '}' | '#' | '$' | '%' | '&' | '_') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out.replace('\u{0}', "\\")
}

/// Whether a link target points outside the documentation site.
pub fn is_external_url(dest: &str) -> bool {
    dest.contains("://") || dest.starts_with("mailto:") || dest.starts_with("www.")
}

struct CodeBlock {
    lexer: String,
    title: Option<String>,
    body: String,
}

struct ImageBuf {
    dest: String,
    alt: String,
}

struct TableState {
    cell: usize,
}

struct LatexWriter<'c, 'e> {
    config: &'c EngineConfig,
    footnotes: &'c HashMap<String, Vec<Event<'e>>>,
    depth: usize,
    out: String,
    code: Option<CodeBlock>,
    image: Option<ImageBuf>,
    /// One entry per open link: the target for internal links, `None` for `\href`.
    links: Vec<Option<String>>,
    lists: Vec<bool>,
    table: Option<TableState>,
    in_heading: bool,
}

impl<'c, 'e> LatexWriter<'c, 'e> {
    fn new(config: &'c EngineConfig, footnotes: &'c HashMap<String, Vec<Event<'e>>>, depth: usize) -> Self {
        Self {
            config,
            footnotes,
            depth,
            out: String::new(),
            code: None,
            image: None,
            links: Vec::new(),
            lists: Vec::new(),
            table: None,
            in_heading: false,
        }
    }

    fn finish(self) -> String {
        let mut out = self.out.trim_end().to_string();
        out.push('\n');
        out
    }

    fn write_all(&mut self, events: impl IntoIterator<Item = Event<'e>>) {
        for event in events {
            self.write(event);
        }
    }

    fn ensure_line_start(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn write(&mut self, event: Event<'e>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.text(&text),
            Event::Code(code) => self.inline_code(&code),
            Event::SoftBreak => self.text("\n"),
            Event::HardBreak => self.out.push_str("\\\\\n"),
            Event::Rule => {
                self.ensure_line_start();
                self.out.push_str("\\noindent\\rule{\\linewidth}{0.4pt}\n\n");
            }
            Event::TaskListMarker(checked) => {
                self.out.push_str(if checked { r"$\boxtimes$ " } else { r"$\square$ " });
            }
            Event::FootnoteReference(label) => self.footnote(&label),
            Event::Html(html) | Event::InlineHtml(html) => {
                log::debug!("dropping raw HTML: {}", html.trim());
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'e>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.ensure_line_start();
                self.in_heading = true;
                self.out.push_str(heading_command(level));
                self.out.push('{');
            }
            Tag::CodeBlock(kind) => {
                let (lang, title) = match &kind {
                    CodeBlockKind::Fenced(info) => parse_fence_info(info),
                    CodeBlockKind::Indented => (None, None),
                };
                let lexer = match lang {
                    Some(lang) if !self.config.override_language => lang,
                    _ => self.config.lexer.clone(),
                };
                self.code = Some(CodeBlock {
                    lexer,
                    title,
                    body: String::new(),
                });
            }
            Tag::List(start) => {
                self.ensure_line_start();
                match start {
                    Some(n) => {
                        self.out.push_str("\\begin{enumerate}\n");
                        if n != 1 {
                            self.out.push_str(&format!("\\setcounter{{enumi}}{{{}}}\n", n.saturating_sub(1)));
                        }
                    }
                    None => self.out.push_str("\\begin{itemize}\n"),
                }
                self.lists.push(start.is_some());
            }
            Tag::Item => {
                self.ensure_line_start();
                self.out.push_str("\\item ");
            }
            Tag::DefinitionList => {
                self.ensure_line_start();
                self.out.push_str("\\begin{description}\n");
                self.lists.push(false);
            }
            Tag::DefinitionListTitle => {
                self.ensure_line_start();
                self.out.push_str("\\item[");
            }
            Tag::Emphasis => self.out.push_str("\\emph{"),
            Tag::Strong => self.out.push_str("\\textbf{"),
            Tag::Strikethrough => self.out.push_str("\\sout{"),
            Tag::Link { dest_url, .. } => {
                if is_external_url(&dest_url) {
                    self.out.push_str(&format!("\\href{{{}}}{{", escape_url(&dest_url)));
                    self.links.push(None);
                } else {
                    self.out.push('[');
                    self.links.push(Some(dest_url.to_string()));
                }
            }
            Tag::Image { dest_url, .. } => {
                self.image = Some(ImageBuf {
                    dest: dest_url.to_string(),
                    alt: String::new(),
                });
            }
            Tag::Table(alignments) => {
                self.ensure_line_start();
                let spec: String = alignments
                    .iter()
                    .map(|a| match a {
                        Alignment::Center => 'c',
                        Alignment::Right => 'r',
                        Alignment::Left | Alignment::None => 'l',
                    })
                    .collect();
                self.out.push_str(&format!("\\begin{{tabular}}{{{spec}}}\n\\hline\n"));
                self.table = Some(TableState { cell: 0 });
            }
            Tag::TableHead | Tag::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    table.cell = 0;
                }
            }
            Tag::TableCell => {
                if let Some(table) = self.table.as_mut() {
                    if table.cell > 0 {
                        self.out.push_str(" & ");
                    }
                    table.cell += 1;
                }
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                if self.lists.is_empty() || !self.out.ends_with('\n') {
                    self.out.push_str("\n\n");
                }
            }
            TagEnd::Heading(_) => {
                self.in_heading = false;
                self.out.push_str("}\n");
            }
            TagEnd::CodeBlock => {
                if let Some(code) = self.code.take() {
                    self.code_block(code);
                }
            }
            TagEnd::List(ordered) => {
                self.lists.pop();
                self.ensure_line_start();
                self.out.push_str(if ordered { "\\end{enumerate}\n" } else { "\\end{itemize}\n" });
                if self.lists.is_empty() {
                    self.out.push('\n');
                }
            }
            TagEnd::Item | TagEnd::DefinitionListDefinition => self.ensure_line_start(),
            TagEnd::DefinitionListTitle => self.out.push_str("] "),
            TagEnd::DefinitionList => {
                self.lists.pop();
                self.ensure_line_start();
                self.out.push_str("\\end{description}\n");
                if self.lists.is_empty() {
                    self.out.push('\n');
                }
            }
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => self.out.push('}'),
            TagEnd::Link => match self.links.pop() {
                Some(Some(dest)) => self.out.push_str(&format!("]({})", escape_latex(&dest))),
                _ => self.out.push('}'),
            },
            TagEnd::Image => {
                if let Some(image) = self.image.take() {
                    self.figure(image);
                }
            }
            TagEnd::TableHead => self.out.push_str(" \\\\\n\\hline\n"),
            TagEnd::TableRow => self.out.push_str(" \\\\\n"),
            TagEnd::Table => {
                self.table = None;
                self.out.push_str("\\hline\n\\end{tabular}\n\n");
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(code) = self.code.as_mut() {
            code.body.push_str(text);
        } else if let Some(image) = self.image.as_mut() {
            image.alt.push_str(text);
        } else {
            self.out.push_str(&escape_latex(text));
        }
    }

    fn inline_code(&mut self, code: &str) {
        if let Some(image) = self.image.as_mut() {
            image.alt.push_str(code);
            return;
        }
        // Verbatim commands break inside moving arguments such as headings.
        if self.in_heading {
            self.out.push_str(&format!("\\texttt{{{}}}", escape_latex(code)));
            return;
        }
        let lexer = &self.config.lexer;
        if braces_balanced(code) {
            self.out.push_str(&format!("\\mintinline{{{lexer}}}{{{code}}}"));
        } else {
            let delim = ['|', '+', '@', '/', '"']
                .into_iter()
                .find(|d| !code.contains(*d))
                .unwrap_or('|');
            self.out.push_str(&format!("\\mintinline{{{lexer}}}{delim}{code}{delim}"));
        }
    }

    fn code_block(&mut self, code: CodeBlock) {
        self.ensure_line_start();
        let body = code.body.trim_end_matches('\n');
        let minted = format!("\\begin{{minted}}{{{}}}\n{body}\n\\end{{minted}}\n", code.lexer);
        match code.title {
            Some(title) => {
                self.out.push_str("\\begin{listing}[H]\n");
                self.out.push_str(&minted);
                self.out.push_str(&format!("\\caption{{{}}}\n", escape_latex(&title)));
                self.out.push_str("\\end{listing}\n\n");
            }
            None => {
                self.out.push_str(&minted);
                self.out.push('\n');
            }
        }
    }

    fn figure(&mut self, image: ImageBuf) {
        self.ensure_line_start();
        self.out.push_str("\\begin{figure}[H]\n\\centering\n");
        self.out.push_str(&format!("\\includegraphics[width=\\linewidth]{{{}}}\n", image.dest));
        if !image.alt.trim().is_empty() {
            self.out.push_str(&format!("\\caption{{{}}}\n", escape_latex(image.alt.trim())));
        }
        self.out.push_str("\\end{figure}\n");
    }

    fn footnote(&mut self, label: &str) {
        let footnotes = self.footnotes;
        let Some(events) = footnotes.get(label) else {
            self.out.push_str(&escape_latex(&format!("[^{label}]")));
            return;
        };
        if self.depth >= MAX_FOOTNOTE_DEPTH {
            return;
        }
        let mut nested = LatexWriter::new(self.config, footnotes, self.depth + 1);
        nested.write_all(events.iter().cloned());
        let body = nested.out.trim().to_string();
        self.out.push_str(&format!("\\footnote{{{body}}}"));
    }
}

fn heading_command(level: HeadingLevel) -> &'static str {
    match level {
        HeadingLevel::H1 => "\\section",
        HeadingLevel::H2 => "\\subsection",
        HeadingLevel::H3 => "\\subsubsection",
        HeadingLevel::H4 => "\\paragraph",
        HeadingLevel::H5 | HeadingLevel::H6 => "\\subparagraph",
    }
}

/// Split a fence info string such as `sc title="Sine wave"` into the
/// language and the optional title attribute.
fn parse_fence_info(info: &str) -> (Option<String>, Option<String>) {
    let lang = info
        .split_whitespace()
        .next()
        .filter(|word| !word.contains('='))
        .map(|word| word.trim_start_matches('.').to_string());

    let title = info.find("title=\"").and_then(|start| {
        let rest = &info[start + "title=\"".len()..];
        rest.find('"').map(|end| rest[..end].to_string())
    });

    (lang, title)
}

fn escape_url(url: &str) -> String {
    url.replace('\\', "/").replace('#', "\\#").replace('%', "\\%")
}

fn braces_balanced(code: &str) -> bool {
    let mut depth = 0i32;
    for c in code.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> EngineConfig {
        EngineConfig {
            lexer: "sc".into(),
            override_language: true,
        }
    }

    fn convert(md: &str) -> String {
        markdown_to_latex(md, &config())
    }

    #[test]
    fn headings_map_to_sectioning_commands() {
        let tex = convert("# Lyd\n\n## Rum\n\nTekst.\n");
        assert_eq!(tex, "\\section{Lyd}\n\\subsection{Rum}\nTekst.\n");
    }

    #[test]
    fn special_characters_are_escaped() {
        assert_eq!(convert("50% & $5_x #1\n"), "50\\% \\& \\$5\\_x \\#1\n");
    }

    #[test]
    fn escape_and_unescape_are_inverse() {
        let raw = r"a\b{c}#d$e%f&g_h~i^j";
        assert_eq!(unescape_latex(&escape_latex(raw)), raw);
    }

    #[test]
    fn titled_fence_becomes_captioned_listing() {
        let tex = convert("```sc title=\"Sinus\"\nSinOsc.ar(440)\n```\n");
        assert_eq!(
            tex,
            "\\begin{listing}[H]\n\\begin{minted}{sc}\nSinOsc.ar(440)\n\\end{minted}\n\\caption{Sinus}\n\\end{listing}\n"
        );
    }

    #[test]
    fn untitled_fence_has_no_float() {
        let tex = convert("```\nx = 1;\n```\n");
        assert_eq!(tex, "\\begin{minted}{sc}\nx = 1;\n\\end{minted}\n");
    }

    #[test]
    fn fence_language_used_without_override() {
        let config = EngineConfig {
            lexer: "sc".into(),
            override_language: false,
        };
        let tex = markdown_to_latex("```bash\nls\n```\n", &config);
        assert!(tex.starts_with("\\begin{minted}{bash}\n"), "{tex}");
    }

    #[test]
    fn inline_code_uses_mintinline() {
        assert_eq!(convert("Brug `SinOsc.ar`.\n"), "Brug \\mintinline{sc}{SinOsc.ar}.\n");
        assert_eq!(convert("Brug `{`.\n"), "Brug \\mintinline{sc}|{|.\n");
    }

    #[test]
    fn inline_code_in_heading_uses_texttt() {
        assert_eq!(convert("# Om `Pbind`\n"), "\\section{Om \\texttt{Pbind}}\n");
    }

    #[test]
    fn internal_links_stay_literal_and_external_become_href() {
        let tex = convert("Se [synths](../lyd/synths.md#env_gen) og [SC](https://supercollider.github.io/).\n");
        assert_eq!(
            tex,
            "Se [synths](../lyd/synths.md\\#env\\_gen) og \\href{https://supercollider.github.io/}{SC}.\n"
        );
    }

    #[test]
    fn images_become_figures() {
        let tex = convert("![Signalflow](../media/flow.png)\n");
        assert_eq!(
            tex,
            "\\begin{figure}[H]\n\\centering\n\\includegraphics[width=\\linewidth]{../media/flow.png}\n\\caption{Signalflow}\n\\end{figure}\n"
        );
    }

    #[test]
    fn footnotes_are_inlined() {
        let tex = convert("Tekst[^1].\n\n[^1]: Se `Env.perc`.\n");
        assert_eq!(tex, "Tekst\\footnote{Se \\mintinline{sc}{Env.perc}.}.\n");
    }

    #[test]
    fn lists_and_tables() {
        let tex = convert("- a\n- b\n\n| x | y |\n|---|--:|\n| 1 | 2 |\n");
        assert_eq!(
            tex,
            "\\begin{itemize}\n\\item a\n\\item b\n\\end{itemize}\n\n\\begin{tabular}{lr}\n\\hline\nx & y \\\\\n\\hline\n1 & 2 \\\\\n\\hline\n\\end{tabular}\n"
        );
    }

    #[test]
    fn definition_lists_become_descriptions() {
        let tex = convert("Øvelser\n: Opgaver til kapitlet\n\nCheat sheets\n: Oversigter\n");
        assert!(tex.starts_with("\\begin{description}\n\\item[Øvelser] Opgaver til kapitlet"), "{tex}");
        assert!(tex.contains("\\item[Cheat sheets] Oversigter"), "{tex}");
        assert!(tex.trim_end().ends_with("\\end{description}"), "{tex}");
    }

    #[test]
    fn directives_pass_through_unchanged() {
        let marker = "!!!LABEL:lyd=2Drum!!!";
        assert_eq!(convert(&format!("# Lyd\n{marker}\n")), format!("\\section{{Lyd}}\n{marker}\n"));
    }

    #[test]
    fn fence_info_parsing() {
        assert_eq!(
            parse_fence_info("sc title=\"A b\" linenums=\"1\""),
            (Some("sc".into()), Some("A b".into()))
        );
        assert_eq!(parse_fence_info("title=\"Only\""), (None, Some("Only".into())));
        assert_eq!(parse_fence_info(""), (None, None));
    }
}
