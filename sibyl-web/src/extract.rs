//! Response markup → Markdown-flavoured text.
//!
//! The answer region is a tree of provider-styled blocks. Three classes carry
//! the structure we keep (heading, paragraph, list); everything else is either
//! rendered through its enclosing block or dropped. Extraction never fails:
//! when no structured block is found, or the profile cannot be compiled, the
//! region's flattened text is returned instead.

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::borrow::Cow;

/// Class names and noise marker identifying the structured blocks of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorProfile {
    pub heading_class: String,
    pub paragraph_class: String,
    pub list_class: String,
    /// Regex for provider-internal markers removed before parsing.
    pub noise_pattern: String,
}

impl Default for ExtractorProfile {
    fn default() -> Self {
        Self {
            heading_class: "otQkpb".to_string(),
            paragraph_class: "Y3BBE".to_string(),
            list_class: "U6u95".to_string(),
            noise_pattern: r"Sv6Kpe\[.*?\]".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Bold(String),
    Italic(String),
    Link { label: String, href: String },
    /// Children of an element with no formatting of its own.
    Group(Vec<Inline>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading(String),
    Paragraph(Vec<Inline>),
    /// One inline run per direct list item.
    List(Vec<Vec<Inline>>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn render(&self) -> String {
        self.blocks
            .iter()
            .map(render_block)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Heading,
    Paragraph,
    List,
}

#[derive(Debug)]
struct Compiled {
    any_block: Selector,
    noise: Regex,
}

/// Markup extractor bound to a profile.
#[derive(Debug)]
pub struct Extractor {
    profile: ExtractorProfile,
    compiled: Option<Compiled>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(ExtractorProfile::default())
    }
}

impl Extractor {
    pub fn new(profile: ExtractorProfile) -> Self {
        let compiled = match compile(&profile) {
            Ok(c) => Some(c),
            Err(reason) => {
                tracing::warn!(target: "extract", %reason, "extractor profile unusable; plain text only");
                None
            }
        };
        Self { profile, compiled }
    }

    pub fn profile(&self) -> &ExtractorProfile {
        &self.profile
    }

    /// Parse `markup` into structured blocks. `None` when the profile did not compile.
    pub fn parse(&self, markup: &str) -> Option<Document> {
        let compiled = self.compiled.as_ref()?;
        let cleaned = compiled.noise.replace_all(markup, "");
        let html = Html::parse_fragment(&cleaned);

        let blocks = html
            .select(&compiled.any_block)
            .filter(|el| !has_block_ancestor(el, &compiled.any_block))
            .filter_map(|el| self.to_block(el))
            .collect();
        Some(Document { blocks })
    }

    /// Render `markup` as text. Always returns something for non-empty input.
    pub fn extract(&self, markup: &str) -> String {
        match self.parse(markup) {
            Some(doc) => {
                let rendered = doc.render();
                if !rendered.is_empty() {
                    tracing::debug!(target: "extract", blocks = doc.blocks.len(), "structured extraction");
                    return rendered;
                }
                tracing::warn!(target: "extract", "no structured blocks found; falling back to plain text");
                let cleaned = self
                    .compiled
                    .as_ref()
                    .map(|c| c.noise.replace_all(markup, ""))
                    .unwrap_or(Cow::Borrowed(markup));
                plain_text(&cleaned)
            }
            None => plain_text(markup),
        }
    }

    fn classify(&self, el: &ElementRef<'_>) -> Option<BlockKind> {
        let has = |class: &str| el.value().classes().any(|c| c == class);
        if has(&self.profile.heading_class) {
            Some(BlockKind::Heading)
        } else if has(&self.profile.paragraph_class) {
            Some(BlockKind::Paragraph)
        } else if has(&self.profile.list_class) {
            Some(BlockKind::List)
        } else {
            None
        }
    }

    fn to_block(&self, el: ElementRef<'_>) -> Option<Block> {
        let block = match self.classify(&el)? {
            BlockKind::Heading => Block::Heading(flatten(el)),
            BlockKind::Paragraph => Block::Paragraph(inlines(el)),
            BlockKind::List => Block::List(
                el.children()
                    .filter_map(ElementRef::wrap)
                    .filter(|child| child.value().name() == "li")
                    .map(inlines)
                    .collect(),
            ),
        };
        Some(block)
    }
}

/// Extract with the default profile.
pub fn extract(markup: &str) -> String {
    Extractor::default().extract(markup)
}

fn compile(profile: &ExtractorProfile) -> Result<Compiled, String> {
    let classes = [
        &profile.heading_class,
        &profile.paragraph_class,
        &profile.list_class,
    ];
    if classes.iter().any(|c| c.trim().is_empty()) {
        return Err("empty class name".to_string());
    }
    let css = classes
        .iter()
        .map(|c| format!(".{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let any_block = Selector::parse(&css).map_err(|e| format!("selector `{css}`: {e:?}"))?;
    let noise = Regex::new(&profile.noise_pattern)
        .map_err(|e| format!("noise pattern `{}`: {e}", profile.noise_pattern))?;
    Ok(Compiled { any_block, noise })
}

fn has_block_ancestor(el: &ElementRef<'_>, any_block: &Selector) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| any_block.matches(&a))
}

fn is_hidden(name: &str) -> bool {
    matches!(name, "script" | "style" | "noscript" | "template")
}

/// Subtree text, trimmed, ignoring formatting.
fn flatten(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(el, &mut out);
    out.trim().to_string()
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) if !is_hidden(e.name()) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, out);
                }
            }
            _ => {}
        }
    }
}

fn inlines(el: ElementRef<'_>) -> Vec<Inline> {
    let mut out = Vec::new();
    for child in el.children() {
        match child.value() {
            Node::Text(t) => out.push(Inline::Text(t.to_string())),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                match child.value().name() {
                    "b" | "strong" => out.push(Inline::Bold(flatten(child))),
                    "i" | "em" => out.push(Inline::Italic(flatten(child))),
                    "a" => out.push(Inline::Link {
                        label: flatten(child),
                        href: child.value().attr("href").unwrap_or_default().to_string(),
                    }),
                    name if is_hidden(name) => {}
                    _ => out.push(Inline::Group(inlines(child))),
                }
            }
            _ => {}
        }
    }
    out
}

fn render_inline(inline: &Inline, out: &mut String) {
    match inline {
        Inline::Text(t) => out.push_str(t),
        Inline::Bold(t) => {
            out.push_str("**");
            out.push_str(t);
            out.push_str("**");
        }
        Inline::Italic(t) => {
            out.push('*');
            out.push_str(t);
            out.push('*');
        }
        Inline::Link { label, href } => {
            out.push_str(&format!("[{label}]({href})"));
        }
        Inline::Group(children) => {
            for child in children {
                render_inline(child, out);
            }
        }
    }
}

fn render_run(run: &[Inline]) -> String {
    let mut out = String::new();
    for inline in run {
        render_inline(inline, &mut out);
    }
    out.trim().to_string()
}

fn render_block(block: &Block) -> String {
    match block {
        Block::Heading(text) => format!("\n### {text}\n"),
        Block::Paragraph(run) => render_run(run),
        Block::List(items) => {
            let mut lines: Vec<String> = items
                .iter()
                .map(|item| format!("* {}", render_run(item)))
                .collect();
            lines.push(String::new());
            lines.join("\n")
        }
    }
}

const BREAKING: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "p",
    "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Flattened visible text of `markup`, one line per block-level element.
pub fn plain_text(markup: &str) -> String {
    let html = Html::parse_fragment(markup);
    let mut raw = String::new();
    plain_into(html.root_element(), &mut raw);
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn plain_into(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) if !is_hidden(e.name()) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                let breaks = BREAKING.contains(&e.name());
                if breaks {
                    out.push('\n');
                }
                plain_into(child, out);
                if breaks {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}
