use base64::{engine::general_purpose::STANDARD, Engine as _};
use scraper::node::Node;
use scraper::{ElementRef, Html};

use crate::cleanup::{self, SkipSet};
use crate::models::{basename, MarkdownDocument, ResourceEntry};
use crate::resources::ResourceIndex;

// ── Constants ────────────────────────────────────────────────────────────────

/// Content type used for archive entries whose type is unknown.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Below this depth elements are flattened to their text instead of being
/// walked recursively, so pathological nesting cannot exhaust the stack.
const MAX_DEPTH: usize = 256;

const MAX_CONTEXT_ANCESTORS: usize = 4;
const MAX_CONTEXT_CHARS: usize = 120;
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];

const IGNORED_TAGS: &[&str] = &["head", "title", "script", "style", "noscript", "template"];

const CONTAINER_TAGS: &[&str] = &[
    "html", "body", "div", "section", "article", "main", "header", "footer", "nav", "aside",
    "figure", "figcaption", "address", "center", "details", "summary", "dl", "dt", "dd",
    "form", "fieldset", "thead", "tbody", "tfoot", "tr", "td", "th", "caption",
];

const INLINE_BLOCKISH_TAGS: &[&str] = &[
    "p", "div", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "table", "tr", "td",
    "th", "blockquote", "pre", "section", "article", "dt", "dd",
];

// ── Public API ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Drop attachment listings and repeated page headers/footers.
    pub strip_boilerplate: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            strip_boilerplate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionStats {
    pub images_inlined: usize,
    pub images_unresolved: usize,
}

#[derive(Debug)]
pub struct Conversion {
    pub document: MarkdownDocument,
    pub stats: ConversionStats,
}

/// Convert a rendering to Markdown with default options.
pub fn convert(html: &str, index: &ResourceIndex) -> MarkdownDocument {
    convert_with(html, index, &ConvertOptions::default()).document
}

/// Parse `html` tolerantly and render it as Markdown blocks, inlining every
/// image the index can resolve.
pub fn convert_with(html: &str, index: &ResourceIndex, options: &ConvertOptions) -> Conversion {
    let document = Html::parse_document(html.trim_start_matches('\0'));

    let skip = if options.strip_boilerplate {
        cleanup::non_content(&document, index)
    } else {
        SkipSet::default()
    };

    let mut walker = Walker {
        index,
        skip: &skip,
        blocks: Vec::new(),
        inline: String::new(),
        stats: ConversionStats::default(),
    };
    walker.block(document.root_element(), 0);
    walker.flush();

    Conversion {
        document: MarkdownDocument {
            blocks: walker.blocks,
        },
        stats: walker.stats,
    }
}

/// `data:` URI for an archive entry.
pub fn data_uri(entry: &ResourceEntry) -> String {
    format!(
        "data:{};base64,{}",
        entry.content_type.as_deref().unwrap_or(FALLBACK_CONTENT_TYPE),
        STANDARD.encode(&entry.bytes)
    )
}

// ── Walker ───────────────────────────────────────────────────────────────────

struct Walker<'a> {
    index: &'a ResourceIndex,
    skip: &'a SkipSet,
    blocks: Vec<String>,
    /// Inline content waiting for the next block boundary.
    inline: String,
    stats: ConversionStats,
}

impl Walker<'_> {
    fn push_block(&mut self, block: String) {
        if !block.trim().is_empty() {
            self.blocks.push(block);
        }
    }

    /// Turn pending inline content into a paragraph.
    fn flush(&mut self) {
        let text = normalize_text(&std::mem::take(&mut self.inline));
        self.push_block(text);
    }

    fn block(&mut self, el: ElementRef<'_>, depth: usize) {
        if self.skip.contains(el) {
            return;
        }
        if depth > MAX_DEPTH {
            let text = self.flat_inline(el);
            self.inline.push_str(&text);
            return;
        }

        let name = el.value().name();
        if IGNORED_TAGS.contains(&name) {
            return;
        }

        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.flush();
                let level = name[1..].parse::<usize>().unwrap_or(1);
                let text = normalize_text(&self.inline_children(el, depth));
                if !text.is_empty() {
                    self.push_block(format!("{} {}", "#".repeat(level), text));
                }
            }

            "p" => {
                self.flush();
                let text = normalize_text(&self.inline_children(el, depth));
                self.push_block(text);
            }

            "ul" | "ol" => {
                self.flush();
                let mut lines = Vec::new();
                self.list(el, "", depth, &mut lines);
                self.push_block(lines.join("\n"));
            }

            "li" => {
                self.flush();
                let text = normalize_text(&self.inline_children(el, depth));
                if !text.is_empty() {
                    self.push_block(format!("- {}", text));
                }
            }

            "table" => {
                self.flush();
                self.table(el, depth);
            }

            "pre" => {
                self.flush();
                let text: String = el.text().collect();
                let text = text.trim_matches('\n');
                if !text.trim().is_empty() {
                    self.push_block(format!("```\n{}\n```", text));
                }
            }

            "blockquote" => {
                self.flush();
                let inner = self.nested_blocks(el, depth);
                if !inner.is_empty() {
                    let quoted = inner
                        .join("\n\n")
                        .lines()
                        .map(|l| if l.is_empty() { ">".to_string() } else { format!("> {}", l) })
                        .collect::<Vec<_>>()
                        .join("\n");
                    self.push_block(quoted);
                }
            }

            "hr" => {
                self.flush();
                self.push_block("---".to_string());
            }

            _ if CONTAINER_TAGS.contains(&name) => {
                self.flush();
                self.children(el, depth);
                self.flush();
            }

            _ => {
                let md = self.inline_node(el, depth);
                self.inline.push_str(&md);
            }
        }
    }

    fn children(&mut self, el: ElementRef<'_>, depth: usize) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => self.inline.push_str(&*text.text),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.block(child_el, depth + 1);
                    }
                }
                _ => {}
            }
        }
    }

    /// Render the children of `el` as a separate block sequence.
    fn nested_blocks(&mut self, el: ElementRef<'_>, depth: usize) -> Vec<String> {
        let outer_blocks = std::mem::take(&mut self.blocks);
        let outer_inline = std::mem::take(&mut self.inline);
        self.children(el, depth);
        self.flush();
        let inner = std::mem::replace(&mut self.blocks, outer_blocks);
        self.inline = outer_inline;
        inner
    }

    // ── Inline content ───────────────────────────────────────────────────────

    fn inline_children(&mut self, el: ElementRef<'_>, depth: usize) -> String {
        let mut out = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(text) => out.push_str(&*text.text),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        out.push_str(&self.inline_node(child_el, depth + 1));
                    }
                }
                _ => {}
            }
        }
        out
    }

    fn inline_node(&mut self, el: ElementRef<'_>, depth: usize) -> String {
        if self.skip.contains(el) {
            return String::new();
        }
        if depth > MAX_DEPTH {
            return self.flat_inline(el);
        }

        let name = el.value().name();
        if IGNORED_TAGS.contains(&name) {
            return String::new();
        }

        match name {
            "strong" | "b" => wrap_inline(&self.inline_children(el, depth), "**"),
            "em" | "i" => wrap_inline(&self.inline_children(el, depth), "*"),
            "code" | "kbd" | "samp" | "tt" => {
                let text: String = el.text().collect();
                wrap_inline(&text.replace('`', "'"), "`")
            }
            "a" => {
                let content = self.inline_children(el, depth);
                let text = normalize_text(&content);
                match el.value().attr("href").map(str::trim).filter(|h| !h.is_empty()) {
                    Some(_) if text.is_empty() => String::new(),
                    Some(href) => {
                        let (lead, trail) = edge_spaces(&content);
                        format!("{}[{}]({}){}", lead, text, href, trail)
                    }
                    None => content,
                }
            }
            "img" => self.image(el),
            "br" => " ".to_string(),
            _ if INLINE_BLOCKISH_TAGS.contains(&name) => {
                format!(" {} ", self.inline_children(el, depth))
            }
            _ => self.inline_children(el, depth),
        }
    }

    /// Text and images of a subtree too deep to recurse into, walked with an
    /// explicit stack. Structure is dropped; ignored tags and skipped blocks
    /// stay out.
    fn flat_inline(&mut self, el: ElementRef<'_>) -> String {
        let mut out = String::from(" ");
        let mut stack = vec![*el];
        while let Some(node) = stack.pop() {
            match node.value() {
                Node::Text(text) => {
                    out.push_str(&*text.text);
                    out.push(' ');
                }
                Node::Element(element) => {
                    let Some(child_el) = ElementRef::wrap(node) else {
                        continue;
                    };
                    if self.skip.contains(child_el) || IGNORED_TAGS.contains(&element.name()) {
                        continue;
                    }
                    if element.name() == "img" {
                        let image = self.image(child_el);
                        out.push_str(&image);
                        out.push(' ');
                        continue;
                    }
                    stack.extend(node.children().rev());
                }
                _ => {}
            }
        }
        out
    }

    // ── Images ───────────────────────────────────────────────────────────────

    fn image(&mut self, el: ElementRef<'_>) -> String {
        let v = el.value();
        let alt = v.attr("alt").map(str::trim).unwrap_or("");
        let src = v
            .attr("src")
            .or_else(|| v.attr("data-src"))
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let Some(token) = src else {
            self.stats.images_unresolved += 1;
            return unresolved_image(alt);
        };

        if token.starts_with("data:") {
            return format!("![{}]({})", escape_alt(alt), token);
        }

        match self.index.lookup(token) {
            Some((entry, rule)) => {
                self.stats.images_inlined += 1;
                tracing::debug!(token, entry = %entry.name, ?rule, "inlining image");
                let alt = if alt.is_empty()
                    || alt.eq_ignore_ascii_case(basename(token))
                    || alt.eq_ignore_ascii_case(basename(&entry.name))
                {
                    context_alt(el, self.skip)
                } else {
                    alt.to_string()
                };
                format!("![{}]({})", escape_alt(&alt), data_uri(entry))
            }
            None => {
                self.stats.images_unresolved += 1;
                tracing::debug!(token, "image reference not found in resource archive");
                unresolved_image(alt)
            }
        }
    }

    // ── Lists ────────────────────────────────────────────────────────────────

    fn list(&mut self, el: ElementRef<'_>, indent: &str, depth: usize, lines: &mut Vec<String>) {
        let ordered = el.value().name() == "ol";
        let mut number = el
            .value()
            .attr("start")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(1);

        for child in el.children() {
            match child.value() {
                Node::Text(text) => {
                    let text = normalize_text(&text.text);
                    if !text.is_empty() {
                        lines.push(format!("{}- {}", indent, text));
                    }
                }
                Node::Element(_) => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if self.skip.contains(child_el) {
                        continue;
                    }
                    match child_el.value().name() {
                        "ul" | "ol" if depth < MAX_DEPTH => {
                            let nested = format!("{}  ", indent);
                            self.list(child_el, &nested, depth + 1, lines);
                        }
                        _ => {
                            let marker = if ordered {
                                format!("{}.", number)
                            } else {
                                "-".to_string()
                            };
                            if self.list_item(child_el, indent, &marker, depth + 1, lines) {
                                number += 1;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Emit one item. Nested lists are indented under the item's text, and
    /// text following a nested list continues at the same indentation.
    fn list_item(
        &mut self,
        el: ElementRef<'_>,
        indent: &str,
        marker: &str,
        depth: usize,
        lines: &mut Vec<String>,
    ) -> bool {
        let child_indent = format!("{}{}", indent, " ".repeat(marker.len() + 1));
        let mut pending = String::new();
        let mut emitted = false;

        let flush = |pending: &mut String, emitted: &mut bool, lines: &mut Vec<String>| {
            let text = normalize_text(&std::mem::take(pending));
            if text.is_empty() {
                return;
            }
            if *emitted {
                lines.push(format!("{}{}", child_indent, text));
            } else {
                lines.push(format!("{}{} {}", indent, marker, text));
                *emitted = true;
            }
        };

        for child in el.children() {
            match child.value() {
                Node::Text(text) => pending.push_str(&*text.text),
                Node::Element(_) => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let name = child_el.value().name();
                    if matches!(name, "ul" | "ol") && depth < MAX_DEPTH && !self.skip.contains(child_el) {
                        flush(&mut pending, &mut emitted, lines);
                        if !emitted {
                            lines.push(format!("{}{}", indent, marker));
                            emitted = true;
                        }
                        self.list(child_el, &child_indent, depth + 1, lines);
                    } else {
                        pending.push_str(&self.inline_node(child_el, depth + 1));
                    }
                }
                _ => {}
            }
        }
        flush(&mut pending, &mut emitted, lines);
        emitted
    }

    // ── Tables ───────────────────────────────────────────────────────────────

    fn table(&mut self, el: ElementRef<'_>, depth: usize) {
        let mut row_els = Vec::new();
        collect_rows(el, self.skip, &mut row_els);

        let mut caption = None;
        let mut rows: Vec<Vec<String>> = Vec::new();
        for child in el.children().filter_map(ElementRef::wrap) {
            if child.value().name() == "caption" && !self.skip.contains(child) {
                caption = Some(normalize_text(&self.inline_children(child, depth + 1)));
            }
        }
        let skip = self.skip;
        for row in row_els {
            let cells: Vec<String> = row
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|c| matches!(c.value().name(), "td" | "th") && !skip.contains(*c))
                .map(|c| normalize_text(&self.inline_children(c, depth + 2)).replace('|', "\\|"))
                .collect();
            if !cells.is_empty() {
                rows.push(cells);
            }
        }

        if let Some(caption) = caption {
            self.push_block(caption);
        }

        let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
        if columns == 0 {
            return;
        }

        // The first row is the header; a table without one still needs it.
        let mut lines = Vec::with_capacity(rows.len() + 1);
        for (i, mut row) in rows.into_iter().enumerate() {
            row.resize(columns, String::new());
            lines.push(format!("| {} |", row.join(" | ")));
            if i == 0 {
                lines.push(format!("| {} |", vec!["---"; columns].join(" | ")));
            }
        }
        self.push_block(lines.join("\n"));
    }
}

fn collect_rows<'a>(el: ElementRef<'a>, skip: &SkipSet, out: &mut Vec<ElementRef<'a>>) {
    for child in el.children().filter_map(ElementRef::wrap) {
        if skip.contains(child) {
            continue;
        }
        match child.value().name() {
            "tr" => out.push(child),
            "thead" | "tbody" | "tfoot" => collect_rows(child, skip, out),
            _ => {}
        }
    }
}

// ── Contextual alt text ──────────────────────────────────────────────────────

/// Alt text from the nearest meaningful text around an image: the last
/// sentence before it and the first sentence after it.
fn context_alt(el: ElementRef<'_>, skip: &SkipSet) -> String {
    let before = neighbor_text(el, skip, true).map(|t| sentence_fragment(&t, true));
    let after = neighbor_text(el, skip, false).map(|t| sentence_fragment(&t, false));
    [before, after]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn neighbor_text(el: ElementRef<'_>, skip: &SkipSet, before: bool) -> Option<String> {
    let mut node = *el;
    for _ in 0..=MAX_CONTEXT_ANCESTORS {
        let found = if before {
            node.prev_siblings()
                .find_map(|s| sibling_text(s.value(), ElementRef::wrap(s), skip))
        } else {
            node.next_siblings()
                .find_map(|s| sibling_text(s.value(), ElementRef::wrap(s), skip))
        };
        if found.is_some() {
            return found;
        }
        node = node.parent()?;
    }
    None
}

fn sibling_text(value: &Node, element: Option<ElementRef<'_>>, skip: &SkipSet) -> Option<String> {
    let raw = match value {
        Node::Text(text) => text.text.to_string(),
        Node::Element(_) => {
            let el = element?;
            if skip.contains(el) || IGNORED_TAGS.contains(&el.value().name()) {
                return None;
            }
            flat_text(el)
        }
        _ => return None,
    };
    let text = normalize_text(&raw);
    text.chars().any(char::is_alphanumeric).then_some(text)
}

/// Last (or first) sentence of `text`, capped in length.
fn sentence_fragment(text: &str, last: bool) -> String {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if SENTENCE_TERMINATORS.contains(&c) {
            let s = current.trim().to_string();
            if !s.is_empty() {
                sentences.push(s);
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    let picked = if last { sentences.pop() } else { sentences.into_iter().next() };
    let fragment = picked.unwrap_or_else(|| text.trim().to_string());
    if fragment.chars().count() > MAX_CONTEXT_CHARS {
        let cut: String = fragment.chars().take(MAX_CONTEXT_CHARS).collect();
        format!("{}…", cut.trim_end())
    } else {
        fragment
    }
}

// ── Text helpers ─────────────────────────────────────────────────────────────

/// Collapse whitespace and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized text of an element and all its descendants.
pub fn element_text(el: ElementRef<'_>) -> String {
    normalize_text(&flat_text(el))
}

fn flat_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

/// Surround trimmed content with `marker`, keeping the whitespace that
/// separated it from its neighbours.
fn wrap_inline(content: &str, marker: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return content.to_string();
    }
    let (lead, trail) = edge_spaces(content);
    format!("{}{}{}{}{}", lead, marker, trimmed, marker, trail)
}

fn edge_spaces(content: &str) -> (&'static str, &'static str) {
    let lead = if content.starts_with(char::is_whitespace) { " " } else { "" };
    let trail = if content.ends_with(char::is_whitespace) { " " } else { "" };
    (lead, trail)
}

/// Alt text in image brackets with no destination, so nothing points at a
/// missing resource.
fn unresolved_image(alt: &str) -> String {
    format!("![{}]", escape_alt(alt))
}

fn escape_alt(alt: &str) -> String {
    normalize_text(alt).replace('[', "\\[").replace(']', "\\]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceArchive;

    fn archive(entries: &[(&str, &[u8], Option<&str>)]) -> ResourceIndex {
        ResourceIndex::build(ResourceArchive {
            entries: entries
                .iter()
                .map(|(name, bytes, ct)| ResourceEntry {
                    name: name.to_string(),
                    bytes: bytes.to_vec(),
                    content_type: ct.map(str::to_string),
                })
                .collect(),
        })
    }

    fn md(html: &str) -> String {
        convert(html, &ResourceIndex::default()).to_text()
    }

    #[test]
    fn headings_paragraphs_and_emphasis() {
        let out = md("<h1>Title</h1><p>Some <strong>bold</strong> and <em>soft</em> text.</p><h3>Sub</h3>");
        assert_eq!(out, "# Title\n\nSome **bold** and *soft* text.\n\n### Sub\n");
    }

    #[test]
    fn links_keep_href_unchanged() {
        let out = md(r#"<p>Go to <a href="../docs/page.html?q=1">the docs</a>.</p>"#);
        assert_eq!(out, "Go to [the docs](../docs/page.html?q=1).\n");
    }

    #[test]
    fn unsupported_tags_are_stripped_but_text_kept_once() {
        let out = md("<p>alpha <span>beta <font>gamma</font></span> delta<br>epsilon</p>");
        assert_eq!(out, "alpha beta gamma delta epsilon\n");
    }

    #[test]
    fn lists_nest_by_indentation() {
        let out = md("<ul><li>one<ul><li>inner</li></ul></li><li>two</li></ul><ol><li>first</li><li>second</li></ol>");
        assert_eq!(out, "- one\n  - inner\n- two\n\n1. first\n2. second\n");
    }

    #[test]
    fn ordered_list_respects_start() {
        let out = md(r#"<ol start="4"><li>four</li><li>five</li></ol>"#);
        assert_eq!(out, "4. four\n5. five\n");
    }

    #[test]
    fn text_after_nested_list_stays_in_order() {
        let out = md("<ol><li>head<ul><li>x</li></ul>tail</li></ol>");
        assert_eq!(out, "1. head\n   - x\n   tail\n");
    }

    #[test]
    fn table_with_header_row() {
        let out = md("<table><tr><th>Name</th><th>Qty</th></tr><tr><td>Apple</td><td>3</td></tr></table>");
        assert_eq!(out, "| Name | Qty |\n| --- | --- |\n| Apple | 3 |\n");
    }

    #[test]
    fn table_without_th_promotes_first_row_and_pads() {
        let out = md("<table><tbody><tr><td>a</td><td>b|c</td></tr><tr><td>1</td></tr></tbody></table>");
        assert_eq!(out, "| a | b\\|c |\n| --- | --- |\n| 1 |  |\n");
    }

    #[test]
    fn resolved_image_is_inlined_with_exact_bytes() {
        let bytes: &[u8] = &[0xFF, 0xD8, 0xFF, 0x00, 0x10, 0x80, 0xFE];
        let idx = archive(&[("img0.jpg", bytes, Some("image/jpeg"))]);
        let out = convert(r#"<p>Intro.</p><p><img src="img0.jpg" alt="Chart"></p>"#, &idx);
        assert_eq!(out.blocks.len(), 2);
        assert_eq!(out.blocks[0], "Intro.");
        let expected = format!("![Chart](data:image/jpeg;base64,{})", STANDARD.encode(bytes));
        assert_eq!(out.blocks[1], expected);

        let encoded = out.blocks[1]
            .split("base64,")
            .nth(1)
            .unwrap()
            .trim_end_matches(')');
        assert_eq!(STANDARD.decode(encoded).unwrap(), bytes);
    }

    #[test]
    fn missing_content_type_uses_fallback() {
        let idx = archive(&[("blob", b"xyz", None)]);
        let out = md_with(&idx, r#"<img src="blob" alt="x">"#);
        assert!(out.contains("data:application/octet-stream;base64,eHl6"));
    }

    fn md_with(idx: &ResourceIndex, html: &str) -> String {
        convert(html, idx).to_text()
    }

    #[test]
    fn path_suffix_fallback_resolves() {
        let idx = archive(&[("images/fig1.png", b"png", Some("image/png"))]);
        let out = md_with(&idx, r#"<p><img src="fig1.png" alt="Figure"></p>"#);
        assert_eq!(out, "![Figure](data:image/png;base64,cG5n)\n");
    }

    #[test]
    fn unresolved_image_keeps_alt_only_and_conversion_continues() {
        let idx = archive(&[("img0.jpg", b"a", Some("image/jpeg"))]);
        let conv = convert_with(
            r#"<p>before</p><p><img src="missing.png" alt="Lost"></p><p>after</p>"#,
            &idx,
            &ConvertOptions::default(),
        );
        assert_eq!(conv.document.blocks, vec!["before", "![Lost]", "after"]);
        assert_eq!(conv.stats.images_unresolved, 1);
        assert_eq!(conv.stats.images_inlined, 0);
    }

    #[test]
    fn text_around_inline_image_keeps_order() {
        let idx = archive(&[("a.png", b"1", Some("image/png"))]);
        let out = md_with(&idx, r#"<p>left <img src="a.png" alt="pic"> right</p>"#);
        assert_eq!(out, "left ![pic](data:image/png;base64,MQ==) right\n");
    }

    #[test]
    fn filename_alt_is_replaced_by_context() {
        let idx = archive(&[("image0.jpg", b"1", Some("image/jpeg"))]);
        let html = r#"<p>First point. The chart shows growth</p>
            <p><img src="embedded:image0.jpg" alt="image0.jpg"></p>
            <p>Revenue doubled. Costs fell.</p>"#;
        let out = md_with(&idx, html);
        assert!(
            out.contains("![The chart shows growth Revenue doubled.](data:image/jpeg;base64,MQ==)"),
            "{}",
            out
        );
    }

    #[test]
    fn data_uris_pass_through() {
        let out = md(r#"<img src="data:image/gif;base64,R0lG" alt="g">"#);
        assert_eq!(out, "![g](data:image/gif;base64,R0lG)\n");
    }

    #[test]
    fn malformed_markup_does_not_fail() {
        let out = md("<p>open <b>bold <i>both</p><div><span>unclosed<table><td>cell");
        assert!(out.contains("open"));
        assert!(out.contains("cell"));
    }

    #[test]
    fn very_deep_nesting_is_flattened() {
        let depth = 2000;
        let html = format!("{}deep text{}", "<div>".repeat(depth), "</div>".repeat(depth));
        let out = md(&html);
        assert_eq!(out.trim(), "deep text");
    }

    #[test]
    fn images_below_the_depth_limit_are_still_inlined() {
        let idx = archive(&[("a.png", b"1", Some("image/png"))]);
        let depth = 300;
        let html = format!(
            "{}before <img src=\"a.png\" alt=\"Fig\"> after<script>var secret=1;</script>{}",
            "<div>".repeat(depth),
            "</div>".repeat(depth)
        );
        let conv = convert_with(&html, &idx, &ConvertOptions::default());
        assert_eq!(
            conv.document.to_text(),
            "before ![Fig](data:image/png;base64,MQ==) after\n"
        );
        assert_eq!(conv.stats.images_inlined, 1);
        assert_eq!(conv.stats.images_unresolved, 0);
    }

    #[test]
    fn deep_inline_nesting_keeps_unresolved_images() {
        let depth = 400;
        let html = format!(
            "<p>{}x <img src=\"gone.png\" alt=\"Gone\"><style>p{{}}</style> y{}</p>",
            "<span>".repeat(depth),
            "</span>".repeat(depth)
        );
        let conv = convert_with(&html, &ResourceIndex::default(), &ConvertOptions::default());
        assert_eq!(conv.document.blocks, vec!["x ![Gone] y"]);
        assert_eq!(conv.stats.images_unresolved, 1);
    }

    #[test]
    fn very_large_documents_convert() {
        let html: String = (0..20_000).map(|i| format!("<p>para {}</p>", i)).collect();
        let doc = convert(&html, &ResourceIndex::default());
        assert_eq!(doc.blocks.len(), 20_000);
        assert_eq!(doc.blocks[19_999], "para 19999");
    }

    #[test]
    fn conversion_is_deterministic() {
        let idx = archive(&[("a.png", b"abc", Some("image/png"))]);
        let html = r#"<h2>T</h2><ul><li>x</li></ul><p><img src="a.png"></p><table><tr><td>1</td></tr></table>"#;
        assert_eq!(md_with(&idx, html), md_with(&idx, html));
    }

    #[test]
    fn title_head_and_scripts_are_ignored() {
        let out = md("<html><head><title>Doc title</title><style>p{}</style></head><body><p>Body</p><script>x()</script></body></html>");
        assert_eq!(out, "Body\n");
    }

    #[test]
    fn blockquote_and_pre() {
        let out = md("<blockquote><p>quoted</p><p>more</p></blockquote><pre>let x = 1;\n  y</pre>");
        assert_eq!(out, "> quoted\n>\n> more\n\n```\nlet x = 1;\n  y\n```\n");
    }

    #[test]
    fn zero_resources_gives_text_only() {
        let idx = ResourceIndex::build(ResourceArchive::default());
        let conv = convert_with("<p>Only text.</p>", &idx, &ConvertOptions::default());
        assert_eq!(conv.document.blocks, vec!["Only text."]);
        assert_eq!(conv.stats, ConversionStats::default());
    }

    #[test]
    fn sentence_fragments() {
        assert_eq!(sentence_fragment("One. Two! Three", true), "Three");
        assert_eq!(sentence_fragment("One. Two!", false), "One.");
        let long = "x".repeat(200);
        assert!(sentence_fragment(&long, true).ends_with('…'));
    }
}
