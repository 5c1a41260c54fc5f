//! Detection of blocks that are not document content: attachment listings,
//! file-name trailers, and running page headers/footers.
//!
//! Nothing is removed from the tree. The result is a [`SkipSet`] that the
//! converter consults while walking.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::node::Element;
use scraper::{ElementRef, Html, Selector};

use crate::convert::element_text;
use crate::resources::ResourceIndex;

const MIN_PACKAGE_GROUP: usize = 2;
const MIN_REPEAT: usize = 3;
const MAX_SHORT_TEXT_LEN: usize = 200;
const TOP_BLOCKS_CONSIDERED: usize = 8;
const TRAILING_PASSES: usize = 3;

static FILENAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^_?\d{6,}\.\w+$|^[\w\-. ]{1,40}\.\w{1,6}$").unwrap());

static TOKEN_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s,;]+").unwrap());

static BODY_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

static NAMED_BLOCK_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a, p, div, span, li, h1, h2, h3, h4, h5, h6").unwrap());

static PAGE_BLOCK_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p, div, h1, h2, h3, h4, h5, h6, span").unwrap());

static ENTRY_HEADING_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("h1, h2, h3").unwrap());

static IMG_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

/// Elements the converter must not emit.
///
/// Keyed by element address, which is stable for as long as the parsed
/// document is alive.
#[derive(Debug, Default)]
pub struct SkipSet {
    nodes: HashSet<usize>,
}

impl SkipSet {
    fn key(el: ElementRef<'_>) -> usize {
        el.value() as *const Element as usize
    }

    pub fn insert(&mut self, el: ElementRef<'_>) {
        self.nodes.insert(Self::key(el));
    }

    pub fn contains(&self, el: ElementRef<'_>) -> bool {
        !self.nodes.is_empty() && self.nodes.contains(&Self::key(el))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

pub fn non_content(document: &Html, index: &ResourceIndex) -> SkipSet {
    let mut skip = SkipSet::default();
    let body = document
        .select(&BODY_SEL)
        .next()
        .unwrap_or_else(|| document.root_element());

    package_entries(document, body, &mut skip);
    attachment_names(document, index, &mut skip);
    trailing_file_lists(body, index, &mut skip);
    repeated_top_blocks(body, &mut skip);
    page_headers_and_footers(document, &mut skip);

    if !skip.is_empty() {
        tracing::debug!(elements = skip.len(), "dropping non-content blocks");
    }
    skip
}

fn child_elements<'a>(el: ElementRef<'a>, skip: &SkipSet) -> Vec<ElementRef<'a>> {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| !skip.contains(*c))
        .collect()
}

fn has_class_containing(el: ElementRef<'_>, needle: &str) -> bool {
    el.value()
        .attr("class")
        .map(|c| c.to_lowercase().contains(needle))
        .unwrap_or(false)
}

/// Attachment listings the backend appends as `package-entry` blocks.
fn package_entries(document: &Html, body: ElementRef<'_>, skip: &mut SkipSet) {
    let entries: Vec<ElementRef<'_>> = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| has_class_containing(*el, "package-entry"))
        .filter(|el| {
            let heading = el
                .select(&ENTRY_HEADING_SEL)
                .next()
                .map(element_text)
                .filter(|t| !t.is_empty());
            let text = heading.unwrap_or_else(|| element_text(*el));
            !text.is_empty() && FILENAME_RE.is_match(&text)
        })
        .collect();

    if entries.len() >= MIN_PACKAGE_GROUP {
        entries.into_iter().for_each(|el| skip.insert(el));
        return;
    }

    // A lone entry is only dropped when it trails the document.
    if let (Some(entry), Some(last)) = (entries.first(), child_elements(body, skip).last()) {
        let trailing = entry.id() == last.id() || entry.ancestors().any(|a| a.id() == last.id());
        if trailing {
            skip.insert(*entry);
        }
    }
}

/// Blocks whose whole text is the file name of an archive entry, and links
/// pointing at one.
fn attachment_names(document: &Html, index: &ResourceIndex, skip: &mut SkipSet) {
    if index.is_empty() {
        return;
    }
    for el in document.select(&NAMED_BLOCK_SEL) {
        let text = element_text(el);
        if text.is_empty() {
            continue;
        }
        if index.has_basename(&text) {
            skip.insert(el);
            continue;
        }
        if el.value().name() == "a" {
            if let Some(href) = el.value().attr("href") {
                let target = href.split(['?', '#']).next().unwrap_or("");
                let base = target.rsplit('/').next().unwrap_or("");
                if !base.is_empty() && index.has_basename(base) {
                    skip.insert(el);
                }
            }
        }
    }
}

/// Trailing blocks that are empty or only list file names.
fn trailing_file_lists(body: ElementRef<'_>, index: &ResourceIndex, skip: &mut SkipSet) {
    for _ in 0..TRAILING_PASSES {
        let Some(last) = child_elements(body, skip).pop() else {
            break;
        };
        let text = element_text(last);
        if text.is_empty() {
            if last.value().name() == "img" || last.select(&IMG_SEL).next().is_some() {
                break;
            }
            skip.insert(last);
            continue;
        }

        let tokens: Vec<&str> = TOKEN_SPLIT_RE
            .split(&text)
            .filter(|t| !t.is_empty())
            .collect();
        let all_files = if index.is_empty() {
            tokens.iter().all(|t| FILENAME_RE.is_match(t))
        } else {
            tokens.iter().all(|t| index.has_basename(t))
        };
        if tokens.is_empty() || !all_files {
            break;
        }
        skip.insert(last);
    }
}

/// Short top-level blocks repeated on many pages, such as a running title.
fn repeated_top_blocks(body: ElementRef<'_>, skip: &mut SkipSet) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for child in child_elements(body, skip)
        .into_iter()
        .take(TOP_BLOCKS_CONSIDERED)
    {
        let text = element_text(child);
        if !text.is_empty() && text.chars().count() <= MAX_SHORT_TEXT_LEN {
            *counts.entry(text).or_default() += 1;
        }
    }

    let repeated: HashSet<String> = counts
        .into_iter()
        .filter(|(_, n)| *n >= MIN_REPEAT)
        .map(|(t, _)| t)
        .collect();
    if repeated.is_empty() {
        return;
    }

    for el in body.descendants().filter_map(ElementRef::wrap) {
        if repeated.contains(&element_text(el)) {
            skip.insert(el);
        }
    }
}

/// First and last short blocks of `page` containers that repeat across pages.
fn page_headers_and_footers(document: &Html, skip: &mut SkipSet) {
    let pages: Vec<ElementRef<'_>> = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| has_class_containing(*el, "page"))
        .collect();
    if pages.len() < MIN_REPEAT {
        return;
    }

    let is_short = |t: &String| !t.is_empty() && t.chars().count() <= MAX_SHORT_TEXT_LEN;
    let mut firsts: HashMap<String, usize> = HashMap::new();
    let mut lasts: HashMap<String, usize> = HashMap::new();
    let mut page_blocks = Vec::with_capacity(pages.len());

    for page in pages {
        let blocks: Vec<(ElementRef<'_>, String)> = page
            .select(&PAGE_BLOCK_SEL)
            .filter(|el| el.id() != page.id())
            .map(|el| (el, element_text(el)))
            .collect();
        if let Some((_, t)) = blocks.iter().find(|(_, t)| is_short(t)) {
            *firsts.entry(t.clone()).or_default() += 1;
        }
        if let Some((_, t)) = blocks.iter().rev().find(|(_, t)| is_short(t)) {
            *lasts.entry(t.clone()).or_default() += 1;
        }
        page_blocks.push(blocks);
    }

    let repeated: HashSet<String> = firsts
        .into_iter()
        .chain(lasts)
        .filter(|(_, n)| *n >= MIN_REPEAT)
        .map(|(t, _)| t)
        .collect();
    if repeated.is_empty() {
        return;
    }
    tracing::debug!(texts = ?repeated, "dropping repeated page headers/footers");

    for (el, text) in page_blocks.into_iter().flatten() {
        if repeated.contains(&text) {
            skip.insert(el);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceArchive, ResourceEntry};

    fn index(names: &[&str]) -> ResourceIndex {
        ResourceIndex::build(ResourceArchive {
            entries: names
                .iter()
                .map(|n| ResourceEntry {
                    name: n.to_string(),
                    bytes: vec![0],
                    content_type: None,
                })
                .collect(),
        })
    }

    fn skipped_texts(html: &str, idx: &ResourceIndex) -> Vec<String> {
        let doc = Html::parse_document(html);
        let skip = non_content(&doc, idx);
        doc.root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| skip.contains(*el))
            .map(element_text)
            .collect()
    }

    #[test]
    fn package_entries_in_a_group_are_dropped() {
        let html = r#"<body><p>Body text.</p>
            <div class="package-entry"><h1>image0.jpg</h1></div>
            <div class="package-entry"><h1>image1.png</h1></div>
            <p>More body text after.</p></body>"#;
        let skipped = skipped_texts(html, &ResourceIndex::default());
        assert!(skipped.contains(&"image0.jpg".to_string()));
        assert!(skipped.contains(&"image1.png".to_string()));
        assert!(!skipped.iter().any(|t| t.contains("Body text")));
    }

    #[test]
    fn lone_package_entry_only_dropped_at_the_end() {
        let middle = r#"<body><div class="package-entry"><h1>a.png</h1></div><p>Text that stays.</p></body>"#;
        assert!(skipped_texts(middle, &ResourceIndex::default()).is_empty());

        let tail = r#"<body><p>Text that stays.</p><div class="package-entry"><h1>a.png</h1></div></body>"#;
        assert_eq!(skipped_texts(tail, &ResourceIndex::default()), vec!["a.png"]);
    }

    #[test]
    fn attachment_names_and_links_are_dropped() {
        let html = r#"<body><p>Intro paragraph.</p><p>image0.jpg</p>
            <p>See <a href="files/image0.jpg?x=1">the picture</a> here.</p>
            <p>Closing words.</p></body>"#;
        let skipped = skipped_texts(html, &index(&["image0.jpg"]));
        assert!(skipped.contains(&"image0.jpg".to_string()));
        assert!(skipped.contains(&"the picture".to_string()));
        assert!(!skipped.iter().any(|t| t.contains("Intro")));
    }

    #[test]
    fn trailing_file_list_is_dropped_but_images_stay() {
        let html = r#"<body><p>Real content here.</p><p><img src="x.png"></p>
            <p>a.png, b.jpg</p><div> </div></body>"#;
        let doc = Html::parse_document(html);
        let skip = non_content(&doc, &index(&["a.png", "b.jpg", "x.png"]));
        let img_para = doc
            .select(&Selector::parse("p").unwrap())
            .nth(1)
            .unwrap();
        assert!(!skip.contains(img_para));
        let list_para = doc.select(&Selector::parse("p").unwrap()).nth(2).unwrap();
        assert!(skip.contains(list_para));
    }

    #[test]
    fn repeated_running_headers_are_dropped() {
        let html = r#"<body><p>ACME Annual Report</p><p>Page one text.</p>
            <p>ACME Annual Report</p><p>Page two text.</p>
            <p>ACME Annual Report</p><p>Page three text.</p></body>"#;
        let skipped = skipped_texts(html, &ResourceIndex::default());
        assert_eq!(skipped.len(), 3);
        assert!(skipped.iter().all(|t| t == "ACME Annual Report"));
    }

    #[test]
    fn page_headers_and_footers_are_dropped() {
        let page = |n: usize| {
            format!(
                r#"<div class="page"><p>Confidential</p><p>Body of page {n} with enough words.</p><p>Footer line</p></div>"#
            )
        };
        let html = format!("<body>{}{}{}</body>", page(1), page(2), page(3));
        let skipped = skipped_texts(&html, &ResourceIndex::default());
        assert_eq!(skipped.iter().filter(|t| *t == "Confidential").count(), 3);
        assert_eq!(skipped.iter().filter(|t| *t == "Footer line").count(), 3);
        assert!(!skipped.iter().any(|t| t.starts_with("Body of page")));
    }

    #[test]
    fn ordinary_documents_are_untouched() {
        let html = "<body><h1>Title</h1><p>One.</p><p>Two.</p></body>";
        assert!(skipped_texts(html, &ResourceIndex::default()).is_empty());
    }
}
