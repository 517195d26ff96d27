//! Chapter extraction: strip boilerplate, normalize whitespace, and reduce
//! the remaining markup to the canonical tag vocabulary.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use super::{boilerplate, strip_string};
use crate::sites::SiteSpec;

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("anchor selector"));

/// Parser-level vocabulary: an `img` still holds its source URL. The
/// pipeline replaces it with fetched media before the record is queued, so
/// the queued model type cannot represent an unfetched image.
#[derive(Debug, Clone, PartialEq)]
pub enum ChapterTag {
    Img { src: String },
    H3(String),
    P(String),
    Ul(Vec<(String, String)>),
}

// Inline markup whose text is already flattened into its block parent, and
// list internals that the `ul` handler re-emits. Skipped without a warning.
const INLINE: &[&str] = &[
    "a", "b", "br", "em", "i", "li", "span", "strong", "u",
];

/// Normalize one chapter page into canonical tags. An element kind outside
/// the vocabulary is logged and skipped; it never aborts extraction.
pub fn extract(html: &str, site: &SiteSpec) -> Result<Vec<ChapterTag>> {
    let doc = Html::parse_document(html);
    let root = doc
        .select(&site.content_selector())
        .next()
        .with_context(|| format!("content root {} not found", site.content_root))?;
    let skip = boilerplate(root, site);
    let part_marker = site.part_marker_re();

    let mut tags = Vec::new();
    for node in root.descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        if el.id() == root.id() || skipped(el, &skip, root) || inside_list(el, root) {
            continue;
        }

        match el.value().name() {
            "img" => match el.value().attr("src") {
                Some(src) if !src.trim().is_empty() => tags.push(ChapterTag::Img {
                    src: src.trim().to_string(),
                }),
                _ => warn!("img without src, skipping"),
            },
            "h1" | "h2" | "h3" => {
                let text = strip_string(&el.text().collect::<String>());
                if !text.is_empty() {
                    tags.push(ChapterTag::H3(text));
                }
            }
            "p" => {
                let text = strip_string(&el.text().collect::<String>());
                if text.is_empty() {
                    continue;
                }
                if part_marker.is_match(&text) {
                    tags.push(ChapterTag::H3(text));
                } else {
                    tags.push(ChapterTag::P(text));
                }
            }
            "ul" => {
                let links = list_links(el);
                if !links.is_empty() {
                    tags.push(ChapterTag::Ul(links));
                }
            }
            name if INLINE.contains(&name) => {}
            name => {
                if has_own_text(el) {
                    warn!(element = name, "unhandled element kind, skipping");
                }
            }
        }
    }
    Ok(tags)
}

fn skipped(el: ElementRef<'_>, skip: &HashSet<NodeId>, root: ElementRef<'_>) -> bool {
    if skip.contains(&el.id()) {
        return true;
    }
    el.ancestors()
        .take_while(|a| a.id() != root.id())
        .any(|a| skip.contains(&a.id()))
}

fn inside_list(el: ElementRef<'_>, root: ElementRef<'_>) -> bool {
    el.ancestors()
        .take_while(|a| a.id() != root.id())
        .any(|a| ElementRef::wrap(a).is_some_and(|e| e.value().name() == "ul"))
}

fn has_own_text(el: ElementRef<'_>) -> bool {
    el.children().any(|c| {
        c.value()
            .as_text()
            .is_some_and(|t| !strip_string(&t.text).is_empty())
    })
}

/// Re-emit only the anchors of a list, stripped of surrounding formatting.
fn list_links(el: ElementRef<'_>) -> Vec<(String, String)> {
    let mut links = Vec::new();
    for a in el.select(&ANCHOR) {
        let name = strip_string(&a.text().collect::<String>());
        match a.value().attr("href") {
            Some(href) if !href.trim().is_empty() => {
                links.push((name, href.trim().to_string()));
            }
            _ => warn!(link = %name, "list anchor without href, skipping"),
        }
    }
    links
}
