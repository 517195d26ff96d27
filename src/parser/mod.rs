//! Page parsing: flattening the volumes page into a sibling stream, carving
//! that stream into volume blocks, and normalizing chapter markup into the
//! canonical tag vocabulary.

pub mod chapter;
pub mod nodes;
pub mod segment;

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use ego_tree::NodeId;
use scraper::{ElementRef, Html};

use crate::sites::SiteSpec;
use nodes::PageNode;

static WS_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\u{A0}\s]+").expect("whitespace regex"));

/// Collapse whitespace and non-breaking-space runs to single spaces, then
/// trim. Callers drop elements whose text reduces to the empty string.
pub(crate) fn strip_string(text: &str) -> String {
    WS_RUNS.replace_all(text, " ").trim().to_string()
}

/// Flatten the volumes page into the node stream the segmentation engine
/// walks. Boilerplate is stripped first, exactly as for chapter pages.
pub fn page_nodes(html: &str, site: &SiteSpec) -> Result<Vec<PageNode>> {
    let doc = Html::parse_document(html);
    let root = doc
        .select(&site.content_selector())
        .next()
        .with_context(|| format!("content root {} not found", site.content_root))?;
    let skip = boilerplate(root, site);
    Ok(nodes::flatten(root, &skip))
}

/// Node ids of boilerplate subtrees under `root`, selected structurally:
/// unconditional junk, the promotional marker and everything after it, and
/// all siblings trailing the last top-level link list.
pub(crate) fn boilerplate(root: ElementRef<'_>, site: &SiteSpec) -> HashSet<NodeId> {
    let mut skip = HashSet::new();

    for el in root.select(&site.junk_selector()) {
        skip.insert(el.id());
    }

    for el in root.select(&site.promo_selector()) {
        skip.insert(el.id());
        for sib in el.next_siblings() {
            skip.insert(sib.id());
        }
    }

    let mut last_list = None;
    for child in root.children() {
        if let Some(el) = ElementRef::wrap(child) {
            if el.value().name() == "ul" && !skip.contains(&el.id()) {
                last_list = Some(child);
            }
        }
    }
    if let Some(node) = last_list {
        for sib in node.next_siblings() {
            skip.insert(sib.id());
        }
    }

    skip
}
