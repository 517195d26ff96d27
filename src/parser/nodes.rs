//! Volumes-page flattening: classify the strict top-level children of the
//! content root, in document order, into an immutable node list the
//! segmentation engine walks with a cursor.

use std::collections::HashSet;
use std::sync::LazyLock;

use ego_tree::NodeId;
use scraper::{ElementRef, Selector};
use tracing::warn;

use super::strip_string;

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("anchor selector"));

/// One top-level sibling of the content root, reduced to its segmentation
/// role.
#[derive(Debug, Clone, PartialEq)]
pub enum PageNode {
    /// Candidate cover image.
    Image { src: String },
    /// h1-h3; the series title or a volume title.
    Heading { text: String },
    /// span/strong/p without links; a volume title candidate.
    Title { text: String },
    /// ul/p containing anchors: a chapter-link container. `links` holds the
    /// usable (name, href) pairs; `text` is kept so an all-text container
    /// with no usable links still counts as non-empty.
    Links { links: Vec<(String, String)>, text: String },
    /// Anything else; never matches a role.
    Other,
}

/// Classify the content root's direct children. Children inside `skip` are
/// dropped entirely.
pub fn flatten(root: ElementRef<'_>, skip: &HashSet<NodeId>) -> Vec<PageNode> {
    let mut nodes = Vec::new();
    for child in root.children() {
        let Some(el) = ElementRef::wrap(child) else {
            continue;
        };
        if skip.contains(&el.id()) {
            continue;
        }
        nodes.push(classify(el));
    }
    nodes
}

fn classify(el: ElementRef<'_>) -> PageNode {
    let name = el.value().name();
    match name {
        "img" => match el.value().attr("src") {
            Some(src) if !src.trim().is_empty() => PageNode::Image {
                src: src.trim().to_string(),
            },
            _ => PageNode::Other,
        },
        "h1" | "h2" | "h3" => {
            let text = strip_string(&el.text().collect::<String>());
            if text.is_empty() {
                PageNode::Other
            } else {
                PageNode::Heading { text }
            }
        }
        "ul" | "p" | "span" | "strong" => {
            let (links, had_anchor) = anchor_links(el);
            let text = strip_string(&el.text().collect::<String>());
            if had_anchor {
                PageNode::Links { links, text }
            } else if name != "ul" && !text.is_empty() {
                PageNode::Title { text }
            } else {
                PageNode::Other
            }
        }
        _ => PageNode::Other,
    }
}

/// Anchors under `el` as (name, href) pairs, document order. An anchor
/// without an href is a failure for that one chapter only.
fn anchor_links(el: ElementRef<'_>) -> (Vec<(String, String)>, bool) {
    let mut links = Vec::new();
    let mut had_anchor = false;
    for a in el.select(&ANCHOR) {
        had_anchor = true;
        let name = strip_string(&a.text().collect::<String>());
        match a.value().attr("href") {
            Some(href) if !href.trim().is_empty() => {
                links.push((name, href.trim().to_string()));
            }
            _ => warn!(chapter = %name, "chapter link without href, skipping"),
        }
    }
    (links, had_anchor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn flatten_body(body: &str) -> Vec<PageNode> {
        let html = format!("<html><body><div id=\"c\">{body}</div></body></html>");
        let doc = Html::parse_document(&html);
        let sel = Selector::parse("#c").unwrap();
        let root = doc.select(&sel).next().unwrap();
        flatten(root, &HashSet::new())
    }

    #[test]
    fn roles_in_document_order() {
        let nodes = flatten_body(
            "<h3>Series</h3>\
             <img src=\"http://x/c.png\">\
             <strong>Volume 1</strong>\
             <ul><li><a href=\"http://x/1\">Ch 1</a></li></ul>",
        );
        assert_eq!(
            nodes,
            vec![
                PageNode::Heading { text: "Series".into() },
                PageNode::Image { src: "http://x/c.png".into() },
                PageNode::Title { text: "Volume 1".into() },
                PageNode::Links {
                    links: vec![("Ch 1".into(), "http://x/1".into())],
                    text: "Ch 1".into(),
                },
            ]
        );
    }

    #[test]
    fn paragraph_with_anchor_is_a_link_container() {
        let nodes = flatten_body("<p><a href=\"http://x/1\">Ch 1</a></p>");
        assert!(matches!(&nodes[0], PageNode::Links { links, .. } if links.len() == 1));
    }

    #[test]
    fn anchor_without_href_is_dropped_not_fatal() {
        let nodes = flatten_body("<ul><li><a>Ch 1</a></li><li><a href=\"http://x/2\">Ch 2</a></li></ul>");
        match &nodes[0] {
            PageNode::Links { links, .. } => {
                assert_eq!(links.len(), 1);
                assert_eq!(links[0].0, "Ch 2");
            }
            other => panic!("expected Links, got {other:?}"),
        }
    }

    #[test]
    fn empty_paragraph_is_other() {
        let nodes = flatten_body("<p>\u{a0}\n</p><div>junk</div>");
        assert_eq!(nodes, vec![PageNode::Other, PageNode::Other]);
    }

    #[test]
    fn image_without_src_is_other() {
        let nodes = flatten_body("<img>");
        assert_eq!(nodes, vec![PageNode::Other]);
    }
}
