//! Segmentation engine: repeatedly carve one volume block off the front of
//! the flattened sibling stream.
//!
//! Instead of detaching matched elements from a shared tree, the engine
//! keeps a cursor into the immutable node list and advances it past the
//! furthest matched element, so each call sees only the remainder. The
//! cursor only moves forward.

use tracing::debug;

use super::nodes::PageNode;
use crate::model::{ChapterRef, RawVolumeBlock};
use crate::naming::{self, BuiltIndex};

pub struct Segmenter<'a> {
    nodes: Vec<PageNode>,
    pos: usize,
    series: Option<String>,
    series_scanned: bool,
    index: &'a dyn BuiltIndex,
}

impl<'a> Segmenter<'a> {
    pub fn new(nodes: Vec<PageNode>, index: &'a dyn BuiltIndex) -> Self {
        Self {
            nodes,
            pos: 0,
            series: None,
            series_scanned: false,
            index,
        }
    }

    pub fn series(&self) -> Option<&str> {
        self.series.as_deref()
    }

    /// Carve the next volume block, silently discarding any whose archive
    /// already exists. Returns None once the remaining stream holds no
    /// complete block.
    pub fn next_block(&mut self) -> Option<RawVolumeBlock> {
        self.capture_series();

        loop {
            let rest = &self.nodes[self.pos..];

            let (links_at, links, container_text) =
                rest.iter().enumerate().find_map(|(i, n)| match n {
                    PageNode::Links { links, text } => Some((i, links, text)),
                    _ => None,
                })?;
            let (title_at, title) = rest.iter().enumerate().find_map(|(i, n)| match n {
                PageNode::Heading { text } | PageNode::Title { text } => Some((i, text)),
                _ => None,
            })?;
            // The cover must precede the chapter container; an image after it
            // belongs to the next block.
            let cover = rest[..links_at].iter().enumerate().find_map(|(i, n)| match n {
                PageNode::Image { src } => Some((i, src)),
                _ => None,
            });

            if links.is_empty() && container_text.is_empty() {
                // Nothing usable in this container; rescan past it.
                self.pos += links_at + 1;
                continue;
            }

            let end = links_at.max(title_at).max(cover.map_or(0, |(i, _)| i)) + 1;
            let title = title.clone();
            let cover_url = cover.map(|(_, src)| src.clone());
            let chapter_refs: Vec<ChapterRef> = links
                .iter()
                .cloned()
                .map(|(name, url)| ChapterRef { name, url })
                .collect();
            self.pos += end;

            let filename = naming::generate_filename(&title);
            if self.index.exists(&filename, self.series.as_deref()) {
                debug!(volume = %title, "archive already built, skipping block");
                continue;
            }

            return Some(RawVolumeBlock {
                cover_url,
                title,
                series: self.series.clone(),
                author: None,
                chapter_refs,
            });
        }
    }

    /// The first heading ahead of any cover or chapter list names the
    /// series; it is captured once and attached to every block.
    fn capture_series(&mut self) {
        if self.series_scanned {
            return;
        }
        self.series_scanned = true;

        let rest = &self.nodes[self.pos..];
        let stop = rest
            .iter()
            .position(|n| matches!(n, PageNode::Image { .. } | PageNode::Links { .. }))
            .unwrap_or(rest.len());
        let found = rest[..stop].iter().enumerate().find_map(|(i, n)| match n {
            PageNode::Heading { text } => Some((i, text.clone())),
            _ => None,
        });
        if let Some((i, text)) = found {
            self.series = Some(text);
            self.pos += i + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::naming::NullIndex;

    /// In-memory already-built predicate.
    struct MapIndex(HashSet<(String, Option<String>)>);

    impl MapIndex {
        fn of(entries: &[(&str, Option<&str>)]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|(f, s)| (f.to_string(), s.map(str::to_string)))
                    .collect(),
            )
        }
    }

    impl BuiltIndex for MapIndex {
        fn exists(&self, filename: &str, series: Option<&str>) -> bool {
            self.0
                .contains(&(filename.to_string(), series.map(str::to_string)))
        }
    }

    fn heading(text: &str) -> PageNode {
        PageNode::Heading { text: text.into() }
    }

    fn title(text: &str) -> PageNode {
        PageNode::Title { text: text.into() }
    }

    fn image(src: &str) -> PageNode {
        PageNode::Image { src: src.into() }
    }

    fn links(pairs: &[(&str, &str)]) -> PageNode {
        PageNode::Links {
            links: pairs
                .iter()
                .map(|(n, u)| (n.to_string(), u.to_string()))
                .collect(),
            text: pairs.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(" "),
        }
    }

    fn page(volumes: usize) -> Vec<PageNode> {
        let mut nodes = vec![heading("My Series")];
        for i in 1..=volumes {
            nodes.push(image(&format!("http://x/cover{i}.png")));
            nodes.push(title(&format!("Volume {i}")));
            nodes.push(links(&[(
                &format!("Chapter {i}.1"),
                &format!("http://x/ch{i}-1"),
            )]));
        }
        nodes
    }

    #[test]
    fn emits_every_block_in_document_order_then_none() {
        let mut seg = Segmenter::new(page(3), &NullIndex);
        let titles: Vec<String> = std::iter::from_fn(|| seg.next_block())
            .map(|b| b.title)
            .collect();
        assert_eq!(titles, vec!["Volume 1", "Volume 2", "Volume 3"]);
        assert_eq!(seg.next_block(), None);
    }

    #[test]
    fn series_attached_to_every_block() {
        let mut seg = Segmenter::new(page(2), &NullIndex);
        while let Some(block) = seg.next_block() {
            assert_eq!(block.series.as_deref(), Some("My Series"));
        }
        assert_eq!(seg.series(), Some("My Series"));
    }

    #[test]
    fn cover_is_optional() {
        let nodes = vec![
            title("Volume 1"),
            links(&[("Ch 1", "http://x/1")]),
        ];
        let mut seg = Segmenter::new(nodes, &NullIndex);
        let block = seg.next_block().unwrap();
        assert_eq!(block.cover_url, None);
        assert_eq!(block.title, "Volume 1");
        assert_eq!(seg.next_block(), None);
    }

    #[test]
    fn cover_must_precede_chapter_container() {
        let nodes = vec![
            title("Volume 1"),
            links(&[("Ch 1", "http://x/1")]),
            image("http://x/next-cover.png"),
            title("Volume 2"),
            links(&[("Ch 2", "http://x/2")]),
        ];
        let mut seg = Segmenter::new(nodes, &NullIndex);
        let first = seg.next_block().unwrap();
        assert_eq!(first.cover_url, None);
        let second = seg.next_block().unwrap();
        assert_eq!(second.cover_url.as_deref(), Some("http://x/next-cover.png"));
    }

    #[test]
    fn already_built_volume_is_skipped_and_rest_emitted() {
        let index = MapIndex::of(&[("Volume 2", Some("My Series"))]);
        let mut seg = Segmenter::new(page(3), &index);
        let titles: Vec<String> = std::iter::from_fn(|| seg.next_block())
            .map(|b| b.title)
            .collect();
        assert_eq!(titles, vec!["Volume 1", "Volume 3"]);
    }

    #[test]
    fn all_built_yields_nothing() {
        let index = MapIndex::of(&[
            ("Volume 1", Some("My Series")),
            ("Volume 2", Some("My Series")),
        ]);
        let mut seg = Segmenter::new(page(2), &index);
        assert_eq!(seg.next_block(), None);
    }

    #[test]
    fn chapter_links_keep_document_order() {
        let nodes = vec![
            title("Volume 1"),
            links(&[("Ch 1", "http://x/1"), ("Ch 2", "http://x/2"), ("Ch 3", "http://x/3")]),
        ];
        let mut seg = Segmenter::new(nodes, &NullIndex);
        let block = seg.next_block().unwrap();
        let names: Vec<&str> = block.chapter_refs.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Ch 1", "Ch 2", "Ch 3"]);
    }

    #[test]
    fn container_with_text_but_no_links_is_a_valid_empty_volume() {
        let nodes = vec![
            title("Volume 1"),
            PageNode::Links {
                links: Vec::new(),
                text: "coming soon".into(),
            },
        ];
        let mut seg = Segmenter::new(nodes, &NullIndex);
        let block = seg.next_block().unwrap();
        assert!(block.chapter_refs.is_empty());
        assert_eq!(seg.next_block(), None);
    }

    #[test]
    fn empty_container_is_no_match() {
        let nodes = vec![
            title("Volume 1"),
            PageNode::Links {
                links: Vec::new(),
                text: String::new(),
            },
        ];
        let mut seg = Segmenter::new(nodes, &NullIndex);
        assert_eq!(seg.next_block(), None);
    }

    #[test]
    fn missing_title_exhausts_stream() {
        let nodes = vec![image("http://x/c.png"), links(&[("Ch 1", "http://x/1")])];
        // A lone image/list pair without any title candidate is not a block.
        let mut seg = Segmenter::new(nodes, &NullIndex);
        assert_eq!(seg.next_block(), None);
    }
}
