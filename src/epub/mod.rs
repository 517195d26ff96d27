//! Book assembly: one `VolumeRecord` in, one EPUB on disk out.
//!
//! The whole archive is built in memory and written with a single
//! filesystem write. The idempotency check that prevents regenerating a
//! volume happens earlier, in the segmentation engine; an existing file at
//! the destination is simply overwritten here.

pub mod writer;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::model::{ChapterRecord, MetadataEntry, TagRecord, VolumeRecord};
use crate::naming;

pub const NAV_STYLE: &str = "nav.css";
pub const CHAPTER_STYLE: &str = "chapter.css";

const NAV_CSS: &str = "nav ol { list-style: none; padding: 0; }\nnav li { margin: 0.4em 0; }\n";
const CHAPTER_CSS: &str =
    "img { max-width: 100%; }\np { margin: 0.2em 0; text-indent: 1.2em; }\nh3 { text-align: center; }\n";

/// Assemble one volume into `out_dir[/series]/<filename>.epub`.
pub fn assemble(volume: &VolumeRecord, out_dir: &Path) -> Result<PathBuf> {
    let filename = volume.archive_filename();
    let package = build_package(volume, &filename);
    let bytes = writer::serialize(&package)?;

    let path = naming::archive_path(out_dir, volume.series.as_deref(), &filename);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

struct Item {
    id: String,
    href: String,
    media_type: String,
    properties: Option<&'static str>,
}

fn build_package(volume: &VolumeRecord, filename: &str) -> writer::Package {
    let mut items: Vec<Item> = Vec::new();
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    // Stylesheets referenced anywhere in the volume, nav.css always.
    let mut styles: Vec<&str> = vec![NAV_STYLE];
    for chapter in &volume.chapters {
        for style in &chapter.stylesheets {
            if !styles.contains(&style.as_str()) {
                styles.push(style);
            }
        }
    }
    for name in styles {
        match style_content(name) {
            Some(css) => {
                items.push(Item {
                    id: format!("style-{}", name.trim_end_matches(".css")),
                    href: name.to_string(),
                    media_type: "text/css".into(),
                    properties: None,
                });
                files.push((name.to_string(), css.as_bytes().to_vec()));
            }
            None => warn!(stylesheet = name, "unknown stylesheet, skipping"),
        }
    }

    // Cover image plus its page.
    let has_cover = volume.cover.is_some();
    if let Some(cover) = &volume.cover {
        let ext = cover.extension.as_deref().unwrap_or("bin");
        let href = format!("cover.{ext}");
        items.push(Item {
            id: "cover-image".into(),
            href: href.clone(),
            media_type: cover
                .media_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".into()),
            properties: Some("cover-image"),
        });
        files.push((href.clone(), cover.content.clone()));

        items.push(Item {
            id: "cover".into(),
            href: "cover.xhtml".into(),
            media_type: "application/xhtml+xml".into(),
            properties: None,
        });
        files.push(("cover.xhtml".into(), render_cover(&volume.title, &href).into_bytes()));
    }

    // Chapters, one physical page each. Media filenames carry the chapter
    // index so names cannot collide across chapters.
    let mut used_stems: HashSet<String> = HashSet::new();
    let mut toc: Vec<(String, String)> = Vec::new();
    let mut chapter_ids: Vec<String> = Vec::new();
    for (n, chapter) in volume.chapters.iter().enumerate() {
        let mut stem = naming::generate_filename(&chapter.name);
        if stem.is_empty() {
            stem = format!("Chapter {n}");
        }
        if !used_stems.insert(stem.clone()) {
            stem = format!("{stem} {n}");
            used_stems.insert(stem.clone());
        }
        let href = format!("{stem}.xhtml");
        let id = format!("chapter-{n}");

        let page = render_chapter(chapter, n, &mut items, &mut files);
        items.push(Item {
            id: id.clone(),
            href: href.clone(),
            media_type: "application/xhtml+xml".into(),
            properties: None,
        });
        files.push((href.clone(), page.into_bytes()));

        toc.push((chapter.name.clone(), href));
        chapter_ids.push(id);
    }

    items.push(Item {
        id: "nav".into(),
        href: "nav.xhtml".into(),
        media_type: "application/xhtml+xml".into(),
        properties: Some("nav"),
    });
    files.push(("nav.xhtml".into(), render_nav(&volume.title, &toc).into_bytes()));

    // Reading order: nav first, then the chapters in sequence; a cover page
    // goes to position zero.
    let mut reading_order: Vec<String> = Vec::with_capacity(chapter_ids.len() + 2);
    reading_order.push("nav".into());
    reading_order.extend(chapter_ids);
    if has_cover {
        reading_order.insert(0, "cover".into());
    }

    let opf = generate_opf(volume, filename, &items, &reading_order);
    files.insert(0, ("content.opf".into(), opf.into_bytes()));

    writer::Package { files }
}

fn style_content(name: &str) -> Option<&'static str> {
    match name {
        NAV_STYLE => Some(NAV_CSS),
        CHAPTER_STYLE => Some(CHAPTER_CSS),
        _ => None,
    }
}

/// Render one chapter page, registering its media as it goes.
fn render_chapter(
    chapter: &ChapterRecord,
    n: usize,
    items: &mut Vec<Item>,
    files: &mut Vec<(String, Vec<u8>)>,
) -> String {
    let mut body = String::new();
    let mut image_n = 0usize;
    for tag in &chapter.tags {
        match tag {
            TagRecord::Img(media) => {
                let ext = media.extension.as_deref().unwrap_or("bin");
                let href = format!("image_{n}_{image_n}.{ext}");
                image_n += 1;
                items.push(Item {
                    id: format!("image-{n}-{}", image_n - 1),
                    href: href.clone(),
                    media_type: media
                        .media_type
                        .clone()
                        .unwrap_or_else(|| "application/octet-stream".into()),
                    properties: None,
                });
                files.push((href.clone(), media.content.clone()));
                body.push_str(&format!("    <img src=\"{}\"/>\n", escape_xml(&href)));
            }
            TagRecord::H3(text) => {
                body.push_str(&format!("    <h3>{}</h3>\n", escape_xml(text)));
            }
            TagRecord::P(text) => {
                body.push_str(&format!("    <p>{}</p>\n", escape_xml(text)));
            }
            TagRecord::Ul(links) => {
                body.push_str("    <ul>\n");
                for (text, href) in links {
                    body.push_str(&format!(
                        "      <li><a href=\"{}\">{}</a></li>\n",
                        escape_xml(href),
                        escape_xml(text)
                    ));
                }
                body.push_str("    </ul>\n");
            }
        }
    }
    render_page(&chapter.name, &chapter.stylesheets, &body)
}

fn render_cover(title: &str, image_href: &str) -> String {
    let body = format!(
        "    <img src=\"{}\" alt=\"{}\"/>\n",
        escape_xml(image_href),
        escape_xml(title)
    );
    render_page(title, &[], &body)
}

fn render_nav(title: &str, toc: &[(String, String)]) -> String {
    let mut body = String::from("    <nav epub:type=\"toc\" id=\"toc\">\n      <ol>\n");
    for (name, href) in toc {
        body.push_str(&format!(
            "        <li><a href=\"{}\">{}</a></li>\n",
            escape_xml(href),
            escape_xml(name)
        ));
    }
    body.push_str("      </ol>\n    </nav>\n");
    render_page(title, &[NAV_STYLE.to_string()], &body)
}

fn render_page(title: &str, stylesheets: &[String], body: &str) -> String {
    let mut head = format!("    <title>{}</title>\n", escape_xml(title));
    for style in stylesheets {
        head.push_str(&format!(
            "    <link rel=\"stylesheet\" type=\"text/css\" href=\"{}\"/>\n",
            escape_xml(style)
        ));
    }
    let mut page = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n  <head>\n",
    );
    page.push_str(&head);
    page.push_str("  </head>\n  <body>\n");
    page.push_str(body);
    page.push_str("  </body>\n</html>\n");
    page
}

fn generate_opf(
    volume: &VolumeRecord,
    filename: &str,
    items: &[Item],
    reading_order: &[String],
) -> String {
    let identifier = match &volume.series {
        Some(series) => format!("urn:novel2epub:{series}:{filename}"),
        None => format!("urn:novel2epub:{filename}"),
    };

    let mut opf = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\" unique-identifier=\"BookId\">\n  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n",
    );
    opf.push_str(&format!(
        "    <dc:identifier id=\"BookId\">{}</dc:identifier>\n",
        escape_xml(&identifier)
    ));
    opf.push_str(&format!("    <dc:title>{}</dc:title>\n", escape_xml(&volume.title)));
    opf.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        escape_xml(&volume.language)
    ));
    if let Some(author) = &volume.author {
        opf.push_str(&format!("    <dc:creator>{}</dc:creator>\n", escape_xml(author)));
    }
    opf.push_str("    <meta property=\"dcterms:modified\">2026-01-01T00:00:00Z</meta>\n");
    if let Some(series) = &volume.series {
        opf.push_str(&format!(
            "    <meta name=\"calibre:series\" content=\"{}\"/>\n",
            escape_xml(series)
        ));
    }
    if volume.cover.is_some() {
        opf.push_str("    <meta name=\"cover\" content=\"cover-image\"/>\n");
    }
    for entry in &volume.metadata {
        opf.push_str(&render_metadata_entry(entry));
    }
    opf.push_str("  </metadata>\n");

    opf.push_str("  <manifest>\n");
    for item in items {
        match item.properties {
            Some(properties) => opf.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\" properties=\"{}\"/>\n",
                escape_xml(&item.id),
                escape_xml(&item.href),
                escape_xml(&item.media_type),
                properties
            )),
            None => opf.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
                escape_xml(&item.id),
                escape_xml(&item.href),
                escape_xml(&item.media_type)
            )),
        }
    }
    opf.push_str("  </manifest>\n");

    opf.push_str(&format!(
        "  <spine page-progression-direction=\"{}\">\n",
        volume.direction.as_str()
    ));
    for id in reading_order {
        opf.push_str(&format!("    <itemref idref=\"{}\"/>\n", escape_xml(id)));
    }
    opf.push_str("  </spine>\n</package>\n");
    opf
}

fn render_metadata_entry(entry: &MetadataEntry) -> String {
    let name = match &entry.namespace {
        Some(ns) => format!("{}:{}", ns.to_lowercase(), entry.name),
        None => entry.name.clone(),
    };
    let attrs: String = entry
        .attrs
        .iter()
        .map(|(k, v)| format!(" {}=\"{}\"", k, escape_xml(v)))
        .collect();
    if entry.value.is_empty() {
        format!("    <{name}{attrs}/>\n")
    } else {
        format!("    <{name}{attrs}>{}</{name}>\n", escape_xml(&entry.value))
    }
}

/// Escape XML special characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::model::{ChapterRecord, Direction, MediaRecord, TagRecord, VolumeRecord};

    fn sample_volume() -> VolumeRecord {
        VolumeRecord {
            title: "Volume 1".into(),
            author: Some("Author Name".into()),
            series: Some("My Series".into()),
            language: "pt-BR".into(),
            direction: Direction::Rtl,
            cover: Some(MediaRecord::new(
                vec![0xff, 0xd8],
                Some("cover".into()),
                Some("image/jpeg".into()),
                None,
            )),
            chapters: vec![
                ChapterRecord {
                    name: "Prólogo".into(),
                    tags: vec![
                        TagRecord::H3("PARTE 1".into()),
                        TagRecord::P("Some prose & more.".into()),
                        TagRecord::Img(MediaRecord::new(
                            vec![1, 2, 3],
                            None,
                            Some("image/png".into()),
                            None,
                        )),
                    ],
                    stylesheets: vec![CHAPTER_STYLE.to_string()],
                },
                ChapterRecord {
                    name: "Capítulo 1".into(),
                    tags: vec![TagRecord::Img(MediaRecord::new(
                        vec![4, 5],
                        None,
                        Some("image/png".into()),
                        None,
                    ))],
                    stylesheets: vec![CHAPTER_STYLE.to_string()],
                },
            ],
            metadata: vec![MetadataEntry {
                namespace: None,
                name: "meta".into(),
                value: String::new(),
                attrs: vec![
                    ("name".into(), "custom:flag".into()),
                    ("content".into(), "yes".into()),
                ],
            }],
            filename: None,
        }
    }

    fn read_entry(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
        let mut out = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn writes_archive_under_series_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = assemble(&sample_volume(), dir.path()).unwrap();
        assert_eq!(path, dir.path().join("My Series/Volume 1.epub"));
        assert!(path.is_file());
    }

    #[test]
    fn opf_carries_metadata_direction_and_series() {
        let volume = sample_volume();
        let package = build_package(&volume, "Volume 1");
        let opf = String::from_utf8(package.files[0].1.clone()).unwrap();
        assert!(opf.contains("<dc:title>Volume 1</dc:title>"));
        assert!(opf.contains("<dc:language>pt-BR</dc:language>"));
        assert!(opf.contains("<dc:creator>Author Name</dc:creator>"));
        assert!(opf.contains("page-progression-direction=\"rtl\""));
        assert!(opf.contains("<meta name=\"calibre:series\" content=\"My Series\"/>"));
        assert!(opf.contains("<meta name=\"custom:flag\" content=\"yes\"/>"));
    }

    #[test]
    fn reading_order_is_cover_nav_then_chapters() {
        let volume = sample_volume();
        let package = build_package(&volume, "Volume 1");
        let opf = String::from_utf8(package.files[0].1.clone()).unwrap();
        let spine_at = |id: &str| {
            opf.find(&format!("<itemref idref=\"{id}\"/>"))
                .unwrap_or_else(|| panic!("{id} not in spine"))
        };
        assert!(spine_at("cover") < spine_at("nav"));
        assert!(spine_at("nav") < spine_at("chapter-0"));
        assert!(spine_at("chapter-0") < spine_at("chapter-1"));
    }

    #[test]
    fn no_cover_means_nav_first() {
        let mut volume = sample_volume();
        volume.cover = None;
        let package = build_package(&volume, "Volume 1");
        let opf = String::from_utf8(package.files[0].1.clone()).unwrap();
        assert!(!opf.contains("idref=\"cover\""));
        let nav = opf.find("<itemref idref=\"nav\"/>").unwrap();
        let first = opf.find("<itemref").unwrap();
        assert_eq!(nav, first);
    }

    #[test]
    fn media_names_namespaced_by_chapter() {
        let volume = sample_volume();
        let package = build_package(&volume, "Volume 1");
        let names: Vec<&str> = package.files.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"image_0_0.png"));
        assert!(names.contains(&"image_1_0.png"));
    }

    #[test]
    fn chapter_page_escapes_text() {
        let volume = sample_volume();
        let bytes = writer::serialize(&build_package(&volume, "Volume 1")).unwrap();
        let page = read_entry(&bytes, "OEBPS/Prologo.xhtml");
        assert!(page.contains("<p>Some prose &amp; more.</p>"));
        assert!(page.contains("<h3>PARTE 1</h3>"));
        assert!(page.contains("chapter.css"));
    }

    #[test]
    fn nav_lists_chapters_in_order() {
        let volume = sample_volume();
        let bytes = writer::serialize(&build_package(&volume, "Volume 1")).unwrap();
        let nav = read_entry(&bytes, "OEBPS/nav.xhtml");
        let first = nav.find("Prólogo").unwrap();
        let second = nav.find("Capítulo 1").unwrap();
        assert!(first < second);
    }

    #[test]
    fn existing_archive_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let volume = sample_volume();
        let path = naming::archive_path(dir.path(), Some("My Series"), "Volume 1");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"stale").unwrap();

        let written = assemble(&volume, dir.path()).unwrap();
        assert_eq!(written, path);
        assert!(fs::metadata(&path).unwrap().len() > 5);
    }

    #[test]
    fn unwritable_destination_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        // Occupy the series directory slot with a plain file.
        fs::write(dir.path().join("My Series"), b"not a dir").unwrap();
        let err = assemble(&sample_volume(), dir.path());
        assert!(err.is_err());
        assert!(!dir.path().join("My Series/Volume 1.epub").exists());
    }
}
