//! Container serialization: the book-writer capability. The package is
//! zipped into an in-memory buffer; the caller does the single write to
//! disk, so a failed volume never leaves a partial file behind.

use std::io::{Cursor, Write};

use anyhow::{Context, Result};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Files of one archive, paths relative to the OEBPS root.
pub struct Package {
    pub files: Vec<(String, Vec<u8>)>,
}

const CONTAINER_XML: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

pub fn serialize(package: &Package) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    // The mimetype entry must come first and stay uncompressed.
    zip.start_file("mimetype", stored)?;
    zip.write_all(b"application/epub+zip")?;

    zip.start_file("META-INF/container.xml", deflated)?;
    zip.write_all(CONTAINER_XML)?;

    for (path, bytes) in &package.files {
        zip.start_file(format!("OEBPS/{path}"), deflated)?;
        zip.write_all(bytes)?;
    }

    let cursor = zip.finish().context("finish container")?;
    Ok(cursor.into_inner())
}
