use crate::naming;

/// Reading direction of an assembled book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ltr,
    Rtl,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Ltr => "ltr",
            Direction::Rtl => "rtl",
        }
    }
}

/// One chapter link read off the volumes page.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterRef {
    pub name: String,
    pub url: String,
}

/// One volume carved off the front of the volumes page. Transient: produced
/// and consumed within a single segmentation step.
#[derive(Debug, Clone, PartialEq)]
pub struct RawVolumeBlock {
    pub cover_url: Option<String>,
    pub title: String,
    pub series: Option<String>,
    pub author: Option<String>,
    pub chapter_refs: Vec<ChapterRef>,
}

/// A fetched binary asset plus whatever naming/type information is known.
///
/// The constructor derives the missing fields from the supplied ones.
/// When supplied values disagree, `media_type` wins over `extension` wins
/// over the filename's extension (applied lowest-precedence first, so the
/// strongest source writes last).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaRecord {
    pub content: Vec<u8>,
    pub filename: Option<String>,
    pub media_type: Option<String>,
    pub extension: Option<String>,
}

impl MediaRecord {
    pub fn new(
        content: Vec<u8>,
        filename: Option<String>,
        media_type: Option<String>,
        extension: Option<String>,
    ) -> Self {
        let mut record = MediaRecord {
            content,
            filename,
            media_type: None,
            extension: None,
        };
        if let Some(name) = record.filename.clone() {
            record.apply_filename(&name);
        }
        if let Some(ext) = extension {
            record.apply_extension(ext.trim_start_matches('.'));
        }
        if let Some(mt) = media_type {
            // HTTP content types may carry parameters ("image/png; charset=...")
            let essence = mt.split(';').next().unwrap_or(&mt).trim().to_string();
            record.apply_media_type(&essence);
        }
        record
    }

    fn apply_media_type(&mut self, media_type: &str) {
        self.media_type = Some(media_type.to_string());
        if let Some(ext) = extension_for(media_type) {
            self.set_extension(&ext);
        }
    }

    fn apply_extension(&mut self, ext: &str) {
        self.media_type = mime_guess::from_ext(ext)
            .first()
            .map(|m| m.essence_str().to_string());
        self.set_extension(ext);
    }

    fn apply_filename(&mut self, filename: &str) {
        if let Some(ext) = filename.rsplit_once('.').map(|(_, e)| e.to_string()) {
            if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                self.apply_extension(&ext.to_ascii_lowercase());
            }
        }
    }

    /// Record the extension and rewrite the filename's suffix to match.
    fn set_extension(&mut self, ext: &str) {
        self.extension = Some(ext.to_string());
        if let Some(name) = self.filename.take() {
            let stem = match name.rsplit_once('.') {
                Some((stem, old))
                    if !stem.is_empty() && old.chars().all(|c| c.is_ascii_alphanumeric()) =>
                {
                    stem.to_string()
                }
                _ => name.clone(),
            };
            self.filename = Some(format!("{stem}.{ext}"));
        }
    }
}

/// Preferred reverse mapping for media types whose canonical extension list
/// leads with an uncommon spelling (e.g. "jpe" for image/jpeg).
fn extension_for(media_type: &str) -> Option<String> {
    const PREFERRED: &[(&str, &str)] = &[
        ("image/jpeg", "jpg"),
        ("image/svg+xml", "svg"),
        ("application/xhtml+xml", "xhtml"),
        ("text/plain", "txt"),
    ];
    if let Some((_, ext)) = PREFERRED.iter().find(|(mt, _)| *mt == media_type) {
        return Some((*ext).to_string());
    }
    mime_guess::get_mime_extensions_str(media_type)
        .and_then(|exts| exts.first())
        .map(|ext| ext.to_string())
}

/// Canonical tag vocabulary every chapter is normalized into. By
/// construction an `Img` carries only media, a `Ul` only links, and
/// `H3`/`P` only text.
#[derive(Debug, Clone, PartialEq)]
pub enum TagRecord {
    Img(MediaRecord),
    H3(String),
    P(String),
    Ul(Vec<(String, String)>),
}

/// One normalized chapter. Owned by its parent volume, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterRecord {
    pub name: String,
    pub tags: Vec<TagRecord>,
    pub stylesheets: Vec<String>,
}

/// Extra package metadata carried through to the archive writer.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
    pub attrs: Vec<(String, String)>,
}

/// Everything the book assembler needs for one archive. Created once per
/// segmentation step, never mutated after being queued, consumed exactly
/// once by the assembler.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeRecord {
    pub title: String,
    pub author: Option<String>,
    pub series: Option<String>,
    pub language: String,
    pub direction: Direction,
    pub cover: Option<MediaRecord>,
    pub chapters: Vec<ChapterRecord>,
    pub metadata: Vec<MetadataEntry>,
    /// Explicit output name; derived from the title when absent.
    pub filename: Option<String>,
}

impl VolumeRecord {
    pub fn archive_filename(&self) -> String {
        self.filename
            .clone()
            .unwrap_or_else(|| naming::generate_filename(&self.title))
    }
}
