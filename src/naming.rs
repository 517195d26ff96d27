//! Deterministic archive naming, shared by the idempotency check and the
//! book assembler. Both sides must agree bit-for-bit: the segmentation
//! engine skips a volume exactly when the file this module would name
//! already exists on disk.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use deunicode::deunicode;
use regex::Regex;

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("filename regex"));

/// Normalize a volume or chapter title into a filename stem: strip
/// diacritics, collapse every non-alphanumeric run to a single space,
/// title-case the words.
///
/// Distinct titles can normalize identically; the first volume to claim a
/// name wins and later ones are skipped by the idempotency check.
pub fn generate_filename(title: &str) -> String {
    let ascii = deunicode(title);
    let spaced = NON_ALNUM.replace_all(&ascii, " ");
    spaced
        .split_whitespace()
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Destination path for a volume archive: `out_dir[/series]/filename.epub`.
pub fn archive_path(out_dir: &Path, series: Option<&str>, filename: &str) -> PathBuf {
    let mut path = out_dir.to_path_buf();
    if let Some(series) = series {
        path.push(series);
    }
    path.push(format!("{filename}.epub"));
    path
}

/// Answers "is this volume already fully assembled?" for the segmentation
/// engine's idempotency skip.
pub trait BuiltIndex {
    fn exists(&self, filename: &str, series: Option<&str>) -> bool;
}

/// Filesystem-backed index over the output directory.
pub struct FsIndex {
    out_dir: PathBuf,
}

impl FsIndex {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }
}

impl BuiltIndex for FsIndex {
    fn exists(&self, filename: &str, series: Option<&str>) -> bool {
        archive_path(&self.out_dir, series, filename).is_file()
    }
}

/// Index that reports nothing built; used by dry runs.
pub struct NullIndex;

impl BuiltIndex for NullIndex {
    fn exists(&self, _filename: &str, _series: Option<&str>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_title() {
        assert_eq!(generate_filename("Volume 1"), "Volume 1");
    }

    #[test]
    fn diacritics_stripped() {
        assert_eq!(generate_filename("Edição Especial"), "Edicao Especial");
    }

    #[test]
    fn punctuation_collapses_to_spaces() {
        assert_eq!(generate_filename("volume 2 — o retorno!"), "Volume 2 O Retorno");
    }

    #[test]
    fn case_normalized() {
        assert_eq!(generate_filename("VOLUME 03"), "Volume 03");
    }

    #[test]
    fn empty_title() {
        assert_eq!(generate_filename("..."), "");
    }

    #[test]
    fn path_includes_series_subdirectory() {
        let p = archive_path(Path::new("ebooks"), Some("My Series"), "Volume 1");
        assert_eq!(p, PathBuf::from("ebooks/My Series/Volume 1.epub"));
    }

    #[test]
    fn path_without_series() {
        let p = archive_path(Path::new("ebooks"), None, "Volume 1");
        assert_eq!(p, PathBuf::from("ebooks/Volume 1.epub"));
    }

    #[test]
    fn fs_index_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let index = FsIndex::new(dir.path().to_path_buf());
        assert!(!index.exists("Volume 1", Some("Series")));

        let path = archive_path(dir.path(), Some("Series"), "Volume 1");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"zip").unwrap();
        assert!(index.exists("Volume 1", Some("Series")));
        assert!(!index.exists("Volume 2", Some("Series")));
    }
}
