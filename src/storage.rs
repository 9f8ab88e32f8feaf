//! On-disk layout of the repository base directory.
//!
//! Layout is deterministic and keyed by
//! `(source_system, lccn, issue_date, sequence)`:
//!
//! ```text
//! <base>/originals/<source>/<yyyy>/<mm>/<lccn>_<yyyy-mm-dd>_<nnnn>.<ext>
//! <base>/ocr/text/<source>/<yyyy>/<lccn>_<yyyy-mm-dd>_<nnnn>.txt
//! <base>/ocr/hocr/<source>/<yyyy>/<lccn>_<yyyy-mm-dd>_<nnnn>.hocr
//! <base>/segments/<source>/<yyyy>/<segment_id>.{jpg,txt}
//! ```
//!
//! When a directory reaches [`SHARD_THRESHOLD`] entries, new files get a
//! two-character hash shard interposed before the filename. The index stores
//! the concrete path of every file, so reads never recompute shard decisions.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// Maximum entries in one directory before sharding kicks in.
pub const SHARD_THRESHOLD: usize = 10_000;

/// Path helpers for the repository base directory.
#[derive(Debug, Clone)]
pub struct RepositoryLayout {
    base: PathBuf,
}

impl RepositoryLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Canonical page filename: `<lccn>_<yyyy-mm-dd>_<nnnn>.<ext>`.
    pub fn page_filename(lccn: &str, issue_date: NaiveDate, sequence: u32, ext: &str) -> String {
        format!("{}_{}_{:04}.{}", lccn, issue_date.format("%Y-%m-%d"), sequence, ext)
    }

    /// Directory for original page images of one publication month.
    pub fn originals_dir(&self, source: &str, issue_date: NaiveDate) -> PathBuf {
        self.base
            .join("originals")
            .join(source)
            .join(issue_date.format("%Y").to_string())
            .join(issue_date.format("%m").to_string())
    }

    pub fn ocr_text_dir(&self, source: &str, issue_date: NaiveDate) -> PathBuf {
        self.base
            .join("ocr")
            .join("text")
            .join(source)
            .join(issue_date.format("%Y").to_string())
    }

    pub fn hocr_dir(&self, source: &str, issue_date: NaiveDate) -> PathBuf {
        self.base
            .join("ocr")
            .join("hocr")
            .join(source)
            .join(issue_date.format("%Y").to_string())
    }

    pub fn segments_dir(&self, source: &str, issue_date: NaiveDate) -> PathBuf {
        self.base
            .join("segments")
            .join(source)
            .join(issue_date.format("%Y").to_string())
    }

    /// Target path for an original image, sharded if the directory is full.
    pub fn original_path(
        &self,
        source: &str,
        lccn: &str,
        issue_date: NaiveDate,
        sequence: u32,
        ext: &str,
    ) -> PathBuf {
        let filename = Self::page_filename(lccn, issue_date, sequence, ext);
        place(&self.originals_dir(source, issue_date), &filename)
    }

    pub fn ocr_text_path(
        &self,
        source: &str,
        lccn: &str,
        issue_date: NaiveDate,
        sequence: u32,
    ) -> PathBuf {
        let filename = Self::page_filename(lccn, issue_date, sequence, "txt");
        place(&self.ocr_text_dir(source, issue_date), &filename)
    }

    pub fn hocr_path(
        &self,
        source: &str,
        lccn: &str,
        issue_date: NaiveDate,
        sequence: u32,
    ) -> PathBuf {
        let filename = Self::page_filename(lccn, issue_date, sequence, "hocr");
        place(&self.hocr_dir(source, issue_date), &filename)
    }

    /// Target path for a segment clip or text file.
    pub fn segment_path(
        &self,
        source: &str,
        issue_date: NaiveDate,
        segment_id: &str,
        ext: &str,
    ) -> PathBuf {
        let filename = format!("{segment_id}.{ext}");
        place(&self.segments_dir(source, issue_date), &filename)
    }

    /// Provenance sidecar next to an original: `<file>.meta.json`.
    pub fn sidecar_path(original: &Path) -> PathBuf {
        let mut name = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".meta.json");
        original.with_file_name(name)
    }
}

/// Two-character shard for a filename, from its SHA-256.
fn shard_for(filename: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hex::encode(hasher.finalize())[..2].to_string()
}

/// Place `filename` under `dir`, interposing a shard directory once `dir`
/// holds [`SHARD_THRESHOLD`] entries. A file that already exists at either
/// location keeps its existing path.
fn place(dir: &Path, filename: &str) -> PathBuf {
    let flat = dir.join(filename);
    if flat.exists() {
        return flat;
    }
    let sharded = dir.join(shard_for(filename)).join(filename);
    if sharded.exists() {
        return sharded;
    }
    if entry_count(dir) >= SHARD_THRESHOLD {
        sharded
    } else {
        flat
    }
}

fn entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|rd| rd.count()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_page_filename() {
        assert_eq!(
            RepositoryLayout::page_filename("sn83045604", date("1891-04-01"), 3, "jp2"),
            "sn83045604_1891-04-01_0003.jp2"
        );
    }

    #[test]
    fn test_original_path_layout() {
        let layout = RepositoryLayout::new("/repo");
        let path =
            layout.original_path("chroniclingamerica", "sn83045604", date("1891-04-01"), 1, "jp2");
        assert_eq!(
            path,
            PathBuf::from(
                "/repo/originals/chroniclingamerica/1891/04/sn83045604_1891-04-01_0001.jp2"
            )
        );
    }

    #[test]
    fn test_ocr_and_hocr_paths() {
        let layout = RepositoryLayout::new("/repo");
        let txt = layout.ocr_text_path("chroniclingamerica", "sn83045604", date("1891-04-01"), 1);
        assert_eq!(
            txt,
            PathBuf::from("/repo/ocr/text/chroniclingamerica/1891/sn83045604_1891-04-01_0001.txt")
        );
        let hocr = layout.hocr_path("chroniclingamerica", "sn83045604", date("1891-04-01"), 1);
        assert_eq!(
            hocr,
            PathBuf::from("/repo/ocr/hocr/chroniclingamerica/1891/sn83045604_1891-04-01_0001.hocr")
        );
    }

    #[test]
    fn test_sidecar_path() {
        let sidecar = RepositoryLayout::sidecar_path(Path::new("/repo/originals/a/b/x.jp2"));
        assert_eq!(sidecar, PathBuf::from("/repo/originals/a/b/x.jp2.meta.json"));
    }

    #[test]
    fn test_existing_file_keeps_path() {
        let dir = tempdir().unwrap();
        let flat = dir.path().join("page.txt");
        std::fs::write(&flat, b"x").unwrap();
        assert_eq!(place(dir.path(), "page.txt"), flat);
    }

    #[test]
    fn test_shard_is_two_hex_chars() {
        let shard = shard_for("sn83045604_1891-04-01_0001.jp2");
        assert_eq!(shard.len(), 2);
        assert!(shard.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
