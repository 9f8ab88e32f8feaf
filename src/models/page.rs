//! Newspaper page, segment, and article models.
//!
//! Pages are the smallest acquired unit: one printed page of a dated issue,
//! keyed by `(source_system, publication, issue_date, sequence)`. Segments
//! are rectangular sub-regions produced by layout analysis; articles compose
//! segments from the same page.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A publication known to the archive, identified by its LCCN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    /// Library of Congress Control Number, e.g. `sn83045604`.
    pub lccn: String,
    pub title: String,
    /// Place of publication (city, state).
    pub place: Option<String>,
    /// Earliest issue the archive holds. Must be <= every page issue date.
    pub first_issue_date: Option<NaiveDate>,
    pub last_issue_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Publication {
    pub fn new(lccn: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            lccn: lccn.into(),
            title: title.into(),
            place: None,
            first_issue_date: None,
            last_issue_date: None,
            created_at: Utc::now(),
        }
    }
}

/// Processing status of a newspaper page.
///
/// Transitions are monotonic except `Failed`, which may be re-queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    New,
    Queued,
    Processing,
    OcrDone,
    Segmented,
    Failed,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::OcrDone => "ocr_done",
            Self::Segmented => "segmented",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "ocr_done" => Some(Self::OcrDone),
            "segmented" => Some(Self::Segmented),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Rank in the monotonic status order. `Failed` sits outside the order.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::New => Some(0),
            Self::Queued => Some(1),
            Self::Processing => Some(2),
            Self::OcrDone => Some(3),
            Self::Segmented => Some(4),
            Self::Failed => None,
        }
    }

    /// Whether a transition to `next` is allowed: forward along the order,
    /// anything -> failed, or failed -> queued (re-queue).
    pub fn can_transition_to(&self, next: PageStatus) -> bool {
        if next == Self::Failed {
            return true;
        }
        match (self.rank(), next.rank()) {
            (Some(a), Some(b)) => b >= a,
            (None, _) => next == Self::Queued,
            _ => false,
        }
    }
}

/// An acquired newspaper page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewspaperPage {
    /// Repository-local identifier.
    pub id: String,
    /// LCCN of the owning publication.
    pub lccn: String,
    pub publication_title: String,
    pub issue_date: NaiveDate,
    /// 1-based page number within the issue.
    pub sequence: u32,
    /// Originating archive, e.g. `chroniclingamerica`.
    pub source_system: String,
    /// Path of the original image under the repository base directory.
    pub image_path: PathBuf,
    /// Pixel dimensions of the original image, when known.
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
    pub ocr_text_path: Option<PathBuf>,
    pub hocr_path: Option<PathBuf>,
    /// Queryable copy of the OCR text; the artifact of record lives at
    /// `ocr_text_path`.
    pub ocr_text: Option<String>,
    pub status: PageStatus,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewspaperPage {
    /// Compute the SHA-256 hash of page content.
    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }
}

/// Rectangular region in page-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether this box lies entirely within an image of the given size.
    pub fn fits_within(&self, image_width: u32, image_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|r| r <= image_width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= image_height)
    }

    /// Length of the shorter side, used for minimum-size filtering.
    pub fn short_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

/// Classification of a page segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Article,
    Headline,
    Image,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Headline => "headline",
            Self::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "article" => Some(Self::Article),
            "headline" => Some(Self::Headline),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

/// Review status of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Draft,
    Reviewed,
    Promoted,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Reviewed => "reviewed",
            Self::Promoted => "promoted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "reviewed" => Some(Self::Reviewed),
            "promoted" => Some(Self::Promoted),
            _ => None,
        }
    }
}

/// A classified region of a page with its extracted text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleSegment {
    pub id: String,
    pub page_id: String,
    pub kind: SegmentKind,
    pub bbox: BoundingBox,
    pub text: String,
    /// Recognition confidence in [0, 1].
    pub confidence: f64,
    /// Path of the cropped image clip, if one was written.
    pub clip_path: Option<PathBuf>,
    pub status: SegmentStatus,
    pub created_at: DateTime<Utc>,
}

impl ArticleSegment {
    pub fn new(page_id: impl Into<String>, kind: SegmentKind, bbox: BoundingBox, text: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            page_id: page_id.into(),
            kind,
            bbox,
            text,
            confidence: 0.0,
            clip_path: None,
            status: SegmentStatus::Draft,
            created_at: Utc::now(),
        }
    }
}

/// An editorial composition of segments from a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewspaperArticle {
    pub id: String,
    pub page_id: String,
    /// Segment ids in reading order; all must share `page_id`.
    pub segment_ids: Vec<String>,
    pub title: String,
    pub text: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            PageStatus::New,
            PageStatus::Queued,
            PageStatus::Processing,
            PageStatus::OcrDone,
            PageStatus::Segmented,
            PageStatus::Failed,
        ] {
            assert_eq!(PageStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(PageStatus::parse("bogus"), None);
    }

    #[test]
    fn test_status_monotonic() {
        assert!(PageStatus::Queued.can_transition_to(PageStatus::OcrDone));
        assert!(PageStatus::OcrDone.can_transition_to(PageStatus::Segmented));
        assert!(!PageStatus::Segmented.can_transition_to(PageStatus::Queued));
        // failed may be re-queued, but only to queued
        assert!(PageStatus::Failed.can_transition_to(PageStatus::Queued));
        assert!(!PageStatus::Failed.can_transition_to(PageStatus::OcrDone));
        // anything may fail
        assert!(PageStatus::New.can_transition_to(PageStatus::Failed));
    }

    #[test]
    fn test_bbox_bounds() {
        let bbox = BoundingBox::new(10, 20, 100, 200);
        assert!(bbox.fits_within(110, 220));
        assert!(!bbox.fits_within(109, 220));
        assert!(!bbox.fits_within(110, 219));
        assert!(!BoundingBox::new(0, 0, 0, 10).fits_within(100, 100));
        assert_eq!(bbox.short_side(), 100);
    }

    #[test]
    fn test_compute_hash_stable() {
        let a = NewspaperPage::compute_hash(b"front page");
        let b = NewspaperPage::compute_hash(b"front page");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
