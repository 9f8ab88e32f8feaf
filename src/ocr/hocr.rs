//! HOCR parsing and layout analysis.
//!
//! HOCR is XHTML with per-element `title` attributes carrying bounding
//! boxes (`bbox x0 y0 x1 y1`) and word confidences (`x_wconf NN`). Layout
//! analysis walks the `ocr_carea` blocks, aggregates their words, and
//! classifies each block as article text, headline, or image region.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::OcrError;
use crate::models::{BoundingBox, SegmentKind};

/// A classified block from layout analysis.
#[derive(Debug, Clone)]
pub struct LayoutBlock {
    pub kind: SegmentKind,
    pub bbox: BoundingBox,
    pub text: String,
    /// Mean word confidence in [0, 1].
    pub confidence: f64,
}

/// Minimum-size and minimum-confidence filtering for layout output.
#[derive(Debug, Clone, Copy)]
pub struct LayoutFilter {
    /// Blocks with a shorter side under this many pixels are dropped.
    pub min_short_side: u32,
    /// Blocks under this confidence are dropped.
    pub min_confidence: f64,
}

impl Default for LayoutFilter {
    fn default() -> Self {
        Self {
            min_short_side: 100,
            min_confidence: 0.5,
        }
    }
}

/// Parse an HOCR document into filtered layout blocks.
pub fn analyze_layout(hocr: &str, filter: &LayoutFilter) -> Result<Vec<LayoutBlock>, OcrError> {
    if !hocr.contains("ocr") {
        return Err(OcrError::MalformedHocr(
            "document carries no hocr classes".to_string(),
        ));
    }

    let document = Html::parse_document(hocr);
    let area_selector =
        Selector::parse(".ocr_carea").map_err(|e| OcrError::MalformedHocr(e.to_string()))?;
    let word_selector =
        Selector::parse(".ocrx_word").map_err(|e| OcrError::MalformedHocr(e.to_string()))?;

    let mut blocks = Vec::new();
    for area in document.select(&area_selector) {
        let Some(bbox) = element_bbox(&area) else {
            continue;
        };

        let mut words = Vec::new();
        let mut confidences = Vec::new();
        for word in area.select(&word_selector) {
            let text: String = word.text().collect::<String>().trim().to_string();
            if text.is_empty() {
                continue;
            }
            words.push(text);
            if let Some(conf) = element_confidence(&word) {
                confidences.push(conf);
            }
        }

        let text = words.join(" ");
        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        blocks.push(LayoutBlock {
            kind: classify_block(&text, &bbox),
            bbox,
            text,
            confidence,
        });
    }

    Ok(blocks
        .into_iter()
        .filter(|b| b.bbox.short_side() >= filter.min_short_side)
        .filter(|b| b.confidence >= filter.min_confidence || b.kind == SegmentKind::Image)
        .collect())
}

/// A block with no recognized words is an image region; short, mostly
/// upper-case text reads as a headline.
fn classify_block(text: &str, _bbox: &BoundingBox) -> SegmentKind {
    if text.is_empty() {
        return SegmentKind::Image;
    }
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if text.len() < 80 && !letters.is_empty() {
        let upper = letters.iter().filter(|c| c.is_uppercase()).count();
        if upper * 10 >= letters.len() * 7 {
            return SegmentKind::Headline;
        }
    }
    SegmentKind::Article
}

/// `title="bbox 12 34 560 780; ..."` -> BoundingBox.
fn element_bbox(element: &ElementRef) -> Option<BoundingBox> {
    let title = element.value().attr("title")?;
    parse_bbox(title)
}

pub(crate) fn parse_bbox(title: &str) -> Option<BoundingBox> {
    let re = Regex::new(r"bbox (\d+) (\d+) (\d+) (\d+)").ok()?;
    let captures = re.captures(title)?;
    let x0: u32 = captures[1].parse().ok()?;
    let y0: u32 = captures[2].parse().ok()?;
    let x1: u32 = captures[3].parse().ok()?;
    let y1: u32 = captures[4].parse().ok()?;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(BoundingBox::new(x0, y0, x1 - x0, y1 - y0))
}

/// `title="...; x_wconf 96"` -> 0.96.
fn element_confidence(element: &ElementRef) -> Option<f64> {
    let title = element.value().attr("title")?;
    parse_wconf(title)
}

pub(crate) fn parse_wconf(title: &str) -> Option<f64> {
    let re = Regex::new(r"x_wconf (\d+)").ok()?;
    let captures = re.captures(title)?;
    let conf: f64 = captures[1].parse().ok()?;
    Some((conf / 100.0).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html><body>
          <div class="ocr_page" title="bbox 0 0 2000 3000">
            <div class="ocr_carea" title="bbox 100 100 1200 300">
              <p class="ocr_par">
                <span class="ocrx_word" title="bbox 100 100 400 200; x_wconf 95">GREAT</span>
                <span class="ocrx_word" title="bbox 420 100 800 200; x_wconf 92">FIRE</span>
              </p>
            </div>
            <div class="ocr_carea" title="bbox 100 400 1200 2800">
              <p class="ocr_par">
                <span class="ocrx_word" title="bbox 100 400 200 440; x_wconf 88">The</span>
                <span class="ocrx_word" title="bbox 210 400 320 440; x_wconf 85">fire</span>
                <span class="ocrx_word" title="bbox 330 400 480 440; x_wconf 90">spread</span>
              </p>
            </div>
            <div class="ocr_carea" title="bbox 1300 400 1900 1400"></div>
            <div class="ocr_carea" title="bbox 0 2950 2000 2990">
              <span class="ocrx_word" title="bbox 0 2950 100 2990; x_wconf 80">tiny</span>
            </div>
          </div>
        </body></html>
    "#;

    #[test]
    fn test_parse_bbox() {
        assert_eq!(
            parse_bbox("bbox 10 20 110 220; x_wconf 90"),
            Some(BoundingBox::new(10, 20, 100, 200))
        );
        assert_eq!(parse_bbox("bbox 10 20 10 220"), None);
        assert_eq!(parse_bbox("no box here"), None);
    }

    #[test]
    fn test_parse_wconf() {
        assert_eq!(parse_wconf("bbox 0 0 1 1; x_wconf 96"), Some(0.96));
        assert_eq!(parse_wconf("bbox 0 0 1 1"), None);
    }

    #[test]
    fn test_layout_blocks_classified_and_filtered() {
        let blocks = analyze_layout(SAMPLE, &LayoutFilter::default()).unwrap();
        // the 40px-tall strip at the bottom is filtered by min size
        assert_eq!(blocks.len(), 3);

        assert_eq!(blocks[0].kind, SegmentKind::Headline);
        assert_eq!(blocks[0].text, "GREAT FIRE");
        assert!((blocks[0].confidence - 0.935).abs() < 1e-9);

        assert_eq!(blocks[1].kind, SegmentKind::Article);
        assert_eq!(blocks[1].text, "The fire spread");
        assert_eq!(blocks[1].bbox, BoundingBox::new(100, 400, 1100, 2400));

        assert_eq!(blocks[2].kind, SegmentKind::Image);
        assert!(blocks[2].text.is_empty());
    }

    #[test]
    fn test_min_confidence_filter() {
        let filter = LayoutFilter {
            min_short_side: 1,
            min_confidence: 0.95,
        };
        let blocks = analyze_layout(SAMPLE, &filter).unwrap();
        // only the image block skips the confidence gate; text blocks are
        // below 0.95 except none
        assert!(blocks.iter().all(|b| b.kind == SegmentKind::Image || b.confidence >= 0.95));
    }

    #[test]
    fn test_malformed_hocr() {
        let err = analyze_layout("<html><body>plain</body></html>", &LayoutFilter::default())
            .unwrap_err();
        assert!(matches!(err, OcrError::MalformedHocr(_)));
    }
}
