//! OCR engine interface.
//!
//! A narrow, synchronous capability: run OCR on image bytes and analyze an
//! HOCR document into layout segments. The pipeline supplies concurrency by
//! calling engines from blocking worker tasks; engines never spawn.

mod hocr;
mod tesseract;

pub use hocr::{analyze_layout, LayoutBlock, LayoutFilter};
pub use tesseract::TesseractEngine;

use thiserror::Error;

use crate::errors::AcquireError;

/// Errors from OCR engines and layout analysis.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("engine not available: {0}")]
    EngineNotAvailable(String),

    #[error("ocr failed: {0}")]
    OcrFailed(String),

    #[error("malformed hocr: {0}")]
    MalformedHocr(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<OcrError> for AcquireError {
    fn from(e: OcrError) -> Self {
        match e {
            OcrError::EngineNotAvailable(msg) => AcquireError::ResourceExhausted(msg),
            OcrError::OcrFailed(msg) => AcquireError::Internal(format!("ocr failed: {msg}")),
            OcrError::MalformedHocr(msg) => AcquireError::CorruptData(msg),
            OcrError::Io(e) => AcquireError::Io(e),
        }
    }
}

/// Output of one OCR run.
#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub text: String,
    pub hocr: Option<String>,
    /// Mean word confidence in [0, 1], when the engine reports one.
    pub confidence: Option<f64>,
}

/// Optional hook applied to image bytes before OCR. The pipeline is
/// agnostic to the algorithm behind it.
pub type PreprocessHook = Box<dyn Fn(Vec<u8>) -> Vec<u8> + Send + Sync>;

/// An OCR engine.
///
/// `run_ocr` is synchronous and may take minutes on large scans; callers
/// run it under `spawn_blocking` with a deadline.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the engine's external dependencies are present.
    fn is_available(&self) -> bool;

    fn run_ocr(&self, image: &[u8], language_hint: &str) -> Result<OcrOutput, OcrError>;

    /// Turn an HOCR document into filtered layout segments.
    fn analyze_layout(
        &self,
        hocr: &str,
        filter: &LayoutFilter,
    ) -> Result<Vec<LayoutBlock>, OcrError> {
        hocr::analyze_layout(hocr, filter)
    }
}
