//! Tesseract OCR engine.
//!
//! Shells out to the `tesseract` binary with the `txt` and `hocr` output
//! configs. Confidence comes from averaging the HOCR word confidences.

use std::path::Path;
use std::process::Command;
use std::time::Instant;

use tempfile::TempDir;
use tracing::debug;

use super::hocr::parse_wconf;
use super::{OcrEngine, OcrError, OcrOutput, PreprocessHook};

/// Tesseract-backed engine.
pub struct TesseractEngine {
    /// Default language when the caller passes an empty hint.
    language: String,
    preprocess: Option<PreprocessHook>,
}

impl TesseractEngine {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            preprocess: None,
        }
    }

    /// Install a preprocessing hook applied to image bytes before OCR.
    pub fn with_preprocess(mut self, hook: PreprocessHook) -> Self {
        self.preprocess = Some(hook);
        self
    }

    fn run_binary(&self, image_path: &Path, out_base: &Path, language: &str) -> Result<(), OcrError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg(out_base)
            .args(["-l", language])
            .args(["txt", "hocr"])
            .output();

        match output {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(OcrError::OcrFailed(format!("tesseract failed: {stderr}")))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                OcrError::EngineNotAvailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ),
            ),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        Command::new("tesseract")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn run_ocr(&self, image: &[u8], language_hint: &str) -> Result<OcrOutput, OcrError> {
        let started = Instant::now();
        let language = if language_hint.is_empty() {
            self.language.as_str()
        } else {
            language_hint
        };

        let bytes = match &self.preprocess {
            Some(hook) => hook(image.to_vec()),
            None => image.to_vec(),
        };

        let workdir = TempDir::new()?;
        let image_path = workdir.path().join("page.img");
        std::fs::write(&image_path, &bytes)?;
        let out_base = workdir.path().join("out");

        self.run_binary(&image_path, &out_base, language)?;

        let text = std::fs::read_to_string(out_base.with_extension("txt"))?;
        let hocr = std::fs::read_to_string(out_base.with_extension("hocr")).ok();
        let confidence = hocr.as_deref().and_then(mean_word_confidence);

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            language, "tesseract run finished"
        );
        Ok(OcrOutput {
            text,
            hocr,
            confidence,
        })
    }
}

/// Mean of every `x_wconf` in an HOCR document.
fn mean_word_confidence(hocr: &str) -> Option<f64> {
    let confidences: Vec<f64> = hocr
        .match_indices("x_wconf")
        .filter_map(|(idx, _)| hocr.get(idx..hocr.len().min(idx + 16)))
        .filter_map(parse_wconf)
        .collect();
    if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_word_confidence() {
        let hocr = r#"
            <span class="ocrx_word" title="bbox 0 0 1 1; x_wconf 90">a</span>
            <span class="ocrx_word" title="bbox 0 0 1 1; x_wconf 70">b</span>
        "#;
        let mean = mean_word_confidence(hocr).unwrap();
        assert!((mean - 0.80).abs() < 1e-9);
        assert_eq!(mean_word_confidence("<p>no words</p>"), None);
    }

    #[test]
    fn test_language_hint_overrides_default() {
        let engine = TesseractEngine::new("eng");
        // hint handling is pure; exercised here without the binary
        let language = |hint: &str| {
            if hint.is_empty() {
                engine.language.clone()
            } else {
                hint.to_string()
            }
        };
        assert_eq!(language(""), "eng");
        assert_eq!(language("deu"), "deu");
    }
}
