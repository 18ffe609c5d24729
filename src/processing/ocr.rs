use std::cmp::Ordering;
use std::io::Write;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::DynamicImage;
use log::{debug, warn};
use tempfile::NamedTempFile;
use tesseract::{PageSegMode, Tesseract};

use crate::models::{MergeStrategy, OcrConfig, SegmentationPass};
use crate::processing::image::ImageEnhancer;
use crate::utils::InvoiceError;

/// Output of a single recognition pass.
#[derive(Debug, Clone, Default)]
pub struct OcrPass {
    pub text: String,
    /// Mean token confidence in 0..=100, when the engine reports one.
    pub mean_confidence: Option<f32>,
}

/// Recognition engine abstraction. Implementations are called from worker
/// threads; a failing call is contained to that pass.
pub trait OcrEngine: Send + Sync {
    fn recognize(
        &self,
        image: &DynamicImage,
        languages: &str,
        pass: &SegmentationPass,
    ) -> Result<OcrPass, InvoiceError>;
}

/// Tesseract-backed engine. The image is handed over through a temporary
/// PNG file, which is what the C API expects.
pub struct TesseractEngine {
    datapath: Option<String>,
}

impl TesseractEngine {
    pub fn new() -> Self {
        TesseractEngine { datapath: None }
    }

    /// Point the engine at a non-default tessdata directory.
    pub fn with_datapath(datapath: impl Into<String>) -> Self {
        TesseractEngine {
            datapath: Some(datapath.into()),
        }
    }

    fn page_seg_mode(psm: u8) -> PageSegMode {
        match psm {
            0 => PageSegMode::PsmOsdOnly,
            1 => PageSegMode::PsmAutoOsd,
            2 => PageSegMode::PsmAutoOnly,
            3 => PageSegMode::PsmAuto,
            4 => PageSegMode::PsmSingleColumn,
            5 => PageSegMode::PsmSingleBlockVertText,
            6 => PageSegMode::PsmSingleBlock,
            7 => PageSegMode::PsmSingleLine,
            8 => PageSegMode::PsmSingleWord,
            9 => PageSegMode::PsmCircleWord,
            10 => PageSegMode::PsmSingleChar,
            11 => PageSegMode::PsmSparseText,
            12 => PageSegMode::PsmSparseTextOsd,
            13 => PageSegMode::PsmRawLine,
            _ => PageSegMode::PsmAuto,
        }
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(
        &self,
        image: &DynamicImage,
        languages: &str,
        pass: &SegmentationPass,
    ) -> Result<OcrPass, InvoiceError> {
        let png = ImageEnhancer::encode_png(image)?;

        let mut temp_file = NamedTempFile::new()
            .map_err(|e| InvoiceError::OcrEngine(format!("failed to create temp file: {}", e)))?;
        temp_file
            .write_all(&png)
            .map_err(|e| InvoiceError::OcrEngine(format!("failed to write temp file: {}", e)))?;
        let path = temp_file
            .path()
            .to_str()
            .ok_or_else(|| InvoiceError::OcrEngine("temp path is not valid UTF-8".to_string()))?;

        let mut tess = Tesseract::new(self.datapath.as_deref(), Some(languages))
            .map_err(|e| InvoiceError::OcrEngine(format!("tesseract init failed: {}", e)))?;
        tess.set_page_seg_mode(Self::page_seg_mode(pass.psm));
        let mut tess = tess
            .set_image(path)
            .map_err(|e| InvoiceError::OcrEngine(format!("tesseract set image failed: {}", e)))?;
        let text = tess
            .get_text()
            .map_err(|e| InvoiceError::OcrEngine(format!("tesseract recognition failed: {}", e)))?;

        let conf = tess.mean_text_conf();
        let mean_confidence = if conf >= 0 { Some(conf as f32) } else { None };
        debug!(
            "psm {} recognized {} chars (conf {:?})",
            pass.psm,
            text.len(),
            mean_confidence
        );
        Ok(OcrPass {
            text,
            mean_confidence,
        })
    }
}

/// What OCR produced for one page after all configured passes.
#[derive(Debug, Clone, Default)]
pub struct OcrOutcome {
    /// Raw text of each successful pass, in configuration order.
    pub variants: Vec<String>,
    /// Merged text handed to extraction; empty when every pass failed.
    pub text: String,
    pub warnings: Vec<String>,
}

/// Runs the configured segmentation passes over an enhanced image and
/// merges their output. A failing or overrunning pass is skipped; when
/// every pass fails the page text is empty, which is a valid outcome
/// routed to human review rather than an error.
pub struct OcrOrchestrator {
    engine: Arc<dyn OcrEngine>,
    config: OcrConfig,
}

impl OcrOrchestrator {
    pub fn new(engine: Arc<dyn OcrEngine>, config: OcrConfig) -> Self {
        OcrOrchestrator { engine, config }
    }

    pub fn run(&self, image: &DynamicImage) -> OcrOutcome {
        let mut passes = Vec::new();
        let mut warnings = Vec::new();
        for (idx, pass) in self.config.passes.iter().enumerate() {
            match self.run_pass(image, pass) {
                Ok(output) => passes.push(output),
                Err(e) => {
                    warn!("OCR pass {} (psm {}) failed: {}", idx + 1, pass.psm, e);
                    warnings.push(format!("OCR pass {} (psm {}) failed: {}", idx + 1, pass.psm, e));
                }
            }
        }
        let text = self.merge(&passes);
        OcrOutcome {
            variants: passes.into_iter().map(|p| p.text).collect(),
            text,
            warnings,
        }
    }

    /// Run one pass under the configured time budget. The engine call is
    /// blocking FFI and cannot be interrupted; on timeout the worker
    /// thread is abandoned and the pass counts as failed.
    fn run_pass(
        &self,
        image: &DynamicImage,
        pass: &SegmentationPass,
    ) -> Result<OcrPass, InvoiceError> {
        if self.config.pass_timeout_secs == 0 {
            return self.engine.recognize(image, &self.config.languages, pass);
        }
        let (tx, rx) = mpsc::channel();
        let engine = Arc::clone(&self.engine);
        let image = image.clone();
        let languages = self.config.languages.clone();
        let pass = pass.clone();
        thread::spawn(move || {
            let _ = tx.send(engine.recognize(&image, &languages, &pass));
        });
        match rx.recv_timeout(Duration::from_secs(self.config.pass_timeout_secs)) {
            Ok(result) => result,
            Err(_) => Err(InvoiceError::OcrEngine(format!(
                "pass exceeded {}s budget",
                self.config.pass_timeout_secs
            ))),
        }
    }

    fn merge(&self, passes: &[OcrPass]) -> String {
        match self.config.merge {
            MergeStrategy::Concat => concat(passes),
            MergeStrategy::BestOf => {
                let best = passes
                    .iter()
                    .filter(|p| p.mean_confidence.is_some())
                    .max_by(|a, b| {
                        a.mean_confidence
                            .partial_cmp(&b.mean_confidence)
                            .unwrap_or(Ordering::Equal)
                    });
                match best {
                    Some(pass) => pass.text.clone(),
                    // Engine exposes no confidence: fall back to recall.
                    None => concat(passes),
                }
            }
        }
    }
}

fn concat(passes: &[OcrPass]) -> String {
    passes
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SegmentationPass;

    /// Scripted engine: each PSM maps to a canned outcome.
    struct ScriptedEngine {
        outcomes: Vec<(u8, Result<OcrPass, String>)>,
        delay: Option<Duration>,
    }

    impl ScriptedEngine {
        fn new(outcomes: Vec<(u8, Result<OcrPass, String>)>) -> Self {
            ScriptedEngine {
                outcomes,
                delay: None,
            }
        }
    }

    impl OcrEngine for ScriptedEngine {
        fn recognize(
            &self,
            _image: &DynamicImage,
            _languages: &str,
            pass: &SegmentationPass,
        ) -> Result<OcrPass, InvoiceError> {
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            for (psm, outcome) in &self.outcomes {
                if *psm == pass.psm {
                    return outcome.clone().map_err(InvoiceError::OcrEngine);
                }
            }
            Err(InvoiceError::OcrEngine("unscripted pass".to_string()))
        }
    }

    fn blank_image() -> DynamicImage {
        DynamicImage::new_luma8(8, 8)
    }

    fn config(merge: MergeStrategy) -> OcrConfig {
        OcrConfig {
            merge,
            pass_timeout_secs: 0,
            ..Default::default()
        }
    }

    fn pass(text: &str, conf: Option<f32>) -> OcrPass {
        OcrPass {
            text: text.to_string(),
            mean_confidence: conf,
        }
    }

    #[test]
    fn test_concat_joins_all_passes() {
        let engine = ScriptedEngine::new(vec![
            (6, Ok(pass("block text", None))),
            (11, Ok(pass("sparse text", None))),
        ]);
        let orchestrator = OcrOrchestrator::new(Arc::new(engine), config(MergeStrategy::Concat));
        let outcome = orchestrator.run(&blank_image());
        assert_eq!(outcome.text, "block text\nsparse text");
        assert_eq!(outcome.variants.len(), 2);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_best_of_picks_highest_confidence() {
        let engine = ScriptedEngine::new(vec![
            (6, Ok(pass("noisy", Some(54.0)))),
            (11, Ok(pass("clean", Some(88.0)))),
        ]);
        let orchestrator = OcrOrchestrator::new(Arc::new(engine), config(MergeStrategy::BestOf));
        let outcome = orchestrator.run(&blank_image());
        assert_eq!(outcome.text, "clean");
    }

    #[test]
    fn test_best_of_without_confidence_falls_back_to_concat() {
        let engine = ScriptedEngine::new(vec![
            (6, Ok(pass("first", None))),
            (11, Ok(pass("second", None))),
        ]);
        let orchestrator = OcrOrchestrator::new(Arc::new(engine), config(MergeStrategy::BestOf));
        let outcome = orchestrator.run(&blank_image());
        assert_eq!(outcome.text, "first\nsecond");
    }

    #[test]
    fn test_failing_pass_is_skipped_not_fatal() {
        let engine = ScriptedEngine::new(vec![
            (6, Err("engine crashed".to_string())),
            (11, Ok(pass("survivor", None))),
        ]);
        let orchestrator = OcrOrchestrator::new(Arc::new(engine), config(MergeStrategy::Concat));
        let outcome = orchestrator.run(&blank_image());
        assert_eq!(outcome.text, "survivor");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("psm 6"));
    }

    #[test]
    fn test_all_passes_failing_yields_empty_text() {
        let engine = ScriptedEngine::new(vec![
            (6, Err("down".to_string())),
            (11, Err("down".to_string())),
        ]);
        let orchestrator = OcrOrchestrator::new(Arc::new(engine), config(MergeStrategy::Concat));
        let outcome = orchestrator.run(&blank_image());
        assert!(outcome.text.is_empty());
        assert!(outcome.variants.is_empty());
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn test_overrunning_pass_is_treated_as_failure() {
        let engine = ScriptedEngine {
            outcomes: vec![(6, Ok(pass("too slow", None)))],
            delay: Some(Duration::from_secs(5)),
        };
        let cfg = OcrConfig {
            passes: vec![SegmentationPass { psm: 6 }],
            pass_timeout_secs: 1,
            ..Default::default()
        };
        let orchestrator = OcrOrchestrator::new(Arc::new(engine), cfg);
        let outcome = orchestrator.run(&blank_image());
        assert!(outcome.text.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("budget"));
    }
}
