use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use log::{debug, info};
use rayon::prelude::*;

use crate::models::{
    CorrectionRecord, ExportRow, ExtractionResult, FinalRecord, Page, PipelineConfig,
};
use crate::processing::{
    FieldExtractor, ImageEnhancer, OcrEngine, OcrOrchestrator, RecordAssembler,
};
use crate::utils::InvoiceError;
use crate::validation::FieldValidator;

/// Turns raw document bytes into ordered page images. Failure here is
/// fatal for the whole document; there is no partial output.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, document: &[u8], dpi: u32) -> Result<Vec<DynamicImage>, InvoiceError>;
}

/// Single-image documents (photo or scan uploads): the bytes decode to
/// exactly one page. PDF rasterization is an external collaborator wired
/// in through the same trait.
pub struct SingleImageRasterizer;

impl Rasterizer for SingleImageRasterizer {
    fn rasterize(&self, document: &[u8], _dpi: u32) -> Result<Vec<DynamicImage>, InvoiceError> {
        let image = image::load_from_memory(document)
            .map_err(|e| InvoiceError::Rasterization(format!("failed to decode image: {}", e)))?;
        Ok(vec![image])
    }
}

/// Consumes the fixed-shape export rows. Failure is fatal for the export
/// step only; already-computed records stay valid for a retry.
pub trait SpreadsheetWriter {
    fn write(&self, rows: &[ExportRow]) -> Result<(), InvoiceError>;
}

/// Tab-separated writer used by the demo binary. Binary spreadsheet
/// formats live behind the same trait, outside this crate.
pub struct TsvWriter {
    pub path: PathBuf,
}

impl SpreadsheetWriter for TsvWriter {
    fn write(&self, rows: &[ExportRow]) -> Result<(), InvoiceError> {
        let mut out = String::from("sequence\tdate\tinvoice_number\tamount\n");
        for row in rows {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                row.sequence, row.date, row.invoice_number, row.amount
            ));
        }
        std::fs::write(&self.path, out).map_err(|e| {
            InvoiceError::Export(format!("failed to write {}: {}", self.path.display(), e))
        })
    }
}

/// One finished processing run: pages and their extraction results, both
/// in page order. Owned exclusively by the caller.
#[derive(Debug)]
pub struct DocumentRun {
    pub pages: Vec<Page>,
    pub results: Vec<ExtractionResult>,
}

/// Orchestrates the full pipeline: rasterize, then per page enhance →
/// OCR → extract → validate on a bounded worker pool, then assemble.
pub struct InvoicePipeline {
    config: PipelineConfig,
    enhancer: ImageEnhancer,
    orchestrator: OcrOrchestrator,
    extractor: FieldExtractor,
}

impl InvoicePipeline {
    pub fn new(config: PipelineConfig, engine: Arc<dyn OcrEngine>) -> Result<Self, InvoiceError> {
        let enhancer = ImageEnhancer::new(config.enhance.clone());
        let orchestrator = OcrOrchestrator::new(engine, config.ocr.clone());
        let extractor = FieldExtractor::new(&config.extract)?;
        Ok(InvoicePipeline {
            config,
            enhancer,
            orchestrator,
            extractor,
        })
    }

    /// Process a whole document. Rasterization failure aborts the run;
    /// everything after is contained per page. Pages are processed in
    /// parallel; results come back in page order regardless of which
    /// worker finished first.
    pub fn process_document(
        &self,
        rasterizer: &dyn Rasterizer,
        document: &[u8],
    ) -> Result<DocumentRun, InvoiceError> {
        let images = rasterizer.rasterize(document, self.config.dpi)?;
        info!("rasterized {} page(s)", images.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| InvoiceError::Config(format!("failed to build worker pool: {}", e)))?;

        let processed: Vec<(Page, ExtractionResult)> = pool.install(|| {
            images
                .into_par_iter()
                .enumerate()
                .map(|(idx, raw)| self.process_page(idx as u32 + 1, raw))
                .collect()
        });

        let (pages, results) = processed.into_iter().unzip();
        Ok(DocumentRun { pages, results })
    }

    /// Process one page end to end. Never fails: recoverable problems are
    /// recorded as warnings on the result and the page is routed to
    /// review, empty fields and all.
    pub fn process_page(&self, page_number: u32, raw: DynamicImage) -> (Page, ExtractionResult) {
        let (enhanced, enhance_warnings) = self.enhancer.enhance(&raw);
        let ocr = self.orchestrator.run(&enhanced);

        let page = Page {
            page_number,
            raw_image: raw,
            enhanced_image: Some(enhanced),
            ocr_text_variants: ocr.variants,
        };

        let mut result = self.extractor.extract(page_number, &ocr.text);
        let mut warnings = enhance_warnings;
        warnings.extend(ocr.warnings);
        warnings.append(&mut result.warnings);
        result.warnings = warnings;

        let (result, issues) = FieldValidator::validate(&self.config.validation, result);
        debug!(
            "page {} done: confidence {}, {} validation issue(s)",
            page_number,
            result.confidence,
            issues.len()
        );
        (page, result)
    }

    /// Merge extraction with stored corrections and emit the final record
    /// set, sorted by page number.
    pub fn finalize(
        &self,
        results: Vec<ExtractionResult>,
        corrections: &HashMap<u32, CorrectionRecord>,
    ) -> Vec<FinalRecord> {
        RecordAssembler::assemble(results, corrections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnhanceConfig, OcrConfig, SegmentationPass};
    use crate::processing::ocr::OcrPass;

    /// Three fixed-size pages; the page is identified downstream by its
    /// width so the scripted engine can answer per page.
    struct ThreePageRasterizer;

    impl Rasterizer for ThreePageRasterizer {
        fn rasterize(&self, _document: &[u8], _dpi: u32) -> Result<Vec<DynamicImage>, InvoiceError> {
            Ok(vec![
                DynamicImage::new_luma8(10, 10),
                DynamicImage::new_luma8(20, 20),
                DynamicImage::new_luma8(30, 30),
            ])
        }
    }

    struct FailingRasterizer;

    impl Rasterizer for FailingRasterizer {
        fn rasterize(&self, _document: &[u8], _dpi: u32) -> Result<Vec<DynamicImage>, InvoiceError> {
            Err(InvoiceError::Rasterization("unreadable document".to_string()))
        }
    }

    /// Answers by page width; width 20 simulates an engine crash.
    struct WidthKeyedEngine;

    impl OcrEngine for WidthKeyedEngine {
        fn recognize(
            &self,
            image: &DynamicImage,
            _languages: &str,
            _pass: &SegmentationPass,
        ) -> Result<OcrPass, InvoiceError> {
            let text = match image.width() {
                10 => "วันที่ 07/08/68\nเลขที่ HH6800471\nมูลค่าสินค้า 1,000.00",
                20 => return Err(InvoiceError::OcrEngine("engine crashed".to_string())),
                30 => "วันที่ 09/08/68\nเลขที่ HH6800473\nมูลค่าสินค้า 3,000.00",
                _ => "",
            };
            Ok(OcrPass {
                text: text.to_string(),
                mean_confidence: None,
            })
        }
    }

    fn test_pipeline() -> InvoicePipeline {
        let config = PipelineConfig {
            // Keep page dimensions intact so the scripted engine can key
            // off them, and skip steps that need larger images.
            enhance: EnhanceConfig {
                target_width: 0,
                sharpen_sigma: 0.0,
                binarization: crate::models::Binarization::Fixed { threshold: 128 },
                denoise: crate::models::Denoise::Median { radius: 1 },
                ..Default::default()
            },
            ocr: OcrConfig {
                passes: vec![SegmentationPass { psm: 6 }],
                pass_timeout_secs: 0,
                ..Default::default()
            },
            workers: 2,
            ..Default::default()
        };
        InvoicePipeline::new(config, Arc::new(WidthKeyedEngine)).unwrap()
    }

    #[test]
    fn test_three_pages_in_order_with_contained_failure() {
        let pipeline = test_pipeline();
        let run = pipeline
            .process_document(&ThreePageRasterizer, b"doc")
            .unwrap();
        assert_eq!(run.pages.len(), 3);
        assert_eq!(run.results.len(), 3);
        let pages: Vec<u32> = run.results.iter().map(|r| r.page_number).collect();
        assert_eq!(pages, vec![1, 2, 3]);

        assert_eq!(run.results[0].invoice_number.as_deref(), Some("HH6800471"));
        assert_eq!(run.results[0].amount.as_deref(), Some("1000.00"));

        // Page 2's engine failure is contained: empty fields, a warning,
        // and the neighboring pages untouched.
        assert_eq!(run.results[1].invoice_number, None);
        assert!(run.results[1].warnings.iter().any(|w| w.contains("failed")));
        assert_eq!(run.results[2].invoice_number.as_deref(), Some("HH6800473"));
    }

    #[test]
    fn test_correction_wins_at_assembly_regardless_of_order() {
        let pipeline = test_pipeline();
        let run = pipeline
            .process_document(&ThreePageRasterizer, b"doc")
            .unwrap();

        let mut corrections = HashMap::new();
        corrections.insert(
            2,
            CorrectionRecord {
                page_number: 2,
                amount: Some("2000.00".to_string()),
                ..Default::default()
            },
        );
        let records = pipeline.finalize(run.results, &corrections);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].page_number, 2);
        assert_eq!(records[1].amount.as_deref(), Some("2000.00"));
        assert!(records[1].corrected);

        let rows = RecordAssembler::export_rows(&records);
        assert_eq!(rows[0].sequence, 1);
        assert_eq!(rows[2].sequence, 3);
        assert_eq!(rows[2].invoice_number, "HH6800473");
    }

    #[test]
    fn test_rasterization_failure_is_fatal() {
        let pipeline = test_pipeline();
        let err = pipeline
            .process_document(&FailingRasterizer, b"doc")
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_tsv_writer_emits_fixed_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        let writer = TsvWriter { path: path.clone() };
        writer
            .write(&[ExportRow {
                sequence: 1,
                date: "07/08/68".to_string(),
                invoice_number: "HH6800471".to_string(),
                amount: "1000.00".to_string(),
            }])
            .unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("sequence\tdate\tinvoice_number\tamount"));
        assert_eq!(lines.next(), Some("1\t07/08/68\tHH6800471\t1000.00"));
    }
}
