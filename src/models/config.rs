use serde::{Deserialize, Serialize};

use crate::utils::InvoiceError;

/// Binarization strategies for the enhancement pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Binarization {
    /// Local mean threshold over a (2 * block_radius + 1)² window.
    Adaptive { block_radius: u32 },
    Fixed { threshold: u8 },
}

/// Denoise methods applied after thresholding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Denoise {
    Median { radius: u32 },
    Unsharp { sigma: f32, amount: f32 },
}

/// Knobs for the image enhancement stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    /// Pages narrower than this are upscaled before recognition.
    pub target_width: u32,
    /// Contrast adjustment percentage; 0 disables.
    pub contrast: f32,
    /// Additive brightness offset; 0 disables.
    pub brightness: i32,
    /// Gaussian unsharp sharpening; sigma 0 disables.
    pub sharpen_sigma: f32,
    pub sharpen_amount: f32,
    /// Histogram equalization before thresholding.
    pub normalize: bool,
    pub binarization: Binarization,
    pub denoise: Denoise,
    pub deskew: bool,
    /// Estimated angles below this are left alone (degrees).
    pub deskew_min_angle: f32,
    /// Estimated angles above this are treated as estimator noise.
    pub deskew_max_angle: f32,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        EnhanceConfig {
            target_width: 2000,
            contrast: 20.0,
            brightness: 10,
            sharpen_sigma: 1.0,
            sharpen_amount: 0.7,
            normalize: false,
            binarization: Binarization::Adaptive { block_radius: 20 },
            denoise: Denoise::Median { radius: 1 },
            deskew: false,
            deskew_min_angle: 0.5,
            deskew_max_angle: 15.0,
        }
    }
}

/// How outputs of the configured segmentation passes are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Join every pass output newline-separated, maximizing recall.
    Concat,
    /// Keep only the pass with the highest mean token confidence; falls
    /// back to concatenation when the engine reports no confidence.
    BestOf,
}

/// One recognition pass configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationPass {
    /// Tesseract page segmentation mode number (0-13).
    pub psm: u8,
}

/// Knobs for OCR orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Engine language hint set, e.g. "tha+eng".
    pub languages: String,
    /// Passes run in order; each may fail independently.
    pub passes: Vec<SegmentationPass>,
    pub merge: MergeStrategy,
    /// Per-pass time budget in seconds; 0 disables the watchdog.
    pub pass_timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        OcrConfig {
            languages: "tha+eng".to_string(),
            passes: vec![SegmentationPass { psm: 6 }, SegmentationPass { psm: 11 }],
            merge: MergeStrategy::Concat,
            pass_timeout_secs: 60,
        }
    }
}

/// Label tokens and domain constraints for the extraction cascade. Label
/// matching is case-insensitive; tokens are listed the way they appear on
/// the documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub date_labels: Vec<String>,
    pub invoice_labels: Vec<String>,
    /// Labels anchoring the pre-tax amount.
    pub amount_labels: Vec<String>,
    /// Labels anchoring the grand total and tax lines, read for the
    /// validator's cross-field check.
    pub total_labels: Vec<String>,
    pub tax_labels: Vec<String>,
    /// Identifier prefixes of the expected document family.
    pub invoice_prefixes: Vec<String>,
    pub invoice_digits_min: usize,
    pub invoice_digits_max: usize,
    /// Identifiers shorter than this are discarded as OCR fragments.
    pub invoice_min_len: usize,
    /// Amounts above this are discarded during cleansing.
    pub amount_ceiling: f64,
    /// Previously confirmed amounts, loaded as external data. Consulted
    /// only to break ties among already-plausible generic candidates.
    pub known_amounts: Vec<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig {
            date_labels: vec!["วันที่".to_string(), "date".to_string()],
            invoice_labels: vec![
                "เลขที่".to_string(),
                "invoice no".to_string(),
                "no.".to_string(),
            ],
            amount_labels: vec![
                "มูลค่าสินค้า".to_string(),
                "ก่อนภาษี".to_string(),
                "subtotal".to_string(),
            ],
            total_labels: vec![
                "จำนวนเงินรวมทั้งสิ้น".to_string(),
                "รวมทั้งสิ้น".to_string(),
                "total".to_string(),
            ],
            tax_labels: vec![
                "ภาษีมูลค่าเพิ่ม".to_string(),
                "vat".to_string(),
                "tax".to_string(),
            ],
            invoice_prefixes: vec!["HH".to_string()],
            invoice_digits_min: 6,
            invoice_digits_max: 8,
            invoice_min_len: 6,
            amount_ceiling: 50000.0,
            known_amounts: Vec::new(),
        }
    }
}

/// Semantic plausibility windows applied by the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Days a document date may sit in the future before rejection.
    pub max_future_days: i64,
    /// Retention horizon in days; older dates are implausible.
    pub max_age_days: i64,
    /// Amount range re-checked after cleansing.
    pub amount_ceiling: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            max_future_days: 7,
            max_age_days: 3650,
            amount_ceiling: 50000.0,
        }
    }
}

/// Everything the pipeline needs, passed in explicitly. There is no
/// ambient engine path or per-session cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub enhance: EnhanceConfig,
    pub ocr: OcrConfig,
    pub extract: ExtractConfig,
    pub validation: ValidationConfig,
    /// Worker pool size; 0 uses the number of available cores.
    pub workers: usize,
    /// Rasterization resolution requested from the rasterizer.
    pub dpi: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            enhance: EnhanceConfig::default(),
            ocr: OcrConfig::default(),
            extract: ExtractConfig::default(),
            validation: ValidationConfig::default(),
            workers: 0,
            dpi: 400,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, InvoiceError> {
        serde_json::from_str(json)
            .map_err(|e| InvoiceError::Config(format!("invalid pipeline config: {}", e)))
    }
}
