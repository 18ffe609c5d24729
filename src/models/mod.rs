pub mod config;
pub mod data;

pub use config::{
    Binarization, Denoise, EnhanceConfig, ExtractConfig, MergeStrategy, OcrConfig, PipelineConfig,
    SegmentationPass, ValidationConfig,
};
pub use data::{
    CorrectionRecord, ExportRow, ExtractionResult, FieldKind, FinalRecord, Page, Provenance,
    Strategy, ValidationIssue,
};
