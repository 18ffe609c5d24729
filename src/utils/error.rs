use thiserror::Error;

/// Error taxonomy for the extraction pipeline.
///
/// Only rasterization and export are allowed to abort a run; every other
/// variant is contained to the page, pass or step that produced it and is
/// surfaced as a per-page warning instead of propagating.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("rasterization error: {0}")]
    Rasterization(String),

    #[error("OCR engine error: {0}")]
    OcrEngine(String),

    #[error("image processing error: {0}")]
    ImageProcessing(String),

    #[error("export error: {0}")]
    Export(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl InvoiceError {
    /// Whether this error may abort the whole document run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            InvoiceError::Rasterization(_) | InvoiceError::Export(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(InvoiceError::Rasterization("bad pdf".to_string()).is_fatal());
        assert!(InvoiceError::Export("disk full".to_string()).is_fatal());
        assert!(!InvoiceError::OcrEngine("pass failed".to_string()).is_fatal());
        assert!(!InvoiceError::ImageProcessing("resize".to_string()).is_fatal());
    }
}
