use std::collections::HashMap;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// The three target fields extracted from every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Date,
    InvoiceNumber,
    Amount,
}

/// Extraction strategies, ordered by trust. The cascade tries them in this
/// order per field; the weight is the confidence contribution awarded when
/// a strategy produces the accepted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Field shape matched on a line that carries a known label token.
    LabeledLine,
    /// Label present somewhere in the text, shape matched over the whole
    /// blob. Handles OCR splitting label and value onto different lines.
    LabeledBlock,
    /// Value derived from two other fields (total minus tax). Awarded by
    /// the validator, never by the cascade itself.
    CrossCheck,
    /// Shape constrained to the expected document family (fixed prefixes,
    /// bounded month literals, grouped digits).
    DomainShape,
    /// Bare field shape, no context required.
    GenericShape,
    /// Deterministic tie-break among several generic candidates.
    PlausibleSelect,
}

impl Strategy {
    pub fn weight(self) -> u8 {
        match self {
            Strategy::LabeledLine => 30,
            Strategy::LabeledBlock => 28,
            Strategy::CrossCheck => 25,
            Strategy::DomainShape => 20,
            Strategy::GenericShape => 12,
            Strategy::PlausibleSelect => 8,
        }
    }
}

/// Which strategy produced a field value, and the source line it matched
/// on. Kept for diagnostics and human review of low-confidence pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub strategy: Strategy,
    pub line: String,
}

/// One rasterized page and everything recognition produced for it.
/// Populated once during processing; re-processing builds a new `Page`.
#[derive(Debug, Clone)]
pub struct Page {
    pub page_number: u32,
    pub raw_image: DynamicImage,
    pub enhanced_image: Option<DynamicImage>,
    pub ocr_text_variants: Vec<String>,
}

/// Fresh machine extraction for one page.
///
/// Absent fields are a normal terminal state routed to human review, not
/// an error. `grand_total` and `tax_amount` are auxiliary candidates read
/// off their label lines; the validator uses their difference as a
/// stronger signal for the pre-tax amount when both are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub page_number: u32,
    pub date: Option<String>,
    pub invoice_number: Option<String>,
    pub amount: Option<String>,
    /// Page-level trust score in 0..=100.
    pub confidence: u8,
    pub provenance: HashMap<FieldKind, Provenance>,
    pub grand_total: Option<String>,
    pub tax_amount: Option<String>,
    /// Recovered errors and validator notes, kept for review.
    pub warnings: Vec<String>,
}

impl ExtractionResult {
    pub fn empty(page_number: u32) -> Self {
        ExtractionResult {
            page_number,
            ..Default::default()
        }
    }

    /// Record a field value together with its provenance and add the
    /// strategy weight to the page score, capped at 100.
    pub fn set_field(&mut self, field: FieldKind, value: String, strategy: Strategy, line: &str) {
        match field {
            FieldKind::Date => self.date = Some(value),
            FieldKind::InvoiceNumber => self.invoice_number = Some(value),
            FieldKind::Amount => self.amount = Some(value),
        }
        self.provenance.insert(
            field,
            Provenance {
                strategy,
                line: line.trim().to_string(),
            },
        );
        self.confidence = (self.confidence as u16 + strategy.weight() as u16).min(100) as u8;
    }
}

/// Human correction for one page, keyed by page number. Non-empty fields
/// supersede extraction unconditionally at assembly time; fields left
/// empty by the reviewer keep the extracted value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub page_number: u32,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
}

/// Per-page output after merging extraction with corrections. Always
/// emitted sorted by `page_number` ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalRecord {
    pub page_number: u32,
    pub date: Option<String>,
    pub invoice_number: Option<String>,
    pub amount: Option<String>,
    pub confidence: u8,
    /// True when at least one field came from a human correction.
    pub corrected: bool,
}

/// Fixed 4-column row handed to the spreadsheet writer:
/// sequence, date, identifier, amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub sequence: usize,
    pub date: String,
    pub invoice_number: String,
    pub amount: String,
}

/// A field the validator rejected as semantically implausible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: FieldKind,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_accumulates_and_caps() {
        let mut result = ExtractionResult::empty(1);
        result.set_field(
            FieldKind::Date,
            "07/08/68".to_string(),
            Strategy::LabeledLine,
            "date 07/08/68",
        );
        result.set_field(
            FieldKind::InvoiceNumber,
            "HH6800470".to_string(),
            Strategy::LabeledLine,
            "no. HH6800470",
        );
        result.set_field(
            FieldKind::Amount,
            "1234.50".to_string(),
            Strategy::LabeledLine,
            "subtotal 1,234.50",
        );
        assert_eq!(result.confidence, 90);

        // Re-awarding must never push past the cap.
        result.set_field(
            FieldKind::Amount,
            "1234.50".to_string(),
            Strategy::LabeledLine,
            "subtotal 1,234.50",
        );
        assert_eq!(result.confidence, 100);
    }

    #[test]
    fn test_labeled_outranks_generic() {
        assert!(Strategy::LabeledLine.weight() > Strategy::GenericShape.weight());
        assert!(Strategy::LabeledBlock.weight() > Strategy::GenericShape.weight());
        assert!(Strategy::DomainShape.weight() > Strategy::GenericShape.weight());
        assert!(Strategy::GenericShape.weight() > Strategy::PlausibleSelect.weight());
    }
}
