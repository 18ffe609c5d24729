use std::collections::HashMap;

use log::debug;

use crate::models::{CorrectionRecord, ExportRow, ExtractionResult, FinalRecord};

pub struct RecordAssembler;

impl RecordAssembler {
    /// Merge fresh extraction with stored human corrections, field by
    /// field: a non-empty correction field always wins, an empty one
    /// leaves the extracted value in place. Output is sorted by page
    /// number regardless of the order pages finished processing.
    pub fn assemble(
        results: Vec<ExtractionResult>,
        corrections: &HashMap<u32, CorrectionRecord>,
    ) -> Vec<FinalRecord> {
        let mut records: Vec<FinalRecord> = results
            .into_iter()
            .map(|result| {
                let correction = corrections.get(&result.page_number);
                Self::merge(result, correction)
            })
            .collect();
        records.sort_by_key(|r| r.page_number);
        records
    }

    /// Fixed-shape export rows (sequence, date, identifier, amount) for
    /// the spreadsheet writer. Sequence numbers are 1-based and assigned
    /// after sorting.
    pub fn export_rows(records: &[FinalRecord]) -> Vec<ExportRow> {
        records
            .iter()
            .enumerate()
            .map(|(idx, record)| ExportRow {
                sequence: idx + 1,
                date: record.date.clone().unwrap_or_default(),
                invoice_number: record.invoice_number.clone().unwrap_or_default(),
                amount: record.amount.clone().unwrap_or_default(),
            })
            .collect()
    }

    fn merge(result: ExtractionResult, correction: Option<&CorrectionRecord>) -> FinalRecord {
        let mut corrected = false;
        let (date, invoice_number, amount) = match correction {
            Some(c) => {
                debug!("applying stored correction for page {}", result.page_number);
                (
                    Self::pick(&c.date, result.date, &mut corrected),
                    Self::pick(&c.invoice_number, result.invoice_number, &mut corrected),
                    Self::pick(&c.amount, result.amount, &mut corrected),
                )
            }
            None => (result.date, result.invoice_number, result.amount),
        };
        FinalRecord {
            page_number: result.page_number,
            date,
            invoice_number,
            amount,
            confidence: result.confidence,
            corrected,
        }
    }

    fn pick(
        correction: &Option<String>,
        extracted: Option<String>,
        corrected: &mut bool,
    ) -> Option<String> {
        match correction {
            Some(value) if !value.trim().is_empty() => {
                *corrected = true;
                Some(value.clone())
            }
            _ => extracted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(page: u32, amount: Option<&str>) -> ExtractionResult {
        ExtractionResult {
            page_number: page,
            amount: amount.map(str::to_string),
            invoice_number: Some(format!("HH680047{}", page)),
            date: Some("07/08/68".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_output_is_sorted_regardless_of_completion_order() {
        let results = vec![
            result(3, Some("3.00")),
            result(1, Some("1.00")),
            result(2, Some("2.00")),
        ];
        let records = RecordAssembler::assemble(results, &HashMap::new());
        let pages: Vec<u32> = records.iter().map(|r| r.page_number).collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }

    #[test]
    fn test_correction_overrides_field_granular() {
        let mut corrections = HashMap::new();
        corrections.insert(
            2,
            CorrectionRecord {
                page_number: 2,
                amount: Some("555.00".to_string()),
                ..Default::default()
            },
        );
        let records = RecordAssembler::assemble(
            vec![result(2, Some("2.00")), result(1, Some("1.00"))],
            &corrections,
        );
        assert_eq!(records[1].amount.as_deref(), Some("555.00"));
        assert!(records[1].corrected);
        // Fields the reviewer left alone keep the extracted values.
        assert_eq!(records[1].invoice_number.as_deref(), Some("HH6800472"));
        assert_eq!(records[1].date.as_deref(), Some("07/08/68"));
        assert!(!records[0].corrected);
    }

    #[test]
    fn test_blank_correction_field_does_not_erase_extraction() {
        let mut corrections = HashMap::new();
        corrections.insert(
            1,
            CorrectionRecord {
                page_number: 1,
                amount: Some("   ".to_string()),
                ..Default::default()
            },
        );
        let records = RecordAssembler::assemble(vec![result(1, Some("1.00"))], &corrections);
        assert_eq!(records[0].amount.as_deref(), Some("1.00"));
        assert!(!records[0].corrected);
    }

    #[test]
    fn test_export_rows_have_fixed_shape_and_sequence() {
        let records = RecordAssembler::assemble(
            vec![result(2, None), result(1, Some("1.00"))],
            &HashMap::new(),
        );
        let rows = RecordAssembler::export_rows(&records);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sequence, 1);
        assert_eq!(rows[0].amount, "1.00");
        assert_eq!(rows[1].sequence, 2);
        // A missing field exports as an empty cell, ready for review.
        assert_eq!(rows[1].amount, "");
    }
}
