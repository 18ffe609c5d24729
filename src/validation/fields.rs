use chrono::{Duration, Local, NaiveDate};
use log::debug;

use crate::models::{ExtractionResult, FieldKind, Strategy, ValidationConfig, ValidationIssue};

pub struct FieldValidator;

impl FieldValidator {
    /// Validate a page's extracted fields for semantic plausibility.
    ///
    /// An implausible field is cleared and flagged for review, never
    /// silently corrected by guessing. The page confidence is recomputed
    /// from the fields that survive.
    pub fn validate(
        config: &ValidationConfig,
        result: ExtractionResult,
    ) -> (ExtractionResult, Vec<ValidationIssue>) {
        let today = Local::now().naive_local().date();
        Self::validate_as_of(config, result, today)
    }

    fn validate_as_of(
        config: &ValidationConfig,
        mut result: ExtractionResult,
        today: NaiveDate,
    ) -> (ExtractionResult, Vec<ValidationIssue>) {
        let mut issues = Vec::new();

        Self::apply_cross_check(config, &mut result);

        if let Some(date) = result.date.clone() {
            if Self::resolve_date(&date, today, config).is_none() {
                issues.push(ValidationIssue {
                    field: FieldKind::Date,
                    message: format!("date {} outside plausibility window", date),
                });
                result.date = None;
                result.provenance.remove(&FieldKind::Date);
            }
        }

        if let Some(amount) = result.amount.clone() {
            let plausible = amount
                .parse::<f64>()
                .map(|v| v > 0.0 && v <= config.amount_ceiling)
                .unwrap_or(false);
            if !plausible {
                issues.push(ValidationIssue {
                    field: FieldKind::Amount,
                    message: format!("amount {} outside plausibility range", amount),
                });
                result.amount = None;
                result.provenance.remove(&FieldKind::Amount);
            }
        }

        if let Some(invoice) = result.invoice_number.clone() {
            if invoice.is_empty() || !invoice.chars().all(|c| c.is_ascii_alphanumeric()) {
                issues.push(ValidationIssue {
                    field: FieldKind::InvoiceNumber,
                    message: format!("identifier {} has an implausible shape", invoice),
                });
                result.invoice_number = None;
                result.provenance.remove(&FieldKind::InvoiceNumber);
            }
        }

        // Recompute the capped score from surviving fields only.
        let score: u16 = result
            .provenance
            .values()
            .map(|p| p.strategy.weight() as u16)
            .sum();
        result.confidence = score.min(100) as u8;

        for issue in &issues {
            result.warnings.push(issue.message.clone());
        }
        (result, issues)
    }

    /// When both the grand total and the tax line were captured, their
    /// difference is a stronger signal for the pre-tax amount than a
    /// directly matched candidate; prefer it when it is itself plausible.
    fn apply_cross_check(config: &ValidationConfig, result: &mut ExtractionResult) {
        let (total, tax) = match (&result.grand_total, &result.tax_amount) {
            (Some(total), Some(tax)) => (total.clone(), tax.clone()),
            _ => return,
        };
        let (total, tax) = match (total.parse::<f64>(), tax.parse::<f64>()) {
            (Ok(t), Ok(x)) => (t, x),
            _ => return,
        };
        let derived = total - tax;
        if derived <= 0.0 || derived > config.amount_ceiling {
            return;
        }
        let derived = format!("{:.2}", derived);
        if result.amount.as_deref() == Some(derived.as_str()) {
            // Direct match and cross-check agree; keep the original
            // provenance.
            return;
        }
        if let Some(previous) = &result.amount {
            debug!("amount {} replaced by total-minus-tax {}", previous, derived);
            result
                .warnings
                .push(format!("amount {} replaced by total-minus-tax {}", previous, derived));
        }
        result.set_field(
            FieldKind::Amount,
            derived,
            Strategy::CrossCheck,
            "computed: grand total minus tax",
        );
    }

    /// Interpret a normalized d/m/y date against the plausibility window.
    ///
    /// Two-digit years are ambiguous on these documents (CE 20yy or a
    /// Thai Buddhist-era year); each admissible interpretation is tried
    /// and the first that lands inside the window wins. Full years above
    /// 2400 are Buddhist era written out.
    fn resolve_date(date: &str, today: NaiveDate, config: &ValidationConfig) -> Option<NaiveDate> {
        let parts: Vec<&str> = date.split('/').collect();
        if parts.len() != 3 {
            return None;
        }
        let day: u32 = parts[0].parse().ok()?;
        let month: u32 = parts[1].parse().ok()?;
        let year_raw: i32 = parts[2].parse().ok()?;

        let candidates: Vec<i32> = if parts[2].len() <= 2 {
            vec![2000 + year_raw, 2500 + year_raw - 543]
        } else if year_raw > 2400 {
            vec![year_raw - 543]
        } else {
            vec![year_raw]
        };

        let earliest = today - Duration::days(config.max_age_days);
        let latest = today + Duration::days(config.max_future_days);
        for year in candidates {
            if let Some(resolved) = NaiveDate::from_ymd_opt(year, month, day) {
                if resolved >= earliest && resolved <= latest {
                    return Some(resolved);
                }
            }
        }
        None
    }
}
