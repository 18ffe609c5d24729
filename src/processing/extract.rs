use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::models::{ExtractConfig, ExtractionResult, FieldKind, Strategy};
use crate::utils::InvoiceError;

lazy_static! {
    // Day/month/year triples with the separators OCR typically yields.
    static ref DATE_SHAPES: Vec<Regex> = vec![
        Regex::new(r"(\d{1,2}/\d{1,2}/\d{2,4})").unwrap(),
        Regex::new(r"(\d{1,2}-\d{1,2}-\d{2,4})").unwrap(),
        Regex::new(r"(\d{1,2}\.\d{1,2}\.\d{2,4})").unwrap(),
    ];

    // Date with a real month literal, used to pick a date out of numeric
    // noise when no label is anywhere near it.
    static ref DATE_DOMAIN: Regex =
        Regex::new(r"\b(\d{1,2}[/.\-](?:0?[1-9]|1[0-2])[/.\-](?:\d{4}|\d{2}))\b").unwrap();

    // Bare identifier run: short alpha prefix and a digit block.
    static ref INVOICE_GENERIC: Regex = Regex::new(r"\b([A-Z]{1,4} ?\d{4,10})\b").unwrap();

    // Two-decimal money value, optional grouping separators. The sign is
    // captured so cleansing can reject negatives instead of silently
    // reading them as positive.
    static ref AMOUNT_SHAPE: Regex = Regex::new(r"(-?[0-9][0-9,]*\.\d{2})").unwrap();

    // Money value with proper thousands grouping, the way the expected
    // document family prints amounts.
    static ref AMOUNT_DOMAIN: Regex = Regex::new(r"\b(\d{1,3}(?:,\d{3})+\.\d{2})\b").unwrap();
}

/// Cascade priority order. A generic match must never override a
/// label-scoped one, so the order here is the whole correctness story.
const CASCADE: [Strategy; 5] = [
    Strategy::LabeledLine,
    Strategy::LabeledBlock,
    Strategy::DomainShape,
    Strategy::GenericShape,
    Strategy::PlausibleSelect,
];

struct Candidate {
    value: String,
    line: String,
}

/// Runs the per-field strategy cascade over merged OCR text.
///
/// Label alternations are compiled once from configuration; the pure shape
/// patterns live in the static tables above. Every rejection inside a
/// strategy is discard-and-continue: a candidate that fails cleansing
/// falls through to the next strategy instead of aborting the field.
pub struct FieldExtractor {
    invoice_min_len: usize,
    amount_ceiling: f64,
    known_amounts: Vec<String>,
    date_label: Regex,
    date_block: Regex,
    invoice_label: Regex,
    invoice_value: Regex,
    invoice_domain: Regex,
    amount_label: Regex,
    amount_block: Regex,
    total_label: Regex,
    total_block: Regex,
    tax_label: Regex,
    tax_block: Regex,
}

impl FieldExtractor {
    pub fn new(config: &ExtractConfig) -> Result<Self, InvoiceError> {
        let date_labels = label_alternation(&config.date_labels);
        let invoice_labels = label_alternation(&config.invoice_labels);
        let amount_labels = label_alternation(&config.amount_labels);
        let total_labels = label_alternation(&config.total_labels);
        let tax_labels = label_alternation(&config.tax_labels);
        let prefixes = prefix_alternation(&config.invoice_prefixes);

        Ok(FieldExtractor {
            invoice_min_len: config.invoice_min_len,
            amount_ceiling: config.amount_ceiling,
            known_amounts: config.known_amounts.clone(),
            date_label: compile(&format!("(?i:{})", date_labels))?,
            date_block: compile(&format!(
                r"(?s)(?i:{}).{{0,120}}?(\d{{1,2}}[/.\-]\d{{1,2}}[/.\-]\d{{2,4}})",
                date_labels
            ))?,
            invoice_label: compile(&format!("(?i:{})", invoice_labels))?,
            invoice_value: compile(&format!(
                r"(?s)(?i:{})\s*[:#.]?\s*([A-Z0-9](?:[ \-]?[A-Z0-9]){{4,14}})",
                invoice_labels
            ))?,
            invoice_domain: compile(&format!(
                r"\b((?:{}) ?\d{{{},{}}})\b",
                prefixes, config.invoice_digits_min, config.invoice_digits_max
            ))?,
            amount_label: compile(&format!("(?i:{})", amount_labels))?,
            amount_block: compile(&format!(
                r"(?s)(?i:{}).{{0,160}}?(-?[0-9][0-9,]*\.\d{{2}})",
                amount_labels
            ))?,
            total_label: compile(&format!("(?i:{})", total_labels))?,
            total_block: compile(&format!(
                r"(?s)(?i:{}).{{0,160}}?(-?[0-9][0-9,]*\.\d{{2}})",
                total_labels
            ))?,
            tax_label: compile(&format!("(?i:{})", tax_labels))?,
            tax_block: compile(&format!(
                r"(?s)(?i:{}).{{0,160}}?(-?[0-9][0-9,]*\.\d{{2}})",
                tax_labels
            ))?,
        })
    }

    /// Extract all target fields from one page's merged OCR text. Empty
    /// text yields an empty result; missing fields are not errors.
    pub fn extract(&self, page_number: u32, text: &str) -> ExtractionResult {
        let mut result = ExtractionResult::empty(page_number);
        if text.trim().is_empty() {
            return result;
        }
        for field in [FieldKind::Date, FieldKind::InvoiceNumber, FieldKind::Amount] {
            if let Some((candidate, strategy)) = self.run_cascade(field, text) {
                debug!(
                    "page {}: {:?} resolved via {:?} ({})",
                    page_number, field, strategy, candidate.value
                );
                result.set_field(field, candidate.value, strategy, &candidate.line);
            }
        }
        result.grand_total = self.labeled_amount(text, &self.total_label, &self.total_block);
        result.tax_amount = self.labeled_amount(text, &self.tax_label, &self.tax_block);
        result
    }

    fn run_cascade(&self, field: FieldKind, text: &str) -> Option<(Candidate, Strategy)> {
        for strategy in CASCADE {
            if let Some(candidate) = self.attempt(field, strategy, text) {
                return Some((candidate, strategy));
            }
        }
        None
    }

    fn attempt(&self, field: FieldKind, strategy: Strategy, text: &str) -> Option<Candidate> {
        match field {
            FieldKind::Date => self.attempt_date(strategy, text),
            FieldKind::InvoiceNumber => self.attempt_invoice(strategy, text),
            FieldKind::Amount => self.attempt_amount(strategy, text),
        }
    }

    fn attempt_date(&self, strategy: Strategy, text: &str) -> Option<Candidate> {
        match strategy {
            Strategy::LabeledLine => {
                for line in text.lines() {
                    if !self.date_label.is_match(line) {
                        continue;
                    }
                    if let Some((raw, _)) = first_date_shape(line) {
                        return Some(Candidate {
                            value: normalize_date(raw),
                            line: line.to_string(),
                        });
                    }
                }
                None
            }
            Strategy::LabeledBlock => {
                first_cleaned(&self.date_block, text, |raw| Some(normalize_date(raw)))
                    .map(|(value, offset)| candidate_at(text, value, offset))
            }
            Strategy::DomainShape => {
                first_cleaned(&DATE_DOMAIN, text, |raw| Some(normalize_date(raw)))
                    .map(|(value, offset)| candidate_at(text, value, offset))
            }
            Strategy::GenericShape => first_date_shape(text).map(|(raw, offset)| Candidate {
                value: normalize_date(raw),
                line: line_at(text, offset).to_string(),
            }),
            Strategy::PlausibleSelect | Strategy::CrossCheck => None,
        }
    }

    fn attempt_invoice(&self, strategy: Strategy, text: &str) -> Option<Candidate> {
        match strategy {
            Strategy::LabeledLine => {
                for line in text.lines() {
                    if !self.invoice_label.is_match(line) {
                        continue;
                    }
                    if let Some((value, _)) =
                        first_cleaned(&self.invoice_value, line, |raw| self.clean_invoice(raw))
                    {
                        return Some(Candidate {
                            value,
                            line: line.to_string(),
                        });
                    }
                }
                None
            }
            Strategy::LabeledBlock => {
                first_cleaned(&self.invoice_value, text, |raw| self.clean_invoice(raw))
                    .map(|(value, offset)| candidate_at(text, value, offset))
            }
            Strategy::DomainShape => {
                first_cleaned(&self.invoice_domain, text, |raw| self.clean_invoice(raw))
                    .map(|(value, offset)| candidate_at(text, value, offset))
            }
            Strategy::GenericShape => {
                first_cleaned(&INVOICE_GENERIC, text, |raw| self.clean_invoice(raw))
                    .map(|(value, offset)| candidate_at(text, value, offset))
            }
            Strategy::PlausibleSelect | Strategy::CrossCheck => None,
        }
    }

    fn attempt_amount(&self, strategy: Strategy, text: &str) -> Option<Candidate> {
        match strategy {
            Strategy::LabeledLine => {
                for line in text.lines() {
                    let label = match self.amount_label.find(line) {
                        Some(m) => m,
                        None => continue,
                    };
                    let tail = &line[label.end()..];
                    for caps in AMOUNT_SHAPE.captures_iter(tail) {
                        if let Some(value) = self.clean_amount(&caps[1]) {
                            return Some(Candidate {
                                value,
                                line: line.to_string(),
                            });
                        }
                    }
                }
                None
            }
            Strategy::LabeledBlock => {
                first_cleaned(&self.amount_block, text, |raw| self.clean_amount(raw))
                    .map(|(value, offset)| candidate_at(text, value, offset))
            }
            Strategy::DomainShape => {
                first_cleaned(&AMOUNT_DOMAIN, text, |raw| self.clean_amount(raw))
                    .map(|(value, offset)| candidate_at(text, value, offset))
            }
            Strategy::GenericShape => {
                let candidates = self.generic_amounts(text);
                match candidates.as_slice() {
                    [(value, offset)] => Some(candidate_at(text, value.clone(), *offset)),
                    _ => None,
                }
            }
            Strategy::PlausibleSelect => {
                // Several plausible candidates: prefer a previously
                // confirmed amount, otherwise the first in document order
                // (never the largest, which tends to be an unrelated
                // total).
                let candidates = self.generic_amounts(text);
                if candidates.len() < 2 {
                    return None;
                }
                let chosen = candidates
                    .iter()
                    .find(|(value, _)| self.known_amounts.iter().any(|k| k == value))
                    .or_else(|| candidates.first())?;
                Some(candidate_at(text, chosen.0.clone(), chosen.1))
            }
            Strategy::CrossCheck => None,
        }
    }

    /// All bare amount candidates that survive cleansing, with offsets, in
    /// document order.
    fn generic_amounts(&self, text: &str) -> Vec<(String, usize)> {
        AMOUNT_SHAPE
            .captures_iter(text)
            .filter_map(|caps| {
                let m = caps.get(1)?;
                self.clean_amount(m.as_str()).map(|v| (v, m.start()))
            })
            .collect()
    }

    /// Auxiliary label-scoped amount (grand total / tax), line scope
    /// first, then block scope. No confidence weight is awarded here.
    fn labeled_amount(&self, text: &str, label: &Regex, block: &Regex) -> Option<String> {
        for line in text.lines() {
            if let Some(m) = label.find(line) {
                let tail = &line[m.end()..];
                for caps in AMOUNT_SHAPE.captures_iter(tail) {
                    if let Some(value) = self.clean_amount(&caps[1]) {
                        return Some(value);
                    }
                }
            }
        }
        if let Some((value, _)) = first_cleaned(block, text, |raw| self.clean_amount(raw)) {
            return Some(value);
        }
        None
    }

    /// Strip grouping separators and canonicalize to two decimals.
    /// Rejects non-positive values and values above the ceiling.
    /// Idempotent: feeding the output back in reproduces it.
    pub fn clean_amount(&self, raw: &str) -> Option<String> {
        let value: f64 = raw.replace(',', "").parse().ok()?;
        if value <= 0.0 || value > self.amount_ceiling {
            return None;
        }
        Some(format!("{:.2}", value))
    }

    /// Strip OCR-introduced whitespace and separators from an identifier.
    /// Rejects fragments shorter than the configured minimum or without
    /// any digits.
    fn clean_invoice(&self, raw: &str) -> Option<String> {
        let value: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase();
        if value.len() < self.invoice_min_len {
            return None;
        }
        if !value.chars().any(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(value)
    }
}

/// Unify date separators to the canonical `/`. Calendar interpretation
/// belongs to validation, not here.
pub fn normalize_date(raw: &str) -> String {
    raw.replace('-', "/").replace('.', "/")
}

fn first_date_shape(text: &str) -> Option<(&str, usize)> {
    for pattern in DATE_SHAPES.iter() {
        if let Some(m) = pattern.captures(text).and_then(|caps| caps.get(1)) {
            return Some((m.as_str(), m.start()));
        }
    }
    None
}

/// First capture (group 1) in `text` whose cleansed form is accepted,
/// with its byte offset. Rejected captures are skipped, not fatal.
fn first_cleaned<F>(pattern: &Regex, text: &str, clean: F) -> Option<(String, usize)>
where
    F: Fn(&str) -> Option<String>,
{
    for caps in pattern.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            if let Some(value) = clean(m.as_str()) {
                return Some((value, m.start()));
            }
        }
    }
    None
}

fn candidate_at(text: &str, value: String, offset: usize) -> Candidate {
    Candidate {
        value,
        line: line_at(text, offset).to_string(),
    }
}

/// The full line containing the given byte offset.
fn line_at(text: &str, offset: usize) -> &str {
    let start = text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(text.len());
    &text[start..end]
}

fn compile(pattern: &str) -> Result<Regex, InvoiceError> {
    Regex::new(pattern)
        .map_err(|e| InvoiceError::Config(format!("bad extraction pattern {}: {}", pattern, e)))
}

/// Escaped alternation of label tokens. ASCII-leading tokens get a word
/// boundary so "total" does not fire inside "subtotal"; Thai tokens are
/// left bare because their neighbors are word characters to the regex
/// engine. An empty list compiles to a never-matching pattern.
fn label_alternation(labels: &[String]) -> String {
    let parts: Vec<String> = labels
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| {
            let escaped = regex::escape(l);
            if l.chars().next().map_or(false, |c| c.is_ascii_alphanumeric()) {
                format!(r"\b{}", escaped)
            } else {
                escaped
            }
        })
        .collect();
    if parts.is_empty() {
        // Never matches.
        "a^a".to_string()
    } else {
        parts.join("|")
    }
}

fn prefix_alternation(prefixes: &[String]) -> String {
    let parts: Vec<String> = prefixes
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(regex::escape)
        .collect();
    if parts.is_empty() {
        "a^a".to_string()
    } else {
        parts.join("|")
    }
}
