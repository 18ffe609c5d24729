// Invoice field extraction over scanned pages: enhancement, OCR,
// cascading extraction, validation and review-ready export rows.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use fattura::models::{CorrectionRecord, FinalRecord, PipelineConfig};
use fattura::pipeline::{SingleImageRasterizer, SpreadsheetWriter, TsvWriter};
use fattura::processing::{RecordAssembler, TesseractEngine};
use fattura::utils::InvoiceError;
use fattura::InvoicePipeline;

#[derive(Parser)]
#[command(
    name = "fattura",
    about = "Extract issue date, document identifier and pre-tax amount from scanned invoices"
)]
struct Cli {
    /// Scanned document image (PNG/JPEG)
    input: PathBuf,

    /// Pipeline configuration JSON; defaults cover the expected document
    /// family
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reviewer corrections JSON (array of per-page records)
    #[arg(long)]
    corrections: Option<PathBuf>,

    /// Write the export rows to this TSV file
    #[arg(long)]
    out: Option<PathBuf>,

    /// Worker pool size; 0 uses all cores
    #[arg(long)]
    workers: Option<usize>,
}

fn print_report(records: &[FinalRecord], warnings: &[(u32, Vec<String>)]) {
    println!("\n===============================================");
    println!("         INVOICE EXTRACTION REPORT");
    println!("===============================================\n");

    for record in records {
        println!("Page {}:", record.page_number);
        println!("  Date:        {}", record.date.as_deref().unwrap_or("(not found)"));
        println!(
            "  Identifier:  {}",
            record.invoice_number.as_deref().unwrap_or("(not found)")
        );
        println!(
            "  Amount:      {}",
            record.amount.as_deref().unwrap_or("(not found)")
        );
        println!("  Confidence:  {}%", record.confidence);
        if record.corrected {
            println!("  (includes reviewer corrections)");
        }
        println!();
    }

    let noisy: Vec<&(u32, Vec<String>)> = warnings.iter().filter(|(_, w)| !w.is_empty()).collect();
    if !noisy.is_empty() {
        println!("DIAGNOSTICS:");
        for (page, page_warnings) in noisy {
            for warning in page_warnings {
                println!("  - [page {}] {}", page, warning);
            }
        }
    }
}

fn load_corrections(path: &PathBuf) -> Result<HashMap<u32, CorrectionRecord>, InvoiceError> {
    let json = fs::read_to_string(path)
        .map_err(|e| InvoiceError::Io(format!("failed to read {}: {}", path.display(), e)))?;
    let records: Vec<CorrectionRecord> = serde_json::from_str(&json)
        .map_err(|e| InvoiceError::Config(format!("invalid corrections file: {}", e)))?;
    Ok(records.into_iter().map(|r| (r.page_number, r)).collect())
}

fn run(cli: Cli) -> Result<(), InvoiceError> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .map_err(|e| InvoiceError::Io(format!("failed to read {}: {}", path.display(), e)))?;
            PipelineConfig::from_json(&json)?
        }
        None => PipelineConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    let corrections = match &cli.corrections {
        Some(path) => load_corrections(path)?,
        None => HashMap::new(),
    };

    let document = fs::read(&cli.input)
        .map_err(|e| InvoiceError::Io(format!("failed to read {}: {}", cli.input.display(), e)))?;

    let pipeline = InvoicePipeline::new(config, Arc::new(TesseractEngine::new()))?;
    let run = pipeline.process_document(&SingleImageRasterizer, &document)?;

    let warnings: Vec<(u32, Vec<String>)> = run
        .results
        .iter()
        .map(|r| (r.page_number, r.warnings.clone()))
        .collect();
    let records = pipeline.finalize(run.results, &corrections);
    print_report(&records, &warnings);

    if let Some(out) = &cli.out {
        let rows = RecordAssembler::export_rows(&records);
        let writer = TsvWriter { path: out.clone() };
        writer.write(&rows)?;
        println!("Wrote {} row(s) to {}", rows.len(), out.display());
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}
