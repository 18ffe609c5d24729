pub mod assemble;
pub mod extract;
pub mod image;
pub mod ocr;

pub use assemble::RecordAssembler;
pub use extract::FieldExtractor;
pub use image::ImageEnhancer;
pub use ocr::{OcrEngine, OcrOrchestrator, OcrOutcome, OcrPass, TesseractEngine};
