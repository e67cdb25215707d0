use std::path::Path;

use lopdf::Document;
use tracing::{debug, warn};

use super::budget::{TextBudget, clip};
use super::{
    ConversionError, DocumentConversion, DocumentConverter, DocumentFormat, DocumentStats,
};
use crate::settings::DocumentLimits;

pub struct PdfConverter;

impl DocumentConverter for PdfConverter {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }

    fn convert(
        &self,
        path: &Path,
        limits: &DocumentLimits,
    ) -> Result<DocumentConversion, ConversionError> {
        let bytes = std::fs::read(path)?;
        convert_pdf_bytes(&bytes, limits)
    }
}

/// Extraction stops once more lines than `limits.max_lines` are collected; later pages are
/// counted but never read.
pub fn convert_pdf_bytes(
    bytes: &[u8],
    limits: &DocumentLimits,
) -> Result<DocumentConversion, ConversionError> {
    let document = Document::load_mem(bytes).map_err(|e| ConversionError::Parse(e.to_string()))?;
    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();

    let mut pages = Vec::new();
    let mut collected = 0;
    for &number in &page_numbers {
        if collected > limits.max_lines {
            break;
        }
        let text = match document.extract_text(&[number]) {
            Ok(text) => text,
            Err(e) => {
                // Image-only or oddly encoded pages still count towards the page total.
                warn!(page = number, error = %e, "Could not extract text from PDF page");
                String::new()
            }
        };
        collected += text.lines().filter(|l| !l.trim().is_empty()).count();
        pages.push(text);
    }
    if pages.len() < page_numbers.len() {
        debug!(
            read = pages.len(),
            total = page_numbers.len(),
            "Stopped PDF extraction at the line cap"
        );
    }

    Ok(render_pages(&pages, page_numbers.len(), limits))
}

/// Render extracted page texts under "--- Page N ---" headings.
///
/// `total_pages` may exceed `pages.len()` when trailing pages were never read. The closing
/// note then counts pages rather than lines.
pub fn render_pages(
    pages: &[String],
    total_pages: usize,
    limits: &DocumentLimits,
) -> DocumentConversion {
    let page_lines: Vec<Vec<&str>> = pages
        .iter()
        .map(|text| text.lines().map(str::trim).filter(|l| !l.is_empty()).collect())
        .collect();
    let total_lines: usize = page_lines.iter().map(Vec::len).sum();
    let total_pages = total_pages.max(pages.len());

    let header = format!("Document type: PDF document\nPages: {total_pages}");
    let stats = DocumentStats::Pdf {
        pages: total_pages,
        lines: total_lines,
    };

    if total_lines == 0 {
        return DocumentConversion::empty(DocumentFormat::Pdf, header, stats);
    }

    let mut budget = TextBudget::new(limits.token_budget, &header);
    let mut shown = 0;
    let mut complete_pages = 0;
    'pages: for (index, lines) in page_lines.iter().enumerate() {
        if !lines.is_empty() {
            if shown == limits.max_lines || !budget.push(format!("--- Page {} ---", index + 1)) {
                break;
            }
            for line in lines {
                if shown == limits.max_lines || !budget.push(clip(line, limits.line_chars)) {
                    break 'pages;
                }
                shown += 1;
            }
        }
        complete_pages = index + 1;
    }

    let (body, truncated) = if pages.len() < total_pages {
        budget.finish(total_pages - complete_pages, "pages")
    } else {
        budget.finish(total_lines - shown, "lines")
    };

    DocumentConversion::new(DocumentFormat::Pdf, header, body, truncated, stats)
}
