//! Document-to-text converters.
//!
//! Every converter yields one bounded text block: a header with format metadata and a body
//! limited by the token budget and the row or line cap, whichever is hit first.

pub mod budget;
pub mod csv_converter;
#[cfg(feature = "email")]
pub mod email_converter;
#[cfg(feature = "pdf")]
pub mod pdf_converter;
#[cfg(feature = "excel")]
pub mod spreadsheet_converter;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::services::token_estimator::estimate_tokens;
use crate::settings::DocumentLimits;

pub use budget::{TRUNCATION_MARKER, TextBudget, clip, omitted_note};
pub use csv_converter::CsvConverter;
#[cfg(feature = "email")]
pub use email_converter::EmailConverter;
#[cfg(feature = "pdf")]
pub use pdf_converter::PdfConverter;
#[cfg(feature = "excel")]
pub use spreadsheet_converter::SpreadsheetConverter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Spreadsheet,
    Csv,
    Pdf,
    Email,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 4] = [
        DocumentFormat::Spreadsheet,
        DocumentFormat::Csv,
        DocumentFormat::Pdf,
        DocumentFormat::Email,
    ];

    /// Name used in user-facing text ("Error parsing <label> file").
    pub fn label(self) -> &'static str {
        match self {
            DocumentFormat::Spreadsheet => "Excel",
            DocumentFormat::Csv => "CSV",
            DocumentFormat::Pdf => "PDF",
            DocumentFormat::Email => "email",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            DocumentFormat::Spreadsheet | DocumentFormat::Csv => "📊",
            DocumentFormat::Pdf => "📄",
            DocumentFormat::Email => "✉️",
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            DocumentFormat::Spreadsheet => &["xlsx", "xlsm", "xlsb", "xls", "ods"],
            DocumentFormat::Csv => &["csv", "tsv"],
            DocumentFormat::Pdf => &["pdf"],
            DocumentFormat::Email => &["eml"],
        }
    }

    pub fn mime_types(self) -> &'static [&'static str] {
        match self {
            DocumentFormat::Spreadsheet => &[
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "application/vnd.ms-excel",
                "application/vnd.ms-excel.sheet.macroenabled.12",
                "application/vnd.oasis.opendocument.spreadsheet",
            ],
            DocumentFormat::Csv => &["text/csv", "application/csv", "text/tab-separated-values"],
            DocumentFormat::Pdf => &["application/pdf"],
            DocumentFormat::Email => &["message/rfc822"],
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.extensions().contains(&extension.as_str()))
    }

    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let essence = mime_essence(mime_type);
        Self::ALL
            .into_iter()
            .find(|f| f.mime_types().contains(&essence.as_str()))
    }

    /// Extension first, declared MIME type second.
    pub fn detect(file_name: &str, mime_type: &str) -> Option<Self> {
        Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
            .or_else(|| Self::from_mime(mime_type))
    }
}

/// Lowercased MIME type without parameters.
pub(crate) fn mime_essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Format-specific counts, reported even when the body was truncated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentStats {
    Spreadsheet { sheets: usize, rows: usize },
    Csv { rows: usize, columns: usize },
    Pdf { pages: usize, lines: usize },
    Email { lines: usize, attachments: usize },
    /// Conversion failed; only the error text is available.
    Unavailable,
}

/// The bounded text produced for one uploaded document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentConversion {
    pub source_format: DocumentFormat,
    pub header: String,
    pub body: String,
    pub estimated_tokens: usize,
    pub truncated: bool,
    pub stats: DocumentStats,
}

impl DocumentConversion {
    pub fn new(
        source_format: DocumentFormat,
        header: String,
        body: String,
        truncated: bool,
        stats: DocumentStats,
    ) -> Self {
        let mut conversion = Self {
            source_format,
            header,
            body,
            estimated_tokens: 0,
            truncated,
            stats,
        };
        conversion.estimated_tokens = estimate_tokens(&conversion.extracted_text());
        conversion
    }

    /// Header plus "no valid data found" body for inputs without content.
    pub fn empty(source_format: DocumentFormat, header: String, stats: DocumentStats) -> Self {
        let body = format!("No valid data found in the {} file.", source_format.label());
        Self::new(source_format, header, body, false, stats)
    }

    /// Best-effort block standing in for a document that could not be parsed.
    pub fn failed(source_format: DocumentFormat, error: &ConversionError) -> Self {
        let body = format!("Error parsing {} file: {}", source_format.label(), error);
        Self::new(source_format, String::new(), body, false, DocumentStats::Unavailable)
    }

    pub fn is_failure(&self) -> bool {
        self.stats == DocumentStats::Unavailable
    }

    /// Text handed to the provider.
    pub fn extracted_text(&self) -> String {
        if self.header.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\n{}", self.header, self.body)
        }
    }
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Parse(String),

    #[error("support for {0} files is not enabled in this build")]
    Disabled(&'static str),
}

pub trait DocumentConverter {
    fn format(&self) -> DocumentFormat;

    fn convert(
        &self,
        path: &Path,
        limits: &DocumentLimits,
    ) -> Result<DocumentConversion, ConversionError>;
}

/// Convert the file at `path`. Never fails: parse errors become an error text block.
pub fn convert_document(
    format: DocumentFormat,
    path: &Path,
    limits: &DocumentLimits,
) -> DocumentConversion {
    let result = match format {
        DocumentFormat::Csv => CsvConverter.convert(path, limits),
        #[cfg(feature = "excel")]
        DocumentFormat::Spreadsheet => SpreadsheetConverter.convert(path, limits),
        #[cfg(not(feature = "excel"))]
        DocumentFormat::Spreadsheet => Err(ConversionError::Disabled("Excel")),
        #[cfg(feature = "pdf")]
        DocumentFormat::Pdf => PdfConverter.convert(path, limits),
        #[cfg(not(feature = "pdf"))]
        DocumentFormat::Pdf => Err(ConversionError::Disabled("PDF")),
        #[cfg(feature = "email")]
        DocumentFormat::Email => EmailConverter.convert(path, limits),
        #[cfg(not(feature = "email"))]
        DocumentFormat::Email => Err(ConversionError::Disabled("email")),
    };

    match result {
        Ok(conversion) => {
            debug!(
                format = format.label(),
                path = %path.display(),
                estimated_tokens = conversion.estimated_tokens,
                truncated = conversion.truncated,
                "Document converted"
            );
            conversion
        }
        Err(e) => {
            warn!(
                format = format.label(),
                path = %path.display(),
                error = %e,
                "Document conversion failed"
            );
            DocumentConversion::failed(format, &e)
        }
    }
}
