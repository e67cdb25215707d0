use std::path::Path;

use calamine::{Data, Range, Reader, open_workbook_auto};

use super::budget::{TextBudget, clip};
use super::{ConversionError, DocumentConversion, DocumentConverter, DocumentFormat, DocumentStats};
use crate::settings::DocumentLimits;

pub struct SpreadsheetConverter;

impl DocumentConverter for SpreadsheetConverter {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Spreadsheet
    }

    fn convert(
        &self,
        path: &Path,
        limits: &DocumentLimits,
    ) -> Result<DocumentConversion, ConversionError> {
        let mut workbook =
            open_workbook_auto(path).map_err(|e| ConversionError::Parse(e.to_string()))?;

        // The row cap applies to the whole workbook, so later sheets get what is left.
        let mut remaining = limits.max_rows;
        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| ConversionError::Parse(format!("sheet '{name}': {e}")))?;
            let sheet = SheetData::from_range(name, &range, remaining, limits);
            remaining -= sheet.rows.len();
            sheets.push(sheet);
        }

        Ok(render_workbook(&sheets, limits))
    }
}

/// One worksheet: true counts plus the rows selected for rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SheetData {
    pub name: String,
    /// Non-empty rows in the sheet.
    pub row_count: usize,
    pub column_count: usize,
    /// Rendered "Row N: ..." lines, at most the caller's row allowance.
    pub rows: Vec<String>,
}

impl SheetData {
    fn from_range(
        name: String,
        range: &Range<Data>,
        allowance: usize,
        limits: &DocumentLimits,
    ) -> Self {
        let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);

        let mut row_count = 0;
        let mut rows = Vec::new();
        for (offset, cells) in range.rows().enumerate() {
            let values: Vec<String> = cells.iter().map(cell_text).collect();
            if values.iter().all(|v| v.trim().is_empty()) {
                continue;
            }
            row_count += 1;
            if rows.len() < allowance {
                rows.push(render_row(first_row + offset + 1, &values, limits));
            }
        }

        Self {
            name,
            row_count,
            column_count: if row_count == 0 { 0 } else { range.width() },
            rows,
        }
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// `number` is the 1-based row number as shown by spreadsheet applications.
pub fn render_row(number: usize, values: &[String], limits: &DocumentLimits) -> String {
    let width = values
        .iter()
        .rposition(|v| !v.trim().is_empty())
        .map_or(0, |last| last + 1);

    let mut line = format!(
        "Row {number}: {}",
        values[..width]
            .iter()
            .take(limits.max_columns)
            .map(|v| clip(v, limits.cell_chars))
            .collect::<Vec<_>>()
            .join(" | ")
    );
    if width > limits.max_columns {
        line.push_str(&format!(" (+{} more columns)", width - limits.max_columns));
    }
    line
}

pub fn render_workbook(sheets: &[SheetData], limits: &DocumentLimits) -> DocumentConversion {
    let total_rows: usize = sheets.iter().map(|s| s.row_count).sum();
    let header = format!(
        "Document type: Excel workbook\nSheets: {}\nTotal rows: {}",
        sheets.len(),
        total_rows
    );
    let stats = DocumentStats::Spreadsheet {
        sheets: sheets.len(),
        rows: total_rows,
    };

    if total_rows == 0 {
        return DocumentConversion::empty(DocumentFormat::Spreadsheet, header, stats);
    }

    let mut budget = TextBudget::new(limits.token_budget, &header);
    let mut shown = 0;
    'sheets: for sheet in sheets {
        let heading = format!(
            "=== Sheet: {} ({} rows, {} columns) ===",
            clip(&sheet.name, limits.line_chars),
            sheet.row_count,
            sheet.column_count
        );
        if !budget.push(heading) {
            break;
        }
        if sheet.row_count == 0 {
            if !budget.push("(empty sheet)") {
                break;
            }
            continue;
        }
        for row in &sheet.rows {
            if !budget.push(row.as_str()) {
                break 'sheets;
            }
            shown += 1;
        }
    }
    let (body, truncated) = budget.finish(total_rows - shown, "rows");

    DocumentConversion::new(DocumentFormat::Spreadsheet, header, body, truncated, stats)
}
