use std::path::Path;

use super::budget::{TextBudget, clip};
use super::{ConversionError, DocumentConversion, DocumentConverter, DocumentFormat, DocumentStats};
use crate::settings::DocumentLimits;

const CANDIDATE_DELIMITERS: [u8; 3] = [b',', b';', b'\t'];

pub struct CsvConverter;

impl DocumentConverter for CsvConverter {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Csv
    }

    fn convert(
        &self,
        path: &Path,
        limits: &DocumentLimits,
    ) -> Result<DocumentConversion, ConversionError> {
        let bytes = std::fs::read(path)?;
        convert_csv_bytes(&bytes, limits)
    }
}

/// Delimiter that occurs most often on the first line. Ties and misses go to the comma.
pub fn sniff_delimiter(data: &[u8]) -> u8 {
    let first_line = data.split(|&b| b == b'\n').next().unwrap_or_default();

    let mut best = b',';
    let mut best_count = 0;
    for delimiter in CANDIDATE_DELIMITERS {
        let count = first_line.iter().filter(|&&b| b == delimiter).count();
        if count > best_count {
            best = delimiter;
            best_count = count;
        }
    }
    best
}

/// The first non-blank record names the columns; every later record is a data row.
pub fn convert_csv_bytes(
    data: &[u8],
    limits: &DocumentLimits,
) -> Result<DocumentConversion, ConversionError> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(data))
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut columns: Option<Vec<String>> = None;
    let mut rendered: Vec<String> = Vec::new();
    let mut total_rows = 0usize;

    for record in reader.byte_records() {
        let record = record.map_err(|e| ConversionError::Parse(e.to_string()))?;
        let cells: Vec<String> = record
            .iter()
            .map(|field| String::from_utf8_lossy(field).into_owned())
            .collect();
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        if columns.is_none() {
            columns = Some(cells);
            continue;
        }

        total_rows += 1;
        // Rows past the cap are only counted.
        if rendered.len() < limits.max_rows {
            rendered.push(render_row(total_rows, &cells, limits));
        }
    }

    let columns = columns.unwrap_or_default();
    let mut header = format!("Document type: CSV file\nRows: {total_rows}");
    if !columns.is_empty() {
        header.push_str(&format!(
            "\nColumns ({}): {}",
            columns.len(),
            render_cells(&columns, limits)
        ));
    }
    let stats = DocumentStats::Csv {
        rows: total_rows,
        columns: columns.len(),
    };

    if total_rows == 0 {
        return Ok(DocumentConversion::empty(DocumentFormat::Csv, header, stats));
    }

    let mut budget = TextBudget::new(limits.token_budget, &header);
    let mut shown = 0;
    for line in rendered {
        if !budget.push(line) {
            break;
        }
        shown += 1;
    }
    let (body, truncated) = budget.finish(total_rows - shown, "rows");

    Ok(DocumentConversion::new(
        DocumentFormat::Csv,
        header,
        body,
        truncated,
        stats,
    ))
}

fn render_row(number: usize, cells: &[String], limits: &DocumentLimits) -> String {
    format!("Row {number}: {}", render_cells(cells, limits))
}

fn render_cells(cells: &[String], limits: &DocumentLimits) -> String {
    let mut line = cells
        .iter()
        .take(limits.max_columns)
        .map(|c| clip(c, limits.cell_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if cells.len() > limits.max_columns {
        line.push_str(&format!(" (+{} more columns)", cells.len() - limits.max_columns));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converters::{TRUNCATION_MARKER, convert_document};
    use std::io::Write;

    fn numbered_csv(rows: usize) -> String {
        let mut csv = String::from("id,name\n");
        for i in 1..=rows {
            csv.push_str(&format!("{i},item{i}\n"));
        }
        csv
    }

    #[test]
    fn test_sniffs_delimiter() {
        assert_eq!(sniff_delimiter(b"a;b;c\n1;2;3"), b';');
        assert_eq!(sniff_delimiter(b"a\tb\n"), b'\t');
        assert_eq!(sniff_delimiter(b"a,b;c\n"), b',');
        assert_eq!(sniff_delimiter(b"single\n"), b',');
    }

    #[test]
    fn test_small_file_rendered_in_full() {
        let csv = b"make;model\nVW;\"Golf; GTI\"\nFiat;Panda\n";
        let conversion = convert_csv_bytes(csv, &DocumentLimits::default()).unwrap();
        assert_eq!(
            conversion.header,
            "Document type: CSV file\nRows: 2\nColumns (2): make | model"
        );
        assert_eq!(conversion.body, "Row 1: VW | Golf; GTI\nRow 2: Fiat | Panda");
        assert!(!conversion.truncated);
        assert_eq!(conversion.stats, DocumentStats::Csv { rows: 2, columns: 2 });
    }

    #[test]
    fn test_row_cap_adds_note_not_marker() {
        // 2,000 lines: one header line and 1,999 data rows.
        let conversion =
            convert_csv_bytes(numbered_csv(1_999).as_bytes(), &DocumentLimits::default()).unwrap();

        let row_lines = conversion.body.lines().filter(|l| l.starts_with("Row ")).count();
        assert_eq!(row_lines, 1_000);
        assert!(conversion.body.ends_with("999 more rows not shown"));
        assert!(!conversion.body.contains(TRUNCATION_MARKER));
        assert!(conversion.header.contains("Rows: 1999"));
        assert!(conversion.truncated);
    }

    #[test]
    fn test_token_budget_wins_over_row_cap() {
        let limits = DocumentLimits {
            token_budget: 200,
            ..DocumentLimits::default()
        };
        let conversion = convert_csv_bytes(numbered_csv(5_000).as_bytes(), &limits).unwrap();

        assert!(conversion.body.ends_with(TRUNCATION_MARKER));
        assert!(!conversion.body.contains("more rows not shown"));
        let marker_tokens = crate::services::token_estimator::estimate_tokens(TRUNCATION_MARKER);
        let total = crate::services::token_estimator::estimate_tokens(&conversion.header)
            + crate::services::token_estimator::estimate_tokens(&conversion.body);
        assert!(total <= limits.token_budget + marker_tokens + 1);
    }

    #[test]
    fn test_truncation_is_deterministic() {
        let limits = DocumentLimits {
            token_budget: 300,
            ..DocumentLimits::default()
        };
        let data = numbered_csv(400);
        let a = convert_csv_bytes(data.as_bytes(), &limits).unwrap();
        let b = convert_csv_bytes(data.as_bytes(), &limits).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wide_rows_and_long_cells() {
        let limits = DocumentLimits {
            max_columns: 3,
            cell_chars: 6,
            ..DocumentLimits::default()
        };
        let data = "a,b,c,d,e\nlongervalue,2,3,4,5\n";
        let conversion = convert_csv_bytes(data.as_bytes(), &limits).unwrap();
        assert_eq!(conversion.body, "Row 1: longe… | 2 | 3 (+2 more columns)");
        assert!(conversion.header.contains("Columns (5): a | b | c (+2 more columns)"));
    }

    #[test]
    fn test_empty_and_header_only_files() {
        let empty = convert_csv_bytes(b"", &DocumentLimits::default()).unwrap();
        assert_eq!(empty.header, "Document type: CSV file\nRows: 0");
        assert_eq!(empty.body, "No valid data found in the CSV file.");

        let header_only = convert_csv_bytes(b"id,name\n\n,\n", &DocumentLimits::default()).unwrap();
        assert_eq!(header_only.body, "No valid data found in the CSV file.");
        assert_eq!(header_only.stats, DocumentStats::Csv { rows: 0, columns: 2 });
    }

    #[test]
    fn test_converts_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all("\u{feff}id,name\n1,Ünal\n".as_bytes()).unwrap();

        let conversion =
            convert_document(DocumentFormat::Csv, file.path(), &DocumentLimits::default());
        assert!(conversion.header.contains("Columns (2): id | name"));
        assert_eq!(conversion.body, "Row 1: 1 | Ünal");
    }
}
