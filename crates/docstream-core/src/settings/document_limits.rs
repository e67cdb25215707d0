use serde::{Deserialize, Serialize};

/// Estimated-token budget for one converted document.
pub const DOCUMENT_TOKEN_BUDGET: usize = 30_000;
/// Data rows rendered per spreadsheet or CSV document.
pub const MAX_DOCUMENT_ROWS: usize = 1_000;
pub const MAX_DOCUMENT_COLUMNS: usize = 50;
/// Text lines rendered per PDF or email document.
pub const MAX_DOCUMENT_LINES: usize = 500;
pub const MAX_CELL_CHARS: usize = 40;
pub const MAX_LINE_CHARS: usize = 60;
/// Largest accepted upload: 30 MiB.
pub const MAX_UPLOAD_BYTES: usize = 30 * 1024 * 1024;

/// Bounds applied by every document converter. Whichever limit is hit first wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentLimits {
    pub token_budget: usize,
    pub max_rows: usize,
    pub max_columns: usize,
    pub max_lines: usize,
    pub cell_chars: usize,
    pub line_chars: usize,
    pub max_upload_bytes: usize,
}

impl Default for DocumentLimits {
    fn default() -> Self {
        Self {
            token_budget: DOCUMENT_TOKEN_BUDGET,
            max_rows: MAX_DOCUMENT_ROWS,
            max_columns: MAX_DOCUMENT_COLUMNS,
            max_lines: MAX_DOCUMENT_LINES,
            cell_chars: MAX_CELL_CHARS,
            line_chars: MAX_LINE_CHARS,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}
