//! Token-budgeted text assembly shared by every converter.

use crate::services::token_estimator::{estimate_tokens, estimate_tokens_for_chars};

/// Appended when the token budget stops a document early.
pub const TRUNCATION_MARKER: &str = "…rest of content not shown to limit data volume…";

/// Note for units dropped by a row or line cap, e.g. "999 more rows not shown".
pub fn omitted_note(count: usize, unit: &str) -> String {
    format!("{count} more {unit} not shown")
}

/// Flatten whitespace and cap `value` at `width` characters, ellipsis included.
pub fn clip(value: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }

    let mut out = String::new();
    for (count, c) in value.trim().chars().enumerate() {
        if count == width {
            out.pop();
            out.push('…');
            return out;
        }
        out.push(if c.is_whitespace() { ' ' } else { c });
    }
    out
}

/// Body lines admitted against a token limit. The header is charged up front.
///
/// Each line costs its own estimate plus its newline, re-checked per line so units of
/// different sizes are accounted exactly.
#[derive(Debug)]
pub struct TextBudget {
    limit: usize,
    used: usize,
    lines: Vec<String>,
    exhausted: bool,
}

impl TextBudget {
    pub fn new(limit: usize, header: &str) -> Self {
        Self {
            limit,
            used: estimate_tokens(header),
            lines: Vec::new(),
            exhausted: false,
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Admit `line` if it fits. Once a line is refused every later push is refused too.
    pub fn push(&mut self, line: impl Into<String>) -> bool {
        if self.exhausted {
            return false;
        }
        let line = line.into();
        let cost = estimate_tokens_for_chars(line.chars().count() + 1);
        if self.used + cost > self.limit {
            self.exhausted = true;
            return false;
        }
        self.used += cost;
        self.lines.push(line);
        true
    }

    /// Join the body and append the closing marker.
    ///
    /// `omitted` counts units dropped by the unit cap. The budget marker wins when both
    /// limits were hit. Returns the body and whether anything was left out.
    pub fn finish(mut self, omitted: usize, unit: &str) -> (String, bool) {
        let truncated = if self.exhausted {
            self.lines.push(TRUNCATION_MARKER.to_string());
            true
        } else if omitted > 0 {
            self.lines.push(omitted_note(omitted, unit));
            true
        } else {
            false
        };
        (self.lines.join("\n"), truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_adds_ellipsis_within_width() {
        assert_eq!(clip("short", 40), "short");
        assert_eq!(clip("abcdefgh", 5), "abcd…");
        assert_eq!(clip("abcde", 5), "abcde");
        assert_eq!(clip("  line\nbreak\there ", 40), "line break here");
        assert_eq!(clip("ééééé", 3).chars().count(), 3);
    }

    #[test]
    fn test_budget_stops_and_marks() {
        // Header costs 1 token; each 7-char line plus newline costs 2.
        let mut budget = TextBudget::new(7, "hdr");
        assert!(budget.push("line 01"));
        assert!(budget.push("line 02"));
        assert!(budget.push("line 03"));
        assert!(!budget.push("line 04"));
        assert!(!budget.push("x"), "refusal is sticky");
        assert_eq!(budget.used(), 7);

        let (body, truncated) = budget.finish(10, "rows");
        assert!(truncated);
        assert!(body.ends_with(TRUNCATION_MARKER));
        assert!(!body.contains("more rows not shown"));
    }

    #[test]
    fn test_cap_note_when_budget_not_hit() {
        let mut budget = TextBudget::new(1_000, "");
        budget.push("Row 1: a");
        let (body, truncated) = budget.finish(999, "rows");
        assert!(truncated);
        assert_eq!(body, "Row 1: a\n999 more rows not shown");
    }

    #[test]
    fn test_untruncated_body() {
        let mut budget = TextBudget::new(1_000, "");
        budget.push("one");
        budget.push("two");
        assert_eq!(budget.finish(0, "lines"), ("one\ntwo".to_string(), false));
    }
}
