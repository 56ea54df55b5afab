//! Page query capability consumed by the extractor

use crate::error::ExtractError;

const NTH_CHILD: &str = ":nth-child(";

/// Synchronous read-only queries over a page.
///
/// Rows are addressed by selector (see [`row_selector`]) and cells by their
/// 1-based physical position inside the row. Implementations may be backed by
/// a live browser session, a DOM snapshot or a test fixture; the extractor
/// never mutates the page. Callers must not share one driver between
/// concurrent extraction calls.
pub trait PageDriver {
    /// Number of elements matching the row selector
    fn row_count(&self, rows: &str) -> Result<usize, ExtractError>;

    /// Whether the row has a cell at `column`
    fn cell_present(&self, row: &str, column: usize) -> bool;

    /// Trimmed text content of the cell, empty when absent
    fn cell_text(&self, row: &str, column: usize) -> String;

    /// Attribute value of the cell, `None` when missing
    fn cell_attr(&self, row: &str, column: usize, attr: &str) -> Option<String>;

    /// Number of logical column slots the cell occupies (1 for a normal cell)
    fn cell_span(&self, row: &str, column: usize) -> usize;
}

/// Selector of the `position`-th (1-based) physical row
pub fn row_selector(rows: &str, position: usize) -> String {
    format!("{}{}{})", rows.trim(), NTH_CHILD, position)
}

/// Split a selector built by [`row_selector`] back into its parts
pub fn parse_row_selector(row: &str) -> Option<(&str, usize)> {
    let (rows, rest) = row.rsplit_once(NTH_CHILD)?;
    let position = rest.strip_suffix(')')?.parse().ok()?;
    Some((rows, position))
}

/// Only a single complex selector can address rows: `:nth-child` appended to
/// a selector list would bind to its last alternative only.
pub fn validate_row_selector(rows: &str) -> Result<(), ExtractError> {
    let invalid = |reason: &str| ExtractError::InvalidSelector {
        selector: rows.to_string(),
        reason: reason.to_string(),
    };

    if rows.trim().is_empty() {
        return Err(invalid("empty row selector"));
    }

    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for ch in rows.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                return Err(invalid("selector lists are not supported for rows"));
            }
            _ => {}
        }
    }
    Ok(())
}
