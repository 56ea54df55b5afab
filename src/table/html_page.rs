//! `PageDriver` over a parsed HTML snapshot
//!
//! Uses the scraper crate to resolve row selectors. Cells are the element
//! children of the row (`td`/`th`), counted from 1.
//!
//! The first query for a row selector walks the document once and records
//! every matching row by its position among its siblings, so later
//! `:nth-child(N)` lookups do not rescan the page.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::driver::{parse_row_selector, PageDriver};
use crate::error::ExtractError;

/// Owned copy of what the extractor reads from one cell
#[derive(Debug, Clone)]
struct CellSnapshot {
    text: String,
    span: usize,
    /// Attributes of the cell and its descendants, in document order
    attrs: Vec<(String, String)>,
}

impl CellSnapshot {
    fn capture(cell: ElementRef<'_>) -> Self {
        let text = cell
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ");
        let span = cell
            .value()
            .attr("colspan")
            .and_then(|span| span.trim().parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        let attrs = cell
            .descendants()
            .filter_map(ElementRef::wrap)
            .flat_map(|el| {
                el.value()
                    .attrs()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();

        Self { text, span, attrs }
    }
}

fn capture_row(row: ElementRef<'_>) -> Vec<CellSnapshot> {
    row.children()
        .filter_map(ElementRef::wrap)
        .map(CellSnapshot::capture)
        .collect()
}

/// Rows matched by one selector, keyed by their 1-based position among
/// element siblings. The first match in document order wins a position.
#[derive(Debug, Default)]
struct RowIndex {
    matches: usize,
    rows: HashMap<usize, Vec<CellSnapshot>>,
}

/// A static DOM snapshot of one page
pub struct HtmlPage {
    document: Html,
    indexes: RefCell<HashMap<String, RowIndex>>,
    /// Rows addressed by a plain selector rather than `row_selector`
    adhoc_rows: RefCell<HashMap<String, Option<Vec<CellSnapshot>>>>,
}

impl HtmlPage {
    pub fn parse(html: &str) -> Self {
        Self::from_document(Html::parse_document(html))
    }

    pub fn from_document(document: Html) -> Self {
        Self {
            document,
            indexes: RefCell::new(HashMap::new()),
            adhoc_rows: RefCell::new(HashMap::new()),
        }
    }

    pub fn document(&self) -> &Html {
        &self.document
    }

    fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
        Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })
    }

    fn build_index(&self, rows: &str) -> Result<RowIndex, ExtractError> {
        let selector = Self::parse_selector(rows)?;
        let mut index = RowIndex::default();
        let mut last: Option<(ElementRef<'_>, usize)> = None;

        for row in self.document.select(&selector) {
            let same_parent = |prev: &ElementRef<'_>| {
                prev.parent().map(|p| p.id()) == row.parent().map(|p| p.id())
            };
            // continue counting from the previous sibling match instead of
            // walking back to the first child every time
            let position = match last {
                Some((prev, prev_position)) if same_parent(&prev) => {
                    prev_position
                        + prev
                            .next_siblings()
                            .take_while(|node| node.id() != row.id())
                            .filter(|node| node.value().is_element())
                            .count()
                        + 1
                }
                _ => {
                    row.prev_siblings()
                        .filter(|node| node.value().is_element())
                        .count()
                        + 1
                }
            };

            index.matches += 1;
            index
                .rows
                .entry(position)
                .or_insert_with(|| capture_row(row));
            last = Some((row, position));
        }

        debug!(rows, matches = index.matches, "indexed table rows");
        Ok(index)
    }

    fn with_index<R>(&self, rows: &str, f: impl FnOnce(&RowIndex) -> R) -> Result<R, ExtractError> {
        let mut indexes = self.indexes.borrow_mut();
        let index = match indexes.entry(rows.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.build_index(rows)?),
        };
        Ok(f(index))
    }

    fn select_row(&self, row: &str) -> Option<ElementRef<'_>> {
        let selector = match Self::parse_selector(row) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to parse row selector '{}': {}", row, e);
                return None;
            }
        };
        self.document.select(&selector).next()
    }

    fn with_cell<R>(&self, row: &str, column: usize, f: impl FnOnce(&CellSnapshot) -> R) -> Option<R> {
        let index = column.checked_sub(1)?;

        if let Some((rows, position)) = parse_row_selector(row) {
            let found = self.with_index(rows, |rows_index| {
                rows_index
                    .rows
                    .get(&position)
                    .and_then(|cells| cells.get(index))
                    .map(f)
            });
            return match found {
                Ok(result) => result,
                Err(e) => {
                    warn!("Failed to index rows for '{}': {}", row, e);
                    None
                }
            };
        }

        let mut adhoc_rows = self.adhoc_rows.borrow_mut();
        adhoc_rows
            .entry(row.to_string())
            .or_insert_with(|| self.select_row(row).map(capture_row))
            .as_deref()
            .and_then(|cells| cells.get(index))
            .map(f)
    }
}

impl PageDriver for HtmlPage {
    fn row_count(&self, rows: &str) -> Result<usize, ExtractError> {
        self.with_index(rows, |index| index.matches)
    }

    fn cell_present(&self, row: &str, column: usize) -> bool {
        self.with_cell(row, column, |_| ()).is_some()
    }

    fn cell_text(&self, row: &str, column: usize) -> String {
        self.with_cell(row, column, |cell| cell.text.clone())
            .unwrap_or_default()
    }

    fn cell_attr(&self, row: &str, column: usize, attr: &str) -> Option<String> {
        self.with_cell(row, column, |cell| {
            cell.attrs
                .iter()
                .find(|(name, _)| name == attr)
                .map(|(_, value)| value.clone())
        })
        .flatten()
    }

    fn cell_span(&self, row: &str, column: usize) -> usize {
        self.with_cell(row, column, |cell| cell.span).unwrap_or(1)
    }
}
