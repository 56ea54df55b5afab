//! Row walk over an irregular table
//!
//! Each row is read left to right with a physical cell cursor. A cell that
//! spans more than one logical slot makes the following schema columns NULL
//! without consuming cells, so columns after a merged cell stay aligned.
//! The cursor is reset for every row.

use chrono::Utc;
use tracing::{debug, info};

use super::coerce::{clean_text, coerce};
use super::driver::{row_selector, validate_row_selector, PageDriver};
use super::{ColumnSpec, ColumnType, GroupHeader, Record, RowFilter, RowRange, ShortRowPolicy, Value};
use crate::error::ExtractError;

/// Extracts typed records from the rows matched by a selector
pub struct TableExtractor<'d, D: ?Sized> {
    driver: &'d D,
    rows: String,
    range: RowRange,
    short_rows: ShortRowPolicy,
    group_header: Option<GroupHeader>,
    filter: Option<RowFilter>,
}

impl<'d, D: PageDriver + ?Sized> TableExtractor<'d, D> {
    pub fn new(driver: &'d D, rows: impl Into<String>) -> Self {
        Self {
            driver,
            rows: rows.into(),
            range: RowRange::default(),
            short_rows: ShortRowPolicy::default(),
            group_header: None,
            filter: None,
        }
    }

    pub fn rows(mut self, range: RowRange) -> Self {
        self.range = range;
        self
    }

    pub fn short_rows(mut self, policy: ShortRowPolicy) -> Self {
        self.short_rows = policy;
        self
    }

    /// Treat wide single-cell rows as group labels, see [`GroupHeader`]
    pub fn group_header(mut self, header: GroupHeader) -> Self {
        self.group_header = Some(header);
        self
    }

    /// Only emit records accepted by `filter`
    pub fn filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Start reading rows. The returned sequence is lazy and can only be
    /// consumed once; it ends after the first fatal error.
    pub fn extract<'a>(&'a self, columns: &'a [ColumnSpec]) -> Result<Records<'a, D>, ExtractError> {
        validate_row_selector(&self.rows)?;
        let row_count = self.driver.row_count(&self.rows)?;
        debug!(rows = %self.rows, row_count, start = self.range.start, "starting table extraction");

        Ok(Records {
            driver: self.driver,
            rows: &self.rows,
            columns,
            range: self.range,
            short_rows: self.short_rows,
            group_header: self.group_header.as_ref(),
            filter: self.filter.as_ref(),
            group: Value::Null,
            row_count,
            offset: 0,
            emitted: 0,
            skipped: 0,
            done: false,
        })
    }

    /// Read every row and collect the records
    pub fn extract_all(&self, columns: &[ColumnSpec]) -> Result<Vec<Record>, ExtractError> {
        self.extract(columns)?.collect()
    }
}

/// What one physical row turned out to be
enum Row {
    Header(String),
    Data(Record),
}

/// In-order sequence of records, one per physical data row read
pub struct Records<'a, D: ?Sized> {
    driver: &'a D,
    rows: &'a str,
    columns: &'a [ColumnSpec],
    range: RowRange,
    short_rows: ShortRowPolicy,
    group_header: Option<&'a GroupHeader>,
    filter: Option<&'a RowFilter>,
    /// Text of the last group header seen
    group: Value,
    row_count: usize,
    offset: usize,
    emitted: usize,
    skipped: usize,
    done: bool,
}

impl<D: PageDriver + ?Sized> Records<'_, D> {
    fn finish(&mut self, reason: &str) {
        self.done = true;
        info!(
            rows = %self.rows,
            emitted = self.emitted,
            skipped = self.skipped,
            reason,
            "table extraction finished"
        );
    }

    fn read_header(&self, row: &str) -> Option<String> {
        let header = self.group_header?;
        if !self.driver.cell_present(row, 1) || self.driver.cell_span(row, 1) < header.min_span {
            return None;
        }
        let text = clean_text(&self.driver.cell_text(row, 1));
        (!text.is_empty()).then_some(text)
    }

    /// Read one physical row. `Ok(None)` signals the end of the table.
    fn read_row(&self, position: usize) -> Result<Option<Row>, ExtractError> {
        let row = row_selector(self.rows, position);
        if let Some(text) = self.read_header(&row) {
            debug!(row = position, group = %text, "group header");
            return Ok(Some(Row::Header(text)));
        }

        let mut values = Vec::with_capacity(self.columns.len() + 1);
        let mut cursor = 1;
        let mut pending_skip = 0;

        for column in self.columns {
            if pending_skip > 0 {
                pending_skip -= 1;
                values.push((column.name.clone(), Value::Null));
                continue;
            }

            if !self.driver.cell_present(&row, cursor) {
                match self.short_rows {
                    ShortRowPolicy::PadNull if cursor > 1 => {
                        values.push((column.name.clone(), self.empty_cell(column, position)?));
                        continue;
                    }
                    _ => {
                        debug!(row = position, cell = cursor, "cell missing, end of table");
                        return Ok(None);
                    }
                }
            }

            let value = self.read_cell(&row, position, cursor, column)?;
            values.push((column.name.clone(), value));

            let span = self.driver.cell_span(&row, cursor);
            if span > 1 {
                debug!(row = position, cell = cursor, span, column = %column.name, "spanning cell");
                pending_skip = span - 1;
            }
            cursor += 1;
        }

        if let Some(header) = self.group_header {
            values.push((header.name.clone(), self.group.clone()));
        }

        Ok(Some(Row::Data(Record::new(values, Utc::now()))))
    }

    fn read_cell(
        &self,
        row: &str,
        position: usize,
        cell: usize,
        column: &ColumnSpec,
    ) -> Result<Value, ExtractError> {
        if let ColumnType::Link { attr } = &column.kind {
            return match self.driver.cell_attr(row, cell, attr) {
                Some(href) => Ok(Value::Text(href)),
                None => self.empty_cell(column, position),
            };
        }

        let text = clean_text(&self.driver.cell_text(row, cell));
        if text.is_empty() {
            return self.empty_cell(column, position);
        }
        coerce(column, &text)
    }

    fn empty_cell(&self, column: &ColumnSpec, position: usize) -> Result<Value, ExtractError> {
        if column.optional {
            Ok(Value::Null)
        } else {
            Err(ExtractError::MissingValue {
                column: column.name.clone(),
                row: position,
            })
        }
    }
}

impl<D: PageDriver + ?Sized> Iterator for Records<'_, D> {
    type Item = Result<Record, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.offset >= self.row_count {
                self.finish("row count reached");
                return None;
            }

            let position = self.range.start + self.offset;
            if self.range.reached_end(position) {
                self.finish("end row reached");
                return None;
            }
            self.offset += 1;

            match self.read_row(position) {
                Ok(Some(Row::Header(text))) => self.group = Value::Text(text),
                Ok(Some(Row::Data(record))) => {
                    // rows are fully coerced before filtering, so a bad date is
                    // fatal even in a row that would have been dropped
                    if self.filter.is_some_and(|filter| !filter.matches(&record)) {
                        self.skipped += 1;
                        continue;
                    }
                    self.emitted += 1;
                    return Some(Ok(record));
                }
                Ok(None) => {
                    self.finish("row exhausted");
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{HtmlPage, QUERY_DATE};

    /// Fixture whose row count can overstate the rows that are actually readable
    struct FixtureTable {
        rows: Vec<Vec<(&'static str, usize)>>,
        claimed_rows: usize,
    }

    impl FixtureTable {
        fn new(rows: Vec<Vec<(&'static str, usize)>>) -> Self {
            let claimed_rows = rows.len();
            Self { rows, claimed_rows }
        }

        fn cell(&self, row: &str, column: usize) -> Option<(&'static str, usize)> {
            let position: usize = row
                .rsplit_once(":nth-child(")?
                .1
                .trim_end_matches(')')
                .parse()
                .ok()?;
            self.rows
                .get(position.checked_sub(1)?)?
                .get(column.checked_sub(1)?)
                .copied()
        }
    }

    impl PageDriver for FixtureTable {
        fn row_count(&self, _rows: &str) -> Result<usize, ExtractError> {
            Ok(self.claimed_rows)
        }

        fn cell_present(&self, row: &str, column: usize) -> bool {
            self.cell(row, column).is_some()
        }

        fn cell_text(&self, row: &str, column: usize) -> String {
            self.cell(row, column)
                .map(|(text, _)| text.trim().to_string())
                .unwrap_or_default()
        }

        fn cell_attr(&self, _row: &str, _column: usize, _attr: &str) -> Option<String> {
            None
        }

        fn cell_span(&self, row: &str, column: usize) -> usize {
            self.cell(row, column).map_or(1, |(_, span)| span)
        }
    }

    fn text_columns(names: &[&str]) -> Vec<ColumnSpec> {
        names.iter().map(|name| ColumnSpec::text(*name)).collect()
    }

    #[test]
    fn test_end_to_end_scenario() {
        let html = r#"
        <table><tbody>
            <tr><td>ABC</td><td>$12.50</td><td>2023-09-30</td></tr>
            <tr><td></td><td> </td><td></td></tr>
        </tbody></table>
        "#;
        let page = HtmlPage::parse(html);
        let columns = vec![
            ColumnSpec::text("ticker"),
            ColumnSpec::float("price"),
            ColumnSpec::date("date", "%Y-%m-%d"),
        ];

        let before = Utc::now();
        let records = TableExtractor::new(&page, "tbody > tr")
            .extract_all(&columns)
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("ticker"), Some(&Value::Text("ABC".to_string())));
        assert_eq!(records[0].get("price"), Some(&Value::Float(12.50)));
        assert_eq!(
            records[0].get("date").and_then(Value::as_date),
            chrono::NaiveDate::from_ymd_opt(2023, 9, 30)
        );
        assert!(records[0].query_date() >= before);

        for name in ["ticker", "price", "date"] {
            assert_eq!(records[1].get(name), Some(&Value::Null));
        }
    }

    #[test]
    fn test_schema_stability() {
        let table = FixtureTable::new(vec![
            vec![("a", 1), ("b", 2), ("c", 1)],
            vec![("", 1), ("", 1), ("", 1), ("", 1)],
            vec![("x", 3), ("y", 1), ("z", 1), ("w", 1)],
        ]);
        let columns = text_columns(&["a", "b", "c", "d"]);

        let records = TableExtractor::new(&table, "tr").extract_all(&columns).unwrap();
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.len(), columns.len() + 1);
            assert!(record.get(QUERY_DATE).and_then(Value::as_timestamp).is_some());
            assert_eq!(
                record.keys().collect::<Vec<_>>(),
                vec!["a", "b", "c", "d", "query_date"]
            );
        }
    }

    #[test]
    fn test_double_span_alignment() {
        let table = FixtureTable::new(vec![vec![("one", 1), ("merged", 2), ("three", 1)]]);
        let columns = text_columns(&["a", "b", "c", "d"]);

        let records = TableExtractor::new(&table, "tr").extract_all(&columns).unwrap();
        let record = &records[0];
        assert_eq!(record.get("a"), Some(&Value::Text("one".to_string())));
        assert_eq!(record.get("b"), Some(&Value::Text("merged".to_string())));
        assert_eq!(record.get("c"), Some(&Value::Null));
        assert_eq!(record.get("d"), Some(&Value::Text("three".to_string())));
    }

    #[test]
    fn test_span_does_not_carry_to_next_row() {
        let table = FixtureTable::new(vec![
            vec![("n/a", 2), ("last", 1)],
            vec![("p", 1), ("q", 1), ("r", 1)],
        ]);
        let columns = text_columns(&["a", "b", "c"]);

        let records = TableExtractor::new(&table, "tr").extract_all(&columns).unwrap();
        assert_eq!(records[0].get("a"), Some(&Value::Text("n/a".to_string())));
        assert_eq!(records[0].get("b"), Some(&Value::Null));
        assert_eq!(records[0].get("c"), Some(&Value::Text("last".to_string())));
        assert_eq!(records[1].get("b"), Some(&Value::Text("q".to_string())));
        assert_eq!(records[1].get("c"), Some(&Value::Text("r".to_string())));
    }

    #[test]
    fn test_order_and_start_row() {
        let table = FixtureTable::new(vec![
            vec![("r1", 1)],
            vec![("r2", 1)],
            vec![("r3", 1)],
            vec![("r4", 1)],
        ]);
        let columns = text_columns(&["id"]);

        let records = TableExtractor::new(&table, "tr")
            .rows(RowRange::new(2, None))
            .extract_all(&columns)
            .unwrap();
        let ids: Vec<_> = records
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_str))
            .collect();
        assert_eq!(ids, vec!["r2", "r3", "r4"]);
    }

    #[test]
    fn test_end_row_is_exclusive() {
        let table = FixtureTable::new(vec![vec![("r1", 1)], vec![("r2", 1)], vec![("r3", 1)]]);
        let columns = text_columns(&["id"]);

        let records = TableExtractor::new(&table, "tr")
            .rows(RowRange::new(1, Some(3)))
            .extract_all(&columns)
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("id"), Some(&Value::Text("r2".to_string())));
    }

    #[test]
    fn test_start_row_past_end_is_empty() {
        let table = FixtureTable::new(vec![vec![("r1", 1)], vec![("r2", 1)]]);
        let columns = text_columns(&["id"]);

        let records = TableExtractor::new(&table, "tr")
            .rows(RowRange::new(5, None))
            .extract_all(&columns)
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_empty_table() {
        let table = FixtureTable::new(vec![]);
        let records = TableExtractor::new(&table, "tr")
            .extract_all(&text_columns(&["a"]))
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_row_vanishing_mid_read_ends_table() {
        let mut table = FixtureTable::new(vec![vec![("r1", 1)], vec![("r2", 1)]]);
        table.claimed_rows = 4;

        let records = TableExtractor::new(&table, "tr")
            .extract_all(&text_columns(&["id"]))
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_short_row_policies() {
        let table = FixtureTable::new(vec![
            vec![("a1", 1), ("b1", 1)],
            vec![("a2", 1)],
            vec![("a3", 1), ("b3", 1)],
        ]);
        let columns = text_columns(&["a", "b"]);

        let records = TableExtractor::new(&table, "tr").extract_all(&columns).unwrap();
        assert_eq!(records.len(), 1);

        let records = TableExtractor::new(&table, "tr")
            .short_rows(ShortRowPolicy::PadNull)
            .extract_all(&columns)
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].get("a"), Some(&Value::Text("a2".to_string())));
        assert_eq!(records[1].get("b"), Some(&Value::Null));
        assert_eq!(records[2].get("b"), Some(&Value::Text("b3".to_string())));
    }

    #[test]
    fn test_date_error_stops_sequence() {
        let table = FixtureTable::new(vec![
            vec![("ABC", 1), ("2023-09-30", 1)],
            vec![("DEF", 1), ("N/A", 1)],
            vec![("GHI", 1), ("2023-10-02", 1)],
        ]);
        let columns = vec![ColumnSpec::text("ticker"), ColumnSpec::date("date", "%Y-%m-%d")];

        let extractor = TableExtractor::new(&table, "tr");
        let mut records = extractor.extract(&columns).unwrap();

        assert!(records.next().unwrap().is_ok());
        match records.next() {
            Some(Err(ExtractError::DateParse { column, raw, .. })) => {
                assert_eq!(column, "date");
                assert_eq!(raw, "N/A");
            }
            other => panic!("expected DateParse, got {:?}", other.map(|r| r.is_ok())),
        }
        assert!(records.next().is_none());

        assert!(matches!(
            extractor.extract_all(&columns),
            Err(ExtractError::DateParse { .. })
        ));
    }

    #[test]
    fn test_required_column_empty_is_fatal() {
        let table = FixtureTable::new(vec![vec![("ABC", 1), ("", 1)]]);
        let columns = vec![ColumnSpec::text("ticker"), ColumnSpec::integer("shares").required()];

        match TableExtractor::new(&table, "tr").extract_all(&columns) {
            Err(ExtractError::MissingValue { column, row }) => {
                assert_eq!(column, "shares");
                assert_eq!(row, 1);
            }
            other => panic!("expected MissingValue, got {:?}", other),
        }
    }

    #[test]
    fn test_optional_empty_date_is_null() {
        let table = FixtureTable::new(vec![vec![("", 1)]]);
        let columns = vec![ColumnSpec::date("pricing_date", "%Y-%m-%d")];

        let records = TableExtractor::new(&table, "tr").extract_all(&columns).unwrap();
        assert_eq!(records[0].get("pricing_date"), Some(&Value::Null));
    }

    #[test]
    fn test_optional_empty_integer_is_null() {
        let page = HtmlPage::parse("<table><tbody><tr><td>ABC</td><td></td></tr></tbody></table>");
        let columns = vec![ColumnSpec::text("ticker"), ColumnSpec::integer("n")];

        let records = TableExtractor::new(&page, "tbody > tr")
            .extract_all(&columns)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("n"), Some(&Value::Null));
    }

    #[test]
    fn test_selector_list_is_rejected() {
        let page = HtmlPage::parse("<table><tr class=\"a\"><td>1</td></tr><tr class=\"b\"><td>2</td></tr></table>");

        match TableExtractor::new(&page, "tr.a, tr.b").extract(&text_columns(&["id"])) {
            Err(ExtractError::InvalidSelector { selector, .. }) => assert_eq!(selector, "tr.a, tr.b"),
            Err(e) => panic!("expected InvalidSelector, got {e}"),
            Ok(_) => panic!("expected InvalidSelector"),
        }
    }

    const NONCOMPLIANT: &str = r#"
    <table class="rgMasterTable">
        <thead><tr><th>Company</th><th>Symbol</th><th>Deficiency</th><th>Market</th><th>Notification Date</th></tr></thead>
        <tbody>
            <tr><td colspan="4"><p>Acme Corp</p></td></tr>
            <tr><td></td><td>ACME</td><td>Late 10-K</td><td>Nasdaq</td><td>09/30/2023</td></tr>
            <tr><td colspan="4"><p>Beta Inc</p></td></tr>
            <tr><td></td><td>BETA</td><td>Bid price</td><td>Nasdaq</td><td>10/02/2023</td></tr>
            <tr><td></td><td>BETA.W</td><td>Bid price</td><td>Nasdaq</td><td>10/02/2023</td></tr>
        </tbody>
    </table>
    "#;

    fn noncompliant_columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::text("marker"),
            ColumnSpec::text("ticker"),
            ColumnSpec::text("deficiency"),
            ColumnSpec::text("market"),
            ColumnSpec::date("notification_date", "%m/%d/%Y"),
        ]
    }

    #[test]
    fn test_group_header_rows() {
        let page = HtmlPage::parse(NONCOMPLIANT);
        let columns = noncompliant_columns();

        let records = TableExtractor::new(&page, ".rgMasterTable tbody > tr")
            .group_header(GroupHeader::new("company", 4))
            .extract_all(&columns)
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("ticker"), Some(&Value::Text("ACME".to_string())));
        assert_eq!(records[0].get("company"), Some(&Value::Text("Acme Corp".to_string())));
        assert_eq!(records[2].get("company"), Some(&Value::Text("Beta Inc".to_string())));
        assert_eq!(
            records[2].keys().collect::<Vec<_>>(),
            vec!["marker", "ticker", "deficiency", "market", "notification_date", "company", "query_date"]
        );
        assert_eq!(records[0].get("marker"), Some(&Value::Null));
    }

    #[test]
    fn test_group_header_with_filter() {
        let page = HtmlPage::parse(NONCOMPLIANT);
        let columns = noncompliant_columns();

        let records = TableExtractor::new(&page, ".rgMasterTable tbody > tr")
            .group_header(GroupHeader::new("company", 4))
            .filter(RowFilter::new("ticker", "beta"))
            .extract_all(&columns)
            .unwrap();
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.get("company"), Some(&Value::Text("Beta Inc".to_string())));
        }
        assert_eq!(records[1].get("ticker"), Some(&Value::Text("BETA.W".to_string())));
    }

    #[test]
    fn test_group_is_null_before_first_header() {
        let table = FixtureTable::new(vec![
            vec![("orphan", 1), ("x", 1)],
            vec![("Group A", 2)],
            vec![("a1", 1), ("y", 1)],
        ]);
        let columns = text_columns(&["id", "v"]);

        let records = TableExtractor::new(&table, "tr")
            .group_header(GroupHeader::new("group", 2))
            .extract_all(&columns)
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("group"), Some(&Value::Null));
        assert_eq!(records[1].get("group"), Some(&Value::Text("Group A".to_string())));
    }
}
