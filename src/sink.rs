//! Record sinks
//!
//! A sink persists records append-only. Batching or transactions across
//! several extraction calls belong to the sink, not the extractor.

use std::io::Write;

use tracing::info;

use crate::error::{DrainError, ExtractError, SinkError};
use crate::table::Record;

/// Append-only persistence of records
pub trait RecordSink {
    fn append(&mut self, record: &Record) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<Record>,
}

impl RecordSink for MemorySink {
    fn append(&mut self, record: &Record) -> Result<(), SinkError> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Writes one JSON object per line
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn append(&mut self, record: &Record) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Append every record to the sink and flush it.
///
/// Stops at the first error; records appended before it stay appended.
pub fn drain_into<I, S>(records: I, sink: &mut S) -> Result<usize, DrainError>
where
    I: IntoIterator<Item = Result<Record, ExtractError>>,
    S: RecordSink + ?Sized,
{
    let mut written = 0;
    for record in records {
        sink.append(&record?)?;
        written += 1;
    }
    sink.flush()?;
    info!(written, "records written to sink");
    Ok(written)
}
