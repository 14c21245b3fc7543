use crate::feature::FieldId;
use crate::index::{HashIndex, Record};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Layout of a delimited bulk source.
///
/// Column `i` of a line holds field `field_ids[i]`; the first column is the
/// item key. Each delimiter string is a set of characters, any one of which
/// splits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFormat {
    pub field_ids: Vec<FieldId>,
    #[serde(default = "default_between")]
    pub between_delimiter: String,
    #[serde(default)]
    pub inner_delimiter: Option<String>,
}
fn default_between() -> String { ",".into() }

impl BulkFormat {
    pub fn new(field_ids: Vec<FieldId>) -> Self {
        Self { field_ids, between_delimiter: default_between(), inner_delimiter: None }
    }

    pub fn with_inner(mut self, inner: impl Into<String>) -> Self {
        self.inner_delimiter = Some(inner.into());
        self
    }

    fn inner(&self) -> Option<&str> {
        self.inner_delimiter.as_deref().filter(|d| !d.is_empty())
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("bulk format has no field ids")]
    NoFields,
    #[error("bulk source unreadable: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BuildStats {
    pub lines: usize,
    pub inserted: usize,
    pub empty_lines: usize,
    pub blank_keys: usize,
    pub duplicate_keys: usize,
}

enum LineOutcome {
    Inserted,
    Empty,
    BlankKey,
    Duplicate,
}

pub struct IndexBuilder<'a> {
    format: &'a BulkFormat,
    index: HashIndex,
    stats: BuildStats,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(format: &'a BulkFormat) -> Result<Self, BuildError> {
        let key_field = *format.field_ids.first().ok_or(BuildError::NoFields)?;
        Ok(Self { format, index: HashIndex::new(key_field), stats: BuildStats::default() })
    }

    /// Consume every line of `reader`. Lines that are not valid UTF-8 are
    /// skipped like any other malformed line; a read error fails the build.
    pub fn consume<R: BufRead>(&mut self, reader: R) -> Result<(), BuildError> {
        for raw in reader.split(b'\n') {
            let raw = raw?;
            self.stats.lines += 1;
            let Ok(line) = String::from_utf8(raw) else {
                tracing::debug!(line = self.stats.lines, "skipping non utf-8 line");
                continue;
            };
            match self.insert_line(&line) {
                LineOutcome::Inserted => self.stats.inserted += 1,
                LineOutcome::Empty => self.stats.empty_lines += 1,
                LineOutcome::BlankKey => self.stats.blank_keys += 1,
                LineOutcome::Duplicate => self.stats.duplicate_keys += 1,
            }
        }
        Ok(())
    }

    pub fn finish(self) -> (HashIndex, BuildStats) {
        (self.index, self.stats)
    }

    fn insert_line(&mut self, line: &str) -> LineOutcome {
        let line = line.trim();
        if line.is_empty() {
            return LineOutcome::Empty;
        }
        let between = self.format.between_delimiter.as_str();
        let columns: Vec<&str> = line.split(|c: char| between.contains(c)).collect();
        let width = columns.len().min(self.format.field_ids.len());
        let key = columns[0];
        if width == 0 || key.is_empty() {
            return LineOutcome::BlankKey;
        }
        if self.index.record(key).is_some() {
            return LineOutcome::Duplicate;
        }

        let mut record = Record::new();
        for (column, field) in columns[1..width].iter().zip(&self.format.field_ids[1..width]) {
            if column.is_empty() {
                continue;
            }
            match self.format.inner() {
                // Values of a field id repeated in the format accumulate.
                Some(inner) => {
                    let values = column
                        .split(|c: char| inner.contains(c))
                        .filter(|v| !v.is_empty())
                        .map(str::to_string);
                    record.entry(*field).or_default().extend(values);
                }
                // Without an inner delimiter a repeated field id keeps the last column.
                None => {
                    record.insert(*field, vec![column.to_string()]);
                }
            }
        }
        record.retain(|_, values| !values.is_empty());

        if self.index.insert(key.to_string(), record) {
            LineOutcome::Inserted
        } else {
            LineOutcome::Duplicate
        }
    }
}

/// Build an index from any buffered source.
pub fn build_from_reader<R: BufRead>(
    reader: R,
    format: &BulkFormat,
) -> Result<(HashIndex, BuildStats), BuildError> {
    let mut builder = IndexBuilder::new(format)?;
    builder.consume(reader)?;
    let (index, stats) = builder.finish();
    tracing::info!(
        items = stats.inserted,
        lines = stats.lines,
        duplicates = stats.duplicate_keys,
        blank_keys = stats.blank_keys,
        "index built"
    );
    Ok((index, stats))
}

pub fn build_from_path<P: AsRef<Path>>(
    path: P,
    format: &BulkFormat,
) -> Result<(HashIndex, BuildStats), BuildError> {
    // Check the format before touching the filesystem.
    IndexBuilder::new(format)?;
    let f = File::open(path.as_ref())?;
    build_from_reader(BufReader::new(f), format)
}
