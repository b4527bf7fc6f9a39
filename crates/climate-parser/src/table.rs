use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};

use crate::errors::ParserError;

/// Case-insensitive lookup from column name to field position.
#[derive(Debug, Clone, Default)]
pub struct HeaderIndex {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    pub fn new(headers: &StringRecord) -> Self {
        let mut names = Vec::with_capacity(headers.len());
        let mut positions = HashMap::with_capacity(headers.len());
        for (idx, raw) in headers.iter().enumerate() {
            let name = raw.trim_start_matches('\u{feff}').trim().to_string();
            // First occurrence wins when a header is duplicated.
            positions.entry(name.to_ascii_lowercase()).or_insert(idx);
            names.push(name);
        }
        Self { names, positions }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Position of the first alias present in the header.
    pub fn position(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.positions.get(&alias.to_ascii_lowercase()).copied())
    }
}

/// A fully-read delimited file whose columns are addressed by name.
#[derive(Debug, Clone)]
pub struct DelimitedTable {
    label: String,
    header: HeaderIndex,
    rows: Vec<StringRecord>,
    malformed_rows: usize,
}

impl DelimitedTable {
    pub fn from_path(path: &Path) -> Result<Self, ParserError> {
        let label = path.display().to_string();
        let file = File::open(path).map_err(|source| ParserError::Io {
            file: label.clone(),
            source,
        })?;
        Self::from_reader(label, file)
    }

    pub fn from_reader<R: Read>(label: impl Into<String>, reader: R) -> Result<Self, ParserError> {
        let label = label.into();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|err| ParserError::from_csv(&label, err))?
            .clone();
        if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
            return Err(ParserError::MissingHeader { file: label });
        }

        let mut rows = Vec::new();
        let mut malformed_rows = 0;
        for record in reader.records() {
            match record {
                Ok(record) => rows.push(record),
                Err(err) if err.is_io_error() => return Err(ParserError::from_csv(&label, err)),
                Err(_) => malformed_rows += 1,
            }
        }

        Ok(Self {
            label,
            header: HeaderIndex::new(&headers),
            rows,
            malformed_rows,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn header(&self) -> &HeaderIndex {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Records the CSV reader could not decode (invalid UTF-8 and similar).
    pub fn malformed_rows(&self) -> usize {
        self.malformed_rows
    }

    pub fn column(&self, aliases: &[&str]) -> Option<usize> {
        self.header.position(aliases)
    }

    pub fn require_column(&self, aliases: &[&str]) -> Result<usize, ParserError> {
        self.column(aliases).ok_or_else(|| ParserError::MissingColumn {
            file: self.label.clone(),
            column: aliases.first().copied().unwrap_or_default().to_string(),
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|record| Row { record })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    record: &'a StringRecord,
}

impl<'a> Row<'a> {
    /// Trimmed field at `position`; blank and missing fields read as `None`.
    pub fn get(&self, position: Option<usize>) -> Option<&'a str> {
        position
            .and_then(|idx| self.record.get(idx))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}
