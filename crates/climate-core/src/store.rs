use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::{DataFrame, ParquetReader, SerReader};
use tracing::debug;

use crate::error::Result;

const PARQUET_EXTENSION: &str = "parquet";

/// A directory of named Parquet tables. Every write lands in a hidden
/// temporary file first and is renamed into place, so readers only ever see
/// a complete table or no table.
#[derive(Debug, Clone)]
pub struct TableStore {
    dir: PathBuf,
}

impl TableStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{PARQUET_EXTENSION}"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.table_path(name).is_file()
    }

    /// Writes `df` as table `name`, replacing any previous version. Returns the
    /// size of the written file in bytes.
    pub fn write(&self, name: &str, df: &mut DataFrame) -> Result<u64> {
        let target = self.table_path(name);
        let bytes = write_atomic(&target, |writer| {
            ParquetWriter::new(writer)
                .with_compression(ParquetCompression::Zstd(None))
                .with_statistics(StatisticsOptions::default())
                .finish(df)?;
            Ok(())
        })?;
        debug!(table = name, bytes, rows = df.height(), "table written");
        Ok(bytes)
    }

    pub fn open(&self, name: &str) -> Result<Option<DataFrame>> {
        let path = self.table_path(name);
        if !path.is_file() {
            return Ok(None);
        }
        let file = File::open(&path)?;
        Ok(Some(ParquetReader::new(file).finish()?))
    }

    /// Row count of table `name` from the Parquet footer, without decoding
    /// any column data.
    pub fn row_count(&self, name: &str) -> Result<Option<usize>> {
        let path = self.table_path(name);
        if !path.is_file() {
            return Ok(None);
        }
        let file = File::open(&path)?;
        Ok(Some(ParquetReader::new(file).num_rows()?))
    }

    /// Deletes table `name` if present; returns whether anything was removed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let path = self.table_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Writes through `fill` into a sibling temp file, syncs it, then renames it
/// over `target`. The temp file is removed if anything fails.
pub fn write_atomic<F>(target: &Path, fill: F) -> Result<u64>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let dir = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.tmp"));

    let result = (|| -> Result<u64> {
        let mut writer = BufWriter::new(File::create(&temp)?);
        fill(&mut writer)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        let bytes = file.metadata()?.len();
        drop(file);
        fs::rename(&temp, target)?;
        Ok(bytes)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}
