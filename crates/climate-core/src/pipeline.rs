use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::aggregates::{self, AggregateInputs};
use crate::config::PipelineConfig;
use crate::consumption::{discover_extracts, load_consumption, UtilityExtract};
use crate::derive::derive_permits;
use crate::error::{PipelineError, Result};
use crate::normalize::load_source;
use crate::report::{InputFile, RunReport, StageSummary};
use crate::store::{write_atomic, TableStore};
use crate::tables::{self, CONSUMPTION_TABLE, PERMITS_TABLE};
use crate::unify::deduplicate;

/// Runs the whole transform: permits, consumption, then every aggregate.
///
/// Only a failure to produce the canonical permit table is returned as an
/// error. Consumption and aggregate failures are recorded in the report and
/// the run carries on.
pub fn run(config: &PipelineConfig) -> Result<RunReport> {
    config.validate()?;
    let mut report = RunReport::new(Utc::now());
    info!(run_id = %report.run_id, data_dir = %config.data_dir.display(), "pipeline run started");

    let processed = TableStore::new(config.processed_dir());
    let aggregated = TableStore::new(config.aggregated_dir());

    let permits = build_permits(config, &processed, &mut report)?;

    let extracts = discover_extracts(&config.utility_dir()).unwrap_or_else(|err| {
        warn!("utility extract discovery failed, no consumption data this run: {err}");
        Vec::new()
    });
    report
        .inputs
        .extend(fingerprint_inputs(extracts.iter().map(|extract| extract.path.as_path())));
    let consumption = build_consumption(config, &extracts, &processed, &mut report);

    let inputs = AggregateInputs {
        permits: &permits,
        consumption: consumption.as_ref(),
    };
    report.stages.extend(aggregates::build_all(&inputs, &aggregated));

    report.finished_at = Some(Utc::now());
    write_report(&config.report_path(), &report)?;

    let failed = report.failed_stages().count();
    if failed > 0 {
        warn!(run_id = %report.run_id, failed, "pipeline run finished with failed stages");
    } else {
        info!(run_id = %report.run_id, stages = report.stages.len(), "pipeline run finished");
    }
    Ok(report)
}

fn build_permits(
    config: &PipelineConfig,
    store: &TableStore,
    report: &mut RunReport,
) -> Result<DataFrame> {
    let mut union = Vec::new();
    for (source, paths) in config.permit_sources() {
        report
            .inputs
            .extend(fingerprint_inputs(paths.iter().map(PathBuf::as_path)));
        let (records, stats) = load_source(source, &paths)?;
        union.extend(records);
        report.permit_sources.push(stats);
    }

    let (deduped, dedup) = deduplicate(union);
    report.dedup = dedup;

    let (permits, derive) = derive_permits(deduped, &config.geofence);
    report.derive = derive;

    let written = tables::permits_frame(&permits)
        .map_err(PipelineError::from)
        .and_then(|mut df| store.write(PERMITS_TABLE, &mut df).map(|_| df));
    let df = written.map_err(|err| {
        error!(table = PERMITS_TABLE, "canonical permit table failed: {err}");
        PipelineError::Stage {
            stage: PERMITS_TABLE.to_string(),
            message: err.to_string(),
        }
    })?;

    info!(table = PERMITS_TABLE, rows_out = df.height(), "canonical table written");
    report
        .stages
        .push(StageSummary::success(PERMITS_TABLE, df.height()));
    Ok(df)
}

/// Returns the consumption table the aggregates may use. When the canonical
/// table cannot be written it is withheld, so the consumption aggregates are
/// skipped rather than built from data that was never stored.
fn build_consumption(
    config: &PipelineConfig,
    extracts: &[UtilityExtract],
    store: &TableStore,
    report: &mut RunReport,
) -> Option<DataFrame> {
    let (records, stats) = load_consumption(extracts, &config.utility_zip_prefix);
    report.consumption = stats;

    if records.is_empty() {
        match store.remove(CONSUMPTION_TABLE) {
            Ok(true) => info!(table = CONSUMPTION_TABLE, "removed stale canonical table"),
            Ok(false) => {}
            Err(err) => warn!(table = CONSUMPTION_TABLE, "failed to remove stale table: {err}"),
        }
        warn!(table = CONSUMPTION_TABLE, "no utility consumption data this run");
        report.stages.push(StageSummary::skipped(
            CONSUMPTION_TABLE,
            "no consumption data available",
        ));
        return None;
    }

    let written = tables::consumption_frame(&records)
        .map_err(PipelineError::from)
        .and_then(|mut df| store.write(CONSUMPTION_TABLE, &mut df).map(|_| df));
    match written {
        Ok(df) => {
            info!(table = CONSUMPTION_TABLE, rows_out = df.height(), "canonical table written");
            report
                .stages
                .push(StageSummary::success(CONSUMPTION_TABLE, df.height()));
            Some(df)
        }
        Err(err) => {
            error!(table = CONSUMPTION_TABLE, "canonical consumption table failed: {err}");
            report.stages.push(StageSummary::failed(CONSUMPTION_TABLE, err));
            None
        }
    }
}

fn fingerprint_inputs<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Vec<InputFile> {
    paths
        .into_iter()
        .filter(|path| path.is_file())
        .filter_map(|path| match InputFile::fingerprint(path) {
            Ok(input) => Some(input),
            Err(err) => {
                warn!(path = %path.display(), "could not fingerprint input: {err}");
                None
            }
        })
        .collect()
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    write_atomic(path, |writer| {
        serde_json::to_writer_pretty(&mut *writer, report)?;
        writer.write_all(b"\n")?;
        Ok(())
    })?;
    info!(path = %path.display(), "run report written");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLocation {
    Processed,
    Aggregated,
}

impl TableLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableLocation::Processed => "processed",
            TableLocation::Aggregated => "aggregated",
        }
    }
}

/// What a consumer finds when looking a table up by name.
#[derive(Debug, Clone, Serialize)]
pub struct TableListing {
    pub name: &'static str,
    pub location: TableLocation,
    pub path: PathBuf,
    pub rows: Option<usize>,
    pub error: Option<String>,
}

impl TableListing {
    pub fn present(&self) -> bool {
        self.rows.is_some()
    }
}

/// Lists every table the pipeline can produce with its row count, taken from
/// the Parquet footer.
pub fn list_tables(config: &PipelineConfig) -> Vec<TableListing> {
    let processed = TableStore::new(config.processed_dir());
    let aggregated = TableStore::new(config.aggregated_dir());

    let canonical = [PERMITS_TABLE, CONSUMPTION_TABLE]
        .into_iter()
        .map(|name| (name, TableLocation::Processed, &processed));
    let derived = aggregates::all_aggregates()
        .iter()
        .map(|table| (table.name, TableLocation::Aggregated, &aggregated));

    canonical
        .chain(derived)
        .map(|(name, location, store)| {
            let (rows, error) = match store.row_count(name) {
                Ok(rows) => (rows, None),
                Err(err) => (None, Some(err.to_string())),
            };
            TableListing {
                name,
                location,
                path: store.table_path(name),
                rows,
                error,
            }
        })
        .collect()
}
