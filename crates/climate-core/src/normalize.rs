use std::path::{Path, PathBuf};

use climate_parser::{
    parse_optional_date, parse_optional_f64, parse_optional_text, DelimitedTable, ParserError,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::model::{LifecycleDates, RawPermit, SourceSystem};

/// Column names (case-insensitive, first match wins) for each canonical field
/// of one permit source.
#[derive(Debug)]
pub struct SourceSchema {
    pub source: SourceSystem,
    pub approval_id: &'static [&'static str],
    pub project_id: &'static [&'static str],
    pub job_id: &'static [&'static str],
    pub address: &'static [&'static str],
    pub apn: &'static [&'static str],
    pub lat: &'static [&'static str],
    pub lng: &'static [&'static str],
    pub approval_type: &'static [&'static str],
    pub approval_status: &'static [&'static str],
    pub date_create: &'static [&'static str],
    pub date_issue: &'static [&'static str],
    pub date_expire: &'static [&'static str],
    pub date_close: &'static [&'static str],
    pub valuation: &'static [&'static str],
}

pub static LEGACY_SCHEMA: SourceSchema = SourceSchema {
    source: SourceSystem::Legacy,
    approval_id: &["APPROVAL_ID"],
    project_id: &["PROJECT_ID"],
    job_id: &["JOB_ID"],
    address: &["ADDRESS_JOB"],
    apn: &["JOB_APN"],
    lat: &["LAT_JOB"],
    lng: &["LNG_JOB"],
    approval_type: &["APPROVAL_TYPE"],
    approval_status: &["APPROVAL_STATUS"],
    date_create: &["DATE_APPROVAL_CREATE"],
    date_issue: &["DATE_APPROVAL_ISSUE"],
    date_expire: &["DATE_APPROVAL_EXPIRE"],
    date_close: &["DATE_APPROVAL_CLOSE"],
    valuation: &["APPROVAL_VALUATION"],
};

pub static CURRENT_SCHEMA: SourceSchema = SourceSchema {
    source: SourceSystem::Current,
    approval_id: &["APPROVAL_ID"],
    project_id: &["PROJECT_ID"],
    job_id: &["JOB_ID"],
    address: &["ADDRESS_JOB", "JOB_ADDRESS"],
    apn: &["JOB_APN", "APN"],
    lat: &["LAT_JOB", "JOB_LAT"],
    lng: &["LNG_JOB", "JOB_LNG"],
    approval_type: &["APPROVAL_TYPE"],
    approval_status: &["APPROVAL_STATUS"],
    date_create: &["DATE_APPROVAL_CREATE"],
    date_issue: &["DATE_APPROVAL_ISSUE"],
    date_expire: &["DATE_APPROVAL_EXPIRE"],
    date_close: &["DATE_APPROVAL_CLOSE"],
    valuation: &["APPROVAL_VALUATION"],
};

pub fn schema_for(source: SourceSystem) -> &'static SourceSchema {
    match source {
        SourceSystem::Legacy => &LEGACY_SCHEMA,
        SourceSystem::Current => &CURRENT_SCHEMA,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeStats {
    pub source: String,
    pub files_read: usize,
    pub files_missing: usize,
    pub rows_read: usize,
    pub rows_kept: usize,
    pub rows_dropped: usize,
    pub malformed_rows: usize,
}

impl NormalizeStats {
    fn new(source: SourceSystem) -> Self {
        Self {
            source: source.as_str().to_string(),
            ..Self::default()
        }
    }
}

/// Maps every row of one source file onto [`RawPermit`]. Unparseable values
/// become `None`; rows without an approval id are dropped and counted.
pub fn normalize_table(
    table: &DelimitedTable,
    schema: &SourceSchema,
    stats: &mut NormalizeStats,
) -> std::result::Result<Vec<RawPermit>, ParserError> {
    let approval_id = table.require_column(schema.approval_id)?;
    let project_id = table.column(schema.project_id);
    let job_id = table.column(schema.job_id);
    let address = table.column(schema.address);
    let apn = table.column(schema.apn);
    let lat = table.column(schema.lat);
    let lng = table.column(schema.lng);
    let approval_type = table.column(schema.approval_type);
    let approval_status = table.column(schema.approval_status);
    let date_create = table.column(schema.date_create);
    let date_issue = table.column(schema.date_issue);
    let date_expire = table.column(schema.date_expire);
    let date_close = table.column(schema.date_close);
    let valuation = table.column(schema.valuation);

    stats.malformed_rows += table.malformed_rows();
    stats.rows_read += table.len() + table.malformed_rows();

    let mut permits = Vec::with_capacity(table.len());
    for row in table.rows() {
        let Some(id) = parse_optional_text(row.get(Some(approval_id))) else {
            stats.rows_dropped += 1;
            continue;
        };

        permits.push(RawPermit {
            approval_id: id,
            project_id: parse_optional_text(row.get(project_id)),
            job_id: parse_optional_text(row.get(job_id)),
            address: parse_optional_text(row.get(address)),
            apn: parse_optional_text(row.get(apn)),
            lat: parse_optional_f64(row.get(lat)),
            lng: parse_optional_f64(row.get(lng)),
            approval_type: parse_optional_text(row.get(approval_type)),
            approval_status: parse_optional_text(row.get(approval_status)),
            dates: LifecycleDates {
                created: parse_optional_date(row.get(date_create)),
                issued: parse_optional_date(row.get(date_issue)),
                expired: parse_optional_date(row.get(date_expire)),
                closed: parse_optional_date(row.get(date_close)),
            },
            valuation: parse_optional_f64(row.get(valuation)),
            source_system: schema.source,
        });
    }

    stats.rows_kept += permits.len();
    Ok(permits)
}

/// Reads and normalizes every file of one source. Missing or empty files are
/// treated as contributing no rows.
pub fn load_source(
    source: SourceSystem,
    paths: &[PathBuf],
) -> Result<(Vec<RawPermit>, NormalizeStats)> {
    let schema = schema_for(source);
    let mut stats = NormalizeStats::new(source);
    let mut permits = Vec::new();

    for path in paths {
        let Some(table) = open_source_file(path)? else {
            warn!(source = source.as_str(), path = %path.display(), "permit file unavailable, treating as empty");
            stats.files_missing += 1;
            continue;
        };
        stats.files_read += 1;
        permits.extend(normalize_table(&table, schema, &mut stats)?);
    }

    info!(
        source = source.as_str(),
        files_read = stats.files_read,
        rows_read = stats.rows_read,
        rows_kept = stats.rows_kept,
        dropped = stats.rows_dropped + stats.malformed_rows,
        "normalized permit source"
    );

    Ok((permits, stats))
}

fn open_source_file(path: &Path) -> Result<Option<DelimitedTable>> {
    if !path.is_file() {
        return Ok(None);
    }
    match DelimitedTable::from_path(path) {
        Ok(table) => Ok(Some(table)),
        Err(ParserError::MissingHeader { .. }) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
