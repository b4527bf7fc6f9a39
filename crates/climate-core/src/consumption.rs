use std::path::{Path, PathBuf};

use climate_parser::{
    parse_optional_f64, parse_optional_i32, parse_optional_i64, parse_optional_text,
    DelimitedTable, ParserError,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::model::{ConsumptionRecord, FuelType};

const EXTRACT_PREFIX: &str = "SDGE";

/// One quarterly utility extract found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtilityExtract {
    pub path: PathBuf,
    pub fuel: FuelType,
    pub year: i32,
    pub quarter: u8,
}

/// Column names shared by both fuels, plus the fuel-specific usage columns.
struct ExtractColumns {
    total_usage: &'static [&'static str],
    average_usage: &'static [&'static str],
}

const ZIP_COLUMN: &[&str] = &["ZipCode", "Zip_Code", "Zip"];
const MONTH_COLUMN: &[&str] = &["Month"];
const YEAR_COLUMN: &[&str] = &["Year"];
const CLASS_COLUMN: &[&str] = &["CustomerClass", "Customer_Class"];
const CUSTOMERS_COLUMN: &[&str] = &["TotalCustomers", "Total_Customers"];

fn usage_columns(fuel: FuelType) -> ExtractColumns {
    match fuel {
        FuelType::Electricity => ExtractColumns {
            total_usage: &["TotalkWh", "Total_kWh"],
            average_usage: &["AveragekWh", "Average_kWh"],
        },
        FuelType::Gas => ExtractColumns {
            total_usage: &["TotalTherms", "Total_Therms", "TotalThm"],
            average_usage: &["AverageTherms", "Average_Therms", "AverageThm"],
        },
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsumptionStats {
    pub files_found: usize,
    pub files_read: usize,
    pub files_skipped: usize,
    pub rows_read: usize,
    pub rows_kept: usize,
    pub rows_outside_city: usize,
    pub malformed_rows: usize,
}

/// Parses `SDGE-{ELEC|GAS}-{year}-Q{quarter}.csv`.
pub fn parse_extract_name(path: &Path) -> Option<UtilityExtract> {
    let stem = path.file_stem()?.to_str()?;
    let mut parts = stem.split('-');
    if !parts.next()?.eq_ignore_ascii_case(EXTRACT_PREFIX) {
        return None;
    }
    let fuel = match parts.next()?.to_ascii_uppercase().as_str() {
        "ELEC" => FuelType::Electricity,
        "GAS" => FuelType::Gas,
        _ => return None,
    };
    let year = parts.next()?.parse::<i32>().ok()?;
    let quarter = parts
        .next()?
        .strip_prefix(|c: char| c.eq_ignore_ascii_case(&'Q'))?
        .parse::<u8>()
        .ok()
        .filter(|q| (1..=4).contains(q))?;
    if parts.next().is_some() {
        return None;
    }
    Some(UtilityExtract {
        path: path.to_path_buf(),
        fuel,
        year,
        quarter,
    })
}

/// Lists the non-empty extracts in `dir`, ordered by year, quarter and fuel.
/// A missing directory yields an empty list.
pub fn discover_extracts(dir: &Path) -> Result<Vec<UtilityExtract>> {
    if !dir.is_dir() {
        warn!(path = %dir.display(), "utility directory not found, no consumption data this run");
        return Ok(Vec::new());
    }

    let pattern = dir.join(format!("{EXTRACT_PREFIX}-*.csv"));
    let pattern = pattern
        .to_str()
        .ok_or_else(|| PipelineError::Config(format!("non UTF-8 path {}", dir.display())))?;
    let entries =
        glob::glob(pattern).map_err(|err| PipelineError::Config(format!("bad glob: {err}")))?;

    let mut extracts = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(err) => {
                warn!("unreadable utility extract entry: {err}");
                continue;
            }
        };
        let empty = path.metadata().map(|meta| meta.len() == 0).unwrap_or(true);
        if empty {
            warn!(path = %path.display(), "skipping empty utility extract");
            continue;
        }
        match parse_extract_name(&path) {
            Some(extract) => extracts.push(extract),
            None => warn!(path = %path.display(), "unrecognized utility extract name"),
        }
    }

    extracts.sort_by_key(|extract| (extract.year, extract.quarter, extract.fuel));
    Ok(extracts)
}

/// Maps one extract onto [`ConsumptionRecord`]s, keeping only zip codes that
/// start with `zip_prefix`.
pub fn normalize_extract(
    table: &DelimitedTable,
    fuel: FuelType,
    zip_prefix: &str,
    stats: &mut ConsumptionStats,
) -> std::result::Result<Vec<ConsumptionRecord>, ParserError> {
    let zip = table.require_column(ZIP_COLUMN)?;
    let month = table.column(MONTH_COLUMN);
    let year = table.column(YEAR_COLUMN);
    let class = table.column(CLASS_COLUMN);
    let customers = table.column(CUSTOMERS_COLUMN);
    let usage = usage_columns(fuel);
    let total_usage = table.column(usage.total_usage);
    let average_usage = table.column(usage.average_usage);

    stats.rows_read += table.len() + table.malformed_rows();
    stats.malformed_rows += table.malformed_rows();

    let mut records = Vec::with_capacity(table.len());
    for row in table.rows() {
        let zip_code = match parse_optional_text(row.get(Some(zip))) {
            Some(code) if code.starts_with(zip_prefix) => code,
            _ => {
                stats.rows_outside_city += 1;
                continue;
            }
        };

        records.push(ConsumptionRecord {
            zip_code,
            month: parse_optional_i32(row.get(month)),
            year: parse_optional_i32(row.get(year)),
            customer_class: parse_optional_text(row.get(class)),
            total_customers: parse_optional_i64(row.get(customers)),
            total_usage: parse_optional_f64(row.get(total_usage)),
            average_usage: parse_optional_f64(row.get(average_usage)),
            fuel_type: fuel,
        });
    }

    stats.rows_kept += records.len();
    Ok(records)
}

/// Normalizes every extract. A file that cannot be read or lacks a zip column
/// is skipped with a warning so that one bad quarter never blocks the rest.
pub fn load_consumption(
    extracts: &[UtilityExtract],
    zip_prefix: &str,
) -> (Vec<ConsumptionRecord>, ConsumptionStats) {
    let mut stats = ConsumptionStats {
        files_found: extracts.len(),
        ..ConsumptionStats::default()
    };
    let mut records = Vec::new();

    for extract in extracts {
        let normalized = DelimitedTable::from_path(&extract.path)
            .and_then(|table| normalize_extract(&table, extract.fuel, zip_prefix, &mut stats));
        match normalized {
            Ok(rows) => {
                stats.files_read += 1;
                records.extend(rows);
            }
            Err(err) => {
                stats.files_skipped += 1;
                warn!(path = %extract.path.display(), "skipping utility extract: {err}");
            }
        }
    }

    info!(
        files_read = stats.files_read,
        rows_read = stats.rows_read,
        rows_out = stats.rows_kept,
        dropped = stats.rows_outside_city + stats.malformed_rows,
        "normalized utility consumption"
    );

    (records, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_names_are_parsed() {
        let extract = parse_extract_name(Path::new("/raw/sdge/SDGE-GAS-2019-Q3.csv")).unwrap();
        assert_eq!(extract.fuel, FuelType::Gas);
        assert_eq!(extract.year, 2019);
        assert_eq!(extract.quarter, 3);

        assert!(parse_extract_name(Path::new("SDGE-ELEC-2019-Q5.csv")).is_none());
        assert!(parse_extract_name(Path::new("SDGE-WATER-2019-Q1.csv")).is_none());
        assert!(parse_extract_name(Path::new("PGE-ELEC-2019-Q1.csv")).is_none());
    }

    #[test]
    fn fuel_columns_are_split() {
        let gas = DelimitedTable::from_reader(
            "gas.csv",
            "ZipCode,Month,Year,CustomerClass,TotalCustomers,TotalTherms,AverageTherms\n\
             92101,1,2020,R,100,2500.5,25\n\
             90210,1,2020,R,50,10,1\n\
             ,1,2020,R,5,1,1\n"
                .as_bytes(),
        )
        .unwrap();
        let mut stats = ConsumptionStats::default();
        let rows = normalize_extract(&gas, FuelType::Gas, "92", &mut stats).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(stats.rows_outside_city, 2);
        let row = &rows[0];
        assert_eq!(row.total_therms(), Some(2500.5));
        assert_eq!(row.total_kwh(), None);
        assert_eq!(row.total_customers, Some(100));
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let extracts = discover_extracts(&dir.path().join("sdge")).unwrap();
        assert!(extracts.is_empty());

        let (records, stats) = load_consumption(&extracts, "92");
        assert!(records.is_empty());
        assert_eq!(stats.files_found, 0);
    }
}
