use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::Result;
use polars::prelude::*;

use climate_core::aggregates::{all_aggregates, AggregateInput};
use climate_core::store::TableStore;
use climate_core::{list_tables, run, PipelineConfig, StageStatus};

const LEGACY_ACTIVE: &str = "\
APPROVAL_ID,ADDRESS_JOB,LAT_JOB,LNG_JOB,APPROVAL_TYPE,APPROVAL_STATUS,DATE_APPROVAL_CREATE,DATE_APPROVAL_ISSUE,DATE_APPROVAL_CLOSE,APPROVAL_VALUATION
P-1,\"1 A St, San Diego, CA 92101\",32.71,-117.16,Photovoltaic,Issued,2016-02-01,2016-02-11,,12000
P-2,\"2 B St, San Diego, CA 92104\",40.0,-117.10,Photovoltaic,Issued,2017-01-01,2017-01-02,,5000
P-3,\"3 C St, San Diego, CA 92101\",32.72,-117.15,Electrical,Issued,2019-05-01,2019-05-01,,not a number
";

const LEGACY_CLOSED: &str = "\
APPROVAL_ID,ADDRESS_JOB,LAT_JOB,LNG_JOB,APPROVAL_TYPE,APPROVAL_STATUS,DATE_APPROVAL_CREATE,DATE_APPROVAL_ISSUE,DATE_APPROVAL_CLOSE,APPROVAL_VALUATION
P-1,\"1 A St, San Diego, CA 92101\",32.71,-117.16,Photovoltaic,Closed,2016-02-01,2016-02-11,2016-03-01,12000
";

const CURRENT_ACTIVE: &str = "\
APPROVAL_ID,JOB_ADDRESS,JOB_LAT,JOB_LNG,APPROVAL_TYPE,DATE_APPROVAL_CREATE,DATE_APPROVAL_ISSUE
P-4,\"4 D St, San Diego, CA 92103\",32.74,-117.13,Mechanical Permit,2020-07-01,2020-07-15
";

const ELECTRICITY: &str = "\
ZipCode,Month,Year,CustomerClass,TotalCustomers,TotalkWh,AveragekWh
92101,1,2020,R,100,50000,500
92101,2,2020,R,100,40000,400
92101,1,2020,C,10,90000,9000
90210,1,2020,R,5,100,20
";

const GAS: &str = "\
ZipCode,Month,Year,CustomerClass,TotalCustomers,TotalTherms,AverageTherms
92101,1,2020,R,80,2000,25
";

fn write_permit_fixtures(data_dir: &Path) -> Result<()> {
    let raw = data_dir.join("raw");
    fs::create_dir_all(&raw)?;
    fs::write(raw.join("set1_active.csv"), LEGACY_ACTIVE)?;
    fs::write(raw.join("set1_closed.csv"), LEGACY_CLOSED)?;
    fs::write(raw.join("set2_active.csv"), CURRENT_ACTIVE)?;
    Ok(())
}

fn write_utility_fixtures(data_dir: &Path) -> Result<()> {
    let sdge = data_dir.join("raw").join("sdge");
    fs::create_dir_all(&sdge)?;
    fs::write(sdge.join("SDGE-ELEC-2020-Q1.csv"), ELECTRICITY)?;
    fs::write(sdge.join("SDGE-GAS-2020-Q1.csv"), GAS)?;
    fs::write(sdge.join("SDGE-GAS-2020-Q2.csv"), "")?;
    Ok(())
}

fn config_for(data_dir: &Path) -> PipelineConfig {
    PipelineConfig::default().with_data_dir(data_dir)
}

fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    Ok(df
        .column(name)?
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect())
}

#[test]
fn missing_consumption_skips_only_consumption_aggregates() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_permit_fixtures(dir.path())?;
    let config = config_for(dir.path());

    let report = run(&config)?;

    assert!(report.is_complete());
    assert_eq!(
        report.stage("energy_consumption").map(|s| s.status),
        Some(StageStatus::Skipped)
    );

    let aggregated = TableStore::new(config.aggregated_dir());
    for table in all_aggregates() {
        let stage = report.stage(table.name).unwrap();
        match table.input {
            AggregateInput::Permits => {
                assert_eq!(stage.status, StageStatus::Success, "{}", table.name);
                assert!(aggregated.exists(table.name), "{} missing", table.name);
            }
            AggregateInput::Consumption => {
                assert_eq!(stage.status, StageStatus::Skipped, "{}", table.name);
                assert!(!aggregated.exists(table.name), "{} present", table.name);
            }
        }
    }

    assert!(config.report_path().is_file());
    let saved: serde_json::Value = serde_json::from_slice(&fs::read(config.report_path())?)?;
    assert_eq!(saved["stages"].as_array().map(Vec::len), Some(11));
    Ok(())
}

#[test]
fn canonical_permits_are_unique_and_inside_the_city() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_permit_fixtures(dir.path())?;
    let config = config_for(dir.path());

    let report = run(&config)?;
    assert_eq!(report.dedup.rows_in, 5);
    assert_eq!(report.dedup.rows_out, 4);
    assert_eq!(report.derive.outside_geofence, 1);

    let processed = TableStore::new(config.processed_dir());
    let permits = processed.open("climate_permits")?.expect("permit table written");

    let ids = string_values(&permits, "approval_id")?;
    assert_eq!(
        ids,
        vec![Some("P-1".into()), Some("P-3".into()), Some("P-4".into())]
    );
    let distinct: HashSet<&Option<String>> = ids.iter().collect();
    assert_eq!(distinct.len(), permits.height());

    let status = string_values(&permits, "approval_status")?;
    assert_eq!(status[0].as_deref(), Some("Closed"));

    let categories = string_values(&permits, "permit_category")?;
    assert_eq!(
        categories,
        vec![
            Some("Solar/PV".into()),
            Some("Electrical".into()),
            Some("Mechanical/HVAC".into())
        ]
    );

    let valuation = permits.column("valuation")?.f64()?;
    assert_eq!(valuation.get(1), None);
    let days = permits.column("approval_days")?.i64()?;
    assert_eq!(days.get(0), Some(10));
    assert_eq!(days.get(1), Some(0));
    Ok(())
}

#[test]
fn consumption_aggregates_follow_utility_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_permit_fixtures(dir.path())?;
    write_utility_fixtures(dir.path())?;
    let config = config_for(dir.path());

    let report = run(&config)?;
    assert!(report.is_complete());
    assert_eq!(report.consumption.files_found, 2);
    assert_eq!(report.consumption.rows_outside_city, 1);

    let aggregated = TableStore::new(config.aggregated_dir());
    let by_zip = aggregated
        .open("energy_by_zip_annual")?
        .expect("residential table written");
    assert_eq!(by_zip.height(), 1);
    assert_eq!(by_zip.column("total_kwh")?.i64()?.get(0), Some(90_000));
    assert_eq!(by_zip.column("elec_customers")?.i64()?.get(0), Some(200));
    assert_eq!(by_zip.column("avg_kwh_per_customer")?.i32()?.get(0), Some(450));
    assert_eq!(by_zip.column("total_thm")?.i64()?.get(0), Some(2_000));
    assert_eq!(by_zip.column("gas_customers")?.i64()?.get(0), Some(80));

    let trends = aggregated.open("energy_trends")?.expect("trend table written");
    assert_eq!(
        string_values(&trends, "customer_class")?,
        vec![Some("C".into()), Some("R".into())]
    );
    assert_eq!(trends.column("quarter")?.i32()?.get(1), Some(1));

    // A later run without utility files must not leave the old tables behind.
    fs::remove_dir_all(config.utility_dir())?;
    let report = run(&config)?;
    assert_eq!(
        report.stage("energy_trends").map(|s| s.status),
        Some(StageStatus::Skipped)
    );
    assert!(!aggregated.exists("energy_trends"));
    assert!(!aggregated.exists("energy_by_zip_annual"));

    let listing = list_tables(&config);
    assert_eq!(listing.len(), 11);
    let consumption = listing
        .iter()
        .find(|table| table.name == "energy_consumption")
        .unwrap();
    assert!(!consumption.present());
    let permits = listing
        .iter()
        .find(|table| table.name == "climate_permits")
        .unwrap();
    let stored = TableStore::new(config.processed_dir())
        .open("climate_permits")?
        .expect("permit table written");
    assert_eq!(permits.rows, Some(stored.height()));
    Ok(())
}

#[test]
fn missing_permit_sources_yield_empty_tables() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_for(dir.path());

    let report = run(&config)?;
    assert_eq!(
        report.stage("climate_permits").and_then(|s| s.row_count),
        Some(0)
    );
    assert_eq!(report.permit_sources.len(), 2);
    assert!(report.permit_sources.iter().all(|s| s.files_missing == 2));

    let aggregated = TableStore::new(config.aggregated_dir());
    let annual = aggregated.open("solar_annual")?.expect("empty table written");
    assert_eq!(annual.height(), 0);
    Ok(())
}
