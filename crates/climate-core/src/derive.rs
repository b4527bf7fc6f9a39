use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::config::BoundingBox;
use crate::model::{CanonicalPermit, PermitCategory, PolicyEra, RawPermit, RelevanceFlags};

/// Five-digit city zip codes: 91xxx and 92xxx.
static ZIP_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"9[12][0-9]{3}").expect("valid zip regex"));

const SOLAR_TOKENS: &[&str] = &["PHOTOVOLTAIC", "PV", "SOLAR"];
const ELECTRICAL_TOKEN: &str = "ELECTRICAL";
const MECHANICAL_TOKEN: &str = "MECHANICAL";
const COMBINATION_BUILDING_TOKEN: &str = "COMBINATION BUILDING";
const BUILDING_PERMIT_PREFIX: &str = "BUILDING PERMIT";

const CAP_ADOPTED_YEAR: i32 = 2015;
const EXPEDITED_YEAR: i32 = 2018;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeriveSummary {
    pub rows_in: usize,
    pub rows_out: usize,
    pub outside_geofence: usize,
}

pub fn extract_zip_code(address: Option<&str>) -> Option<String> {
    ZIP_CODE
        .find(address?)
        .map(|found| found.as_str().to_string())
}

/// Days from creation to issue; `None` unless both dates exist and issue does
/// not precede creation.
pub fn approval_days(created: Option<NaiveDate>, issued: Option<NaiveDate>) -> Option<i64> {
    let days = (issued? - created?).num_days();
    (days >= 0).then_some(days)
}

/// Year and month of record: issue date, falling back to creation date.
pub fn record_period(created: Option<NaiveDate>, issued: Option<NaiveDate>) -> Option<(i32, i32)> {
    issued
        .or(created)
        .map(|date| (date.year(), date.month() as i32))
}

fn normalized_label(approval_type: Option<&str>) -> String {
    approval_type
        .map(|label| label.trim().to_uppercase())
        .unwrap_or_default()
}

pub fn relevance_flags(approval_type: Option<&str>) -> RelevanceFlags {
    let label = normalized_label(approval_type);
    RelevanceFlags {
        solar: is_solar_label(&label),
        electrical: label.contains(ELECTRICAL_TOKEN),
        mechanical: label.contains(MECHANICAL_TOKEN),
    }
}

/// First matching category in priority order Solar/PV, Electrical,
/// Mechanical/HVAC, Building; anything else is Other.
pub fn classify(approval_type: Option<&str>) -> PermitCategory {
    let label = normalized_label(approval_type);
    if is_solar_label(&label) {
        PermitCategory::SolarPv
    } else if label.contains(ELECTRICAL_TOKEN) {
        PermitCategory::Electrical
    } else if label.contains(MECHANICAL_TOKEN) {
        PermitCategory::MechanicalHvac
    } else if label.contains(COMBINATION_BUILDING_TOKEN)
        || label.starts_with(BUILDING_PERMIT_PREFIX)
    {
        PermitCategory::Building
    } else {
        PermitCategory::Other
    }
}

fn is_solar_label(label: &str) -> bool {
    SOLAR_TOKENS.iter().any(|token| label.contains(token))
}

pub fn policy_era(year: Option<i32>) -> Option<PolicyEra> {
    match year? {
        y if y < CAP_ADOPTED_YEAR => Some(PolicyEra::PreCap),
        y if y < EXPEDITED_YEAR => Some(PolicyEra::CapAdopted),
        _ => Some(PolicyEra::ExpeditedEra),
    }
}

pub fn derive_permit(record: RawPermit) -> CanonicalPermit {
    let period = record_period(record.dates.created, record.dates.issued);
    let approval_year = period.map(|(year, _)| year);
    let approval_type = record.approval_type.as_deref();

    CanonicalPermit {
        zip_code: extract_zip_code(record.address.as_deref()),
        approval_days: approval_days(record.dates.created, record.dates.issued),
        approval_year,
        approval_month: period.map(|(_, month)| month),
        category: classify(approval_type),
        flags: relevance_flags(approval_type),
        policy_era: policy_era(approval_year),
        record,
    }
}

/// Derives every attribute for the deduplicated rows and drops rows whose
/// coordinates fall outside the city.
pub fn derive_permits(
    records: Vec<RawPermit>,
    geofence: &BoundingBox,
) -> (Vec<CanonicalPermit>, DeriveSummary) {
    let rows_in = records.len();
    let permits: Vec<CanonicalPermit> = records
        .into_iter()
        .filter(|record| geofence.admits(record.lat, record.lng))
        .map(derive_permit)
        .collect();

    let summary = DeriveSummary {
        rows_in,
        rows_out: permits.len(),
        outside_geofence: rows_in - permits.len(),
    };
    info!(
        rows_in = summary.rows_in,
        rows_out = summary.rows_out,
        dropped = summary.outside_geofence,
        "derived permit fields"
    );

    (permits, summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn zip_code_takes_first_city_match() {
        assert_eq!(
            extract_zip_code(Some("4100 Park Blvd San Diego CA 92103-2240")),
            Some("92103".to_string())
        );
        assert_eq!(
            extract_zip_code(Some("PO 91911 then 92101")),
            Some("91911".to_string())
        );
        assert_eq!(extract_zip_code(Some("Los Angeles CA 90012")), None);
        assert_eq!(extract_zip_code(Some("Suite 9210")), None);
        assert_eq!(extract_zip_code(None), None);
    }

    #[test]
    fn same_day_approval_is_zero_days() {
        assert_eq!(approval_days(date(2021, 3, 1), date(2021, 3, 1)), Some(0));
        assert_eq!(approval_days(date(2021, 3, 1), date(2021, 3, 11)), Some(10));
        assert_eq!(approval_days(None, date(2021, 3, 11)), None);
    }

    #[test]
    fn period_falls_back_to_creation() {
        assert_eq!(record_period(date(2014, 12, 30), date(2015, 1, 2)), Some((2015, 1)));
        assert_eq!(record_period(date(2014, 12, 30), None), Some((2014, 12)));
        assert_eq!(record_period(None, None), None);
    }

    #[test]
    fn building_label_rules() {
        assert_eq!(classify(Some("Building Permit")), PermitCategory::Building);
        assert_eq!(
            classify(Some("building permit - addition")),
            PermitCategory::Building
        );
        assert_eq!(
            classify(Some("Combination Building Permit")),
            PermitCategory::Building
        );
        assert_eq!(classify(Some("Grading Building Permit")), PermitCategory::Other);
        assert_eq!(classify(Some("Mechanical")), PermitCategory::MechanicalHvac);
        assert_eq!(classify(None), PermitCategory::Other);
        assert_eq!(classify(Some("")), PermitCategory::Other);
    }

    #[test]
    fn mechanical_outranks_building() {
        let label = Some("Mechanical Building Permit");
        assert_eq!(classify(label), PermitCategory::MechanicalHvac);
        assert!(relevance_flags(label).mechanical);
    }

    #[test]
    fn policy_era_boundaries() {
        assert_eq!(policy_era(Some(2014)), Some(PolicyEra::PreCap));
        assert_eq!(policy_era(Some(2015)), Some(PolicyEra::CapAdopted));
        assert_eq!(policy_era(Some(2017)), Some(PolicyEra::CapAdopted));
        assert_eq!(policy_era(Some(2018)), Some(PolicyEra::ExpeditedEra));
        assert_eq!(policy_era(None), None);
    }
}
