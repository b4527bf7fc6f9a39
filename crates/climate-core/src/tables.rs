use chrono::NaiveDate;
use polars::prelude::{Column, DataFrame, NamedFrom, PolarsResult, Series};

use crate::model::{CanonicalPermit, ConsumptionRecord, FuelType};

pub const PERMITS_TABLE: &str = "climate_permits";
pub const CONSUMPTION_TABLE: &str = "energy_consumption";

pub(crate) fn column<T, P>(name: &str, values: P) -> Column
where
    Series: NamedFrom<P, T>,
    T: ?Sized,
{
    Series::new(name.into(), values).into()
}

fn text_values<'a>(
    permits: &'a [CanonicalPermit],
    field: impl Fn(&'a CanonicalPermit) -> Option<&'a str>,
) -> Vec<Option<&'a str>> {
    permits.iter().map(field).collect()
}

fn date_values(
    permits: &[CanonicalPermit],
    field: impl Fn(&CanonicalPermit) -> Option<NaiveDate>,
) -> Vec<Option<NaiveDate>> {
    permits.iter().map(field).collect()
}

/// Columnar form of the canonical permit table.
pub fn permits_frame(permits: &[CanonicalPermit]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        column(
            "approval_id",
            permits
                .iter()
                .map(|p| p.record.approval_id.as_str())
                .collect::<Vec<_>>(),
        ),
        column("project_id", text_values(permits, |p| p.record.project_id.as_deref())),
        column("job_id", text_values(permits, |p| p.record.job_id.as_deref())),
        column("address", text_values(permits, |p| p.record.address.as_deref())),
        column("apn", text_values(permits, |p| p.record.apn.as_deref())),
        column("lat", permits.iter().map(|p| p.record.lat).collect::<Vec<_>>()),
        column("lng", permits.iter().map(|p| p.record.lng).collect::<Vec<_>>()),
        column("approval_type", text_values(permits, |p| p.record.approval_type.as_deref())),
        column("approval_status", text_values(permits, |p| p.record.approval_status.as_deref())),
        column("date_approval_create", date_values(permits, |p| p.record.dates.created)),
        column("date_approval_issue", date_values(permits, |p| p.record.dates.issued)),
        column("date_approval_expire", date_values(permits, |p| p.record.dates.expired)),
        column("date_approval_close", date_values(permits, |p| p.record.dates.closed)),
        column(
            "valuation",
            permits.iter().map(|p| p.record.valuation).collect::<Vec<_>>(),
        ),
        column(
            "source_system",
            permits
                .iter()
                .map(|p| p.record.source_system.as_str())
                .collect::<Vec<_>>(),
        ),
        column("zip_code", text_values(permits, |p| p.zip_code.as_deref())),
        column(
            "approval_days",
            permits.iter().map(|p| p.approval_days).collect::<Vec<_>>(),
        ),
        column(
            "approval_year",
            permits.iter().map(|p| p.approval_year).collect::<Vec<_>>(),
        ),
        column(
            "approval_month",
            permits.iter().map(|p| p.approval_month).collect::<Vec<_>>(),
        ),
        column("is_solar", permits.iter().map(|p| p.flags.solar).collect::<Vec<_>>()),
        column(
            "is_electrical",
            permits.iter().map(|p| p.flags.electrical).collect::<Vec<_>>(),
        ),
        column(
            "is_mechanical",
            permits.iter().map(|p| p.flags.mechanical).collect::<Vec<_>>(),
        ),
        column(
            "permit_category",
            permits
                .iter()
                .map(|p| p.category.as_str())
                .collect::<Vec<_>>(),
        ),
        column(
            "policy_era",
            permits
                .iter()
                .map(|p| p.policy_era.map(|era| era.as_str()))
                .collect::<Vec<_>>(),
        ),
        column(
            "is_climate_relevant",
            permits
                .iter()
                .map(CanonicalPermit::is_climate_relevant)
                .collect::<Vec<_>>(),
        ),
    ])
}

/// Columnar form of the canonical consumption table; the other fuel's usage
/// columns are null on every row.
pub fn consumption_frame(records: &[ConsumptionRecord]) -> PolarsResult<DataFrame> {
    let average_for = |fuel: FuelType| -> Vec<Option<f64>> {
        records
            .iter()
            .map(|r| if r.fuel_type == fuel { r.average_usage } else { None })
            .collect()
    };
    let average_kwh = average_for(FuelType::Electricity);
    let average_thm = average_for(FuelType::Gas);

    DataFrame::new(vec![
        column(
            "zip_code",
            records.iter().map(|r| r.zip_code.as_str()).collect::<Vec<_>>(),
        ),
        column("month", records.iter().map(|r| r.month).collect::<Vec<_>>()),
        column("year", records.iter().map(|r| r.year).collect::<Vec<_>>()),
        column(
            "customer_class",
            records
                .iter()
                .map(|r| r.customer_class.as_deref())
                .collect::<Vec<_>>(),
        ),
        column(
            "total_customers",
            records.iter().map(|r| r.total_customers).collect::<Vec<_>>(),
        ),
        column(
            "total_kwh",
            records.iter().map(|r| r.total_kwh()).collect::<Vec<_>>(),
        ),
        column("avg_kwh", average_kwh),
        column(
            "total_thm",
            records.iter().map(|r| r.total_therms()).collect::<Vec<_>>(),
        ),
        column("avg_thm", average_thm),
        column(
            "fuel_type",
            records
                .iter()
                .map(|r| r.fuel_type.as_str())
                .collect::<Vec<_>>(),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::derive_permit;
    use crate::model::{LifecycleDates, RawPermit, SourceSystem};
    use polars::prelude::DataType;

    #[test]
    fn lifecycle_dates_become_date_columns() -> PolarsResult<()> {
        let created = NaiveDate::from_ymd_opt(2021, 3, 10).unwrap();
        let permit = derive_permit(RawPermit {
            approval_id: "A-1".to_string(),
            project_id: None,
            job_id: None,
            address: None,
            apn: None,
            lat: None,
            lng: None,
            approval_type: None,
            approval_status: None,
            dates: LifecycleDates {
                created: Some(created),
                issued: None,
                expired: None,
                closed: None,
            },
            valuation: None,
            source_system: SourceSystem::Current,
        });
        let df = permits_frame(&[permit])?;

        let create = df.column("date_approval_create")?;
        assert_eq!(create.dtype(), &DataType::Date);
        assert_eq!(create.date()?.as_date_iter().next(), Some(Some(created)));
        assert_eq!(df.column("date_approval_issue")?.null_count(), 1);
        Ok(())
    }
}
