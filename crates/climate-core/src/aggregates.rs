use once_cell::sync::Lazy;
use polars::prelude::*;
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::model::FuelType;
use crate::report::StageSummary;
use crate::stats;
use crate::store::TableStore;
use crate::tables::column;

const RESIDENTIAL_CLASS: &str = "R";
const P90: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateInput {
    Permits,
    Consumption,
}

/// The canonical tables every aggregate is computed from. `consumption` is
/// `None` when no utility data was available this run.
#[derive(Debug, Clone, Copy)]
pub struct AggregateInputs<'a> {
    pub permits: &'a DataFrame,
    pub consumption: Option<&'a DataFrame>,
}

impl AggregateInputs<'_> {
    fn permits(&self) -> LazyFrame {
        self.permits.clone().lazy()
    }

    fn consumption(&self) -> Result<LazyFrame> {
        self.consumption
            .map(|df| df.clone().lazy())
            .ok_or_else(|| PipelineError::Stage {
                stage: "aggregates".to_string(),
                message: "no consumption data available".to_string(),
            })
    }

    fn has_consumption(&self) -> bool {
        self.consumption.is_some_and(|df| df.height() > 0)
    }
}

type BuildFn = fn(&AggregateInputs<'_>) -> Result<DataFrame>;

pub struct AggregateTable {
    pub name: &'static str,
    pub input: AggregateInput,
    pub description: &'static str,
    builder: BuildFn,
}

impl AggregateTable {
    pub fn build(&self, inputs: &AggregateInputs<'_>) -> Result<DataFrame> {
        (self.builder)(inputs)
    }
}

impl std::fmt::Debug for AggregateTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateTable")
            .field("name", &self.name)
            .field("input", &self.input)
            .finish()
    }
}

static AGGREGATES: Lazy<Vec<AggregateTable>> = Lazy::new(|| {
    vec![
        AggregateTable {
            name: "solar_annual",
            input: AggregateInput::Permits,
            description: "Annual solar permits with running total and approval medians",
            builder: solar_annual,
        },
        AggregateTable {
            name: "solar_by_zip",
            input: AggregateInput::Permits,
            description: "Solar permits by zip code and year",
            builder: solar_by_zip,
        },
        AggregateTable {
            name: "approval_speed",
            input: AggregateInput::Permits,
            description: "Approval duration statistics by year, category and policy era",
            builder: approval_speed,
        },
        AggregateTable {
            name: "climate_permits_monthly",
            input: AggregateInput::Permits,
            description: "Monthly permit counts by category",
            builder: climate_permits_monthly,
        },
        AggregateTable {
            name: "solar_map_points",
            input: AggregateInput::Permits,
            description: "Coordinates of solar permits",
            builder: solar_map_points,
        },
        AggregateTable {
            name: "energy_permits_annual",
            input: AggregateInput::Permits,
            description: "Annual solar, electrical and mechanical permit counts",
            builder: energy_permits_annual,
        },
        AggregateTable {
            name: "zip_code_summary",
            input: AggregateInput::Permits,
            description: "Per-zip permit totals",
            builder: zip_code_summary,
        },
        AggregateTable {
            name: "energy_by_zip_annual",
            input: AggregateInput::Consumption,
            description: "Annual residential electricity and gas use by zip code",
            builder: energy_by_zip_annual,
        },
        AggregateTable {
            name: "energy_trends",
            input: AggregateInput::Consumption,
            description: "Citywide quarterly electricity and gas use by customer class",
            builder: energy_trends,
        },
    ]
});

pub fn all_aggregates() -> &'static [AggregateTable] {
    AGGREGATES.as_slice()
}

pub fn find_aggregate(name: &str) -> Option<&'static AggregateTable> {
    all_aggregates().iter().find(|table| table.name == name)
}

/// Builds and writes every aggregate independently. A failure is recorded for
/// that table alone; consumption tables are skipped (and any stale copy
/// removed) when there is no consumption data.
pub fn build_all(inputs: &AggregateInputs<'_>, store: &TableStore) -> Vec<StageSummary> {
    all_aggregates()
        .iter()
        .map(|table| build_one(table, inputs, store))
        .collect()
}

fn build_one(table: &AggregateTable, inputs: &AggregateInputs<'_>, store: &TableStore) -> StageSummary {
    if table.input == AggregateInput::Consumption && !inputs.has_consumption() {
        match store.remove(table.name) {
            Ok(true) => info!(table = table.name, "removed stale aggregate"),
            Ok(false) => {}
            Err(err) => warn!(table = table.name, "failed to remove stale aggregate: {err}"),
        }
        warn!(table = table.name, "no consumption data, skipping aggregate");
        return StageSummary::skipped(table.name, "no consumption data available");
    }

    let written = table.build(inputs).and_then(|mut df| {
        store.write(table.name, &mut df)?;
        Ok(df.height())
    });

    match written {
        Ok(rows) => {
            info!(table = table.name, rows_out = rows, "aggregate built");
            StageSummary::success(table.name, rows)
        }
        Err(err) => {
            error!(table = table.name, "aggregate failed: {err}");
            StageSummary::failed(table.name, err)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Rounding {
    Int32,
    Int64,
    Places(i32),
}

/// Rounds float result columns in place. Integer targets turn non-finite
/// values into null.
fn round_columns(mut df: DataFrame, columns: &[(&str, Rounding)]) -> Result<DataFrame> {
    for &(name, rounding) in columns {
        let values = df.column(name)?.f64()?;
        let rounded = match rounding {
            Rounding::Int32 => column(
                name,
                values
                    .into_iter()
                    .map(|v| v.and_then(stats::round_to_i32))
                    .collect::<Vec<_>>(),
            ),
            Rounding::Int64 => column(
                name,
                values
                    .into_iter()
                    .map(|v| v.and_then(stats::round_to_i64))
                    .collect::<Vec<_>>(),
            ),
            Rounding::Places(places) => column(
                name,
                values
                    .into_iter()
                    .map(|v| v.map(|x| stats::round_to(x, places)))
                    .collect::<Vec<_>>(),
            ),
        };
        df.with_column(rounded)?;
    }
    Ok(df)
}

fn days() -> Expr {
    col("approval_days")
}

fn row_count() -> Expr {
    len().cast(DataType::Int64)
}

fn flag_count(flag: &str) -> Expr {
    col(flag).cast(DataType::Int64).sum()
}

fn valuation_total() -> Expr {
    col("valuation").fill_null(lit(0.0)).sum()
}

fn median_days_nonzero() -> Expr {
    days().filter(days().neq(lit(0i64))).median()
}

fn fuel_customers(fuel: FuelType) -> Expr {
    col("total_customers")
        .filter(col("fuel_type").eq(lit(fuel.as_str())))
        .sum()
}

fn solar_annual(inputs: &AggregateInputs<'_>) -> Result<DataFrame> {
    let df = inputs
        .permits()
        .filter(col("is_solar").and(col("approval_year").is_not_null()))
        .group_by([col("approval_year")])
        .agg([
            row_count().alias("solar_count"),
            valuation_total().alias("total_valuation"),
            days().median().alias("median_approval_days"),
            median_days_nonzero().alias("median_approval_days_nonzero"),
            days()
                .eq(lit(0i64))
                .cast(DataType::Int64)
                .sum()
                .alias("same_day_count"),
        ])
        .sort(["approval_year"], SortMultipleOptions::default())
        .with_column(col("solar_count").cum_sum(false).alias("cumulative_solar"))
        .select([
            col("approval_year").alias("year"),
            col("solar_count"),
            col("cumulative_solar"),
            col("total_valuation"),
            col("median_approval_days"),
            col("median_approval_days_nonzero"),
            col("same_day_count"),
        ])
        .collect()?;
    round_columns(df, &[("total_valuation", Rounding::Int64)])
}

fn solar_by_zip(inputs: &AggregateInputs<'_>) -> Result<DataFrame> {
    let df = inputs
        .permits()
        .filter(
            col("is_solar")
                .and(col("zip_code").is_not_null())
                .and(col("approval_year").is_not_null()),
        )
        .group_by([col("zip_code"), col("approval_year")])
        .agg([
            row_count().alias("solar_count"),
            valuation_total().alias("total_valuation"),
            days().median().alias("median_approval_days"),
        ])
        .sort(["zip_code", "approval_year"], SortMultipleOptions::default())
        .select([
            col("zip_code"),
            col("approval_year").alias("year"),
            col("solar_count"),
            col("total_valuation"),
            col("median_approval_days"),
        ])
        .collect()?;
    round_columns(df, &[("total_valuation", Rounding::Int64)])
}

fn approval_speed(inputs: &AggregateInputs<'_>) -> Result<DataFrame> {
    let df = inputs
        .permits()
        .filter(days().is_not_null().and(col("approval_year").is_not_null()))
        .group_by([col("approval_year"), col("permit_category"), col("policy_era")])
        .agg([
            row_count().alias("permit_count"),
            days().median().alias("median_days"),
            median_days_nonzero().alias("median_days_nonzero"),
            days().mean().alias("avg_days"),
            days()
                .quantile(lit(P90), QuantileMethod::Linear)
                .alias("p90_days"),
        ])
        .sort(
            ["approval_year", "permit_category", "policy_era"],
            SortMultipleOptions::default(),
        )
        .select([
            col("approval_year").alias("year"),
            col("permit_category"),
            col("policy_era"),
            col("permit_count"),
            col("median_days"),
            col("median_days_nonzero"),
            col("avg_days"),
            col("p90_days"),
        ])
        .collect()?;
    round_columns(
        df,
        &[("avg_days", Rounding::Int32), ("p90_days", Rounding::Int32)],
    )
}

fn climate_permits_monthly(inputs: &AggregateInputs<'_>) -> Result<DataFrame> {
    Ok(inputs
        .permits()
        .filter(
            col("approval_year")
                .is_not_null()
                .and(col("approval_month").is_not_null()),
        )
        .group_by([col("approval_year"), col("approval_month"), col("permit_category")])
        .agg([row_count().alias("permit_count")])
        .sort(
            ["approval_year", "approval_month", "permit_category"],
            SortMultipleOptions::default(),
        )
        .select([
            col("approval_year").alias("year"),
            col("approval_month").alias("month"),
            col("permit_category"),
            col("permit_count"),
        ])
        .collect()?)
}

fn solar_map_points(inputs: &AggregateInputs<'_>) -> Result<DataFrame> {
    Ok(inputs
        .permits()
        .filter(
            col("is_solar")
                .and(col("lat").is_not_null())
                .and(col("lng").is_not_null()),
        )
        .select([
            col("lat"),
            col("lng"),
            col("approval_year").alias("year"),
            col("valuation"),
            col("zip_code"),
            col("approval_days"),
            col("policy_era"),
        ])
        .collect()?)
}

fn energy_permits_annual(inputs: &AggregateInputs<'_>) -> Result<DataFrame> {
    Ok(inputs
        .permits()
        .filter(col("approval_year").is_not_null())
        .group_by([col("approval_year")])
        .agg([
            flag_count("is_solar").alias("solar_count"),
            flag_count("is_electrical").alias("electrical_count"),
            flag_count("is_mechanical").alias("mechanical_count"),
            flag_count("is_climate_relevant").alias("climate_total"),
        ])
        .sort(["approval_year"], SortMultipleOptions::default())
        .select([
            col("approval_year").alias("year"),
            col("solar_count"),
            col("electrical_count"),
            col("mechanical_count"),
            col("climate_total"),
        ])
        .collect()?)
}

fn zip_code_summary(inputs: &AggregateInputs<'_>) -> Result<DataFrame> {
    let df = inputs
        .permits()
        .filter(col("zip_code").is_not_null())
        .group_by([col("zip_code")])
        .agg([
            row_count().alias("total_permits"),
            flag_count("is_solar").alias("solar_count"),
            flag_count("is_electrical").alias("electrical_count"),
            flag_count("is_mechanical").alias("mechanical_count"),
            flag_count("is_climate_relevant").alias("climate_count"),
            valuation_total().alias("total_valuation"),
        ])
        .with_column(
            (col("solar_count").cast(DataType::Float64) * lit(100.0)
                / col("total_permits").cast(DataType::Float64))
            .alias("solar_pct"),
        )
        .sort(
            ["solar_count", "zip_code"],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .select([
            col("zip_code"),
            col("total_permits"),
            col("solar_count"),
            col("electrical_count"),
            col("mechanical_count"),
            col("climate_count"),
            col("solar_pct"),
            col("total_valuation"),
        ])
        .collect()?;
    round_columns(
        df,
        &[
            ("solar_pct", Rounding::Places(2)),
            ("total_valuation", Rounding::Int64),
        ],
    )
}

/// Electricity and gas totals per group. Usage columns are null on the other
/// fuel's rows, and a sum over nulls is 0.
fn fuel_totals() -> [Expr; 4] {
    [
        col("total_kwh").sum().alias("total_kwh"),
        fuel_customers(FuelType::Electricity).alias("elec_customers"),
        col("total_thm").sum().alias("total_thm"),
        fuel_customers(FuelType::Gas).alias("gas_customers"),
    ]
}

fn energy_by_zip_annual(inputs: &AggregateInputs<'_>) -> Result<DataFrame> {
    let df = inputs
        .consumption()?
        .filter(
            col("customer_class")
                .eq(lit(RESIDENTIAL_CLASS))
                .and(col("year").is_not_null()),
        )
        .group_by([col("zip_code"), col("year")])
        .agg(fuel_totals())
        .with_column(
            (col("total_kwh") / col("elec_customers").cast(DataType::Float64))
                .alias("avg_kwh_per_customer"),
        )
        .sort(["zip_code", "year"], SortMultipleOptions::default())
        .select([
            col("zip_code"),
            col("year"),
            col("total_kwh"),
            col("elec_customers"),
            col("avg_kwh_per_customer"),
            col("total_thm"),
            col("gas_customers"),
        ])
        .collect()?;
    round_columns(
        df,
        &[
            ("total_kwh", Rounding::Int64),
            ("avg_kwh_per_customer", Rounding::Int32),
            ("total_thm", Rounding::Int64),
        ],
    )
}

fn energy_trends(inputs: &AggregateInputs<'_>) -> Result<DataFrame> {
    let df = inputs
        .consumption()?
        .filter(
            col("year")
                .is_not_null()
                .and(col("customer_class").is_not_null())
                .and(col("month").gt_eq(lit(1)))
                .and(col("month").lt_eq(lit(12))),
        )
        .with_column(
            (((col("month") - lit(1)) / lit(3)).cast(DataType::Int32) + lit(1))
                .alias("quarter"),
        )
        .group_by([col("year"), col("quarter"), col("customer_class")])
        .agg(fuel_totals())
        .sort(
            ["year", "quarter", "customer_class"],
            SortMultipleOptions::default(),
        )
        .select([
            col("year"),
            col("quarter"),
            col("customer_class"),
            col("total_kwh"),
            col("elec_customers"),
            col("total_thm"),
            col("gas_customers"),
        ])
        .collect()?;
    round_columns(
        df,
        &[
            ("total_kwh", Rounding::Int64),
            ("total_thm", Rounding::Int64),
        ],
    )
}
