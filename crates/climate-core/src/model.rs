// crates/climate-core/src/model.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which permitting system produced a raw row. `Current` ranks above `Legacy`
/// when two otherwise tied rows compete during deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    Legacy,
    Current,
}

impl SourceSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Legacy => "legacy",
            SourceSystem::Current => "current",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleDates {
    pub created: Option<NaiveDate>,
    pub issued: Option<NaiveDate>,
    pub expired: Option<NaiveDate>,
    pub closed: Option<NaiveDate>,
}

/// One approval row as read from either permit source, already coerced to
/// canonical field names and types.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPermit {
    pub approval_id: String,
    pub project_id: Option<String>,
    pub job_id: Option<String>,
    pub address: Option<String>,
    pub apn: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub approval_type: Option<String>,
    pub approval_status: Option<String>,
    pub dates: LifecycleDates,
    pub valuation: Option<f64>,
    pub source_system: SourceSystem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PermitCategory {
    SolarPv,
    Electrical,
    MechanicalHvac,
    Building,
    Other,
}

impl PermitCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermitCategory::SolarPv => "Solar/PV",
            PermitCategory::Electrical => "Electrical",
            PermitCategory::MechanicalHvac => "Mechanical/HVAC",
            PermitCategory::Building => "Building",
            PermitCategory::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PolicyEra {
    PreCap,
    CapAdopted,
    ExpeditedEra,
}

impl PolicyEra {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyEra::PreCap => "Pre-CAP",
            PolicyEra::CapAdopted => "CAP Adopted",
            PolicyEra::ExpeditedEra => "Expedited Era",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelevanceFlags {
    pub solar: bool,
    pub electrical: bool,
    pub mechanical: bool,
}

impl RelevanceFlags {
    pub fn climate_relevant(&self) -> bool {
        self.solar || self.electrical || self.mechanical
    }
}

/// The single surviving row for an approval plus every derived attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalPermit {
    pub record: RawPermit,
    pub zip_code: Option<String>,
    pub approval_days: Option<i64>,
    pub approval_year: Option<i32>,
    pub approval_month: Option<i32>,
    pub category: PermitCategory,
    pub flags: RelevanceFlags,
    pub policy_era: Option<PolicyEra>,
}

impl CanonicalPermit {
    pub fn is_climate_relevant(&self) -> bool {
        self.flags.climate_relevant()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelType {
    Electricity,
    Gas,
}

impl FuelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuelType::Electricity => "electricity",
            FuelType::Gas => "gas",
        }
    }
}

/// One (zip, month, customer class, fuel) row. Usage is kWh for electricity
/// and therms for gas.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionRecord {
    pub zip_code: String,
    pub month: Option<i32>,
    pub year: Option<i32>,
    pub customer_class: Option<String>,
    pub total_customers: Option<i64>,
    pub total_usage: Option<f64>,
    pub average_usage: Option<f64>,
    pub fuel_type: FuelType,
}

impl ConsumptionRecord {
    pub fn total_kwh(&self) -> Option<f64> {
        match self.fuel_type {
            FuelType::Electricity => self.total_usage,
            FuelType::Gas => None,
        }
    }

    pub fn total_therms(&self) -> Option<f64> {
        match self.fuel_type {
            FuelType::Gas => self.total_usage,
            FuelType::Electricity => None,
        }
    }
}
