pub mod aggregates;
pub mod config;
pub mod consumption;
pub mod derive;
pub mod error;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod stats;
pub mod store;
pub mod tables;
pub mod unify;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{list_tables, run, TableListing};
pub use report::{RunReport, StageStatus, StageSummary};
