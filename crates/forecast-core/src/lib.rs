//! Post-processing of ensemble river-discharge forecasts.
//!
//! Stages of one forecast cycle, in run order: routing fan-out
//! ([`routing`], [`fanout`], [`priority`]), ensemble aggregation into a
//! consolidated store ([`aggregate`], [`store`]), then the store consumers:
//! next-cycle initial conditions ([`inits`]), per-VPU classified tables
//! ([`maptable`]) and the global per-timestamp tables ([`global`]).

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod cycle;
pub mod discharge;
pub mod error;
pub mod fanout;
pub mod global;
pub mod ids;
pub mod inits;
pub mod logging;
pub mod maptable;
pub mod mean;
pub mod netcdf;
pub mod priority;
pub mod returnperiods;
pub mod routing;
pub mod store;

#[cfg(test)]
mod fixtures;

pub use aggregate::{AggregationReport, EnsembleAggregator};
pub use config::{PipelineConfig, Paths, Settings};
pub use cycle::{CycleLayout, ForecastCycle};
pub use error::{PipelineError, Result};
pub use fanout::{BatchReport, JobFanout, WorkUnit};
pub use global::GlobalTableMerger;
pub use ids::{EnsembleMember, VpuId};
pub use inits::InitialConditionExtractor;
pub use maptable::MapClassifier;
pub use priority::PriorityOrderer;
pub use routing::RoutingRunner;
pub use store::ConsolidatedStore;
