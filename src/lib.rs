//! Catalog watch: scheduled snapshots of a resource listing, compared
//! against the previous run to report what is new and what changed.

pub mod cli;
pub mod config;
pub mod diff;
pub mod driver;
pub mod extract;
pub mod job;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod storage;
