//! Streaming report-assembly pipeline: turns a token-by-token model response
//! into a durable, versioned, section-addressable HTML report, with scoped
//! per-section regeneration and consistent usage metering.

pub mod api;
pub mod config;
pub mod controller;
pub mod extract;
pub mod orchestrator;
pub mod server;
pub mod store;
pub mod types;
pub mod usage;
pub mod util;

#[cfg(test)]
pub mod test_support;
