//! API gateway module
//!
//! Submits records to the Pulse clearing API, or to an in-process
//! simulation when running with `--simulate`.

pub mod client;
pub mod endpoints;
pub mod simulated;
pub mod types;

pub use client::{ApiGateway, HttpApiGateway};
pub use simulated::SimulatedGateway;
pub use types::*;
