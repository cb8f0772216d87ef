//! Peak dispatch: keeps a home battery charged ahead of the daily
//! peak-rate window by switching it between grid charging and solar-first
//! operation.

pub mod cli;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod repo;
pub mod telemetry;

pub use config::Config;
pub use controller::{DispatchController, RunReport};
pub use error::DispatchError;
