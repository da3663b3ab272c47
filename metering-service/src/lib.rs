//! Multi-tenant usage metering, hard quota enforcement and billing webhook
//! convergence.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

pub use error::MeteringError;
pub use startup::{AppState, Application};
