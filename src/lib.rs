//! fleetplane: a two-tier control plane for container deployments
//!
//! A manager keeps a live registry of compute providers and routes
//! deployment lifecycle calls to them; each provider translates deployments
//! into cluster objects on a Kubernetes-compatible cluster and reports what
//! actually runs.

pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod provider;

pub use error::{Error, Result};
