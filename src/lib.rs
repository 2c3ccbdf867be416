//! Parsers, providers and planning logic for Checkmatefile deployments.

pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod providers;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};

pub use config::{cli::LocalStorage, ChessboardConfig};
pub use core::{
    deployment::Deployment,
    engine::{Engine, PlanFormat},
    environment::Environment,
    resolver::{resolve, Planner},
};
pub use utils::error::{ChessboardError, Result};
