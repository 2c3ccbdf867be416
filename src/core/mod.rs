pub mod catalog;
pub mod codegen;
pub mod component;
pub mod constraints;
pub mod deployment;
pub mod engine;
pub mod environment;
pub mod functions;
pub mod inputs;
pub mod keys;
pub mod parser;
pub mod resolver;
pub mod schema;
pub mod templating;
pub mod topology;

pub use crate::domain::model::{DockerArtifacts, PlannedResource, Relation};
pub use crate::domain::ports::{CommandRunner, ConfigProvider, Storage};
pub use crate::utils::error::Result;
