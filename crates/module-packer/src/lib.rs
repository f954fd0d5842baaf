#![forbid(unsafe_code)]

pub mod archive;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod metadata;
pub mod pack;
pub mod telemetry;

pub use cli::flags::FieldArgs;
pub use config::PackerConfig;
pub use discovery::{CommandDiscovery, DiscoveredModule, DiscoveryError};
pub use metadata::{CommandDescriptor, ModuleMetadata, ModuleVersion};
