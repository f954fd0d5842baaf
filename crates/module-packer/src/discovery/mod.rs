#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::metadata::{CommandDescriptor, ModuleVersion};

pub mod redis;
pub mod resp;

pub use redis::RedisServerDiscovery;
pub use resp::{RespError, RespValue};

/// What a module reports about itself once loaded into a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModule {
    pub name: String,
    pub version: ModuleVersion,
    pub commands: Vec<CommandDescriptor>,
}

/// Loads a module and enumerates the commands it registers.
pub trait CommandDiscovery {
    fn discover(
        &self,
        module_path: &Path,
        command_line_args: &str,
    ) -> Result<DiscoveredModule, DiscoveryError>;
}

/// Errors that abort packaging before any file is written.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("module binary not found: {}", .0.display())]
    ModuleNotFound(PathBuf),
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("host exited with {status} before accepting connections{log}")]
    HostExited { status: ExitStatus, log: String },
    #[error("host did not accept connections on port {port} within {waited:?}")]
    StartupTimeout { port: u16, waited: Duration },
    #[error("host returned an error for {command}: {message}")]
    Server {
        command: &'static str,
        message: String,
    },
    #[error("unexpected reply to {command}: {detail}")]
    UnexpectedReply {
        command: &'static str,
        detail: String,
    },
    #[error("no module was loaded by the host")]
    NoModuleLoaded,
    #[error("protocol error: {0}")]
    Protocol(#[from] RespError),
    #[error("I/O error talking to host: {0}")]
    Io(#[from] io::Error),
}
