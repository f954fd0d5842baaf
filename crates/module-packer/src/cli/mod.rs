#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};

use crate::config::PackerConfig;
use crate::discovery::RedisServerDiscovery;
use crate::pack::{self, FieldSource, PackOptions};

pub mod flags;
pub mod interactive;

pub const USAGE: &str = "usage: module-packer <PATH_TO_MODULE> [OPTIONS]";

/// Exit code for a missing module path.
pub const USAGE_EXIT_CODE: u8 = 1;

/// The shape of a command line once the program name is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Usage,
    Pack {
        module_path: PathBuf,
        fields: FieldSource,
    },
}

impl Invocation {
    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator<Item = OsString>,
    {
        let mut args = args.into_iter();
        let Some(module_path) = args.next() else {
            return Self::Usage;
        };

        let rest: Vec<OsString> = args.collect();
        let fields = if rest.is_empty() {
            FieldSource::Interactive
        } else {
            FieldSource::Flags(rest)
        };

        Self::Pack {
            module_path: PathBuf::from(module_path),
            fields,
        }
    }
}

/// Execute the CLI against the real `redis-server` discovery and the current
/// working directory.
pub fn run_with_args<R, W>(args: Vec<OsString>, mut input: R, mut output: W) -> Result<ExitCode>
where
    R: BufRead,
    W: Write,
{
    let (module_path, fields) = match Invocation::parse(args) {
        Invocation::Usage => {
            writeln!(output, "{USAGE}")?;
            return Ok(ExitCode::from(USAGE_EXIT_CODE));
        }
        Invocation::Pack {
            module_path,
            fields,
        } => (module_path, fields),
    };

    let config = PackerConfig::from_env()?;
    let out_dir = std::env::current_dir().context("failed to resolve working directory")?;
    let discovery = RedisServerDiscovery::new(config.discovery.clone());

    let opts = PackOptions {
        module_path,
        fields,
        out_dir,
    };
    pack::run(&opts, &config.defaults, &discovery, &mut input, &mut output)?;

    Ok(ExitCode::SUCCESS)
}
