#![forbid(unsafe_code)]

use crate::archive::{self, ARCHIVE_FILE};
use crate::cli::{flags::FieldArgs, interactive};
use crate::config::MetadataDefaults;
use crate::discovery::CommandDiscovery;
use crate::metadata::ModuleMetadata;
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::info;

/// Where user supplied field values come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    Interactive,
    Flags(Vec<OsString>),
}

#[derive(Debug, Clone)]
pub struct PackOptions {
    pub module_path: PathBuf,
    pub fields: FieldSource,
    pub out_dir: PathBuf,
}

/// Runs the whole packaging pipeline and returns the archive path.
///
/// Nothing is written to `out_dir` until field collection and discovery have
/// both succeeded.
pub fn run<R: BufRead, W: Write>(
    opts: &PackOptions,
    defaults: &MetadataDefaults,
    discovery: &dyn CommandDiscovery,
    input: &mut R,
    output: &mut W,
) -> Result<PathBuf> {
    info!(
        module = %opts.module_path.display(),
        out_dir = %opts.out_dir.display(),
        interactive = matches!(opts.fields, FieldSource::Interactive),
        "packaging module"
    );

    let mut metadata = ModuleMetadata::with_defaults(&opts.module_path, defaults);

    match &opts.fields {
        FieldSource::Interactive => interactive::collect(&mut metadata, input, output)?,
        FieldSource::Flags(args) => {
            FieldArgs::try_parse_overrides(args.iter().cloned())?.apply(&mut metadata)?
        }
    }

    let module = discovery
        .discover(&opts.module_path, &metadata.command_line_args)
        .with_context(|| {
            format!(
                "failed to discover commands of {}",
                opts.module_path.display()
            )
        })?;
    info!(name = %module.name, version = %module.version, commands = module.commands.len(), "module discovered");
    metadata.apply_discovery(module);

    let archive_path = archive::write_package(&opts.out_dir, &opts.module_path, &metadata)?;
    writeln!(output, "{ARCHIVE_FILE} generated.")?;

    Ok(archive_path)
}
