#![forbid(unsafe_code)]

use std::ffi::OsString;

use clap::Parser;

use crate::metadata::{Field, InputError, ModuleMetadata};

/// Short spellings longer than one letter, which clap cannot express directly.
const MULTI_LETTER_SHORTS: [(&str, &str); 4] = [
    ("-ar", "--architecture"),
    ("-ho", "--homepage"),
    ("-ex", "--extras"),
    ("-rl", "--rlec-min-version"),
];

/// Field overrides accepted after the module path.
///
/// Omitted flags leave the record untouched, so defaults come from the same
/// place interactive mode starts from.
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "module-packer",
    about = "Create a new module package",
    no_binary_name = true
)]
pub struct FieldArgs {
    /// Module author
    #[arg(short = 'a', long, value_name = "NAME")]
    pub author: Option<String>,

    /// Author's email
    #[arg(short = 'e', long, value_name = "EMAIL")]
    pub email: Option<String>,

    /// Bit width the module was compiled for (-ar)
    #[arg(long, value_name = "BITS", allow_hyphen_values = true)]
    pub architecture: Option<String>,

    /// Short description
    #[arg(short = 'd', long, value_name = "TEXT")]
    pub description: Option<String>,

    /// Module homepage (-ho)
    #[arg(long, value_name = "URL")]
    pub homepage: Option<String>,

    /// License
    #[arg(short = 'l', long, value_name = "LICENSE")]
    pub license: Option<String>,

    /// Extra files (-ex)
    #[arg(long = "extras", visible_alias = "extra-files", value_name = "FILES")]
    pub extra_files: Option<String>,

    /// Arguments passed to the module when it is loaded
    #[arg(
        short = 'c',
        long = "cmdargs",
        visible_alias = "command-line-args",
        value_name = "ARGS",
        allow_hyphen_values = true
    )]
    pub command_line_args: Option<String>,

    /// Minimum redis version
    #[arg(short = 'r', long = "redis-min-version", value_name = "VERSION")]
    pub min_redis_version: Option<String>,

    /// Minimum RLEC version (-rl)
    #[arg(long = "rlec-min-version", value_name = "VERSION")]
    pub min_rlec_version: Option<String>,
}

impl FieldArgs {
    /// Parses override flags, accepting the multi-letter short spellings.
    pub fn try_parse_overrides<I, S>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self::try_parse_from(expand_short_flags(args))
    }

    /// Writes every supplied override into `metadata`.
    pub fn apply(self, metadata: &mut ModuleMetadata) -> Result<(), InputError> {
        for (field, value) in self.into_overrides() {
            if let Some(value) = value {
                metadata.set_field(field, &value)?;
            }
        }
        Ok(())
    }

    fn into_overrides(self) -> [(Field, Option<String>); 10] {
        [
            (Field::Architecture, self.architecture),
            (Field::Author, self.author),
            (Field::Email, self.email),
            (Field::Description, self.description),
            (Field::Homepage, self.homepage),
            (Field::License, self.license),
            (Field::ExtraFiles, self.extra_files),
            (Field::CommandLineArgs, self.command_line_args),
            (Field::MinRedisVersion, self.min_redis_version),
            (Field::MinRlecVersion, self.min_rlec_version),
        ]
    }
}

/// Rewrites multi-letter short flags to their long form, leaving values alone.
fn expand_short_flags<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut expanded = Vec::new();
    let mut expecting_value = false;

    for arg in args {
        let arg: OsString = arg.into();
        if expecting_value {
            expecting_value = false;
            expanded.push(arg);
            continue;
        }

        let Some(text) = arg.to_str() else {
            expanded.push(arg);
            continue;
        };

        if let Some((_, long)) = MULTI_LETTER_SHORTS.iter().find(|(short, _)| *short == text) {
            expecting_value = true;
            expanded.push(OsString::from(*long));
            continue;
        }

        expecting_value = takes_separate_value(text);
        expanded.push(arg);
    }

    expanded
}

fn takes_separate_value(flag: &str) -> bool {
    if let Some(long) = flag.strip_prefix("--") {
        !long.is_empty() && !long.contains('=')
    } else {
        flag.len() == 2 && flag.starts_with('-')
    }
}
