#![forbid(unsafe_code)]

use std::fmt;
use std::num::IntErrorKind;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use thiserror::Error;

use crate::config::MetadataDefaults;
use crate::discovery::DiscoveredModule;

/// Errors raised while applying user supplied field values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("architecture must be an integer bit width, got `{value}`")]
    Architecture { value: String },
    #[error("architecture `{value}` does not fit in a 64-bit integer")]
    ArchitectureOutOfRange { value: String },
}

/// The manifest written as `module.json`.
///
/// Fields are declared in lexicographic order so serde emits sorted keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleMetadata {
    pub architecture: i64,
    pub author: String,
    pub command_line_args: String,
    pub commands: Vec<CommandDescriptor>,
    pub description: String,
    pub email: String,
    pub extra_files: String,
    pub homepage: String,
    pub license: String,
    pub min_redis_version: String,
    pub min_rlec_version: String,
    pub module_file: String,
    pub module_name: String,
    pub version: ModuleVersion,
}

/// A command registered by the module, as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub command_arity: i64,
    pub command_name: String,
    pub first_key: i64,
    pub flags: Vec<String>,
    pub last_key: i64,
    pub step: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleVersion {
    Number(i64),
    Text(String),
}

impl Default for ModuleVersion {
    fn default() -> Self {
        Self::Number(0)
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl ModuleMetadata {
    /// Builds a record for `module_path` populated from the configured defaults.
    ///
    /// `module_name`, `version` and `commands` hold placeholders until
    /// [`ModuleMetadata::apply_discovery`] replaces them.
    pub fn with_defaults(module_path: &Path, defaults: &MetadataDefaults) -> Self {
        Self {
            architecture: defaults.architecture,
            author: defaults.author.clone(),
            command_line_args: defaults.command_line_args.clone(),
            commands: Vec::new(),
            description: defaults.description.clone(),
            email: defaults.email.clone(),
            extra_files: defaults.extra_files.clone(),
            homepage: defaults.homepage.clone(),
            license: defaults.license.clone(),
            min_redis_version: defaults.min_redis_version.clone(),
            min_rlec_version: defaults.min_rlec_version.clone(),
            module_file: module_file_name(module_path),
            module_name: String::new(),
            version: ModuleVersion::default(),
        }
    }

    /// Copies the attributes the module reports about itself into the record.
    pub fn apply_discovery(&mut self, module: DiscoveredModule) {
        self.module_name = module.name;
        self.version = module.version;
        self.commands = module.commands;
    }

    /// Serializes the record with sorted keys and four-space indentation.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)?;
        Ok(out)
    }
}

/// Fields the user may set, in prompt order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Architecture,
    Author,
    Email,
    Description,
    Homepage,
    License,
    ExtraFiles,
    CommandLineArgs,
    MinRedisVersion,
    MinRlecVersion,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Architecture,
        Field::Author,
        Field::Email,
        Field::Description,
        Field::Homepage,
        Field::License,
        Field::ExtraFiles,
        Field::CommandLineArgs,
        Field::MinRedisVersion,
        Field::MinRlecVersion,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Field::Architecture => "Architecture",
            Field::Author => "Author",
            Field::Email => "Email",
            Field::Description => "Description",
            Field::Homepage => "Homepage",
            Field::License => "License",
            Field::ExtraFiles => "Extra files",
            Field::CommandLineArgs => "Command line args",
            Field::MinRedisVersion => "Min redis version",
            Field::MinRlecVersion => "Min rlec version",
        }
    }
}

impl ModuleMetadata {
    /// Current value of `field`, rendered as the user would type it.
    pub fn field(&self, field: Field) -> String {
        match field {
            Field::Architecture => self.architecture.to_string(),
            Field::Author => self.author.clone(),
            Field::Email => self.email.clone(),
            Field::Description => self.description.clone(),
            Field::Homepage => self.homepage.clone(),
            Field::License => self.license.clone(),
            Field::ExtraFiles => self.extra_files.clone(),
            Field::CommandLineArgs => self.command_line_args.clone(),
            Field::MinRedisVersion => self.min_redis_version.clone(),
            Field::MinRlecVersion => self.min_rlec_version.clone(),
        }
    }

    /// Stores `value` verbatim; architecture must parse as an integer.
    pub fn set_field(&mut self, field: Field, value: &str) -> Result<(), InputError> {
        let slot = match field {
            Field::Architecture => {
                self.architecture = parse_architecture(value)?;
                return Ok(());
            }
            Field::Author => &mut self.author,
            Field::Email => &mut self.email,
            Field::Description => &mut self.description,
            Field::Homepage => &mut self.homepage,
            Field::License => &mut self.license,
            Field::ExtraFiles => &mut self.extra_files,
            Field::CommandLineArgs => &mut self.command_line_args,
            Field::MinRedisVersion => &mut self.min_redis_version,
            Field::MinRlecVersion => &mut self.min_rlec_version,
        };
        *slot = value.to_string();
        Ok(())
    }
}

/// Parses a user supplied architecture value.
///
/// Any integer is accepted, including signed ones; only non-integers fail.
pub fn parse_architecture(value: &str) -> Result<i64, InputError> {
    let trimmed = value.trim();
    trimmed.parse::<i64>().map_err(|err| match err.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
            InputError::ArchitectureOutOfRange {
                value: value.to_string(),
            }
        }
        _ => InputError::Architecture {
            value: value.to_string(),
        },
    })
}

fn module_file_name(module_path: &Path) -> String {
    module_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| module_path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const RECOGNIZED_KEYS: [&str; 14] = [
        "architecture",
        "author",
        "command_line_args",
        "commands",
        "description",
        "email",
        "extra_files",
        "homepage",
        "license",
        "min_redis_version",
        "min_rlec_version",
        "module_file",
        "module_name",
        "version",
    ];

    fn demo_module() -> DiscoveredModule {
        DiscoveredModule {
            name: "foo".to_string(),
            version: ModuleVersion::Number(10203),
            commands: vec![CommandDescriptor {
                command_arity: -3,
                command_name: "foo.set".to_string(),
                first_key: 1,
                flags: vec!["write".to_string(), "denyoom".to_string()],
                last_key: 1,
                step: 1,
            }],
        }
    }

    #[test]
    fn defaults_fill_every_field_and_take_the_base_name() {
        let defaults = MetadataDefaults::default();
        let metadata = ModuleMetadata::with_defaults(&PathBuf::from("build/out/mymod.so"), &defaults);

        assert_eq!(metadata.module_file, "mymod.so");
        assert_eq!(metadata.architecture, defaults.architecture);
        assert_eq!(metadata.homepage, defaults.homepage);
        assert_eq!(metadata.min_rlec_version, defaults.min_rlec_version);
        assert!(metadata.commands.is_empty());
        assert_eq!(metadata.version, ModuleVersion::Number(0));
    }

    #[test]
    fn discovery_overwrites_identity_and_commands_only() {
        let defaults = MetadataDefaults::default();
        let mut metadata = ModuleMetadata::with_defaults(Path::new("mymod.so"), &defaults);
        metadata.author = "Jane Doe".to_string();

        metadata.apply_discovery(demo_module());

        assert_eq!(metadata.module_name, "foo");
        assert_eq!(metadata.version, ModuleVersion::Number(10203));
        assert_eq!(metadata.commands, demo_module().commands);
        assert_eq!(metadata.author, "Jane Doe");
    }

    #[test]
    fn canonical_json_has_exactly_the_recognized_keys_in_sorted_order() {
        let mut metadata =
            ModuleMetadata::with_defaults(Path::new("mymod.so"), &MetadataDefaults::default());
        metadata.apply_discovery(demo_module());

        let bytes = metadata.to_canonical_json().expect("serializes");
        let text = String::from_utf8(bytes).expect("utf8");

        let value: serde_json::Value = serde_json::from_str(&text).expect("parses back");
        let object = value.as_object().expect("object");
        assert_eq!(object.len(), RECOGNIZED_KEYS.len());
        for key in RECOGNIZED_KEYS {
            assert!(object.contains_key(key), "missing key {key}");
        }

        let positions: Vec<usize> = RECOGNIZED_KEYS
            .iter()
            .map(|key| text.find(&format!("\n    \"{key}\":")).expect("top-level key"))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));

        let command_name = text.find("\"command_name\"").expect("command name");
        let first_key = text.find("\"first_key\"").expect("first key");
        assert!(command_name < first_key);
        assert!(text.contains("\n        {\n            \"command_arity\": -3,"));
    }

    #[test]
    fn string_versions_serialize_as_strings() {
        let json = serde_json::to_string(&ModuleVersion::Text("1.2.3".to_string())).expect("json");
        assert_eq!(json, "\"1.2.3\"");
        let json = serde_json::to_string(&ModuleVersion::Number(7)).expect("json");
        assert_eq!(json, "7");
    }

    #[test]
    fn set_field_stores_text_verbatim() {
        let mut metadata =
            ModuleMetadata::with_defaults(Path::new("mymod.so"), &MetadataDefaults::default());
        for field in Field::ALL.into_iter().filter(|field| *field != Field::Architecture) {
            metadata.set_field(field, "  Mixed Case  ").expect("text field");
            assert_eq!(metadata.field(field), "  Mixed Case  ", "{field:?}");
        }
        metadata.set_field(Field::Architecture, "32").expect("numeric");
        assert_eq!(metadata.architecture, 32);
        assert!(metadata.set_field(Field::Architecture, "sixty-four").is_err());
        assert_eq!(metadata.architecture, 32);
    }

    #[test]
    fn architecture_must_be_numeric() {
        assert_eq!(parse_architecture("32"), Ok(32));
        assert_eq!(parse_architecture(" 64 "), Ok(64));
        assert_eq!(parse_architecture("+32"), Ok(32));
        assert_eq!(
            parse_architecture("x86"),
            Err(InputError::Architecture {
                value: "x86".to_string()
            })
        );
    }

    #[test]
    fn signed_architecture_is_an_integer_not_an_error() {
        assert_eq!(parse_architecture("-32"), Ok(-32));

        let mut metadata =
            ModuleMetadata::with_defaults(Path::new("mymod.so"), &MetadataDefaults::default());
        metadata.set_field(Field::Architecture, "-32").expect("signed integer");
        assert_eq!(metadata.field(Field::Architecture), "-32");
    }

    #[test]
    fn oversized_architecture_is_reported_as_out_of_range() {
        let err = parse_architecture("99999999999999999999").expect_err("too large");
        assert_eq!(
            err,
            InputError::ArchitectureOutOfRange {
                value: "99999999999999999999".to_string()
            }
        );
        assert!(!err.to_string().contains("must be an integer"));
    }
}
