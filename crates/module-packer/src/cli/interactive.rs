#![forbid(unsafe_code)]

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use tracing::debug;

use crate::metadata::{Field, ModuleMetadata};

pub const INTRO: &str = r#" _____       _ _     __        _          _____       _     _
| __  |___ _| |_|___|  |   ___| |_ ___   |     |___ _| |_ _| |___ ___
|    -| -_| . | |_ -|  |__| .'| . |_ -|  | | | | . | . | | | | -_|_ -|
|__|__|___|___|_|___|_____|__,|___|___|  |_|_|_|___|___|___|_|___|___|

This utility will walk you through creating a Redis module package file.
It only covers the most common items, and tries to guess sensible defaults.

See `module-packer <PATH_TO_MODULE> --help` for the flag that sets each field
without prompting.

Press enter to keep the value shown after each prompt.
Press ^C at any time to quit.
"#;

/// Prompts for every editable field, keeping the current value on empty input.
///
/// End of input is treated as an empty answer for the remaining prompts.
pub fn collect<R: BufRead, W: Write>(
    metadata: &mut ModuleMetadata,
    input: &mut R,
    output: &mut W,
) -> Result<()> {
    writeln!(output, "{INTRO}")?;

    for field in Field::ALL {
        write!(output, "{}:{} ", field.label(), metadata.field(field))?;
        output.flush()?;

        let answer = read_answer(input)
            .with_context(|| format!("failed to read {}", field.label().to_lowercase()))?;
        if answer.is_empty() {
            continue;
        }

        metadata.set_field(field, &answer)?;
        debug!(field = field.label(), "field set interactively");
    }

    Ok(())
}

fn read_answer<R: BufRead>(input: &mut R) -> std::io::Result<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(line)
}
