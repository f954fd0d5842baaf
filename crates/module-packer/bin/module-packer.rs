use std::process::ExitCode;

use module_packer::{cli, telemetry};

/// Exit code for every fatal error other than a usage error.
const FAILURE_EXIT_CODE: u8 = 2;

fn main() -> ExitCode {
    if let Err(err) = telemetry::install() {
        eprintln!("warning: {err:#}");
    }

    let args = std::env::args_os().skip(1).collect();
    let stdin = std::io::stdin();

    match cli::run_with_args(args, stdin.lock(), std::io::stdout()) {
        Ok(code) => code,
        Err(err) => {
            if let Some(parse_err) = err.downcast_ref::<clap::Error>() {
                parse_err.exit();
            }
            eprintln!("error: {err:#}");
            ExitCode::from(FAILURE_EXIT_CODE)
        }
    }
}
