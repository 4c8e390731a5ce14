//! Purpose: `aliquot` CLI entry point: run pipetting protocols and write
//! worklist files.
//! Role: Binary crate root; parses args, executes protocols, prints
//! reports.
//! Invariants: Errors are printed to stderr; the process exit code is
//! derived from `api::to_exit_code`.
//! Invariants: All ledger mutations go through `ingest::execute`.
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aliquot::api::{to_exit_code, Error, ErrorKind};
use aliquot::ingest::{execute, load_protocol};

#[derive(Debug, Parser)]
#[command(name = "aliquot", version, about = "In-silico liquid handling worklists")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a protocol and write the resulting worklist file.
    Plan {
        /// Path of the protocol JSON document.
        protocol: PathBuf,
        /// Path of the .gwl worklist to write.
        #[arg(short, long)]
        output: PathBuf,
        /// Print the labware history reports afterwards.
        #[arg(long)]
        reports: bool,
    },
    /// Validate a protocol without writing anything.
    Check {
        /// Path of the protocol JSON document.
        protocol: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(to_exit_code(err.kind()) as u8)
        }
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Command::Plan {
            protocol,
            output,
            reports,
        } => {
            let protocol = load_protocol(&read_file(&protocol)?)?;
            let outcome = execute(&protocol, Some(output.clone()))?;
            println!(
                "wrote {} records to {}",
                outcome.lines.len(),
                output.display()
            );
            if reports {
                for report in &outcome.reports {
                    println!("\n{report}");
                }
            }
            Ok(())
        }
        Command::Check { protocol } => {
            let protocol = load_protocol(&read_file(&protocol)?)?;
            let outcome = execute(&protocol, None)?;
            println!(
                "ok: {} labware, {} records",
                outcome.reports.len(),
                outcome.lines.len()
            );
            Ok(())
        }
    }
}

fn read_file(path: &PathBuf) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("could not read {}", path.display()))
            .with_source(err)
    })
}
