pub mod clients;
pub mod config;
pub mod context;
pub mod diff;
pub mod envelope;
pub mod errors;
pub mod intercept;
pub mod recorder;
pub mod store;

use clap::{error::ErrorKind, Parser, Subcommand};
use diff::{has_drift, Diff};
use errors::RetraceError;
use recorder::load_recording;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "retrace")]
#[command(about = "Inspect and compare retrace recordings")]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// Compare two recordings kind by kind.
    Diff {
        #[arg(long)]
        current: PathBuf,
        #[arg(long)]
        previous: PathBuf,
        /// Also write the diff document to this path.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print a recording's fingerprint and its envelopes in sequence order.
    Show {
        path: PathBuf,
        /// Only print envelopes of this record kind.
        #[arg(long)]
        kind: Option<String>,
    },
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn run() -> Result<i32, RetraceError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    run_with_args(&args)
}

pub fn run_with_args(args: &[std::ffi::OsString]) -> Result<i32, RetraceError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(RetraceError::Cli(error.to_string())),
        },
    };

    match cli.command {
        CliCommand::Diff {
            current,
            previous,
            out,
        } => {
            let document = Diff::new(&current, &previous).calculate_diff()?;
            let body = serde_json::to_string_pretty(&document)
                .map_err(|e| RetraceError::Serialization(e.to_string()))?;
            println!("{body}");
            if let Some(out) = out {
                std::fs::write(&out, body)
                    .map_err(|e| RetraceError::Io(format!("{}: {e}", out.display())))?;
            }
            Ok(if has_drift(&document) { 1 } else { 0 })
        }
        CliCommand::Show { path, kind } => {
            let contents = std::fs::read(&path)
                .map_err(|e| RetraceError::Io(format!("{}: {e}", path.display())))?;
            let fingerprint = hex_bytes(&Sha256::digest(&contents));
            println!("sha256:{fingerprint} {}", path.display());

            let store = load_recording(&path)?;
            let mut entries: Vec<(&str, &envelope::Envelope)> = store
                .iter()
                .filter(|(name, _)| kind.as_deref().map_or(true, |k| k == *name))
                .collect();
            entries.sort_by_key(|(_, envelope)| envelope.seq);
            for (name, envelope) in entries {
                println!(
                    "#{} {} params={} result={}",
                    envelope.seq, name, envelope.params, envelope.result
                );
            }
            Ok(0)
        }
    }
}
