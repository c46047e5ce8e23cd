// chargeaudit CLI - reconcile billed charges against a practice-management snapshot

mod audit;
mod exit_codes;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chargeaudit_recon::ReconError;
use exit_codes::{recon_exit_code, EXIT_AUDIT_IO, EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE};

/// Environment variable holding a `tracing` filter directive.
const LOG_ENV: &str = "CHARGEAUDIT_LOG";

#[derive(Parser)]
#[command(name = "chargeaudit")]
#[command(about = "Audit billed charges against the records a remote system holds")]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug); CHARGEAUDIT_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit every row of an input spreadsheet
    #[command(after_help = "\
Examples:
  chargeaudit run claims.xlsx --snapshot tebra.json
  chargeaudit run claims.csv --snapshot tebra.json --config audit.toml --json
  chargeaudit run claims.xlsx --snapshot tebra.json --export annotated.xlsx
  chargeaudit run claims.xlsx --snapshot tebra.json --sheet March --output result.json")]
    Run {
        /// Input spreadsheet (.csv, .tsv, .xlsx, .xls, .ods)
        input: PathBuf,

        /// JSON snapshot of patients and charges answering remote lookups
        #[arg(long, env = "CHARGEAUDIT_SNAPSHOT")]
        snapshot: PathBuf,

        /// Audit config (.toml); defaults apply when omitted
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Worksheet to read from an Excel input (default: first sheet)
        #[arg(long)]
        sheet: Option<String>,

        /// Print the JSON result to stdout instead of the human summary
        #[arg(long)]
        json: bool,

        /// Write the JSON result to a file
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Write the input back out with audit result columns appended
        #[arg(long)]
        export: Option<PathBuf>,

        /// Suppress the human summary and invalid-record list
        #[arg(long, short = 'q')]
        quiet: bool,
    },

    /// Validate an audit config without running
    #[command(after_help = "\
Examples:
  chargeaudit validate audit.toml")]
    Validate {
        /// Path to the audit .toml config
        config: PathBuf,
    },

    /// Check that an input spreadsheet carries every required column
    #[command(after_help = "\
Examples:
  chargeaudit check claims.xlsx
  chargeaudit check claims.csv --config audit.toml")]
    Check {
        /// Input spreadsheet (.csv, .tsv, .xlsx, .xls, .ods)
        input: PathBuf,

        /// Audit config (.toml) whose column mapping to check against
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Worksheet to read from an Excel input (default: first sheet)
        #[arg(long)]
        sheet: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        None => {
            // No subcommand = show usage
            eprintln!("Usage: chargeaudit <command> [options]");
            eprintln!("       chargeaudit --help for more information");
            Ok(())
        }
        Some(Commands::Run { input, snapshot, config, sheet, json, output, export, quiet }) => {
            audit::cmd_run(audit::RunArgs { input, snapshot, config, sheet, json, output, export, quiet })
        }
        Some(Commands::Validate { config }) => audit::cmd_validate(config),
        Some(Commands::Check { input, config, sheet }) => audit::cmd_check(input, config, sheet),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn general(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_AUDIT_IO, message: msg.into(), hint: None }
    }

    /// Create error from an engine error with the matching exit code.
    pub fn recon(err: ReconError) -> Self {
        let code = recon_exit_code(&err);
        let hint = match &err {
            ReconError::MissingColumns { .. } => {
                Some("map differently named headers under [columns] in the audit config".to_string())
            }
            ReconError::ConfigParse(_) => Some("check the file is valid TOML".to_string()),
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
