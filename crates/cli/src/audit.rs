//! `chargeaudit run|validate|check`: config-driven charge audit.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use chargeaudit_io::FileFormat;
use chargeaudit_recon::model::AuditResult;
use chargeaudit_recon::report::{annotate, invalid_records, summary_lines};
use chargeaudit_recon::{AuditConfig, Auditor, InputTable, SnapshotSource};

use crate::exit_codes::EXIT_AUDIT_INVALID;
use crate::CliError;

pub struct RunArgs {
    pub input: PathBuf,
    pub snapshot: PathBuf,
    pub config: Option<PathBuf>,
    pub sheet: Option<String>,
    pub json: bool,
    pub output: Option<PathBuf>,
    pub export: Option<PathBuf>,
    pub quiet: bool,
}

/// A config together with the directory its relative output paths resolve against.
struct LoadedConfig {
    config: AuditConfig,
    base_dir: PathBuf,
}

impl LoadedConfig {
    fn resolve(&self, path: &str) -> PathBuf {
        self.base_dir.join(path)
    }
}

fn load_config(path: Option<&Path>) -> Result<LoadedConfig, CliError> {
    let Some(path) = path else {
        return Ok(LoadedConfig { config: AuditConfig::default(), base_dir: PathBuf::from(".") });
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::io(format!("cannot read config {}: {e}", path.display())))?;
    let config = AuditConfig::from_toml(&text).map_err(CliError::recon)?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    debug!(config = %path.display(), name = %config.name, "loaded audit config");
    Ok(LoadedConfig { config, base_dir })
}

fn load_input(path: &Path, sheet: Option<&str>) -> Result<InputTable, CliError> {
    FileFormat::from_path(path).map_err(CliError::usage)?;
    let table = chargeaudit_io::import_table(path, sheet).map_err(CliError::io)?;
    info!(input = %path.display(), rows = table.len(), "loaded input");
    Ok(table)
}

pub fn cmd_run(args: RunArgs) -> Result<(), CliError> {
    let loaded = load_config(args.config.as_deref())?;
    let config = &loaded.config;

    // Resolve output destinations up front so a bad extension fails before the run.
    let json_path = args
        .output
        .clone()
        .or_else(|| config.output.json.as_deref().map(|p| loaded.resolve(p)));
    let export_path = args
        .export
        .clone()
        .or_else(|| config.output.export.as_deref().map(|p| loaded.resolve(p)));
    if let Some(path) = &export_path {
        FileFormat::from_path(path).map_err(CliError::usage)?;
    }

    let table = load_input(&args.input, args.sheet.as_deref())?;

    let snapshot_json = std::fs::read_to_string(&args.snapshot).map_err(|e| {
        CliError::io(format!("cannot read snapshot {}: {e}", args.snapshot.display()))
    })?;
    let source = SnapshotSource::from_json(&snapshot_json).map_err(CliError::recon)?;
    info!(
        snapshot = %args.snapshot.display(),
        patients = source.patient_count(),
        charge_queries = source.charge_query_count(),
        "loaded snapshot"
    );

    let result = Auditor::new(config, source)
        .run_with_progress(&table, |p| {
            debug!(row = p.row_number, "auditing record {}/{}", p.index + 1, p.total);
        })
        .map_err(CliError::recon)?;

    if let Some(path) = &json_path {
        chargeaudit_io::json::export(&result, path)
            .map_err(|e| CliError::io(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if let Some(path) = &export_path {
        let annotated = annotate(&table, &result.records);
        chargeaudit_io::export_table(&annotated, Some(&result.summary), path).map_err(CliError::io)?;
        eprintln!("wrote {}", path.display());
    }

    if args.json {
        let json_str = chargeaudit_io::json::to_string(&result)
            .map_err(|e| CliError::general(format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
    } else if !args.quiet {
        print_summary(&result);
    }

    let s = &result.summary;
    if s.invalid > 0 {
        return Err(CliError {
            code: EXIT_AUDIT_INVALID,
            message: format!("{} of {} records invalid", s.invalid, s.total_records),
            hint: None,
        });
    }
    Ok(())
}

/// Human summary and the invalid-record list, to stderr.
fn print_summary(result: &AuditResult) {
    eprintln!("{}", result.meta.config_name);
    let lines = summary_lines(&result.summary);
    let width = lines.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in &lines {
        eprintln!("  {label:<width$}  {value}");
    }

    let mut invalid = invalid_records(&result.records).peekable();
    if invalid.peek().is_none() {
        return;
    }
    eprintln!();
    eprintln!("Invalid records:");
    for r in invalid {
        eprintln!(
            "  row {:>4}  {:<8}  patient {}  dos {}  cpt {}  {}",
            r.row_number,
            format!("{:?}", r.status).to_lowercase(),
            r.patient_id.as_deref().unwrap_or("-"),
            r.date_of_service.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            r.procedure_code.as_deref().unwrap_or("-"),
            r.reason,
        );
    }
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let loaded = load_config(Some(config_path.as_path()))?;
    let config = &loaded.config;
    eprintln!(
        "ok: '{}' maps {} required and {} optional columns",
        config.name,
        config.columns.required().len(),
        config.columns.optional().len(),
    );
    Ok(())
}

pub fn cmd_check(input: PathBuf, config_path: Option<PathBuf>, sheet: Option<String>) -> Result<(), CliError> {
    let loaded = load_config(config_path.as_deref())?;
    let table = load_input(&input, sheet.as_deref())?;

    let index = table.column_index(&loaded.config.columns).map_err(|e| {
        CliError::recon(e).with_hint(format!("found columns: {}", table.headers.join(", ")))
    })?;

    eprintln!("ok: {} rows, all required columns present", table.len());
    let optional = loaded.config.columns.optional();
    for (name, found) in optional.iter().zip([index.service_location, index.policy_number]) {
        if found.is_none() {
            eprintln!("note: optional column '{name}' absent; it will not be compared");
        }
    }
    Ok(())
}
