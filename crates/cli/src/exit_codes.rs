//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: scripts gate billing runs on them.
//!
//! # Exit Code Ranges
//!
//! | Code | Domain    | Description                                   |
//! |------|-----------|-----------------------------------------------|
//! | 0    | Universal | Success (every record verified)               |
//! | 1    | Universal | General error (unspecified)                   |
//! | 2    | Universal | CLI usage error (bad args, unsupported file)  |
//! | 3    | audit     | Audit completed, at least one record invalid  |
//! | 4    | audit     | Audit config failed to parse or validate      |
//! | 5    | audit     | Input is missing required columns             |
//! | 6    | audit     | Runtime I/O (input, snapshot, export, output) |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use chargeaudit_recon::ReconError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unsupported file type.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Audit (3-6)
// =============================================================================

/// The run finished and produced at least one Invalid verdict.
/// Like `diff(1)`, this reports a result rather than a failure.
pub const EXIT_AUDIT_INVALID: u8 = 3;

/// Config could not be parsed, or parsed but failed validation.
pub const EXIT_AUDIT_CONFIG: u8 = 4;

/// Input header row lacks one or more required columns.
pub const EXIT_AUDIT_COLUMNS: u8 = 5;

/// Reading input/snapshot or writing results failed.
pub const EXIT_AUDIT_IO: u8 = 6;

/// Map a run-level engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_AUDIT_CONFIG,
        ReconError::MissingColumns { .. } => EXIT_AUDIT_COLUMNS,
        ReconError::Input(_) => EXIT_AUDIT_IO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_AUDIT_INVALID,
            EXIT_AUDIT_CONFIG,
            EXIT_AUDIT_COLUMNS,
            EXIT_AUDIT_IO,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn engine_errors_map_to_audit_range() {
        assert_eq!(recon_exit_code(&ReconError::ConfigParse("x".into())), EXIT_AUDIT_CONFIG);
        assert_eq!(recon_exit_code(&ReconError::ConfigValidation("x".into())), EXIT_AUDIT_CONFIG);
        assert_eq!(
            recon_exit_code(&ReconError::MissingColumns { columns: vec!["DOB".into()] }),
            EXIT_AUDIT_COLUMNS
        );
        assert_eq!(recon_exit_code(&ReconError::Input("x".into())), EXIT_AUDIT_IO);
    }
}
