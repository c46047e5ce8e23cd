use std::collections::BTreeMap;

use crate::cache::LookupStats;
use crate::ingest::{InputRow, InputTable};
use crate::model::{AuditStatus, AuditSummary, CellValue, RecordStatus, RecordVerdict};

/// Header of the appended verdict column.
pub const AUDIT_RESULTS_HEADER: &str = "Audit Results";
/// Header of the appended reason column.
pub const REASON_HEADER: &str = "Reason for Invalid";

/// Compute summary statistics from per-record verdicts.
pub fn compute_summary(records: &[RecordVerdict], lookups: LookupStats) -> AuditSummary {
    let mut failure_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut verified = 0;
    let mut matched = 0;
    let mut mismatched = 0;
    let mut errors = 0;

    for r in records {
        if let Some(kind) = r.failure {
            *failure_counts.entry(kind.to_string()).or_insert(0) += 1;
        }
        if r.audit_result == AuditStatus::Verified {
            verified += 1;
        }
        match r.status {
            RecordStatus::Match => matched += 1,
            RecordStatus::Mismatch => mismatched += 1,
            RecordStatus::Error => errors += 1,
        }
    }

    AuditSummary {
        total_records: records.len(),
        verified,
        invalid: records.len() - verified,
        matched,
        mismatched,
        errors,
        failure_counts,
        lookups,
    }
}

/// Verdicts whose coarse status is `Invalid`, in input order.
pub fn invalid_records(records: &[RecordVerdict]) -> impl Iterator<Item = &RecordVerdict> {
    records.iter().filter(|r| r.audit_result == AuditStatus::Invalid)
}

/// The input table with the two verdict columns appended to every row.
///
/// Verdicts are matched to rows by row number; a row without a verdict
/// gets empty verdict cells.
pub fn annotate(table: &InputTable, records: &[RecordVerdict]) -> InputTable {
    let by_row: BTreeMap<usize, &RecordVerdict> = records.iter().map(|r| (r.row_number, r)).collect();
    let width = table.headers.len();

    let mut headers = table.headers.clone();
    headers.push(AUDIT_RESULTS_HEADER.to_string());
    headers.push(REASON_HEADER.to_string());

    let rows = table
        .rows
        .iter()
        .map(|row| {
            let mut cells = row.cells.clone();
            cells.resize(width, CellValue::Empty);
            match by_row.get(&row.row_number) {
                Some(v) => {
                    cells.push(CellValue::Text(v.audit_result.to_string()));
                    cells.push(match v.audit_result {
                        AuditStatus::Verified => CellValue::Empty,
                        AuditStatus::Invalid => CellValue::Text(v.reason.clone()),
                    });
                }
                None => cells.extend([CellValue::Empty, CellValue::Empty]),
            }
            InputRow {
                row_number: row.row_number,
                cells,
            }
        })
        .collect();

    InputTable { headers, rows }
}

/// Summary as `(label, value)` lines, in display order.
pub fn summary_lines(summary: &AuditSummary) -> Vec<(String, String)> {
    let mut lines = vec![
        ("Total records".to_string(), summary.total_records.to_string()),
        ("Verified".to_string(), summary.verified.to_string()),
        ("Invalid".to_string(), summary.invalid.to_string()),
        ("Matched".to_string(), summary.matched.to_string()),
        ("Mismatched".to_string(), summary.mismatched.to_string()),
        ("Errors".to_string(), summary.errors.to_string()),
    ];
    for (kind, count) in &summary.failure_counts {
        lines.push((format!("Failures: {kind}"), count.to_string()));
    }
    let l = &summary.lookups;
    lines.push(("Identity lookups".to_string(), l.identity_fetches.to_string()));
    lines.push(("Identity cache hits".to_string(), l.identity_cache_hits.to_string()));
    lines.push(("Charge lookups".to_string(), l.candidate_fetches.to_string()));
    lines.push(("Charge cache hits".to_string(), l.candidate_cache_hits.to_string()));
    lines
}
