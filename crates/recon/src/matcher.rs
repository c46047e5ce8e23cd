use std::fmt;

use crate::compare::compare_amounts;
use crate::model::{Amount, CandidateRecord, ExpectedRecord};
use crate::normalize::normalize_code;

/// Why no candidate was selected for an expected record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchFailure {
    /// No candidate carries the expected procedure code.
    ProcedureNotFound { procedure_code: Option<String> },
    /// Procedure code found, but no same-code candidate has the expected amount.
    AmountMismatch {
        expected: Option<Amount>,
        first_candidate: Option<Amount>,
    },
}

fn amount_text(amount: Option<Amount>) -> String {
    amount.map_or_else(|| "NULL".to_string(), |a| a.to_string())
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcedureNotFound { procedure_code } => write!(
                f,
                "No matching charge found: procedure code not found ('{}')",
                procedure_code.as_deref().unwrap_or("NULL")
            ),
            Self::AmountMismatch { expected, first_candidate } => write!(
                f,
                "No matching charge found: Charge Amount Mismatch (Expected: '{}', Actual: '{}')",
                amount_text(*expected),
                amount_text(*first_candidate),
            ),
        }
    }
}

/// Select the candidate for `expected`.
///
/// Two tiers: candidates sharing the normalized procedure code, then the
/// first of those whose amount matches exactly (in cents). Input order
/// decides ties. A blank code never matches, on either side.
pub fn find_match(expected: &ExpectedRecord, candidates: &[CandidateRecord]) -> Result<usize, MatchFailure> {
    find_match_where(expected, candidates, |_| true)
}

/// [`find_match`] over the candidates for which `available(index)` holds.
pub fn find_match_where(
    expected: &ExpectedRecord,
    candidates: &[CandidateRecord],
    available: impl Fn(usize) -> bool,
) -> Result<usize, MatchFailure> {
    let code = normalize_code(expected.procedure_code.as_deref().unwrap_or_default());
    let same_code: Vec<usize> = if code.is_empty() {
        Vec::new()
    } else {
        candidates
            .iter()
            .enumerate()
            .filter(|(i, c)| {
                available(*i) && normalize_code(c.procedure_code.as_deref().unwrap_or_default()) == code
            })
            .map(|(i, _)| i)
            .collect()
    };

    let Some(&first) = same_code.first() else {
        return Err(MatchFailure::ProcedureNotFound {
            procedure_code: expected.procedure_code.clone(),
        });
    };

    same_code
        .iter()
        .copied()
        .find(|&i| compare_amounts(expected.charge_amount, candidates[i].total_charges))
        .ok_or(MatchFailure::AmountMismatch {
            expected: expected.charge_amount,
            first_candidate: candidates[first].total_charges,
        })
}
