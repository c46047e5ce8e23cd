//! Per-field equivalence predicates.
//!
//! Unless noted otherwise: both sides empty is a (vacuous) match, exactly
//! one side empty is a mismatch.

use serde::Deserialize;

use crate::model::{Amount, CellValue};
use crate::normalize::{
    extract_company_id, normalize_code, normalize_dob, normalize_name, normalize_policy_number,
    normalize_string, strip_credentials, Whitespace,
};

/// How insurance plan names are compared. The two policies disagree on
/// real data, so the choice is explicit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsurancePlanPolicy {
    /// Normalized equality, with Blue Cross / BCBS spellings treated as one.
    #[default]
    Substring,
    /// Compare trailing `(digits)` company identifiers.
    CompanyId,
}

/// Outcome of a comparison that can fail for reasons other than a mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    Equivalent,
    Different,
    /// The values could not be compared; the message says why.
    Invalid(String),
}

impl Comparison {
    fn from_bool(equivalent: bool) -> Self {
        if equivalent {
            Self::Equivalent
        } else {
            Self::Different
        }
    }
}

fn blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Applies the empty-side convention, then `f` on two present values.
fn with_presence(a: Option<&str>, b: Option<&str>, f: impl FnOnce(&str, &str) -> bool) -> bool {
    match (blank(a), blank(b)) {
        (None, None) => true,
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

/// First and last name tokens must both match; middle names are ignored.
pub fn compare_names(a: Option<&str>, b: Option<&str>) -> bool {
    let a = a.map(normalize_name).unwrap_or_default();
    let b = b.map(normalize_name).unwrap_or_default();
    let parts_a: Vec<&str> = a.split_whitespace().collect();
    let parts_b: Vec<&str> = b.split_whitespace().collect();
    match (parts_a.as_slice(), parts_b.as_slice()) {
        ([], []) => true,
        ([first_a, .., last_a], [first_b, .., last_b]) => first_a == first_b && last_a == last_b,
        ([only_a], [only_b]) => only_a == only_b,
        _ => false,
    }
}

/// Both literally absent is a match. Otherwise both must parse to the same
/// calendar date; a present-but-unparseable value never matches.
pub fn compare_dob(a: &CellValue, b: &CellValue) -> bool {
    if a.is_empty() && b.is_empty() {
        return true;
    }
    match (normalize_dob(a), normalize_dob(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// `office` ≈ POS `11`, any telehealth-at-home wording ≈ POS `10`.
pub fn compare_place_of_service(expected: Option<&str>, actual: Option<&str>) -> bool {
    with_presence(expected, actual, |e, a| {
        let e = normalize_string(e, Whitespace::Strip);
        let a = normalize_string(a, Whitespace::Strip);
        if e == "office" && a == "11" {
            return true;
        }
        if e.contains("telehealth") && e.contains("home") && a == "10" {
            return true;
        }
        e == a
    })
}

fn is_blue_cross(normalized: &str) -> bool {
    normalized.contains("bluecross") || normalized.contains("bcbs")
}

/// Plan comparison under the configured policy.
///
/// `actual_company_id` is the remote side's explicit company identifier;
/// when absent, the identifier is extracted from `actual`.
pub fn compare_insurance_plan(
    expected: Option<&str>,
    actual: Option<&str>,
    actual_company_id: Option<&str>,
    policy: InsurancePlanPolicy,
) -> Comparison {
    match policy {
        InsurancePlanPolicy::Substring => Comparison::from_bool(with_presence(expected, actual, |e, a| {
            let e = normalize_string(e, Whitespace::Strip);
            let a = normalize_string(a, Whitespace::Strip);
            if (e == "bcbs" && is_blue_cross(&a)) || (a == "bcbs" && is_blue_cross(&e)) {
                return true;
            }
            if is_blue_cross(&e) && is_blue_cross(&a) {
                return true;
            }
            e == a
        })),
        InsurancePlanPolicy::CompanyId => {
            let Some(expected) = blank(expected) else {
                return Comparison::from_bool(blank(actual).is_none() && blank(actual_company_id).is_none());
            };
            let Some(expected_id) = extract_company_id(expected) else {
                return Comparison::Invalid(format!("format error - no identifier in '{expected}'"));
            };
            let actual_id = blank(actual_company_id).or_else(|| blank(actual).and_then(extract_company_id));
            Comparison::from_bool(actual_id == Some(expected_id))
        }
    }
}

/// Surname for provider matching: the segment before a comma, else the
/// last whitespace token.
fn provider_surname(name: &str) -> String {
    let bare = strip_credentials(name);
    let surname = match bare.split_once(',') {
        Some((before, _)) => before.trim().to_string(),
        None => bare.split_whitespace().last().unwrap_or_default().to_string(),
    };
    normalize_string(&surname, Whitespace::Strip)
}

/// Provider names are loosely formatted on both sides, so any of: equal
/// normalized names, equal first/last names, containment, or equal surnames.
pub fn compare_provider_names(a: Option<&str>, b: Option<&str>) -> bool {
    with_presence(a, b, |a_raw, b_raw| {
        let a = normalize_name(a_raw);
        let b = normalize_name(b_raw);
        if a == b || compare_names(Some(a_raw), Some(b_raw)) {
            return true;
        }
        if !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a)) {
            return true;
        }
        let surname_a = provider_surname(a_raw);
        !surname_a.is_empty() && surname_a == provider_surname(b_raw)
    })
}

/// Equality after [`normalize_code`].
pub fn compare_codes(a: Option<&str>, b: Option<&str>) -> bool {
    normalize_code(a.unwrap_or_default()) == normalize_code(b.unwrap_or_default())
}

/// Collapsed-whitespace normalized string equality.
pub fn compare_text(a: Option<&str>, b: Option<&str>) -> bool {
    normalize_string(a.unwrap_or_default(), Whitespace::Collapse)
        == normalize_string(b.unwrap_or_default(), Whitespace::Collapse)
}

/// Strict: a missing amount never equals anything, not even another
/// missing amount.
pub fn compare_amounts(a: Option<Amount>, b: Option<Amount>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// Unit counts compare as decimals; empty reads as zero.
pub fn compare_units(a: Option<&str>, b: Option<&str>) -> Comparison {
    let parse = |v: Option<&str>| -> Result<f64, String> {
        match blank(v) {
            None => Ok(0.0),
            Some(text) => text
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| format!("invalid unit count '{text}'")),
        }
    };
    match (parse(a), parse(b)) {
        (Ok(a), Ok(b)) => Comparison::from_bool(a == b),
        (Err(msg), _) | (_, Err(msg)) => Comparison::Invalid(msg),
    }
}

/// Equality after [`normalize_policy_number`].
pub fn compare_policy_numbers(a: Option<&str>, b: Option<&str>) -> bool {
    normalize_policy_number(a.unwrap_or_default()) == normalize_policy_number(b.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_ignore_order_and_credentials() {
        assert!(compare_names(Some("Smith, John"), Some("John Smith, MD")));
        assert!(compare_names(Some("John Q Smith"), Some("john smith")));
        assert!(!compare_names(Some("John Smith"), Some("Jane Smith")));
    }

    #[test]
    fn names_empty_sides() {
        assert!(compare_names(None, Some("  ")));
        assert!(!compare_names(None, Some("John Smith")));
        assert!(!compare_names(Some("John Smith"), None));
    }

    #[test]
    fn dob_policy() {
        assert!(compare_dob(&CellValue::from("03/04/2020"), &CellValue::from("2020-03-04")));
        assert!(compare_dob(&CellValue::Empty, &CellValue::from("")));
        assert!(!compare_dob(&CellValue::from("03/04/2020"), &CellValue::Empty));
        assert!(!compare_dob(&CellValue::from("garbage"), &CellValue::from("garbage")));
    }

    #[test]
    fn place_of_service_aliases() {
        assert!(compare_place_of_service(Some("Office"), Some("11")));
        assert!(compare_place_of_service(Some("Telehealth - Home"), Some("10")));
        assert!(compare_place_of_service(Some("11"), Some(" 11 ")));
        assert!(!compare_place_of_service(Some("Office"), Some("10")));
        assert!(!compare_place_of_service(Some("Telehealth"), Some("10")));
        assert!(compare_place_of_service(None, None));
        assert!(!compare_place_of_service(None, Some("11")));
    }

    #[test]
    fn plan_substring_policy() {
        let p = InsurancePlanPolicy::Substring;
        assert_eq!(compare_insurance_plan(Some("BCBS"), Some("Blue Cross PPO"), None, p), Comparison::Equivalent);
        assert_eq!(compare_insurance_plan(Some("Blue Cross of CA"), Some("BCBS"), None, p), Comparison::Equivalent);
        assert_eq!(compare_insurance_plan(Some("Aetna PPO"), Some("aetna ppo"), None, p), Comparison::Equivalent);
        assert_eq!(compare_insurance_plan(Some("Aetna PPO"), Some("Cigna"), None, p), Comparison::Different);
        assert_eq!(compare_insurance_plan(None, None, None, p), Comparison::Equivalent);
    }

    #[test]
    fn plan_company_id_policy() {
        let p = InsurancePlanPolicy::CompanyId;
        assert_eq!(
            compare_insurance_plan(Some("Acme Health (12345)"), Some("ACME HMO"), Some("12345"), p),
            Comparison::Equivalent
        );
        assert_eq!(
            compare_insurance_plan(Some("Acme Health (12345)"), Some("Acme (12345)"), None, p),
            Comparison::Equivalent
        );
        assert_eq!(
            compare_insurance_plan(Some("Acme Health (12345)"), Some("Acme (999)"), None, p),
            Comparison::Different
        );
        assert!(matches!(
            compare_insurance_plan(Some("Acme Health"), Some("Acme (12345)"), None, p),
            Comparison::Invalid(msg) if msg.contains("no identifier")
        ));
    }

    #[test]
    fn providers_match_loosely() {
        assert!(compare_provider_names(Some("Smith, John MD"), Some("John Smith")));
        assert!(compare_provider_names(Some("Dr Jane Doe"), Some("Jane Doe, NP")));
        assert!(compare_provider_names(Some("Doe"), Some("Doe, Jane")));
        assert!(!compare_provider_names(Some("Jane Doe"), Some("Alan Turing")));
        assert!(!compare_provider_names(None, Some("Alan Turing")));
    }

    #[test]
    fn codes_and_text() {
        assert!(compare_codes(Some("e11.9"), Some("E119")));
        assert!(compare_codes(None, Some("")));
        assert!(!compare_codes(Some("25"), Some("59")));
        assert!(compare_text(Some("Main Clinic."), Some("main  clinic")));
    }

    #[test]
    fn amounts_round_half_up_and_are_strict() {
        assert!(compare_amounts(Amount::from_f64(10.005), Amount::from_f64(10.01)));
        assert!(!compare_amounts(Amount::from_f64(10.004), Amount::from_f64(10.01)));
        assert!(!compare_amounts(None, None));
        assert!(!compare_amounts(Amount::parse("5"), None));
    }

    #[test]
    fn units() {
        assert_eq!(compare_units(Some("1"), Some("1.0")), Comparison::Equivalent);
        assert_eq!(compare_units(None, Some("0")), Comparison::Equivalent);
        assert_eq!(compare_units(Some("2"), Some("1")), Comparison::Different);
        assert!(matches!(compare_units(Some("two"), Some("2")), Comparison::Invalid(_)));
    }

    #[test]
    fn policy_numbers() {
        assert!(compare_policy_numbers(Some("0012-345"), Some("12345")));
        assert!(!compare_policy_numbers(Some("12345"), Some("12346")));
    }
}
