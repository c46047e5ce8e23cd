//! Canonical forms for free-text fields.
//!
//! Every function here is pure and total: malformed input produces an
//! empty string or `None`, never an error.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::model::CellValue;

/// Professional credentials stripped from the end of person names.
const CREDENTIALS: &[&str] = &[
    "md", "do", "rn", "np", "pa", "pcp", "facp", "dpm", "lcsw", "lpcc", "rnfa", "fnp", "aprn",
];

/// Accepted textual date formats, tried in order.
const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d"];

fn credential_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternatives = CREDENTIALS.join("|");
        Regex::new(&format!(r"(?i)[,.\s]+(?:{alternatives})[\s.]*$")).unwrap()
    })
}

fn company_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d+)\)$").unwrap())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whitespace {
    /// Runs of whitespace become a single space.
    Collapse,
    /// All whitespace is removed.
    Strip,
}

/// Lower-case, drop `.,()-`, then collapse or strip whitespace.
pub fn normalize_string(text: &str, whitespace: Whitespace) -> String {
    let lowered = text.trim().to_lowercase();
    let kept = lowered.chars().filter(|c| !matches!(c, '.' | ',' | '(' | ')' | '-'));
    match whitespace {
        Whitespace::Strip => kept.filter(|c| !c.is_whitespace()).collect(),
        Whitespace::Collapse => collapse_whitespace(&kept.collect::<String>()),
    }
}

/// Alphanumerics only, upper-cased. Idempotent.
pub fn normalize_code(code: &str) -> String {
    code.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Upper-cased alphanumerics without leading zeros.
pub fn normalize_policy_number(number: &str) -> String {
    normalize_code(number).trim_start_matches('0').to_string()
}

/// Remove trailing credentials (`, MD`, ` FACP.`...), repeatedly, so stacked
/// credentials all go. A credential must follow a separator, which keeps
/// names like "Fernando" intact.
pub fn strip_credentials(name: &str) -> String {
    let mut current = name.trim().to_string();
    loop {
        let stripped = credential_suffix_re()
            .replace(&current, "")
            .trim_end()
            .to_string();
        if stripped == current {
            return current;
        }
        current = stripped;
    }
}

/// Canonical person name: credentials stripped, `Last, First` reordered to
/// `First Last`, lower-cased, stray punctuation removed.
pub fn normalize_name(name: &str) -> String {
    let bare = strip_credentials(name);
    let ordered = surname_first_to_natural(&bare);
    collapse_whitespace(&strip_name_punctuation(&ordered.to_lowercase()))
}

/// `"Smith, John"` → `"John Smith"`. Anything that is not exactly two
/// non-empty comma-separated parts is returned unchanged.
fn surname_first_to_natural(name: &str) -> String {
    let parts: Vec<&str> = name.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [last, first] if !last.is_empty() && !first.is_empty() => format!("{first} {last}"),
        _ => name.to_string(),
    }
}

/// Drop `,` `.` `"` unless they sit next to a hyphen or apostrophe.
fn strip_name_punctuation(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let joins = |c: Option<char>| matches!(c, Some('-' | '\'' | '\u{2019}'));
    chars
        .iter()
        .enumerate()
        .filter(|&(i, &c)| {
            if !matches!(c, ',' | '.' | '"') {
                return true;
            }
            let before = i.checked_sub(1).and_then(|p| chars.get(p)).copied();
            joins(before) || joins(chars.get(i + 1).copied())
        })
        .map(|(_, c)| *c)
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a date cell. Date cells are taken as-is; text is tried against
/// `MM/DD/YYYY` then `YYYY-MM-DD`, ignoring any trailing time component.
pub fn parse_date(input: &CellValue) -> Option<NaiveDate> {
    match input {
        CellValue::Date(dt) => Some(dt.date()),
        CellValue::Text(s) => parse_date_text(s),
        CellValue::Empty | CellValue::Number(_) => None,
    }
}

pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let token = text.split_whitespace().next()?;
    let date_part = token.split('T').next().unwrap_or(token);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Canonical `YYYY-MM-DD`, or `None` when the input is not a date.
pub fn normalize_dob(input: &CellValue) -> Option<String> {
    parse_date(input).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Trailing `(digits)` company identifier, e.g. `"Acme Health (12345)"` → `"12345"`.
pub fn extract_company_id(insurance_name: &str) -> Option<&str> {
    company_id_re()
        .captures(insurance_name.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
