use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize, Serializer};

use crate::cache::LookupStats;
use crate::error::FailureKind;

// ---------------------------------------------------------------------------
// Input cells
// ---------------------------------------------------------------------------

/// A typed spreadsheet cell, as delivered by the file readers.
///
/// Readers never coerce: numbers stay numbers, dates stay dates. Each
/// field is parsed out of its cell exactly once, during extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Date(NaiveDateTime),
}

impl CellValue {
    /// Empty cells and whitespace-only text.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::Number(_) | Self::Date(_) => false,
        }
    }

    /// Trimmed display text, `None` when empty.
    pub fn text(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        match self {
            Self::Text(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Text form for identifier and code columns. Numbers go through their
    /// integer value, so `99213.0` reads as `99213`.
    pub fn code_text(&self) -> Option<String> {
        match self {
            Self::Number(n) if n.is_finite() => Some(format!("{}", n.trunc() as i64)),
            other => other.text(),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{n:.0}")
                } else {
                    write!(f, "{n}")
                }
            }
            Self::Text(s) => write!(f, "{s}"),
            Self::Date(dt) => {
                if dt.time() == NaiveTime::MIN {
                    write!(f, "{}", dt.format("%Y-%m-%d"))
                } else {
                    write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S"))
                }
            }
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Empty => serializer.serialize_none(),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Date(_) => serializer.collect_str(self),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Self::Empty
        } else {
            Self::Text(s.to_string())
        }
    }
}

impl From<Option<&str>> for CellValue {
    fn from(s: Option<&str>) -> Self {
        s.map(Self::from).unwrap_or_default()
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// A charge amount in integer cents, rounded half-up (away from zero) from
/// whatever decimal representation it arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Amount {
    cents: i64,
}

impl Amount {
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn cents(self) -> i64 {
        self.cents
    }

    /// Parse decimal text. A leading `$` and thousands separators are
    /// accepted; anything else non-numeric yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let s = text.trim();
        let (negative, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let s = s.strip_prefix('$').unwrap_or(s);
        let s: String = s.chars().filter(|c| *c != ',').collect();

        let (whole, frac) = s.split_once('.').unwrap_or((s.as_str(), ""));
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut digits = frac.bytes().map(|b| i64::from(b - b'0'));
        let tenths = digits.next().unwrap_or(0);
        let hundredths = digits.next().unwrap_or(0);
        let round_up = digits.next().is_some_and(|d| d >= 5);

        let mut cents = whole.checked_mul(100)?.checked_add(tenths * 10 + hundredths)?;
        if round_up {
            cents = cents.checked_add(1)?;
        }
        Some(Self {
            cents: if negative { -cents } else { cents },
        })
    }

    /// Round a float through its shortest decimal representation, so
    /// `10.005` rounds to `10.01` the way the written number reads.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Self::parse(&format!("{value}"))
    }

    pub fn from_cell(cell: &CellValue) -> Option<Self> {
        match cell {
            CellValue::Number(n) => Self::from_f64(*n),
            CellValue::Text(s) => Self::parse(s),
            CellValue::Empty | CellValue::Date(_) => None,
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Expected side
// ---------------------------------------------------------------------------

/// One audited input row after extraction. Everything downstream works on
/// these typed fields, never on raw cells.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedRecord {
    pub row_number: usize,
    pub patient_id: String,
    pub patient_name: Option<String>,
    pub dob: CellValue,
    pub date_of_service: NaiveDate,
    pub claim_id: Option<String>,
    pub encounter_id: Option<String>,
    pub rendering_provider: Option<String>,
    pub referring_provider: Option<String>,
    pub service_location: Option<String>,
    pub place_of_service: Option<String>,
    pub procedure_code: Option<String>,
    pub modifiers: [Option<String>; 4],
    pub diagnosis_codes: [Option<String>; 4],
    pub units: Option<String>,
    pub charge_amount: Option<Amount>,
    pub insurance_company: Option<String>,
    pub insurance_plan: Option<String>,
    pub policy_number: Option<String>,
    /// Whether the optional columns were present in the input at all.
    pub has_service_location: bool,
    pub has_policy_number: bool,
}

impl ExpectedRecord {
    /// Identifier appended to field reasons.
    pub fn claim_label(&self) -> &str {
        self.claim_id.as_deref().unwrap_or("UNKNOWN")
    }
}

// ---------------------------------------------------------------------------
// Remote side
// ---------------------------------------------------------------------------

/// Subject profile returned by the identity lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityPayload {
    #[serde(default, deserialize_with = "lenient::text")]
    pub full_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub dob: Option<String>,
}

impl IdentityPayload {
    /// Name used to query charges: the full name, else `first last`.
    pub fn display_name(&self) -> Option<String> {
        if let Some(ref full) = self.full_name {
            return Some(full.clone());
        }
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            _ => None,
        }
    }
}

/// One charge returned by the candidate lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub encounter_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub procedure_code: Option<String>,
    #[serde(default, deserialize_with = "lenient::amount")]
    pub total_charges: Option<Amount>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub units: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub rendering_provider_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub referring_provider_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub service_location_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub place_of_service_code: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub primary_insurance_company_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub primary_insurance_plan_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub primary_insurance_company_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub primary_insurance_policy_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::text_list")]
    pub modifiers: Vec<Option<String>>,
    #[serde(default, deserialize_with = "lenient::text_list")]
    pub diagnosis_codes: Vec<Option<String>>,
}

impl CandidateRecord {
    pub fn modifier(&self, position: usize) -> Option<&str> {
        self.modifiers.get(position).and_then(|m| m.as_deref())
    }

    pub fn diagnosis_code(&self, position: usize) -> Option<&str> {
        self.diagnosis_codes.get(position).and_then(|d| d.as_deref())
    }
}

/// Remote payloads carry numbers and strings interchangeably; these
/// helpers fold both into the typed fields above.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::Amount;

    fn number_text(n: &serde_json::Number) -> String {
        if let Some(i) = n.as_i64() {
            return i.to_string();
        }
        if let Some(u) = n.as_u64() {
            return u.to_string();
        }
        match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{f:.0}"),
            _ => n.to_string(),
        }
    }

    fn to_text(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            Value::Number(n) => Some(number_text(&n)),
            other => Some(other.to_string()),
        }
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<Value>::deserialize(d)?.and_then(to_text))
    }

    pub fn text_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Option<String>>, D::Error> {
        let values = Option::<Vec<Value>>::deserialize(d)?.unwrap_or_default();
        Ok(values.into_iter().map(to_text).collect())
    }

    pub fn amount<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Amount>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => Amount::parse(&n.to_string()),
            Some(Value::String(s)) => Amount::parse(&s),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// Logical fields checked for every record, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    PatientName,
    PatientDob,
    ProcedureCode,
    ChargeAmount,
    ClaimId,
    EncounterId,
    RenderingProvider,
    ReferringProvider,
    ServiceLocation,
    PlaceOfService,
    ServiceUnits,
    InsuranceCompany,
    InsurancePlan,
    PolicyNumber,
    /// 1-based position.
    Modifier(u8),
    /// 1-based position.
    Diagnosis(u8),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PatientName => write!(f, "Patient Name"),
            Self::PatientDob => write!(f, "Patient DOB"),
            Self::ProcedureCode => write!(f, "Procedure Code"),
            Self::ChargeAmount => write!(f, "Charge Amount"),
            Self::ClaimId => write!(f, "Claim ID"),
            Self::EncounterId => write!(f, "Encounter ID"),
            Self::RenderingProvider => write!(f, "Rendering Provider"),
            Self::ReferringProvider => write!(f, "Referring Provider"),
            Self::ServiceLocation => write!(f, "Service Location"),
            Self::PlaceOfService => write!(f, "PlaceOfService Code"),
            Self::ServiceUnits => write!(f, "Service Units"),
            Self::InsuranceCompany => write!(f, "Primary Ins Company"),
            Self::InsurancePlan => write!(f, "Primary Ins Plan"),
            Self::PolicyNumber => write!(f, "Primary Ins Policy"),
            Self::Modifier(n) => write!(f, "Modifier {n}"),
            Self::Diagnosis(n) => write!(f, "ICD {n}"),
        }
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Verified,
    Mismatch,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldVerdict {
    pub field: Field,
    pub status: FieldStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FieldVerdict {
    pub fn verified(field: Field) -> Self {
        Self { field, status: FieldStatus::Verified, reason: None }
    }

    pub fn skipped(field: Field) -> Self {
        Self { field, status: FieldStatus::Skipped, reason: None }
    }

    pub fn error(field: Field, reason: impl Into<String>) -> Self {
        Self { field, status: FieldStatus::Error, reason: Some(reason.into()) }
    }

    /// Verified when `equivalent`, otherwise a mismatch carrying both values.
    pub fn compared(
        field: Field,
        equivalent: bool,
        expected: Option<&str>,
        actual: Option<&str>,
        identifier: Option<&str>,
    ) -> Self {
        if equivalent {
            return Self::verified(field);
        }
        Self {
            field,
            status: FieldStatus::Mismatch,
            reason: Some(format_mismatch(field, expected, actual, identifier)),
        }
    }
}

/// `"<field> Mismatch (Expected: '<a>', Actual: '<b>') for Claim ID <id>"`.
pub fn format_mismatch(
    field: Field,
    expected: Option<&str>,
    actual: Option<&str>,
    identifier: Option<&str>,
) -> String {
    let mut reason = format!(
        "{field} Mismatch (Expected: '{}', Actual: '{}')",
        expected.unwrap_or("NULL"),
        actual.unwrap_or("NULL"),
    );
    if let Some(id) = identifier {
        reason.push_str(&format!(" for Claim ID {id}"));
    }
    reason
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Match,
    Mismatch,
    Error,
}

impl RecordStatus {
    pub fn audit_status(self) -> AuditStatus {
        match self {
            Self::Match => AuditStatus::Verified,
            Self::Mismatch | Self::Error => AuditStatus::Invalid,
        }
    }
}

/// The coarse two-value status handed to external consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AuditStatus {
    Verified,
    Invalid,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => write!(f, "Verified"),
            Self::Invalid => write!(f, "Invalid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordVerdict {
    pub row_number: usize,
    pub status: RecordStatus,
    pub audit_result: AuditStatus,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub patient_id: Option<String>,
    pub claim_id: Option<String>,
    pub date_of_service: Option<NaiveDate>,
    pub procedure_code: Option<String>,
    pub fields: Vec<FieldVerdict>,
}

impl RecordVerdict {
    pub fn field(&self, field: Field) -> Option<&FieldVerdict> {
        self.fields.iter().find(|v| v.field == field)
    }
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditSummary {
    pub total_records: usize,
    pub verified: usize,
    pub invalid: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub errors: usize,
    pub failure_counts: BTreeMap<String, usize>,
    pub lookups: LookupStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditResult {
    pub meta: AuditMeta,
    pub summary: AuditSummary,
    pub records: Vec<RecordVerdict>,
}
