use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, info, warn};

use crate::cache::{CandidateKey, RemoteCache};
use crate::compare::{
    compare_codes, compare_dob, compare_insurance_plan, compare_names,
    compare_place_of_service, compare_policy_numbers, compare_provider_names, compare_text,
    compare_units, Comparison,
};
use crate::config::AuditConfig;
use crate::error::{panic_message, FailureKind, ReconError, RecordError};
use crate::ingest::{ColumnIndex, InputRow, InputTable};
use crate::matcher::{find_match_where, MatchFailure};
use crate::model::{
    format_mismatch, AuditMeta, AuditResult, CandidateRecord, CellValue, ExpectedRecord, Field,
    FieldStatus, FieldVerdict, IdentityPayload, RecordStatus, RecordVerdict,
};
use crate::normalize::normalize_code;
use crate::report::compute_summary;
use crate::source::RemoteSource;

/// Reported once per record, before the record is audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// 0-based position in the input.
    pub index: usize,
    pub total: usize,
    pub row_number: usize,
}

/// Run an audit with a fresh [`Auditor`]. Returns one verdict per input row.
pub fn run<S: RemoteSource>(
    config: &AuditConfig,
    table: &InputTable,
    source: S,
) -> Result<AuditResult, ReconError> {
    Auditor::new(config, source).run(table)
}

/// One audit run: owns the remote source and the lookup cache.
///
/// `run` consumes the auditor, so cached lookups never outlive the run.
pub struct Auditor<'c, S> {
    config: &'c AuditConfig,
    source: S,
    cache: RemoteCache,
    /// Candidates already claimed, when candidate exclusivity is on.
    consumed: HashMap<CandidateKey, HashSet<usize>>,
}

impl<'c, S: RemoteSource> Auditor<'c, S> {
    pub fn new(config: &'c AuditConfig, source: S) -> Self {
        Self {
            config,
            source,
            cache: RemoteCache::default(),
            consumed: HashMap::new(),
        }
    }

    pub fn run(self, table: &InputTable) -> Result<AuditResult, ReconError> {
        self.run_with_progress(table, |_| {})
    }

    pub fn run_with_progress(
        mut self,
        table: &InputTable,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<AuditResult, ReconError> {
        self.config.validate()?;
        let index = table.column_index(&self.config.columns)?;

        let total = table.len();
        let mut records = Vec::with_capacity(total);
        for (i, row) in table.rows.iter().enumerate() {
            on_progress(Progress {
                index: i,
                total,
                row_number: row.row_number,
            });
            records.push(self.audit_row(row, &index));
        }

        let summary = compute_summary(&records, self.cache.stats());
        info!(
            records = summary.total_records,
            verified = summary.verified,
            invalid = summary.invalid,
            identity_fetches = summary.lookups.identity_fetches,
            candidate_fetches = summary.lookups.candidate_fetches,
            "audit finished"
        );

        Ok(AuditResult {
            meta: AuditMeta {
                config_name: self.config.name.clone(),
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                run_at: chrono::Utc::now().to_rfc3339(),
            },
            summary,
            records,
        })
    }

    /// Audit one row. Nothing that goes wrong here, a panic included,
    /// escapes the row.
    fn audit_row(&mut self, row: &InputRow, index: &ColumnIndex) -> RecordVerdict {
        match catch_unwind(AssertUnwindSafe(|| self.audit_record(row, index))) {
            Ok(verdict) => verdict,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(row = row.row_number, %message, "record audit panicked");
                let mut audit = RecordAudit::default();
                audit.fail(RecordError::Unexpected(message));
                audit.finish(row.row_number, None, row.cell(index.patient_id).code_text())
            }
        }
    }

    fn audit_record(&mut self, row: &InputRow, index: &ColumnIndex) -> RecordVerdict {
        let mut audit = RecordAudit::default();
        let expected = match ExpectedRecord::extract(row, index) {
            Ok(expected) => expected,
            Err(err) => {
                debug!(row = row.row_number, error = %err, "extraction failed");
                audit.fail(err);
                return audit.finish(row.row_number, None, row.cell(index.patient_id).code_text());
            }
        };

        debug!(
            row = expected.row_number,
            patient_id = %expected.patient_id,
            date_of_service = %expected.date_of_service,
            "auditing record"
        );
        if let Err(err) = self.reconcile(&expected, &mut audit) {
            audit.fail(err);
        }
        audit.finish(expected.row_number, Some(&expected), None)
    }

    /// Steps 2..6 for one extracted record. An `Err` ends the record early;
    /// field results gathered so far stay in `audit`.
    fn reconcile(&mut self, expected: &ExpectedRecord, audit: &mut RecordAudit) -> Result<(), RecordError> {
        let identity = self.resolve_identity(&expected.patient_id)?;
        let display_name = identity.display_name();

        audit.push(FieldVerdict::compared(
            Field::PatientName,
            compare_names(expected.patient_name.as_deref(), display_name.as_deref()),
            expected.patient_name.as_deref(),
            display_name.as_deref(),
            None,
        ));
        let expected_dob = expected.dob.text();
        audit.push(FieldVerdict::compared(
            Field::PatientDob,
            compare_dob(&expected.dob, &CellValue::from(identity.dob.as_deref())),
            expected_dob.as_deref(),
            identity.dob.as_deref(),
            None,
        ));

        let display_name = display_name.ok_or_else(|| RecordError::IdentityIncomplete {
            patient_id: expected.patient_id.clone(),
        })?;

        let key: CandidateKey = (display_name, expected.date_of_service);
        let candidate = match self.select_candidate(expected, key) {
            Ok(candidate) => candidate,
            Err(err) => {
                if let RecordError::NoMatch { failure, .. } = &err {
                    audit.note_unmatched(failure);
                }
                return Err(err);
            }
        };
        audit.push(FieldVerdict::verified(Field::ProcedureCode));
        audit.push(FieldVerdict::verified(Field::ChargeAmount));

        self.reconcile_fields(expected, &candidate, audit);
        Ok(())
    }

    fn resolve_identity(&mut self, patient_id: &str) -> Result<IdentityPayload, RecordError> {
        let source = &mut self.source;
        let outcome = self.cache.identities.get_or_fetch(patient_id.to_string(), || {
            debug!(patient_id, "fetching identity");
            let fetched = source.fetch_identity(patient_id);
            if let Err(ref e) = fetched {
                warn!(patient_id, error = %e, "identity fetch failed");
            }
            fetched
        });

        match outcome {
            Ok(Some(payload)) => Ok(payload.clone()),
            Ok(None) => Err(RecordError::IdentityMissing {
                patient_id: patient_id.to_string(),
            }),
            Err(e) if e.panicked => Err(RecordError::Unexpected(e.message.clone())),
            Err(e) => Err(RecordError::IdentityFetch(e.clone())),
        }
    }

    /// Fetch (or recall) the candidates for `key` and pick the match.
    fn select_candidate(
        &mut self,
        expected: &ExpectedRecord,
        key: CandidateKey,
    ) -> Result<CandidateRecord, RecordError> {
        let source = &mut self.source;
        let (name, date) = (key.0.as_str(), key.1);
        let outcome = self.cache.candidates.get_or_fetch(key.clone(), || {
            debug!(display_name = name, %date, "fetching candidates");
            let fetched = source.fetch_candidates(name, date);
            if let Err(ref e) = fetched {
                warn!(display_name = name, %date, error = %e, "candidate fetch failed");
            }
            fetched
        });

        let candidates = match outcome {
            Ok(candidates) => candidates,
            Err(e) if e.panicked => return Err(RecordError::Unexpected(e.message.clone())),
            Err(e) => return Err(RecordError::CandidateFetch(e.clone())),
        };
        if candidates.is_empty() {
            return Err(RecordError::NoCandidate {
                display_name: key.0.clone(),
                service_date: key.1.to_string(),
            });
        }

        let exclusive = self.config.compare.exclusive_candidates;
        let taken = self.consumed.get(&key);
        let available = |i: usize| !exclusive || taken.map_or(true, |t| !t.contains(&i));

        let chosen = find_match_where(expected, candidates, available).map_err(|failure| {
            RecordError::NoMatch {
                failure,
                claim_id: expected.claim_label().to_string(),
            }
        })?;
        debug!(row = expected.row_number, candidate = chosen, "candidate matched");

        let candidate = candidates[chosen].clone();
        if exclusive {
            self.consumed.entry(key).or_default().insert(chosen);
        }
        Ok(candidate)
    }

    /// Step 6: every remaining field, in report order.
    fn reconcile_fields(&self, expected: &ExpectedRecord, candidate: &CandidateRecord, audit: &mut RecordAudit) {
        let id = Some(expected.claim_label());
        let check = |field: Field, equivalent: bool, e: Option<&str>, a: Option<&str>| {
            FieldVerdict::compared(field, equivalent, e, a, id)
        };

        let (e, a) = (expected.claim_id.as_deref(), candidate.id.as_deref());
        audit.push(check(Field::ClaimId, compare_codes(e, a), e, a));

        let (e, a) = (expected.encounter_id.as_deref(), candidate.encounter_id.as_deref());
        audit.push(check(Field::EncounterId, compare_codes(e, a), e, a));

        let (e, a) = (
            expected.rendering_provider.as_deref(),
            candidate.rendering_provider_name.as_deref(),
        );
        audit.push(check(Field::RenderingProvider, compare_provider_names(e, a), e, a));

        // An absent expected referring provider is only wrong when the
        // remote side names one.
        let (e, a) = (
            expected.referring_provider.as_deref(),
            candidate.referring_provider_name.as_deref(),
        );
        audit.push(match (e, a) {
            (Some(_), _) => check(Field::ReferringProvider, compare_provider_names(e, a), e, a),
            (None, Some(_)) => check(Field::ReferringProvider, false, e, a),
            (None, None) => FieldVerdict::skipped(Field::ReferringProvider),
        });

        if expected.has_service_location {
            let (e, a) = (
                expected.service_location.as_deref(),
                candidate.service_location_name.as_deref(),
            );
            audit.push(check(Field::ServiceLocation, compare_text(e, a), e, a));
        } else {
            audit.push(FieldVerdict::skipped(Field::ServiceLocation));
        }

        let (e, a) = (
            expected.place_of_service.as_deref(),
            candidate.place_of_service_code.as_deref(),
        );
        audit.push(check(Field::PlaceOfService, compare_place_of_service(e, a), e, a));

        let (e, a) = (expected.units.as_deref(), candidate.units.as_deref());
        audit.push(match compare_units(e, a) {
            Comparison::Equivalent => FieldVerdict::verified(Field::ServiceUnits),
            Comparison::Different => check(Field::ServiceUnits, false, e, a),
            Comparison::Invalid(msg) => FieldVerdict::error(
                Field::ServiceUnits,
                format!("Unit Comparison Error for Claim ID {}: {msg}", expected.claim_label()),
            ),
        });

        let (e, a) = (
            expected.insurance_company.as_deref(),
            candidate.primary_insurance_company_name.as_deref(),
        );
        audit.push(check(Field::InsuranceCompany, compare_text(e, a), e, a));

        let (e, a) = (
            expected.insurance_plan.as_deref(),
            candidate.primary_insurance_plan_name.as_deref(),
        );
        let plan = compare_insurance_plan(
            e,
            a,
            candidate.primary_insurance_company_id.as_deref(),
            self.config.compare.insurance_plan,
        );
        audit.push(match plan {
            Comparison::Equivalent => FieldVerdict::verified(Field::InsurancePlan),
            Comparison::Different => check(Field::InsurancePlan, false, e, a),
            Comparison::Invalid(msg) => FieldVerdict::error(
                Field::InsurancePlan,
                format!("{} {msg} for Claim ID {}", Field::InsurancePlan, expected.claim_label()),
            ),
        });

        if expected.has_policy_number {
            let (e, a) = (
                expected.policy_number.as_deref(),
                candidate.primary_insurance_policy_number.as_deref(),
            );
            audit.push(check(Field::PolicyNumber, compare_policy_numbers(e, a), e, a));
        } else {
            audit.push(FieldVerdict::skipped(Field::PolicyNumber));
        }

        for (i, e) in expected.modifiers.iter().enumerate() {
            let field = Field::Modifier(i as u8 + 1);
            audit.push(positional(field, e.as_deref(), candidate.modifier(i), id));
        }
        for (i, e) in expected.diagnosis_codes.iter().enumerate() {
            let field = Field::Diagnosis(i as u8 + 1);
            audit.push(positional(field, e.as_deref(), candidate.diagnosis_code(i), id));
        }
    }
}

/// Positional code check: both empty after normalization is skipped.
fn positional(field: Field, e: Option<&str>, a: Option<&str>, id: Option<&str>) -> FieldVerdict {
    let both_empty = normalize_code(e.unwrap_or_default()).is_empty()
        && normalize_code(a.unwrap_or_default()).is_empty();
    if both_empty {
        return FieldVerdict::skipped(field);
    }
    FieldVerdict::compared(field, compare_codes(e, a), e, a, id)
}

/// Accumulates one record's outcome. Starts as a match and only ever
/// degrades: Match → Mismatch → Error.
struct RecordAudit {
    status: RecordStatus,
    reasons: Vec<String>,
    fields: Vec<FieldVerdict>,
    failure: Option<FailureKind>,
}

impl Default for RecordAudit {
    fn default() -> Self {
        Self {
            status: RecordStatus::Match,
            reasons: Vec::new(),
            fields: Vec::new(),
            failure: None,
        }
    }
}

impl RecordAudit {
    fn degrade(&mut self, to: RecordStatus) {
        if self.status != RecordStatus::Error {
            self.status = to;
        }
    }

    fn push(&mut self, verdict: FieldVerdict) {
        if matches!(verdict.status, FieldStatus::Mismatch | FieldStatus::Error) {
            if let Some(ref reason) = verdict.reason {
                self.reasons.push(reason.clone());
            }
            self.degrade(RecordStatus::Mismatch);
            self.failure.get_or_insert(FailureKind::FieldMismatch);
        }
        self.fields.push(verdict);
    }

    /// Field entries for the matcher tier that failed. The record reason
    /// comes from the `NoMatch` error itself, so nothing is added to it here.
    fn note_unmatched(&mut self, failure: &MatchFailure) {
        let (code, amount) = match failure {
            MatchFailure::ProcedureNotFound { procedure_code } => (
                FieldVerdict {
                    field: Field::ProcedureCode,
                    status: FieldStatus::Mismatch,
                    reason: Some(format_mismatch(Field::ProcedureCode, procedure_code.as_deref(), None, None)),
                },
                FieldVerdict::skipped(Field::ChargeAmount),
            ),
            MatchFailure::AmountMismatch { expected, first_candidate } => {
                let (e, a) = (expected.map(|x| x.to_string()), first_candidate.map(|x| x.to_string()));
                (
                    FieldVerdict::verified(Field::ProcedureCode),
                    FieldVerdict {
                        field: Field::ChargeAmount,
                        status: FieldStatus::Mismatch,
                        reason: Some(format_mismatch(Field::ChargeAmount, e.as_deref(), a.as_deref(), None)),
                    },
                )
            }
        };
        self.fields.push(code);
        self.fields.push(amount);
    }

    fn fail(&mut self, err: RecordError) {
        self.reasons.push(err.to_string());
        if err.is_fatal() {
            self.status = RecordStatus::Error;
            self.failure = Some(err.kind());
        } else {
            self.degrade(RecordStatus::Mismatch);
            if !matches!(self.failure, Some(k) if k != FailureKind::FieldMismatch) {
                self.failure = Some(err.kind());
            }
        }
    }

    fn finish(
        self,
        row_number: usize,
        expected: Option<&ExpectedRecord>,
        raw_patient_id: Option<String>,
    ) -> RecordVerdict {
        let reason = match self.status {
            RecordStatus::Match => "Verified".to_string(),
            RecordStatus::Error if self.reasons.is_empty() => "Unknown processing error occurred.".to_string(),
            _ => self.reasons.join("; "),
        };
        RecordVerdict {
            row_number,
            status: self.status,
            audit_result: self.status.audit_status(),
            reason,
            failure: self.failure,
            patient_id: expected.map(|e| e.patient_id.clone()).or(raw_patient_id),
            claim_id: expected.and_then(|e| e.claim_id.clone()),
            date_of_service: expected.map(|e| e.date_of_service),
            procedure_code: expected.and_then(|e| e.procedure_code.clone()),
            fields: self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnMapping;
    use crate::error::FetchError;
    use crate::model::{Amount, AuditStatus};
    use crate::source::SnapshotSource;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
    }

    /// Build a table with the default headers. Each row lists only the
    /// interesting columns; everything else is empty.
    fn table(rows: &[Vec<(&str, &str)>]) -> InputTable {
        let headers: Vec<String> = ColumnMapping::default()
            .required()
            .into_iter()
            .map(String::from)
            .collect();
        let rows = rows
            .iter()
            .map(|cells| {
                headers
                    .iter()
                    .map(|h| {
                        let v = cells.iter().find(|(k, _)| k == h).map(|(_, v)| *v);
                        CellValue::from(v)
                    })
                    .collect()
            })
            .collect();
        InputTable::from_rows(headers, rows)
    }

    fn jane_row(patient_id: &'static str, amount: &'static str) -> Vec<(&'static str, &'static str)> {
        vec![
            ("PatientID", patient_id),
            ("PatientName", "Doe, Jane"),
            ("DOB", "02/29/1980"),
            ("DateOfService", "01/05/2024"),
            ("RenderingProvider", "Alan Smith MD"),
            ("PlaceOfServiceCode", "Office"),
            ("ProcedureCode", "99213"),
            ("ProcedureModifier1", "25"),
            ("ServiceUnitCount", "1"),
            ("EncounterDiagnosisID1", "E11.9"),
            ("ServiceChargeAmount", amount),
            ("PriIns_CompanyName", "Acme"),
            ("PriIns_CompanyPlanName", "Acme PPO"),
            ("EncounterID", "77"),
            ("claimID", "5501"),
        ]
    }

    fn jane() -> IdentityPayload {
        IdentityPayload {
            full_name: Some("Jane Doe".into()),
            dob: Some("1980-02-29".into()),
            ..Default::default()
        }
    }

    fn charge(id: &str, amount: &str) -> CandidateRecord {
        CandidateRecord {
            id: Some(id.into()),
            encounter_id: Some("77".into()),
            procedure_code: Some("99213".into()),
            total_charges: Amount::parse(amount),
            units: Some("1".into()),
            rendering_provider_name: Some("Smith, Alan".into()),
            place_of_service_code: Some("11".into()),
            primary_insurance_company_name: Some("ACME".into()),
            primary_insurance_plan_name: Some("acme ppo".into()),
            modifiers: vec![Some("25".into())],
            diagnosis_codes: vec![Some("E119".into())],
            ..Default::default()
        }
    }

    fn source() -> SnapshotSource {
        SnapshotSource::default()
            .with_patient("1001", jane())
            .with_charges("Jane Doe", day(), vec![charge("5500", "50"), charge("5501", "75")])
    }

    /// Counts calls and fails on demand.
    #[derive(Default)]
    struct Scripted {
        inner: SnapshotSource,
        identity_calls: usize,
        candidate_calls: usize,
        identity_error: bool,
        panic_on_identity: bool,
        panic_on_candidates: bool,
    }

    impl RemoteSource for Scripted {
        fn fetch_identity(&mut self, key: &str) -> Result<Option<IdentityPayload>, FetchError> {
            self.identity_calls += 1;
            if self.identity_error {
                return Err(FetchError::new("service unavailable"));
            }
            if self.panic_on_identity {
                panic!("session expired");
            }
            self.inner.fetch_identity(key)
        }

        fn fetch_candidates(
            &mut self,
            name: &str,
            date: NaiveDate,
        ) -> Result<Vec<CandidateRecord>, FetchError> {
            self.candidate_calls += 1;
            if self.panic_on_candidates {
                panic!("malformed response");
            }
            self.inner.fetch_candidates(name, date)
        }
    }

    fn scripted() -> Scripted {
        Scripted {
            inner: source(),
            ..Default::default()
        }
    }

    #[test]
    fn clean_record_verifies() {
        let config = AuditConfig::default();
        let result = run(&config, &table(&[jane_row("1001", "75.00")]), source()).unwrap();
        let v = &result.records[0];
        assert_eq!(v.status, RecordStatus::Match, "{}", v.reason);
        assert_eq!(v.audit_result, AuditStatus::Verified);
        assert_eq!(v.reason, "Verified");
        assert_eq!(v.failure, None);
        assert_eq!(v.field(Field::ServiceLocation).unwrap().status, FieldStatus::Skipped);
        assert_eq!(v.field(Field::Modifier(2)).unwrap().status, FieldStatus::Skipped);
        assert_eq!(v.field(Field::Diagnosis(1)).unwrap().status, FieldStatus::Verified);
    }

    #[test]
    fn identity_error_skips_candidate_fetch() {
        let mut src = Scripted {
            identity_error: true,
            ..scripted()
        };
        let config = AuditConfig::default();
        let result = run(&config, &table(&[jane_row("1001", "75")]), &mut src).unwrap();
        let v = &result.records[0];
        assert_eq!(v.status, RecordStatus::Error);
        assert_eq!(v.audit_result, AuditStatus::Invalid);
        assert_eq!(v.reason, "Patient Fetch Error: service unavailable");
        assert_eq!(v.failure, Some(FailureKind::RemoteFetch));
        assert_eq!(src.candidate_calls, 0);
    }

    #[test]
    fn shared_identity_fetched_once() {
        let mut src = scripted();
        let config = AuditConfig::default();
        let rows = table(&[jane_row("1001", "75"), jane_row("1001", "50")]);
        let result = run(&config, &rows, &mut src).unwrap();
        assert_eq!(src.identity_calls, 1);
        assert_eq!(src.candidate_calls, 1);
        assert_eq!(result.summary.lookups.identity_cache_hits, 1);
        assert_eq!(result.summary.lookups.candidate_cache_hits, 1);
    }

    #[test]
    fn failed_identity_fetch_is_not_retried() {
        let mut src = Scripted {
            identity_error: true,
            ..scripted()
        };
        let config = AuditConfig::default();
        let rows = table(&[jane_row("1001", "75"), jane_row("1001", "75")]);
        run(&config, &rows, &mut src).unwrap();
        assert_eq!(src.identity_calls, 1);
    }

    #[test]
    fn runs_are_deterministic() {
        let config = AuditConfig::default();
        let rows = table(&[jane_row("1001", "75"), jane_row("1001", "80"), jane_row("9", "1")]);
        let a = run(&config, &rows, source()).unwrap();
        let b = run(&config, &rows, source()).unwrap();
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn name_mismatch_still_checks_charges() {
        let mut row = jane_row("1001", "75");
        row[1] = ("PatientName", "Doe, John");
        let mut src = scripted();
        let config = AuditConfig::default();
        let result = run(&config, &table(&[row]), &mut src).unwrap();
        let v = &result.records[0];
        assert_eq!(src.candidate_calls, 1);
        assert_eq!(v.status, RecordStatus::Mismatch);
        assert_eq!(v.reason, "Patient Name Mismatch (Expected: 'Doe, John', Actual: 'Jane Doe')");
        assert_eq!(v.field(Field::ClaimId).unwrap().status, FieldStatus::Verified);
    }

    #[test]
    fn unknown_patient_is_error() {
        let config = AuditConfig::default();
        let result = run(&config, &table(&[jane_row("42", "75")]), source()).unwrap();
        let v = &result.records[0];
        assert_eq!(v.status, RecordStatus::Error);
        assert_eq!(v.reason, "No valid patient data for ID 42.");
    }

    #[test]
    fn no_candidates_is_mismatch() {
        let src = SnapshotSource::default().with_patient("1001", jane());
        let config = AuditConfig::default();
        let result = run(&config, &table(&[jane_row("1001", "75")]), src).unwrap();
        let v = &result.records[0];
        assert_eq!(v.status, RecordStatus::Mismatch);
        assert_eq!(v.failure, Some(FailureKind::NoCandidate));
        assert!(v.reason.starts_with("No matching charge found"));
    }

    #[test]
    fn amount_mismatch_names_claim() {
        let config = AuditConfig::default();
        let result = run(&config, &table(&[jane_row("1001", "99")]), source()).unwrap();
        let v = &result.records[0];
        assert_eq!(v.status, RecordStatus::Mismatch);
        assert_eq!(v.failure, Some(FailureKind::NoMatch));
        assert_eq!(
            v.reason,
            "No matching charge found: Charge Amount Mismatch (Expected: '99.00', Actual: '50.00') for Claim ID 5501"
        );
        assert_eq!(v.field(Field::ProcedureCode).unwrap().status, FieldStatus::Verified);
        let amount = v.field(Field::ChargeAmount).unwrap();
        assert_eq!(amount.status, FieldStatus::Mismatch);
        assert_eq!(
            amount.reason.as_deref(),
            Some("Charge Amount Mismatch (Expected: '99.00', Actual: '50.00')")
        );
        assert!(v.field(Field::ClaimId).is_none());
    }

    #[test]
    fn referring_provider_is_asymmetric() {
        let mut c = charge("5501", "75");
        c.referring_provider_name = Some("Dr Who".into());
        let src = SnapshotSource::default()
            .with_patient("1001", jane())
            .with_charges("Jane Doe", day(), vec![c]);
        let config = AuditConfig::default();
        let result = run(&config, &table(&[jane_row("1001", "75")]), src).unwrap();
        let v = &result.records[0];
        let referring = v.field(Field::ReferringProvider).unwrap();
        assert_eq!(referring.status, FieldStatus::Mismatch);
        assert_eq!(
            referring.reason.as_deref(),
            Some("Referring Provider Mismatch (Expected: 'NULL', Actual: 'Dr Who') for Claim ID 5501")
        );
    }

    #[test]
    fn extraction_error_never_fetches() {
        let mut row = jane_row("1001", "75");
        row[3] = ("DateOfService", "someday");
        let mut src = scripted();
        let config = AuditConfig::default();
        let result = run(&config, &table(&[row]), &mut src).unwrap();
        let v = &result.records[0];
        assert_eq!(v.status, RecordStatus::Error);
        assert_eq!(v.failure, Some(FailureKind::Extraction));
        assert_eq!(v.patient_id.as_deref(), Some("1001"));
        assert_eq!(src.identity_calls, 0);
    }

    #[test]
    fn panic_is_contained_to_its_record() {
        let mut src = Scripted {
            panic_on_candidates: true,
            ..scripted()
        };
        let config = AuditConfig::default();
        let rows = table(&[jane_row("1001", "75"), jane_row("42", "75")]);
        let result = run(&config, &rows, &mut src).unwrap();
        assert_eq!(result.records.len(), 2);
        let v = &result.records[0];
        assert_eq!(v.status, RecordStatus::Error);
        assert_eq!(v.failure, Some(FailureKind::Unexpected));
        assert_eq!(v.reason, "Unexpected error: malformed response");
        assert_eq!(result.records[1].reason, "No valid patient data for ID 42.");
    }

    #[test]
    fn panicking_identity_lookup_is_not_retried() {
        let mut src = Scripted {
            panic_on_identity: true,
            ..scripted()
        };
        let config = AuditConfig::default();
        let rows = table(&[jane_row("1001", "75"), jane_row("1001", "50")]);
        let result = run(&config, &rows, &mut src).unwrap();
        assert_eq!(src.identity_calls, 1);
        assert_eq!(result.summary.lookups.identity_fetches, 1);
        assert_eq!(result.summary.lookups.identity_cache_hits, 1);
        for v in &result.records {
            assert_eq!(v.status, RecordStatus::Error);
            assert_eq!(v.failure, Some(FailureKind::Unexpected));
            assert_eq!(v.reason, "Unexpected error: session expired");
        }
    }

    #[test]
    fn unmatched_procedure_code_is_a_field_mismatch() {
        let mut row = jane_row("1001", "75");
        row[6] = ("ProcedureCode", "99215");
        let config = AuditConfig::default();
        let result = run(&config, &table(&[row]), source()).unwrap();
        let v = &result.records[0];
        assert_eq!(v.failure, Some(FailureKind::NoMatch));
        let code = v.field(Field::ProcedureCode).unwrap();
        assert_eq!(code.status, FieldStatus::Mismatch);
        assert_eq!(
            code.reason.as_deref(),
            Some("Procedure Code Mismatch (Expected: '99215', Actual: 'NULL')")
        );
        assert_eq!(v.field(Field::ChargeAmount).unwrap().status, FieldStatus::Skipped);
        assert_eq!(
            v.reason,
            "No matching charge found: procedure code not found ('99215') for Claim ID 5501"
        );
    }

    #[test]
    fn exclusive_candidates_are_consumed() {
        let mut config = AuditConfig::default();
        let rows = table(&[jane_row("1001", "75"), jane_row("1001", "75")]);

        let shared = run(&config, &rows, source()).unwrap();
        assert!(shared.records.iter().all(|r| r.status == RecordStatus::Match));

        config.compare.exclusive_candidates = true;
        let exclusive = run(&config, &rows, source()).unwrap();
        assert_eq!(exclusive.records[0].status, RecordStatus::Match);
        assert_eq!(exclusive.records[1].failure, Some(FailureKind::NoMatch));
    }

    #[test]
    fn unit_error_is_field_error() {
        let mut row = jane_row("1001", "75");
        row[8] = ("ServiceUnitCount", "one");
        let config = AuditConfig::default();
        let result = run(&config, &table(&[row]), source()).unwrap();
        let v = &result.records[0];
        assert_eq!(v.status, RecordStatus::Mismatch);
        assert_eq!(v.field(Field::ServiceUnits).unwrap().status, FieldStatus::Error);
        assert!(v.reason.starts_with("Unit Comparison Error for Claim ID 5501"));
    }

    #[test]
    fn progress_reports_every_row() {
        let config = AuditConfig::default();
        let rows = table(&[jane_row("1001", "75"), jane_row("1001", "50")]);
        let mut seen = Vec::new();
        Auditor::new(&config, source())
            .run_with_progress(&rows, |p| seen.push(p))
            .unwrap();
        assert_eq!(
            seen,
            vec![
                Progress { index: 0, total: 2, row_number: 2 },
                Progress { index: 1, total: 2, row_number: 3 },
            ]
        );
    }

    #[test]
    fn missing_column_aborts_run() {
        let t = InputTable::from_rows(vec!["PatientID".into()], vec![vec![CellValue::from("1")]]);
        let err = run(&AuditConfig::default(), &t, source()).unwrap_err();
        assert!(matches!(err, ReconError::MissingColumns { .. }));
    }
}
