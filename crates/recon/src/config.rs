use std::collections::HashSet;

use serde::Deserialize;

use crate::compare::InsurancePlanPolicy;
use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// An audit configuration. Every section is optional; an empty document
/// is the default audit.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub name: String,
    pub compare: CompareConfig,
    pub columns: ColumnMapping,
    pub output: OutputConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            name: "Charge audit".into(),
            compare: CompareConfig::default(),
            columns: ColumnMapping::default(),
            output: OutputConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison policies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    pub insurance_plan: InsurancePlanPolicy,
    /// When set, a candidate matched by one record is invisible to later
    /// records in the same run.
    pub exclusive_candidates: bool,
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

/// Input header names for each logical field.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub patient_id: String,
    pub patient_name: String,
    pub dob: String,
    pub date_of_service: String,
    pub rendering_provider: String,
    pub referring_provider: String,
    pub place_of_service: String,
    pub procedure_code: String,
    pub modifiers: [String; 4],
    pub units: String,
    pub diagnosis_codes: [String; 4],
    pub charge_amount: String,
    pub insurance_company: String,
    pub insurance_plan: String,
    pub encounter_id: String,
    pub claim_id: String,
    /// Optional: when the input lacks this column the field is skipped.
    pub service_location: String,
    /// Optional: when the input lacks this column the field is skipped.
    pub policy_number: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            patient_id: "PatientID".into(),
            patient_name: "PatientName".into(),
            dob: "DOB".into(),
            date_of_service: "DateOfService".into(),
            rendering_provider: "RenderingProvider".into(),
            referring_provider: "ReferringProvider".into(),
            place_of_service: "PlaceOfServiceCode".into(),
            procedure_code: "ProcedureCode".into(),
            modifiers: std::array::from_fn(|i| format!("ProcedureModifier{}", i + 1)),
            units: "ServiceUnitCount".into(),
            diagnosis_codes: std::array::from_fn(|i| format!("EncounterDiagnosisID{}", i + 1)),
            charge_amount: "ServiceChargeAmount".into(),
            insurance_company: "PriIns_CompanyName".into(),
            insurance_plan: "PriIns_CompanyPlanName".into(),
            encounter_id: "EncounterID".into(),
            claim_id: "claimID".into(),
            service_location: "ServiceLocationName".into(),
            policy_number: "PriIns_PolicyNumber".into(),
        }
    }
}

impl ColumnMapping {
    /// Headers the input must contain, in report order.
    pub fn required(&self) -> Vec<&str> {
        let mut cols = vec![
            self.patient_id.as_str(),
            self.patient_name.as_str(),
            self.dob.as_str(),
            self.date_of_service.as_str(),
            self.rendering_provider.as_str(),
            self.referring_provider.as_str(),
            self.place_of_service.as_str(),
            self.procedure_code.as_str(),
        ];
        cols.extend(self.modifiers.iter().map(String::as_str));
        cols.push(self.units.as_str());
        cols.extend(self.diagnosis_codes.iter().map(String::as_str));
        cols.extend([
            self.charge_amount.as_str(),
            self.insurance_company.as_str(),
            self.insurance_plan.as_str(),
            self.encounter_id.as_str(),
            self.claim_id.as_str(),
        ]);
        cols
    }

    pub fn optional(&self) -> [&str; 2] {
        [self.service_location.as_str(), self.policy_number.as_str()]
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Default path for the JSON result.
    pub json: Option<String>,
    /// Default path for the annotated spreadsheet export.
    pub export: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl AuditConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: AuditConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.name.trim().is_empty() {
            return Err(ReconError::ConfigValidation("name must not be empty".into()));
        }

        let mut seen = HashSet::new();
        let all = self.columns.required().into_iter().chain(self.columns.optional());
        for header in all {
            if header.trim().is_empty() {
                return Err(ReconError::ConfigValidation(
                    "column names must not be empty".into(),
                ));
            }
            if !seen.insert(header) {
                return Err(ReconError::ConfigValidation(format!(
                    "column '{header}' is mapped to more than one field"
                )));
            }
        }

        Ok(())
    }
}
