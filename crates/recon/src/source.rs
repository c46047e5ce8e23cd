//! The remote system, as the audit sees it: two lookups.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{FetchError, ReconError};
use crate::model::{CandidateRecord, IdentityPayload};

/// Lookups the audit issues against the practice-management system.
///
/// Implementations may block; the engine calls them sequentially, in input
/// order, and never more than once per distinct key in a run.
pub trait RemoteSource {
    /// Subject profile for an identity key. `Ok(None)` means the remote side
    /// answered but has no such subject.
    fn fetch_identity(&mut self, identity_key: &str) -> Result<Option<IdentityPayload>, FetchError>;

    /// Charges recorded for a display name on a date of service.
    fn fetch_candidates(
        &mut self,
        display_name: &str,
        service_date: NaiveDate,
    ) -> Result<Vec<CandidateRecord>, FetchError>;
}

impl<S: RemoteSource + ?Sized> RemoteSource for &mut S {
    fn fetch_identity(&mut self, identity_key: &str) -> Result<Option<IdentityPayload>, FetchError> {
        (**self).fetch_identity(identity_key)
    }

    fn fetch_candidates(
        &mut self,
        display_name: &str,
        service_date: NaiveDate,
    ) -> Result<Vec<CandidateRecord>, FetchError> {
        (**self).fetch_candidates(display_name, service_date)
    }
}

/// One recorded candidate response.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotCharges {
    pub patient_name: String,
    pub service_date: NaiveDate,
    #[serde(default)]
    pub records: Vec<CandidateRecord>,
}

/// One recorded candidate failure.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotChargeError {
    pub patient_name: String,
    pub service_date: NaiveDate,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    patients: HashMap<String, IdentityPayload>,
    #[serde(default)]
    patient_errors: HashMap<String, String>,
    #[serde(default)]
    charges: Vec<SnapshotCharges>,
    #[serde(default)]
    charge_errors: Vec<SnapshotChargeError>,
}

/// A recorded copy of remote responses, replayed from JSON.
///
/// Unknown identity keys answer "no such subject"; unknown (name, date)
/// pairs answer with no charges. Names are matched exactly as recorded.
#[derive(Debug, Default)]
pub struct SnapshotSource {
    patients: HashMap<String, IdentityPayload>,
    patient_errors: HashMap<String, String>,
    charges: HashMap<(String, NaiveDate), Vec<CandidateRecord>>,
    charge_errors: HashMap<(String, NaiveDate), String>,
}

impl SnapshotSource {
    pub fn from_json(json: &str) -> Result<Self, ReconError> {
        let file: SnapshotFile =
            serde_json::from_str(json).map_err(|e| ReconError::Input(format!("snapshot: {e}")))?;

        let mut charges: HashMap<(String, NaiveDate), Vec<CandidateRecord>> = HashMap::new();
        for entry in file.charges {
            charges
                .entry((entry.patient_name, entry.service_date))
                .or_default()
                .extend(entry.records);
        }

        let charge_errors = file
            .charge_errors
            .into_iter()
            .map(|e| ((e.patient_name, e.service_date), e.message))
            .collect();

        Ok(Self {
            patients: file.patients,
            patient_errors: file.patient_errors,
            charges,
            charge_errors,
        })
    }

    pub fn with_patient(mut self, identity_key: &str, payload: IdentityPayload) -> Self {
        self.patients.insert(identity_key.to_string(), payload);
        self
    }

    pub fn with_charges(mut self, display_name: &str, service_date: NaiveDate, records: Vec<CandidateRecord>) -> Self {
        self.charges
            .entry((display_name.to_string(), service_date))
            .or_default()
            .extend(records);
        self
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }

    pub fn charge_query_count(&self) -> usize {
        self.charges.len()
    }
}

impl RemoteSource for SnapshotSource {
    fn fetch_identity(&mut self, identity_key: &str) -> Result<Option<IdentityPayload>, FetchError> {
        if let Some(message) = self.patient_errors.get(identity_key) {
            return Err(FetchError::new(message.clone()));
        }
        Ok(self.patients.get(identity_key).cloned())
    }

    fn fetch_candidates(
        &mut self,
        display_name: &str,
        service_date: NaiveDate,
    ) -> Result<Vec<CandidateRecord>, FetchError> {
        let key = (display_name.to_string(), service_date);
        if let Some(message) = self.charge_errors.get(&key) {
            return Err(FetchError::new(message.clone()));
        }
        Ok(self.charges.get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "patients": {
            "1001": { "full_name": "Jane Doe", "dob": "1980-02-29" }
        },
        "patient_errors": { "1002": "API Error (GetPatient): locked" },
        "charges": [
            {
                "patient_name": "Jane Doe",
                "service_date": "2024-01-05",
                "records": [ { "id": 1, "procedure_code": "99213", "total_charges": 75 } ]
            }
        ],
        "charge_errors": [
            { "patient_name": "Jane Doe", "service_date": "2024-01-06", "message": "timeout" }
        ]
    }"#;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn replays_identities() {
        let mut src = SnapshotSource::from_json(SNAPSHOT).unwrap();
        let p = src.fetch_identity("1001").unwrap().unwrap();
        assert_eq!(p.display_name().as_deref(), Some("Jane Doe"));
        assert_eq!(src.fetch_identity("9999").unwrap(), None);
        assert_eq!(
            src.fetch_identity("1002").unwrap_err().to_string(),
            "API Error (GetPatient): locked"
        );
    }

    #[test]
    fn replays_charges() {
        let mut src = SnapshotSource::from_json(SNAPSHOT).unwrap();
        let found = src.fetch_candidates("Jane Doe", day(5)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].procedure_code.as_deref(), Some("99213"));
        assert!(src.fetch_candidates("Jane Doe", day(7)).unwrap().is_empty());
        assert!(src.fetch_candidates("Jane Doe", day(6)).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = SnapshotSource::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ReconError::Input(_)));
    }

    #[test]
    fn builders_add_entries() {
        let src = SnapshotSource::default()
            .with_patient("1", IdentityPayload::default())
            .with_charges("A B", day(1), vec![CandidateRecord::default()]);
        assert_eq!(src.patient_count(), 1);
        assert_eq!(src.charge_query_count(), 1);
    }
}
