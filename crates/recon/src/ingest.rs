//! Input rows and extraction of typed expected records.

use chrono::NaiveDate;

use crate::config::ColumnMapping;
use crate::error::{ReconError, RecordError};
use crate::model::{Amount, CellValue, ExpectedRecord};
use crate::normalize::parse_date;

/// One data row of the input, with its 1-based spreadsheet row number
/// (the header is row 1).
#[derive(Debug, Clone, PartialEq)]
pub struct InputRow {
    pub row_number: usize,
    pub cells: Vec<CellValue>,
}

impl InputRow {
    pub fn cell(&self, index: usize) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.cells.get(index).unwrap_or(&EMPTY)
    }
}

/// The whole input collection, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputTable {
    pub headers: Vec<String>,
    pub rows: Vec<InputRow>,
}

impl InputTable {
    /// Table from in-memory rows with no gaps, numbered from row 2.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, cells)| InputRow { row_number: i + 2, cells })
            .collect();
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn position(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == header)
    }

    /// Resolve every mapped column. Any missing required column fails the
    /// whole run, and the error lists all of them.
    pub fn column_index(&self, columns: &ColumnMapping) -> Result<ColumnIndex, ReconError> {
        let missing: Vec<String> = columns
            .required()
            .into_iter()
            .filter(|h| self.position(h).is_none())
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ReconError::MissingColumns { columns: missing });
        }

        let at = |header: &str| self.position(header).unwrap_or_default();
        Ok(ColumnIndex {
            patient_id: at(&columns.patient_id),
            patient_name: at(&columns.patient_name),
            dob: at(&columns.dob),
            date_of_service: at(&columns.date_of_service),
            rendering_provider: at(&columns.rendering_provider),
            referring_provider: at(&columns.referring_provider),
            place_of_service: at(&columns.place_of_service),
            procedure_code: at(&columns.procedure_code),
            modifiers: std::array::from_fn(|i| at(&columns.modifiers[i])),
            units: at(&columns.units),
            diagnosis_codes: std::array::from_fn(|i| at(&columns.diagnosis_codes[i])),
            charge_amount: at(&columns.charge_amount),
            insurance_company: at(&columns.insurance_company),
            insurance_plan: at(&columns.insurance_plan),
            encounter_id: at(&columns.encounter_id),
            claim_id: at(&columns.claim_id),
            service_location: self.position(&columns.service_location),
            policy_number: self.position(&columns.policy_number),
        })
    }
}

/// Resolved column positions for one input table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnIndex {
    pub patient_id: usize,
    pub patient_name: usize,
    pub dob: usize,
    pub date_of_service: usize,
    pub rendering_provider: usize,
    pub referring_provider: usize,
    pub place_of_service: usize,
    pub procedure_code: usize,
    pub modifiers: [usize; 4],
    pub units: usize,
    pub diagnosis_codes: [usize; 4],
    pub charge_amount: usize,
    pub insurance_company: usize,
    pub insurance_plan: usize,
    pub encounter_id: usize,
    pub claim_id: usize,
    pub service_location: Option<usize>,
    pub policy_number: Option<usize>,
}

impl ExpectedRecord {
    /// Parse one row into typed fields. Only the identity key and the date
    /// of service are mandatory.
    pub fn extract(row: &InputRow, index: &ColumnIndex) -> Result<Self, RecordError> {
        let patient_id = row
            .cell(index.patient_id)
            .code_text()
            .ok_or_else(|| RecordError::Extraction("Missing PatientID".into()))?;
        let date_of_service = extract_date_of_service(row.cell(index.date_of_service))?;

        let text = |i: usize| row.cell(i).text();
        let code = |i: usize| row.cell(i).code_text();

        Ok(Self {
            row_number: row.row_number,
            patient_id,
            patient_name: text(index.patient_name),
            dob: row.cell(index.dob).clone(),
            date_of_service,
            claim_id: code(index.claim_id),
            encounter_id: code(index.encounter_id),
            rendering_provider: text(index.rendering_provider),
            referring_provider: text(index.referring_provider),
            service_location: index.service_location.and_then(text),
            place_of_service: code(index.place_of_service),
            procedure_code: code(index.procedure_code),
            modifiers: index.modifiers.map(code),
            diagnosis_codes: index.diagnosis_codes.map(text),
            units: text(index.units),
            charge_amount: Amount::from_cell(row.cell(index.charge_amount)),
            insurance_company: text(index.insurance_company),
            insurance_plan: text(index.insurance_plan),
            policy_number: index.policy_number.and_then(code),
            has_service_location: index.service_location.is_some(),
            has_policy_number: index.policy_number.is_some(),
        })
    }
}

fn extract_date_of_service(cell: &CellValue) -> Result<NaiveDate, RecordError> {
    if cell.is_empty() {
        return Err(RecordError::Extraction("Missing DateOfService".into()));
    }
    parse_date(cell)
        .ok_or_else(|| RecordError::Extraction(format!("Invalid DateOfService format '{cell}'")))
}

/// Read delimited text with a header row. Every non-empty field becomes a
/// text cell; typing happens during extraction.
pub fn load_delimited(content: &str, delimiter: u8) -> Result<InputTable, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ReconError::Input(e.to_string()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    // Row numbers are source line numbers, so skipped blank lines still count.
    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ReconError::Input(e.to_string()))?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let row_number = record.position().map_or(i + 2, |p| p.line() as usize);
        rows.push(InputRow {
            row_number,
            cells: record.iter().map(CellValue::from).collect(),
        });
    }

    Ok(InputTable { headers, rows })
}

/// [`load_delimited`] with a comma delimiter.
pub fn load_csv_rows(csv_data: &str) -> Result<InputTable, ReconError> {
    load_delimited(csv_data, b',')
}
