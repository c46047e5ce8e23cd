// Excel import (xlsx, xls, xlsb, ods) and annotated xlsx export

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

use chargeaudit_recon::model::AuditSummary;
use chargeaudit_recon::report::summary_lines;
use chargeaudit_recon::{CellValue, InputRow, InputTable};

/// Name of the data sheet in exported workbooks.
pub const RESULTS_SHEET: &str = "Audit Results";
/// Name of the summary sheet in exported workbooks.
pub const SUMMARY_SHEET: &str = "Summary";

/// Import one sheet (the first when `sheet` is `None`). The first row is
/// the header row.
pub fn import(path: &Path, sheet: Option<&str>) -> Result<InputTable, String> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| format!("Failed to open Excel file: {}", e))?;

    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| "Excel file contains no sheets".to_string())?,
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| format!("Failed to read sheet '{}': {}", sheet_name, e))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(|c| convert_cell(c).to_string().trim().to_string()).collect(),
        None => return Ok(InputTable::default()),
    };

    // Row numbers are the sheet's own 1-based rows, so skipped blank rows still count.
    let header_row = range.start().map_or(0, |(row, _)| row as usize) + 1;
    let mut data = Vec::new();
    for (i, row) in rows.enumerate() {
        let cells: Vec<CellValue> = row.iter().map(convert_cell).collect();
        if cells.iter().all(CellValue::is_empty) {
            continue;
        }
        data.push(InputRow { row_number: header_row + i + 1, cells });
    }

    tracing::debug!(sheet = %sheet_name, rows = data.len(), "imported worksheet");
    Ok(InputTable { headers, rows: data })
}

fn convert_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::from(s.as_str()),
        Data::Float(n) => CellValue::Number(*n),
        Data::Int(n) => CellValue::Number(*n as f64),
        Data::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::Error(e) => CellValue::Text(format!("#{:?}", e)),
        Data::DateTime(dt) => serial_to_datetime(dt.as_f64())
            .map(CellValue::Date)
            .unwrap_or(CellValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::from(s.as_str()),
    }
}

/// Excel serial date (1900 system) to a timestamp, rounded to the second.
fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    // Serial 0 is 1899-12-30 once the 1900 leap-year bug is accounted for.
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.trunc() as i64;
    let seconds = (serial.fract() * 86_400.0).round() as i64;
    epoch.checked_add_signed(Duration::days(days) + Duration::seconds(seconds))
}

/// Write the annotated table as the first sheet, plus a summary sheet when given.
pub fn export(table: &InputTable, summary: Option<&AuditSummary>, path: &Path) -> Result<(), String> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();

    let worksheet = workbook
        .add_worksheet()
        .set_name(RESULTS_SHEET)
        .map_err(|e| format!("Failed to create sheet '{}': {}", RESULTS_SHEET, e))?;
    write_table(worksheet, table, &header_format).map_err(|e| format!("Failed to write results: {}", e))?;

    if let Some(summary) = summary {
        let worksheet = workbook
            .add_worksheet()
            .set_name(SUMMARY_SHEET)
            .map_err(|e| format!("Failed to create sheet '{}': {}", SUMMARY_SHEET, e))?;
        write_summary(worksheet, summary, &header_format)
            .map_err(|e| format!("Failed to write summary: {}", e))?;
    }

    workbook
        .save(path)
        .map_err(|e| format!("Failed to save XLSX file: {}", e))?;
    Ok(())
}

fn write_table(worksheet: &mut Worksheet, table: &InputTable, header_format: &Format) -> Result<(), XlsxError> {
    for (col, header) in table.headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, header, header_format)?;
    }
    for (i, row) in table.rows.iter().enumerate() {
        let row32 = (i + 1) as u32;
        for (col, cell) in row.cells.iter().enumerate() {
            let col16 = col as u16;
            match cell {
                CellValue::Empty => {}
                CellValue::Number(n) => {
                    worksheet.write_number(row32, col16, *n)?;
                }
                other => {
                    worksheet.write_string(row32, col16, other.to_string())?;
                }
            }
        }
    }
    if !table.headers.is_empty() {
        worksheet.set_freeze_panes(1, 0)?;
    }
    Ok(())
}

fn write_summary(worksheet: &mut Worksheet, summary: &AuditSummary, header_format: &Format) -> Result<(), XlsxError> {
    worksheet.write_string_with_format(0, 0, "Metric", header_format)?;
    worksheet.write_string_with_format(0, 1, "Value", header_format)?;
    for (i, (label, value)) in summary_lines(summary).into_iter().enumerate() {
        let row = (i + 1) as u32;
        worksheet.write_string(row, 0, label)?;
        match value.parse::<f64>() {
            Ok(n) => worksheet.write_number(row, 1, n)?,
            Err(_) => worksheet.write_string(row, 1, value)?,
        };
    }
    worksheet.set_column_width(0, 24)?;
    Ok(())
}
