// File I/O operations

pub mod csv;
pub mod json;
pub mod xlsx;

use std::path::Path;

use chargeaudit_recon::model::AuditSummary;
use chargeaudit_recon::InputTable;

/// Spreadsheet formats, by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Tsv,
    /// Anything calamine reads: xlsx, xlsm, xlsb, xls, ods.
    Excel,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Result<Self, String> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(Self::Csv),
            "tsv" | "tab" => Ok(Self::Tsv),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(Self::Excel),
            "" => Err(format!("{}: cannot tell the file format without an extension", path.display())),
            other => Err(format!("{}: unsupported file type '.{other}'", path.display())),
        }
    }
}

/// Read the input collection. `sheet` selects a worksheet in Excel files
/// and is ignored for delimited text.
pub fn import_table(path: &Path, sheet: Option<&str>) -> Result<InputTable, String> {
    match FileFormat::from_path(path)? {
        FileFormat::Csv => crate::csv::import(path),
        FileFormat::Tsv => crate::csv::import_tsv(path),
        FileFormat::Excel => xlsx::import(path, sheet),
    }
}

/// Write an annotated table. Excel output gets a summary sheet when one
/// is given; delimited output carries the table only.
pub fn export_table(table: &InputTable, summary: Option<&AuditSummary>, path: &Path) -> Result<(), String> {
    match FileFormat::from_path(path)? {
        FileFormat::Csv => crate::csv::export(table, path),
        FileFormat::Tsv => crate::csv::export_tsv(table, path),
        FileFormat::Excel => {
            if path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("xlsx")) != Some(true) {
                return Err(format!("{}: spreadsheet export is written as .xlsx only", path.display()));
            }
            xlsx::export(table, summary, path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chargeaudit_recon::CellValue;
    use tempfile::tempdir;

    #[test]
    fn format_from_extension() {
        assert_eq!(FileFormat::from_path(Path::new("a.CSV")), Ok(FileFormat::Csv));
        assert_eq!(FileFormat::from_path(Path::new("a.tsv")), Ok(FileFormat::Tsv));
        assert_eq!(FileFormat::from_path(Path::new("a.xlsx")), Ok(FileFormat::Excel));
        assert_eq!(FileFormat::from_path(Path::new("a.ods")), Ok(FileFormat::Excel));
        assert!(FileFormat::from_path(Path::new("a.pdf")).unwrap_err().contains(".pdf"));
        assert!(FileFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn export_rejects_legacy_excel() {
        let dir = tempdir().unwrap();
        let err = export_table(&InputTable::default(), None, &dir.path().join("out.xls")).unwrap_err();
        assert!(err.contains(".xlsx"));
    }

    #[test]
    fn csv_and_xlsx_agree() {
        let dir = tempdir().unwrap();
        let table = InputTable::from_rows(
            vec!["PatientID".into(), "Reason for Invalid".into()],
            vec![vec![CellValue::from("1001"), CellValue::from("ICD 1 Mismatch")]],
        );
        let csv_path = dir.path().join("out.csv");
        let xlsx_path = dir.path().join("out.xlsx");
        export_table(&table, None, &csv_path).unwrap();
        export_table(&table, None, &xlsx_path).unwrap();

        let from_csv = import_table(&csv_path, None).unwrap();
        let from_xlsx = import_table(&xlsx_path, None).unwrap();
        assert_eq!(from_csv, from_xlsx);
    }
}
