// JSON export

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::Serialize;

/// Write any serializable result as pretty-printed JSON.
pub fn export<T: Serialize>(value: &T, path: &Path) -> Result<(), String> {
    let file = File::create(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value).map_err(|e| e.to_string())
}

/// Pretty-printed JSON as a string, for stdout.
pub fn to_string<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn writes_pretty_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("result.json");
        let value: BTreeMap<&str, usize> = [("total_records", 3)].into_iter().collect();

        export(&value, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"total_records\": 3"));
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["total_records"], 3);
    }
}
