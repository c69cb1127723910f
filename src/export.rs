//! Tabular export of the applicants produced by a run.
//!
//! Output is UTF-8 with BOM so spreadsheet tools pick the right encoding.

use std::io::Write;
use std::path::Path;

use crate::error::{IntakeError, Result};
use crate::models::{ApplicantRecord, Field};

/// Write one row per identified applicant, columns in [`Field::ALL`] order.
/// Returns the number of rows written.
pub fn export_csv(records: &[ApplicantRecord], output_path: &Path) -> Result<usize> {
    let mut out: Vec<u8> = Vec::new();
    let io_err = |e: std::io::Error| IntakeError::io(output_path, e);

    out.write_all(&[0xEF, 0xBB, 0xBF]).map_err(io_err)?;

    let header = Field::ALL
        .iter()
        .map(|f| csv_escape(f.label()))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(out, "{header}").map_err(io_err)?;

    let mut rows = 0;
    for record in records.iter().filter(|r| !r.is_unidentified()) {
        let row = Field::ALL
            .iter()
            .map(|&field| {
                let value = record.get(field);
                match field {
                    Field::Summary => csv_escape(&flatten(&value)),
                    _ => csv_escape(&value),
                }
            })
            .collect::<Vec<_>>()
            .join(",");
        writeln!(out, "{row}").map_err(io_err)?;
        rows += 1;
    }

    crate::store::write_atomic(output_path, &out)?;
    Ok(rows)
}

fn flatten(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape a value for CSV (RFC 4180).
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UNKNOWN;

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("hello"), "hello");
        assert_eq!(csv_escape("Intel, AMD"), "\"Intel, AMD\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_export_rows_and_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("applicants.csv");
        let jane = ApplicantRecord {
            name: "Jane Doe".to_string(),
            email: "a@x.com".to_string(),
            notable_companies: vec!["Intel".to_string(), "AMD".to_string()],
            summary: "Line one.\nLine two.".to_string(),
            ..Default::default()
        };
        let ghost = ApplicantRecord::default();

        let rows = export_csv(&[jane, ghost], &path).unwrap();
        assert_eq!(rows, 1);

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(&[0xEF, 0xBB, 0xBF]));
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Name,Email,Phone,Location,Country,Position Category"));
        assert!(lines[0].ends_with("Folder Path,Resume,Desired Job Role"));
        assert!(lines[1].starts_with(&format!("Jane Doe,a@x.com,{},", UNKNOWN)));
        assert!(lines[1].contains("\"Intel, AMD\""));
        assert!(lines[1].contains("Line one. Line two."));
    }
}
