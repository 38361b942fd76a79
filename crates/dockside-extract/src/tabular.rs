//! Spreadsheet and CSV extraction.
//!
//! Spreadsheets are flattened sheet by sheet: a `Sheet: <name>` header
//! followed by the sheet's rows as tab-separated values. CSV files skip
//! the header and emit rows directly. A sheet that fails to parse is a
//! soft failure; the remaining sheets still contribute text.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use dockside_core::ExtractError;

/// Flattened spreadsheet output.
#[derive(Debug)]
pub struct SheetText {
    /// Concatenated sheet sections.
    pub text: String,
    /// Per-sheet soft failures.
    pub errors: Vec<String>,
    /// Number of sheets that contributed text.
    pub sheet_count: u32,
}

/// Extract every sheet of an XLSX/XLS workbook as TSV sections.
pub fn spreadsheet_text(bytes: &[u8]) -> Result<SheetText, ExtractError> {
    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mut workbook = open_workbook_auto_from_rs(cursor)
        .map_err(|e| ExtractError::Parse(format!("workbook open: {e}")))?;

    let sheet_names = workbook.sheet_names().to_owned();
    let mut sections = Vec::new();
    let mut errors = Vec::new();

    for name in sheet_names {
        match workbook.worksheet_range(&name) {
            Ok(range) => {
                let mut section = format!("Sheet: {name}");
                for row in range.rows() {
                    section.push('\n');
                    let cells: Vec<String> = row.iter().map(format_cell).collect();
                    section.push_str(&cells.join("\t"));
                }
                sections.push(section);
            }
            Err(e) => errors.push(format!("sheet {name}: {e}")),
        }
    }

    Ok(SheetText {
        sheet_count: sections.len() as u32,
        text: sections.join("\n\n"),
        errors,
    })
}

/// Extract CSV rows as tab-separated lines.
pub fn csv_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut lines = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ExtractError::Parse(format!("csv: {e}")))?;
        lines.push(record.iter().collect::<Vec<_>>().join("\t"));
    }
    Ok(lines.join("\n"))
}

fn format_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#{e:?}"),
    }
}
