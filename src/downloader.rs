use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::error::ExportError;
use crate::report::Row;

/// Column width hint applied to every exported column
pub const COLUMN_WIDTH: f64 = 20.0;

/// One named dataset of a workbook
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Row>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }
}

/// Convert export rows to CSV
///
/// Headers come from the first row. Values containing commas, quotes or
/// newlines are quoted, with embedded quotes doubled.
///
/// # Errors
/// * `ExportError::Empty` - when `rows` is empty
pub fn to_csv(rows: &[Row]) -> Result<String, ExportError> {
    let first = rows.first().ok_or(ExportError::Empty)?;
    let mut csv_content = String::new();

    let headers: Vec<&str> = first.iter().map(|(header, _)| *header).collect();
    push_csv_line(&mut csv_content, headers.iter().copied());
    for row in rows {
        push_csv_line(&mut csv_content, row.iter().map(|(_, value)| value.as_str()));
    }

    Ok(csv_content)
}

fn push_csv_line<'a>(out: &mut String, values: impl Iterator<Item = &'a str>) {
    for (i, value) in values.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if value.contains(',') || value.contains('"') || value.contains('\n') {
            out.push_str(&format!("\"{}\"", value.replace('"', "\"\"")));
        } else {
            out.push_str(value);
        }
    }
    out.push('\n');
}

/// Convert datasets to one CSV document
///
/// A single dataset is written as plain CSV. Several datasets become
/// sections, each introduced by its name and separated by a blank line.
///
/// # Errors
/// * `ExportError::Empty` - when no sheet has any row
pub fn sheets_to_csv(sheets: &[Sheet]) -> Result<String, ExportError> {
    let filled: Vec<&Sheet> = sheets.iter().filter(|s| !s.rows.is_empty()).collect();
    match filled.as_slice() {
        [] => Err(ExportError::Empty),
        [only] => to_csv(&only.rows),
        many => {
            let mut sections = Vec::with_capacity(many.len());
            for sheet in many {
                sections.push(format!("{}\n{}", sheet.name, to_csv(&sheet.rows)?));
            }
            Ok(sections.join("\n"))
        }
    }
}

/// Convert datasets to an XLSX workbook, one worksheet per dataset
///
/// Headers are written bold on the first line of each sheet and every column
/// gets the fixed width hint. Sheets without rows are skipped.
///
/// # Errors
/// * `ExportError::Empty` - when no sheet has any row
/// * `ExportError::Xlsx` - when the workbook cannot be built
pub fn to_xlsx(sheets: &[Sheet]) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let mut written = 0;

    for sheet in sheets {
        let Some(first) = sheet.rows.first() else {
            continue;
        };

        let mut worksheet = Worksheet::new();
        worksheet.set_name(&sheet.name)?;

        for (col, (header, _)) in first.iter().enumerate() {
            let col = col as u16;
            worksheet.set_column_width(col, COLUMN_WIDTH)?;
            worksheet.write_string_with_format(0, col, *header, &header_format)?;
        }

        for (r, row) in sheet.rows.iter().enumerate() {
            for (col, (_, value)) in row.iter().enumerate() {
                worksheet.write_string((r + 1) as u32, col as u16, value)?;
            }
        }

        workbook.push_worksheet(worksheet);
        written += 1;
    }

    if written == 0 {
        return Err(ExportError::Empty);
    }
    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(date: &str, note: &str) -> Row {
        vec![("Date", date.to_string()), ("Note", note.to_string())]
    }

    #[test]
    fn csv_quotes_special_values() {
        let csv = to_csv(&[row("2024-01-01", "a, b"), row("2024-01-02", "say \"hi\"")]).unwrap();
        assert_eq!(
            csv,
            "Date,Note\n2024-01-01,\"a, b\"\n2024-01-02,\"say \"\"hi\"\"\"\n"
        );
    }

    #[test]
    fn empty_exports_are_rejected() {
        assert!(matches!(to_csv(&[]), Err(ExportError::Empty)));
        assert!(matches!(
            to_xlsx(&[Sheet::new("Tests", Vec::new())]),
            Err(ExportError::Empty)
        ));
    }

    #[test]
    fn several_sheets_become_named_sections() {
        let csv = sheets_to_csv(&[
            Sheet::new("Tests", vec![row("2024-01-01", "x")]),
            Sheet::new("Empty", Vec::new()),
            Sheet::new("Warnings", vec![row("2024-01-02", "y")]),
        ])
        .unwrap();
        assert_eq!(
            csv,
            "Tests\nDate,Note\n2024-01-01,x\n\nWarnings\nDate,Note\n2024-01-02,y\n"
        );

        let single = sheets_to_csv(&[Sheet::new("Tests", vec![row("2024-01-01", "x")])]).unwrap();
        assert_eq!(single, "Date,Note\n2024-01-01,x\n");
    }

    #[test]
    fn xlsx_is_a_zip_container() {
        let bytes = to_xlsx(&[
            Sheet::new("Tests", vec![row("2024-01-01", "x")]),
            Sheet::new("Warnings", Vec::new()),
        ])
        .unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
