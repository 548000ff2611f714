//! Spreadsheet cell extraction.
//!
//! Reads every sheet with `calamine` (xlsx, xlsm, xlsb, xls, ods) and flattens it to
//! searchable text: sheets in workbook order, each introduced by a `## <name>` line,
//! rows in order with one line per row and cells separated by tabs. Adjacent cells
//! stay adjacent in the output, so a phrase spanning two cells is still findable.

use calamine::{Data, Range, Reader, open_workbook_auto};
use std::fmt::Write as FmtWrite;
use std::path::Path;

use crate::error::{DocsiftError, Result};

pub const CELL_SEPARATOR: char = '\t';
pub const ROW_SEPARATOR: char = '\n';

/// Extract all sheets of the workbook at `path` as text.
///
/// Format errors are reported as `Parsing`; real IO errors bubble up unchanged.
pub fn read_workbook_text(path: &Path) -> Result<String> {
    // calamine folds IO failures into its per-format errors
    std::fs::metadata(path)?;

    let workbook = match open_workbook_auto(path) {
        Ok(wb) => wb,
        Err(calamine::Error::Io(io_err)) => {
            if io_err.kind() == std::io::ErrorKind::InvalidData {
                return Err(DocsiftError::parsing(format!(
                    "Cannot detect spreadsheet format: {}",
                    io_err
                )));
            }
            return Err(io_err.into());
        }
        Err(e) => return Err(DocsiftError::parsing(format!("Failed to parse spreadsheet: {}", e))),
    };

    Ok(workbook_to_text(workbook))
}

fn workbook_to_text<RS, R>(mut workbook: R) -> String
where
    RS: std::io::Read + std::io::Seek,
    R: Reader<RS>,
{
    let sheet_names = workbook.sheet_names();
    let mut sections = Vec::with_capacity(sheet_names.len());

    for name in &sheet_names {
        match workbook.worksheet_range(name) {
            Ok(range) => sections.push(sheet_to_text(name, &range)),
            Err(e) => tracing::debug!("Skipping unreadable sheet '{}': {:?}", name, e),
        }
    }

    sections.join("\n\n")
}

fn sheet_to_text(name: &str, range: &Range<Data>) -> String {
    let (rows, cols) = range.get_size();
    let mut result = String::with_capacity(16 + name.len() + rows * cols * 8);

    result.push_str("## ");
    result.push_str(name);

    for row in range.rows() {
        let last_filled = row.iter().rposition(|cell| !matches!(cell, Data::Empty));
        let Some(last_filled) = last_filled else {
            continue;
        };

        result.push(ROW_SEPARATOR);
        for (i, cell) in row[..=last_filled].iter().enumerate() {
            if i > 0 {
                result.push(CELL_SEPARATOR);
            }
            format_cell_into(&mut result, cell);
        }
    }

    result
}

#[inline]
fn format_cell_into(buffer: &mut String, data: &Data) {
    match data {
        Data::Empty => {}
        Data::String(s) => {
            // Keep the row/cell structure intact.
            for ch in s.chars() {
                buffer.push(match ch {
                    '\t' | '\n' | '\r' => ' ',
                    other => other,
                });
            }
        }
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                let _ = write!(buffer, "{}", *f as i64);
            } else {
                let _ = write!(buffer, "{}", f);
            }
        }
        Data::Int(i) => {
            let _ = write!(buffer, "{}", i);
        }
        Data::Bool(b) => {
            buffer.push_str(if *b { "true" } else { "false" });
        }
        Data::DateTime(dt) => {
            if let Some(datetime) = dt.as_datetime() {
                let _ = write!(buffer, "{}", datetime.format("%Y-%m-%d %H:%M:%S"));
            } else {
                let _ = write!(buffer, "{:?}", dt);
            }
        }
        Data::Error(e) => {
            let _ = write!(buffer, "#ERR: {:?}", e);
        }
        Data::DateTimeIso(s) | Data::DurationIso(s) => {
            buffer.push_str(s);
        }
    }
}
