//! Workbook input and output.
//!
//! Every sheet becomes a section whose first row is the header row. Cells keep
//! their sheet positions: a used range that starts below row 1 or right of
//! column A is padded with blank rows and columns, so the output lines up
//! with the input. Output is always written as xlsx, one worksheet per
//! remaining section.

use std::io::Cursor;
use std::iter;

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use log::debug;
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};

use super::FileParser;
use crate::{
    document::{CellValue, Document, Row, Section},
    error::{EstimationError, Result},
    plan::InputFileType,
};

const FORMAT: &str = "xlsx";

#[derive(Debug, Clone, Copy, Default)]
pub struct ExcelParser;

impl FileParser for ExcelParser {
    fn input_type(&self) -> InputFileType {
        InputFileType::Excel
    }

    fn decode(&self, file: &str, bytes: &[u8]) -> Result<Document> {
        if bytes.is_empty() {
            return Err(EstimationError::EmptyFile {
                file: file.to_string(),
            });
        }
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .map_err(|err| EstimationError::unreadable(file, err))?;
        let sheet_names = workbook.sheet_names().to_vec();
        if sheet_names.is_empty() {
            return Err(EstimationError::EmptyFile {
                file: file.to_string(),
            });
        }

        let mut sections = Vec::with_capacity(sheet_names.len());
        for name in sheet_names {
            let range = workbook.worksheet_range(&name).map_err(|err| {
                EstimationError::unreadable(file, format!("sheet '{name}': {err}"))
            })?;
            let (start_row, start_col) = range.start().unwrap_or((0, 0));
            let padding = start_col as usize;
            let mut rows = iter::repeat_with(Vec::new)
                .take(start_row as usize)
                .chain(range.rows().map(|row| {
                    let mut cells = vec![CellValue::Empty; padding];
                    cells.extend(row.iter().map(cell_from_data));
                    cells
                }));
            let headers = rows
                .next()
                .map(|header_row| header_row.iter().map(CellValue::as_display).collect::<Vec<_>>())
                .unwrap_or_default();
            let body = rows.map(Row::from_cells).collect::<Vec<_>>();
            debug!(
                "Sheet '{}' decoded with {} column(s) and {} row(s)",
                name,
                headers.len(),
                body.len()
            );
            sections.push(Section::new(name, headers, body));
        }
        Ok(Document::workbook(sections))
    }

    fn encode(&self, document: &Document) -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        for section in &document.sections {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&section.name).map_err(xlsx_error)?;
            write_section(worksheet, section)?;
        }
        workbook.save_to_buffer().map_err(xlsx_error)
    }
}

fn cell_from_data(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(text) => CellValue::Text(text.clone()),
        Data::Float(value) => CellValue::Number(*value),
        Data::Int(value) => CellValue::Integer(*value),
        Data::Bool(value) => CellValue::Bool(*value),
        Data::DateTime(value) => CellValue::Number(value.as_f64()),
        Data::DateTimeIso(text) | Data::DurationIso(text) => CellValue::Text(text.clone()),
        Data::Error(err) => CellValue::Text(err.to_string()),
    }
}

fn write_section(worksheet: &mut Worksheet, section: &Section) -> Result<()> {
    for (column, header) in section.headers.iter().enumerate() {
        if header.is_empty() {
            continue;
        }
        worksheet
            .write_string(0, column_index(column)?, header)
            .map_err(xlsx_error)?;
    }
    for (idx, row) in section.rows.iter().enumerate() {
        let row_index = u32::try_from(idx + 1)
            .map_err(|_| EstimationError::encode(FORMAT, "too many rows"))?;
        for (column, cell) in row.cells.iter().enumerate() {
            write_cell(worksheet, row_index, column_index(column)?, cell)?;
        }
    }
    Ok(())
}

fn write_cell(worksheet: &mut Worksheet, row: u32, column: u16, cell: &CellValue) -> Result<()> {
    let written = match cell {
        CellValue::Empty | CellValue::Null => return Ok(()),
        CellValue::Text(text) => worksheet.write_string(row, column, text),
        CellValue::Integer(value) => worksheet.write_number(row, column, *value as f64),
        CellValue::Number(value) => worksheet.write_number(row, column, *value),
        CellValue::Bool(value) => worksheet.write_boolean(row, column, *value),
        CellValue::Decimal(value) => {
            let number = value.to_f64().ok_or_else(|| {
                let reason = format!("{value} does not fit a spreadsheet number");
                EstimationError::encode(FORMAT, reason)
            })?;
            worksheet.write_number(row, column, number)
        }
        CellValue::Json(value) => worksheet.write_string(row, column, value.to_string()),
    };
    written.map(|_| ()).map_err(xlsx_error)
}

fn column_index(column: usize) -> Result<u16> {
    u16::try_from(column).map_err(|_| EstimationError::encode(FORMAT, "too many columns"))
}

fn xlsx_error(err: XlsxError) -> EstimationError {
    EstimationError::encode(FORMAT, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_workbook() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Population").unwrap();
        sheet.write_string(0, 0, "Code").unwrap();
        sheet.write_string(0, 1, "HH").unwrap();
        sheet.write_string(1, 0, "B1").unwrap();
        sheet.write_number(1, 1, 100.0).unwrap();
        let readme = workbook.add_worksheet();
        readme.set_name("ReadMe").unwrap();
        readme.write_string(0, 0, "Instructions").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn decodes_every_sheet_with_header_row() {
        let document = ExcelParser.decode("store-1", &sample_workbook()).unwrap();
        assert_eq!(document.sections.len(), 2);
        let population = &document.sections[0];
        assert_eq!(population.name, "Population");
        assert_eq!(population.headers, vec!["Code".to_string(), "HH".to_string()]);
        assert_eq!(population.rows.len(), 1);
        assert_eq!(population.rows[0].cell(1), &CellValue::Number(100.0));
        assert!(document.sections[1].rows.is_empty());
    }

    #[test]
    fn encoded_output_keeps_appended_columns() {
        let mut document = ExcelParser.decode("store-1", &sample_workbook()).unwrap();
        let section = &mut document.sections[0];
        let column = section.output_column("EstimatedPopulation");
        section.set_cell(0, column, CellValue::Decimal(rust_decimal::Decimal::new(4500, 1)));
        let bytes = ExcelParser.encode(&document).unwrap();

        let decoded = ExcelParser.decode("out", &bytes).unwrap();
        let population = &decoded.sections[0];
        assert_eq!(population.headers[2], "EstimatedPopulation");
        assert_eq!(population.rows[0].cell(2), &CellValue::Number(450.0));
    }

    fn used_range_start(bytes: &[u8], sheet: &str) -> Option<(u32, u32)> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).unwrap();
        workbook.worksheet_range(sheet).unwrap().start()
    }

    #[test]
    fn offset_sheet_keeps_its_cell_positions() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Population").unwrap();
        sheet.write_string(0, 1, "Code").unwrap();
        sheet.write_string(0, 2, "HH").unwrap();
        sheet.write_string(1, 1, "B1").unwrap();
        sheet.write_number(1, 2, 100.0).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let mut document = ExcelParser.decode("store-1", &bytes).unwrap();
        let population = &mut document.sections[0];
        assert_eq!(population.headers, vec!["", "Code", "HH"]);
        assert_eq!(population.rows[0].cell(1), &CellValue::Text("B1".into()));
        assert_eq!(population.column_index("HH"), Some(2));
        let column = population.output_column("EstimatedPopulation");
        population.set_cell(0, column, CellValue::Decimal(rust_decimal::Decimal::new(450, 0)));

        let output = ExcelParser.encode(&document).unwrap();
        assert_eq!(used_range_start(&output, "Population"), Some((0, 1)));
        let decoded = ExcelParser.decode("out", &output).unwrap();
        assert_eq!(decoded.sections[0].headers, vec!["", "Code", "HH", "EstimatedPopulation"]);
        assert_eq!(decoded.sections[0].rows[0].cell(3), &CellValue::Number(450.0));
    }

    #[test]
    fn leading_blank_rows_leave_the_header_row_blank() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Population").unwrap();
        sheet.write_string(2, 0, "Code").unwrap();
        sheet.write_string(3, 0, "B1").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let document = ExcelParser.decode("store-1", &bytes).unwrap();
        let population = &document.sections[0];
        assert!(population.headers.is_empty());
        assert_eq!(population.rows.len(), 3);
        assert!(population.rows[0].is_empty());
        assert_eq!(population.rows[1].cell(0), &CellValue::Text("Code".into()));

        let output = ExcelParser.encode(&document).unwrap();
        assert_eq!(used_range_start(&output, "Population"), Some((2, 0)));
    }

    #[test]
    fn header_text_is_kept_as_written() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Population").unwrap();
        sheet.write_string(0, 0, " HH ").unwrap();
        sheet.write_number(1, 0, 10.0).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let document = ExcelParser.decode("store-1", &bytes).unwrap();
        assert_eq!(document.sections[0].headers, vec![" HH "]);
        let output = ExcelParser.encode(&document).unwrap();
        let decoded = ExcelParser.decode("out", &output).unwrap();
        assert_eq!(decoded.sections[0].headers, vec![" HH "]);
    }

    #[test]
    fn garbage_bytes_are_unreadable() {
        let err = ExcelParser.decode("store-1", b"not a workbook").unwrap_err();
        assert!(matches!(err, EstimationError::UnreadableFile { .. }));
    }

    #[test]
    fn empty_bytes_are_an_empty_file() {
        let err = ExcelParser.decode("store-1", &[]).unwrap_err();
        assert!(matches!(err, EstimationError::EmptyFile { .. }));
    }
}
