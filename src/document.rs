//! In-memory output document shared by every input format.
//!
//! A [`Document`] is a list of [`Section`]s (workbook sheets, or the single
//! feature set of a feature collection). Each section has one header row and
//! rows of [`CellValue`]s aligned to it. Feature collections keep the
//! non-property members of every feature in [`Row::members`] so they can be
//! written back unchanged.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value as JsonValue};

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Blank cell, or a property the feature does not carry.
    Empty,
    /// Explicit JSON null.
    Null,
    Text(String),
    Integer(i64),
    Number(f64),
    Bool(bool),
    Decimal(Decimal),
    /// Nested JSON value (object or array) carried through untouched.
    Json(JsonValue),
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty | CellValue::Null => true,
            CellValue::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            CellValue::Empty | CellValue::Null => String::new(),
            CellValue::Text(text) => text.clone(),
            CellValue::Integer(value) => value.to_string(),
            CellValue::Number(value) => {
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    (*value as i64).to_string()
                } else {
                    value.to_string()
                }
            }
            CellValue::Bool(value) => value.to_string(),
            CellValue::Decimal(value) => value.to_string(),
            CellValue::Json(value) => value.to_string(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            CellValue::Empty | CellValue::Null => JsonValue::Null,
            CellValue::Text(text) => JsonValue::String(text.clone()),
            CellValue::Integer(value) => JsonValue::from(*value),
            CellValue::Number(value) => serde_json::Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            CellValue::Bool(value) => JsonValue::Bool(*value),
            CellValue::Decimal(value) => value
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            CellValue::Json(value) => value.clone(),
        }
    }

    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => CellValue::Null,
            JsonValue::Bool(flag) => CellValue::Bool(*flag),
            JsonValue::Number(number) => match number.as_i64() {
                Some(integer) => CellValue::Integer(integer),
                None => number
                    .as_f64()
                    .map(CellValue::Number)
                    .unwrap_or_else(|| CellValue::Text(number.to_string())),
            },
            JsonValue::String(text) => CellValue::Text(text.clone()),
            other => CellValue::Json(other.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub cells: Vec<CellValue>,
    pub members: Map<String, JsonValue>,
}

impl Row {
    pub fn from_cells(cells: Vec<CellValue>) -> Self {
        Row {
            cells,
            members: Map::new(),
        }
    }

    pub fn cell(&self, column: usize) -> &CellValue {
        self.cells.get(column).unwrap_or(&CellValue::Empty)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(CellValue::is_blank)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    output_columns: HashMap<String, usize>,
}

impl Section {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Row>) -> Self {
        Section {
            name: name.into(),
            headers,
            rows,
            output_columns: HashMap::new(),
        }
    }

    /// First column whose header matches `header`, ignoring surrounding
    /// whitespace on both sides.
    pub fn column_index(&self, header: &str) -> Option<usize> {
        let header = header.trim();
        self.headers
            .iter()
            .position(|candidate| candidate.trim() == header)
    }

    /// Appends a new header and returns its column index.
    pub fn append_column(&mut self, header: impl Into<String>) -> usize {
        self.headers.push(header.into());
        self.headers.len() - 1
    }

    /// Column for a computed output. The header is appended the first time
    /// the output name is produced; later calls return the same column.
    pub fn output_column(&mut self, output: &str) -> usize {
        if let Some(column) = self.output_columns.get(output) {
            return *column;
        }
        let column = self.append_column(output);
        self.output_columns.insert(output.to_string(), column);
        column
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: CellValue) {
        if let Some(target) = self.rows.get_mut(row) {
            if target.cells.len() <= column {
                target.cells.resize(column + 1, CellValue::Empty);
            }
            target.cells[column] = value;
        }
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Workbook,
    FeatureCollection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub format: DocumentFormat,
    pub sections: Vec<Section>,
    /// Top-level members of a feature collection other than `features`.
    pub members: Map<String, JsonValue>,
}

impl Document {
    pub fn workbook(sections: Vec<Section>) -> Self {
        Document {
            format: DocumentFormat::Workbook,
            sections,
            members: Map::new(),
        }
    }

    pub fn feature_collection(section: Section, members: Map<String, JsonValue>) -> Self {
        Document {
            format: DocumentFormat::FeatureCollection,
            sections: vec![section],
            members,
        }
    }

    pub fn record_count(&self) -> usize {
        self.sections.iter().map(|section| section.rows.len()).sum()
    }

    pub fn retain_sections<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&Section) -> bool,
    {
        let before = self.sections.len();
        self.sections.retain(|section| keep(section));
        before - self.sections.len()
    }
}
