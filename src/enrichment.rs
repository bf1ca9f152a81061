//! Whole-document passes that run once every record has been computed:
//! section filtering, header localization and facility assignment.

use std::collections::HashMap;

use log::{debug, warn};

use crate::{
    collaborators::{CensusService, LocaleMessage, RequestContext},
    document::{CellValue, Document},
    error::{EstimationError, Result},
};

/// Code to message lookup resolved once per run.
#[derive(Debug, Clone, Default)]
pub struct LocaleTable {
    messages: HashMap<String, String>,
}

impl LocaleTable {
    /// The first message seen for a code wins.
    pub fn from_messages(messages: Vec<LocaleMessage>) -> Self {
        let mut table = HashMap::with_capacity(messages.len());
        for message in messages {
            table.entry(message.code).or_insert(message.message);
        }
        LocaleTable { messages: table }
    }

    pub fn message(&self, code: &str) -> Option<&str> {
        self.messages.get(code).map(String::as_str)
    }

    /// Localized text for `code`, or the code itself when no message exists.
    pub fn display<'a>(&'a self, code: &'a str) -> &'a str {
        self.message(code).unwrap_or(code)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Decides which named sections take part in a run.
///
/// Codes are matched against a section name both in their localized form and
/// as the raw code, so a sheet named either "Read Me" or `HCM_README_SHEETNAME`
/// is caught by the same entry.
#[derive(Debug, Clone, Default)]
pub struct SectionFilter {
    allowed: Vec<String>,
    excluded: Vec<String>,
}

impl SectionFilter {
    pub fn allow_all() -> Self {
        SectionFilter::default()
    }

    pub fn from_codes(
        allowed_codes: &[String],
        excluded_codes: &[String],
        table: &LocaleTable,
    ) -> Self {
        let expand = |codes: &[String]| {
            codes
                .iter()
                .flat_map(|code| {
                    let mut names = vec![code.clone()];
                    if let Some(message) = table.message(code) {
                        names.push(message.to_string());
                    }
                    names
                })
                .collect::<Vec<_>>()
        };
        SectionFilter {
            allowed: expand(allowed_codes),
            excluded: expand(excluded_codes),
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        let name = name.trim();
        let listed = |names: &[String]| names.iter().any(|candidate| candidate.trim() == name);
        (self.allowed.is_empty() || listed(&self.allowed)) && !listed(&self.excluded)
    }
}

/// Drops every section the filter rejects and returns how many were removed.
pub fn filter_sections(document: &mut Document, filter: &SectionFilter) -> usize {
    document.retain_sections(|section| {
        let keep = filter.allows(&section.name);
        if !keep {
            debug!("Section '{}' is not allow-listed; removed", section.name);
        }
        keep
    })
}

/// Replaces trailing headers that are known codes with their messages.
///
/// The scan starts at the last column and stops at the first non-empty
/// header that is not a code, so source headers ahead of the appended
/// output columns are never rewritten. A code whose message is already used
/// by another header keeps its code, so no two columns end up sharing a name.
/// Returns the number of headers changed.
pub fn localize_headers(headers: &mut [String], table: &LocaleTable) -> usize {
    let mut localized = 0;
    for idx in (0..headers.len()).rev() {
        let code = headers[idx].trim();
        if code.is_empty() {
            continue;
        }
        let Some(message) = table.message(code) else {
            break;
        };
        let taken = headers
            .iter()
            .enumerate()
            .any(|(other, header)| other != idx && header.trim() == message.trim());
        if taken {
            warn!(
                "Header '{}' kept; its message '{}' already names another column",
                headers[idx], message
            );
            continue;
        }
        headers[idx] = message.to_string();
        localized += 1;
    }
    localized
}

pub fn localize_document(document: &mut Document, table: &LocaleTable) -> usize {
    let mut total = 0;
    for section in &mut document.sections {
        let count = localize_headers(&mut section.headers, table);
        if count > 0 {
            debug!("Localized {} header(s) in section '{}'", count, section.name);
        }
        total += count;
    }
    total
}

/// Column placement and lookup keys for facility assignment.
#[derive(Debug, Clone)]
pub struct FacilityColumn<'a> {
    /// Input file named in errors.
    pub file: &'a str,
    /// Source column holding each row's boundary code.
    pub boundary_column: &'a str,
    /// Header text of the appended facility column.
    pub header: &'a str,
    /// Key in a census record's additional details carrying the facility name.
    pub name_field: &'a str,
}

/// Appends an assigned-facility column to every section and fills it from
/// the census lookup. A section with data but no boundary column fails; a
/// blank section is left alone. Returns the number of rows that received a
/// facility name.
pub fn assign_facilities(
    document: &mut Document,
    census: &dyn CensusService,
    context: &RequestContext,
    column: &FacilityColumn<'_>,
) -> Result<usize> {
    let mut assigned = 0;
    for section in &mut document.sections {
        let Some(boundary_idx) = section.column_index(column.boundary_column) else {
            if section.rows.iter().all(|row| row.is_empty()) {
                debug!("Section '{}' is blank; no facilities assigned", section.name);
                continue;
            }
            return Err(EstimationError::MissingColumn {
                column: column.boundary_column.to_string(),
                file: column.file.to_string(),
            });
        };
        let codes = census.boundary_codes(section, boundary_idx, context);
        if codes.is_empty() {
            continue;
        }
        let mut facilities: HashMap<String, String> = HashMap::new();
        for record in census.census_records(context, &codes)? {
            if let Some(name) = record.detail_str(column.name_field) {
                facilities
                    .entry(record.boundary_code.clone())
                    .or_insert_with(|| name.to_string());
            }
        }

        let facility_idx = section.append_column(column.header);
        let mut unassigned = Vec::new();
        for row in 0..section.rows.len() {
            if section.rows[row].is_empty() {
                continue;
            }
            let code = section.rows[row].cell(boundary_idx).as_display();
            let value = match facilities.get(code.trim()) {
                Some(name) => {
                    assigned += 1;
                    CellValue::Text(name.clone())
                }
                None => {
                    if !code.trim().is_empty() && !unassigned.contains(&code) {
                        unassigned.push(code);
                    }
                    CellValue::Empty
                }
            };
            section.set_cell(row, facility_idx, value);
        }
        if !unassigned.is_empty() {
            warn!(
                "No facility assigned for {} boundary code(s) in section '{}': {}",
                unassigned.len(),
                section.name,
                unassigned.join(", ")
            );
        }
    }
    Ok(assigned)
}
