//! Boundaries to the services an estimation run depends on.
//!
//! The engine talks to a file store, a localization service, a census
//! service and an aggregation sink only through the traits below. All calls
//! are blocking and are never retried here; any failure ends the run.
//!
//! Local implementations are provided for the CLI and for tests: a
//! directory-backed and an in-memory file store, static locale and census
//! tables loaded from JSON/YAML, and no-op / collecting sinks.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io,
    path::{Component, Path, PathBuf},
    sync::Mutex,
};

use anyhow::Context;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{
    config_io,
    document::Section,
    engine::ResultSet,
    error::{EstimationError, Result},
    plan::PlanConfiguration,
};

pub const DEFAULT_LOCALE: &str = "en_IN";

/// Identity of the caller on whose behalf a run executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub locale: String,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        RequestContext {
            tenant_id: tenant_id.into(),
            user_id: None,
            locale: DEFAULT_LOCALE.to_string(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}

pub trait FileStore {
    fn fetch(&self, tenant_id: &str, file_store_id: &str) -> Result<Vec<u8>>;
    fn store(&self, bytes: &[u8], tenant_id: &str) -> Result<String>;
}

/// Stores files as `<root>/<tenant>/<id>`.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, tenant_id: &str, file_store_id: &str) -> Result<PathBuf> {
        for part in [tenant_id, file_store_id] {
            let mut components = Path::new(part).components();
            let single_normal = matches!(components.next(), Some(Component::Normal(_)))
                && components.next().is_none();
            if !single_normal {
                return Err(EstimationError::FileStore {
                    file: file_store_id.to_string(),
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("'{part}' is not a plain file store name"),
                    ),
                });
            }
        }
        Ok(self.root.join(tenant_id).join(file_store_id))
    }
}

impl FileStore for LocalFileStore {
    fn fetch(&self, tenant_id: &str, file_store_id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(tenant_id, file_store_id)?;
        fs::read(&path).map_err(|source| EstimationError::FileStore {
            file: file_store_id.to_string(),
            source,
        })
    }

    fn store(&self, bytes: &[u8], tenant_id: &str) -> Result<String> {
        let file_store_id = Uuid::new_v4().to_string();
        let path = self.path_for(tenant_id, &file_store_id)?;
        let io_error = |source| EstimationError::FileStore {
            file: file_store_id.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(&path, bytes).map_err(io_error)?;
        Ok(file_store_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant_id: &str, file_store_id: &str, bytes: Vec<u8>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert((tenant_id.to_string(), file_store_id.to_string()), bytes);
        }
    }

    pub fn get(&self, tenant_id: &str, file_store_id: &str) -> Option<Vec<u8>> {
        self.files.lock().ok().and_then(|files| {
            files
                .get(&(tenant_id.to_string(), file_store_id.to_string()))
                .cloned()
        })
    }

    pub fn len(&self) -> usize {
        self.files.lock().map(|files| files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileStore for MemoryFileStore {
    fn fetch(&self, tenant_id: &str, file_store_id: &str) -> Result<Vec<u8>> {
        self.get(tenant_id, file_store_id)
            .ok_or_else(|| EstimationError::FileStore {
                file: file_store_id.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
            })
    }

    fn store(&self, bytes: &[u8], tenant_id: &str) -> Result<String> {
        let file_store_id = Uuid::new_v4().to_string();
        let mut files = self
            .files
            .lock()
            .map_err(|_| EstimationError::collaborator("file store", "lock poisoned"))?;
        files.insert(
            (tenant_id.to_string(), file_store_id.clone()),
            bytes.to_vec(),
        );
        Ok(file_store_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleMessage {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

impl LocaleMessage {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        LocaleMessage {
            code: code.into(),
            message: message.into(),
            module: None,
            locale: None,
        }
    }
}

pub trait LocaleService {
    fn resolve_messages(&self, context: &RequestContext) -> Result<Vec<LocaleMessage>>;
}

/// Fixed message table. Messages tagged with a locale only apply to
/// requests in that locale.
#[derive(Debug, Clone, Default)]
pub struct StaticLocale {
    messages: Vec<LocaleMessage>,
}

impl StaticLocale {
    pub fn new(messages: Vec<LocaleMessage>) -> Self {
        StaticLocale { messages }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let messages: Vec<LocaleMessage> = config_io::load_from_path(path)
            .with_context(|| format!("Loading locale messages from {path:?}"))?;
        Ok(StaticLocale { messages })
    }
}

impl LocaleService for StaticLocale {
    fn resolve_messages(&self, context: &RequestContext) -> Result<Vec<LocaleMessage>> {
        Ok(self
            .messages
            .iter()
            .filter(|message| {
                message
                    .locale
                    .as_deref()
                    .is_none_or(|locale| locale == context.locale)
            })
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CensusRecord {
    pub boundary_code: String,
    #[serde(default)]
    pub additional_details: JsonValue,
}

impl CensusRecord {
    pub fn detail_str(&self, field: &str) -> Option<&str> {
        self.additional_details.get(field).and_then(JsonValue::as_str)
    }
}

pub trait CensusService {
    /// Distinct non-blank boundary codes found in `column`, in row order.
    fn boundary_codes(
        &self,
        section: &Section,
        column: usize,
        _context: &RequestContext,
    ) -> Vec<String> {
        section
            .rows
            .iter()
            .filter(|row| !row.is_empty())
            .map(|row| row.cell(column).as_display().trim().to_string())
            .filter(|code| !code.is_empty())
            .unique()
            .collect()
    }

    fn census_records(
        &self,
        context: &RequestContext,
        boundary_codes: &[String],
    ) -> Result<Vec<CensusRecord>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticCensus {
    records: Vec<CensusRecord>,
}

impl StaticCensus {
    pub fn new(records: Vec<CensusRecord>) -> Self {
        StaticCensus { records }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let records: Vec<CensusRecord> = config_io::load_from_path(path)
            .with_context(|| format!("Loading census records from {path:?}"))?;
        Ok(StaticCensus { records })
    }
}

impl CensusService for StaticCensus {
    fn census_records(
        &self,
        _context: &RequestContext,
        boundary_codes: &[String],
    ) -> Result<Vec<CensusRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|record| boundary_codes.contains(&record.boundary_code))
            .cloned()
            .collect())
    }
}

/// One computed row or feature handed to the aggregation sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedRecord {
    pub section: String,
    pub ordinal: usize,
    /// Canonical name to the raw value found in its mapped column.
    pub mapped_values: BTreeMap<String, String>,
    pub results: ResultSet,
}

pub trait PlanSink {
    fn persist(
        &self,
        context: &RequestContext,
        plan: &PlanConfiguration,
        record: &ComputedRecord,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPlanSink;

impl PlanSink for NoopPlanSink {
    fn persist(&self, _: &RequestContext, _: &PlanConfiguration, _: &ComputedRecord) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CollectingPlanSink {
    records: Mutex<Vec<ComputedRecord>>,
}

impl CollectingPlanSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ComputedRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl PlanSink for CollectingPlanSink {
    fn persist(
        &self,
        _context: &RequestContext,
        _plan: &PlanConfiguration,
        record: &ComputedRecord,
    ) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| EstimationError::collaborator("plan sink", "lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{CellValue, Row};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn local_store_round_trips_bytes() {
        let dir = tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        let id = store.store(b"payload", "mz").unwrap();
        assert_eq!(store.fetch("mz", &id).unwrap(), b"payload");
    }

    #[test]
    fn local_store_rejects_traversal() {
        let dir = tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        let err = store.fetch("mz", "../secret").unwrap_err();
        assert!(matches!(err, EstimationError::FileStore { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let store = MemoryFileStore::new();
        let err = store.fetch("mz", "absent").unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Io);
    }

    #[test]
    fn static_locale_filters_by_request_locale() {
        let mut french = LocaleMessage::new("CODE_X", "Bonjour");
        french.locale = Some("fr_FR".into());
        let locale = StaticLocale::new(vec![LocaleMessage::new("CODE_Y", "Hello"), french]);
        let context = RequestContext::new("mz");
        let messages = locale.resolve_messages(&context).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].code, "CODE_Y");
    }

    #[test]
    fn default_boundary_codes_are_distinct_and_ordered() {
        let section = Section::new(
            "Sheet1",
            vec!["Code".into()],
            vec![
                Row::from_cells(vec![CellValue::Text("B2".into())]),
                Row::from_cells(vec![CellValue::Text("B1".into())]),
                Row::from_cells(vec![CellValue::Text("B2".into())]),
                Row::from_cells(vec![CellValue::Empty]),
            ],
        );
        let census = StaticCensus::new(vec![CensusRecord {
            boundary_code: "B1".into(),
            additional_details: json!({"facilityName": "Clinic A"}),
        }]);
        let context = RequestContext::new("mz");
        let codes = census.boundary_codes(&section, 0, &context);
        assert_eq!(codes, vec!["B2".to_string(), "B1".to_string()]);
        let records = census.census_records(&context, &codes).unwrap();
        assert_eq!(records[0].detail_str("facilityName"), Some("Clinic A"));
    }
}
