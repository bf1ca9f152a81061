//! Plan configuration model.
//!
//! A [`PlanConfiguration`] describes one estimation run: the input files, the
//! named assumptions, the ordered operation chain and the resource mappings
//! that translate native column names into canonical names. It is read from
//! JSON or YAML using the camelCase field names used by the plan service
//! and is treated as immutable for the duration of a run.

use std::{collections::HashMap, fmt, path::Path, str::FromStr};

use anyhow::Context;
use itertools::Itertools;
use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    config_io,
    error::{EstimationError, Result},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanConfiguration {
    #[serde(default)]
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub campaign_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub files: Vec<PlanFile>,
    #[serde(default)]
    pub assumptions: Vec<Assumption>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub resource_mapping: Vec<ResourceMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFile {
    #[serde(default)]
    pub id: String,
    pub filestore_id: String,
    pub input_file_type: String,
    #[serde(default)]
    pub template_identifier: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assumption {
    #[serde(default)]
    pub id: String,
    pub key: String,
    pub value: Decimal,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub id: String,
    pub input: String,
    pub operator: Operator,
    pub assumption_value: String,
    pub output: String,
    #[serde(default)]
    pub execution_order: i32,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub show_on_estimation_dashboard: bool,
}

impl Operation {
    /// Identifier used in error messages; falls back to the output name for
    /// operations declared without an id.
    pub fn label(&self) -> &str {
        if self.id.is_empty() {
            &self.output
        } else {
            &self.id
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMapping {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filestore_id: String,
    pub mapped_from: String,
    pub mapped_to: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl ResourceMapping {
    /// Mappings declared without a file reference apply to every file.
    pub fn applies_to(&self, file_store_id: &str) -> bool {
        self.filestore_id.is_empty() || self.filestore_id == file_store_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    Mdms,
    Custom,
    Vehicle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "+", alias = "PLUS", alias = "ADD")]
    Add,
    #[serde(rename = "-", alias = "MINUS", alias = "SUBTRACT")]
    Subtract,
    #[serde(rename = "*", alias = "MULTIPLY")]
    Multiply,
    #[serde(rename = "/", alias = "DIVIDE")]
    Divide,
    #[serde(rename = "%", alias = "PERCENT")]
    Percent,
    #[serde(rename = "^", alias = "EXPONENTIAL")]
    Exponential,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Percent => "%",
            Operator::Exponential => "^",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputFileType {
    Excel,
    GeoJson,
    Shapefile,
}

impl FromStr for InputFileType {
    type Err = EstimationError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "EXCEL" => Ok(InputFileType::Excel),
            "GEOJSON" => Ok(InputFileType::GeoJson),
            "SHAPEFILE" => Ok(InputFileType::Shapefile),
            _ => Err(EstimationError::UnsupportedInputType(value.to_string())),
        }
    }
}

impl fmt::Display for InputFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            InputFileType::Excel => "EXCEL",
            InputFileType::GeoJson => "GEOJSON",
            InputFileType::Shapefile => "SHAPEFILE",
        };
        f.write_str(tag)
    }
}

impl Serialize for InputFileType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl PlanFile {
    pub fn input_type(&self) -> Result<InputFileType> {
        self.input_file_type.parse()
    }
}

fn default_active() -> bool {
    true
}

impl PlanConfiguration {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        config_io::load_from_path(path)
            .with_context(|| format!("Loading plan configuration from {path:?}"))
    }

    /// The file a run operates on: the first active declared file.
    pub fn primary_file(&self) -> Result<&PlanFile> {
        let mut active = self.files.iter().filter(|file| file.active);
        let first = active.next().ok_or(EstimationError::NoInputFile)?;
        let remaining = active.count();
        if remaining > 0 {
            warn!(
                "Plan '{}' declares {} additional active file(s); only '{}' is processed",
                self.id, remaining, first.filestore_id
            );
        }
        Ok(first)
    }

    pub fn active_assumptions(&self) -> impl Iterator<Item = &Assumption> {
        self.assumptions.iter().filter(|assumption| assumption.active)
    }

    /// Active assumptions keyed by name. Keys must be unique.
    pub fn assumption_map(&self) -> Result<HashMap<String, Decimal>> {
        let mut map = HashMap::new();
        for assumption in self.active_assumptions() {
            if map
                .insert(assumption.key.clone(), assumption.value)
                .is_some()
            {
                return Err(EstimationError::DuplicateAssumption(
                    assumption.key.clone(),
                ));
            }
        }
        Ok(map)
    }

    /// Active operations in non-decreasing execution order. Declaration order
    /// breaks ties.
    pub fn ordered_operations(&self) -> Vec<&Operation> {
        self.operations
            .iter()
            .filter(|operation| operation.active)
            .sorted_by_key(|operation| operation.execution_order)
            .collect()
    }

    pub fn mappings_for_file<'a>(
        &'a self,
        file_store_id: &'a str,
    ) -> impl Iterator<Item = &'a ResourceMapping> + 'a {
        self.resource_mapping
            .iter()
            .filter(move |mapping| mapping.active && mapping.applies_to(file_store_id))
    }
}
