use std::collections::HashMap;

use log::warn;

use crate::{
    error::{EstimationError, Result},
    plan::{PlanConfiguration, ResourceMapping},
};

/// Canonical name to source column mapping for one input file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMapping {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl ResolvedMapping {
    pub fn column_for(&self, canonical: &str) -> Option<&str> {
        self.index
            .get(canonical)
            .map(|idx| self.entries[*idx].1.as_str())
    }

    pub fn contains(&self, canonical: &str) -> bool {
        self.index.contains_key(canonical)
    }

    /// `(mapped_to, mapped_from)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(canonical, column)| (canonical.as_str(), column.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds `mapped_to -> mapped_from`. When several mappings target the same
/// canonical name the first one encountered wins.
pub fn resolve<'a, I>(mappings: I) -> ResolvedMapping
where
    I: IntoIterator<Item = &'a ResourceMapping>,
{
    let mut resolved = ResolvedMapping::default();
    for mapping in mappings {
        if let Some(existing) = resolved.column_for(&mapping.mapped_to) {
            warn!(
                "Ignoring mapping '{}' -> '{}'; '{}' is already mapped from '{}'",
                mapping.mapped_from, mapping.mapped_to, mapping.mapped_to, existing
            );
            continue;
        }
        resolved
            .index
            .insert(mapping.mapped_to.clone(), resolved.entries.len());
        resolved
            .entries
            .push((mapping.mapped_to.clone(), mapping.mapped_from.clone()));
    }
    resolved
}

pub fn resolve_for_file(plan: &PlanConfiguration, file_store_id: &str) -> ResolvedMapping {
    resolve(plan.mappings_for_file(file_store_id))
}

/// Fails with the first mapped column (in declaration order) that the header
/// row does not contain. Surrounding whitespace is ignored on both sides.
/// `context` names the file in the error.
pub fn validate(headers: &[String], resolved: &ResolvedMapping, context: &str) -> Result<()> {
    for (_, column) in resolved.iter() {
        if !headers.iter().any(|header| header.trim() == column.trim()) {
            return Err(EstimationError::MissingColumn {
                column: column.to_string(),
                file: context.to_string(),
            });
        }
    }
    Ok(())
}
