//! The fetch, validate, compute, enrich and persist sequence shared by every
//! format adapter.
//!
//! One run owns one [`Document`]. It is decoded from the fetched bytes,
//! mutated in place record by record, enriched as a whole and encoded at the
//! end. Nothing is handed to the file store until every record has been
//! computed and the artifact encoded. The artifact is uploaded before any
//! record reaches the plan sink, so a failed upload leaves the sink untouched.

use std::collections::BTreeMap;

use log::{debug, info};
use serde::Serialize;

use crate::{
    adapters::FileParser,
    collaborators::{
        CensusService, ComputedRecord, FileStore, LocaleService, PlanSink, RequestContext,
    },
    document::{CellValue, Document, DocumentFormat},
    engine::{CalculationEngine, Record},
    enrichment::{self, FacilityColumn, LocaleTable, SectionFilter},
    error::{EstimationError, Result},
    plan::{InputFileType, PlanConfiguration},
    resolver,
    settings::EstimationSettings,
};

/// Collaborators and settings for one run.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub context: &'a RequestContext,
    pub file_store: &'a dyn FileStore,
    pub locale: &'a dyn LocaleService,
    pub census: Option<&'a dyn CensusService>,
    pub sink: &'a dyn PlanSink,
    pub settings: &'a EstimationSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimationOutcome {
    pub input_file: String,
    /// File store reference of the enriched artifact.
    pub output_file: String,
    pub input_type: InputFileType,
    pub records_computed: usize,
    /// Sections present in the output, in document order.
    pub sections: Vec<String>,
}

/// A decoded and validated input, ready for computation.
#[derive(Debug)]
pub struct PreparedRun {
    pub engine: CalculationEngine,
    pub document: Document,
    pub locale: LocaleTable,
}

impl PreparedRun {
    pub fn section_names(&self) -> Vec<String> {
        self.document
            .sections
            .iter()
            .map(|section| section.name.clone())
            .collect()
    }
}

/// Builds the engine, fetches and decodes the input, drops disallowed
/// sections and validates every remaining header row. No record is
/// computed. Plan problems surface before the file store is contacted.
pub fn prepare<P: FileParser + ?Sized>(
    parser: &P,
    services: &Services<'_>,
    plan: &PlanConfiguration,
    file_store_id: &str,
) -> Result<PreparedRun> {
    let mapping = resolver::resolve_for_file(plan, file_store_id);
    let engine = CalculationEngine::new(plan, mapping, services.settings.numeric_policy())?;
    facility_boundary_column(services.settings, &engine)?;
    debug!(
        "Operation chain of {} step(s) validated against {} mapped column(s)",
        engine.operations().len(),
        engine.mapping().len()
    );

    let tenant_id = services.context.tenant_id.as_str();
    let bytes = services.file_store.fetch(tenant_id, file_store_id)?;
    if bytes.is_empty() {
        return Err(EstimationError::EmptyFile {
            file: file_store_id.to_string(),
        });
    }
    info!(
        "Fetched {} byte(s) for {} file '{}'",
        bytes.len(),
        parser.input_type(),
        file_store_id
    );

    let locale = LocaleTable::from_messages(services.locale.resolve_messages(services.context)?);
    let mut document = parser.decode(file_store_id, &bytes)?;

    let filter = match document.format {
        DocumentFormat::Workbook => SectionFilter::from_codes(
            &services.settings.allowed_section_codes,
            &services.settings.excluded_section_codes,
            &locale,
        ),
        DocumentFormat::FeatureCollection => SectionFilter::allow_all(),
    };
    let removed = enrichment::filter_sections(&mut document, &filter);
    if document.sections.is_empty() || document.record_count() == 0 {
        return Err(EstimationError::EmptyFile {
            file: file_store_id.to_string(),
        });
    }

    for section in &document.sections {
        let blank_header = section.headers.iter().all(|header| header.trim().is_empty());
        if blank_header {
            if section.rows.iter().all(|row| row.is_empty()) {
                debug!("Section '{}' is blank; carried through untouched", section.name);
                continue;
            }
            return Err(EstimationError::EmptyHeader {
                section: section.name.clone(),
            });
        }
        resolver::validate(&section.headers, engine.mapping(), file_store_id)?;
    }
    info!(
        "Decoded {} section(s) with {} record(s) from '{}' ({} section(s) filtered out)",
        document.sections.len(),
        document.record_count(),
        file_store_id,
        removed
    );

    Ok(PreparedRun {
        engine,
        document,
        locale,
    })
}

/// Evaluates every non-empty record and writes its outputs into the
/// document. Returns the computed records in document order.
pub fn compute(
    engine: &CalculationEngine,
    document: &mut Document,
) -> Result<Vec<ComputedRecord>> {
    let mut computed = Vec::new();
    for section in &mut document.sections {
        for ordinal in 0..section.rows.len() {
            if section.rows[ordinal].is_empty() {
                debug!("Skipping empty record {}#{}", section.name, ordinal + 1);
                continue;
            }
            let (results, mapped_values) = {
                let record = Record::new(
                    format!("{}#{}", section.name, ordinal + 1),
                    &section.headers,
                    &section.rows[ordinal].cells,
                );
                let results = engine.evaluate(&record)?;
                let mapped_values = engine
                    .mapping()
                    .iter()
                    .filter_map(|(canonical, column)| {
                        record
                            .get(column)
                            .map(|cell| (canonical.to_string(), cell.as_display()))
                    })
                    .collect::<BTreeMap<_, _>>();
                (results, mapped_values)
            };
            for value in results.iter() {
                let column = section.output_column(&value.output);
                section.set_cell(ordinal, column, CellValue::Decimal(value.value));
            }
            computed.push(ComputedRecord {
                section: section.name.clone(),
                ordinal,
                mapped_values,
                results,
            });
        }
    }
    Ok(computed)
}

/// Source column holding boundary codes, or `None` when facility assignment
/// is disabled. Enabling it without a mapping for the boundary key is a plan
/// error.
fn facility_boundary_column<'e>(
    settings: &EstimationSettings,
    engine: &'e CalculationEngine,
) -> Result<Option<&'e str>> {
    if !settings.assign_facilities {
        return Ok(None);
    }
    match engine.mapping().column_for(&settings.boundary_code_key) {
        Some(column) => Ok(Some(column)),
        None => Err(EstimationError::InvalidPlan(format!(
            "facility assignment needs a mapping to '{}'",
            settings.boundary_code_key
        ))),
    }
}

fn missing_census() -> EstimationError {
    EstimationError::collaborator(
        "census",
        "facility assignment is enabled but no census service is configured",
    )
}

/// Localizes headers, then appends the assigned-facility column when
/// enabled. An enabled assignment without a census service fails.
pub fn enrich(
    document: &mut Document,
    services: &Services<'_>,
    engine: &CalculationEngine,
    locale: &LocaleTable,
    file_store_id: &str,
) -> Result<()> {
    enrichment::localize_document(document, locale);

    let settings = services.settings;
    let Some(boundary_column) = facility_boundary_column(settings, engine)? else {
        return Ok(());
    };
    let census = services.census.ok_or_else(missing_census)?;
    let column = FacilityColumn {
        file: file_store_id,
        boundary_column,
        header: locale.display(&settings.facility_header_code),
        name_field: &settings.facility_name_field,
    };
    let assigned = enrichment::assign_facilities(document, census, services.context, &column)?;
    info!("Assigned facilities to {} record(s)", assigned);
    Ok(())
}

/// Runs the whole pipeline for one input file.
pub fn run<P: FileParser + ?Sized>(
    parser: &P,
    services: &Services<'_>,
    plan: &PlanConfiguration,
    file_store_id: &str,
) -> Result<EstimationOutcome> {
    if services.settings.assign_facilities && services.census.is_none() {
        return Err(missing_census());
    }
    let PreparedRun {
        engine,
        mut document,
        locale,
    } = prepare(parser, services, plan, file_store_id)?;

    let computed = compute(&engine, &mut document)?;
    info!(
        "Computed {} record(s) across {} operation(s)",
        computed.len(),
        engine.operations().len()
    );

    enrich(&mut document, services, &engine, &locale, file_store_id)?;
    let bytes = parser.encode(&document)?;

    let output_file = services
        .file_store
        .store(&bytes, &services.context.tenant_id)?;
    info!(
        "Stored {} byte(s) of estimation output as '{}'",
        bytes.len(),
        output_file
    );
    for record in &computed {
        services.sink.persist(services.context, plan, record)?;
    }

    Ok(EstimationOutcome {
        input_file: file_store_id.to_string(),
        output_file,
        input_type: parser.input_type(),
        records_computed: computed.len(),
        sections: document
            .sections
            .iter()
            .map(|section| section.name.clone())
            .collect(),
    })
}
