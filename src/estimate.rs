//! Estimation driver.
//!
//! Picks the plan's input file, maps its input-type tag to an adapter and
//! hands the run to it. An unknown tag or a plan without an active file is
//! rejected before any collaborator is called.

use log::info;

use crate::{
    adapters::{FileParser, Parser},
    engine::{CalculationEngine, NumericPolicy},
    error::Result,
    pipeline::{self, EstimationOutcome, PreparedRun, Services},
    plan::PlanConfiguration,
    resolver,
};

/// Adapter selected for the plan's primary file.
fn select(plan: &PlanConfiguration) -> Result<(Parser, &str)> {
    let file = plan.primary_file()?;
    let parser = Parser::for_input_type(file.input_type()?);
    Ok((parser, file.filestore_id.as_str()))
}

/// Runs the estimation for `plan` and returns where the enriched output
/// was stored.
pub fn estimate_resources(
    services: &Services<'_>,
    plan: &PlanConfiguration,
) -> Result<EstimationOutcome> {
    let (parser, file_store_id) = select(plan)?;
    info!(
        "Estimating resources for plan '{}' from {} file '{}'",
        plan.id,
        parser.input_type(),
        file_store_id
    );
    parser.parse(services, plan, file_store_id)
}

/// Checks the plan on its own: an active file with a known input type,
/// unique assumption keys and an operation chain without forward or
/// unresolvable references.
pub fn validate_plan(plan: &PlanConfiguration, policy: NumericPolicy) -> Result<CalculationEngine> {
    let (_, file_store_id) = select(plan)?;
    CalculationEngine::new(plan, resolver::resolve_for_file(plan, file_store_id), policy)
}

/// Validates `plan` against its input file without computing anything or
/// storing output.
pub fn validate_against_input(
    services: &Services<'_>,
    plan: &PlanConfiguration,
) -> Result<PreparedRun> {
    let (parser, file_store_id) = select(plan)?;
    pipeline::prepare(&parser, services, plan, file_store_id)
}
