pub mod adapters;
pub mod cli;
pub mod collaborators;
pub mod config_io;
pub mod document;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod estimate;
pub mod pipeline;
pub mod plan;
pub mod resolver;
pub mod settings;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    collaborators::{
        CensusService, CollectingPlanSink, LocalFileStore, RequestContext, StaticCensus,
        StaticLocale,
    },
    pipeline::Services,
    plan::PlanConfiguration,
    settings::EstimationSettings,
};

pub use crate::{
    error::{ErrorCategory, EstimationError},
    estimate::estimate_resources,
    pipeline::EstimationOutcome,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("resource_estimator", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Estimate(args) => handle_estimate(&args),
        Commands::Validate(args) => handle_validate(&args),
    }
}

fn load_settings(path: Option<&Path>) -> Result<EstimationSettings> {
    match path {
        Some(path) => EstimationSettings::load(path),
        None => Ok(EstimationSettings::default()),
    }
}

fn load_locale(path: Option<&Path>) -> Result<StaticLocale> {
    match path {
        Some(path) => StaticLocale::load(path),
        None => Ok(StaticLocale::default()),
    }
}

fn request_context(plan: &PlanConfiguration, tenant: Option<&str>, locale: &str) -> RequestContext {
    let tenant = tenant.unwrap_or(&plan.tenant_id);
    RequestContext::new(tenant).with_locale(locale)
}

fn handle_estimate(args: &cli::EstimateArgs) -> Result<()> {
    let plan = PlanConfiguration::load(&args.plan)?;
    let settings = load_settings(args.settings.as_deref())?;
    let locale = load_locale(args.locale.as_deref())?;
    let census = args
        .census
        .as_deref()
        .map(StaticCensus::load)
        .transpose()?;
    let context = request_context(&plan, args.tenant.as_deref(), &args.locale_code);
    let store = LocalFileStore::new(&args.store);
    let sink = CollectingPlanSink::new();
    debug!(
        "Run {} for tenant '{}' in locale '{}'",
        context.correlation_id, context.tenant_id, context.locale
    );

    let services = Services {
        context: &context,
        file_store: &store,
        locale: &locale,
        census: census.as_ref().map(|census| census as &dyn CensusService),
        sink: &sink,
        settings: &settings,
    };
    let outcome = estimate::estimate_resources(&services, &plan)
        .with_context(|| format!("Estimating resources for plan {:?}", args.plan))?;

    if let Some(path) = &args.records {
        let records = sink.records();
        config_io::save_to_path(path, &records)
            .with_context(|| format!("Writing computed records to {path:?}"))?;
        info!("{} computed record(s) written to {:?}", records.len(), path);
    }
    info!(
        "Plan '{}': {} record(s) computed from '{}' across {} section(s)",
        plan.id,
        outcome.records_computed,
        outcome.input_file,
        outcome.sections.len()
    );
    println!("{}", outcome.output_file);
    Ok(())
}

fn handle_validate(args: &cli::ValidateArgs) -> Result<()> {
    let plan = PlanConfiguration::load(&args.plan)?;
    let settings = load_settings(args.settings.as_deref())?;
    let engine = estimate::validate_plan(&plan, settings.numeric_policy())
        .with_context(|| format!("Validating plan {:?}", args.plan))?;
    info!(
        "Plan '{}' declares {} active operation(s) over {} mapped column(s)",
        plan.id,
        engine.operations().len(),
        engine.mapping().len()
    );

    if let Some(root) = &args.store {
        let locale = load_locale(args.locale.as_deref())?;
        let context = request_context(&plan, args.tenant.as_deref(), &args.locale_code);
        let store = LocalFileStore::new(root);
        let sink = collaborators::NoopPlanSink;
        let services = Services {
            context: &context,
            file_store: &store,
            locale: &locale,
            census: None,
            sink: &sink,
            settings: &settings,
        };
        let prepared = estimate::validate_against_input(&services, &plan)
            .with_context(|| format!("Validating input of plan {:?}", args.plan))?;
        info!(
            "Input headers validated for {} section(s) holding {} record(s)",
            prepared.document.sections.len(),
            prepared.document.record_count()
        );
        println!(
            "Plan '{}' is valid; sections: {}",
            plan.id,
            prepared.section_names().join(", ")
        );
    } else {
        println!("Plan '{}' is valid", plan.id);
    }
    Ok(())
}
