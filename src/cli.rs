use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::collaborators::DEFAULT_LOCALE;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Compute per-record resource estimates from a plan configuration",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the plan's operation chain over its input file and store the enriched output
    Estimate(EstimateArgs),
    /// Check a plan configuration, and optionally its input file headers, without computing
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct EstimateArgs {
    /// Plan configuration file (JSON or YAML)
    #[arg(short, long)]
    pub plan: PathBuf,
    /// Root directory of the local file store (files live under <root>/<tenant>/<id>)
    #[arg(short, long)]
    pub store: PathBuf,
    /// Estimation settings file (YAML or JSON)
    #[arg(long)]
    pub settings: Option<PathBuf>,
    /// Locale message table used for header localization and section filtering
    #[arg(long)]
    pub locale: Option<PathBuf>,
    /// Locale requested from the message table
    #[arg(long = "locale-code", default_value = DEFAULT_LOCALE)]
    pub locale_code: String,
    /// Census records used to assign serving facilities
    #[arg(long)]
    pub census: Option<PathBuf>,
    /// Tenant to act for (defaults to the plan's tenant)
    #[arg(long)]
    pub tenant: Option<String>,
    /// Write the computed records handed to the plan sink to this file (JSON or YAML)
    #[arg(long)]
    pub records: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Plan configuration file (JSON or YAML)
    #[arg(short, long)]
    pub plan: PathBuf,
    /// Local file store root; when given, mapped columns are checked against the input headers
    #[arg(short, long)]
    pub store: Option<PathBuf>,
    /// Estimation settings file (YAML or JSON)
    #[arg(long)]
    pub settings: Option<PathBuf>,
    /// Locale message table used for section filtering
    #[arg(long)]
    pub locale: Option<PathBuf>,
    /// Locale requested from the message table
    #[arg(long = "locale-code", default_value = DEFAULT_LOCALE)]
    pub locale_code: String,
    /// Tenant to act for (defaults to the plan's tenant)
    #[arg(long)]
    pub tenant: Option<String>,
}
