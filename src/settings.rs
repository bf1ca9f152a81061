use std::path::Path;

use anyhow::{Context, Result, ensure};
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};

use crate::{config_io, engine::NumericPolicy};

pub const DEFAULT_BOUNDARY_CODE_KEY: &str = "HCM_ADMIN_CONSOLE_BOUNDARY_CODE";
pub const DEFAULT_FACILITY_HEADER_CODE: &str = "HCM_MICROPLAN_SERVING_FACILITY";
pub const DEFAULT_FACILITY_NAME_FIELD: &str = "facilityName";
pub const README_SECTION_CODE: &str = "HCM_README_SHEETNAME";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    #[default]
    HalfUp,
    HalfEven,
    Down,
    Up,
}

impl RoundingMode {
    pub fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingMode::Down => RoundingStrategy::ToZero,
            RoundingMode::Up => RoundingStrategy::AwayFromZero,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationSettings {
    pub scale: u32,
    pub rounding: RoundingMode,
    /// Canonical name whose mapping locates the boundary code column.
    pub boundary_code_key: String,
    pub facility_header_code: String,
    /// Key inside a census record's additional details holding the facility name.
    pub facility_name_field: String,
    pub allowed_section_codes: Vec<String>,
    pub excluded_section_codes: Vec<String>,
    pub assign_facilities: bool,
}

impl Default for EstimationSettings {
    fn default() -> Self {
        EstimationSettings {
            scale: 2,
            rounding: RoundingMode::default(),
            boundary_code_key: DEFAULT_BOUNDARY_CODE_KEY.to_string(),
            facility_header_code: DEFAULT_FACILITY_HEADER_CODE.to_string(),
            facility_name_field: DEFAULT_FACILITY_NAME_FIELD.to_string(),
            allowed_section_codes: Vec::new(),
            excluded_section_codes: vec![README_SECTION_CODE.to_string()],
            assign_facilities: false,
        }
    }
}

impl EstimationSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let settings: EstimationSettings = config_io::load_from_path(path)
            .with_context(|| format!("Loading estimation settings from {path:?}"))?;
        settings.ensure_valid()?;
        Ok(settings)
    }

    pub fn ensure_valid(&self) -> Result<()> {
        ensure!(
            self.scale <= 28,
            "Result scale must be <= 28 (got {})",
            self.scale
        );
        ensure!(
            !self.boundary_code_key.trim().is_empty(),
            "boundary_code_key must not be empty"
        );
        Ok(())
    }

    pub fn numeric_policy(&self) -> NumericPolicy {
        NumericPolicy {
            scale: self.scale,
            rounding: self.rounding.strategy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let settings: EstimationSettings =
            serde_yaml::from_str("scale: 4\nrounding: half_even\nassign_facilities: true\n").unwrap();
        assert_eq!(settings.scale, 4);
        assert_eq!(settings.rounding, RoundingMode::HalfEven);
        assert!(settings.assign_facilities);
        assert_eq!(settings.boundary_code_key, DEFAULT_BOUNDARY_CODE_KEY);
        assert_eq!(settings.excluded_section_codes, vec![README_SECTION_CODE]);
        assert_eq!(
            settings.numeric_policy().rounding,
            RoundingStrategy::MidpointNearestEven
        );
    }

    #[test]
    fn oversized_scale_fails_validation() {
        let settings = EstimationSettings {
            scale: 30,
            ..Default::default()
        };
        assert!(settings.ensure_valid().is_err());
    }
}
