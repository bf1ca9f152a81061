use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

fn read_to_string(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    Ok(buf)
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Loads a JSON (`.json`) or YAML (anything else) document. YAML is a
/// superset of JSON, so either syntax works for YAML paths.
pub fn load_from_path<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = read_to_string(path)?;
    if is_json(path) {
        serde_json::from_str(&raw).with_context(|| format!("Parsing JSON from {path:?}"))
    } else {
        serde_yaml::from_str(&raw).with_context(|| format!("Parsing YAML from {path:?}"))
    }
}

pub fn save_to_path<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let serialized = if is_json(path) {
        serde_json::to_string_pretty(data)?
    } else {
        serde_yaml::to_string(data)?
    };
    let mut file = File::create(path).with_context(|| format!("Creating file {path:?}"))?;
    file.write_all(serialized.as_bytes())?;
    file.flush()?;
    Ok(())
}
