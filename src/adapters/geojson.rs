//! GeoJSON FeatureCollection input and output.
//!
//! Feature properties become the section's columns, in first-seen order
//! across all features. A property a feature does not carry is held as
//! [`CellValue::Empty`] and omitted again on output, so original features
//! round-trip unchanged apart from the appended properties.

use log::debug;
use serde_json::{Map, Value as JsonValue};

use super::FileParser;
use crate::{
    document::{CellValue, Document, DocumentFormat, Row, Section},
    error::{EstimationError, Result},
    plan::InputFileType,
};

const FORMAT: &str = "geojson";
const FEATURES: &str = "features";
const PROPERTIES: &str = "properties";

#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonParser;

impl FileParser for GeoJsonParser {
    fn input_type(&self) -> InputFileType {
        InputFileType::GeoJson
    }

    fn decode(&self, file: &str, bytes: &[u8]) -> Result<Document> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(EstimationError::EmptyFile {
                file: file.to_string(),
            });
        }
        let root: JsonValue =
            serde_json::from_slice(bytes).map_err(|err| EstimationError::unreadable(file, err))?;
        let JsonValue::Object(mut members) = root else {
            return Err(EstimationError::unreadable(file, "top-level value is not an object"));
        };
        let features = match members.remove(FEATURES) {
            Some(JsonValue::Array(features)) => features,
            _ => {
                return Err(EstimationError::unreadable(
                    file,
                    "expected a FeatureCollection with a 'features' array",
                ));
            }
        };

        let mut feature_members = Vec::with_capacity(features.len());
        for (idx, feature) in features.into_iter().enumerate() {
            let JsonValue::Object(mut feature) = feature else {
                return Err(EstimationError::unreadable(
                    file,
                    format!("feature {idx} is not an object"),
                ));
            };
            let properties = match feature.get_mut(PROPERTIES).map(JsonValue::take) {
                Some(JsonValue::Object(properties)) => properties,
                Some(JsonValue::Null) | None => Map::new(),
                Some(_) => {
                    return Err(EstimationError::unreadable(
                        file,
                        format!("feature {idx} has non-object properties"),
                    ));
                }
            };
            feature_members.push((feature, properties));
        }

        let section = section_from_features(file, feature_members);
        debug!(
            "Feature collection '{}' decoded with {} propert(ies) across {} feature(s)",
            file,
            section.width(),
            section.rows.len()
        );
        Ok(Document::feature_collection(section, members))
    }

    fn encode(&self, document: &Document) -> Result<Vec<u8>> {
        let value = to_feature_collection(document)?;
        serde_json::to_vec(&value).map_err(|err| EstimationError::encode(FORMAT, err))
    }
}

/// Builds a section from `(feature members, properties)` pairs. Shared with
/// the shapefile adapter, which produces the same shape.
pub(crate) fn section_from_features(
    name: &str,
    features: Vec<(Map<String, JsonValue>, Map<String, JsonValue>)>,
) -> Section {
    let mut headers: Vec<String> = Vec::new();
    for (_, properties) in &features {
        for key in properties.keys() {
            if !headers.iter().any(|header| header == key) {
                headers.push(key.clone());
            }
        }
    }
    let rows = features
        .into_iter()
        .map(|(members, properties)| Row {
            cells: headers
                .iter()
                .map(|header| {
                    properties
                        .get(header)
                        .map(CellValue::from_json)
                        .unwrap_or(CellValue::Empty)
                })
                .collect(),
            members,
        })
        .collect();
    Section::new(name, headers, rows)
}

pub(crate) fn to_feature_collection(document: &Document) -> Result<JsonValue> {
    if document.format != DocumentFormat::FeatureCollection {
        return Err(EstimationError::encode(
            FORMAT,
            "document is not a feature collection",
        ));
    }
    let mut root = Map::new();
    if !document.members.contains_key("type") {
        root.insert("type".into(), JsonValue::String("FeatureCollection".into()));
    }
    for (key, value) in &document.members {
        root.insert(key.clone(), value.clone());
    }
    let features = document
        .sections
        .iter()
        .flat_map(|section| section.rows.iter().map(move |row| feature_json(section, row)))
        .collect::<Vec<_>>();
    root.insert(FEATURES.into(), JsonValue::Array(features));
    Ok(JsonValue::Object(root))
}

fn feature_json(section: &Section, row: &Row) -> JsonValue {
    let mut properties = Map::new();
    for (idx, header) in section.headers.iter().enumerate() {
        let cell = row.cell(idx);
        if matches!(cell, CellValue::Empty) {
            continue;
        }
        properties.insert(header.clone(), cell.to_json());
    }
    let mut feature = row.members.clone();
    if !feature.contains_key("type") {
        feature.insert("type".into(), JsonValue::String("Feature".into()));
    }
    feature.insert(PROPERTIES.into(), JsonValue::Object(properties));
    if !feature.contains_key("geometry") {
        feature.insert("geometry".into(), JsonValue::Null);
    }
    JsonValue::Object(feature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": "FeatureCollection",
            "name": "districts",
            "features": [
                {"type": "Feature", "id": 1, "properties": {"Code": "B1", "HH": 100}, "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}},
                {"type": "Feature", "id": 2, "properties": {"Code": "B2", "HH": 20, "Note": null}, "geometry": null}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn decodes_properties_as_columns() {
        let document = GeoJsonParser.decode("store-2", &sample()).unwrap();
        let section = &document.sections[0];
        assert_eq!(section.headers, vec!["Code", "HH", "Note"]);
        assert_eq!(section.rows[0].cell(1), &CellValue::Integer(100));
        assert_eq!(section.rows[0].cell(2), &CellValue::Empty);
        assert_eq!(section.rows[1].cell(2), &CellValue::Null);
        assert_eq!(document.members.get("name"), Some(&json!("districts")));
    }

    #[test]
    fn encode_preserves_original_features_and_appends_outputs() {
        let mut document = GeoJsonParser.decode("store-2", &sample()).unwrap();
        let section = &mut document.sections[0];
        let column = section.output_column("Population");
        section.set_cell(0, column, CellValue::Decimal(rust_decimal::Decimal::new(4500, 1)));
        let bytes = GeoJsonParser.encode(&document).unwrap();
        let value: JsonValue = serde_json::from_slice(&bytes).unwrap();

        let first = &value["features"][0];
        assert_eq!(first["id"], json!(1));
        assert_eq!(first["geometry"]["type"], json!("Point"));
        assert_eq!(first["properties"]["HH"], json!(100));
        assert_eq!(first["properties"]["Population"], json!(450.0));
        assert!(first["properties"].get("Note").is_none());
        assert_eq!(value["features"][1]["properties"]["Note"], JsonValue::Null);
        assert_eq!(value["name"], json!("districts"));
    }

    #[test]
    fn rejects_non_collections() {
        let err = GeoJsonParser
            .decode("store-2", br#"{"type": "Feature"}"#)
            .unwrap_err();
        assert!(matches!(err, EstimationError::UnreadableFile { .. }));
        let err = GeoJsonParser.decode("store-2", b"  ").unwrap_err();
        assert!(matches!(err, EstimationError::EmptyFile { .. }));
    }
}
