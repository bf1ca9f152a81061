//! Zipped shapefile input.
//!
//! The upload is a zip archive holding at least a `.shp` and a `.dbf` member.
//! Features are converted to the same shape the GeoJSON adapter produces
//! (attribute table as properties, geometry as a GeoJSON object) and the
//! enriched document is written out as a GeoJSON FeatureCollection.

use std::io::{Cursor, Read};

use log::debug;
use serde_json::{Map, Value as JsonValue, json};
use ::shapefile::dbase::{self, FieldValue};
use ::shapefile::{Point, PolygonRing, Shape, ShapeReader};
use zip::ZipArchive;

use super::{FileParser, geojson};
use crate::{
    document::{Document, Section},
    error::{EstimationError, Result},
    plan::InputFileType,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ShapefileParser;

impl FileParser for ShapefileParser {
    fn input_type(&self) -> InputFileType {
        InputFileType::Shapefile
    }

    fn decode(&self, file: &str, bytes: &[u8]) -> Result<Document> {
        if bytes.is_empty() {
            return Err(EstimationError::EmptyFile {
                file: file.to_string(),
            });
        }
        let bundle = ShapefileBundle::from_zip(file, bytes)?;
        let section = bundle.into_section(file)?;
        debug!(
            "Shapefile '{}' decoded with {} attribute(s) across {} feature(s)",
            file,
            section.width(),
            section.rows.len()
        );
        let mut members = Map::new();
        members.insert("type".into(), JsonValue::String("FeatureCollection".into()));
        Ok(Document::feature_collection(section, members))
    }

    fn encode(&self, document: &Document) -> Result<Vec<u8>> {
        geojson::GeoJsonParser.encode(document)
    }
}

#[derive(Debug)]
struct ShapefileBundle {
    shp: Vec<u8>,
    dbf: Vec<u8>,
}

impl ShapefileBundle {
    fn from_zip(file: &str, bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|err| EstimationError::unreadable(file, err))?;
        let mut shp = None;
        let mut dbf = None;
        for idx in 0..archive.len() {
            let mut entry = archive
                .by_index(idx)
                .map_err(|err| EstimationError::unreadable(file, err))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_ascii_lowercase();
            let slot = if name.ends_with(".shp") {
                &mut shp
            } else if name.ends_with(".dbf") {
                &mut dbf
            } else {
                continue;
            };
            if slot.is_some() {
                continue;
            }
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|err| EstimationError::unreadable(file, err))?;
            *slot = Some(contents);
        }
        match (shp, dbf) {
            (Some(shp), Some(dbf)) => Ok(ShapefileBundle { shp, dbf }),
            (None, _) => Err(EstimationError::unreadable(file, "archive has no .shp member")),
            (_, None) => Err(EstimationError::unreadable(file, "archive has no .dbf member")),
        }
    }

    fn into_section(self, file: &str) -> Result<Section> {
        let shape_reader = ShapeReader::new(Cursor::new(self.shp))
            .map_err(|err| EstimationError::unreadable(file, err))?;
        let table = dbase::Reader::new(Cursor::new(self.dbf))
            .map_err(|err| EstimationError::unreadable(file, err))?;
        let field_names = table
            .fields()
            .iter()
            .map(|field| field.name().to_string())
            .collect::<Vec<_>>();
        let mut reader = ::shapefile::Reader::new(shape_reader, table);

        let mut features = Vec::new();
        for item in reader.iter_shapes_and_records() {
            let (shape, record) = item.map_err(|err| EstimationError::unreadable(file, err))?;
            let mut properties = Map::new();
            for name in &field_names {
                if let Some(value) = record.get(name) {
                    properties.insert(name.clone(), field_to_json(value));
                }
            }
            let mut members = Map::new();
            members.insert("type".into(), JsonValue::String("Feature".into()));
            members.insert("properties".into(), JsonValue::Null);
            members.insert("geometry".into(), shape_to_geometry(&shape));
            features.push((members, properties));
        }
        Ok(geojson::section_from_features(file, features))
    }
}

fn field_to_json(value: &FieldValue) -> JsonValue {
    match value {
        FieldValue::Character(text) => text
            .as_ref()
            .map(|text| JsonValue::String(text.trim().to_string()))
            .unwrap_or(JsonValue::Null),
        FieldValue::Numeric(number) => number.map(number_to_json).unwrap_or(JsonValue::Null),
        FieldValue::Float(number) => number
            .map(|value| number_to_json(f64::from(value)))
            .unwrap_or(JsonValue::Null),
        FieldValue::Integer(number) => JsonValue::from(*number),
        FieldValue::Double(number) | FieldValue::Currency(number) => number_to_json(*number),
        FieldValue::Logical(flag) => flag.map(JsonValue::Bool).unwrap_or(JsonValue::Null),
        FieldValue::Memo(text) => JsonValue::String(text.clone()),
        _ => JsonValue::Null,
    }
}

/// Whole numbers become JSON integers so numeric attribute columns read back
/// the way a GeoJSON export of the same table would.
fn number_to_json(value: f64) -> JsonValue {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        JsonValue::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

fn coordinates(points: &[Point]) -> JsonValue {
    JsonValue::Array(points.iter().map(|point| json!([point.x, point.y])).collect())
}

fn shape_to_geometry(shape: &Shape) -> JsonValue {
    match shape {
        Shape::Point(point) => json!({"type": "Point", "coordinates": [point.x, point.y]}),
        Shape::PointM(point) => json!({"type": "Point", "coordinates": [point.x, point.y]}),
        Shape::PointZ(point) => {
            json!({"type": "Point", "coordinates": [point.x, point.y, point.z]})
        }
        Shape::Multipoint(multipoint) => {
            json!({"type": "MultiPoint", "coordinates": coordinates(multipoint.points())})
        }
        Shape::Polyline(polyline) => {
            let parts = polyline
                .parts()
                .iter()
                .map(|part| coordinates(part))
                .collect::<Vec<_>>();
            if parts.len() == 1 {
                json!({"type": "LineString", "coordinates": parts[0]})
            } else {
                json!({"type": "MultiLineString", "coordinates": parts})
            }
        }
        Shape::Polygon(polygon) => {
            let mut polygons: Vec<Vec<JsonValue>> = Vec::new();
            for ring in polygon.rings() {
                match ring {
                    PolygonRing::Outer(points) => polygons.push(vec![coordinates(points)]),
                    PolygonRing::Inner(points) => match polygons.last_mut() {
                        Some(current) => current.push(coordinates(points)),
                        None => polygons.push(vec![coordinates(points)]),
                    },
                }
            }
            if polygons.len() == 1 {
                json!({"type": "Polygon", "coordinates": polygons[0]})
            } else {
                json!({"type": "MultiPolygon", "coordinates": polygons})
            }
        }
        Shape::NullShape => JsonValue::Null,
        other => {
            debug!("Unsupported shape type {:?}; geometry dropped", other.shapetype());
            JsonValue::Null
        }
    }
}
