//! Format adapters.
//!
//! Each adapter turns raw file bytes into a [`Document`] and writes a
//! document back out in its output container format. The shared
//! [`FileParser::parse`] drives the full fetch, validate, compute, enrich and
//! persist pipeline around those two format-specific steps.

pub mod excel;
pub mod geojson;
pub mod shapefile;

use crate::{
    document::Document,
    error::Result,
    pipeline::{self, EstimationOutcome, Services},
    plan::{InputFileType, PlanConfiguration},
};

pub use self::{excel::ExcelParser, geojson::GeoJsonParser, shapefile::ShapefileParser};

pub trait FileParser {
    fn input_type(&self) -> InputFileType;

    /// Decodes raw bytes. `file` names the input in errors.
    fn decode(&self, file: &str, bytes: &[u8]) -> Result<Document>;

    fn encode(&self, document: &Document) -> Result<Vec<u8>>;

    fn parse(
        &self,
        services: &Services<'_>,
        plan: &PlanConfiguration,
        file_store_id: &str,
    ) -> Result<EstimationOutcome> {
        pipeline::run(self, services, plan, file_store_id)
    }
}

/// One parser per input-type tag.
#[derive(Debug, Clone, Copy)]
pub enum Parser {
    Excel(ExcelParser),
    GeoJson(GeoJsonParser),
    Shapefile(ShapefileParser),
}

impl Parser {
    pub fn for_input_type(input_type: InputFileType) -> Self {
        match input_type {
            InputFileType::Excel => Parser::Excel(ExcelParser),
            InputFileType::GeoJson => Parser::GeoJson(GeoJsonParser),
            InputFileType::Shapefile => Parser::Shapefile(ShapefileParser),
        }
    }

    fn inner(&self) -> &dyn FileParser {
        match self {
            Parser::Excel(parser) => parser,
            Parser::GeoJson(parser) => parser,
            Parser::Shapefile(parser) => parser,
        }
    }
}

impl FileParser for Parser {
    fn input_type(&self) -> InputFileType {
        self.inner().input_type()
    }

    fn decode(&self, file: &str, bytes: &[u8]) -> Result<Document> {
        self.inner().decode(file, bytes)
    }

    fn encode(&self, document: &Document) -> Result<Vec<u8>> {
        self.inner().encode(document)
    }
}
