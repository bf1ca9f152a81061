#![allow(dead_code)]

use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use resource_estimator::{
    collaborators::{
        CensusRecord, CensusService, CollectingPlanSink, LocaleMessage, MemoryFileStore,
        RequestContext, StaticCensus, StaticLocale,
    },
    document::{CellValue, Document},
    error::Result,
    estimate,
    pipeline::{EstimationOutcome, Services},
    plan::{Assumption, Operation, Operator, PlanConfiguration, PlanFile, ResourceMapping},
    settings::EstimationSettings,
};
use rust_decimal::Decimal;
use rust_xlsxwriter::Workbook;
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};
use zip::write::{SimpleFileOptions, ZipWriter};

pub const TENANT: &str = "mz";
pub const INPUT_ID: &str = "store-1";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }
}

pub fn assumption(key: &str, value: Decimal) -> Assumption {
    Assumption {
        id: format!("a-{key}"),
        key: key.to_string(),
        value,
        source: None,
        category: None,
        active: true,
    }
}

pub fn operation(
    id: &str,
    input: &str,
    operator: Operator,
    operand: &str,
    output: &str,
    execution_order: i32,
) -> Operation {
    Operation {
        id: id.to_string(),
        input: input.to_string(),
        operator,
        assumption_value: operand.to_string(),
        output: output.to_string(),
        execution_order,
        source: None,
        category: None,
        active: true,
        show_on_estimation_dashboard: true,
    }
}

pub fn mapping(from: &str, to: &str) -> ResourceMapping {
    ResourceMapping {
        id: format!("m-{to}"),
        filestore_id: INPUT_ID.to_string(),
        mapped_from: from.to_string(),
        mapped_to: to.to_string(),
        active: true,
    }
}

pub fn plan(
    input_file_type: &str,
    assumptions: Vec<Assumption>,
    operations: Vec<Operation>,
    resource_mapping: Vec<ResourceMapping>,
) -> PlanConfiguration {
    PlanConfiguration {
        id: "plan-1".into(),
        tenant_id: TENANT.into(),
        name: "Bednet campaign".into(),
        campaign_id: "camp-1".into(),
        status: "DRAFT".into(),
        files: vec![PlanFile {
            id: "file-1".into(),
            filestore_id: INPUT_ID.into(),
            input_file_type: input_file_type.into(),
            template_identifier: "Population".into(),
            active: true,
        }],
        assumptions,
        operations,
        resource_mapping,
    }
}

/// HouseholdCount x 4.5 -> EstimatedPopulation, then / 1.8 -> BedNets.
pub fn population_plan(input_file_type: &str) -> PlanConfiguration {
    plan(
        input_file_type,
        vec![
            assumption("PopulationPerHousehold", Decimal::new(45, 1)),
            assumption("PeoplePerNet", Decimal::new(18, 1)),
        ],
        vec![
            operation(
                "op1",
                "HouseholdCount",
                Operator::Multiply,
                "PopulationPerHousehold",
                "EstimatedPopulation",
                1,
            ),
            operation(
                "op2",
                "EstimatedPopulation",
                Operator::Divide,
                "PeoplePerNet",
                "BedNets",
                2,
            ),
        ],
        vec![
            mapping("HH", "HouseholdCount"),
            mapping("Boundary", "HCM_ADMIN_CONSOLE_BOUNDARY_CODE"),
        ],
    )
}

#[derive(Debug, Clone)]
pub enum Cell {
    Text(&'static str),
    Number(f64),
}

pub struct Sheet {
    pub name: &'static str,
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<Cell>>,
}

pub fn workbook_bytes(sheets: &[Sheet]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet.name).expect("sheet name");
        for (column, header) in sheet.headers.iter().enumerate() {
            worksheet
                .write_string(0, column as u16, *header)
                .expect("write header");
        }
        for (idx, row) in sheet.rows.iter().enumerate() {
            for (column, cell) in row.iter().enumerate() {
                let (row, column) = (idx as u32 + 1, column as u16);
                let written = match cell {
                    Cell::Text(text) => worksheet.write_string(row, column, *text),
                    Cell::Number(value) => worksheet.write_number(row, column, *value),
                };
                written.expect("write cell");
            }
        }
    }
    workbook.save_to_buffer().expect("save workbook")
}

/// A population sheet plus a readme sheet.
pub fn population_workbook(households: &[(&'static str, f64)]) -> Vec<u8> {
    workbook_bytes(&[
        Sheet {
            name: "Population",
            headers: vec!["Boundary", "HH"],
            rows: households
                .iter()
                .map(|(code, hh)| vec![Cell::Text(*code), Cell::Number(*hh)])
                .collect(),
        },
        Sheet {
            name: "Read Me",
            headers: vec!["Instructions"],
            rows: vec![vec![Cell::Text("Fill in one row per boundary")]],
        },
    ])
}

pub fn feature_collection(households: &[(&str, Value)]) -> Vec<u8> {
    let features = households
        .iter()
        .enumerate()
        .map(|(idx, (code, hh))| {
            json!({
                "type": "Feature",
                "id": idx + 1,
                "properties": {"Boundary": code, "HH": hh},
                "geometry": {"type": "Point", "coordinates": [32.5 + idx as f64, -25.9]}
            })
        })
        .collect::<Vec<_>>();
    serde_json::to_vec(&json!({
        "type": "FeatureCollection",
        "name": "districts",
        "features": features
    }))
    .expect("serialize feature collection")
}

/// Zipped point shapefile with `Boundary` and `HH` attributes.
pub fn shapefile_zip(households: &[(&str, f64)]) -> Vec<u8> {
    use shapefile::dbase::{self, FieldValue, TableWriterBuilder};

    let workspace = TestWorkspace::new();
    let shp_path = workspace.path().join("districts.shp");
    {
        let table = TableWriterBuilder::new()
            .add_character_field(dbase::FieldName::try_from("Boundary").expect("field name"), 20)
            .add_numeric_field(dbase::FieldName::try_from("HH").expect("field name"), 10, 0);
        let mut writer = shapefile::Writer::from_path(&shp_path, table).expect("shapefile writer");
        for (idx, (code, hh)) in households.iter().enumerate() {
            let mut record = dbase::Record::default();
            record.insert(
                "Boundary".to_string(),
                FieldValue::Character(Some(code.to_string())),
            );
            record.insert("HH".to_string(), FieldValue::Numeric(Some(*hh)));
            let point = shapefile::Point::new(32.5 + idx as f64, -25.9);
            writer
                .write_shape_and_record(&point, &record)
                .expect("write feature");
        }
    }

    let mut archive = ZipWriter::new(Cursor::new(Vec::new()));
    for extension in ["shp", "shx", "dbf"] {
        let path = shp_path.with_extension(extension);
        let mut contents = Vec::new();
        File::open(&path)
            .and_then(|mut file| file.read_to_end(&mut contents))
            .expect("read shapefile member");
        archive
            .start_file(format!("districts.{extension}"), SimpleFileOptions::default())
            .expect("start zip entry");
        archive.write_all(&contents).expect("write zip entry");
    }
    archive.finish().expect("finish zip").into_inner()
}

/// Collaborators for one in-memory run.
pub struct Harness {
    pub context: RequestContext,
    pub store: MemoryFileStore,
    pub locale: StaticLocale,
    pub census: Option<StaticCensus>,
    pub sink: CollectingPlanSink,
    pub settings: EstimationSettings,
}

impl Harness {
    pub fn with_input(bytes: Vec<u8>) -> Self {
        let store = MemoryFileStore::new();
        store.insert(TENANT, INPUT_ID, bytes);
        Harness {
            context: RequestContext::new(TENANT),
            store,
            locale: StaticLocale::new(vec![LocaleMessage::new(
                "HCM_README_SHEETNAME",
                "Read Me",
            )]),
            census: None,
            sink: CollectingPlanSink::new(),
            settings: EstimationSettings::default(),
        }
    }

    pub fn with_messages(mut self, messages: &[(&str, &str)]) -> Self {
        let mut all = vec![LocaleMessage::new("HCM_README_SHEETNAME", "Read Me")];
        all.extend(
            messages
                .iter()
                .map(|(code, message)| LocaleMessage::new(*code, *message)),
        );
        self.locale = StaticLocale::new(all);
        self
    }

    pub fn with_census(mut self, facilities: &[(&str, &str)]) -> Self {
        self.census = Some(StaticCensus::new(
            facilities
                .iter()
                .map(|(code, facility)| CensusRecord {
                    boundary_code: code.to_string(),
                    additional_details: json!({"facilityName": facility}),
                })
                .collect(),
        ));
        self.settings.assign_facilities = true;
        self
    }

    pub fn services(&self) -> Services<'_> {
        Services {
            context: &self.context,
            file_store: &self.store,
            locale: &self.locale,
            census: self
                .census
                .as_ref()
                .map(|census| census as &dyn CensusService),
            sink: &self.sink,
            settings: &self.settings,
        }
    }

    pub fn run(&self, plan: &PlanConfiguration) -> Result<EstimationOutcome> {
        estimate::estimate_resources(&self.services(), plan)
    }

    pub fn output(&self, outcome: &EstimationOutcome) -> Vec<u8> {
        self.store
            .get(TENANT, &outcome.output_file)
            .expect("output stored")
    }
}

/// Display strings of one column of the first section, by header name.
pub fn column_values(document: &Document, header: &str) -> Vec<String> {
    let section = &document.sections[0];
    let column = section
        .column_index(header)
        .unwrap_or_else(|| panic!("column '{header}' in {:?}", section.headers));
    section
        .rows
        .iter()
        .map(|row| row.cell(column).as_display())
        .collect()
}

pub fn number(cell: &CellValue) -> f64 {
    match cell {
        CellValue::Number(value) => *value,
        CellValue::Integer(value) => *value as f64,
        other => panic!("expected a number, got {other:?}"),
    }
}
