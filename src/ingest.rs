//! Purpose: Execute JSON protocol documents against fresh labware ledgers.
//! Exports: `Protocol`, `Operation`, `load_protocol`, `execute`,
//! `ProtocolOutcome`.
//! Role: Deserialization boundary between protocol files and the engine;
//! the CLI calls nothing below this module.
//! Invariants: Operations run in document order; the first failure aborts
//! with the operation index attached.
//! Invariants: A protocol execution owns its labware; nothing persists
//! between runs.
use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

use crate::api::{
    history_report, Error, ErrorKind, InitialVolumes, Labware, LabwareOptions, PartitionBy,
    TipSelection, TransferOptions, TroughOptions, Worklist, WorklistOptions,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Protocol {
    #[serde(default)]
    pub worklist: WorklistSettings,
    pub labware: Vec<LabwareSpec>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorklistSettings {
    #[serde(default = "default_max_volume")]
    pub max_volume: f64,
    #[serde(default = "default_auto_split")]
    pub auto_split: bool,
}

impl Default for WorklistSettings {
    fn default() -> Self {
        Self {
            max_volume: default_max_volume(),
            auto_split: default_auto_split(),
        }
    }
}

fn default_max_volume() -> f64 {
    950.0
}

fn default_auto_split() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabwareSpec {
    pub name: String,
    #[serde(default)]
    pub rows: Option<usize>,
    pub columns: usize,
    pub min_volume: f64,
    pub max_volume: f64,
    #[serde(default)]
    pub initial_volumes: Option<VolumesSpec>,
    /// Marks a shared reservoir addressable by this many parallel tips.
    #[serde(default)]
    pub virtual_rows: Option<usize>,
    #[serde(default)]
    pub component_names: BTreeMap<String, String>,
    #[serde(default)]
    pub column_names: Vec<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum VolumesSpec {
    Uniform(f64),
    PerColumn(Vec<f64>),
    PerWell(Vec<Vec<f64>>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WellsSpec {
    One(String),
    Many(Vec<String>),
}

impl WellsSpec {
    fn to_vec(&self) -> Vec<String> {
        match self {
            WellsSpec::One(well) => vec![well.clone()],
            WellsSpec::Many(wells) => wells.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum VolumesList {
    Scalar(f64),
    Many(Vec<f64>),
}

impl VolumesList {
    fn to_vec(&self) -> Vec<f64> {
        match self {
            VolumesList::Scalar(volume) => vec![*volume],
            VolumesList::Many(volumes) => volumes.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Transfer {
        source: String,
        source_wells: WellsSpec,
        destination: String,
        destination_wells: WellsSpec,
        volumes: VolumesList,
        #[serde(default)]
        label: Option<String>,
        #[serde(default = "default_wash_scheme")]
        wash_scheme: Option<u8>,
        #[serde(default)]
        partition_by: PartitionBy,
        #[serde(default)]
        liquid_class: String,
        #[serde(default)]
        tips: Option<Vec<u8>>,
    },
    Comment {
        text: String,
    },
    Wash {
        #[serde(default = "default_scheme")]
        scheme: u8,
    },
    Break,
    SetDiti {
        index: u32,
    },
}

fn default_wash_scheme() -> Option<u8> {
    Some(1)
}

fn default_scheme() -> u8 {
    1
}

/// Everything a protocol run produces.
#[derive(Debug)]
pub struct ProtocolOutcome {
    pub lines: Vec<String>,
    pub reports: Vec<String>,
}

/// Parses a protocol document from JSON text.
pub fn load_protocol(text: &str) -> Result<Protocol, Error> {
    serde_json::from_str(text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid protocol document: {err}"))
            .with_source(err)
    })
}

/// Runs a protocol: builds the labware, applies every operation in order,
/// and finalizes the session (writing `output` when given).
pub fn execute(protocol: &Protocol, output: Option<PathBuf>) -> Result<ProtocolOutcome, Error> {
    let mut labware = build_labware(protocol)?;

    let mut options = WorklistOptions::default()
        .with_max_volume(protocol.worklist.max_volume)
        .with_auto_split(protocol.worklist.auto_split);
    if let Some(output) = output {
        options = options.with_filepath(output);
    }
    let mut worklist = Worklist::open(options)?;

    for (index, operation) in protocol.operations.iter().enumerate() {
        apply(&mut worklist, &mut labware, operation)
            .map_err(|err| err.with_label(format!("operation {index}")))?;
    }
    debug!(
        operations = protocol.operations.len(),
        records = worklist.records().len(),
        "executed protocol"
    );

    let lines = worklist.close()?;
    let reports = labware.iter().map(history_report).collect();
    Ok(ProtocolOutcome { lines, reports })
}

fn build_labware(protocol: &Protocol) -> Result<Vec<Labware>, Error> {
    let mut labware = Vec::with_capacity(protocol.labware.len());
    for spec in &protocol.labware {
        if labware
            .iter()
            .any(|existing: &Labware| existing.name() == spec.name)
        {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("duplicate labware name: {}", spec.name)));
        }
        labware.push(build_one(spec)?);
    }
    Ok(labware)
}

fn build_one(spec: &LabwareSpec) -> Result<Labware, Error> {
    if let Some(virtual_rows) = spec.virtual_rows {
        let initial_volumes = match &spec.initial_volumes {
            None => InitialVolumes::Empty,
            Some(VolumesSpec::Uniform(volume)) => InitialVolumes::Uniform(*volume),
            Some(VolumesSpec::PerColumn(volumes)) => InitialVolumes::PerColumn(volumes.clone()),
            Some(VolumesSpec::PerWell(_)) => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("shared reservoirs take scalar or per-column initial volumes")
                    .with_labware(spec.name.clone()));
            }
        };
        if spec.rows.is_some_and(|rows| rows != 1) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("shared reservoirs must have exactly one physical row")
                .with_labware(spec.name.clone()));
        }
        return Labware::trough(
            &spec.name,
            virtual_rows,
            spec.columns,
            TroughOptions::new(spec.min_volume, spec.max_volume)
                .with_initial_volumes(initial_volumes)
                .with_column_names(spec.column_names.clone()),
        );
    }

    if !spec.column_names.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("column_names are only valid for shared reservoirs")
            .with_labware(spec.name.clone()));
    }
    let rows = spec.rows.ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message("plate labware needs a row count")
            .with_labware(spec.name.clone())
    })?;
    let initial_volumes = match &spec.initial_volumes {
        None => InitialVolumes::Empty,
        Some(VolumesSpec::Uniform(volume)) => InitialVolumes::Uniform(*volume),
        Some(VolumesSpec::PerColumn(volumes)) => InitialVolumes::PerColumn(volumes.clone()),
        Some(VolumesSpec::PerWell(rows_data)) => InitialVolumes::PerWell(rows_data.clone()),
    };
    let mut options = LabwareOptions::new(spec.min_volume, spec.max_volume)
        .with_initial_volumes(initial_volumes);
    for (well, component) in &spec.component_names {
        options = options.with_component_name(well, component);
    }
    Labware::new(&spec.name, rows, spec.columns, options)
}

fn apply(
    worklist: &mut Worklist,
    labware: &mut [Labware],
    operation: &Operation,
) -> Result<(), Error> {
    match operation {
        Operation::Transfer {
            source,
            source_wells,
            destination,
            destination_wells,
            volumes,
            label,
            wash_scheme,
            partition_by,
            liquid_class,
            tips,
        } => {
            let mut options = TransferOptions::default()
                .with_wash_scheme(*wash_scheme)
                .with_partition_by(*partition_by)
                .with_liquid_class(liquid_class);
            if let Some(label) = label {
                options = options.with_label(label);
            }
            if let Some(tips) = tips {
                options = options.with_tips(TipSelection::Set(tips.clone()));
            }
            let source_wells = source_wells.to_vec();
            let destination_wells = destination_wells.to_vec();
            let volumes = volumes.to_vec();
            if source == destination {
                let index = find_labware(labware, source)?;
                worklist.transfer_within(
                    &mut labware[index],
                    &source_wells,
                    &destination_wells,
                    &volumes,
                    &options,
                )
            } else {
                let (src, dst) = two_labware(labware, source, destination)?;
                worklist.transfer(src, &source_wells, dst, &destination_wells, &volumes, &options)
            }
        }
        Operation::Comment { text } => worklist.comment(text),
        Operation::Wash { scheme } => worklist.wash(*scheme),
        Operation::Break => worklist.commit(),
        Operation::SetDiti { index } => worklist.set_diti(*index),
    }
}

fn find_labware(labware: &[Labware], name: &str) -> Result<usize, Error> {
    labware
        .iter()
        .position(|l| l.name() == name)
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("unknown labware: {name}"))
                .with_labware(name)
        })
}

fn two_labware<'a>(
    labware: &'a mut [Labware],
    first: &str,
    second: &str,
) -> Result<(&'a mut Labware, &'a mut Labware), Error> {
    let i = find_labware(labware, first)?;
    let j = find_labware(labware, second)?;
    if i < j {
        let (left, right) = labware.split_at_mut(j);
        Ok((&mut left[i], &mut right[0]))
    } else {
        let (left, right) = labware.split_at_mut(i);
        Ok((&mut right[0], &mut left[j]))
    }
}

#[cfg(test)]
mod tests {
    use super::{execute, load_protocol};
    use crate::api::ErrorKind;

    const PROTOCOL: &str = r#"{
        "worklist": {"max_volume": 950, "auto_split": true},
        "labware": [
            {
                "name": "water",
                "columns": 1,
                "min_volume": 1000,
                "max_volume": 100000,
                "virtual_rows": 8,
                "initial_volumes": 60000
            },
            {
                "name": "plate",
                "rows": 2,
                "columns": 3,
                "min_volume": 10,
                "max_volume": 2500
            }
        ],
        "operations": [
            {"comment": {"text": "fill the plate"}},
            {
                "transfer": {
                    "source": "water",
                    "source_wells": ["A01", "B01"],
                    "destination": "plate",
                    "destination_wells": ["A01", "B01"],
                    "volumes": 2000,
                    "label": "seed columns"
                }
            },
            {"break": null}
        ]
    }"#;

    #[test]
    fn protocol_round_trip_executes() {
        let protocol = load_protocol(PROTOCOL).expect("load");
        let outcome = execute(&protocol, None).expect("execute");
        assert_eq!(outcome.lines[0], "C;fill the plate");
        assert_eq!(outcome.lines[1], "C;seed columns");
        // 2000 with a 950 cap splits into three steps per pair
        let aspirates = outcome
            .lines
            .iter()
            .filter(|l| l.starts_with("A;water"))
            .count();
        assert_eq!(aspirates, 6);
        assert!(outcome.lines.last().is_some_and(|l| l == "B;"));
        assert_eq!(outcome.reports.len(), 2);
        assert!(outcome.reports[1].contains("seed columns"));
    }

    #[test]
    fn unknown_labware_is_reported_with_the_operation() {
        let text = PROTOCOL.replace("\"source\": \"water\"", "\"source\": \"juice\"");
        let protocol = load_protocol(&text).expect("load");
        let err = execute(&protocol, None).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.to_string().contains("operation 1"));
    }

    #[test]
    fn malformed_documents_are_usage_errors() {
        let err = load_protocol("{\"labware\": 5}").expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = load_protocol("not json").expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn duplicate_labware_names_are_rejected() {
        let text = PROTOCOL.replace("\"name\": \"plate\"", "\"name\": \"water\"");
        let protocol = load_protocol(&text).expect("load");
        let err = execute(&protocol, None).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn transfers_within_one_labware_are_allowed() {
        let text = r#"{
            "labware": [
                {"name": "plate", "rows": 2, "columns": 1, "min_volume": 0,
                 "max_volume": 5000, "initial_volumes": 1000}
            ],
            "operations": [
                {"transfer": {
                    "source": "plate", "source_wells": "A01",
                    "destination": "plate", "destination_wells": "B01",
                    "volumes": 500
                }}
            ]
        }"#;
        let protocol = load_protocol(text).expect("load");
        let outcome = execute(&protocol, None).expect("execute");
        assert!(outcome.reports[0].contains("[500]\n[1500]"));
    }
}
