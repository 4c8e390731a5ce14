//! Purpose: Human-readable and machine-readable views of a labware ledger.
//! Exports: `history_report`, `LabwareSnapshot`.
//! Role: Reporting collaborator on top of the core ledger; read-only.
//! Invariants: Reports never mutate the ledger and carry no heavy state.
use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::labware::Labware;

/// Renders the operation history of a labware: its name followed by one
/// block per history entry (optional label, then volumes rounded to one
/// decimal).
pub fn history_report(labware: &Labware) -> String {
    let mut report = labware.name().to_string();
    for entry in labware.history() {
        if let Some(label) = &entry.label {
            if !label.is_empty() {
                report.push('\n');
                report.push_str(label);
            }
        }
        report.push('\n');
        report.push_str(&entry.volumes.render_rounded(1));
        report.push('\n');
    }
    report
}

/// Serializable point-in-time view of a labware ledger.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LabwareSnapshot {
    pub name: String,
    pub rows: usize,
    pub columns: usize,
    pub min_volume: f64,
    pub max_volume: f64,
    pub virtual_rows: Option<usize>,
    pub volumes: Vec<Vec<f64>>,
    pub composition: BTreeMap<String, Vec<Vec<f64>>>,
}

impl LabwareSnapshot {
    pub fn of(labware: &Labware) -> Self {
        Self {
            name: labware.name().to_string(),
            rows: labware.volumes().rows(),
            columns: labware.volumes().columns(),
            min_volume: labware.min_volume(),
            max_volume: labware.max_volume(),
            virtual_rows: labware.virtual_rows(),
            volumes: labware.volumes().to_rows(),
            composition: labware
                .composition()
                .iter()
                .map(|(component, fractions)| (component.clone(), fractions.to_rows()))
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("could not serialize labware snapshot")
                .with_source(err)
        })
    }
}
