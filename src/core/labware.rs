//! Purpose: Stateful labware ledgers tracking volume and composition per
//! well, with an append-only operation history.
//! Exports: `Labware`, `LabwareOptions`, `TroughOptions`, `InitialVolumes`,
//! `HistoryEntry`, `CondenseLabel`, `shared_wells`.
//! Role: The single mutation point for volumes; planners call `add` and
//! `remove`, nothing else writes to the matrices.
//! Invariants: A well volume is 0 or within [min_volume, max_volume].
//! Invariants: A failing `add`/`remove` call leaves the ledger unchanged.
//! Invariants: Component keys only accumulate, never disappear.
use std::collections::{BTreeMap, HashMap};

use crate::core::composition::{self, combine, Composition};
use crate::core::error::{Error, ErrorKind};
use crate::core::grid::{linear_position, well_id, Matrix, ROW_LETTERS};

#[derive(Clone, Debug, Default, PartialEq)]
pub enum InitialVolumes {
    #[default]
    Empty,
    Uniform(f64),
    PerColumn(Vec<f64>),
    PerWell(Vec<Vec<f64>>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LabwareOptions {
    pub min_volume: f64,
    pub max_volume: f64,
    pub initial_volumes: InitialVolumes,
    pub component_names: BTreeMap<String, String>,
}

impl LabwareOptions {
    pub fn new(min_volume: f64, max_volume: f64) -> Self {
        Self {
            min_volume,
            max_volume,
            initial_volumes: InitialVolumes::Empty,
            component_names: BTreeMap::new(),
        }
    }

    pub fn with_initial_volumes(mut self, initial_volumes: InitialVolumes) -> Self {
        self.initial_volumes = initial_volumes;
        self
    }

    pub fn with_component_name(
        mut self,
        well: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        self.component_names.insert(well.into(), component.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TroughOptions {
    pub min_volume: f64,
    pub max_volume: f64,
    pub initial_volumes: InitialVolumes,
    pub column_names: Vec<Option<String>>,
}

impl TroughOptions {
    pub fn new(min_volume: f64, max_volume: f64) -> Self {
        Self {
            min_volume,
            max_volume,
            initial_volumes: InitialVolumes::Empty,
            column_names: Vec::new(),
        }
    }

    pub fn with_initial_volumes(mut self, initial_volumes: InitialVolumes) -> Self {
        self.initial_volumes = initial_volumes;
        self
    }

    pub fn with_column_names(mut self, column_names: Vec<Option<String>>) -> Self {
        self.column_names = column_names;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub label: Option<String>,
    pub volumes: Matrix,
}

/// How a condensed history entry is labeled.
pub enum CondenseLabel {
    First,
    Last,
    Custom(String),
}

#[derive(Debug)]
pub struct Labware {
    name: String,
    row_ids: Vec<char>,
    column_ids: Vec<usize>,
    min_volume: f64,
    max_volume: f64,
    virtual_rows: Option<usize>,
    wells: Vec<Vec<String>>,
    indices: HashMap<String, (usize, usize)>,
    volumes: Matrix,
    composition: BTreeMap<String, Matrix>,
    history: Vec<HistoryEntry>,
}

impl Labware {
    /// Creates a plate-like labware with `rows` x `columns` independent
    /// compartments.
    pub fn new(
        name: impl Into<String>,
        rows: usize,
        columns: usize,
        options: LabwareOptions,
    ) -> Result<Self, Error> {
        Self::build(name.into(), rows, columns, None, options)
    }

    /// Creates a shared-reservoir labware: one physical compartment per
    /// column, addressable through `virtual_rows` aliases so several tips
    /// can work it in parallel.
    pub fn trough(
        name: impl Into<String>,
        virtual_rows: usize,
        columns: usize,
        options: TroughOptions,
    ) -> Result<Self, Error> {
        let name = name.into();
        let column_volumes = match &options.initial_volumes {
            InitialVolumes::Empty => vec![0.0; columns],
            InitialVolumes::Uniform(volume) => vec![*volume; columns],
            InitialVolumes::PerColumn(volumes) => volumes.clone(),
            InitialVolumes::PerWell(_) => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("troughs take scalar or per-column initial volumes")
                    .with_labware(name));
            }
        };
        let column_names = if options.column_names.is_empty() {
            vec![None; columns]
        } else {
            options.column_names.clone()
        };
        let component_names =
            composition::trough_component_names(&name, columns, &column_names, &column_volumes)?;
        Self::build(
            name,
            1,
            columns,
            Some(virtual_rows),
            LabwareOptions {
                min_volume: options.min_volume,
                max_volume: options.max_volume,
                initial_volumes: InitialVolumes::PerColumn(column_volumes),
                component_names,
            },
        )
    }

    fn build(
        name: String,
        rows: usize,
        columns: usize,
        virtual_rows: Option<usize>,
        options: LabwareOptions,
    ) -> Result<Self, Error> {
        if rows < 1 || rows > ROW_LETTERS.len() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid rows: {rows}"))
                .with_labware(name));
        }
        if columns < 1 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid columns: {columns}"))
                .with_labware(name));
        }
        if !options.min_volume.is_finite() || options.min_volume < 0.0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid min_volume: {}", options.min_volume))
                .with_labware(name));
        }
        if !options.max_volume.is_finite() || options.max_volume <= options.min_volume {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid max_volume: {}", options.max_volume))
                .with_labware(name));
        }
        if let Some(virtual_rows) = virtual_rows {
            if rows != 1 {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("shared reservoirs must have exactly one physical row")
                    .with_labware(name));
            }
            if virtual_rows < 1 || virtual_rows > ROW_LETTERS.len() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid virtual_rows: {virtual_rows}"))
                    .with_labware(name));
            }
        }

        let volumes = resolve_initial_volumes(&options.initial_volumes, rows, columns)
            .map_err(|err| err.with_labware(name.clone()))?;
        for r in 0..rows {
            for c in 0..columns {
                let volume = volumes.get(r, c);
                if volume < 0.0 {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("initial volumes cannot be negative")
                        .with_labware(name));
                }
                if volume > options.max_volume {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("initial volumes cannot exceed max_volume")
                        .with_labware(name));
                }
            }
        }

        let addressable_rows = virtual_rows.unwrap_or(rows);
        let row_ids: Vec<char> = ROW_LETTERS[..addressable_rows]
            .iter()
            .map(|b| *b as char)
            .collect();
        let column_ids: Vec<usize> = (1..=columns).collect();

        let wells: Vec<Vec<String>> = row_ids
            .iter()
            .map(|row| column_ids.iter().map(|col| well_id(*row, *col)).collect())
            .collect();
        // virtual rows all alias the single physical row
        let mut indices = HashMap::new();
        for (vr, row) in wells.iter().enumerate() {
            for (c, well) in row.iter().enumerate() {
                let r = if virtual_rows.is_some() { 0 } else { vr };
                indices.insert(well.clone(), (r, c));
            }
        }

        let real_wells: Vec<Vec<String>> = if virtual_rows.is_some() {
            vec![wells[0].clone()]
        } else {
            wells.clone()
        };
        let composition =
            composition::seed_components(&name, &real_wells, &options.component_names, &volumes)?;

        let history = vec![HistoryEntry {
            label: Some("initial".to_string()),
            volumes: volumes.clone(),
        }];

        Ok(Self {
            name,
            row_ids,
            column_ids,
            min_volume: options.min_volume,
            max_volume: options.max_volume,
            virtual_rows,
            wells,
            indices,
            volumes,
            composition,
            history,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of addressable rows (virtual rows for shared reservoirs).
    pub fn n_rows(&self) -> usize {
        self.row_ids.len()
    }

    pub fn n_columns(&self) -> usize {
        self.column_ids.len()
    }

    pub fn min_volume(&self) -> f64 {
        self.min_volume
    }

    pub fn max_volume(&self) -> f64 {
        self.max_volume
    }

    pub fn is_trough(&self) -> bool {
        self.virtual_rows.is_some()
    }

    pub fn virtual_rows(&self) -> Option<usize> {
        self.virtual_rows
    }

    /// Addressable well grid, rows of columns.
    pub fn wells(&self) -> &[Vec<String>] {
        &self.wells
    }

    /// All addressable wells flattened column by column, the order the
    /// instrument walks a grid.
    pub fn well_ids(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.row_ids.len() * self.column_ids.len());
        for c in 0..self.column_ids.len() {
            for row in &self.wells {
                out.push(row[c].clone());
            }
        }
        out
    }

    /// Addressable wells of one 0-based column, top to bottom.
    pub fn column_wells(&self, column: usize) -> Result<Vec<String>, Error> {
        if column >= self.column_ids.len() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("column {column} out of range"))
                .with_labware(self.name.clone()));
        }
        Ok(self.wells.iter().map(|row| row[column].clone()).collect())
    }

    pub fn index_of(&self, well: &str) -> Result<(usize, usize), Error> {
        self.indices.get(well).copied().ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("unknown well {well}"))
                .with_labware(self.name.clone())
                .with_well(well)
        })
    }

    /// 1-based position of a well in the physical grid, column-major.
    /// Shared reservoirs count one position per column.
    pub fn position(&self, well: &str) -> Result<usize, Error> {
        let (r, c) = self.index_of(well)?;
        Ok(linear_position(r, c, self.volumes.rows()))
    }

    pub fn volumes(&self) -> &Matrix {
        &self.volumes
    }

    pub fn volume_of(&self, well: &str) -> Result<f64, Error> {
        let (r, c) = self.index_of(well)?;
        Ok(self.volumes.get(r, c))
    }

    pub fn composition(&self) -> &BTreeMap<String, Matrix> {
        &self.composition
    }

    /// Relative composition of one well, omitting zero fractions.
    pub fn get_well_composition(&self, well: &str) -> Result<Composition, Error> {
        let (r, c) = self.index_of(well)?;
        Ok(self
            .composition
            .iter()
            .filter(|(_, fractions)| fractions.get(r, c) > 0.0)
            .map(|(component, fractions)| (component.clone(), fractions.get(r, c)))
            .collect())
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Adds volumes to wells, mixing in the given compositions.
    ///
    /// Every target is validated against `max_volume` before anything is
    /// written; a scalar volume broadcasts over all wells. One history
    /// entry is appended per call.
    pub fn add<S: AsRef<str>>(
        &mut self,
        wells: &[S],
        volumes: &[f64],
        label: Option<&str>,
        compositions: Option<&[Composition]>,
    ) -> Result<(), Error> {
        let (targets, volumes) = self.normalize(wells, volumes, label)?;
        if let Some(compositions) = compositions {
            if compositions.len() != targets.len() {
                return Err(Error::new(ErrorKind::ShapeMismatch)
                    .with_message("compositions must be given for all wells or none")
                    .with_labware(self.name.clone()));
            }
        }

        // validate everything before the first write
        for ((well, (r, c)), volume) in targets.iter().zip(&volumes) {
            let current = self.volumes.get(*r, *c);
            let next = current + volume;
            if next > self.max_volume {
                let mut err = Error::new(ErrorKind::VolumeOverflow)
                    .with_message(format!(
                        "too much volume for {}.{well}: {current} + {volume} > {}",
                        self.name, self.max_volume
                    ))
                    .with_labware(self.name.clone())
                    .with_well(well.clone())
                    .with_volume(*volume);
                if let Some(label) = label {
                    err = err.with_label(label);
                }
                return Err(err);
            }
        }

        for (i, ((well, (r, c)), volume)) in targets.iter().zip(&volumes).enumerate() {
            let current = self.volumes.get(*r, *c);
            if let Some(compositions) = compositions {
                let existing = self.get_well_composition(well)?;
                let mixed = combine(current, &existing, *volume, &compositions[i]);
                for (component, fraction) in mixed {
                    let rows = self.volumes.rows();
                    let columns = self.volumes.columns();
                    self.composition
                        .entry(component)
                        .or_insert_with(|| Matrix::zeros(rows, columns))
                        .set(*r, *c, fraction);
                }
            }
            self.volumes.set(*r, *c, current + volume);
        }
        self.log(label);
        Ok(())
    }

    /// Removes volumes from wells.
    ///
    /// The remaining liquid is assumed homogeneous, so composition is
    /// unchanged. Draining a well to exactly 0 is allowed; anything else
    /// below `min_volume` fails before any mutation.
    pub fn remove<S: AsRef<str>>(
        &mut self,
        wells: &[S],
        volumes: &[f64],
        label: Option<&str>,
    ) -> Result<(), Error> {
        let (targets, volumes) = self.normalize(wells, volumes, label)?;

        for ((well, (r, c)), volume) in targets.iter().zip(&volumes) {
            let current = self.volumes.get(*r, *c);
            let next = current - volume;
            if next < self.min_volume && next != 0.0 {
                let mut err = Error::new(ErrorKind::VolumeUnderflow)
                    .with_message(format!(
                        "too little volume in {}.{well}: {current} - {volume} < {}",
                        self.name, self.min_volume
                    ))
                    .with_labware(self.name.clone())
                    .with_well(well.clone())
                    .with_volume(*volume);
                if let Some(label) = label {
                    err = err.with_label(label);
                }
                return Err(err);
            }
        }

        for ((_, (r, c)), volume) in targets.iter().zip(&volumes) {
            let current = self.volumes.get(*r, *c);
            self.volumes.set(*r, *c, current - volume);
        }
        self.log(label);
        Ok(())
    }

    fn normalize<S: AsRef<str>>(
        &self,
        wells: &[S],
        volumes: &[f64],
        label: Option<&str>,
    ) -> Result<(Vec<(String, (usize, usize))>, Vec<f64>), Error> {
        if wells.is_empty() {
            return Err(Error::new(ErrorKind::ShapeMismatch)
                .with_message("no wells given")
                .with_labware(self.name.clone()));
        }
        let volumes: Vec<f64> = if volumes.len() == 1 {
            vec![volumes[0]; wells.len()]
        } else {
            volumes.to_vec()
        };
        if volumes.len() != wells.len() {
            return Err(Error::new(ErrorKind::ShapeMismatch)
                .with_message(format!(
                    "number of volumes ({}) must equal the number of wells ({})",
                    volumes.len(),
                    wells.len()
                ))
                .with_labware(self.name.clone()));
        }
        for volume in &volumes {
            if !volume.is_finite() || *volume < 0.0 {
                let mut err = Error::new(ErrorKind::InvalidVolume)
                    .with_message(format!("volumes must be positive or zero, got {volume}"))
                    .with_labware(self.name.clone())
                    .with_volume(*volume);
                if let Some(label) = label {
                    err = err.with_label(label);
                }
                return Err(err);
            }
        }
        let mut targets = Vec::with_capacity(wells.len());
        for well in wells {
            let well = well.as_ref();
            targets.push((well.to_string(), self.index_of(well)?));
        }
        Ok((targets, volumes))
    }

    /// Appends the current volumes to the history.
    pub fn log(&mut self, label: Option<&str>) {
        self.history.push(HistoryEntry {
            label: label.map(str::to_string),
            volumes: self.volumes.clone(),
        });
    }

    /// Collapses the last `n` history entries into one, keeping the final
    /// state.
    pub fn condense_log(&mut self, n: usize, label: CondenseLabel) {
        if n == 0 || self.history.len() < n {
            return;
        }
        let label = match label {
            CondenseLabel::First => self.history[self.history.len() - n].label.clone(),
            CondenseLabel::Last => self.history[self.history.len() - 1].label.clone(),
            CondenseLabel::Custom(text) => Some(text),
        };
        let volumes = self.history[self.history.len() - 1].volumes.clone();
        self.history.truncate(self.history.len() - n);
        self.history.push(HistoryEntry { label, volumes });
    }
}

fn resolve_initial_volumes(
    initial_volumes: &InitialVolumes,
    rows: usize,
    columns: usize,
) -> Result<Matrix, Error> {
    match initial_volumes {
        InitialVolumes::Empty => Ok(Matrix::zeros(rows, columns)),
        InitialVolumes::Uniform(volume) => Ok(Matrix::filled(rows, columns, *volume)),
        InitialVolumes::PerColumn(volumes) => {
            if volumes.len() != columns {
                return Err(Error::new(ErrorKind::Usage).with_message(format!(
                    "{} initial volumes given for {columns} columns",
                    volumes.len()
                )));
            }
            let mut matrix = Matrix::zeros(rows, columns);
            for r in 0..rows {
                for (c, volume) in volumes.iter().enumerate() {
                    matrix.set(r, c, *volume);
                }
            }
            Ok(matrix)
        }
        InitialVolumes::PerWell(rows_data) => {
            let matrix = Matrix::from_rows(rows_data.clone())?;
            if matrix.rows() != rows || matrix.columns() != columns {
                return Err(Error::new(ErrorKind::Usage).with_message(format!(
                    "initial volume shape {}x{} does not match labware shape {rows}x{columns}",
                    matrix.rows(),
                    matrix.columns()
                )));
            }
            Ok(matrix)
        }
    }
}

/// Cycles shared-reservoir well aliases so `n` parallel accesses spread
/// over the available virtual rows: all aliases of the first physical
/// column, then the next, repeating from the start when exhausted.
pub fn shared_wells(wells: &[String], n: usize) -> Result<Vec<String>, Error> {
    if wells.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("shared well cycling needs at least one well"));
    }
    Ok((0..n).map(|i| wells[i % wells.len()].clone()).collect())
}
