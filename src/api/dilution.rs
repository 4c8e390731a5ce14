//! Purpose: Plan regularly-spaced dilution series and emit them as
//! worklist operations.
//! Exports: `DilutionPlan`, `DilutionOptions`, `DilutionMode`,
//! `DilutionInstruction`, `DilutionSource`, `DilutionTargets`.
//! Role: Higher-level collaborator on top of `transfer`; planning is pure,
//! emission drives a `Worklist`.
//! Invariants: Planned transfer volumes never drop below the configured
//! minimum; achieved concentrations are reported, not the ideal ones.
use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::grid::Matrix;
use crate::core::labware::{shared_wells, Labware};
use crate::core::worklist::{TransferOptions, Worklist};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DilutionMode {
    Log,
    Linear,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DilutionOptions {
    /// Lowest concentration in the result.
    pub xmin: f64,
    /// Highest concentration in the result.
    pub xmax: f64,
    pub rows: usize,
    pub columns: usize,
    /// Stock concentration, must be >= `xmax`.
    pub stock: f64,
    pub mode: DilutionMode,
    /// Maximum dilution volume per column (scalar broadcasts).
    pub vmax: Vec<f64>,
    /// Minimum allowed transfer step volume.
    pub min_transfer: f64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DilutionSource {
    Stock,
    Column(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DilutionInstruction {
    /// 0-based column being prepared.
    pub column: usize,
    /// Number of serial dilution steps this column is away from stock.
    pub dilution_steps: usize,
    pub source: DilutionSource,
    /// Per-row transfer volumes from the source.
    pub transfer_volumes: Vec<f64>,
}

/// Result of planning a dilution series over an R x C plate.
#[derive(Clone, Debug, PartialEq)]
pub struct DilutionPlan {
    pub rows: usize,
    pub columns: usize,
    pub ideal_targets: Matrix,
    /// Concentrations actually achieved by integer-volume transfers.
    pub actual_targets: Matrix,
    pub instructions: Vec<DilutionInstruction>,
    pub vmax: Vec<f64>,
    /// Total stock volume consumed.
    pub stock_volume: f64,
    /// Total diluent volume consumed.
    pub diluent_volume: f64,
    /// Largest serial dilution depth in the plan.
    pub max_steps: usize,
}

impl DilutionPlan {
    pub fn new(options: DilutionOptions) -> Result<Self, Error> {
        let DilutionOptions {
            xmin,
            xmax,
            rows,
            columns,
            stock,
            mode,
            vmax,
            min_transfer,
        } = options;
        if rows < 1 || columns < 1 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid dilution grid: {rows}x{columns}")));
        }
        if stock < xmax {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "stock concentration ({stock}) must be >= xmax ({xmax})"
            )));
        }
        let vmax = if vmax.len() == 1 {
            vec![vmax[0]; columns]
        } else {
            vmax
        };
        if vmax.len() != columns {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("vmax must be scalar or one value per column"));
        }

        let n = rows * columns;
        let targets = match mode {
            DilutionMode::Log => linspace(xmax.ln(), xmin.ln(), n)
                .into_iter()
                .map(f64::exp)
                .collect::<Vec<f64>>(),
            DilutionMode::Linear => linspace(xmax, xmin, n),
        };
        // column-major layout: the first R targets form column 0
        let mut ideal_targets = Matrix::zeros(rows, columns);
        for (i, target) in targets.iter().enumerate() {
            ideal_targets.set(i % rows, i / rows, *target);
        }

        let mut instructions: Vec<DilutionInstruction> = Vec::new();
        let mut actual: Vec<Vec<f64>> = Vec::new();

        // transfer from stock until the volume gets too small
        for c in 0..columns {
            let transfer: Vec<f64> = (0..rows)
                .map(|r| (vmax[c] * ideal_targets.get(r, c) / stock).round())
                .collect();
            if transfer.iter().all(|v| *v >= min_transfer) {
                actual.push(transfer.iter().map(|v| v / vmax[c] * stock).collect());
                instructions.push(DilutionInstruction {
                    column: c,
                    dilution_steps: 0,
                    source: DilutionSource::Stock,
                    transfer_volumes: transfer,
                });
            } else {
                break;
            }
        }

        // prepare remaining columns by serially diluting existing ones
        for c in instructions.len()..columns {
            let candidates = instructions.len();
            for src in 0..candidates {
                let transfer: Vec<f64> = (0..rows)
                    .map(|r| (vmax[c] * ideal_targets.get(r, c) / actual[src][r]).ceil())
                    .collect();
                // take the leftmost column (fewest dilution steps) that
                // still exceeds the minimal transfer volume
                if transfer.iter().all(|v| *v >= min_transfer) {
                    actual.push(
                        transfer
                            .iter()
                            .zip(&actual[src])
                            .map(|(v, x)| v * x / vmax[c])
                            .collect(),
                    );
                    instructions.push(DilutionInstruction {
                        column: c,
                        dilution_steps: instructions[src].dilution_steps + 1,
                        source: DilutionSource::Column(src),
                        transfer_volumes: transfer,
                    });
                    break;
                }
            }
        }

        if instructions.len() < columns {
            let mut message = format!(
                "impossible with the current settings; only {}/{columns} columns can be prepared",
                instructions.len()
            );
            if mode == DilutionMode::Linear {
                message.push_str("; try switching to log mode");
            }
            return Err(Error::new(ErrorKind::Usage).with_message(message));
        }

        let mut actual_targets = Matrix::zeros(rows, columns);
        for (instruction, column_actual) in instructions.iter().zip(&actual) {
            for (r, x) in column_actual.iter().enumerate() {
                actual_targets.set(r, instruction.column, *x);
            }
        }

        let stock_volume: f64 = instructions
            .iter()
            .filter(|i| i.dilution_steps == 0)
            .map(|i| i.transfer_volumes.iter().sum::<f64>())
            .sum();
        let diluent_volume = rows as f64 * vmax.iter().sum::<f64>() - stock_volume;
        let max_steps = instructions
            .iter()
            .map(|i| i.dilution_steps)
            .max()
            .unwrap_or(0);

        debug!(columns, max_steps, stock_volume, "planned dilution series");
        Ok(Self {
            rows,
            columns,
            ideal_targets,
            actual_targets,
            instructions,
            vmax,
            stock_volume,
            diluent_volume,
            max_steps,
        })
    }

    pub fn achieved_min(&self) -> f64 {
        (0..self.columns)
            .flat_map(|c| (0..self.rows).map(move |r| (r, c)))
            .map(|(r, c)| self.actual_targets.get(r, c))
            .fold(f64::INFINITY, f64::min)
    }

    pub fn achieved_max(&self) -> f64 {
        (0..self.columns)
            .flat_map(|c| (0..self.rows).map(move |r| (r, c)))
            .map(|(r, c)| self.actual_targets.get(r, c))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// One-paragraph description of the plan.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Serial dilution plan ({:.5} to {:.2}) from at least {} µL stock and {} µL diluent:",
            self.achieved_min(),
            self.achieved_max(),
            self.stock_volume,
            self.diluent_volume
        );
        for instruction in &self.instructions {
            out.push_str(&format!(
                "\n\tPrepare column {} with {:?} µL from ",
                instruction.column, instruction.transfer_volumes
            ));
            match instruction.source {
                DilutionSource::Stock => out.push_str("stock"),
                DilutionSource::Column(src) => out.push_str(&format!("column {src}")),
            }
            out.push_str(&format!(
                " and fill up to {} µL",
                self.vmax[instruction.column]
            ));
            if instruction.dilution_steps > 0 {
                out.push_str(&format!(
                    " ({} serial dilutions)",
                    instruction.dilution_steps
                ));
            }
        }
        out
    }

    /// Emits the plan as transfer operations.
    ///
    /// The stock is assumed non-sedimenting; freshly diluted columns are
    /// mixed before anything is transferred out of them whenever the
    /// diluted volume exceeds `mix_threshold` of the column volume.
    pub fn to_worklist(
        &self,
        worklist: &mut Worklist,
        targets: DilutionTargets<'_>,
    ) -> Result<(), Error> {
        let DilutionTargets {
            stock,
            stock_column,
            diluent,
            diluent_column,
            dilution_plate,
            mut destination_plate,
            v_destination,
            mix_threshold,
            lc_stock,
            lc_diluent,
            lc_mix,
            lc_transfer,
        } = targets;
        if dilution_plate.n_rows() < self.rows || dilution_plate.n_columns() < self.columns {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("the dilution plate is too small for this plan")
                .with_labware(dilution_plate.name()));
        }
        if let Some(destination) = &destination_plate {
            if destination.n_rows() < self.rows || destination.n_columns() < self.columns {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("the destination plate is too small for this plan")
                    .with_labware(destination.name()));
            }
            if v_destination.is_none() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("a destination plate needs a destination volume"));
            }
        }
        if !stock.is_trough() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("the stock labware must be a shared reservoir")
                .with_labware(stock.name()));
        }
        if !diluent.is_trough() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("the diluent labware must be a shared reservoir")
                .with_labware(diluent.name()));
        }

        let stock_wells = shared_wells(&stock.column_wells(stock_column)?, self.rows)?;
        let diluent_wells = shared_wells(&diluent.column_wells(diluent_column)?, self.rows)?;

        // dependents of each prepared column, so serial transfers happen
        // right after dilution and mixing
        let mut dependents: Vec<Vec<(usize, Vec<f64>)>> = vec![Vec::new(); self.columns];
        for instruction in &self.instructions {
            if let DilutionSource::Column(src) = instruction.source {
                dependents[src].push((instruction.column, instruction.transfer_volumes.clone()));
            }
        }

        for instruction in &self.instructions {
            let column = instruction.column;
            let column_wells: Vec<String> = dilution_plate
                .column_wells(column)?
                .into_iter()
                .take(self.rows)
                .collect();

            match instruction.source {
                DilutionSource::Stock => {
                    worklist.transfer(
                        stock,
                        &stock_wells,
                        dilution_plate,
                        &column_wells,
                        &instruction.transfer_volumes,
                        &TransferOptions::default()
                            .with_liquid_class(&lc_stock)
                            .with_label("Distribute from stock"),
                    )?;
                    worklist.commit()?;
                }
                DilutionSource::Column(_) => {
                    // the serial transfer into this column already happened
                    for (r, well) in column_wells.iter().enumerate() {
                        let expected = instruction.transfer_volumes[r];
                        let actual = dilution_plate.volume_of(well)?;
                        if (actual - expected).abs() > 1e-6 {
                            return Err(Error::new(ErrorKind::Usage)
                                .with_message(format!(
                                    "column {column} volume not as expected: {actual} != {expected}"
                                ))
                                .with_labware(dilution_plate.name())
                                .with_well(well.clone()));
                        }
                    }
                }
            }

            // fill the column up to its dilution volume
            let dilute_volumes: Vec<f64> = instruction
                .transfer_volumes
                .iter()
                .map(|v| self.vmax[column] - v)
                .collect();
            worklist.transfer(
                diluent,
                &diluent_wells,
                dilution_plate,
                &column_wells,
                &dilute_volumes,
                &TransferOptions::default()
                    .with_liquid_class(&lc_diluent)
                    .with_label(format!("Dilute column {column}")),
            )?;
            worklist.commit()?;

            let needs_mixing = instruction
                .transfer_volumes
                .iter()
                .any(|v| *v > mix_threshold * self.vmax[column]);
            if needs_mixing {
                let mix_volume = (self.vmax[column] * 0.8).min(worklist.max_volume());
                worklist.transfer_within(
                    dilution_plate,
                    &column_wells,
                    &column_wells,
                    &[mix_volume],
                    &TransferOptions::default()
                        .with_liquid_class(&lc_mix)
                        .with_label(format!("Mix column {column} with 80% of its volume")),
                )?;
                worklist.commit()?;
            }

            for (dependent, volumes) in &dependents[column] {
                let dependent_wells: Vec<String> = dilution_plate
                    .column_wells(*dependent)?
                    .into_iter()
                    .take(self.rows)
                    .collect();
                worklist.transfer_within(
                    dilution_plate,
                    &column_wells,
                    &dependent_wells,
                    volumes,
                    &TransferOptions::default()
                        .with_liquid_class(&lc_transfer)
                        .with_label(format!(
                            "Transfer columns {column} -> {dependent} for later dilution step"
                        )),
                )?;
                worklist.commit()?;
            }

            if let Some(destination) = destination_plate.as_deref_mut() {
                let destination_wells: Vec<String> = destination
                    .column_wells(column)?
                    .into_iter()
                    .take(self.rows)
                    .collect();
                let volume = v_destination.unwrap_or_default();
                worklist.transfer(
                    dilution_plate,
                    &column_wells,
                    destination,
                    &destination_wells,
                    &[volume],
                    &TransferOptions::default()
                        .with_liquid_class(&lc_transfer)
                        .with_label(format!("Transfer column {column} to the destination plate")),
                )?;
                worklist.commit()?;
            }
        }
        Ok(())
    }
}

/// Labware roles and liquid classes for emitting a dilution plan.
pub struct DilutionTargets<'a> {
    pub stock: &'a mut Labware,
    pub stock_column: usize,
    pub diluent: &'a mut Labware,
    pub diluent_column: usize,
    pub dilution_plate: &'a mut Labware,
    pub destination_plate: Option<&'a mut Labware>,
    pub v_destination: Option<f64>,
    pub mix_threshold: f64,
    pub lc_stock: String,
    pub lc_diluent: String,
    pub lc_mix: String,
    pub lc_transfer: String,
}

impl<'a> DilutionTargets<'a> {
    pub fn new(
        stock: &'a mut Labware,
        diluent: &'a mut Labware,
        dilution_plate: &'a mut Labware,
    ) -> Self {
        Self {
            stock,
            stock_column: 0,
            diluent,
            diluent_column: 0,
            dilution_plate,
            destination_plate: None,
            v_destination: None,
            mix_threshold: 0.05,
            lc_stock: String::new(),
            lc_diluent: String::new(),
            lc_mix: String::new(),
            lc_transfer: String::new(),
        }
    }
}

fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (stop - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::{
        DilutionMode, DilutionOptions, DilutionPlan, DilutionSource, DilutionTargets,
    };
    use crate::core::labware::{InitialVolumes, Labware, LabwareOptions, TroughOptions};
    use crate::core::worklist::{Worklist, WorklistOptions};

    fn options() -> DilutionOptions {
        DilutionOptions {
            xmin: 0.01,
            xmax: 10.0,
            rows: 4,
            columns: 3,
            stock: 20.0,
            mode: DilutionMode::Log,
            vmax: vec![1000.0],
            min_transfer: 10.0,
        }
    }

    #[test]
    fn plan_covers_every_column() {
        let plan = DilutionPlan::new(options()).expect("plan");
        assert_eq!(plan.instructions.len(), 3);
        assert_eq!(plan.instructions[0].source, DilutionSource::Stock);
        assert_eq!(plan.instructions[0].dilution_steps, 0);
        assert!(plan.max_steps >= 1);
        // serial columns reference an earlier instruction
        for instruction in &plan.instructions {
            if let DilutionSource::Column(src) = instruction.source {
                assert!(src < instruction.column);
            }
        }
        // achieved concentrations decrease column-major
        assert!(plan.achieved_max() <= 20.0);
        assert!(plan.achieved_min() > 0.0);
        assert!(plan.summary().contains("Prepare column 0"));
    }

    #[test]
    fn stock_below_xmax_is_rejected() {
        let mut options = options();
        options.stock = 5.0;
        let err = DilutionPlan::new(options).expect_err("should fail");
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Usage);
    }

    #[test]
    fn impossible_linear_series_suggests_log_mode() {
        let options = DilutionOptions {
            xmin: 1e-6,
            xmax: 10.0,
            rows: 4,
            columns: 6,
            stock: 20.0,
            mode: DilutionMode::Linear,
            vmax: vec![1000.0],
            min_transfer: 20.0,
        };
        let err = DilutionPlan::new(options).expect_err("should fail");
        assert!(err.to_string().contains("log mode"));
    }

    #[test]
    fn emitted_plan_balances_the_ledger() {
        let plan = DilutionPlan::new(options()).expect("plan");
        let mut stock = Labware::trough(
            "stock",
            8,
            1,
            TroughOptions::new(0.0, 100_000.0)
                .with_initial_volumes(InitialVolumes::Uniform(50_000.0)),
        )
        .expect("trough");
        let mut diluent = Labware::trough(
            "water",
            8,
            1,
            TroughOptions::new(0.0, 100_000.0)
                .with_initial_volumes(InitialVolumes::Uniform(50_000.0)),
        )
        .expect("trough");
        let mut plate = Labware::new(
            "dilutions",
            4,
            3,
            LabwareOptions::new(0.0, 2000.0),
        )
        .expect("labware");

        let mut wl = Worklist::open(WorklistOptions::default()).expect("worklist");
        plan.to_worklist(
            &mut wl,
            DilutionTargets::new(&mut stock, &mut diluent, &mut plate),
        )
        .expect("emit");

        // serial transfers move volume out again, so columns that fed
        // other columns sit below vmax; the last column is full
        let last = plan.columns - 1;
        for r in 0..plan.rows {
            assert_eq!(plate.volumes().get(r, last), 1000.0);
        }
        // stock consumption matches the plan
        assert_eq!(
            50_000.0 - stock.volumes().get(0, 0),
            plan.stock_volume
        );
        assert!(!wl.lines().is_empty());
    }
}
