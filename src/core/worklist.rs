//! Purpose: Planning sessions that own the instruction log, mutate labware
//! ledgers, and emit worklist records.
//! Exports: `Worklist`, `WorklistOptions`, `TransferOptions`,
//! `PipettingParams`.
//! Role: Executes transfer plans from `plan` against `labware` ledgers and
//! serializes every primitive through `records`.
//! Invariants: A session is Open from construction until `close`; mutations
//! on a closed session fail with `SessionClosed` (comments are exempt).
//! Invariants: Committed steps of a failed multi-step transfer stay
//! committed; there is no rollback.
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::core::composition::Composition;
use crate::core::error::{Error, ErrorKind};
use crate::core::labware::{CondenseLabel, Labware};
use crate::core::plan::{plan_transfer, PartitionBy, PlanItem, PlanRequest};
use crate::core::records::{Pipetting, Record};
use crate::core::tips::TipSelection;

#[derive(Clone, Debug, PartialEq)]
pub struct WorklistOptions {
    /// Largest volume a single aspirate/dispense step may move, in µL.
    pub max_volume: f64,
    /// Split oversized transfer volumes instead of rejecting them.
    pub auto_split: bool,
    /// Worklist file written when the session closes.
    pub filepath: Option<PathBuf>,
}

impl Default for WorklistOptions {
    fn default() -> Self {
        Self {
            max_volume: 950.0,
            auto_split: true,
            filepath: None,
        }
    }
}

impl WorklistOptions {
    pub fn with_max_volume(mut self, max_volume: f64) -> Self {
        self.max_volume = max_volume;
        self
    }

    pub fn with_auto_split(mut self, auto_split: bool) -> Self {
        self.auto_split = auto_split;
        self
    }

    pub fn with_filepath(mut self, filepath: impl Into<PathBuf>) -> Self {
        self.filepath = Some(filepath.into());
        self
    }
}

/// Per-record options of aspirate/dispense primitives.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipettingParams {
    pub liquid_class: String,
    pub tip: TipSelection,
    pub rack_id: String,
    pub tube_id: String,
    pub rack_type: String,
    pub forced_rack_type: String,
}

impl PipettingParams {
    pub fn with_liquid_class(mut self, liquid_class: impl Into<String>) -> Self {
        self.liquid_class = liquid_class.into();
        self
    }

    pub fn with_tip(mut self, tip: TipSelection) -> Self {
        self.tip = tip;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransferOptions {
    pub label: Option<String>,
    /// Wash scheme applied after every tip use; `None` flushes instead.
    pub wash_scheme: Option<u8>,
    pub partition_by: PartitionBy,
    pub liquid_class: String,
    pub tips: TipSelection,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            label: None,
            wash_scheme: Some(1),
            partition_by: PartitionBy::Auto,
            liquid_class: String::new(),
            tips: TipSelection::Any,
        }
    }
}

impl TransferOptions {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_wash_scheme(mut self, wash_scheme: Option<u8>) -> Self {
        self.wash_scheme = wash_scheme;
        self
    }

    pub fn with_partition_by(mut self, partition_by: PartitionBy) -> Self {
        self.partition_by = partition_by;
        self
    }

    pub fn with_liquid_class(mut self, liquid_class: impl Into<String>) -> Self {
        self.liquid_class = liquid_class.into();
        self
    }

    pub fn with_tips(mut self, tips: TipSelection) -> Self {
        self.tips = tips;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SessionState {
    Open,
    Closed,
}

/// One planning session: an ordered instruction log plus the step cap and
/// splitting policy it was opened with.
pub struct Worklist {
    options: WorklistOptions,
    records: Vec<Record>,
    state: SessionState,
}

enum Endpoints<'a> {
    Distinct {
        source: &'a mut Labware,
        destination: &'a mut Labware,
    },
    Shared(&'a mut Labware),
}

impl Endpoints<'_> {
    fn source(&mut self) -> &mut Labware {
        match self {
            Endpoints::Distinct { source, .. } => source,
            Endpoints::Shared(labware) => labware,
        }
    }

    fn destination(&mut self) -> &mut Labware {
        match self {
            Endpoints::Distinct { destination, .. } => destination,
            Endpoints::Shared(labware) => labware,
        }
    }
}

impl Worklist {
    pub fn open(options: WorklistOptions) -> Result<Self, Error> {
        if !options.max_volume.is_finite() || options.max_volume <= 0.0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid max_volume: {}", options.max_volume)));
        }
        Ok(Self {
            options,
            records: Vec::new(),
            state: SessionState::Open,
        })
    }

    pub fn max_volume(&self) -> f64 {
        self.options.max_volume
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Encoded worklist lines, in emission order.
    pub fn lines(&self) -> Vec<String> {
        self.records.iter().map(Record::to_line).collect()
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Closed => Err(Error::new(ErrorKind::SessionClosed)
                .with_message("the planning session was already finalized")),
        }
    }

    /// Buffers a comment, one record per non-empty line. Comments are
    /// accepted even after the session closed.
    pub fn comment(&mut self, comment: &str) -> Result<(), Error> {
        if comment.contains(';') {
            return Err(Error::new(ErrorKind::Usage).with_message("illegal semicolon in comment"));
        }
        for line in comment.lines() {
            let line = line.trim();
            if !line.is_empty() {
                self.records.push(Record::Comment {
                    text: line.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Washes the tips used by the preceding aspirate records.
    pub fn wash(&mut self, scheme: u8) -> Result<(), Error> {
        self.ensure_open()?;
        self.records.push(Record::wash(scheme)?);
        Ok(())
    }

    /// Decontamination wash followed by a normal wash.
    pub fn decontaminate(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.records.push(Record::Decontaminate);
        Ok(())
    }

    /// Discards tip contents without washing.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.records.push(Record::Flush);
        Ok(())
    }

    /// Forces execution of the queued pipetting records at this point.
    pub fn commit(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.records.push(Record::Break);
        Ok(())
    }

    /// Switches the disposable tip type. Only valid at the start of the
    /// worklist or directly after a break.
    pub fn set_diti(&mut self, index: u32) -> Result<(), Error> {
        self.ensure_open()?;
        if !(self.records.is_empty() || self.records.last().is_some_and(Record::is_break)) {
            return Err(Error::new(ErrorKind::Usage).with_message(
                "tip type can only be switched at the beginning or right after a break",
            ));
        }
        self.records.push(Record::SetDiti { index });
        Ok(())
    }

    /// Emits a single aspirate record for a known rack position.
    pub fn aspirate_at(
        &mut self,
        rack_label: &str,
        position: usize,
        volume: f64,
        params: &PipettingParams,
    ) -> Result<(), Error> {
        let fields = self.pipetting_fields(rack_label, position, volume, params)?;
        self.records.push(Record::Aspirate(fields));
        Ok(())
    }

    /// Emits a single dispense record for a known rack position.
    pub fn dispense_at(
        &mut self,
        rack_label: &str,
        position: usize,
        volume: f64,
        params: &PipettingParams,
    ) -> Result<(), Error> {
        let fields = self.pipetting_fields(rack_label, position, volume, params)?;
        self.records.push(Record::Dispense(fields));
        Ok(())
    }

    fn pipetting_fields(
        &self,
        rack_label: &str,
        position: usize,
        volume: f64,
        params: &PipettingParams,
    ) -> Result<Pipetting, Error> {
        self.ensure_open()?;
        if volume > self.options.max_volume {
            return Err(Error::new(ErrorKind::InvalidVolume)
                .with_message(format!(
                    "volume {volume} exceeds the step cap {}",
                    self.options.max_volume
                ))
                .with_labware(rack_label)
                .with_volume(volume));
        }
        let fields = Pipetting::new(rack_label, position, volume)?
            .with_liquid_class(&params.liquid_class)?
            .with_rack_metadata(
                &params.rack_id,
                &params.tube_id,
                &params.rack_type,
                &params.forced_rack_type,
            )?
            .with_tip_mask(params.tip.mask()?);
        Ok(fields)
    }

    /// Aspirates from labware wells: removes the volumes from the ledger
    /// and emits one record per well with a positive volume.
    pub fn aspirate<S: AsRef<str>>(
        &mut self,
        labware: &mut Labware,
        wells: &[S],
        volumes: &[f64],
        label: Option<&str>,
        params: &PipettingParams,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        labware.remove(wells, volumes, label)?;
        if let Some(label) = label {
            self.comment(label)?;
        }
        let volumes = broadcast(volumes, wells.len());
        for (well, volume) in wells.iter().zip(volumes) {
            if volume > 0.0 {
                let position = labware.position(well.as_ref())?;
                self.aspirate_at(labware.name(), position, volume, params)?;
            }
        }
        Ok(())
    }

    /// Dispenses into labware wells, mixing the given compositions into
    /// the ledger, and emits one record per well with a positive volume.
    pub fn dispense<S: AsRef<str>>(
        &mut self,
        labware: &mut Labware,
        wells: &[S],
        volumes: &[f64],
        label: Option<&str>,
        compositions: Option<&[Composition]>,
        params: &PipettingParams,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        labware.add(wells, volumes, label, compositions)?;
        if let Some(label) = label {
            self.comment(label)?;
        }
        let volumes = broadcast(volumes, wells.len());
        for (well, volume) in wells.iter().zip(volumes) {
            if volume > 0.0 {
                let position = labware.position(well.as_ref())?;
                self.dispense_at(labware.name(), position, volume, params)?;
            }
        }
        Ok(())
    }

    /// Moves volumes from source wells to destination wells, splitting
    /// oversized volumes and keeping volume/composition bookkeeping exact
    /// across every step.
    pub fn transfer<S: AsRef<str>, D: AsRef<str>>(
        &mut self,
        source: &mut Labware,
        source_wells: &[S],
        destination: &mut Labware,
        destination_wells: &[D],
        volumes: &[f64],
        options: &TransferOptions,
    ) -> Result<(), Error> {
        let endpoints = Endpoints::Distinct {
            source,
            destination,
        };
        self.run_transfer(endpoints, source_wells, destination_wells, volumes, options)
    }

    /// Transfer within a single labware, e.g. for mixing or serial
    /// dilutions on one plate.
    pub fn transfer_within<S: AsRef<str>, D: AsRef<str>>(
        &mut self,
        labware: &mut Labware,
        source_wells: &[S],
        destination_wells: &[D],
        volumes: &[f64],
        options: &TransferOptions,
    ) -> Result<(), Error> {
        self.run_transfer(
            Endpoints::Shared(labware),
            source_wells,
            destination_wells,
            volumes,
            options,
        )
    }

    fn run_transfer<S: AsRef<str>, D: AsRef<str>>(
        &mut self,
        mut endpoints: Endpoints<'_>,
        source_wells: &[S],
        destination_wells: &[D],
        volumes: &[f64],
        options: &TransferOptions,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        let source_wells: Vec<String> = source_wells
            .iter()
            .map(|w| w.as_ref().to_string())
            .collect();
        let destination_wells: Vec<String> = destination_wells
            .iter()
            .map(|w| w.as_ref().to_string())
            .collect();
        let tips = options.tips.tips()?;
        let plan = {
            let shared = matches!(endpoints, Endpoints::Shared(_));
            let src = endpoints.source();
            let (source_name, source_is_trough) = (src.name().to_string(), src.is_trough());
            let dst = endpoints.destination();
            let (destination_name, destination_is_trough) = if shared {
                (source_name.clone(), source_is_trough)
            } else {
                (dst.name().to_string(), dst.is_trough())
            };
            plan_transfer(&PlanRequest {
                source_wells: &source_wells,
                destination_wells: &destination_wells,
                volumes,
                step_cap: self.options.max_volume,
                auto_split: self.options.auto_split,
                partition_by: options.partition_by,
                source_name: &source_name,
                destination_name: &destination_name,
                source_is_trough,
                destination_is_trough,
                tips: &tips,
                label: options.label.as_deref(),
            })?
        };
        debug!(
            steps = plan.step_count,
            split_steps = plan.split_steps,
            label = options.label.as_deref().unwrap_or(""),
            "executing transfer plan"
        );

        // the label covers the whole logical operation, not each step
        if let Some(label) = &options.label {
            self.comment(label)?;
        }
        let params = PipettingParams::default()
            .with_liquid_class(&options.liquid_class)
            .with_tip(options.tips.clone());
        for item in &plan.items {
            match item {
                PlanItem::Step(step) => {
                    let wells = [step.source.as_str()];
                    self.aspirate(endpoints.source(), &wells, &[step.volume], None, &params)?;
                    let composition =
                        endpoints.source().get_well_composition(&step.source)?;
                    let wells = [step.destination.as_str()];
                    self.dispense(
                        endpoints.destination(),
                        &wells,
                        &[step.volume],
                        None,
                        Some(&[composition]),
                        &params,
                    )?;
                    match options.wash_scheme {
                        Some(scheme) => self.wash(scheme)?,
                        None => self.flush()?,
                    }
                }
                PlanItem::Break => self.commit()?,
            }
        }

        // condense the per-step ledger entries into one logical operation
        if plan.step_count > 0 {
            let label = condensed_label(options.label.as_deref(), plan.split_steps);
            match endpoints {
                Endpoints::Shared(labware) => {
                    labware.condense_log(plan.step_count * 2, CondenseLabel::Custom(label));
                }
                Endpoints::Distinct {
                    source,
                    destination,
                } => {
                    source.condense_log(plan.step_count, CondenseLabel::Custom(label.clone()));
                    destination.condense_log(plan.step_count, CondenseLabel::Custom(label));
                }
            }
        }
        Ok(())
    }

    /// Writes the worklist to a `.gwl` file, replacing any existing file.
    pub fn save(&self, filepath: &Path) -> Result<(), Error> {
        let name = filepath
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !name.contains(".gwl") {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("the worklist filename must carry the .gwl extension"));
        }
        let text = self.lines().join("\r\n");
        fs::write(filepath, text).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("could not write worklist {}", filepath.display()))
                .with_source(err)
        })
    }

    /// Finalizes the session: writes the attached sink, marks the session
    /// closed, and hands back the encoded lines.
    pub fn close(&mut self) -> Result<Vec<String>, Error> {
        self.ensure_open()?;
        if let Some(filepath) = self.options.filepath.clone() {
            self.save(&filepath)?;
        }
        self.state = SessionState::Closed;
        Ok(self.lines())
    }
}

impl Drop for Worklist {
    fn drop(&mut self) {
        if self.state == SessionState::Open {
            if let Some(filepath) = self.options.filepath.clone() {
                if let Err(err) = self.save(&filepath) {
                    error!(error = %err, "could not write worklist on session exit");
                }
            }
            self.state = SessionState::Closed;
        }
    }
}

fn condensed_label(label: Option<&str>, split_steps: usize) -> String {
    match (label, split_steps) {
        (Some(label), 0) => label.to_string(),
        (Some(label), n) => format!("{label} ({n} large-volume steps)"),
        (None, 0) => String::new(),
        (None, n) => format!("{n} large-volume steps"),
    }
}

fn broadcast(volumes: &[f64], n: usize) -> Vec<f64> {
    if volumes.len() == 1 {
        vec![volumes[0]; n]
    } else {
        volumes.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::{PipettingParams, TransferOptions, Worklist, WorklistOptions};
    use crate::core::error::ErrorKind;
    use crate::core::labware::{InitialVolumes, Labware, LabwareOptions, TroughOptions};
    use crate::core::tips::TipSelection;

    fn plate(name: &str, initial: f64) -> Labware {
        Labware::new(
            name,
            3,
            2,
            LabwareOptions::new(1000.0, 25_000.0)
                .with_initial_volumes(InitialVolumes::Uniform(initial)),
        )
        .expect("labware")
    }

    fn open() -> Worklist {
        Worklist::open(WorklistOptions::default()).expect("worklist")
    }

    #[test]
    fn comments_split_lines_and_reject_semicolons() {
        let mut wl = open();
        wl.comment("one\n\n  two  ").expect("comment");
        assert_eq!(wl.lines(), vec!["C;one", "C;two"]);
        let err = wl.comment("a;b").expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn primitive_records_encode_in_order() {
        let mut wl = open();
        wl.aspirate_at("plate", 1, 100.0, &PipettingParams::default())
            .expect("aspirate");
        wl.dispense_at("plate", 4, 100.0, &PipettingParams::default())
            .expect("dispense");
        wl.wash(1).expect("wash");
        wl.decontaminate().expect("decontaminate");
        wl.flush().expect("flush");
        wl.commit().expect("commit");
        assert_eq!(
            wl.lines(),
            vec![
                "A;plate;;;1;;100.00;;;;",
                "D;plate;;;4;;100.00;;;;",
                "W1;",
                "WD;",
                "F;",
                "B;",
            ]
        );
    }

    #[test]
    fn set_diti_requires_start_or_break() {
        let mut wl = open();
        wl.set_diti(2).expect("at start");
        wl.commit().expect("commit");
        wl.set_diti(3).expect("after break");
        wl.wash(1).expect("wash");
        let err = wl.set_diti(4).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn step_cap_is_enforced_on_primitives() {
        let mut wl = open();
        let err = wl
            .aspirate_at("plate", 1, 951.0, &PipettingParams::default())
            .expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::InvalidVolume);
    }

    #[test]
    fn single_pair_large_volume_split_matches_golden_sequence() {
        let mut src = plate("A", 12_000.0);
        let mut dst = plate("B", 2000.0);
        let mut wl = open();
        wl.transfer(
            &mut src,
            &["A01"],
            &mut dst,
            &["A01"],
            &[2000.0],
            &TransferOptions::default().with_label("Transfer more than 2x the max"),
        )
        .expect("transfer");
        assert_eq!(
            wl.lines(),
            vec![
                "C;Transfer more than 2x the max",
                "A;A;;;1;;667.00;;;;",
                "D;B;;;1;;667.00;;;;",
                "W1;",
                "A;A;;;1;;667.00;;;;",
                "D;B;;;1;;667.00;;;;",
                "W1;",
                "A;A;;;1;;666.00;;;;",
                "D;B;;;1;;666.00;;;;",
                "W1;",
                "B;",
            ]
        );
        assert_eq!(src.volume_of("A01").expect("volume"), 10_000.0);
        assert_eq!(dst.volume_of("A01").expect("volume"), 4000.0);
        // exactly one condensed history entry per labware
        assert_eq!(src.history().len(), 2);
        assert_eq!(dst.history().len(), 2);
        assert_eq!(
            src.history()[1].label.as_deref(),
            Some("Transfer more than 2x the max (2 large-volume steps)")
        );
    }

    #[test]
    fn explicit_tip_sets_are_stamped_on_every_record() {
        let mut src = plate("A", 12_000.0);
        let mut dst = plate("B", 2000.0);
        let mut wl = open();
        wl.transfer(
            &mut src,
            &["A01", "B01"],
            &mut dst,
            &["A01", "B01"],
            &[500.0],
            &TransferOptions::default().with_tips(TipSelection::Set(vec![1, 4])),
        )
        .expect("transfer");
        let lines = wl.lines();
        let pipetting: Vec<&String> = lines
            .iter()
            .filter(|l| l.starts_with('A') || l.starts_with('D'))
            .collect();
        assert_eq!(pipetting.len(), 4);
        for line in pipetting {
            assert!(line.ends_with(";;9;"), "line {line} should carry mask 9");
        }
    }

    #[test]
    fn wash_opt_out_flushes_instead() {
        let mut src = plate("A", 12_000.0);
        let mut dst = plate("B", 2000.0);
        let mut wl = open();
        wl.transfer(
            &mut src,
            &["A01"],
            &mut dst,
            &["A01"],
            &[100.0],
            &TransferOptions::default().with_wash_scheme(None),
        )
        .expect("transfer");
        assert_eq!(
            wl.lines(),
            vec!["A;A;;;1;;100.00;;;;", "D;B;;;1;;100.00;;;;", "F;"]
        );
    }

    #[test]
    fn transfer_within_mixes_one_labware() {
        let mut plate = plate("P", 3000.0);
        let mut wl = open();
        wl.transfer_within(
            &mut plate,
            &["A01"],
            &["B01"],
            &[500.0],
            &TransferOptions::default().with_label("mix down"),
        )
        .expect("transfer");
        assert_eq!(plate.volume_of("A01").expect("volume"), 2500.0);
        assert_eq!(plate.volume_of("B01").expect("volume"), 3500.0);
        // both the removal and the addition condense into one entry
        assert_eq!(plate.history().len(), 2);
        assert_eq!(plate.history()[1].label.as_deref(), Some("mix down"));
    }

    #[test]
    fn composition_follows_the_transfer() {
        let mut water = Labware::trough(
            "water",
            8,
            1,
            TroughOptions::new(0.0, 100_000.0)
                .with_initial_volumes(InitialVolumes::Uniform(50_000.0)),
        )
        .expect("trough");
        let mut dst = Labware::new(
            "plate",
            1,
            1,
            LabwareOptions::new(0.0, 10_000.0)
                .with_initial_volumes(InitialVolumes::Uniform(100.0)),
        )
        .expect("labware");
        let mut wl = open();
        wl.transfer(
            &mut water,
            &["A01"],
            &mut dst,
            &["A01"],
            &[100.0],
            &TransferOptions::default(),
        )
        .expect("transfer");
        let comp = dst.get_well_composition("A01").expect("composition");
        assert_eq!(comp.get("water").copied(), Some(0.5));
        assert_eq!(comp.get("plate").copied(), Some(0.5));
    }

    #[test]
    fn failed_split_leaves_prior_steps_committed() {
        let mut src = plate("A", 12_000.0);
        // destination can only absorb the first split step
        let mut dst = Labware::new(
            "B",
            3,
            2,
            LabwareOptions::new(0.0, 700.0),
        )
        .expect("labware");
        let mut wl = open();
        let err = wl
            .transfer(
                &mut src,
                &["A01"],
                &mut dst,
                &["A01"],
                &[2000.0],
                &TransferOptions::default(),
            )
            .expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::VolumeOverflow);
        // the first step and the second aspirate stay applied
        assert_eq!(src.volume_of("A01").expect("volume"), 12_000.0 - 2.0 * 667.0);
        assert_eq!(dst.volume_of("A01").expect("volume"), 667.0);
    }

    #[test]
    fn closed_sessions_reject_mutations_but_accept_comments() {
        let mut wl = open();
        wl.wash(1).expect("wash");
        let lines = wl.close().expect("close");
        assert_eq!(lines, vec!["W1;"]);
        assert!(wl.is_closed());

        let err = wl.wash(1).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::SessionClosed);
        let err = wl.close().expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::SessionClosed);
        wl.comment("still buffered").expect("comment");
        assert_eq!(wl.lines(), vec!["W1;", "C;still buffered"]);
    }

    #[test]
    fn save_writes_crlf_joined_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.gwl");
        let mut wl = open();
        wl.comment("hello").expect("comment");
        wl.wash(1).expect("wash");
        wl.save(&path).expect("save");
        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text, "C;hello\r\nW1;");

        let err = wl.save(&dir.path().join("run.txt")).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn close_writes_the_attached_sink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("auto.gwl");
        let mut wl = Worklist::open(WorklistOptions::default().with_filepath(&path))
            .expect("worklist");
        wl.wash(2).expect("wash");
        wl.close().expect("close");
        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text, "W2;");
    }

    #[test]
    fn dropping_an_open_session_writes_the_sink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dropped.gwl");
        {
            let mut wl = Worklist::open(WorklistOptions::default().with_filepath(&path))
                .expect("worklist");
            wl.comment("scope exit").expect("comment");
        }
        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text, "C;scope exit");
    }
}
