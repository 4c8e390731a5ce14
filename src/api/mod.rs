//! Purpose: Define the stable public Rust API boundary of the crate.
//! Exports: Ledger, planning, and worklist types needed by callers and the
//! CLI.
//! Role: Public, additive-only surface; engine internals stay in `core`.
//! Invariants: Downstream code imports from here, not from `core` paths.

mod dilution;
mod report;

pub use crate::core::composition::{combine, Composition};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::grid::Matrix;
pub use crate::core::labware::{
    shared_wells, CondenseLabel, HistoryEntry, InitialVolumes, Labware, LabwareOptions,
    TroughOptions,
};
pub use crate::core::plan::{partition_volume, PartitionBy};
pub use crate::core::records::{Pipetting, Record, MAX_INSTRUMENT_VOLUME};
pub use crate::core::tips::{decode_mask, encode_tips, TipSelection, TIP_COUNT};
pub use crate::core::worklist::{PipettingParams, TransferOptions, Worklist, WorklistOptions};
pub use dilution::{
    DilutionInstruction, DilutionMode, DilutionOptions, DilutionPlan, DilutionSource,
    DilutionTargets,
};
pub use report::{history_report, LabwareSnapshot};
