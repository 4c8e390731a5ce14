// Core modules implementing the labware ledger, planning, and record emission.
pub mod composition;
pub mod error;
pub mod grid;
pub mod labware;
pub mod plan;
pub mod records;
pub mod tips;
pub mod worklist;
