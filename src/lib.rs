//! Purpose: In-silico liquid handling: stateful labware ledgers plus a
//! transfer-planning and worklist-emission engine.
//! Exports: `core` (engine modules), `api` (stable public surface),
//! `ingest` (protocol-file execution).
//! Invariants: All ledger mutations flow through the planning session; the
//! record line format is byte-exact for instrument consumers.
pub mod api;
pub mod core;
pub mod ingest;
