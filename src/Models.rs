//! # Models Module
//!
//! Physics collaborators of the solver and everything needed to set them up.
//!
//! - `model_api` - the [`model_api::ReservoirModel`] trait consumed by the solver, the well
//!   state (`Qcell`, target rate / BHP, schedule periods) and the shared cylindrical core
//! - `props` - serde property structs with validation and JSON load/save
//! - `task_parser` - scenario task files in the RustedSciThe document format
//! - `oil_rz` - single-phase oil
//! - `gas_oil_rz` - black-oil gas/oil with bubble-point reconciliation
pub mod gas_oil_rz;
pub mod model_api;
pub mod oil_rz;
pub mod props;
pub mod task_parser;
