//! # Solver Module
//!
//! Model-independent solver framework: everything here works on any
//! [`crate::Models::model_api::ReservoirModel`].
//!
//! | Part | Role |
//! |------|------|
//! | `linear_backend`, `bicgstab` | one assemble/solve round trip per Newton iteration |
//! | `newton` | Newton step solver with convergence report |
//! | `time_control` | adaptive step size, period switches, boundary landing |
//! | `rate_balance` | Jacobian-based redistribution of the well rate between perforated cells |
//! | `driver` | time marching with rollback and retry |
//! | `output` | snapshots, well history, run summary |
pub mod bicgstab;
pub mod driver;
pub mod errors;
pub mod linear_backend;
pub mod newton;
pub mod output;
pub mod rate_balance;
pub mod solver_settings;
pub mod time_control;
#[cfg(test)]
mod solver_tests;
