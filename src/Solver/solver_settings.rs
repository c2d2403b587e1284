//! Solver configuration. Defaults reproduce the classic constants of the Newton / time step /
//! rate balancing loops; every struct can be overridden from JSON or from the
//! `solver_settings` section of a task file.
use crate::Models::model_api::ModelError;
use crate::Models::task_parser::{Section, get_bool, get_f64, get_string, get_usize};
use crate::Solver::errors::SimError;
use RustedSciThe::command_interpreter::task_parser::DocumentMap;
use serde::{Deserialize, Serialize};

/// What to do when Newton hits its iteration cap before the tolerances are met
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NonConvergencePolicy {
    /// keep the unconverged state (logged and counted)
    #[default]
    Accept,
    /// reject the step and retry with a smaller time step
    Retry,
    /// stop the run
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewtonConfig {
    pub max_iterations: usize,
    /// relative change of the unknowns
    pub err_tol: f64,
    /// change of the volume-averaged pressure
    pub d_pres_tol: f64,
    /// change of the volume-averaged saturation
    pub d_sat_tol: f64,
    pub policy: NonConvergencePolicy,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            err_tol: 1e-4,
            d_pres_tol: 1e-4,
            d_sat_tol: 1e-8,
            policy: NonConvergencePolicy::Accept,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeStepConfig {
    pub grow_factor: f64,
    /// Newton iterations below this grow the step, above it shrink the step
    pub iterations_threshold: usize,
    /// attempts per step after a retryable failure
    pub max_retries: usize,
}

impl Default for TimeStepConfig {
    fn default() -> Self {
        Self {
            grow_factor: 1.5,
            iterations_threshold: 6,
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBalanceConfig {
    /// no balancing while the initial H stays below this
    pub start_threshold: f64,
    /// loop runs while `H > H0 / h0_divisor` ...
    pub h0_divisor: f64,
    /// ... or `H > h_tol`
    pub h_tol: f64,
    pub damping: f64,
    /// relative rate perturbation before division by the number of cells and damping
    pub perturbation: f64,
    pub max_iterations: usize,
    /// unconverged balancing is an error instead of a warning
    pub strict: bool,
}

impl Default for RateBalanceConfig {
    fn default() -> Self {
        Self {
            start_threshold: 0.1,
            h0_divisor: 50.0,
            h_tol: 0.05,
            damping: 0.9,
            perturbation: 0.001,
            max_iterations: 30,
            strict: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum BackendKind {
    #[default]
    DenseLu,
    BiCgStab {
        rtol: f64,
        atol: f64,
        max_iter: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SolverSettings {
    pub newton: NewtonConfig,
    pub time_step: TimeStepConfig,
    pub rate_balance: RateBalanceConfig,
    pub backend: BackendKind,
    /// one `.dat` snapshot per accepted step
    pub write_snaps: bool,
    /// `loglevel` key of the task file, read by the binary before the run starts
    pub log_level: Option<String>,
    /// file that duplicates the terminal log
    pub log_file: Option<String>,
}

fn opt<T>(
    sec: &Section,
    key: &str,
    get: fn(&Section, &str) -> Result<T, ModelError>,
) -> Result<Option<T>, ModelError> {
    if sec.contains_key(key) {
        get(sec, key).map(Some)
    } else {
        Ok(None)
    }
}

impl SolverSettings {
    pub fn new(
        newton: NewtonConfig,
        time_step: TimeStepConfig,
        rate_balance: RateBalanceConfig,
        backend: BackendKind,
    ) -> Self {
        Self {
            newton,
            time_step,
            rate_balance,
            backend,
            write_snaps: false,
            log_level: None,
            log_file: None,
        }
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let bad = |msg: &str| Err(SimError::Settings(msg.to_string()));
        if self.newton.max_iterations == 0 {
            return bad("Newton needs at least one iteration");
        }
        if self.newton.err_tol <= 0.0 {
            return bad("Newton tolerance must be positive");
        }
        if self.time_step.grow_factor <= 1.0 {
            return bad("time step grow factor must exceed 1");
        }
        let rb = &self.rate_balance;
        if !(rb.damping > 0.0 && rb.damping <= 1.0) {
            return bad("rate balancing damping must be in (0, 1]");
        }
        if rb.perturbation <= 0.0 || rb.h0_divisor <= 0.0 || rb.h_tol <= 0.0 {
            return bad("rate balancing perturbation and tolerances must be positive");
        }
        if let BackendKind::BiCgStab { rtol, max_iter, .. } = &self.backend {
            if *rtol <= 0.0 || *max_iter == 0 {
                return bad("BiCGStab needs a positive tolerance and iteration limit");
            }
        }
        Ok(())
    }

    /// Settings from the optional `solver_settings` section; missing keys keep defaults.
    pub fn from_document(doc: &DocumentMap) -> Result<Self, SimError> {
        let mut settings = SolverSettings::default();
        let Some(sec) = doc.get("solver_settings") else {
            return Ok(settings);
        };
        let newton = &mut settings.newton;
        if let Some(v) = opt(sec, "max_newton_iterations", get_usize)? {
            newton.max_iterations = v;
        }
        if let Some(v) = opt(sec, "newton_tolerance", get_f64)? {
            newton.err_tol = v;
        }
        if let Some(v) = opt(sec, "non_convergence", get_string)? {
            newton.policy = match v.to_lowercase().as_str() {
                "accept" => NonConvergencePolicy::Accept,
                "retry" => NonConvergencePolicy::Retry,
                "fail" => NonConvergencePolicy::Fail,
                other => {
                    return Err(SimError::Settings(format!(
                        "unknown non-convergence policy `{}`",
                        other
                    )));
                }
            };
        }
        if let Some(v) = opt(sec, "grow_factor", get_f64)? {
            settings.time_step.grow_factor = v;
        }
        if let Some(v) = opt(sec, "iterations_threshold", get_usize)? {
            settings.time_step.iterations_threshold = v;
        }
        if let Some(v) = opt(sec, "max_retries", get_usize)? {
            settings.time_step.max_retries = v;
        }
        if let Some(v) = opt(sec, "balance_max_iterations", get_usize)? {
            settings.rate_balance.max_iterations = v;
        }
        if let Some(v) = opt(sec, "balance_strict", get_bool)? {
            settings.rate_balance.strict = v;
        }
        if let Some(v) = opt(sec, "write_snaps", get_bool)? {
            settings.write_snaps = v;
        }
        settings.log_level = opt(sec, "loglevel", get_string)?;
        settings.log_file = opt(sec, "log_file", get_string)?;
        if let Some(v) = opt(sec, "backend", get_string)? {
            settings.backend = match v.to_lowercase().as_str() {
                "dense" | "denselu" => BackendKind::DenseLu,
                "bicgstab" => BackendKind::BiCgStab {
                    rtol: opt(sec, "linear_rtol", get_f64)?.unwrap_or(1e-10),
                    atol: opt(sec, "linear_atol", get_f64)?.unwrap_or(1e-14),
                    max_iter: opt(sec, "linear_max_iter", get_usize)?.unwrap_or(1000),
                },
                other => {
                    return Err(SimError::Settings(format!("unknown backend `{}`", other)));
                }
            };
        }
        settings.validate()?;
        Ok(settings)
    }
}
