//! Newton step solver.
//!
//! One call to [`NewtonSolver::solve_step`] drives the discretised system of the current time
//! step toward convergence with the well rates / pressures held fixed. Every iteration:
//! 1. `u_iter = u_next` for all cells
//! 2. assemble `J dx = -R` in coordinate form and solve it with the linear backend
//! 3. `u_next += dx`, then the model reconciles its phase state
//! 4. relative change of every unknown (worst cell / variable kept) and the change of the
//!    volume-averaged pressure and saturation
//!
//! Iterations stop once the relative change drops below `err_tol`, or both averages settle, or
//! the iteration cap is hit. Hitting the cap is reported, never hidden; what happens next is
//! the caller's [`NonConvergencePolicy`].
use crate::Grid::cells::copy_iter_layer;
use crate::Grid::variables::Variable;
use crate::Models::model_api::ReservoirModel;
use crate::Solver::errors::{BackendError, SimError};
use crate::Solver::linear_backend::{LinearBackend, LinearSolver, Triplet};
use crate::Solver::solver_settings::{NewtonConfig, NonConvergencePolicy};
use crate::Utils::units::EQUALITY_TOLERANCE;
use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    Converged,
    MaxIterationsReached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewtonReport {
    pub status: ConvergenceStatus,
    pub iterations: usize,
    pub err_newton: f64,
    pub worst_cell: usize,
    pub worst_var: usize,
    /// last change of the volume-averaged pressure and saturation
    pub d_aver: [f64; 2],
}

#[derive(Debug, Clone)]
pub struct NewtonSolver {
    pub config: NewtonConfig,
    backend: LinearBackend,
    triplets: Vec<Triplet>,
    rhs: Vec<f64>,
    last: Option<NewtonReport>,
    /// steps accepted although the iteration cap was hit
    pub accepted_unconverged: usize,
    pub total_iterations: usize,
}

/// Volume-weighted average pressure and saturation
pub fn aver_values<M: ReservoirModel>(model: &M) -> (f64, f64) {
    let volume = model.volume();
    let mut p = 0.0;
    let mut s = 0.0;
    for cell in model.cells() {
        p += cell.V * cell.u_next.pressure();
        s += cell.V * cell.u_next.saturation();
    }
    if volume > 0.0 {
        (p / volume, s / volume)
    } else {
        (0.0, 0.0)
    }
}

/// Largest relative change `|x_next - x_iter| / |x_next|` with its cell and variable
pub fn convergence<M: ReservoirModel>(model: &M) -> (f64, usize, usize) {
    let mut err = 0.0;
    let mut worst = (0, 0);
    for (idx, cell) in model.cells().iter().enumerate() {
        for v in 0..M::Var::VAR_NUM {
            let next = cell.u_next.primary(v);
            if next.abs() > EQUALITY_TOLERANCE {
                let rel = (next - cell.u_iter.primary_as(v, &cell.u_next)).abs() / next.abs();
                if rel > err {
                    err = rel;
                    worst = (idx, v);
                }
            }
        }
    }
    (err, worst.0, worst.1)
}

impl NewtonSolver {
    pub fn new(config: NewtonConfig, backend: LinearBackend) -> Self {
        Self {
            config,
            backend,
            triplets: Vec::new(),
            rhs: Vec::new(),
            last: None,
            accepted_unconverged: 0,
            total_iterations: 0,
        }
    }

    pub fn last_report(&self) -> Option<&NewtonReport> {
        self.last.as_ref()
    }

    fn assemble<M: ReservoirModel>(&mut self, model: &mut M) {
        let n = M::Var::VAR_NUM;
        let cells_num = model.cells().len();
        self.triplets.clear();
        self.rhs.clear();
        self.rhs.resize(cells_num * n, 0.0);
        let mut res = vec![0.0; n];
        let mut block = vec![0.0; n * n];
        for idx in 0..cells_num {
            model.residual(idx, &mut res);
            for e in 0..n {
                self.rhs[idx * n + e] = -res[e];
            }
            let stencil = model.stencil(idx).to_vec();
            for nebr in stencil {
                model.jacobian_block(idx, nebr, &mut block);
                for e in 0..n {
                    for v in 0..n {
                        let value = block[e * n + v];
                        if value != 0.0 {
                            self.triplets.push((idx * n + e, nebr * n + v, value));
                        }
                    }
                }
            }
        }
    }

    fn copy_solution<M: ReservoirModel>(&self, model: &mut M) -> Result<(), SimError> {
        let n = M::Var::VAR_NUM;
        let dx = self.backend.solution();
        if dx.iter().any(|v| !v.is_finite()) {
            return Err(BackendError::NonFinite.into());
        }
        for (idx, cell) in model.cells_mut().iter_mut().enumerate() {
            for v in 0..n {
                cell.u_next.add_primary(v, dx[idx * n + v]);
            }
        }
        Ok(())
    }

    pub fn solve_step<M: ReservoirModel>(&mut self, model: &mut M) -> Result<NewtonReport, SimError> {
        let size = model.cells().len() * M::Var::VAR_NUM;
        if self.backend.size() != size {
            self.backend.init(size);
        }
        let cfg = self.config.clone();
        let (mut aver_p, mut aver_s) = aver_values(model);
        let (mut err, mut d_pres, mut d_sat) = (1.0, 1.0, 1.0);
        let mut worst = (0, 0);
        let mut iterations = 0;
        while err > cfg.err_tol
            && (d_sat > cfg.d_sat_tol || d_pres > cfg.d_pres_tol)
            && iterations < cfg.max_iterations
        {
            copy_iter_layer(model.cells_mut());
            self.assemble(model);
            self.backend.assemble(&self.triplets, &self.rhs)?;
            self.backend.solve()?;
            self.copy_solution(model)?;
            model.reconcile_phase_state();

            let (e, cell, var) = convergence(model);
            err = e;
            worst = (cell, var);
            let (p, s) = aver_values(model);
            d_pres = (p - aver_p).abs();
            d_sat = (s - aver_s).abs();
            aver_p = p;
            aver_s = s;
            iterations += 1;
            debug!(
                "Newton iter {}: err = {:e} (cell {}, var {}), dAverPres = {:e}, dAverSat = {:e}",
                iterations, err, cell, var, d_pres, d_sat
            );
        }
        let satisfied =
            err <= cfg.err_tol || (d_sat <= cfg.d_sat_tol && d_pres <= cfg.d_pres_tol);
        let report = NewtonReport {
            status: if satisfied {
                ConvergenceStatus::Converged
            } else {
                ConvergenceStatus::MaxIterationsReached
            },
            iterations,
            err_newton: err,
            worst_cell: worst.0,
            worst_var: worst.1,
            d_aver: [d_pres, d_sat],
        };
        self.total_iterations += iterations;
        self.last = Some(report.clone());
        Ok(report)
    }

    /// Applies the non-convergence policy to the report of an accepted-to-be step.
    pub fn enforce_policy(&mut self, report: &NewtonReport, t: f64) -> Result<(), SimError> {
        if report.status == ConvergenceStatus::Converged {
            return Ok(());
        }
        match self.config.policy {
            NonConvergencePolicy::Accept => {
                self.accepted_unconverged += 1;
                warn!(
                    "Newton hit {} iterations at t = {}: err = {:e} in cell {} var {}; state accepted",
                    report.iterations, t, report.err_newton, report.worst_cell, report.worst_var
                );
                Ok(())
            }
            NonConvergencePolicy::Retry | NonConvergencePolicy::Fail => {
                Err(SimError::NewtonNotConverged {
                    t,
                    err: report.err_newton,
                })
            }
        }
    }
}
