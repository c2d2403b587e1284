//! Well-rate balancing.
//!
//! With several perforated cells on one rate-controlled well, the split of the total rate
//! between cells must give one consistent wellbore pressure. The mismatch is
//! `H = Σ (p[k+1] - p[k])² / 2` over consecutive well cells. The balancer runs a damped
//! Gauss-Newton loop on the split:
//! 1. sensitivities `dpdq[i][j]` by central differences: rate moved from the first well cell
//!    (the reference) to cell `j + 1` and back, one full Newton solve per side
//! 2. normal equations of the linearised pressure differences, `(n-1) x (n-1)`, solved by LU
//! 3. `dq[0] = -Σ dq[1..]` keeps the total rate, `q += damping * dq`, Newton re-solve
//!
//! Each sensitivity column needs two Newton solves, so one correction costs `2 (n - 1) + 2`
//! Newton solves.
use crate::Grid::variables::Variable;
use crate::Models::model_api::{ControlMode, ReservoirModel};
use crate::Solver::errors::SimError;
use crate::Solver::newton::{ConvergenceStatus, NewtonSolver};
use crate::Solver::solver_settings::RateBalanceConfig;
use crate::Utils::units::EQUALITY_TOLERANCE;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceStatus {
    /// fewer than two perforated cells, BHP control or zero rate
    Skipped,
    /// initial mismatch below the start threshold
    AlreadyBalanced,
    Converged,
    NotConverged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceReport {
    pub status: BalanceStatus,
    pub iterations: usize,
    pub h0: f64,
    pub h: f64,
}

#[derive(Debug, Clone)]
pub struct RateBalancer {
    pub config: RateBalanceConfig,
    /// rate corrections of the last iteration
    pub dq: Vec<f64>,
    /// n x (n-1) sensitivities of the last iteration
    pub dpdq: DMatrix<f64>,
    /// sensitivity and restore solves that hit the Newton iteration cap
    pub unconverged_trials: usize,
}

fn well_pressures<M: ReservoirModel>(model: &M, keys: &[usize]) -> Vec<f64> {
    keys.iter()
        .map(|&idx| model.cells()[idx].u_next.pressure())
        .collect()
}

impl RateBalancer {
    pub fn new(config: RateBalanceConfig) -> Self {
        Self {
            config,
            dq: Vec::new(),
            dpdq: DMatrix::zeros(0, 0),
            unconverged_trials: 0,
        }
    }

    /// Newton solve whose state is only used for sensitivities; non-convergence is logged
    fn trial_solve<M: ReservoirModel>(
        &mut self,
        model: &mut M,
        newton: &mut NewtonSolver,
    ) -> Result<(), SimError> {
        let report = newton.solve_step(model)?;
        if report.status != ConvergenceStatus::Converged {
            self.unconverged_trials += 1;
            warn!(
                "trial Newton solve hit {} iterations: err = {:e} in cell {} var {}",
                report.iterations, report.err_newton, report.worst_cell, report.worst_var
            );
        }
        Ok(())
    }

    /// Balances the split for the step ending at `t`. The Newton solve after each correction
    /// gives the state that is committed, so it goes through the non-convergence policy.
    pub fn balance<M: ReservoirModel>(
        &mut self,
        model: &mut M,
        newton: &mut NewtonSolver,
        t: f64,
    ) -> Result<BalanceReport, SimError> {
        let well = model.well();
        let n = well.q_cell.len();
        if n < 2 || well.control != ControlMode::Rate || well.q_sum.abs() <= EQUALITY_TOLERANCE {
            return Ok(BalanceReport {
                status: BalanceStatus::Skipped,
                iterations: 0,
                h0: 0.0,
                h: 0.0,
            });
        }
        let cfg = self.config.clone();
        let h0 = model.solve_h().abs();
        let mut h = h0;
        if h0 <= cfg.start_threshold {
            return Ok(BalanceReport {
                status: BalanceStatus::AlreadyBalanced,
                iterations: 0,
                h0,
                h,
            });
        }
        let mult = cfg.damping;
        let mut iterations = 0;
        while h > h0 / cfg.h0_divisor || h > cfg.h_tol {
            if iterations >= cfg.max_iterations {
                warn!(
                    "rate balancing stopped after {} iterations: H = {:e} (H0 = {:e})",
                    iterations, h, h0
                );
                if cfg.strict {
                    return Err(SimError::RateBalanceNotConverged { h, iterations });
                }
                return Ok(BalanceReport {
                    status: BalanceStatus::NotConverged,
                    iterations,
                    h0,
                    h,
                });
            }
            self.solve_dq(model, newton, mult)?;
            for (q, dq) in model.well_mut().q_cell.values_mut().zip(&self.dq) {
                *q += mult * dq;
            }
            let report = newton.solve_step(model)?;
            newton.enforce_policy(&report, t)?;
            h = model.solve_h().abs();
            iterations += 1;
            let scales = *model.scales();
            for (idx, q) in &model.well().q_cell {
                debug!(
                    "cell {}: q = {} m3/day, p = {} bar",
                    idx,
                    scales.rate_to_m3_per_day(*q),
                    scales.pressure_to_bar(model.cells()[*idx].u_next.pressure())
                );
            }
        }
        info!(
            "rate balancing converged in {} iterations: H = {:e} (H0 = {:e})",
            iterations, h, h0
        );
        Ok(BalanceReport {
            status: BalanceStatus::Converged,
            iterations,
            h0,
            h,
        })
    }

    /// Sensitivities, restore of the unperturbed solution, then the reduced system.
    fn solve_dq<M: ReservoirModel>(
        &mut self,
        model: &mut M,
        newton: &mut NewtonSolver,
        mult: f64,
    ) -> Result<(), SimError> {
        self.fill_dpdq(model, newton, mult)?;
        self.trial_solve(model, newton)?;
        self.solve_system(model)?;
        let scales = *model.scales();
        for (idx, dq) in model.well().q_cell.keys().zip(&self.dq) {
            debug!("dq[{}] = {} m3/day", idx, scales.rate_to_m3_per_day(*dq));
        }
        Ok(())
    }

    fn fill_dpdq<M: ReservoirModel>(
        &mut self,
        model: &mut M,
        newton: &mut NewtonSolver,
        mult: f64,
    ) -> Result<(), SimError> {
        let keys: Vec<usize> = model.well().q_cell.keys().copied().collect();
        let n = keys.len();
        let ratio = mult * self.config.perturbation / n as f64;
        let q_sum = model.well().q_sum;
        let saved = model.well().q_cell.clone();
        let it0 = keys[0];
        self.dpdq = DMatrix::zeros(n, n - 1);
        for (j, &cell) in keys.iter().enumerate().skip(1) {
            model.set_rate_deviation(cell, -ratio);
            model.set_rate_deviation(it0, ratio);
            self.trial_solve(model, newton)?;
            let p1 = well_pressures(model, &keys);

            model.set_rate_deviation(cell, 2.0 * ratio);
            model.set_rate_deviation(it0, -2.0 * ratio);
            self.trial_solve(model, newton)?;
            let p2 = well_pressures(model, &keys);

            model.well_mut().q_cell = saved.clone();
            for i in 0..n {
                self.dpdq[(i, j - 1)] = (p2[i] - p1[i]) / (2.0 * ratio * q_sum);
            }
        }
        Ok(())
    }

    fn solve_system<M: ReservoirModel>(&mut self, model: &M) -> Result<(), SimError> {
        let keys: Vec<usize> = model.well().q_cell.keys().copied().collect();
        let n = keys.len();
        let p = well_pressures(model, &keys);
        let d = &self.dpdq;
        let mut mat = DMatrix::zeros(n - 1, n - 1);
        let mut b = DVector::zeros(n - 1);
        for i in 0..n - 1 {
            for j in 0..n - 1 {
                mat[(i, j)] = (0..n - 1)
                    .map(|k| (d[(k + 1, j)] - d[(k, j)]) * (d[(k + 1, i)] - d[(k, i)]))
                    .sum::<f64>();
            }
            b[i] = -(0..n - 1)
                .map(|k| (p[k + 1] - p[k]) * (d[(k + 1, i)] - d[(k, i)]))
                .sum::<f64>();
        }
        let x = mat
            .lu()
            .solve(&b)
            .filter(|x| x.iter().all(|v| v.is_finite()))
            .ok_or(SimError::SingularRateSystem)?;
        self.dq = vec![0.0; n];
        self.dq[0] = -x.iter().sum::<f64>();
        for i in 0..n - 1 {
            self.dq[i + 1] = x[i];
        }
        Ok(())
    }
}
