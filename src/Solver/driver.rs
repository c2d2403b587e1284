//! Time-marching driver.
//!
//! ```text
//! INIT -> { CONTROL -> SNAPSHOT -> NEWTON_STEP -> RATE_BALANCE -> COMMIT } while cur_t < Tt
//!      -> FINAL_SNAPSHOT -> WRITE_SUMMARY
//! ```
//! A step failing with a retryable error is rolled back (`u_next = u_iter = u_prev`, well split
//! restored, clock reset) and retried with a smaller time step.
use crate::Grid::cells::{copy_time_layer, revert_time_layer};
use crate::Models::model_api::{ControlMode, ReservoirModel};
use crate::Solver::errors::SimError;
use crate::Solver::linear_backend::create_backend;
use crate::Solver::newton::NewtonSolver;
use crate::Solver::output::{RunSummary, Snapshotter, WellHistory};
use crate::Solver::rate_balance::{BalanceStatus, RateBalancer};
use crate::Solver::solver_settings::{NonConvergencePolicy, SolverSettings};
use crate::Solver::time_control::{StepPlan, TimeController};
use log::{info, warn};
use std::path::PathBuf;

pub struct Simulation<M: ReservoirModel, S: Snapshotter> {
    pub model: M,
    pub settings: SolverSettings,
    pub newton: NewtonSolver,
    pub balancer: RateBalancer,
    pub time: TimeController,
    pub snapshotter: S,
    pub history: WellHistory,
    /// where `P_dyn.dat`, `S_dyn.dat`, `q_cells.dat` go; nothing is written when unset
    pub output_dir: Option<PathBuf>,
    pub summary: RunSummary,
}

impl<M: ReservoirModel, S: Snapshotter> Simulation<M, S> {
    pub fn new(model: M, settings: SolverSettings, snapshotter: S) -> Result<Self, SimError> {
        settings.validate()?;
        let newton = NewtonSolver::new(settings.newton.clone(), create_backend(&settings.backend));
        let balancer = RateBalancer::new(settings.rate_balance.clone());
        let time = TimeController::new(
            settings.time_step.clone(),
            model.time_limits(),
            model.period_ends(),
        );
        Ok(Self {
            model,
            settings,
            newton,
            balancer,
            time,
            snapshotter,
            history: WellHistory::default(),
            output_dir: None,
            summary: RunSummary::default(),
        })
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = Some(dir);
        self
    }

    /// Runs the whole schedule.
    pub fn start(&mut self) -> Result<RunSummary, SimError> {
        self.model.set_initial_state();
        self.model.set_period(0)?;
        self.time = TimeController::new(
            self.settings.time_step.clone(),
            self.model.time_limits(),
            self.model.period_ends(),
        );
        self.summary = RunSummary::default();
        let mut iterations = self.settings.newton.max_iterations;
        let mut step = 0;
        while !self.time.finished() {
            self.history.record(&self.model, self.time.cur_t);
            let plan = self.time.control(iterations);
            if let Some(period) = plan.period_switched {
                self.model.set_period(period)?;
            }
            self.snapshotter.snapshot(step, &self.model)?;
            step += 1;
            iterations = self.do_next_step(plan)?;
            copy_time_layer(self.model.cells_mut());
            self.summary.steps += 1;
            info!(
                "t = {:.4} h, ht = {:.4} h, Newton iterations {}",
                self.model.scales().time_to_hours(self.time.cur_t),
                self.model.scales().time_to_hours(self.time.ht),
                iterations
            );
        }
        self.snapshotter.snapshot(step, &self.model)?;
        self.history.record(&self.model, self.time.cur_t);
        if let Some(dir) = &self.output_dir {
            self.history.write(dir)?;
        }
        self.finish_summary();
        self.summary.print();
        Ok(self.summary.clone())
    }

    fn hard_failure(&self, err: &SimError) -> bool {
        !err.is_retryable()
            || (self.settings.newton.policy == NonConvergencePolicy::Fail
                && matches!(err, SimError::NewtonNotConverged { .. }))
    }

    /// Newton solve plus rate balancing, with rollback and retry on retryable failures.
    /// Returns the iteration count of the last Newton solve.
    fn do_next_step(&mut self, plan: StepPlan) -> Result<usize, SimError> {
        let well_before = self.model.well().clone();
        let mut plan = plan;
        let mut retries = 0;
        loop {
            self.model.set_time_step(plan.ht);
            let err = match self.try_step(&plan) {
                Ok(iterations) => return Ok(iterations),
                Err(err) => err,
            };
            if self.hard_failure(&err) {
                return Err(err);
            }
            retries += 1;
            self.summary.rejected_steps += 1;
            revert_time_layer(self.model.cells_mut());
            *self.model.well_mut() = well_before.clone();
            let exhausted = SimError::TimeStepExhausted {
                t: plan.t_start,
                retries,
            };
            if retries > self.settings.time_step.max_retries {
                warn!("step at t = {} failed: {}", plan.t_start, err);
                return Err(exhausted);
            }
            plan = match self.time.reject_step() {
                Some(p) => p,
                None => {
                    warn!("step at t = {} failed at ht_min: {}", plan.t_start, err);
                    return Err(exhausted);
                }
            };
            warn!("step rejected ({}), retrying with ht = {}", err, plan.ht);
        }
    }

    fn try_step(&mut self, plan: &StepPlan) -> Result<usize, SimError> {
        let report = self.newton.solve_step(&mut self.model)?;
        let t_end = plan.t_start + plan.ht;
        self.newton.enforce_policy(&report, t_end)?;
        let balance = self
            .balancer
            .balance(&mut self.model, &mut self.newton, t_end)?;
        match balance.status {
            BalanceStatus::Converged => self.summary.balance_runs += 1,
            BalanceStatus::NotConverged => {
                self.summary.balance_runs += 1;
                self.summary.balance_not_converged += 1;
            }
            BalanceStatus::Skipped | BalanceStatus::AlreadyBalanced => {}
        }
        Ok(self
            .newton
            .last_report()
            .map_or(report.iterations, |r| r.iterations))
    }

    fn finish_summary(&mut self) {
        let scales = *self.model.scales();
        let well = self.model.well();
        self.summary.newton_iterations = self.newton.total_iterations;
        self.summary.unconverged_newton = self.newton.accepted_unconverged;
        self.summary.unconverged_trials = self.balancer.unconverged_trials;
        self.summary.final_time_hours = scales.time_to_hours(self.time.cur_t);
        self.summary.final_well_pressure_bar =
            self.history.records.last().map_or(0.0, |r| r.p_well);
        let total = match well.control {
            ControlMode::Rate => well.total_rate(),
            ControlMode::Bhp => well.q_cell.keys().map(|&idx| self.model.get_rate(idx)).sum(),
        };
        self.summary.final_rate_m3_day = scales.rate_to_m3_per_day(total);
    }
}
