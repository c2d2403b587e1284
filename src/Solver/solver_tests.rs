use crate::Grid::cells::Cell;
use crate::Grid::variables::{VarOil, Variable};
use crate::Models::gas_oil_rz::GasOilRZ;
use crate::Models::model_api::{ReservoirModel, TimeLimits, WellState};
use crate::Models::oil_rz::OilRZ;
use crate::Models::props::{Period, Properties, WellControl};
use crate::Solver::driver::Simulation;
use crate::Solver::errors::SimError;
use crate::Solver::linear_backend::create_backend;
use crate::Solver::newton::{ConvergenceStatus, NewtonSolver};
use crate::Solver::output::{MemorySnapshots, NoSnapshots};
use crate::Solver::rate_balance::{BalanceStatus, RateBalancer};
use crate::Solver::solver_settings::{
    BackendKind, NewtonConfig, NonConvergencePolicy, RateBalanceConfig, SolverSettings,
};
use crate::Utils::units::Scales;
use approx::assert_relative_eq;
use std::fs;
use tempfile::tempdir;

/// end of the first step of the demo, hours
const STEP_END: f64 = 100.0 / 3600.0;

fn one_layer(rate: f64, end_time: f64) -> Properties {
    let mut props = Properties::two_layer_demo();
    props.layers.truncate(1);
    props.layers[0].perm_r = 100.0;
    props.layers[0].height = 10.0;
    props.cells_num_z = 1;
    props.cells_num_r = 15;
    props.perforations = vec![[0.0, 10.0]];
    props.schedule = vec![Period {
        end_time,
        control: WellControl::Rate(rate),
    }];
    props
}

fn short_two_layer(end_time: f64) -> Properties {
    let mut props = Properties::two_layer_demo();
    props.schedule = vec![Period {
        end_time,
        control: WellControl::Rate(50.0),
    }];
    props
}

fn newton() -> NewtonSolver {
    NewtonSolver::new(NewtonConfig::default(), create_backend(&BackendKind::DenseLu))
}

fn prepared<M: ReservoirModel>(model: &mut M) {
    model.set_initial_state();
    model.set_period(0).unwrap();
    let ht = model.time_limits().ht_init;
    model.set_time_step(ht);
}

#[test]
fn newton_converges_on_single_layer_oil() {
    let mut model = OilRZ::new(&one_layer(100.0, 3600.0)).unwrap();
    prepared(&mut model);
    let mut newton = newton();
    let report = newton.solve_step(&mut model).unwrap();
    assert_eq!(report.status, ConvergenceStatus::Converged);
    assert!(report.iterations < 8);
    assert!(report.err_newton <= 1e-4 || report.d_aver[0] <= 1e-4);
    // the well is drawn down below the reservoir pressure
    let well_idx = *model.well().q_cell.keys().next().unwrap();
    assert!(model.cells()[well_idx].u_next.p < 200.0);
    // discrete well equation holds: inflow equals the allocated rate
    assert_relative_eq!(
        model.get_rate(well_idx),
        model.well().q_sum,
        max_relative = 1e-3
    );
}

#[test]
fn iterative_backend_gives_the_same_step() {
    let props = one_layer(100.0, 3600.0);
    let mut a = OilRZ::new(&props).unwrap();
    let mut b = OilRZ::new(&props).unwrap();
    prepared(&mut a);
    prepared(&mut b);
    newton().solve_step(&mut a).unwrap();
    let mut iterative = NewtonSolver::new(
        NewtonConfig::default(),
        create_backend(&BackendKind::BiCgStab {
            rtol: 1e-10,
            atol: 1e-20,
            max_iter: 2000,
        }),
    );
    iterative.solve_step(&mut b).unwrap();
    for (ca, cb) in a.cells().iter().zip(b.cells()) {
        assert_relative_eq!(ca.u_next.p, cb.u_next.p, max_relative = 1e-6);
    }
}

#[test]
fn single_perforated_cell_keeps_exact_rate() {
    let props = one_layer(100.0, 1800.0);
    let model = OilRZ::new(&props).unwrap();
    let mut sim = Simulation::new(model, SolverSettings::default(), NoSnapshots).unwrap();
    let summary = sim.start().unwrap();
    let well = sim.model.well();
    assert_eq!(well.q_cell.len(), 1);
    let q = *well.q_cell.values().next().unwrap();
    assert_eq!(q, well.q_sum);
    assert_relative_eq!(sim.model.scales().rate_to_m3_per_day(q), 100.0, max_relative = 1e-12);
    assert_eq!(summary.balance_runs, 0);
    assert_relative_eq!(summary.final_time_hours, 0.5, epsilon = 1e-12);

    let mut balancer = RateBalancer::new(RateBalanceConfig::default());
    let mut newton = newton();
    let report = balancer.balance(&mut sim.model, &mut newton, 0.5).unwrap();
    assert_eq!(report.status, BalanceStatus::Skipped);
}

#[test]
fn two_cells_are_balanced_and_rate_is_conserved() {
    let mut model = OilRZ::new(&short_two_layer(600.0)).unwrap();
    prepared(&mut model);
    let mut newton = newton();
    newton.solve_step(&mut model).unwrap();
    let q_sum = model.well().q_sum;
    let split_before: Vec<f64> = model.well().q_cell.values().copied().collect();
    // proportional to the perforated thickness: 5 m + 5 m
    assert_relative_eq!(split_before[0], split_before[1], max_relative = 1e-12);

    let mut balancer = RateBalancer::new(RateBalanceConfig::default());
    let report = balancer.balance(&mut model, &mut newton, STEP_END).unwrap();
    assert!(report.h0 > 0.1, "layer contrast must trigger balancing, H0 = {}", report.h0);
    assert_eq!(report.status, BalanceStatus::Converged);
    assert!(report.h <= 0.05);

    let p: Vec<f64> = model
        .well()
        .q_cell
        .keys()
        .map(|&idx| model.cells()[idx].u_next.p)
        .collect();
    // H = Σ Δp² / 2
    assert!((p[1] - p[0]).abs() <= (2.0f64 * 0.05).sqrt());
    assert_relative_eq!(model.well().total_rate(), q_sum, max_relative = 1e-10);
    let scales = *model.scales();
    assert_relative_eq!(
        scales.rate_to_m3_per_day(model.well().total_rate()),
        50.0,
        max_relative = 1e-10
    );
    // the more permeable lower layer takes the larger share
    let split_after: Vec<f64> = model.well().q_cell.values().copied().collect();
    assert!(split_after[1] > split_after[0]);
    assert_eq!(balancer.dq.len(), 2);
    assert_relative_eq!(balancer.dq[0], -balancer.dq[1], max_relative = 1e-12);
}

#[test]
fn balancing_iteration_cap_is_reported() {
    let mut model = OilRZ::new(&short_two_layer(600.0)).unwrap();
    prepared(&mut model);
    let mut newton = newton();
    newton.solve_step(&mut model).unwrap();
    let snapshot: Vec<Cell<VarOil>> = model.cells().to_vec();

    let mut lenient = RateBalancer::new(RateBalanceConfig {
        max_iterations: 0,
        ..Default::default()
    });
    let report = lenient.balance(&mut model, &mut newton, STEP_END).unwrap();
    assert_eq!(report.status, BalanceStatus::NotConverged);
    assert_eq!(report.iterations, 0);

    model.cells_mut().clone_from_slice(&snapshot);
    let mut strict = RateBalancer::new(RateBalanceConfig {
        max_iterations: 0,
        strict: true,
        ..Default::default()
    });
    let err = strict.balance(&mut model, &mut newton, STEP_END).unwrap_err();
    assert!(matches!(err, SimError::RateBalanceNotConverged { .. }));
    assert!(err.is_retryable());
}

#[test]
fn shut_in_period_zeroes_rates() {
    let mut props = one_layer(100.0, 1800.0);
    props.layers[0].cells_z = 2;
    props.cells_num_z = 2;
    props.schedule.push(Period {
        end_time: 3600.0,
        control: WellControl::Rate(0.0),
    });
    let model = OilRZ::new(&props).unwrap();
    let mut sim = Simulation::new(model, SolverSettings::default(), MemorySnapshots::default())
        .unwrap();
    sim.start().unwrap();
    let well = sim.model.well();
    assert_eq!(well.q_sum, 0.0);
    assert_eq!(well.q_cell.len(), 2);
    assert!(well.q_cell.values().all(|&q| q == 0.0));
    assert_eq!(sim.time.cur_period, 1);
    // snapshot before every step plus the final one
    assert_eq!(sim.snapshotter.frames.len(), sim.summary.steps + 1);
}

#[test]
fn accepted_steps_respect_limits_and_boundaries() {
    let mut props = one_layer(100.0, 5000.0);
    props.schedule.push(Period {
        end_time: 9000.0,
        control: WellControl::Rate(60.0),
    });
    props.time.ht_max = 1500.0;
    let model = OilRZ::new(&props).unwrap();
    let mut sim = Simulation::new(model, SolverSettings::default(), NoSnapshots).unwrap();
    sim.start().unwrap();
    let hours: Vec<f64> = sim.history.records.iter().map(|r| r.t_hours).collect();
    let boundary = 5000.0 / 3600.0;
    assert!(hours.iter().any(|&t| (t - boundary).abs() < 1e-12));
    for w in hours.windows(2) {
        let dt = w[1] - w[0];
        // the final record repeats the end time
        if dt == 0.0 {
            continue;
        }
        assert!(dt <= 1500.0 / 3600.0 + 1e-12);
        let crosses = w[0] < boundary - 1e-12 && w[1] > boundary + 1e-12;
        assert!(!crosses, "step [{}, {}] jumps over the period boundary", w[0], w[1]);
    }
    assert_relative_eq!(*hours.last().unwrap(), 2.5, epsilon = 1e-12);
}

#[test]
fn history_written_to_output_dir() {
    let dir = tempdir().expect("Failed to create temp dir");
    let model = OilRZ::new(&one_layer(100.0, 900.0)).unwrap();
    let mut sim = Simulation::new(model, SolverSettings::default(), NoSnapshots)
        .unwrap()
        .with_output_dir(dir.path().to_path_buf());
    let summary = sim.start().unwrap();
    let content = fs::read_to_string(dir.path().join("P_dyn.dat")).unwrap();
    assert_eq!(content.lines().count(), summary.steps + 1);
    assert!(summary.final_well_pressure_bar < 200.0);
    assert_relative_eq!(summary.final_rate_m3_day, 100.0, max_relative = 1e-10);
}

#[test]
fn newton_fail_policy_stops_the_run() {
    let model = OilRZ::new(&one_layer(100.0, 900.0)).unwrap();
    let mut settings = SolverSettings::default();
    settings.newton.max_iterations = 1;
    settings.newton.err_tol = 1e-30;
    settings.newton.d_pres_tol = 0.0;
    settings.newton.policy = NonConvergencePolicy::Fail;
    let mut sim = Simulation::new(model, settings.clone(), NoSnapshots).unwrap();
    assert!(matches!(
        sim.start(),
        Err(SimError::NewtonNotConverged { .. })
    ));

    settings.newton.policy = NonConvergencePolicy::Accept;
    let model = OilRZ::new(&one_layer(100.0, 900.0)).unwrap();
    let mut sim = Simulation::new(model, settings, NoSnapshots).unwrap();
    let summary = sim.start().unwrap();
    assert_eq!(summary.unconverged_newton, summary.steps);
}

/// Oil model with injected failures: the residual turns into NaN for steps longer than
/// `max_ht`, and with `unsettle_on_rate_change` every phase update after the first rate
/// deviation kicks the pressure of one far cell by ±1 bar, so Newton never settles.
struct FlakyOil {
    inner: OilRZ,
    max_ht: f64,
    unsettle_on_rate_change: bool,
    unsettled: bool,
    kick: f64,
}

impl FlakyOil {
    fn new(props: &Properties, max_ht: f64) -> Self {
        Self {
            inner: OilRZ::new(props).unwrap(),
            max_ht,
            unsettle_on_rate_change: false,
            unsettled: false,
            kick: 1.0,
        }
    }
}

impl ReservoirModel for FlakyOil {
    type Var = VarOil;

    fn cells(&self) -> &[Cell<VarOil>] {
        self.inner.cells()
    }
    fn cells_mut(&mut self) -> &mut [Cell<VarOil>] {
        self.inner.cells_mut()
    }
    fn stencil(&self, idx: usize) -> &[usize] {
        self.inner.stencil(idx)
    }
    fn residual(&self, idx: usize, out: &mut [f64]) {
        if self.inner.core.ht > self.max_ht {
            out[0] = f64::NAN;
        } else {
            self.inner.residual(idx, out);
        }
    }
    fn reconcile_phase_state(&mut self) {
        if self.unsettled {
            let grid = &self.inner.core.grid;
            let far = grid.idx(grid.nr, 1, 0);
            // alternating sign keeps u_next away from u_iter
            self.kick = -self.kick;
            self.inner.core.cells[far].u_next.p += self.kick;
        }
    }
    fn get_rate(&self, idx: usize) -> f64 {
        self.inner.get_rate(idx)
    }
    fn well(&self) -> &WellState {
        self.inner.well()
    }
    fn well_mut(&mut self) -> &mut WellState {
        self.inner.well_mut()
    }
    fn set_rate_deviation(&mut self, idx: usize, ratio: f64) {
        if self.unsettle_on_rate_change {
            self.unsettled = true;
        }
        self.inner.set_rate_deviation(idx, ratio);
    }
    fn schedule(&self) -> &[Period] {
        self.inner.schedule()
    }
    fn scales(&self) -> &Scales {
        self.inner.scales()
    }
    fn set_time_step(&mut self, ht: f64) {
        self.inner.set_time_step(ht);
    }
    fn set_initial_state(&mut self) {
        self.inner.set_initial_state();
    }
    fn time_limits(&self) -> TimeLimits {
        self.inner.time_limits()
    }
}

#[test]
fn failed_steps_are_rolled_back_and_retried() {
    let props = one_layer(100.0, 3600.0);
    let model = FlakyOil::new(&props, 400.0 / 3600.0);
    let mut sim = Simulation::new(model, SolverSettings::default(), MemorySnapshots::default())
        .unwrap();
    let summary = sim.start().unwrap();
    assert!(summary.rejected_steps > 0);
    assert_relative_eq!(summary.final_time_hours, 1.0, epsilon = 1e-12);
    for cell in sim.model.cells() {
        assert!(cell.u_next.p.is_finite());
        assert_eq!(cell.u_prev, cell.u_next);
    }
    let hours: Vec<f64> = sim.history.records.iter().map(|r| r.t_hours).collect();
    for w in hours.windows(2) {
        assert!(w[1] - w[0] <= 400.0 / 3600.0 + 1e-12);
    }
}

#[test]
fn retries_exhausted_below_minimal_step() {
    let props = one_layer(100.0, 3600.0);
    let model = FlakyOil::new(&props, 10.0 / 3600.0);
    let mut sim = Simulation::new(model, SolverSettings::default(), NoSnapshots).unwrap();
    assert!(matches!(
        sim.start(),
        Err(SimError::TimeStepExhausted { .. })
    ));
}

#[test]
fn gas_comes_out_of_solution_near_the_well() {
    let mut props = one_layer(20.0, 7200.0);
    props.initial.p_bub = 199.5e5;
    let model = GasOilRZ::new(&props).unwrap();
    let mut sim = Simulation::new(model, SolverSettings::default(), NoSnapshots).unwrap();
    sim.start().unwrap();
    let cells = sim.model.cells();
    assert!(cells.iter().any(|c| !c.is_ghost() && c.u_next.SATUR));
    for c in cells.iter().filter(|c| !c.is_ghost()) {
        let v = c.u_next;
        assert!(v.p.is_finite());
        assert!((0.0..=1.0).contains(&v.s));
        if v.SATUR {
            assert_eq!(v.p_bub, v.p);
        }
    }
    // far field stays undersaturated
    let far = sim.model.core.grid.idx(sim.model.core.grid.nr, 1, 0);
    assert!(!cells[far].u_next.SATUR);
    assert!(cells[far].u_next.pressure() > 199.5);
}

fn unsettled_after_balancing() -> FlakyOil {
    let mut model = FlakyOil::new(&short_two_layer(600.0), f64::INFINITY);
    model.unsettle_on_rate_change = true;
    model
}

fn strict_newton_settings(policy: NonConvergencePolicy) -> SolverSettings {
    let mut settings = SolverSettings::default();
    // only the relative-change criterion may declare convergence
    settings.newton.d_pres_tol = 0.0;
    settings.newton.policy = policy;
    settings
}

#[test]
fn committed_balancing_solve_obeys_fail_policy() {
    let mut model = unsettled_after_balancing();
    prepared(&mut model);
    let settings = strict_newton_settings(NonConvergencePolicy::Fail);
    let mut newton = NewtonSolver::new(settings.newton.clone(), create_backend(&BackendKind::DenseLu));
    let first = newton.solve_step(&mut model).unwrap();
    assert_eq!(first.status, ConvergenceStatus::Converged);
    newton.enforce_policy(&first, STEP_END).unwrap();

    let mut balancer = RateBalancer::new(settings.rate_balance.clone());
    let err = balancer.balance(&mut model, &mut newton, STEP_END).unwrap_err();
    assert!(matches!(err, SimError::NewtonNotConverged { .. }));
    // sensitivity solves are reported but do not stop balancing
    assert!(balancer.unconverged_trials > 0);

    let model = unsettled_after_balancing();
    let mut sim = Simulation::new(model, settings, NoSnapshots).unwrap();
    assert!(matches!(
        sim.start(),
        Err(SimError::NewtonNotConverged { .. })
    ));
}

#[test]
fn committed_balancing_solve_is_counted_when_accepted() {
    let model = unsettled_after_balancing();
    let settings = strict_newton_settings(NonConvergencePolicy::Accept);
    let mut sim = Simulation::new(model, settings, NoSnapshots).unwrap();
    let summary = sim.start().unwrap();
    assert!(summary.balance_runs > 0);
    assert!(summary.unconverged_newton > 0);
    assert!(summary.unconverged_trials > 0);
}

#[test]
fn three_dimensional_run_keeps_the_well_rate() {
    let mut props = short_two_layer(3600.0);
    props.cells_num_phi = 3;
    props.cells_num_r = 8;
    let model = OilRZ::new(&props).unwrap();
    let mut sim = Simulation::new(model, SolverSettings::default(), NoSnapshots).unwrap();
    sim.start().unwrap();
    let well = sim.model.well();
    // two perforated layers times three sectors
    assert_eq!(well.q_cell.len(), 6);
    assert!(sim.summary.balance_runs > 0);
    assert_relative_eq!(well.total_rate(), well.q_sum, max_relative = 1e-10);
    let scales = *sim.model.scales();
    assert_relative_eq!(scales.rate_to_m3_per_day(well.q_sum), 50.0, max_relative = 1e-10);
    assert!(sim.model.cells().iter().all(|c| c.u_next.p.is_finite()));
}

#[test]
fn balanced_split_is_rescaled_on_rate_change() {
    let mut props = short_two_layer(1800.0);
    props.schedule.push(Period {
        end_time: 3600.0,
        control: WellControl::Rate(80.0),
    });
    let model = OilRZ::new(&props).unwrap();
    let mut sim = Simulation::new(model, SolverSettings::default(), NoSnapshots).unwrap();
    sim.start().unwrap();
    assert_eq!(sim.time.cur_period, 1);
    assert!(sim.summary.balance_runs > 0);
    let well = sim.model.well();
    assert_relative_eq!(well.total_rate(), well.q_sum, max_relative = 1e-10);
    let scales = *sim.model.scales();
    assert_relative_eq!(scales.rate_to_m3_per_day(well.q_sum), 80.0, max_relative = 1e-10);
    // the balanced split survives the new target instead of falling back to thickness weights
    let split: Vec<f64> = well.q_cell.values().copied().collect();
    assert_eq!(split.len(), 2);
    assert!(split[1] > split[0]);
}
