//! What the solver needs from a physics model.
//!
//! The solver core never looks at fluid properties: it sees the cell store, the stencil, one
//! residual block and one Jacobian block per cell pair, and the well state (`Qcell` map, target
//! rate or bottom-hole pressure). [`RZCore`] holds the parts every cylindrical model shares.
use crate::Grid::cells::{Cell, CellKind};
use crate::Grid::cyl_grid::{CylGrid, GridError, GridLayer};
use crate::Grid::variables::Variable;
use crate::Models::props::{Period, Properties, RightBoundary, WellControl};
use crate::Utils::units::{
    BAR_TO_PA, EQUALITY_TOLERANCE, MilliDarcyToM2, SECONDS_IN_HOUR, Scales, cPToPaSec,
    rate_to_si,
};
use log::{info, warn};
use std::collections::BTreeMap;
use thiserror::Error;

/// Relative step of the finite-difference Jacobian
pub const FD_STEP: f64 = 1.0e-6;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid properties: {0}")]
    InvalidProperties(String),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("schedule has no period {0}")]
    NoSuchPeriod(usize),
    #[error("task file: {0}")]
    TaskFile(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Dimensionless step limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeLimits {
    pub ht_init: f64,
    pub ht_min: f64,
    pub ht_max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Rate,
    Bhp,
}

/// Rate allocation of the well and the target of the active period (dimensionless).
#[derive(Debug, Clone, PartialEq)]
pub struct WellState {
    /// Qcell: rate per perforated well cell, ordered by cell index
    pub q_cell: BTreeMap<usize, f64>,
    /// perforated height represented by each well cell
    pub perf_weights: BTreeMap<usize, f64>,
    pub height_perf: f64,
    pub q_sum: f64,
    pub pwf: f64,
    pub control: ControlMode,
    pub period: usize,
}

impl WellState {
    pub fn new(perforated: &[(usize, f64)]) -> Self {
        let mut perf_weights = BTreeMap::new();
        for &(idx, h) in perforated {
            *perf_weights.entry(idx).or_insert(0.0) += h;
        }
        let height_perf = perf_weights.values().sum();
        let q_cell = perf_weights.keys().map(|&idx| (idx, 0.0)).collect();
        Self {
            q_cell,
            perf_weights,
            height_perf,
            q_sum: 0.0,
            pwf: 0.0,
            control: ControlMode::Rate,
            period: 0,
        }
    }

    pub fn is_perforated(&self, idx: usize) -> bool {
        self.perf_weights.contains_key(&idx)
    }

    pub fn total_rate(&self) -> f64 {
        self.q_cell.values().sum()
    }

    /// Switch boundary conditions to schedule period `period`.
    ///
    /// Rate control redistributes `Qcell` proportionally to the perforated height when the
    /// period is the first one or the previous period carried no rate; otherwise the existing
    /// split is rescaled by the ratio of the new and old targets. BHP control zeroes `Qcell`.
    pub fn apply_period(
        &mut self,
        period: usize,
        schedule: &[Period],
        scales: &Scales,
    ) -> Result<(), ModelError> {
        let current = schedule.get(period).ok_or(ModelError::NoSuchPeriod(period))?;
        self.period = period;
        match current.control {
            WellControl::Rate(rate) => {
                self.control = ControlMode::Rate;
                self.q_sum = rate_to_si(rate) / scales.Q_dim;
                let prev_rate = if period == 0 {
                    None
                } else {
                    schedule[period - 1].control.rate()
                };
                match prev_rate {
                    Some(prev) if prev.abs() >= EQUALITY_TOLERANCE => {
                        let ratio = rate / prev;
                        for q in self.q_cell.values_mut() {
                            *q *= ratio;
                        }
                    }
                    _ => {
                        for (idx, q) in self.q_cell.iter_mut() {
                            let weight = self.perf_weights[idx] / self.height_perf;
                            *q = self.q_sum * weight;
                        }
                    }
                }
                info!(
                    "period {}: rate control, Q_sum = {} m3/day",
                    period, rate
                );
            }
            WellControl::Bhp(pwf) => {
                self.control = ControlMode::Bhp;
                self.pwf = pwf / scales.P_dim;
                self.q_sum = 0.0;
                for q in self.q_cell.values_mut() {
                    *q = 0.0;
                }
                info!("period {}: BHP control, Pwf = {} bar", period, pwf / BAR_TO_PA);
            }
        }
        Ok(())
    }

    /// `Qcell[idx] += Q_sum * ratio`
    pub fn set_rate_deviation(&mut self, idx: usize, ratio: f64) {
        match self.q_cell.get_mut(&idx) {
            Some(q) => *q += self.q_sum * ratio,
            None => warn!("rate deviation for cell {} which is not perforated", idx),
        }
    }
}

pub trait ReservoirModel {
    type Var: Variable;

    fn cells(&self) -> &[Cell<Self::Var>];
    fn cells_mut(&mut self) -> &mut [Cell<Self::Var>];
    fn stencil(&self, idx: usize) -> &[usize];

    /// Residual block of cell `idx` evaluated on `u_next`, `out.len() == VAR_NUM`
    fn residual(&self, idx: usize, out: &mut [f64]);

    /// Derivatives of the residual of `idx` with respect to the unknowns of `nebr`,
    /// row-major `VAR_NUM x VAR_NUM`. Central differences on `u_next` unless overridden.
    fn jacobian_block(&mut self, idx: usize, nebr: usize, out: &mut [f64]) {
        let n = Self::Var::VAR_NUM;
        let mut plus = vec![0.0; n];
        let mut minus = vec![0.0; n];
        for v in 0..n {
            let x = self.cells()[nebr].u_next.primary(v);
            let h = FD_STEP * (1.0 + x.abs());
            self.cells_mut()[nebr].u_next.set_primary(v, x + h);
            self.residual(idx, &mut plus);
            self.cells_mut()[nebr].u_next.set_primary(v, x - h);
            self.residual(idx, &mut minus);
            self.cells_mut()[nebr].u_next.set_primary(v, x);
            for e in 0..n {
                out[e * n + v] = (plus[e] - minus[e]) / (2.0 * h);
            }
        }
    }

    /// Re-derive secondary state (phase flag, bubble point) after a Newton update
    fn reconcile_phase_state(&mut self) {}

    /// Inflow into the well through well cell `idx` computed from the pressure field
    fn get_rate(&self, idx: usize) -> f64;

    fn well(&self) -> &WellState;
    fn well_mut(&mut self) -> &mut WellState;
    fn schedule(&self) -> &[Period];
    fn scales(&self) -> &Scales;
    fn set_time_step(&mut self, ht: f64);
    fn set_initial_state(&mut self);
    fn time_limits(&self) -> TimeLimits;

    fn set_period(&mut self, period: usize) -> Result<(), ModelError> {
        let schedule = self.schedule().to_vec();
        let scales = *self.scales();
        self.well_mut().apply_period(period, &schedule, &scales)
    }

    fn set_rate_deviation(&mut self, idx: usize, ratio: f64) {
        self.well_mut().set_rate_deviation(idx, ratio);
    }

    /// `H = Σ (p[k+1] - p[k])² / 2` over consecutive perforated cells
    fn solve_h(&self) -> f64 {
        let cells = self.cells();
        let p: Vec<f64> = self
            .well()
            .q_cell
            .keys()
            .map(|&idx| cells[idx].u_next.pressure())
            .collect();
        p.windows(2).map(|w| (w[1] - w[0]).powi(2) / 2.0).sum()
    }

    fn volume(&self) -> f64 {
        self.cells().iter().map(|c| c.V).sum()
    }

    /// Dimensionless end times of the schedule periods
    fn period_ends(&self) -> Vec<f64> {
        let t_dim = self.scales().t_dim;
        self.schedule().iter().map(|p| p.end_time / t_dim).collect()
    }
}

/// Dimensionless skeleton layer
#[derive(Debug, Clone, PartialEq)]
pub struct RockLayer {
    pub porosity: f64,
    pub compressibility: f64,
}

/// Dimensionless fluid
#[derive(Debug, Clone, PartialEq)]
pub struct Fluid {
    pub visc: f64,
    pub b_ref: f64,
    pub compressibility: f64,
}

/// Grid, cells, well and scaled properties shared by the cylindrical models.
#[derive(Debug, Clone)]
pub struct RZCore<V: Variable> {
    pub grid: CylGrid,
    pub cells: Vec<Cell<V>>,
    pub well: WellState,
    pub schedule: Vec<Period>,
    pub scales: Scales,
    pub limits: TimeLimits,
    pub ht: f64,
    pub right_boundary: RightBoundary,
    pub rock: Vec<RockLayer>,
    pub oil: Fluid,
    /// reference (initial) pressure, also the outer boundary pressure
    pub p_init: f64,
}

impl<V: Variable> RZCore<V> {
    pub fn from_props(props: &Properties) -> Result<Self, ModelError> {
        props.validate()?;
        let scales = Scales::new(props.r_w, SECONDS_IN_HOUR, BAR_TO_PA, 1.0);
        let layers = props
            .layers
            .iter()
            .map(|l| GridLayer {
                height: l.height / scales.R_dim,
                cells_z: l.cells_z,
                perm_r: MilliDarcyToM2(l.perm_r) / scales.k_dim,
                perm_z: MilliDarcyToM2(l.perm_z) / scales.k_dim,
            })
            .collect();
        let grid = CylGrid::build(
            props.r_w / scales.R_dim,
            props.r_e / scales.R_dim,
            props.cells_num_r,
            props.cells_num_z,
            props.cells_num_phi,
            layers,
        )?;
        let mut perforated = Vec::new();
        for [top, bottom] in &props.perforations {
            perforated.extend(grid.perforated_cells(top / scales.R_dim, bottom / scales.R_dim)?);
        }
        let well = WellState::new(&perforated);
        let cells = grid.make_cells::<V>();
        let rock = props
            .layers
            .iter()
            .map(|l| RockLayer {
                porosity: l.porosity,
                compressibility: l.compressibility * scales.P_dim,
            })
            .collect();
        let oil = Fluid {
            visc: cPToPaSec(props.oil.visc) / scales.mu_dim,
            b_ref: props.oil.b_ref,
            compressibility: props.oil.compressibility * scales.P_dim,
        };
        let limits = TimeLimits {
            ht_init: props.time.ht_init / scales.t_dim,
            ht_min: props.time.ht_min / scales.t_dim,
            ht_max: props.time.ht_max / scales.t_dim,
        };
        info!(
            "grid {}x{}x{} built, {} perforated well cells",
            props.cells_num_r,
            props.cells_num_z,
            props.cells_num_phi,
            well.q_cell.len()
        );
        Ok(Self {
            grid,
            cells,
            well,
            schedule: props.schedule.clone(),
            scales,
            limits,
            ht: limits.ht_init,
            right_boundary: props.right_boundary,
            rock,
            oil,
            p_init: props.initial.p / scales.P_dim,
        })
    }

    pub fn porosity(&self, layer: usize, p: f64) -> f64 {
        let rock = &self.rock[layer];
        rock.porosity * (1.0 + rock.compressibility * (p - self.p_init))
    }

    /// First neighbour of a ghost cell: the interior cell it mirrors
    pub fn ghost_nebr(&self, idx: usize) -> usize {
        self.grid.stencil(idx)[1]
    }

    /// Pressure equation of a ghost cell. `mobility` is `kr/(μB)` evaluated at the neighbour,
    /// used only for rate-controlled perforated well cells.
    pub fn boundary_pressure_residual(&self, idx: usize, mobility: f64) -> f64 {
        let cell = &self.cells[idx];
        let nebr = &self.cells[self.ghost_nebr(idx)];
        let p = cell.u_next.pressure();
        let p_nb = nebr.u_next.pressure();
        match cell.kind {
            CellKind::Well => match self.well.control {
                ControlMode::Rate => match self.well.q_cell.get(&idx) {
                    Some(q) => self.grid.trans(cell, nebr) * mobility * (p_nb - p) - q,
                    None => p - p_nb,
                },
                ControlMode::Bhp if self.well.is_perforated(idx) => p - self.well.pwf,
                ControlMode::Bhp => p - p_nb,
            },
            CellKind::Right => match self.right_boundary {
                RightBoundary::ConstantPressure => p - self.p_init,
                RightBoundary::NoFlow => p - p_nb,
            },
            _ => p - p_nb,
        }
    }

    /// `T * mobility * (p_nb - p)` through the well face of cell `idx`
    pub fn well_inflow(&self, idx: usize, mobility: f64) -> f64 {
        let cell = &self.cells[idx];
        let nebr = &self.cells[self.ghost_nebr(idx)];
        self.grid.trans(cell, nebr) * mobility * (nebr.u_next.pressure() - cell.u_next.pressure())
    }
}
