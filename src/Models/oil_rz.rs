//! Slightly compressible single-phase oil on a cylindrical grid.
//!
//! Interior cells:
//! `V (φ(p)/B(p) - φ(p⁰)/B(p⁰)) + ht Σ T (p - p_nb) / (μ B_up) = 0`.
//! Ghost cells carry the well, outer and no-flow conditions of [`RZCore`].
use crate::Grid::cells::{Cell, CellKind};
use crate::Grid::variables::VarOil;
use crate::Models::model_api::{ModelError, RZCore, ReservoirModel, TimeLimits, WellState};
use crate::Models::props::{Period, Properties};
use crate::Utils::units::Scales;
use log::info;

#[derive(Debug, Clone)]
pub struct OilRZ {
    pub core: RZCore<VarOil>,
}

impl OilRZ {
    pub fn new(props: &Properties) -> Result<Self, ModelError> {
        let core = RZCore::from_props(props)?;
        info!("single-phase oil model processed!");
        Ok(Self { core })
    }

    pub fn b_oil(&self, p: f64) -> f64 {
        let oil = &self.core.oil;
        oil.b_ref / (1.0 + oil.compressibility * (p - self.core.p_init))
    }

    fn mobility(&self, p: f64) -> f64 {
        1.0 / (self.core.oil.visc * self.b_oil(p))
    }

    fn storage(&self, cell: &Cell<VarOil>, p: f64) -> f64 {
        self.core.porosity(cell.layer, p) / self.b_oil(p)
    }
}

impl ReservoirModel for OilRZ {
    type Var = VarOil;

    fn cells(&self) -> &[Cell<VarOil>] {
        &self.core.cells
    }
    fn cells_mut(&mut self) -> &mut [Cell<VarOil>] {
        &mut self.core.cells
    }
    fn stencil(&self, idx: usize) -> &[usize] {
        self.core.grid.stencil(idx)
    }

    fn residual(&self, idx: usize, out: &mut [f64]) {
        let cells = &self.core.cells;
        let cell = &cells[idx];
        if cell.kind != CellKind::Middle {
            let nebr = &cells[self.core.ghost_nebr(idx)];
            out[0] = self
                .core
                .boundary_pressure_residual(idx, self.mobility(nebr.u_next.p));
            return;
        }
        let p = cell.u_next.p;
        let acc = cell.V * (self.storage(cell, p) - self.storage(cell, cell.u_prev.p));
        let flux: f64 = self.core.grid.stencil(idx)[1..]
            .iter()
            .map(|&nb| {
                let nebr = &cells[nb];
                let p_nb = nebr.u_next.p;
                let upwind = if p >= p_nb { p } else { p_nb };
                self.core.grid.trans(cell, nebr) * self.mobility(upwind) * (p - p_nb)
            })
            .sum();
        out[0] = acc + self.core.ht * flux;
    }

    fn get_rate(&self, idx: usize) -> f64 {
        let nebr = &self.core.cells[self.core.ghost_nebr(idx)];
        self.core.well_inflow(idx, self.mobility(nebr.u_next.p))
    }

    fn well(&self) -> &WellState {
        &self.core.well
    }
    fn well_mut(&mut self) -> &mut WellState {
        &mut self.core.well
    }
    fn schedule(&self) -> &[Period] {
        &self.core.schedule
    }
    fn scales(&self) -> &Scales {
        &self.core.scales
    }
    fn set_time_step(&mut self, ht: f64) {
        self.core.ht = ht;
    }

    fn set_initial_state(&mut self) {
        let p = self.core.p_init;
        for cell in self.core.cells.iter_mut() {
            cell.set_all_layers(VarOil { p });
        }
        self.core.ht = self.core.limits.ht_init;
    }

    fn time_limits(&self) -> TimeLimits {
        self.core.limits
    }
}
