//! Black-oil gas/oil model with dissolved gas.
//!
//! Unknowns are `p` and, depending on the phase regime of the cell, the oil saturation
//! (saturated, free gas present) or the bubble-point pressure (undersaturated). After every
//! Newton update [`GasOilRZ::reconcile_phase_state`] moves cells between the regimes:
//! - saturated cell whose oil saturation exceeds one loses its free gas
//! - undersaturated cell whose bubble point exceeds the pressure releases gas
use crate::Grid::cells::{Cell, CellKind};
use crate::Grid::variables::{Var2phase, Variable};
use crate::Models::model_api::{
    Fluid, ModelError, RZCore, ReservoirModel, TimeLimits, WellState,
};
use crate::Models::props::{Period, Properties, RightBoundary};
use crate::Utils::units::{EQUALITY_TOLERANCE, Scales, cPToPaSec};
use log::{debug, info};

/// Largest oil saturation change accepted in one Newton iteration
pub const MAX_SAT_CHANGE: f64 = 0.1;

/// Dimensionless black-oil correlations
#[derive(Debug, Clone, PartialEq)]
pub struct Pvt {
    pub rs_slope: f64,
    pub b_o_slope: f64,
    pub b_g_coef: f64,
    pub n_o: f64,
    pub n_g: f64,
    pub s_or: f64,
    pub s_gc: f64,
}

/// Fluid state of one cell
#[derive(Debug, Clone, Copy)]
struct PhaseState {
    s_o: f64,
    rs: f64,
    b_o: f64,
    b_g: f64,
    oil_mob: f64,
    gas_mob: f64,
}

#[derive(Debug, Clone)]
pub struct GasOilRZ {
    pub core: RZCore<Var2phase>,
    pub gas: Fluid,
    pub pvt: Pvt,
    pub initial: Var2phase,
}

impl GasOilRZ {
    pub fn new(props: &Properties) -> Result<Self, ModelError> {
        props.validate_gas_oil()?;
        let core: RZCore<Var2phase> = RZCore::from_props(props)?;
        let p_dim = core.scales.P_dim;
        let (gas, pvt) = match (&props.gas, &props.pvt) {
            (Some(gas), Some(pvt)) => (gas, pvt),
            _ => {
                return Err(ModelError::InvalidProperties(
                    "gas-oil model needs `gas` and `pvt` sections".to_string(),
                ));
            }
        };
        let gas = Fluid {
            visc: cPToPaSec(gas.visc) / core.scales.mu_dim,
            b_ref: gas.b_ref,
            compressibility: gas.compressibility * p_dim,
        };
        let pvt = Pvt {
            rs_slope: pvt.rs_slope * p_dim,
            b_o_slope: pvt.b_o_slope * p_dim,
            b_g_coef: pvt.b_g_coef / p_dim,
            n_o: pvt.n_o,
            n_g: pvt.n_g,
            s_or: pvt.s_or,
            s_gc: pvt.s_gc,
        };
        let p = props.initial.p / p_dim;
        let p_bub = props.initial.p_bub / p_dim;
        let initial = if p_bub >= p {
            Var2phase {
                p,
                s: props.initial.s_o,
                p_bub: p,
                SATUR: true,
            }
        } else {
            Var2phase {
                p,
                s: 1.0,
                p_bub,
                SATUR: false,
            }
        };
        info!("gas-oil model processed!");
        Ok(Self {
            core,
            gas,
            pvt,
            initial,
        })
    }

    pub fn rs(&self, p_bub: f64) -> f64 {
        self.pvt.rs_slope * p_bub
    }

    pub fn b_oil(&self, p: f64, p_bub: f64) -> f64 {
        let b_sat = self.core.oil.b_ref + self.pvt.b_o_slope * p_bub;
        b_sat * (1.0 - self.core.oil.compressibility * (p - p_bub))
    }

    pub fn b_gas(&self, p: f64) -> f64 {
        self.pvt.b_g_coef / p.max(EQUALITY_TOLERANCE)
    }

    pub fn kr_oil(&self, s_o: f64) -> f64 {
        let pvt = &self.pvt;
        let se = ((s_o - pvt.s_or) / (1.0 - pvt.s_or - pvt.s_gc)).clamp(0.0, 1.0);
        se.powf(pvt.n_o)
    }

    pub fn kr_gas(&self, s_o: f64) -> f64 {
        let pvt = &self.pvt;
        let se = ((1.0 - s_o - pvt.s_gc) / (1.0 - pvt.s_or - pvt.s_gc)).clamp(0.0, 1.0);
        se.powf(pvt.n_g)
    }

    fn state(&self, v: &Var2phase) -> PhaseState {
        let (s_o, p_b) = if v.SATUR { (v.s, v.p) } else { (1.0, v.p_bub) };
        let b_o = self.b_oil(v.p, p_b);
        let b_g = self.b_gas(v.p);
        PhaseState {
            s_o,
            rs: self.rs(p_b),
            b_o,
            b_g,
            oil_mob: self.kr_oil(s_o) / (self.core.oil.visc * b_o),
            gas_mob: self.kr_gas(s_o) / (self.gas.visc * b_g),
        }
    }

    /// Oil and gas content per unit volume at pressure `p`
    fn storage(&self, cell: &Cell<Var2phase>, v: &Var2phase) -> (f64, f64) {
        let st = self.state(v);
        let poro = self.core.porosity(cell.layer, v.p);
        let oil = poro * st.s_o / st.b_o;
        let gas = poro * ((1.0 - st.s_o) / st.b_g + st.rs * st.s_o / st.b_o);
        (oil, gas)
    }

    fn sync_ghost_regime(&mut self, idx: usize) {
        let nb = self.core.ghost_nebr(idx);
        let nebr = self.core.cells[nb].u_next;
        let ghost = &mut self.core.cells[idx].u_next;
        if ghost.SATUR == nebr.SATUR {
            return;
        }
        ghost.SATUR = nebr.SATUR;
        if nebr.SATUR {
            ghost.s = nebr.s;
            ghost.p_bub = ghost.p;
        } else {
            ghost.s = 1.0;
            ghost.p_bub = nebr.p_bub;
        }
    }
}

impl ReservoirModel for GasOilRZ {
    type Var = Var2phase;

    fn cells(&self) -> &[Cell<Var2phase>] {
        &self.core.cells
    }
    fn cells_mut(&mut self) -> &mut [Cell<Var2phase>] {
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
            let mob = self.state(&nebr.u_next).oil_mob;
            out[0] = self.core.boundary_pressure_residual(idx, mob);
            let v = &cell.u_next;
            out[1] = match (cell.kind, self.core.right_boundary) {
                (CellKind::Right, RightBoundary::ConstantPressure) => {
                    v.primary(1) - self.initial.primary_as(1, v)
                }
                _ => v.primary(1) - nebr.u_next.primary_as(1, v),
            };
            return;
        }
        let (oil_now, gas_now) = self.storage(cell, &cell.u_next);
        let (oil_prev, gas_prev) = self.storage(cell, &cell.u_prev);
        let here = self.state(&cell.u_next);
        let p = cell.u_next.p;
        let mut oil_flux = 0.0;
        let mut gas_flux = 0.0;
        for &nb in &self.core.grid.stencil(idx)[1..] {
            let nebr = &cells[nb];
            let p_nb = nebr.u_next.p;
            let up = if p >= p_nb { here } else { self.state(&nebr.u_next) };
            let t = self.core.grid.trans(cell, nebr);
            oil_flux += t * up.oil_mob * (p - p_nb);
            gas_flux += t * (up.gas_mob + up.rs * up.oil_mob) * (p - p_nb);
        }
        out[0] = cell.V * (oil_now - oil_prev) + self.core.ht * oil_flux;
        out[1] = cell.V * (gas_now - gas_prev) + self.core.ht * gas_flux;
    }

    /// Bubble-point check after a Newton update, then ghosts follow their neighbours.
    fn reconcile_phase_state(&mut self) {
        let mut switched = 0usize;
        for cell in self.core.cells.iter_mut() {
            if cell.kind != CellKind::Middle {
                continue;
            }
            let iter = cell.u_iter;
            let next = &mut cell.u_next;
            if next.SATUR {
                let ds = next.s - iter.s;
                if ds.abs() > MAX_SAT_CHANGE {
                    next.s = iter.s + MAX_SAT_CHANGE * ds.signum();
                }
                if next.s > 1.0 {
                    next.SATUR = false;
                    next.s = 1.0;
                    next.p_bub = 0.999 * iter.p_bub;
                    switched += 1;
                } else {
                    next.s = next.s.max(0.0);
                    next.p_bub = next.p;
                }
            } else if next.p_bub > next.p {
                next.SATUR = true;
                next.s = 0.999 * iter.s.min(1.0);
                next.p_bub = next.p;
                switched += 1;
            }
        }
        for idx in 0..self.core.cells.len() {
            match self.core.cells[idx].kind {
                CellKind::Middle => {}
                CellKind::Right if self.core.right_boundary == RightBoundary::ConstantPressure => {}
                _ => self.sync_ghost_regime(idx),
            }
        }
        if switched > 0 {
            debug!("{} cells changed phase regime", switched);
        }
    }

    fn get_rate(&self, idx: usize) -> f64 {
        let nebr = &self.core.cells[self.core.ghost_nebr(idx)];
        self.core.well_inflow(idx, self.state(&nebr.u_next).oil_mob)
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
        let initial = self.initial;
        for cell in self.core.cells.iter_mut() {
            cell.set_all_layers(initial);
        }
        self.core.ht = self.core.limits.ht_init;
    }

    fn time_limits(&self) -> TimeLimits {
        self.core.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Grid::cells::copy_iter_layer;
    use approx::assert_relative_eq;

    fn model() -> GasOilRZ {
        let mut m = GasOilRZ::new(&Properties::two_layer_demo()).unwrap();
        m.set_initial_state();
        m
    }

    #[test]
    fn test_initial_cells_are_undersaturated() {
        let m = model();
        let v = m.cells()[m.core.grid.idx(3, 1, 0)].u_next;
        assert!(!v.SATUR);
        assert_eq!(v.s, 1.0);
        assert_relative_eq!(v.p_bub, 120.0);
        assert_relative_eq!(m.kr_oil(1.0), 1.0);
        assert_eq!(m.kr_gas(1.0), 0.0);
    }

    #[test]
    fn test_cell_below_bubble_point_becomes_saturated() {
        let mut m = model();
        let idx = m.core.grid.idx(2, 1, 0);
        copy_iter_layer(m.cells_mut());
        m.cells_mut()[idx].u_next.p = 110.0;
        m.reconcile_phase_state();
        let v = m.cells()[idx].u_next;
        assert!(v.SATUR);
        assert_relative_eq!(v.s, 0.999);
        assert_eq!(v.p_bub, 110.0);
        // the neighbouring interior cell stays undersaturated
        assert!(!m.cells()[m.core.grid.idx(3, 1, 0)].u_next.SATUR);
    }

    #[test]
    fn test_gas_disappears_when_oil_saturation_exceeds_one() {
        let mut m = model();
        let idx = m.core.grid.idx(2, 1, 0);
        {
            let cell = &mut m.cells_mut()[idx];
            cell.u_next = Var2phase {
                p: 110.0,
                s: 0.97,
                p_bub: 110.0,
                SATUR: true,
            };
        }
        copy_iter_layer(m.cells_mut());
        m.cells_mut()[idx].u_next.s = 1.02;
        m.reconcile_phase_state();
        let v = m.cells()[idx].u_next;
        assert!(!v.SATUR);
        assert_eq!(v.s, 1.0);
        assert_relative_eq!(v.p_bub, 0.999 * 110.0);
    }

    #[test]
    fn test_saturation_change_is_limited() {
        let mut m = model();
        let idx = m.core.grid.idx(2, 1, 0);
        m.cells_mut()[idx].u_next = Var2phase {
            p: 100.0,
            s: 0.8,
            p_bub: 100.0,
            SATUR: true,
        };
        copy_iter_layer(m.cells_mut());
        m.cells_mut()[idx].u_next.s = 0.5;
        m.reconcile_phase_state();
        assert_relative_eq!(m.cells()[idx].u_next.s, 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_interior_residual_vanishes_at_rest() {
        let m = model();
        let idx = m.core.grid.idx(5, 2, 0);
        let mut r = [1.0, 1.0];
        m.residual(idx, &mut r);
        assert!(r[0].abs() < 1e-12 && r[1].abs() < 1e-12);
    }
}
