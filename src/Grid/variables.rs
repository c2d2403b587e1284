//! Per-cell variable tuples and the regime-aware access the Newton solver needs.
//!
//! A Newton unknown is addressed by its index `0..VAR_NUM`. For the two-phase tuple the meaning
//! of unknown `1` depends on the phase regime of the cell: oil saturation while the cell is
//! saturated (free gas present), bubble-point pressure otherwise.
use std::fmt::Debug;

pub trait Variable: Clone + Debug + PartialEq + Default {
    /// number of Newton unknowns per cell
    const VAR_NUM: usize;

    /// Newton unknown `idx` in the regime of `self`
    fn primary(&self, idx: usize) -> f64;

    /// Value of the field that `layout` treats as unknown `idx`.
    /// Used to compare two layers of one cell after a regime switch.
    fn primary_as(&self, idx: usize, _layout: &Self) -> f64 {
        self.primary(idx)
    }

    fn add_primary(&mut self, idx: usize, delta: f64);

    fn set_primary(&mut self, idx: usize, value: f64);

    fn pressure(&self) -> f64;

    fn saturation(&self) -> f64 {
        1.0
    }

    fn bubble_pressure(&self) -> Option<f64> {
        None
    }

    /// SATUR flag: free gas present in the cell
    fn is_saturated(&self) -> bool {
        false
    }
}

/// Single-phase oil: pressure only
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VarOil {
    pub p: f64,
}

impl Variable for VarOil {
    const VAR_NUM: usize = 1;

    fn primary(&self, _idx: usize) -> f64 {
        self.p
    }
    fn add_primary(&mut self, _idx: usize, delta: f64) {
        self.p += delta;
    }
    fn set_primary(&mut self, _idx: usize, value: f64) {
        self.p = value;
    }
    fn pressure(&self) -> f64 {
        self.p
    }
}

/// Black-oil gas/oil tuple.
/// `s` is the oil saturation, `p_bub` the bubble-point pressure, `SATUR` the phase flag.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Var2phase {
    pub p: f64,
    pub s: f64,
    pub p_bub: f64,
    pub SATUR: bool,
}

impl Variable for Var2phase {
    const VAR_NUM: usize = 2;

    fn primary(&self, idx: usize) -> f64 {
        match idx {
            0 => self.p,
            _ if self.SATUR => self.s,
            _ => self.p_bub,
        }
    }
    fn primary_as(&self, idx: usize, layout: &Self) -> f64 {
        match idx {
            0 => self.p,
            _ if layout.SATUR => self.s,
            _ => self.p_bub,
        }
    }
    fn add_primary(&mut self, idx: usize, delta: f64) {
        match idx {
            0 => self.p += delta,
            _ if self.SATUR => self.s += delta,
            _ => self.p_bub += delta,
        }
    }
    fn set_primary(&mut self, idx: usize, value: f64) {
        match idx {
            0 => self.p = value,
            _ if self.SATUR => self.s = value,
            _ => self.p_bub = value,
        }
    }
    fn pressure(&self) -> f64 {
        self.p
    }
    fn saturation(&self) -> f64 {
        self.s
    }
    fn bubble_pressure(&self) -> Option<f64> {
        Some(self.p_bub)
    }
    fn is_saturated(&self) -> bool {
        self.SATUR
    }
}
