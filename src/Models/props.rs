//! Scenario properties in field-friendly units.
//!
//! | Quantity | Unit |
//! |----------|------|
//! | lengths, heights | m |
//! | permeability | mD |
//! | viscosity | cP |
//! | pressure | Pa |
//! | compressibility | 1/Pa |
//! | rate | m³/day (oil, surface conditions) |
//! | time | s |
//!
//! Properties are converted to dimensionless form when a model is built and never mutated
//! afterwards.
use crate::Models::model_api::ModelError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Well target for one schedule period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum WellControl {
    /// total oil rate, m³/day (positive for production)
    Rate(f64),
    /// bottom-hole pressure, Pa
    Bhp(f64),
}

impl WellControl {
    pub fn rate(&self) -> Option<f64> {
        match self {
            WellControl::Rate(q) => Some(*q),
            WellControl::Bhp(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Period {
    /// time at which the period ends, s
    pub end_time: f64,
    pub control: WellControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RightBoundary {
    #[default]
    ConstantPressure,
    NoFlow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonProps {
    pub height: f64,
    pub cells_z: usize,
    pub perm_r: f64,
    pub perm_z: f64,
    pub porosity: f64,
    pub compressibility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluidProps {
    pub visc: f64,
    /// formation volume factor: at the initial pressure for single-phase oil,
    /// intercept of the saturated FVF line for black oil
    pub b_ref: f64,
    pub compressibility: f64,
}

/// Analytic black-oil correlations and Corey relative permeabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackOilPvt {
    /// dissolved gas-oil ratio per unit bubble-point pressure, 1/Pa
    pub rs_slope: f64,
    /// growth of the saturated oil FVF with bubble-point pressure, 1/Pa
    pub b_o_slope: f64,
    /// `B_g = b_g_coef / p`, Pa
    pub b_g_coef: f64,
    pub n_o: f64,
    pub n_g: f64,
    pub s_or: f64,
    pub s_gc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeProps {
    pub ht_init: f64,
    pub ht_min: f64,
    pub ht_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    pub p: f64,
    /// oil saturation
    pub s_o: f64,
    pub p_bub: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    pub r_w: f64,
    pub r_e: f64,
    pub cells_num_r: usize,
    pub cells_num_z: usize,
    pub cells_num_phi: usize,
    /// perforated depth intervals `[top, bottom]` measured from the reservoir top
    pub perforations: Vec<[f64; 2]>,
    pub schedule: Vec<Period>,
    #[serde(default)]
    pub right_boundary: RightBoundary,
    pub time: TimeProps,
    pub initial: InitialState,
    pub layers: Vec<SkeletonProps>,
    pub oil: FluidProps,
    #[serde(default)]
    pub gas: Option<FluidProps>,
    #[serde(default)]
    pub pvt: Option<BlackOilPvt>,
}

impl Properties {
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |msg: String| Err(ModelError::InvalidProperties(msg));
        if !(self.r_w > 0.0 && self.r_e > self.r_w) {
            return invalid(format!(
                "radii must satisfy 0 < r_w < r_e, got r_w = {}, r_e = {}",
                self.r_w, self.r_e
            ));
        }
        if self.schedule.is_empty() {
            return invalid("schedule is empty".to_string());
        }
        let mut last = 0.0;
        for (i, period) in self.schedule.iter().enumerate() {
            if period.end_time <= last {
                return invalid(format!(
                    "period {} ends at {} s, not after the previous boundary {} s",
                    i, period.end_time, last
                ));
            }
            last = period.end_time;
        }
        if self.layers.is_empty() {
            return invalid("no skeleton layers".to_string());
        }
        let nz: usize = self.layers.iter().map(|l| l.cells_z).sum();
        if nz != self.cells_num_z {
            return invalid(format!(
                "layers hold {} vertical cells, cells_num_z = {}",
                nz, self.cells_num_z
            ));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.height <= 0.0 || layer.perm_r < 0.0 || layer.perm_z < 0.0 {
                return invalid(format!("layer {} has a non-physical height or permeability", i));
            }
            if !(0.0..=1.0).contains(&layer.porosity) || layer.porosity == 0.0 {
                return invalid(format!("layer {} porosity must be in (0, 1]", i));
            }
        }
        if self.perforations.is_empty() {
            return invalid("no perforated intervals".to_string());
        }
        if self.perforations.iter().any(|[top, bottom]| top >= bottom) {
            return invalid("perforation top must be above its bottom".to_string());
        }
        let t = &self.time;
        if !(t.ht_min > 0.0 && t.ht_min <= t.ht_init && t.ht_init <= t.ht_max) {
            return invalid(format!(
                "time steps must satisfy 0 < ht_min <= ht_init <= ht_max, got {} {} {}",
                t.ht_min, t.ht_init, t.ht_max
            ));
        }
        if self.oil.visc <= 0.0 || self.oil.b_ref <= 0.0 {
            return invalid("oil viscosity and FVF must be positive".to_string());
        }
        if self.initial.p <= 0.0 {
            return invalid("initial pressure must be positive".to_string());
        }
        Ok(())
    }

    /// Gas-oil models need both gas properties and PVT correlations.
    pub fn validate_gas_oil(&self) -> Result<(), ModelError> {
        self.validate()?;
        match (&self.gas, &self.pvt) {
            (Some(gas), Some(pvt)) => {
                if gas.visc <= 0.0 || pvt.b_g_coef <= 0.0 {
                    return Err(ModelError::InvalidProperties(
                        "gas viscosity and B_g coefficient must be positive".to_string(),
                    ));
                }
                if pvt.s_or + pvt.s_gc >= 1.0 {
                    return Err(ModelError::InvalidProperties(
                        "residual saturations leave no mobile range".to_string(),
                    ));
                }
                Ok(())
            }
            _ => Err(ModelError::InvalidProperties(
                "gas-oil model needs `gas` and `pvt` sections".to_string(),
            )),
        }
    }

    pub fn total_height(&self) -> f64 {
        self.layers.iter().map(|l| l.height).sum()
    }

    pub fn from_json_str(s: &str) -> Result<Self, ModelError> {
        let props: Properties = serde_json::from_str(s)?;
        props.validate()?;
        Ok(props)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Two layers with a 10x permeability contrast, both perforated; 3 days of production
    /// followed by a shut-in day.
    pub fn two_layer_demo() -> Self {
        Properties {
            r_w: 0.1,
            r_e: 1000.0,
            cells_num_r: 20,
            cells_num_z: 2,
            cells_num_phi: 1,
            perforations: vec![[0.0, 10.0]],
            schedule: vec![
                Period {
                    end_time: 3.0 * 86400.0,
                    control: WellControl::Rate(50.0),
                },
                Period {
                    end_time: 4.0 * 86400.0,
                    control: WellControl::Rate(0.0),
                },
            ],
            right_boundary: RightBoundary::ConstantPressure,
            time: TimeProps {
                ht_init: 100.0,
                ht_min: 100.0,
                ht_max: 100000.0,
            },
            initial: InitialState {
                p: 200.0e5,
                s_o: 1.0,
                p_bub: 120.0e5,
            },
            layers: vec![
                SkeletonProps {
                    height: 5.0,
                    cells_z: 1,
                    perm_r: 50.0,
                    perm_z: 5.0,
                    porosity: 0.2,
                    compressibility: 5.0e-10,
                },
                SkeletonProps {
                    height: 5.0,
                    cells_z: 1,
                    perm_r: 500.0,
                    perm_z: 50.0,
                    porosity: 0.2,
                    compressibility: 5.0e-10,
                },
            ],
            oil: FluidProps {
                visc: 1.0,
                b_ref: 1.2,
                compressibility: 1.0e-9,
            },
            gas: Some(FluidProps {
                visc: 0.02,
                b_ref: 0.005,
                compressibility: 0.0,
            }),
            pvt: Some(BlackOilPvt {
                rs_slope: 1.0e-6,
                b_o_slope: 2.0e-9,
                b_g_coef: 1.0e5,
                n_o: 2.0,
                n_g: 2.0,
                s_or: 0.2,
                s_gc: 0.05,
            }),
        }
    }
}
