//! Constants and unit conversions used when properties are brought to dimensionless form.

/// Values below this magnitude are treated as zero when comparing rates or
/// computing relative errors.
pub const EQUALITY_TOLERANCE: f64 = 1.0e-9;
pub const BAR_TO_PA: f64 = 1.0e5;
/// 1 mD in m²
pub const MILLIDARCY: f64 = 0.986923e-15;
pub const SECONDS_IN_DAY: f64 = 86400.0;
pub const SECONDS_IN_HOUR: f64 = 3600.0;

#[allow(non_snake_case)]
pub fn MilliDarcyToM2(perm: f64) -> f64 {
    perm * MILLIDARCY
}
#[allow(non_snake_case)]
pub fn M2toMilliDarcy(perm: f64) -> f64 {
    perm / MILLIDARCY
}
#[allow(non_snake_case)]
pub fn cPToPaSec(visc: f64) -> f64 {
    visc / 1000.0
}
/// m³/day -> m³/s
pub fn rate_to_si(rate: f64) -> f64 {
    rate / SECONDS_IN_DAY
}

/// Dimensionless scales of one model. Every quantity the solver touches is divided
/// by the matching scale before the run and multiplied back only for output.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scales {
    /// length scale, m (well radius)
    pub R_dim: f64,
    /// time scale, s
    pub t_dim: f64,
    /// pressure scale, Pa
    pub P_dim: f64,
    /// temperature scale, K
    pub T_dim: f64,
    /// rate scale R_dim³/t_dim, m³/s
    pub Q_dim: f64,
    /// permeability scale R_dim², m²
    pub k_dim: f64,
    /// viscosity scale P_dim*t_dim, Pa·s
    pub mu_dim: f64,
}

impl Scales {
    #[allow(non_snake_case)]
    pub fn new(R_dim: f64, t_dim: f64, P_dim: f64, T_dim: f64) -> Self {
        Self {
            R_dim,
            t_dim,
            P_dim,
            T_dim,
            Q_dim: R_dim * R_dim * R_dim / t_dim,
            k_dim: R_dim * R_dim,
            mu_dim: P_dim * t_dim,
        }
    }
    /// dimensionless rate -> m³/day
    pub fn rate_to_m3_per_day(&self, q: f64) -> f64 {
        q * self.Q_dim * SECONDS_IN_DAY
    }
    /// dimensionless pressure -> bar
    pub fn pressure_to_bar(&self, p: f64) -> f64 {
        p * self.P_dim / BAR_TO_PA
    }
    /// dimensionless time -> hours
    pub fn time_to_hours(&self, t: f64) -> f64 {
        t * self.t_dim / SECONDS_IN_HOUR
    }
}

impl Default for Scales {
    fn default() -> Self {
        Self::new(1.0, SECONDS_IN_HOUR, BAR_TO_PA, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rate_scale_round_trip() {
        let scales = Scales::new(0.1, 3600.0, BAR_TO_PA, 300.0);
        assert_relative_eq!(scales.Q_dim, 1e-3 / 3600.0, epsilon = 1e-18);
        let q_si = rate_to_si(100.0);
        assert_relative_eq!(
            scales.rate_to_m3_per_day(q_si / scales.Q_dim),
            100.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_perm_conversion() {
        assert_relative_eq!(M2toMilliDarcy(MilliDarcyToM2(150.0)), 150.0, epsilon = 1e-9);
        assert_relative_eq!(cPToPaSec(1.0), 1e-3);
    }
}
