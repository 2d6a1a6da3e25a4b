//! Humidity quantities derived from temperature (°C) and relative humidity (%).

/// Saturated vapor pressure in kPa (Tetens).
pub fn saturated_vapor_pressure(t: f64) -> f64 {
    0.6108 * (17.27 * t / (t + 237.3)).exp()
}

/// Actual vapor pressure in kPa.
pub fn vapor_pressure(t: f64, rh: f64) -> f64 {
    saturated_vapor_pressure(t) * rh / 100.0
}

/// Absolute humidity in g/m³.
pub fn absolute_humidity(t: f64, rh: f64) -> f64 {
    (6.112 * ((17.67 * t) / (t + 243.5)).exp() * rh * 2.1674) / (273.15 + t)
}

/// Vapor pressure deficit in kPa.
pub fn vapor_pressure_deficit(t: f64, rh: f64) -> f64 {
    saturated_vapor_pressure(t) - vapor_pressure(t, rh)
}

/// All derived quantities for one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derived {
    pub vp: f64,
    pub ah: f64,
    pub vpd: f64,
}

impl Derived {
    pub fn compute(t: f64, rh: f64) -> Self {
        let svp = saturated_vapor_pressure(t);
        let vp = vapor_pressure(t, rh);
        Self {
            vp,
            ah: absolute_humidity(t, rh),
            vpd: svp - vp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        // ~2.338 kPa at 20 °C
        assert!((saturated_vapor_pressure(20.0) - 2.338).abs() < 0.001);
        // ~8.6 g/m³ at 20 °C, 50 %
        assert!((absolute_humidity(20.0, 50.0) - 8.63).abs() < 0.02);
    }

    #[test]
    fn test_vp_bounded_by_svp() {
        for t in (-20..=60).step_by(5) {
            let t = t as f64;
            for rh in (0..=100).step_by(10) {
                let rh = rh as f64;
                assert!(vapor_pressure(t, rh) <= saturated_vapor_pressure(t));
            }
        }
    }

    #[test]
    fn test_vpd_is_exact_difference() {
        for (t, rh) in [(20.0, 50.0), (35.5, 12.0), (-5.0, 99.0), (60.0, 0.0)] {
            let d = Derived::compute(t, rh);
            assert_eq!(d.vpd, saturated_vapor_pressure(t) - d.vp);
            assert_eq!(d.vpd, vapor_pressure_deficit(t, rh));
        }
    }

    #[test]
    fn test_saturated_air_has_no_deficit() {
        assert!(vapor_pressure_deficit(25.0, 100.0).abs() < 1e-12);
    }
}
