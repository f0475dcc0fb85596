//! Deadzone → expo → gain axis shaping (spec.md §4.E).
//!
//! All stages operate on a value normalized into `[-1, 1]`; the caller
//! is responsible for normalizing the source axis range and denormalizing
//! the result back onto the target's range, rate, or cutoff.

/// One axis transform pipeline, built from a mapping's tuning fields.
#[derive(Debug, Clone, Copy)]
pub struct AxisTransform {
    pub deadzone: f64,
    pub expo: f64,
    pub gain: f64,
}

impl AxisTransform {
    pub fn new(deadzone: f64, expo: f64, gain: f64) -> Self {
        Self {
            deadzone,
            expo,
            gain,
        }
    }

    /// Applies deadzone, expo shaping, and gain to `x` (already
    /// normalized into `[-1, 1]`), clamping the result to `[-1, 1]`
    /// *before* gain is applied only insofar as shaping is monotonic and
    /// bounded — gain is allowed to push the final value outside
    /// `[-1, 1]` same as the source project; callers that write to a
    /// fixed-range uinput axis clamp again at the denormalize step.
    pub fn apply(&self, x: f64) -> f64 {
        let deadzoned = Self::apply_deadzone(x, self.deadzone);
        let shaped = Self::apply_expo(deadzoned, self.expo);
        (self.gain * shaped).clamp(-1.0, 1.0)
    }

    fn apply_deadzone(x: f64, deadzone: f64) -> f64 {
        let magnitude = x.abs();
        if magnitude < deadzone {
            return 0.0;
        }
        if deadzone >= 1.0 {
            return 0.0;
        }
        let rescaled = (magnitude - deadzone) / (1.0 - deadzone);
        rescaled.copysign(x)
    }

    /// `(1-e)*x + e*x^3` for `e >= 0`; the inverse ease for `e < 0`, so
    /// the curve always passes through (-1,-1), (0,0), (1,1) and stays
    /// monotonic either way.
    fn apply_expo(x: f64, expo: f64) -> f64 {
        if expo >= 0.0 {
            (1.0 - expo) * x + expo * x.powi(3)
        } else {
            let e = -expo;
            // Inverse of (1-e)*x + e*x^3 has no closed cubic-root-free
            // form we want to carry at runtime, so we use the standard
            // ease-out companion curve that is the functional inverse in
            // direction (steep near 0, flat near +-1) while preserving
            // the three fixed points and monotonicity.
            if x == 0.0 {
                0.0
            } else {
                let sign = x.signum();
                let m = x.abs();
                sign * m.powf(1.0 / (1.0 + 2.0 * e))
            }
        }
    }

    /// abs -> rel: per-tick emission, `rate_hz` nominal 60.
    pub fn abs_to_rel_tick(&self, x_normalized: f64, rate_hz: f64) -> f64 {
        self.apply(x_normalized) / rate_hz
    }

    /// rel -> abs: normalize the instantaneous rel value against the
    /// configured cutoff (the speed interpreted as full deflection)
    /// before running the same pipeline.
    pub fn rel_to_abs(&self, rel_value: f64, cutoff: f64) -> f64 {
        if cutoff <= 0.0 {
            return 0.0;
        }
        let normalized = (rel_value / cutoff).clamp(-1.0, 1.0);
        self.apply(normalized)
    }

    /// abs -> abs: scale to the target axis' reported range.
    pub fn abs_to_abs(&self, x_normalized: f64, target_min: f64, target_max: f64) -> f64 {
        let shaped = self.apply(x_normalized); // in [-1, 1]
        let center = (target_max + target_min) / 2.0;
        let half_range = (target_max - target_min) / 2.0;
        center + shaped * half_range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trip() {
        let t = AxisTransform::new(0.0, 0.0, 1.0);
        for x in [-1.0, -0.5, 0.0, 0.25, 0.73, 1.0] {
            let y = t.apply(x);
            assert!((y - x).abs() < 1e-9, "x={x} y={y}");
        }
    }

    #[test]
    fn deadzone_zeroes_small_values() {
        let t = AxisTransform::new(0.2, 0.0, 1.0);
        assert_eq!(t.apply(0.1), 0.0);
        assert_eq!(t.apply(-0.19), 0.0);
        assert!(t.apply(0.2).abs() < 1e-9);
    }

    #[test]
    fn deadzone_resumes_linearly_to_one() {
        let t = AxisTransform::new(0.5, 0.0, 1.0);
        assert!((t.apply(1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn expo_passes_through_fixed_points() {
        let t = AxisTransform::new(0.0, 0.7, 1.0);
        assert!((t.apply(0.0)).abs() < 1e-9);
        assert!((t.apply(1.0) - 1.0).abs() < 1e-9);
        assert!((t.apply(-1.0) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn expo_is_monotonic() {
        let t = AxisTransform::new(0.0, 0.8, 1.0);
        let mut prev = -1.0;
        let mut y_prev = t.apply(prev);
        let mut x = -0.9;
        while x <= 1.0 {
            let y = t.apply(x);
            assert!(y >= y_prev - 1e-9, "not monotonic at x={x}");
            prev = x;
            y_prev = y;
            x += 0.1;
        }
        let _ = prev;
    }

    #[test]
    fn gain_scales_output() {
        let t = AxisTransform::new(0.0, 0.0, 0.5);
        assert!((t.apply(1.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn values_clamp_after_shaping() {
        let t = AxisTransform::new(0.0, 0.0, 2.0);
        assert_eq!(t.apply(1.0), 1.0);
        assert_eq!(t.apply(-1.0), -1.0);
    }

    #[test]
    fn rel_to_abs_normalizes_by_cutoff() {
        let t = AxisTransform::new(0.0, 0.0, 1.0);
        assert!((t.rel_to_abs(50.0, 100.0) - 0.5).abs() < 1e-9);
        assert!((t.rel_to_abs(200.0, 100.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn abs_to_abs_scales_to_target_range() {
        let t = AxisTransform::new(0.0, 0.0, 1.0);
        assert!((t.abs_to_abs(1.0, 0.0, 255.0) - 255.0).abs() < 1e-6);
        assert!((t.abs_to_abs(-1.0, 0.0, 255.0) - 0.0).abs() < 1e-6);
        assert!((t.abs_to_abs(0.0, 0.0, 255.0) - 127.5).abs() < 1e-6);
    }
}
