//! Position set-point planning.
//!
//! The sequencer only depends on the [`TrajectoryPlanner`] contract. The
//! [`TrapezoidalPlanner`] shipped here samples a trapezoidal (or, for short
//! moves, triangular) velocity profile once per control time-step.

use crate::error::{AppResult, DaqError};

/// Upper bound on profile length, to keep a bad `dt` from allocating without limit.
pub const MAX_SETPOINTS: usize = 10_000_000;

/// Pure set-point planner.
///
/// # Contract
/// - The returned sequence is finite and ordered in time, one sample per `dt`
/// - The first sample is reachable from `current` within one time-step
/// - The last sample equals `target`
/// - Consecutive samples never exceed `max_velocity` / `max_acceleration`
pub trait TrajectoryPlanner: Send + Sync {
    /// Plan a move from `current` to `target`.
    fn plan(
        &self,
        current: f64,
        target: f64,
        max_velocity: f64,
        max_acceleration: f64,
        dt: f64,
    ) -> AppResult<Vec<f64>>;
}

/// Trapezoidal velocity profile planner.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapezoidalPlanner;

impl TrapezoidalPlanner {
    /// Create a planner.
    pub fn new() -> Self {
        Self
    }
}

/// Distance covered after `t` seconds of a profile that accelerates for `t_acc`,
/// coasts at `v_peak` for `t_coast`, then decelerates symmetrically.
fn travelled(t: f64, a: f64, v_peak: f64, t_acc: f64, t_coast: f64) -> f64 {
    let d_acc = 0.5 * a * t_acc * t_acc;
    if t < t_acc {
        0.5 * a * t * t
    } else if t < t_acc + t_coast {
        d_acc + v_peak * (t - t_acc)
    } else {
        let t_dec = t - t_acc - t_coast;
        d_acc + v_peak * t_coast + v_peak * t_dec - 0.5 * a * t_dec * t_dec
    }
}

impl TrajectoryPlanner for TrapezoidalPlanner {
    fn plan(
        &self,
        current: f64,
        target: f64,
        max_velocity: f64,
        max_acceleration: f64,
        dt: f64,
    ) -> AppResult<Vec<f64>> {
        if !(current.is_finite() && target.is_finite()) {
            return Err(DaqError::Planning(format!(
                "positions must be finite (current {}, target {})",
                current, target
            )));
        }
        for (name, value) in [
            ("max_velocity", max_velocity),
            ("max_acceleration", max_acceleration),
            ("dt", dt),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(DaqError::Planning(format!(
                    "{} must be strictly positive, got {}",
                    name, value
                )));
            }
        }

        let displacement = target - current;
        let distance = displacement.abs();
        if distance == 0.0 {
            return Ok(vec![target]);
        }
        let direction = displacement.signum();

        let d_min = max_velocity * max_velocity / max_acceleration;
        let (v_peak, t_acc, t_coast) = if distance >= d_min {
            let t_acc = max_velocity / max_acceleration;
            (max_velocity, t_acc, (distance - d_min) / max_velocity)
        } else {
            let t_acc = (distance / max_acceleration).sqrt();
            (max_acceleration * t_acc, t_acc, 0.0)
        };
        let t_total = 2.0 * t_acc + t_coast;

        let steps = (t_total / dt).ceil().max(1.0);
        if steps > MAX_SETPOINTS as f64 {
            return Err(DaqError::Planning(format!(
                "profile of {:.1}s at dt={}s exceeds {} set-points",
                t_total, dt, MAX_SETPOINTS
            )));
        }
        let steps = steps as usize;

        let mut setpoints: Vec<f64> = (1..steps)
            .map(|k| {
                let t = (k as f64 * dt).min(t_total);
                current + direction * travelled(t, max_acceleration, v_peak, t_acc, t_coast)
            })
            .collect();
        setpoints.push(target);
        Ok(setpoints)
    }
}
