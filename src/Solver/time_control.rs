//! Adaptive time step controller.
//!
//! Once per step: switch the schedule period when its boundary has been reached (step falls
//! back to `ht_min`), grow the step by `grow_factor` after an easy Newton solve or shrink it
//! after a hard one, clamp it to `[ht_min, ht_max]`, and cut it so the clock lands exactly on
//! the next period boundary. A cut step may be shorter than `ht_min`.
use crate::Models::model_api::TimeLimits;
use crate::Solver::solver_settings::TimeStepConfig;
use log::debug;

/// Relative tolerance for landing on a period boundary
const BOUNDARY_TOL: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct StepPlan {
    pub t_start: f64,
    pub ht: f64,
    pub period: usize,
    /// period that became active at the start of this step
    pub period_switched: Option<usize>,
    /// step was cut to end on the period boundary
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct TimeController {
    pub config: TimeStepConfig,
    pub limits: TimeLimits,
    pub period_ends: Vec<f64>,
    pub cur_t: f64,
    pub ht: f64,
    pub cur_period: usize,
    t_prev: f64,
}

impl TimeController {
    pub fn new(config: TimeStepConfig, limits: TimeLimits, period_ends: Vec<f64>) -> Self {
        Self {
            config,
            limits,
            period_ends,
            cur_t: 0.0,
            ht: limits.ht_init,
            cur_period: 0,
            t_prev: 0.0,
        }
    }

    /// Tt: end of the last period
    pub fn end_time(&self) -> f64 {
        self.period_ends.last().copied().unwrap_or(0.0)
    }

    pub fn finished(&self) -> bool {
        self.cur_t >= self.end_time()
    }

    /// Step-size heuristic on the iteration count of the last Newton solve
    pub fn adapt(&mut self, iterations: usize) {
        let threshold = self.config.iterations_threshold;
        if iterations < threshold && self.ht <= self.limits.ht_max {
            self.ht *= self.config.grow_factor;
        } else if iterations > threshold && self.ht > self.limits.ht_min {
            self.ht /= self.config.grow_factor;
        }
        self.ht = self.ht.clamp(self.limits.ht_min, self.limits.ht_max);
    }

    fn advance(&mut self, period_switched: Option<usize>) -> StepPlan {
        let boundary = self.period_ends[self.cur_period];
        self.t_prev = self.cur_t;
        let truncated = self.cur_t + self.ht >= boundary * (1.0 - BOUNDARY_TOL);
        if truncated {
            self.ht = boundary - self.cur_t;
            self.cur_t = boundary;
        } else {
            self.cur_t += self.ht;
        }
        debug!(
            "step [{}, {}], ht = {}, period {}{}",
            self.t_prev,
            self.cur_t,
            self.ht,
            self.cur_period,
            if truncated { " (cut at boundary)" } else { "" }
        );
        StepPlan {
            t_start: self.t_prev,
            ht: self.ht,
            period: self.cur_period,
            period_switched,
            truncated,
        }
    }

    /// Plans the next step given the Newton iterations of the previous one.
    pub fn control(&mut self, iterations: usize) -> StepPlan {
        let mut switched = None;
        if self.cur_t >= self.period_ends[self.cur_period]
            && self.cur_period + 1 < self.period_ends.len()
        {
            self.cur_period += 1;
            self.ht = self.limits.ht_min;
            switched = Some(self.cur_period);
        }
        self.adapt(iterations);
        self.advance(switched)
    }

    /// Rolls the clock back to the start of the rejected step and plans it again with a
    /// smaller step. `None` once the step cannot shrink any further.
    pub fn reject_step(&mut self) -> Option<StepPlan> {
        if self.ht <= self.limits.ht_min {
            return None;
        }
        self.cur_t = self.t_prev;
        self.ht = (self.ht / self.config.grow_factor).max(self.limits.ht_min);
        Some(self.advance(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn controller(ends: Vec<f64>) -> TimeController {
        TimeController::new(
            TimeStepConfig::default(),
            TimeLimits {
                ht_init: 1.0,
                ht_min: 1.0,
                ht_max: 10.0,
            },
            ends,
        )
    }

    #[test]
    fn test_grow_and_shrink() {
        let mut tc = controller(vec![1000.0]);
        tc.adapt(3);
        assert_relative_eq!(tc.ht, 1.5);
        tc.adapt(6);
        assert_relative_eq!(tc.ht, 1.5);
        tc.adapt(7);
        assert_relative_eq!(tc.ht, 1.0);
        // cannot fall below ht_min
        tc.adapt(8);
        assert_eq!(tc.ht, 1.0);
        for _ in 0..20 {
            tc.adapt(1);
        }
        assert_eq!(tc.ht, 10.0);
    }

    #[test]
    fn test_steps_land_on_boundaries() {
        let mut tc = controller(vec![7.3, 20.0]);
        let mut plans = Vec::new();
        while !tc.finished() {
            let plan = tc.control(2);
            assert!(plan.ht <= 10.0);
            assert!(plan.t_start + plan.ht <= tc.period_ends[plan.period] + 1e-12);
            if !plan.truncated {
                assert!(plan.ht >= 1.0);
            }
            plans.push(plan);
        }
        assert_eq!(tc.cur_t, 20.0);
        let cut: Vec<&StepPlan> = plans.iter().filter(|p| p.truncated).collect();
        assert_eq!(cut.len(), 2);
        assert_relative_eq!(cut[0].t_start + cut[0].ht, 7.3, epsilon = 1e-12);
        let switch = plans.iter().position(|p| p.period_switched == Some(1)).unwrap();
        assert_eq!(plans[switch].t_start, 7.3);
        // step restarts from ht_min and grows once
        assert_relative_eq!(plans[switch].ht, 1.5);
    }

    #[test]
    fn test_reject_rolls_back() {
        let mut tc = controller(vec![100.0]);
        for _ in 0..5 {
            tc.control(1);
        }
        let t_before = tc.cur_t - tc.ht;
        let ht_before = tc.ht;
        let retry = tc.reject_step().unwrap();
        assert_relative_eq!(retry.t_start, t_before, epsilon = 1e-12);
        assert_relative_eq!(retry.ht, ht_before / 1.5);
        while tc.ht > 1.0 {
            tc.reject_step().unwrap();
        }
        assert!(tc.reject_step().is_none());
    }
}
