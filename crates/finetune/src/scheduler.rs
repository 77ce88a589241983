use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::FinetuneError;

/// When the driver advances the schedule: after every optimizer step or
/// once per epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerInterval {
    Step,
    Epoch,
}

impl SchedulerInterval {
    pub fn from_tag(tag: &str) -> Result<Self, FinetuneError> {
        match tag {
            "step" => Ok(SchedulerInterval::Step),
            "epoch" => Ok(SchedulerInterval::Epoch),
            other => Err(FinetuneError::Configuration(format!(
                "invalid scheduler interval: {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePhase {
    Warmup,
    Anneal,
}

/// Two-phase learning-rate schedule: linear warmup handed off to a
/// cosine anneal exactly at `warmup_steps`. The anneal floors at
/// `eta_min` once `t_max` is exhausted.
#[derive(Debug, Clone)]
pub struct WarmupCosineSchedule {
    base_lr: f64,
    eta_min: f64,
    total_steps: usize,
    warmup_steps: usize,
    t_max: usize,
    current_step: usize,
}

impl WarmupCosineSchedule {
    pub fn new(
        base_lr: f64,
        total_steps: usize,
        warmup_ratio: f64,
        eta_min_ratio: f64,
    ) -> Result<Self, FinetuneError> {
        if base_lr <= 0.0 {
            return Err(FinetuneError::Configuration(
                "schedule requires base learning rate > 0".to_string(),
            ));
        }
        if total_steps == 0 {
            return Err(FinetuneError::Configuration(
                "schedule requires total_steps >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&warmup_ratio) {
            return Err(FinetuneError::Configuration(format!(
                "warmup_ratio must be in [0, 1], got {}",
                warmup_ratio
            )));
        }
        if !(0.0..=1.0).contains(&eta_min_ratio) {
            return Err(FinetuneError::Configuration(format!(
                "eta_min_ratio must be in [0, 1], got {}",
                eta_min_ratio
            )));
        }

        let warmup_steps = (total_steps as f64 * warmup_ratio).floor() as usize;
        Ok(Self {
            base_lr,
            eta_min: base_lr * eta_min_ratio,
            total_steps,
            warmup_steps,
            t_max: total_steps - warmup_steps,
            current_step: 0,
        })
    }

    pub fn warmup_steps(&self) -> usize {
        self.warmup_steps
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn t_max(&self) -> usize {
        self.t_max
    }

    pub fn eta_min(&self) -> f64 {
        self.eta_min
    }

    pub fn phase_at(&self, step: usize) -> SchedulePhase {
        if step < self.warmup_steps {
            SchedulePhase::Warmup
        } else {
            SchedulePhase::Anneal
        }
    }

    /// Learning rate at an absolute step count.
    pub fn lr_at(&self, step: usize) -> f64 {
        match self.phase_at(step) {
            SchedulePhase::Warmup => {
                // The first optimizer step trains at the first warmup
                // tick, never at zero.
                let tick = step.max(1) as f64;
                self.base_lr * tick / self.warmup_steps.max(1) as f64
            }
            SchedulePhase::Anneal => {
                if self.t_max == 0 {
                    return self.base_lr;
                }
                let t = (step - self.warmup_steps).min(self.t_max) as f64;
                let progress = t / self.t_max as f64;
                self.eta_min + (self.base_lr - self.eta_min) * 0.5 * (1.0 + (PI * progress).cos())
            }
        }
    }

    /// Advance one step and return the learning rate at the new position.
    pub fn step(&mut self) -> f64 {
        self.current_step = self.current_step.saturating_add(1);
        self.lr_at(self.current_step)
    }

    pub fn learning_rate(&self) -> f64 {
        self.lr_at(self.current_step)
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }
}

/// Schedule paired with the interval at which the driver advances it.
#[derive(Debug, Clone)]
pub struct ScheduleDescriptor {
    pub schedule: WarmupCosineSchedule,
    pub interval: SchedulerInterval,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(total: usize, warmup_ratio: f64) -> WarmupCosineSchedule {
        WarmupCosineSchedule::new(1.0, total, warmup_ratio, 0.1).unwrap()
    }

    #[test]
    fn warmup_steps_is_floor_of_ratio() {
        for (total, ratio, expected) in [
            (100, 0.1, 10),
            (100, 0.0, 0),
            (100, 1.0, 100),
            (7, 0.5, 3),
            (1, 0.9, 0),
        ] {
            let s = schedule(total, ratio);
            assert_eq!(s.warmup_steps(), expected);
            assert!(s.warmup_steps() <= s.total_steps());
            assert_eq!(s.t_max(), total - expected);
        }
    }

    #[test]
    fn first_step_trains_at_first_warmup_tick() {
        let s = schedule(100, 0.1);
        assert!((s.lr_at(0) - 0.1).abs() < 1e-12);
        assert!((s.lr_at(1) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn zero_warmup_starts_at_full_rate() {
        let s = schedule(100, 0.0);
        assert!((s.lr_at(0) - 1.0).abs() < 1e-12);
        assert_eq!(s.phase_at(0), SchedulePhase::Anneal);
    }

    #[test]
    fn linear_ramp_then_cosine_handoff() {
        // total=100, ratio=0.1 => warmup=10, t_max=90.
        let s = schedule(100, 0.1);
        assert!((s.lr_at(5) - 0.5).abs() < 1e-12);
        assert_eq!(s.phase_at(9), SchedulePhase::Warmup);
        assert_eq!(s.phase_at(10), SchedulePhase::Anneal);
        // Cosine phase opens at the full base rate.
        assert!((s.lr_at(10) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn anneal_reaches_eta_min_at_total_steps() {
        let s = schedule(100, 0.1);
        assert!((s.lr_at(100) - s.eta_min()).abs() < 1e-9);
    }

    #[test]
    fn anneal_clamps_past_t_max() {
        let s = schedule(100, 0.1);
        assert!((s.lr_at(150) - s.eta_min()).abs() < 1e-9);
        assert!((s.lr_at(1000) - s.eta_min()).abs() < 1e-9);
    }

    #[test]
    fn anneal_is_monotonically_decreasing() {
        let s = schedule(200, 0.2);
        let mut prev = s.lr_at(s.warmup_steps());
        for step in s.warmup_steps() + 1..=s.total_steps() {
            let lr = s.lr_at(step);
            assert!(lr <= prev + 1e-12);
            prev = lr;
        }
    }

    #[test]
    fn full_warmup_holds_base_rate_after_ramp() {
        let s = schedule(10, 1.0);
        assert_eq!(s.t_max(), 0);
        assert!((s.lr_at(10) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stateful_stepping_matches_lr_at() {
        let mut s = schedule(100, 0.1);
        assert!((s.learning_rate() - s.lr_at(0)).abs() < 1e-12);
        for expected_step in 1..=120usize {
            let lr = s.step();
            assert_eq!(s.current_step(), expected_step);
            assert!((lr - s.lr_at(expected_step)).abs() < 1e-12);
        }
    }

    #[test]
    fn rejects_out_of_range_ratios() {
        assert!(WarmupCosineSchedule::new(1.0, 100, -0.1, 0.1).is_err());
        assert!(WarmupCosineSchedule::new(1.0, 100, 1.1, 0.1).is_err());
        assert!(WarmupCosineSchedule::new(1.0, 100, 0.1, -0.5).is_err());
        assert!(WarmupCosineSchedule::new(1.0, 100, 0.1, 2.0).is_err());
        assert!(WarmupCosineSchedule::new(1.0, 0, 0.1, 0.1).is_err());
        assert!(WarmupCosineSchedule::new(0.0, 100, 0.1, 0.1).is_err());
    }

    #[test]
    fn interval_tags_parse_strictly() {
        assert_eq!(
            SchedulerInterval::from_tag("step").unwrap(),
            SchedulerInterval::Step
        );
        assert_eq!(
            SchedulerInterval::from_tag("epoch").unwrap(),
            SchedulerInterval::Epoch
        );
        assert!(SchedulerInterval::from_tag("batch").is_err());
    }
}
