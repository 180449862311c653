/// Step decay of a learning rate, counted in log intervals.
#[derive(Debug, Clone)]
pub struct Scheduler {
    every: Option<usize>,
    factor: f64,
    lr: f64,
    step: usize,
}

impl Scheduler {
    /// `factor` is applied as given; `TrainConfig::validate` keeps it in (0, 1].
    pub fn new(lr: f64, every: Option<usize>, factor: f64) -> Scheduler {
        Scheduler {
            every: every.filter(|n| *n > 0),
            factor,
            lr,
            step: 0,
        }
    }

    /// A fixed learning rate.
    pub fn constant(lr: f64) -> Scheduler {
        Self::new(lr, None, 1.0)
    }

    /// Count one log interval.
    /// Returns true when the rate was just decayed.
    pub fn step(&mut self) -> bool {
        let Some(every) = self.every else {
            return false;
        };
        self.step += 1;
        if self.step == every {
            self.step = 0;
            self.lr *= self.factor;
            return true;
        }
        false
    }

    pub fn get_lr(&self) -> f64 {
        self.lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_rate_never_changes() {
        let mut scheduler = Scheduler::constant(5e-4);
        for _ in 0..20 {
            assert!(!scheduler.step());
        }
        assert_eq!(scheduler.get_lr(), 5e-4);
    }

    #[test]
    fn rate_halves_every_n_intervals() {
        let mut scheduler = Scheduler::new(1e-3, Some(5), 0.5);
        let decays = (0..10).filter(|_| scheduler.step()).count();
        assert_eq!(decays, 2);
        assert!((scheduler.get_lr() - 2.5e-4).abs() < 1e-12);
    }

    #[test]
    fn configured_factor_is_applied_as_given() {
        let mut scheduler = Scheduler::new(1.0, Some(1), 0.25);
        assert!(scheduler.step());
        assert_eq!(scheduler.get_lr(), 0.25);
        assert!(scheduler.step());
        assert_eq!(scheduler.get_lr(), 0.0625);
    }
}
