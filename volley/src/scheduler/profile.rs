use std::time::Duration;
use volley_core::{ConfigError, StageConfig};

/// A validated ramp stage: reach `target` VUs by the end of `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

/// An ordered list of stages. Only obtainable through validation, and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampProfile {
    stages: Vec<Stage>,
    total: Duration,
}

/// Where a run is within its profile at some instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Stage { index: usize, desired: usize },
    Finished,
}

impl RampProfile {
    pub fn new(stages: &[StageConfig], max_concurrency: usize) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::EmptyProfile);
        }

        let mut validated = Vec::with_capacity(stages.len());
        let mut total = Duration::ZERO;
        for (stage, config) in stages.iter().enumerate() {
            let secs = config.duration_secs;
            if secs < 0. {
                return Err(ConfigError::NegativeDuration { stage, secs });
            }
            let duration = Duration::try_from_secs_f64(secs)
                .map_err(|_| ConfigError::InvalidDuration { stage })?;

            if config.target < 0 {
                return Err(ConfigError::NegativeTarget {
                    stage,
                    target: config.target,
                });
            }
            let target = config.target as usize;
            if target > max_concurrency {
                return Err(ConfigError::TargetExceedsMax {
                    stage,
                    target,
                    max: max_concurrency,
                });
            }

            total = total
                .checked_add(duration)
                .ok_or(ConfigError::InvalidDuration { stage })?;
            validated.push(Stage { duration, target });
        }

        Ok(Self {
            stages: validated,
            total,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// The largest number of VUs any stage asks for.
    pub fn max_target(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Linear interpolation from the previous stage's target (0 before the first stage) towards
    /// the current one, rounded to the nearest VU. Zero length stages are stepped over, so their
    /// target applies immediately.
    pub fn position(&self, elapsed: Duration) -> Position {
        let mut start = Duration::ZERO;
        let mut from = 0;

        for (index, stage) in self.stages.iter().enumerate() {
            let end = start + stage.duration;
            if elapsed < end {
                let progress =
                    (elapsed - start).as_secs_f64() / stage.duration.as_secs_f64();
                let desired =
                    from as f64 + (stage.target as f64 - from as f64) * progress;
                return Position::Stage {
                    index,
                    desired: desired.round() as usize,
                };
            }
            start = end;
            from = stage.target;
        }

        Position::Finished
    }

    pub fn desired_at(&self, elapsed: Duration) -> usize {
        match self.position(elapsed) {
            Position::Stage { desired, .. } => desired,
            Position::Finished => 0,
        }
    }

    /// True if no stage from `index` onwards asks for any VUs.
    pub fn idle_from(&self, index: usize) -> bool {
        self.stages[index..].iter().all(|s| s.target == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stages(raw: &[(f64, i64)]) -> Vec<StageConfig> {
        raw.iter()
            .map(|&(duration_secs, target)| StageConfig {
                duration_secs,
                target,
            })
            .collect()
    }

    fn average_load() -> RampProfile {
        RampProfile::new(&stages(&[(300., 100), (1800., 100), (300., 0)]), 100).unwrap()
    }

    #[test]
    fn validation() {
        assert!(matches!(
            RampProfile::new(&[], 10),
            Err(ConfigError::EmptyProfile)
        ));
        assert!(matches!(
            RampProfile::new(&stages(&[(10., 5), (-1., 5)]), 10),
            Err(ConfigError::NegativeDuration { stage: 1, .. })
        ));
        assert!(matches!(
            RampProfile::new(&stages(&[(f64::NEG_INFINITY, 5)]), 10),
            Err(ConfigError::NegativeDuration { stage: 0, .. })
        ));
        assert!(matches!(
            RampProfile::new(&stages(&[(f64::NAN, 5)]), 10),
            Err(ConfigError::InvalidDuration { stage: 0 })
        ));
        assert!(matches!(
            RampProfile::new(&stages(&[(f64::INFINITY, 5)]), 10),
            Err(ConfigError::InvalidDuration { stage: 0 })
        ));
        assert!(matches!(
            RampProfile::new(&stages(&[(10., -5)]), 10),
            Err(ConfigError::NegativeTarget {
                stage: 0,
                target: -5
            })
        ));
        assert!(matches!(
            RampProfile::new(&stages(&[(10., 5), (10., 11)]), 10),
            Err(ConfigError::TargetExceedsMax {
                stage: 1,
                target: 11,
                max: 10
            })
        ));
        assert!(RampProfile::new(&stages(&[(0., 0)]), 0).is_ok());
    }

    #[test]
    fn total_duration_is_the_sum_of_stages() {
        let profile = average_load();
        assert_eq!(profile.total_duration(), Duration::from_secs(40 * 60));
        assert_eq!(profile.stages().len(), 3);
        assert_eq!(profile.max_target(), 100);
    }

    #[test]
    #[ntest::timeout(1000)]
    fn average_load_shape() {
        let profile = average_load();

        // Ramp up: strictly increasing at the 3s granularity of a 100 VU over 5m ramp.
        let mut prev = None;
        for secs in (0..300).step_by(3) {
            let desired = profile.desired_at(Duration::from_secs(secs));
            if let Some(prev) = prev {
                assert!(desired > prev, "{desired} <= {prev} at {secs}s");
            }
            prev = Some(desired);
        }
        assert_eq!(profile.desired_at(Duration::ZERO), 0);
        assert_eq!(profile.desired_at(Duration::from_secs(150)), 50);

        // Hold.
        for secs in 300..2100 {
            assert_eq!(profile.desired_at(Duration::from_secs(secs)), 100);
        }

        // Ramp down.
        let mut prev = 101;
        for secs in (2100..2400).step_by(3) {
            let desired = profile.desired_at(Duration::from_secs(secs));
            assert!(desired < prev, "{desired} >= {prev} at {secs}s");
            prev = desired;
        }
        assert_eq!(profile.desired_at(Duration::from_secs(2250)), 50);

        assert_eq!(
            profile.position(Duration::from_secs(2400)),
            Position::Finished
        );
        assert_eq!(profile.desired_at(Duration::from_secs(5000)), 0);
    }

    #[test]
    fn positions_report_stage_index() {
        let profile = average_load();
        assert_eq!(
            profile.position(Duration::from_secs(10)),
            Position::Stage {
                index: 0,
                desired: 3
            }
        );
        assert_eq!(
            profile.position(Duration::from_secs(300)),
            Position::Stage {
                index: 1,
                desired: 100
            }
        );
        assert_eq!(
            profile.position(Duration::from_millis(2_399_999)),
            Position::Stage {
                index: 2,
                desired: 0
            }
        );
    }

    #[test]
    fn zero_length_stages_step() {
        let profile =
            RampProfile::new(&stages(&[(0., 20), (10., 20), (0., 5), (10., 5)]), 20).unwrap();
        assert_eq!(profile.desired_at(Duration::ZERO), 20);
        assert_eq!(profile.desired_at(Duration::from_secs(9)), 20);
        assert_eq!(profile.desired_at(Duration::from_secs(10)), 5);
        assert_eq!(profile.desired_at(Duration::from_secs(19)), 5);
        assert_eq!(profile.position(Duration::from_secs(20)), Position::Finished);
    }

    #[test]
    fn idle_tail() {
        let profile =
            RampProfile::new(&stages(&[(10., 10), (10., 0), (10., 10), (10., 0), (5., 0)]), 10)
                .unwrap();
        assert!(!profile.idle_from(0));
        assert!(!profile.idle_from(1));
        assert!(!profile.idle_from(2));
        assert!(profile.idle_from(3));
        assert!(profile.idle_from(4));
    }
}
