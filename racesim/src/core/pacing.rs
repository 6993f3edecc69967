use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// One increment produced by a pacing strategy.
/// * `delta` - Progress gained in this step
/// * `duration_s` - (s) Race time consumed by this step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaceStep {
    pub delta: f64,
    pub duration_s: f64,
}

impl PaceStep {
    pub fn new(delta: f64, duration_s: f64) -> PaceStep {
        PaceStep { delta, duration_s }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PacingError {
    #[error("pacing script exhausted after {0} steps")]
    Exhausted(usize),
    #[error("invalid pacing parameters: {0}")]
    InvalidPars(String),
}

/// A PacingStrategy decides how far and how long a racer moves in each step. Implementations
/// may be randomized but must be deterministic for a given seed.
pub trait PacingStrategy: Send {
    fn next_step(&mut self, step_no: u32, progress: f64) -> Result<PaceStep, PacingError>;
}

impl<F> PacingStrategy for F
where
    F: FnMut(u32, f64) -> Result<PaceStep, PacingError> + Send,
{
    fn next_step(&mut self, step_no: u32, progress: f64) -> Result<PaceStep, PacingError> {
        self(step_no, progress)
    }
}

/// Pacing parameters as given in the parameter file.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PacingPars {
    /// * `mean_delta`, `std_delta` - Normal distribution of the progress increment
    /// * `min_delta`, `max_delta` - Bounds the drawn increment is clamped to
    /// * `step_s` - (s) Race time per step
    Random {
        mean_delta: f64,
        std_delta: f64,
        #[serde(default = "default_min_delta")]
        min_delta: f64,
        #[serde(default = "default_max_delta")]
        max_delta: f64,
        #[serde(default = "default_step_s")]
        step_s: f64,
    },
    Constant {
        delta: f64,
        #[serde(default = "default_step_s")]
        step_s: f64,
    },
    /// * `steps` - List of [delta, duration_s] pairs, the racer stalls once it is used up
    Scripted { steps: Vec<[f64; 2]> },
}

fn default_min_delta() -> f64 {
    1.0
}

fn default_max_delta() -> f64 {
    10.0
}

fn default_step_s() -> f64 {
    0.1
}

impl PacingPars {
    /// build creates the pacing strategy described by the parameters. The seed is only used by
    /// randomized strategies.
    pub fn build(&self, seed: u64) -> Result<Box<dyn PacingStrategy>, PacingError> {
        Ok(match self {
            PacingPars::Random {
                mean_delta,
                std_delta,
                min_delta,
                max_delta,
                step_s,
            } => Box::new(RandomPacing::new(
                *mean_delta,
                *std_delta,
                [*min_delta, *max_delta],
                *step_s,
                seed,
            )?),
            PacingPars::Constant { delta, step_s } => {
                Box::new(ConstantPacing::new(*delta, *step_s))
            }
            PacingPars::Scripted { steps } => Box::new(ScriptedPacing::new(
                steps.iter().map(|s| PaceStep::new(s[0], s[1])).collect(),
            )),
        })
    }
}

/// RandomPacing draws every increment from a normal distribution using a seeded RNG.
#[derive(Debug, Clone)]
pub struct RandomPacing {
    rng: StdRng,
    normal: Normal<f64>,
    bounds: [f64; 2],
    step_s: f64,
}

impl RandomPacing {
    pub fn new(
        mean_delta: f64,
        std_delta: f64,
        bounds: [f64; 2],
        step_s: f64,
        seed: u64,
    ) -> Result<RandomPacing, PacingError> {
        if !(std_delta.is_finite() && std_delta >= 0.0) {
            return Err(PacingError::InvalidPars(format!(
                "standard deviation must be finite and >= 0, got {}",
                std_delta
            )));
        }
        let normal = Normal::new(mean_delta, std_delta)
            .map_err(|e| PacingError::InvalidPars(format!("{:?}", e)))?;

        if !(bounds[0] <= bounds[1]) {
            return Err(PacingError::InvalidPars(format!(
                "increment bounds [{}, {}] are not ordered",
                bounds[0], bounds[1]
            )));
        }

        Ok(RandomPacing {
            rng: StdRng::seed_from_u64(seed),
            normal,
            bounds,
            step_s,
        })
    }
}

impl PacingStrategy for RandomPacing {
    fn next_step(&mut self, _step_no: u32, _progress: f64) -> Result<PaceStep, PacingError> {
        let delta = self
            .normal
            .sample(&mut self.rng)
            .clamp(self.bounds[0], self.bounds[1]);
        Ok(PaceStep::new(delta, self.step_s))
    }
}

#[derive(Debug, Clone)]
pub struct ConstantPacing {
    step: PaceStep,
}

impl ConstantPacing {
    pub fn new(delta: f64, step_s: f64) -> ConstantPacing {
        ConstantPacing {
            step: PaceStep::new(delta, step_s),
        }
    }
}

impl PacingStrategy for ConstantPacing {
    fn next_step(&mut self, _step_no: u32, _progress: f64) -> Result<PaceStep, PacingError> {
        Ok(self.step)
    }
}

/// ScriptedPacing replays a fixed list of steps and fails afterwards.
#[derive(Debug, Clone)]
pub struct ScriptedPacing {
    steps: Vec<PaceStep>,
}

impl ScriptedPacing {
    pub fn new(steps: Vec<PaceStep>) -> ScriptedPacing {
        ScriptedPacing { steps }
    }

    /// repeat builds a script of `n` identical steps.
    pub fn repeat(delta: f64, duration_s: f64, n: usize) -> ScriptedPacing {
        ScriptedPacing::new(vec![PaceStep::new(delta, duration_s); n])
    }
}

impl PacingStrategy for ScriptedPacing {
    fn next_step(&mut self, step_no: u32, _progress: f64) -> Result<PaceStep, PacingError> {
        self.steps
            .get(step_no as usize)
            .copied()
            .ok_or(PacingError::Exhausted(self.steps.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(pacing: &mut dyn PacingStrategy, n: u32) -> Vec<f64> {
        (0..n)
            .map(|i| pacing.next_step(i, 0.0).unwrap().delta)
            .collect()
    }

    #[test]
    fn random_pacing_is_deterministic_per_seed() {
        let mut a = RandomPacing::new(5.0, 2.0, [1.0, 10.0], 0.1, 42).unwrap();
        let mut b = RandomPacing::new(5.0, 2.0, [1.0, 10.0], 0.1, 42).unwrap();
        let mut c = RandomPacing::new(5.0, 2.0, [1.0, 10.0], 0.1, 43).unwrap();

        let draws_a = draw(&mut a, 50);
        assert_eq!(draws_a, draw(&mut b, 50));
        assert_ne!(draws_a, draw(&mut c, 50));
        assert!(draws_a.iter().all(|d| (1.0..=10.0).contains(d)));
    }

    #[test]
    fn random_pacing_rejects_bad_pars() {
        assert!(RandomPacing::new(5.0, -1.0, [1.0, 10.0], 0.1, 0).is_err());
        assert!(RandomPacing::new(5.0, f64::INFINITY, [1.0, 10.0], 0.1, 0).is_err());
        assert!(matches!(
            RandomPacing::new(5.0, -0.5, [1.0, 10.0], 0.1, 0),
            Err(PacingError::InvalidPars(msg)) if msg.contains("-0.5")
        ));
        assert!(RandomPacing::new(5.0, 0.0, [1.0, 10.0], 0.1, 0).is_ok());
        assert!(RandomPacing::new(5.0, 1.0, [10.0, 1.0], 0.1, 0).is_err());
    }

    #[test]
    fn scripted_pacing_runs_out() {
        let mut pacing = ScriptedPacing::repeat(20.0, 1.0, 2);
        assert_eq!(pacing.next_step(0, 0.0), Ok(PaceStep::new(20.0, 1.0)));
        assert_eq!(pacing.next_step(1, 20.0), Ok(PaceStep::new(20.0, 1.0)));
        assert_eq!(pacing.next_step(2, 40.0), Err(PacingError::Exhausted(2)));
    }

    #[test]
    fn pacing_pars_from_json() {
        let pars: PacingPars =
            serde_json::from_str(r#"{"kind": "random", "mean_delta": 4.0, "std_delta": 1.5}"#)
                .unwrap();
        assert_eq!(
            pars,
            PacingPars::Random {
                mean_delta: 4.0,
                std_delta: 1.5,
                min_delta: 1.0,
                max_delta: 10.0,
                step_s: 0.1,
            }
        );
        assert!(pars.build(7).is_ok());

        let pars: PacingPars =
            serde_json::from_str(r#"{"kind": "scripted", "steps": [[10.0, 1.0]]}"#).unwrap();
        let mut pacing = pars.build(0).unwrap();
        assert_eq!(pacing.next_step(0, 0.0), Ok(PaceStep::new(10.0, 1.0)));
    }
}
