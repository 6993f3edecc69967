use crate::core::pacing::{PacingError, PacingPars, PacingStrategy};
use crate::core::reporter::ProgressReporter;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread::sleep;
use std::time::{Duration, Instant};

// longest uninterrupted sleep, a racer checks in between whether the race is still on
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(100);

/// * `name` - Racer name, e.g. Michael Thrumacher
/// * `seed` - (OPTIONAL) Fixed seed for randomized pacing, otherwise derived from the race seed
/// * `pacing` - Pacing parameters of the racer
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RacerPars {
    pub name: String,
    #[serde(default)]
    pub seed: Option<u64>,
    pub pacing: PacingPars,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RacerId(String);

impl RacerId {
    pub fn new(name: impl Into<String>) -> RacerId {
        RacerId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RacerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RacerId {
    fn from(name: &str) -> Self {
        RacerId::new(name)
    }
}

/// ProgressEvent describes the position of a racer at a given race time.
/// * `time_s` - (s) Race time of the racer when the event was emitted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub racer: RacerId,
    pub progress: f64,
    pub time_s: f64,
    pub finished: bool,
}

/// Settings shared by all racers of a race.
/// * `finish_line` - Progress value at which a racer has finished
/// * `min_increment` - Lower bound for every progress increment (must be > 0)
/// * `realtime_factor` - Race time per wall time, 0.0 runs the racers without sleeping
#[derive(Debug, Clone, Copy)]
pub struct RacerRunOpts {
    pub finish_line: f64,
    pub min_increment: f64,
    pub realtime_factor: f64,
}

impl RacerRunOpts {
    /// wall_time converts a race time span into the real time a racer sleeps for it. Spans
    /// beyond the range of `Duration` saturate.
    pub fn wall_time(&self, race_time_s: f64) -> Option<Duration> {
        if self.realtime_factor > 0.0 && race_time_s > 0.0 {
            Some(
                Duration::try_from_secs_f64(race_time_s / self.realtime_factor)
                    .unwrap_or(Duration::MAX),
            )
        } else {
            None
        }
    }
}

/// How a racer's unit of work ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RacerExit {
    Finished,
    Stalled(PacingError),
    Abandoned,
}

pub struct Racer {
    id: RacerId,
    pacing: Box<dyn PacingStrategy>,
    progress: f64,
    time_s: f64,
    step_no: u32,
    finished: bool,
}

impl fmt::Debug for Racer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Racer")
            .field("id", &self.id)
            .field("progress", &self.progress)
            .field("time_s", &self.time_s)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Racer {
    pub fn new(id: impl Into<RacerId>, pacing: Box<dyn PacingStrategy>) -> Racer {
        Racer {
            id: id.into(),
            pacing,
            progress: 0.0,
            time_s: 0.0,
            step_no: 0,
            finished: false,
        }
    }

    pub fn from_pars(racer_pars: &RacerPars, seed: u64) -> Result<Racer, PacingError> {
        let seed = racer_pars.seed.unwrap_or(seed);
        Ok(Racer::new(
            RacerId::new(racer_pars.name.to_owned()),
            racer_pars.pacing.build(seed)?,
        ))
    }

    pub fn id(&self) -> &RacerId {
        &self.id
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// step advances the racer by one pacing step and returns the resulting event. The
    /// increment is bounded below by `min_increment` such that every racer reaches the finish
    /// line after a finite number of steps.
    pub fn step(&mut self, opts: &RacerRunOpts) -> Result<ProgressEvent, PacingError> {
        let pace = self.pacing.next_step(self.step_no, self.progress)?;
        self.step_no += 1;

        let delta = if pace.delta.is_finite() {
            pace.delta.max(opts.min_increment)
        } else {
            opts.min_increment
        };
        let duration_s = if pace.duration_s.is_finite() {
            pace.duration_s.max(0.0)
        } else {
            0.0
        };

        self.progress = (self.progress + delta).min(opts.finish_line);
        self.time_s += duration_s;
        self.finished = self.progress >= opts.finish_line;

        Ok(ProgressEvent {
            racer: self.id.clone(),
            progress: self.progress,
            time_s: self.time_s,
            finished: self.finished,
        })
    }

    /// run executes the racer until it finishes, its pacing fails or nobody listens anymore.
    /// It is meant to be called on a dedicated thread.
    pub fn run(mut self, reporter: &ProgressReporter, opts: &RacerRunOpts) -> RacerExit {
        while !self.finished {
            let t_prev = self.time_s;
            let event = match self.step(opts) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Racer {} stalled at {:.1}: {}", self.id, self.progress, e);
                    return RacerExit::Stalled(e);
                }
            };

            if let Some(t_sleep) = opts.wall_time(event.time_s - t_prev) {
                if !sleep_while_open(reporter, t_sleep) {
                    debug!("Racer {} stopped while pacing, race is already decided", self.id);
                    return RacerExit::Abandoned;
                }
            }

            if reporter.report(event).is_err() {
                debug!("Racer {} stopped, race is already decided", self.id);
                return RacerExit::Abandoned;
            }
        }

        debug!("Racer {} crossed the finish line at {:.3}s", self.id, self.time_s);
        RacerExit::Finished
    }
}

/// sleep_while_open sleeps for `t_sleep` in slices and returns false as soon as nobody listens
/// to the reporter anymore.
fn sleep_while_open(reporter: &ProgressReporter, t_sleep: Duration) -> bool {
    let t_start = Instant::now();
    loop {
        if reporter.is_closed() {
            return false;
        }
        let t_left = t_sleep.saturating_sub(t_start.elapsed());
        if t_left.is_zero() {
            return true;
        }
        sleep(t_left.min(MAX_SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pacing::{ConstantPacing, PaceStep, ScriptedPacing};
    use approx::assert_relative_eq;

    const OPTS: RacerRunOpts = RacerRunOpts {
        finish_line: 100.0,
        min_increment: 1.0,
        realtime_factor: 0.0,
    };

    #[test]
    fn step_caps_progress_at_finish_line() {
        let mut racer = Racer::new("Racer1", Box::new(ConstantPacing::new(40.0, 0.5)));
        racer.step(&OPTS).unwrap();
        racer.step(&OPTS).unwrap();
        let event = racer.step(&OPTS).unwrap();

        assert_relative_eq!(event.progress, 100.0);
        assert_relative_eq!(event.time_s, 1.5);
        assert!(event.finished);
        assert!(racer.is_finished());
    }

    #[test]
    fn step_enforces_min_increment() {
        let mut racer = Racer::new(
            "Racer1",
            Box::new(ScriptedPacing::new(vec![
                PaceStep::new(0.0, 1.0),
                PaceStep::new(-5.0, 1.0),
                PaceStep::new(f64::NAN, f64::NAN),
            ])),
        );
        for _ in 0..3 {
            racer.step(&OPTS).unwrap();
        }
        assert_relative_eq!(racer.progress(), 3.0);
        assert_relative_eq!(racer.time_s, 2.0);
    }

    #[test]
    fn run_emits_exactly_one_finish_event() {
        let (reporter, rx) = ProgressReporter::channel();
        let racer = Racer::new("Racer1", Box::new(ConstantPacing::new(30.0, 1.0)));

        assert_eq!(racer.run(&reporter, &OPTS), RacerExit::Finished);
        drop(reporter);

        let events: Vec<ProgressEvent> = rx.iter().collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events.iter().filter(|e| e.finished).count(), 1);
        assert!(events.last().unwrap().finished);
        assert!(events.windows(2).all(|w| w[0].progress < w[1].progress));
    }

    #[test]
    fn run_stops_when_pacing_fails() {
        let (reporter, rx) = ProgressReporter::channel();
        let racer = Racer::new("Racer3", Box::new(ScriptedPacing::repeat(20.0, 1.0, 3)));

        assert_eq!(
            racer.run(&reporter, &OPTS),
            RacerExit::Stalled(PacingError::Exhausted(3))
        );
        drop(reporter);
        assert_eq!(rx.iter().count(), 3);
    }

    #[test]
    fn run_stops_when_reporter_closed() {
        let (reporter, rx) = ProgressReporter::channel();
        drop(rx);
        let racer = Racer::new("Racer4", Box::new(ConstantPacing::new(1.0, 1.0)));

        assert_eq!(racer.run(&reporter, &OPTS), RacerExit::Abandoned);
    }

    #[test]
    fn huge_step_duration_saturates_wall_time() {
        let opts = RacerRunOpts {
            realtime_factor: 1.0,
            ..OPTS
        };
        assert_eq!(opts.wall_time(1e20), Some(Duration::MAX));
        assert_eq!(opts.wall_time(0.5), Some(Duration::from_millis(500)));
        assert_eq!(OPTS.wall_time(1e20), None);
    }

    #[test]
    fn paced_racer_stops_sleeping_when_race_is_decided() {
        let opts = RacerRunOpts {
            realtime_factor: 1.0,
            ..OPTS
        };
        let (reporter, rx) = ProgressReporter::channel();
        let racer = Racer::new("Racer1", Box::new(ConstantPacing::new(1.0, 1e20)));

        let handle = std::thread::spawn(move || racer.run(&reporter, &opts));
        std::thread::sleep(Duration::from_millis(50));
        drop(rx);

        assert_eq!(handle.join().unwrap(), RacerExit::Abandoned);
    }

    #[test]
    fn racer_from_pars_uses_fixed_seed() {
        let pars: RacerPars = serde_json::from_str(
            r#"{"name": "Valentino Throssi", "seed": 5,
                "pacing": {"kind": "random", "mean_delta": 5.0, "std_delta": 2.0}}"#,
        )
        .unwrap();
        let mut a = Racer::from_pars(&pars, 1).unwrap();
        let mut b = Racer::from_pars(&pars, 2).unwrap();

        assert_eq!(a.id().as_str(), "Valentino Throssi");
        for _ in 0..10 {
            assert_eq!(a.step(&OPTS).unwrap().progress, b.step(&OPTS).unwrap().progress);
        }
    }
}
