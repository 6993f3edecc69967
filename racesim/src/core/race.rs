use crate::core::racer::{ProgressEvent, Racer, RacerId, RacerRunOpts};
use crate::core::reporter::ProgressReporter;
use crate::error::RaceError;
use crate::interfaces::broadcaster::{Broadcaster, Delivery};
use crate::post::race_result::{FinishEntry, RaceOutcome};
use crate::post::race_results::RaceResults;
use crate::pre::environment::Environment;
use flume::{Receiver, Selector};
use helpers::general::{argsort, InputValueError, SortOrder};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Number of racers taking part in every race.
pub const NO_RACERS: usize = 4;

// wall clock backstop for the race time timeout
const WALL_LIMIT_FACTOR: f64 = 1.1;
const WALL_LIMIT_MARGIN: Duration = Duration::from_millis(100);
const UNPACED_WALL_LIMIT: Duration = Duration::from_secs(10);

/// * `finish_line` - Progress value a racer has to reach
/// * `timeout_s` - (s) Maximum race time, racers not finished by then are ranked by progress
/// * `min_increment` - Lower bound of every progress increment
/// * `record_results` - Store the outcome in the shared race results
/// * `cancel_on_disconnect` - Stop the race as soon as the observer is gone (only allowed if
///   results are not recorded)
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RacePars {
    #[serde(default = "default_finish_line")]
    pub finish_line: f64,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,
    #[serde(default = "default_min_increment")]
    pub min_increment: f64,
    #[serde(default = "default_record_results")]
    pub record_results: bool,
    #[serde(default)]
    pub cancel_on_disconnect: bool,
}

fn default_finish_line() -> f64 {
    100.0
}

fn default_timeout_s() -> f64 {
    60.0
}

fn default_min_increment() -> f64 {
    0.1
}

fn default_record_results() -> bool {
    true
}

impl Default for RacePars {
    fn default() -> Self {
        RacePars {
            finish_line: default_finish_line(),
            timeout_s: default_timeout_s(),
            min_increment: default_min_increment(),
            record_results: default_record_results(),
            cancel_on_disconnect: false,
        }
    }
}

/// Runtime configuration of one race.
/// * `realtime_factor` - Race time per wall time, 0.0 runs the race as fast as possible
/// * `wall_limit` - (OPTIONAL) Overrides the derived wall clock limit of the race. By default a
///   paced race is stopped after `timeout_s / realtime_factor * 1.1 + 100ms` of real time, i.e.
///   racers that stay silent can keep the race running up to 10% plus 100ms past its timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceConfig {
    pub finish_line: f64,
    pub timeout_s: f64,
    pub min_increment: f64,
    pub realtime_factor: f64,
    pub record_results: bool,
    pub cancel_on_disconnect: bool,
    pub wall_limit: Option<Duration>,
}

impl RaceConfig {
    pub fn from_pars(race_pars: &RacePars, realtime_factor: f64) -> RaceConfig {
        RaceConfig {
            finish_line: race_pars.finish_line,
            timeout_s: race_pars.timeout_s,
            min_increment: race_pars.min_increment,
            realtime_factor,
            record_results: race_pars.record_results,
            cancel_on_disconnect: race_pars.cancel_on_disconnect,
            wall_limit: None,
        }
    }

    /// unpaced returns a configuration that runs the racers without sleeping.
    pub fn unpaced(timeout_s: f64) -> RaceConfig {
        RaceConfig {
            timeout_s,
            realtime_factor: 0.0,
            ..RaceConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), RaceError> {
        if !(self.finish_line.is_finite() && self.finish_line > 0.0) {
            return Err(RaceError::InvalidConfig(format!(
                "finish line must be positive, got {}",
                self.finish_line
            )));
        }
        if !(self.min_increment.is_finite() && self.min_increment > 0.0) {
            return Err(RaceError::InvalidConfig(format!(
                "minimum increment must be positive, got {}",
                self.min_increment
            )));
        }
        if !(self.realtime_factor.is_finite() && self.realtime_factor >= 0.0) {
            return Err(RaceError::InvalidConfig(format!(
                "real-time factor must be >= 0, got {}",
                self.realtime_factor
            )));
        }
        if !self.timeout_s.is_finite() {
            return Err(RaceError::InvalidConfig(format!(
                "timeout must be finite, got {}",
                self.timeout_s
            )));
        }
        if self.cancel_on_disconnect && self.record_results {
            return Err(RaceError::InvalidConfig(
                "races can only be cancelled on disconnect if results are not recorded".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn is_paced(&self) -> bool {
        self.realtime_factor > 0.0
    }

    pub fn racer_run_opts(&self) -> RacerRunOpts {
        RacerRunOpts {
            finish_line: self.finish_line,
            min_increment: self.min_increment,
            realtime_factor: self.realtime_factor,
        }
    }

    /// wall_limit returns the real time after which the race is decided even if racers are
    /// still silent.
    pub fn wall_limit(&self) -> Duration {
        if let Some(wall_limit) = self.wall_limit {
            return wall_limit;
        }
        if !self.is_paced() {
            return UNPACED_WALL_LIMIT;
        }
        let t_wall = self.timeout_s.max(0.0) / self.realtime_factor * WALL_LIMIT_FACTOR;
        Duration::try_from_secs_f64(t_wall)
            .map(|d| d + WALL_LIMIT_MARGIN)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RaceConfig {
    fn default() -> Self {
        RaceConfig::from_pars(&RacePars::default(), 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceStatus {
    Pending,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Running,
    Finished,
    TimedOut,
    Stalled,
}

/// Bookkeeping of the race about one racer.
/// * `finish` - Finish time and completion sequence number, set at most once
#[derive(Debug, Clone)]
struct RacerSlot {
    id: RacerId,
    state: SlotState,
    progress: f64,
    time_s: f64,
    finish: Option<(f64, usize)>,
}

impl RacerSlot {
    fn new(id: RacerId) -> RacerSlot {
        RacerSlot {
            id,
            state: SlotState::Running,
            progress: 0.0,
            time_s: 0.0,
            finish: None,
        }
    }
}

enum FanIn {
    Event(usize, ProgressEvent),
    Disconnected(usize),
    Timeout,
    Idle,
}

/// Race coordinates the racers of one race instance: it runs them concurrently, forwards their
/// progress to the observer, decides the finish order and records the outcome.
pub struct Race<B: Broadcaster> {
    racers: Vec<Racer>,
    slots: Vec<RacerSlot>,
    environment: Environment,
    broadcaster: B,
    results: Arc<RaceResults>,
    config: RaceConfig,
    status: RaceStatus,
    transport_ok: bool,
    timed_out: bool,
    no_finished: usize,
}

impl<B: Broadcaster> Race<B> {
    pub fn new(
        racers: [Racer; NO_RACERS],
        environment: Environment,
        broadcaster: B,
        results: Arc<RaceResults>,
        config: RaceConfig,
    ) -> Result<Race<B>, RaceError> {
        config.validate()?;

        let mut ids = HashSet::with_capacity(NO_RACERS);
        for racer in racers.iter() {
            if !ids.insert(racer.id().clone()) {
                return Err(InputValueError::new(format!(
                    "racer {} takes part more than once",
                    racer.id()
                ))
                .into());
            }
        }

        let slots = racers
            .iter()
            .map(|racer| RacerSlot::new(racer.id().clone()))
            .collect();

        Ok(Race {
            racers: Vec::from(racers),
            slots,
            environment,
            broadcaster,
            results,
            config,
            status: RaceStatus::Pending,
            transport_ok: true,
            timed_out: false,
            no_finished: 0,
        })
    }

    pub fn status(&self) -> RaceStatus {
        self.status
    }

    pub fn broadcaster(&self) -> &B {
        &self.broadcaster
    }

    pub fn transport_ok(&self) -> bool {
        self.transport_ok
    }

    // ---------------------------------------------------------------------------------------------
    // MAIN METHOD ---------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// run starts all racers, streams their progress to the observer until the race is decided,
    /// records the outcome and sends the final message. Only a failing results store is
    /// reported as an error.
    pub fn run(&mut self) -> Result<Arc<RaceOutcome>, RaceError> {
        if self.status != RaceStatus::Pending {
            return Err(RaceError::AlreadyRun);
        }

        // racer threads are detached, they stop at their next report once the receivers are gone
        let opts = self.config.racer_run_opts();
        let mut receivers = Vec::with_capacity(NO_RACERS);
        for racer in std::mem::take(&mut self.racers) {
            let (reporter, rx) = ProgressReporter::channel();
            thread::Builder::new()
                .name(format!("racer-{}", racer.id()))
                .spawn(move || racer.run(&reporter, &opts))?;
            receivers.push(Some(rx));
        }

        let t_start = Instant::now();
        self.status = RaceStatus::Running;
        info!(
            "Race started with {} racers (finish line {}, timeout {:.3}s)",
            self.slots.len(),
            self.config.finish_line,
            self.config.timeout_s
        );

        if self.config.timeout_s <= 0.0 {
            self.timed_out = true;
        } else {
            let deadline = t_start.checked_add(self.config.wall_limit());
            self.collect_events(&mut receivers, deadline);
        }

        self.status = RaceStatus::Finished;
        drop(receivers);

        let outcome = self.build_outcome();
        let outcome = if self.config.record_results {
            self.results.append(outcome)?
        } else {
            Arc::new(outcome)
        };
        info!(
            "Race {} decided after {:.3}s race time ({}ms wall time), {} of {} racers finished",
            outcome.race_no,
            outcome.race_time_s,
            t_start.elapsed().as_millis(),
            outcome.no_finishers(),
            outcome.finish_order.len()
        );

        self.send_final(&outcome);
        Ok(outcome)
    }

    // ---------------------------------------------------------------------------------------------
    // EVENT HANDLING ------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    fn collect_events(
        &mut self,
        receivers: &mut [Option<Receiver<ProgressEvent>>],
        deadline: Option<Instant>,
    ) {
        while !self.all_decided() {
            match next_event(receivers, deadline) {
                FanIn::Event(idx, event) => {
                    self.apply_event(idx, event);
                    // a decided racer abandons at its next report
                    if self.slots[idx].state != SlotState::Running {
                        receivers[idx] = None;
                    }
                }
                FanIn::Disconnected(idx) => {
                    receivers[idx] = None;
                    self.mark_stalled(idx);
                }
                FanIn::Timeout => {
                    warn!("Race exceeded its wall clock limit, ranking racers by current progress");
                    self.timed_out = true;
                    break;
                }
                FanIn::Idle => break,
            }

            if !self.transport_ok && self.config.cancel_on_disconnect {
                info!("Observer is gone and results are not recorded, cancelling race");
                break;
            }
        }
    }

    /// apply_event updates the bookkeeping of racer `idx` and forwards the event to the
    /// observer. Events of decided racers, including repeated finish events, are dropped.
    fn apply_event(&mut self, idx: usize, event: ProgressEvent) {
        let timeout_s = self.config.timeout_s;
        let slot = &mut self.slots[idx];

        if slot.state != SlotState::Running {
            debug!("Dropping event of decided racer {}", slot.id);
            return;
        }

        if event.time_s > timeout_s {
            warn!(
                "Racer {} did not finish within {:.3}s (progress {:.1})",
                slot.id, timeout_s, slot.progress
            );
            slot.state = SlotState::TimedOut;
            self.timed_out = true;
            return;
        }

        slot.progress = slot.progress.max(event.progress);
        slot.time_s = event.time_s;

        if event.finished {
            slot.state = SlotState::Finished;
            slot.finish = Some((event.time_s, self.no_finished));
            self.no_finished += 1;
            info!(
                "Racer {} finished as no. {} after {:.3}s",
                slot.id, self.no_finished, event.time_s
            );
        }

        self.forward_progress(&event);
    }

    fn mark_stalled(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        if slot.state == SlotState::Running {
            warn!(
                "Racer {} stopped reporting at progress {:.1}",
                slot.id, slot.progress
            );
            slot.state = SlotState::Stalled;
        }
    }

    fn all_decided(&self) -> bool {
        self.slots.iter().all(|slot| slot.state != SlotState::Running)
    }

    fn forward_progress(&mut self, event: &ProgressEvent) {
        if !self.transport_ok {
            return;
        }
        if let Delivery::Unavailable = self.broadcaster.send_progress(event) {
            warn!("Observer transport unavailable, race continues without live updates");
            self.transport_ok = false;
        }
    }

    fn send_final(&mut self, outcome: &RaceOutcome) {
        if !self.transport_ok {
            info!("Final result of race {} not delivered, observer is gone", outcome.race_no);
            return;
        }
        if let Delivery::Unavailable = self.broadcaster.send_final(outcome) {
            warn!("Final result of race {} could not be delivered", outcome.race_no);
            self.transport_ok = false;
        }
    }

    // ---------------------------------------------------------------------------------------------
    // RESULTS -------------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    fn build_outcome(&self) -> RaceOutcome {
        let finish_order = rank_slots(&self.slots)
            .into_iter()
            .enumerate()
            .map(|(pos, idx)| {
                let slot = &self.slots[idx];
                FinishEntry {
                    rank: pos as u32 + 1,
                    racer: slot.id.clone(),
                    time_s: slot.finish.map(|(t, _)| t),
                    progress: slot.progress,
                }
            })
            .collect();

        let t_last = self
            .slots
            .iter()
            .map(|slot| slot.time_s)
            .fold(0.0, f64::max);
        let race_time_s = if self.timed_out {
            self.config.timeout_s.max(0.0).max(t_last)
        } else {
            t_last
        };

        RaceOutcome {
            race_no: 0,
            finish_order,
            environment: self.environment.clone(),
            race_time_s,
        }
    }
}

/// next_event waits until any live racer channel delivers an event or disconnects.
fn next_event(
    receivers: &[Option<Receiver<ProgressEvent>>],
    deadline: Option<Instant>,
) -> FanIn {
    if receivers.iter().all(Option::is_none) {
        return FanIn::Idle;
    }

    let mut selector: Selector<FanIn> = Selector::new();
    for (idx, rx) in receivers.iter().enumerate() {
        if let Some(rx) = rx {
            selector = selector.recv(rx, move |res| match res {
                Ok(event) => FanIn::Event(idx, event),
                Err(_) => FanIn::Disconnected(idx),
            });
        }
    }

    match deadline {
        Some(deadline) => selector.wait_deadline(deadline).unwrap_or(FanIn::Timeout),
        None => selector.wait(),
    }
}

/// rank_slots returns the slot indices in finishing order: finishers by finish time (ties by
/// completion order), then everybody else by progress, ties by insertion order.
fn rank_slots(slots: &[RacerSlot]) -> Vec<usize> {
    let mut finishers: Vec<(f64, usize, usize)> = slots
        .iter()
        .enumerate()
        .filter_map(|(idx, slot)| slot.finish.map(|(t, seq)| (t, seq, idx)))
        .collect();
    finishers.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let others: Vec<usize> = (0..slots.len())
        .filter(|&idx| slots[idx].finish.is_none())
        .collect();
    let progress: Vec<f64> = others.iter().map(|&idx| slots[idx].progress).collect();

    finishers
        .into_iter()
        .map(|(_, _, idx)| idx)
        .chain(
            argsort(&progress, SortOrder::Descending)
                .into_iter()
                .map(|k| others[k]),
        )
        .collect()
}
