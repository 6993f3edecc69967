use crate::core::race::{Race, RaceConfig, NO_RACERS};
use crate::core::racer::{Racer, RacerPars};
use crate::error::RaceError;
use crate::interfaces::broadcaster::Broadcaster;
use crate::post::race_result::RaceOutcome;
use crate::post::race_results::RaceResults;
use crate::pre::environment::Environment;
use crate::pre::read_sim_pars::SimPars;
use helpers::general::InputValueError;
use std::sync::Arc;

/// build_racers creates the racers of one race from their parameters. Racers without a fixed
/// seed get `seed + index`, such that a race is reproducible from a single seed.
pub fn build_racers(
    racer_pars_all: &[RacerPars],
    seed: u64,
) -> Result<[Racer; NO_RACERS], RaceError> {
    if racer_pars_all.len() != NO_RACERS {
        return Err(InputValueError::new(format!(
            "a race needs exactly {} racers, got {}",
            NO_RACERS,
            racer_pars_all.len()
        ))
        .into());
    }

    let mut racers = Vec::with_capacity(NO_RACERS);
    for (i, racer_pars) in racer_pars_all.iter().enumerate() {
        let racer = Racer::from_pars(racer_pars, seed.wrapping_add(i as u64)).map_err(|e| {
            RaceError::Pacing {
                racer: racer_pars.name.to_owned(),
                source: e,
            }
        })?;
        racers.push(racer);
    }

    racers
        .try_into()
        .map_err(|_| InputValueError::new("racer list changed its length").into())
}

/// handle_race creates and runs a race on the basis of the inserted parameters, and returns
/// the outcome for post-processing.
pub fn handle_race<B: Broadcaster>(
    sim_pars: &SimPars,
    realtime_factor: f64,
    seed: u64,
    environment: Environment,
    broadcaster: B,
    results: Arc<RaceResults>,
) -> Result<Arc<RaceOutcome>, RaceError> {
    let racers = build_racers(&sim_pars.racer_pars_all, seed)?;
    let config = RaceConfig::from_pars(&sim_pars.race_pars, realtime_factor);
    let mut race = Race::new(racers, environment, broadcaster, results, config)?;
    race.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pacing::PacingPars;
    use crate::interfaces::broadcaster::WriterBroadcaster;
    use crate::interfaces::messages::RaceMessage;

    #[test]
    fn build_racers_requires_four_racers() {
        let mut sim_pars = SimPars::default();
        sim_pars.racer_pars_all.pop();
        assert!(matches!(
            build_racers(&sim_pars.racer_pars_all, 0),
            Err(RaceError::InvalidInput(_))
        ));
    }

    #[test]
    fn build_racers_reports_bad_pacing() {
        let mut sim_pars = SimPars::default();
        sim_pars.racer_pars_all[2].pacing = PacingPars::Random {
            mean_delta: 5.0,
            std_delta: -1.0,
            min_delta: 1.0,
            max_delta: 10.0,
            step_s: 0.1,
        };
        match build_racers(&sim_pars.racer_pars_all, 0) {
            Err(RaceError::Pacing { racer, .. }) => {
                assert_eq!(racer, sim_pars.racer_pars_all[2].name)
            }
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn default_race_streams_json_and_records_outcome() {
        let results = Arc::new(RaceResults::new());
        let mut output = Vec::new();
        let outcome = handle_race(
            &SimPars::default(),
            0.0,
            7,
            Environment::new("http", "localhost", "8080", ""),
            WriterBroadcaster::new(&mut output),
            Arc::clone(&results),
        )
        .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(outcome.finish_order.len(), NO_RACERS);

        let msgs: Vec<RaceMessage> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert!(msgs.last().unwrap().is_final());
        assert_eq!(msgs.iter().filter(|m| m.is_final()).count(), 1);
    }

    #[test]
    fn same_seed_same_finish_times() {
        let run = |seed| {
            handle_race(
                &SimPars::default(),
                0.0,
                seed,
                Environment::default(),
                WriterBroadcaster::new(std::io::sink()),
                Arc::new(RaceResults::new()),
            )
            .unwrap()
        };
        // ties in race time may be broken differently, the times themselves are reproducible
        let finish_times = |outcome: Arc<RaceOutcome>| {
            let mut times: Vec<(String, Option<f64>)> = outcome
                .finish_order
                .iter()
                .map(|e| (e.racer.to_string(), e.time_s))
                .collect();
            times.sort_by(|a, b| a.0.cmp(&b.0));
            times
        };
        assert_eq!(finish_times(run(11)), finish_times(run(11)));
    }
}
