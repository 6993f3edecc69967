use crate::core::racer::RacerId;
use crate::pre::environment::Environment;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

/// FinishEntry is one line of the final ranking.
/// * `rank` - 1-based position
/// * `time_s` - (s) Finish time, None if the racer did not finish before the timeout
/// * `progress` - Last known progress of the racer
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FinishEntry {
    pub rank: u32,
    pub racer: RacerId,
    pub time_s: Option<f64>,
    pub progress: f64,
}

impl FinishEntry {
    pub fn finished(&self) -> bool {
        self.time_s.is_some()
    }
}

/// RaceOutcome contains the ranking of one completed race and the environment of the client
/// that requested it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RaceOutcome {
    /// Position in the race results store starting at 1, 0 if the race was not recorded
    pub race_no: u64,
    pub finish_order: Vec<FinishEntry>,
    pub environment: Environment,
    pub race_time_s: f64,
}

impl RaceOutcome {
    pub fn winner(&self) -> Option<&RacerId> {
        self.finish_order
            .first()
            .filter(|entry| entry.finished())
            .map(|entry| &entry.racer)
    }

    pub fn no_finishers(&self) -> usize {
        self.finish_order.iter().filter(|e| e.finished()).count()
    }

    /// format_finish_order renders the ranking as a small text table.
    pub fn format_finish_order(&self) -> Result<String, fmt::Error> {
        let mut tmp_string = String::new();
        writeln!(
            &mut tmp_string,
            "RESULT: Race {} ({}://{}:{}{})",
            self.race_no,
            self.environment.protocol,
            self.environment.server_name,
            self.environment.server_port,
            self.environment.root_path
        )?;
        for entry in self.finish_order.iter() {
            match entry.time_s {
                Some(t) => writeln!(
                    &mut tmp_string,
                    "{:3}. {:<24} {:8.3}s",
                    entry.rank,
                    entry.racer.as_str(),
                    t
                )?,
                None => writeln!(
                    &mut tmp_string,
                    "{:3}. {:<24}      DNF ({:.1})",
                    entry.rank,
                    entry.racer.as_str(),
                    entry.progress
                )?,
            }
        }
        Ok(tmp_string)
    }

    /// print_finish_order prints the resulting ranking to the console output.
    pub fn print_finish_order(&self) -> Result<(), fmt::Error> {
        print!("{}", self.format_finish_order()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> RaceOutcome {
        RaceOutcome {
            race_no: 3,
            finish_order: vec![
                FinishEntry {
                    rank: 1,
                    racer: RacerId::new("Racer2"),
                    time_s: Some(5.0),
                    progress: 100.0,
                },
                FinishEntry {
                    rank: 2,
                    racer: RacerId::new("Racer3"),
                    time_s: None,
                    progress: 60.0,
                },
            ],
            environment: Environment::new("http", "localhost", "8080", ""),
            race_time_s: 20.0,
        }
    }

    #[test]
    fn winner_is_first_finisher() {
        let mut outcome = outcome();
        assert_eq!(outcome.winner(), Some(&RacerId::new("Racer2")));
        assert_eq!(outcome.no_finishers(), 1);

        outcome.finish_order.remove(0);
        assert_eq!(outcome.winner(), None);
    }

    #[test]
    fn finish_order_table() {
        let table = outcome().format_finish_order().unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "RESULT: Race 3 (http://localhost:8080)");
        assert!(lines[1].contains("Racer2") && lines[1].contains("5.000s"));
        assert!(lines[2].contains("DNF (60.0)"));
    }
}
