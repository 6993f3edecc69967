use crate::core::racer::RacerId;
use crate::post::race_result::RaceOutcome;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    #[error("results store is full ({capacity} outcomes)")]
    CapacityExhausted { capacity: usize },
    #[error("failed to export results: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to export results: {0}")]
    Csv(#[from] csv::Error),
}

/// RaceResults is the append-only store of all completed races. It is shared by all races of the
/// process, insertion order is the order in which the races completed.
#[derive(Debug, Default)]
pub struct RaceResults {
    entries: RwLock<Vec<Arc<RaceOutcome>>>,
    capacity: Option<usize>,
}

impl RaceResults {
    pub fn new() -> RaceResults {
        RaceResults::default()
    }

    /// with_capacity_limit creates a store that refuses appends once `capacity` outcomes are
    /// stored.
    pub fn with_capacity_limit(capacity: usize) -> RaceResults {
        RaceResults {
            capacity: Some(capacity),
            ..RaceResults::default()
        }
    }

    /// append stores the outcome and numbers it by its position in the store, starting at 1.
    pub fn append(&self, mut outcome: RaceOutcome) -> Result<Arc<RaceOutcome>, ResultsError> {
        let mut entries = self.entries.write();
        if let Some(capacity) = self.capacity {
            if entries.len() >= capacity {
                return Err(ResultsError::CapacityExhausted { capacity });
            }
        }
        outcome.race_no = entries.len() as u64 + 1;
        let outcome = Arc::new(outcome);
        entries.push(Arc::clone(&outcome));
        Ok(outcome)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Option<Arc<RaceOutcome>> {
        self.entries.read().get(idx).cloned()
    }

    /// all returns a view of the outcomes stored at the time of the call. Iterating the view
    /// only takes the read lock per item, so writers are never blocked for long.
    pub fn all(&self) -> ResultsView<'_> {
        ResultsView {
            store: self,
            len: self.len(),
        }
    }

    pub fn query(&self, filter: ResultsFilter) -> impl Iterator<Item = Arc<RaceOutcome>> + '_ {
        self.all().into_iter().filter(move |outcome| filter.matches(outcome))
    }

    /// write_csv exports one row per racer and race to the given file.
    pub fn write_csv(&self, path: &Path) -> Result<usize, ResultsError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        let mut no_rows = 0;

        for outcome in self.all() {
            for entry in outcome.finish_order.iter() {
                writer.serialize(CsvRow {
                    race_no: outcome.race_no,
                    rank: entry.rank,
                    racer: entry.racer.as_str(),
                    time_s: entry.time_s,
                    progress: entry.progress,
                    protocol: &outcome.environment.protocol,
                    server_name: &outcome.environment.server_name,
                    server_port: &outcome.environment.server_port,
                    root_path: &outcome.environment.root_path,
                })?;
                no_rows += 1;
            }
        }
        writer.flush()?;
        Ok(no_rows)
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    race_no: u64,
    rank: u32,
    racer: &'a str,
    time_s: Option<f64>,
    progress: f64,
    protocol: &'a str,
    server_name: &'a str,
    server_port: &'a str,
    root_path: &'a str,
}

/// ResultsView is a restartable, read-only view of a fixed number of stored outcomes.
#[derive(Debug, Clone, Copy)]
pub struct ResultsView<'a> {
    store: &'a RaceResults,
    len: usize,
}

impl<'a> ResultsView<'a> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> ResultsIter<'a> {
        ResultsIter {
            store: self.store,
            next: 0,
            end: self.len,
        }
    }
}

impl<'a> IntoIterator for ResultsView<'a> {
    type Item = Arc<RaceOutcome>;
    type IntoIter = ResultsIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug)]
pub struct ResultsIter<'a> {
    store: &'a RaceResults,
    next: usize,
    end: usize,
}

impl<'a> Iterator for ResultsIter<'a> {
    type Item = Arc<RaceOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let item = self.store.get(self.next);
        self.next += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

/// ResultsFilter selects outcomes by client environment and winner. Unset fields match
/// everything.
#[derive(Debug, Clone, Default)]
pub struct ResultsFilter {
    pub protocol: Option<String>,
    pub server_name: Option<String>,
    pub server_port: Option<String>,
    pub root_path: Option<String>,
    pub winner: Option<RacerId>,
}

impl ResultsFilter {
    pub fn new() -> ResultsFilter {
        ResultsFilter::default()
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    pub fn server_port(mut self, server_port: impl Into<String>) -> Self {
        self.server_port = Some(server_port.into());
        self
    }

    pub fn root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = Some(root_path.into());
        self
    }

    pub fn winner(mut self, winner: impl Into<RacerId>) -> Self {
        self.winner = Some(winner.into());
        self
    }

    pub fn matches(&self, outcome: &RaceOutcome) -> bool {
        let env = &outcome.environment;
        fn field_matches(wanted: &Option<String>, value: &str) -> bool {
            wanted.as_deref().map_or(true, |w| w == value)
        }

        field_matches(&self.protocol, &env.protocol)
            && field_matches(&self.server_name, &env.server_name)
            && field_matches(&self.server_port, &env.server_port)
            && field_matches(&self.root_path, &env.root_path)
            && self
                .winner
                .as_ref()
                .map_or(true, |w| outcome.winner() == Some(w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::race_result::FinishEntry;
    use crate::pre::environment::Environment;
    use std::collections::HashSet;
    use std::thread;

    fn outcome(server_name: &str, winner: &str) -> RaceOutcome {
        RaceOutcome {
            race_no: 0,
            finish_order: vec![FinishEntry {
                rank: 1,
                racer: RacerId::new(winner),
                time_s: Some(1.0),
                progress: 100.0,
            }],
            environment: Environment::new("http", server_name, "80", ""),
            race_time_s: 1.0,
        }
    }

    #[test]
    fn concurrent_appends_are_neither_lost_nor_duplicated() {
        const NO_WRITERS: usize = 8;
        const NO_APPENDS: usize = 250;
        let results = Arc::new(RaceResults::new());

        let handles: Vec<_> = (0..NO_WRITERS)
            .map(|_| {
                let results = Arc::clone(&results);
                thread::spawn(move || {
                    for _ in 0..NO_APPENDS {
                        results.append(outcome("localhost", "A")).unwrap();
                        // concurrent readers must always see a consistent prefix
                        assert!(results.all().iter().count() >= 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(results.len(), NO_WRITERS * NO_APPENDS);
        let race_nos: HashSet<u64> = results.all().into_iter().map(|o| o.race_no).collect();
        assert_eq!(race_nos.len(), NO_WRITERS * NO_APPENDS);
        // numbers follow insertion order without gaps
        assert!(results
            .all()
            .iter()
            .enumerate()
            .all(|(idx, o)| o.race_no == idx as u64 + 1));
    }

    #[test]
    fn view_is_a_restartable_snapshot() {
        let results = RaceResults::new();
        results.append(outcome("a", "A")).unwrap();
        results.append(outcome("b", "B")).unwrap();

        let view = results.all();
        results.append(outcome("c", "C")).unwrap();

        assert_eq!(view.len(), 2);
        let first: Vec<u64> = view.iter().map(|o| o.race_no).collect();
        let second: Vec<u64> = view.iter().map(|o| o.race_no).collect();
        assert_eq!(first, vec![1, 2]);
        assert_eq!(first, second);
        assert_eq!(results.all().len(), 3);
    }

    #[test]
    fn query_filters_by_environment_and_winner() {
        let results = RaceResults::new();
        results.append(outcome("a", "A")).unwrap();
        results.append(outcome("b", "A")).unwrap();
        results.append(outcome("a", "B")).unwrap();

        let by_server: Vec<u64> = results
            .query(ResultsFilter::new().server_name("a"))
            .map(|o| o.race_no)
            .collect();
        assert_eq!(by_server, vec![1, 3]);

        let by_winner: Vec<u64> = results
            .query(ResultsFilter::new().protocol("http").winner("A"))
            .map(|o| o.race_no)
            .collect();
        assert_eq!(by_winner, vec![1, 2]);

        assert_eq!(results.query(ResultsFilter::new().server_port("443")).count(), 0);
    }

    #[test]
    fn capacity_limit_is_reported() {
        let results = RaceResults::with_capacity_limit(1);
        results.append(outcome("a", "A")).unwrap();
        assert!(matches!(
            results.append(outcome("a", "A")),
            Err(ResultsError::CapacityExhausted { capacity: 1 })
        ));
        assert_eq!(results.len(), 1);
        assert_eq!(results.get(0).unwrap().race_no, 1);
    }

    #[test]
    fn csv_export_writes_one_row_per_racer() {
        let results = RaceResults::new();
        results.append(outcome("a", "A")).unwrap();
        results.append(outcome("b", "B")).unwrap();

        let path = std::env::temp_dir()
            .join(format!("racesim_results_{}", std::process::id()))
            .join("results.csv");
        assert_eq!(results.write_csv(&path).unwrap(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("race_no,rank,racer,time_s,progress,protocol,server_name,server_port,root_path")
        );
        assert_eq!(lines.next(), Some("1,1,A,1.0,100.0,http,a,80,"));
        assert_eq!(lines.count(), 1);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
