use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use racesim::core::handle_race::handle_race;
use racesim::interfaces::broadcaster::{ChannelBroadcaster, WriterBroadcaster};
use racesim::interfaces::messages::RaceMessage;
use racesim::post::race_result::RaceOutcome;
use racesim::post::race_results::RaceResults;
use racesim::pre::environment::{Environment, RACE_PATH};
use racesim::pre::read_sim_pars::{read_sim_pars, SimPars};
use racesim::pre::sim_opts::SimOpts;
use rayon::prelude::*;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const PROGRESS_BAR_WIDTH: usize = 40;

fn init_logging(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

/// render_progress draws one progress bar line per racer.
fn render_progress(racer: &str, progress: f64, finish_line: f64, finished: bool) -> String {
    let filled = ((progress / finish_line).clamp(0.0, 1.0) * PROGRESS_BAR_WIDTH as f64) as usize;
    format!(
        "{:<20} [{}{}] {:5.1}{}",
        racer,
        "#".repeat(filled),
        ".".repeat(PROGRESS_BAR_WIDTH - filled),
        progress,
        if finished { " FINISHED" } else { "" }
    )
}

fn run_batch(
    sim_opts: &SimOpts,
    sim_pars: &SimPars,
    environment: &Environment,
    results: &Arc<RaceResults>,
    seed: u64,
) -> anyhow::Result<()> {
    info!(
        "Running {} race(s) in parallel without live view...",
        sim_opts.no_sim_runs
    );
    let t_start = Instant::now();

    let outcomes: Vec<anyhow::Result<Arc<RaceOutcome>>> = (0..sim_opts.no_sim_runs)
        .into_par_iter()
        .map(|run| {
            let writer: Box<dyn Write + Send> = if sim_opts.json {
                Box::new(std::io::stdout())
            } else {
                Box::new(std::io::sink())
            };
            handle_race(
                sim_pars,
                sim_opts.realtime_factor,
                seed.wrapping_add(run as u64 * 100),
                environment.clone(),
                WriterBroadcaster::new(writer),
                Arc::clone(results),
            )
            .with_context(|| format!("Race run {} failed!", run))
        })
        .collect();

    info!("Execution time: {}ms", t_start.elapsed().as_millis());

    if !sim_opts.json {
        for outcome in outcomes.iter().flatten() {
            outcome.print_finish_order()?;
        }
    }
    // report the first failure after all races are done
    for outcome in outcomes {
        outcome?;
    }
    Ok(())
}

fn run_watch(
    sim_opts: &SimOpts,
    sim_pars: &SimPars,
    environment: &Environment,
    results: &Arc<RaceResults>,
    seed: u64,
) -> anyhow::Result<()> {
    info!("Starting live race...");

    // create channel between the race and the observer
    let (tx, rx) = flume::unbounded();

    // run the race in a separate thread, the observer stays on the main thread
    let sim_pars_thread = sim_pars.clone();
    let environment_thread = environment.clone();
    let results_thread = Arc::clone(results);
    let realtime_factor = sim_opts.realtime_factor;

    let race_thread = thread::spawn(move || {
        handle_race(
            &sim_pars_thread,
            realtime_factor,
            seed,
            environment_thread,
            ChannelBroadcaster::new(tx),
            results_thread,
        )
    });

    let finish_line = sim_pars.race_pars.finish_line;
    let mut standings: Vec<(String, f64, bool)> = Vec::new();

    for msg in rx.iter() {
        match msg {
            RaceMessage::Progress {
                racer,
                progress,
                finished,
            } => {
                let name = racer.to_string();
                match standings.iter_mut().find(|s| s.0 == name) {
                    Some(standing) => *standing = (name, progress, finished),
                    None => standings.push((name, progress, finished)),
                }
                let lines: Vec<String> = standings
                    .iter()
                    .map(|(name, progress, finished)| {
                        render_progress(name, *progress, finish_line, *finished)
                    })
                    .collect();
                println!("{}\n", lines.join("\n"));
            }
            RaceMessage::Final { finish_order } => {
                println!("RESULT: Finish order");
                for entry in finish_order.iter() {
                    match entry.time_s {
                        Some(t) => println!("{:3}. {} ({:.3}s)", entry.rank, entry.racer, t),
                        None => println!("{:3}. {} (DNF)", entry.rank, entry.racer),
                    }
                }
            }
        }
    }

    let outcome = race_thread
        .join()
        .map_err(|_| anyhow::anyhow!("Race thread panicked!"))?
        .context("Live race failed!")?;
    info!(
        "Race {} won by {}",
        outcome.race_no,
        outcome
            .winner()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "nobody".to_owned())
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // PRE-PROCESSING ------------------------------------------------------------------------------
    // get simulation options from the command line arguments
    let sim_opts: SimOpts = SimOpts::parse();
    init_logging(sim_opts.debug);

    // get simulation parameters
    let sim_pars = if let Some(parfile_path) = &sim_opts.parfile_path {
        info!("Reading simulation parameters from {:?}", parfile_path);
        read_sim_pars(parfile_path)?
    } else {
        info!("No parameter file provided, using the default roster");
        SimPars::default()
    };

    let headers: HashMap<String, String> =
        [("host".to_owned(), sim_opts.host.to_owned())].into_iter().collect();
    let environment = Environment::from_headers(&headers, RACE_PATH)
        .context("Could not determine race environment!")?;
    let seed = sim_opts.seed_or_random();

    info!(
        "Racing {} racers to {} for {} with seed {}",
        sim_pars.racer_pars_all.len(),
        sim_pars.race_pars.finish_line,
        environment.base_url(),
        seed
    );

    // EXECUTION -----------------------------------------------------------------------------------
    let results = Arc::new(RaceResults::new());

    if !sim_opts.watch {
        run_batch(&sim_opts, &sim_pars, &environment, &results, seed)?;
    } else {
        run_watch(&sim_opts, &sim_pars, &environment, &results, seed)?;
    }

    // POST-PROCESSING -----------------------------------------------------------------------------
    info!("{} race(s) recorded", results.len());
    let out_path = sim_opts
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from("output").join("race_results.csv"));
    match results.write_csv(&out_path) {
        Ok(no_rows) => info!("Results written to {} ({} rows)", out_path.display(), no_rows),
        Err(e) => warn!("Could not write results to {}: {}", out_path.display(), e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_scales_with_finish_line() {
        let line = render_progress("Racer1", 50.0, 100.0, false);
        assert!(line.contains(&format!("[{}{}]", "#".repeat(20), ".".repeat(20))));
        assert!(line.ends_with(" 50.0"));

        let line = render_progress("Racer2", 120.0, 100.0, true);
        assert!(line.contains(&"#".repeat(PROGRESS_BAR_WIDTH)));
        assert!(line.ends_with("FINISHED"));
    }
}
