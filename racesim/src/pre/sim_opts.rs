use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(
    version = "0.1.0",
    author = "Alexander Heilmeier <alexander.heilmeier@tum.de>",
    name = "RS-TR",
    about = "A concurrent thread racing simulator written in Rust"
)]
pub struct SimOpts {
    // FLAGS ---------------------------------------------------------------------------------------
    /// Activate debug logging
    #[clap(short, long)]
    pub debug: bool,

    /// Watch a single race live - progress is printed while the racers run
    #[clap(short, long)]
    pub watch: bool,

    /// Print every race message as a line of JSON (only for non-watch mode)
    #[clap(short, long)]
    pub json: bool,

    // OPTIONS -------------------------------------------------------------------------------------
    /// Set number of races run in parallel (only for non-watch mode, ignored in watch mode)
    #[clap(short, long, default_value = "1")]
    pub no_sim_runs: u32,

    /// Set path to the simulation parameter file (OPTIONAL: if not set, uses the default roster)
    #[clap(short, long)]
    pub parfile_path: Option<PathBuf>,

    /// Set real-time factor, 0.0 runs the races as fast as possible
    #[clap(short, long, default_value = "1.0")]
    pub realtime_factor: f64,

    /// Set seed of the first race (OPTIONAL: if not set, a random seed is used)
    #[clap(short, long)]
    pub seed: Option<u64>,

    /// Set host (name[:port]) reported as the client environment of the races
    #[clap(long, default_value = "localhost:8080")]
    pub host: String,

    /// Set path of the CSV file the race results are exported to (OPTIONAL)
    #[clap(short, long)]
    pub output: Option<PathBuf>,
}

impl SimOpts {
    /// seed_or_random returns the given seed or draws a new one.
    pub fn seed_or_random(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }
}
