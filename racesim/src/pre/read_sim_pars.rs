use crate::core::pacing::PacingPars;
use crate::core::race::RacePars;
use crate::core::racer::RacerPars;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;

/// SimPars is used to store all other parameter structs.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SimPars {
    #[serde(default)]
    pub race_pars: RacePars,
    pub racer_pars_all: Vec<RacerPars>,
}

impl Default for SimPars {
    /// The default roster consists of four legends with slightly different random pacing.
    fn default() -> Self {
        let legend = |name: &str, mean_delta: f64, std_delta: f64| RacerPars {
            name: name.to_owned(),
            seed: None,
            pacing: PacingPars::Random {
                mean_delta,
                std_delta,
                min_delta: 1.0,
                max_delta: 10.0,
                step_s: 0.1,
            },
        };

        SimPars {
            race_pars: RacePars::default(),
            racer_pars_all: vec![
                legend("Jimmie Thronson", 4.0, 1.0),
                legend("Michael Thrumacher", 4.2, 2.0),
                legend("Sebastien Throeb", 3.9, 0.5),
                legend("Valentino Throssi", 4.1, 2.5),
            ],
        }
    }
}

/// read_sim_pars reads the JSON file and decodes the JSON string into the simulation parameters
/// struct.
pub fn read_sim_pars(filepath: &Path) -> anyhow::Result<SimPars> {
    let fh = OpenOptions::new()
        .read(true)
        .open(filepath)
        .context(format!(
            "Failed to open parameter file {}!",
            filepath.display()
        ))?;
    let pars = serde_json::from_reader(&fh).context(format!(
        "Failed to parse parameter file {}!",
        filepath.display()
    ))?;
    Ok(pars)
}
