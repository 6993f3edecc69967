pub mod error;

pub mod core {
    pub mod handle_race;
    pub mod pacing;
    pub mod race;
    pub mod racer;
    pub mod reporter;
}

pub mod interfaces {
    pub mod broadcaster;
    pub mod messages;
}

pub mod post {
    pub mod race_result;
    pub mod race_results;
}

pub mod pre {
    pub mod environment;
    pub mod read_sim_pars;
    pub mod sim_opts;
}
